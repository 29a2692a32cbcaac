//! # Strand
//!
//! Asynchronous TCP/TLS client engine: one [`Client`] drives one outbound
//! connection through its full lifecycle on a dedicated Tokio task, and a
//! [`ClientPool`] fans clients out for load distribution.
//!
//! ## Features
//!
//! - **Connection state machine** with connect timeouts, DNS resolution and
//!   per-cause reconnection policies
//! - **Ordered write queue** - FIFO draining with partial-write requeue,
//!   completion/destroy callbacks and cancellation
//! - **Read pipeline** with optional self-synchronizing token framing and a
//!   receive transform hook
//! - **Rustls TLS** driven sans-IO, with bounded handshake and shutdown
//!   sub-state-machines
//! - **Client pooling** with round-robin and least-load selection
//! - **Traffic telemetry** - lock-free byte/packet counters with windowed
//!   rate sampling
//!
//! ## Usage
//!
//! ```no_run
//! use strand::{Client, ClientConfig, Event, EventKind};
//!
//! # async fn example() -> strand::Result<()> {
//! let config = ClientConfig::builder("example.com", 4000)
//!     .connect_timeout_ms(5_000)
//!     .framing(*b"\n", 64 * 1024)
//!     .build()?;
//! let client = Client::new(config)?;
//! client.on(EventKind::Read, |event| {
//!     if let Event::Read(bytes) = event {
//!         println!("got {} bytes", bytes.len());
//!     }
//! })?;
//! client.connect()?;
//! client.write(&b"hello\n"[..])?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod aio;
pub mod config;
pub mod connection;
pub mod dns;
pub mod error;
pub mod framing;
pub mod pool;
pub mod telemetry;
pub mod tls;

pub use aio::{WriteHandle, WriteQueue};
pub use config::{ClientConfig, ClientConfigBuilder, FramingConfig, ReconnectPolicy, TlsConfig};
pub use connection::{Client, Event, EventHandler, EventKind, SocketState};
pub use error::{CloseReason, ConnectFailure, Error, Result};
pub use framing::ReadPipeline;
pub use pool::{ClientPool, SelectPolicy};
pub use telemetry::{ConnStats, StatsSnapshot};
