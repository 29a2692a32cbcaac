//! One outbound connection: the owner-facing handle and its driver task.
//!
//! A [`Client`] is a cheap clonable handle over a spawned driver task that
//! owns the socket and runs the state machine. Commands cross an unbounded
//! channel; write submissions go straight into the shared queue and wake the
//! driver. Dropping the last handle destroys the connection.

mod driver;
mod events;
mod state;

pub use events::{Event, EventHandler, EventKind};
pub use state::SocketState;

pub(crate) use driver::Command;
pub(crate) use state::Shared;

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::aio::{WriteHandle, WriteQueue};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::framing::TransformFn;
use crate::telemetry::StatsSnapshot;

/// Handle to one outbound TCP (optionally TLS) connection.
///
/// Must be created inside a Tokio runtime; the driver task is spawned
/// immediately and sits idle until [`Client::connect`] is called.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    cmd: mpsc::UnboundedSender<Command>,
}

impl Client {
    /// Create a connection from a validated configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_pool_index(config, None)
    }

    pub(crate) fn with_pool_index(config: ClientConfig, index: Option<usize>) -> Result<Self> {
        config.validate()?;
        let queue = Arc::new(WriteQueue::new(config.max_queued_requests));
        let shared = Arc::new(Shared::new(Arc::clone(&queue), index));
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = driver::Driver::new(config, Arc::clone(&shared), rx);
        tokio::spawn(driver.run());
        Ok(Self { shared, cmd: tx })
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd.send(cmd).map_err(|_| Error::Closed)
    }

    /// Start a connect cycle. The outcome arrives on the Connect event.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Close the connection. Pending writes drain first; the Close event
    /// fires with `CloseReason::Requested` once the socket is down.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Disconnect (if connected) and immediately start a new connect cycle.
    pub fn reconnect(&self) -> Result<()> {
        self.send(Command::Reconnect)
    }

    /// Destroy the connection: pending writes complete with an error,
    /// timers die, the driver task exits.
    pub fn destroy(&self) -> Result<()> {
        self.send(Command::Destroy)
    }

    /// Register the handler for one event kind, replacing any previous one.
    pub fn on(&self, kind: EventKind, handler: impl FnMut(Event) + Send + 'static) -> Result<()> {
        self.send(Command::SetHandler(kind, Box::new(handler)))
    }

    /// Remove the handler for one event kind.
    pub fn clear(&self, kind: EventKind) -> Result<()> {
        self.send(Command::ClearHandler(kind))
    }

    /// Install or remove the receive transform applied before framing.
    pub fn set_read_transform(&self, transform: Option<TransformFn>) -> Result<()> {
        self.send(Command::SetTransform(transform))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SocketState {
        self.shared.state()
    }

    /// Whether the connection is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Bytes currently sitting in the write queue.
    #[must_use]
    pub fn queued_bytes(&self) -> u64 {
        self.shared.queue.queued_bytes()
    }

    /// Total bytes ever accepted for writing over this connection's life.
    #[must_use]
    pub fn total_bytes_ever_queued(&self) -> u64 {
        self.shared.queue.total_bytes_ever_queued()
    }

    /// Traffic counters and windowed rates.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Index assigned by the owning pool, if any.
    #[must_use]
    pub fn pool_index(&self) -> Option<usize> {
        self.shared.pool_index
    }

    /// The peer's end-entity certificate (DER) while a TLS connection is
    /// established; `None` on plain connections or when disconnected.
    #[must_use]
    pub fn peer_certificate(&self) -> Option<rustls::pki_types::CertificateDer<'static>> {
        self.shared.peer_cert()
    }

    fn submit(
        &self,
        data: Bytes,
        on_complete: Option<crate::aio::CompleteFn>,
        on_destroy: Option<crate::aio::DestroyFn>,
    ) -> Result<WriteHandle> {
        if self.shared.is_destroyed() {
            return Err(Error::Closed);
        }
        let id = self.shared.queue.submit(data, on_complete, on_destroy)?;
        // Wake the driver so a connected idle socket drains in this turn.
        self.shared.write_wake.notify_one();
        Ok(WriteHandle::new(id, Arc::downgrade(&self.shared.queue)))
    }

    /// Queue raw bytes for writing.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<WriteHandle> {
        self.submit(data.into(), None, None)
    }

    /// Queue bytes with a completion callback fired when the request fully
    /// drains (or with an error when the connection tears down).
    pub fn write_with(
        &self,
        data: impl Into<Bytes>,
        on_complete: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<WriteHandle> {
        self.submit(data.into(), Some(Box::new(on_complete)), None)
    }

    /// Queue owned bytes; `on_destroy` runs exactly once when the request
    /// is destroyed, on every path.
    pub fn write_owned(
        &self,
        data: Vec<u8>,
        on_destroy: impl FnOnce() + Send + 'static,
    ) -> Result<WriteHandle> {
        self.submit(Bytes::from(data), None, Some(Box::new(on_destroy)))
    }

    /// Queue the contents of a buffer; the engine takes ownership.
    pub fn write_buf(&self, buf: BytesMut) -> Result<WriteHandle> {
        self.submit(buf.freeze(), None, None)
    }

    /// Queue a formatted string.
    pub fn write_fmt(&self, args: fmt::Arguments<'_>) -> Result<WriteHandle> {
        self.submit(Bytes::from(fmt::format(args).into_bytes()), None, None)
    }

    /// Queue a vector of segments written back-to-back as one logical
    /// message.
    pub fn write_vectored(&self, segments: &[Bytes]) -> Result<WriteHandle> {
        let total: usize = segments.iter().map(Bytes::len).sum();
        let mut joined = BytesMut::with_capacity(total);
        for segment in segments {
            joined.extend_from_slice(segment);
        }
        self.submit(joined.freeze(), None, None)
    }

    /// Force the shared state mirror, for tests that exercise selection
    /// logic without real sockets.
    #[cfg(test)]
    pub(crate) fn force_state(&self, state: SocketState) {
        self.shared.set_state(state);
    }

    /// Empty the queue without completing anything, for selection tests.
    #[cfg(test)]
    pub(crate) fn testing_drain_queue(&self) {
        while self.shared.queue.take_head().is_some() {}
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("queued_bytes", &self.queued_bytes())
            .field("pool_index", &self.pool_index())
            .finish()
    }
}
