//! Socket lifecycle states and the lock-free shared view of a connection.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use rustls::pki_types::CertificateDer;
use tokio::sync::Notify;

use crate::aio::WriteQueue;
use crate::error::ConnectFailure;
use crate::telemetry::ConnStats;

/// Where a connection is in its lifecycle.
///
/// One closed set of variants; invalid combinations (say, handshaking while
/// disconnected) are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No socket. The initial state, re-entered after every close.
    Disconnected,
    /// Resolving and connecting.
    Connecting,
    /// TCP is up, the TLS handshake is in flight.
    TlsHandshake,
    /// Established; reads and writes flow.
    Connected,
    /// Close or TLS shutdown in progress.
    Disconnecting,
    /// The last connect cycle failed.
    ConnectFailed(ConnectFailure),
}

const TAG_DISCONNECTED: u8 = 0;
const TAG_CONNECTING: u8 = 1;
const TAG_TLS_HANDSHAKE: u8 = 2;
const TAG_CONNECTED: u8 = 3;
const TAG_DISCONNECTING: u8 = 4;
const TAG_CONNECT_FAILED: u8 = 5;

fn encode_failure(f: ConnectFailure) -> u8 {
    match f {
        ConnectFailure::Timeout => 0,
        ConnectFailure::Refused => 1,
        ConnectFailure::Dns => 2,
        ConnectFailure::TlsContext => 3,
        ConnectFailure::TlsHandshake => 4,
        ConnectFailure::Unknown => 5,
    }
}

fn decode_failure(code: u8) -> ConnectFailure {
    match code {
        0 => ConnectFailure::Timeout,
        1 => ConnectFailure::Refused,
        2 => ConnectFailure::Dns,
        3 => ConnectFailure::TlsContext,
        4 => ConnectFailure::TlsHandshake,
        _ => ConnectFailure::Unknown,
    }
}

/// State shared between the owner-facing handle, the pool, and the driver
/// task. Everything here is readable without crossing the command channel.
pub(crate) struct Shared {
    state_tag: AtomicU8,
    failure_code: AtomicU8,
    destroyed: AtomicBool,
    /// Wakes the driver when a write is enqueued (the sync-drain fast path).
    pub(crate) write_wake: Notify,
    pub(crate) queue: Arc<WriteQueue>,
    pub(crate) stats: Arc<ConnStats>,
    pub(crate) pool_index: Option<usize>,
    /// The peer's end-entity certificate while a TLS connection is up.
    peer_cert: Mutex<Option<CertificateDer<'static>>>,
}

impl Shared {
    pub(crate) fn new(queue: Arc<WriteQueue>, pool_index: Option<usize>) -> Self {
        Self {
            state_tag: AtomicU8::new(TAG_DISCONNECTED),
            failure_code: AtomicU8::new(0),
            destroyed: AtomicBool::new(false),
            write_wake: Notify::new(),
            queue,
            stats: Arc::new(ConnStats::default()),
            pool_index,
            peer_cert: Mutex::new(None),
        }
    }

    pub(crate) fn set_peer_cert(&self, cert: Option<CertificateDer<'static>>) {
        *self.peer_cert.lock().unwrap_or_else(|e| e.into_inner()) = cert;
    }

    pub(crate) fn peer_cert(&self) -> Option<CertificateDer<'static>> {
        self.peer_cert
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_state(&self, state: SocketState) {
        let tag = match state {
            SocketState::Disconnected => TAG_DISCONNECTED,
            SocketState::Connecting => TAG_CONNECTING,
            SocketState::TlsHandshake => TAG_TLS_HANDSHAKE,
            SocketState::Connected => TAG_CONNECTED,
            SocketState::Disconnecting => TAG_DISCONNECTING,
            SocketState::ConnectFailed(f) => {
                self.failure_code.store(encode_failure(f), Ordering::Relaxed);
                TAG_CONNECT_FAILED
            }
        };
        self.state_tag.store(tag, Ordering::Release);
    }

    pub(crate) fn state(&self) -> SocketState {
        match self.state_tag.load(Ordering::Acquire) {
            TAG_CONNECTING => SocketState::Connecting,
            TAG_TLS_HANDSHAKE => SocketState::TlsHandshake,
            TAG_CONNECTED => SocketState::Connected,
            TAG_DISCONNECTING => SocketState::Disconnecting,
            TAG_CONNECT_FAILED => {
                SocketState::ConnectFailed(decode_failure(self.failure_code.load(Ordering::Relaxed)))
            }
            _ => SocketState::Disconnected,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state_tag.load(Ordering::Acquire) == TAG_CONNECTED
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
