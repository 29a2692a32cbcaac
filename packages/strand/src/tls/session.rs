//! Per-connection TLS handshake and shutdown sub-state-machines.
//!
//! rustls is driven sans-IO against the non-blocking socket so every step
//! surfaces as either progress or a want-read/want-write signal the
//! connection driver turns into a readiness re-arm. The handshake is bounded
//! at [`HANDSHAKE_ATTEMPT_CEILING`] steps, the shutdown at
//! [`SHUTDOWN_ATTEMPT_CEILING`]; both ceilings count attempts, not wall
//! clock.

use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConnection;
use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Handshake retry ceiling.
pub const HANDSHAKE_ATTEMPT_CEILING: u32 = 50;
/// Shutdown retry ceiling.
pub const SHUTDOWN_ATTEMPT_CEILING: u32 = 10;

/// Cap on plaintext rustls buffers ahead of the socket.
const TLS_BUFFER_LIMIT: usize = 64 * 1024;

/// Outcome of one handshake or flush step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsStatus {
    /// The operation completed.
    Done,
    /// Re-arm read readiness and call again.
    WantRead,
    /// Re-arm write readiness and call again.
    WantWrite,
}

/// Outcome of one inbound pump.
#[derive(Debug)]
pub enum TlsReadOutcome {
    /// Decrypted plaintext for the read pipeline.
    Data(Bytes),
    /// Nothing available; re-arm read readiness.
    WantRead,
    /// The peer signalled close_notify or raw EOF.
    Closed,
}

/// Outcome of one shutdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Shutdown finished (cleanly or past the ceiling); finalize the close.
    Done,
    /// Re-arm read readiness and call again.
    WantRead,
    /// Re-arm write readiness and call again.
    WantWrite,
}

/// TLS layered over one socket: handshake, record pumps, shutdown.
pub struct TlsSession {
    conn: ClientConnection,
    handshake_attempts: u32,
    shutdown_attempts: u32,
    shutdown_started: bool,
    peer_cert: Option<CertificateDer<'static>>,
}

impl TlsSession {
    /// Create a session for `sni` over the given configuration.
    pub fn new(config: Arc<rustls::ClientConfig>, sni: &str) -> Result<Self> {
        let name = ServerName::try_from(sni.to_string())
            .map_err(|_| Error::TlsContext(format!("invalid SNI hostname {sni:?}")))?;
        let mut conn = ClientConnection::new(config, name)
            .map_err(|e| Error::TlsContext(e.to_string()))?;
        conn.set_buffer_limit(Some(TLS_BUFFER_LIMIT));
        Ok(Self {
            conn,
            handshake_attempts: 0,
            shutdown_attempts: 0,
            shutdown_started: false,
            peer_cert: None,
        })
    }

    /// Drive the handshake one step.
    ///
    /// # Errors
    ///
    /// `Error::TlsHandshake` once the attempt ceiling is exceeded, the peer
    /// hangs up mid-handshake, or rustls reports a handshake failure;
    /// `Error::Io` for socket-level failures.
    pub fn handshake_step(&mut self, stream: &TcpStream) -> Result<TlsStatus> {
        self.handshake_attempts += 1;
        if self.handshake_attempts > HANDSHAKE_ATTEMPT_CEILING {
            tracing::warn!(
                attempts = self.handshake_attempts,
                "tls handshake attempt ceiling exceeded"
            );
            return Err(Error::TlsHandshake);
        }
        let mut sock = SockAdapter(stream);

        // Flush whatever rustls has queued before asking for more input.
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut sock) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(TlsStatus::WantWrite);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        if !self.conn.is_handshaking() {
            self.finish_handshake();
            return Ok(TlsStatus::Done);
        }

        match self.conn.read_tls(&mut sock) {
            Ok(0) => {
                tracing::debug!("peer closed during tls handshake");
                return Err(Error::TlsHandshake);
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(TlsStatus::WantRead);
            }
            Err(e) => return Err(Error::Io(e)),
        }
        if let Err(e) = self.conn.process_new_packets() {
            tracing::debug!(error = %e, "tls handshake failed");
            return Err(Error::TlsHandshake);
        }
        if self.conn.is_handshaking() {
            if self.conn.wants_write() {
                Ok(TlsStatus::WantWrite)
            } else {
                Ok(TlsStatus::WantRead)
            }
        } else {
            // Final flight may still be buffered; the next step flushes it.
            if self.conn.wants_write() {
                return Ok(TlsStatus::WantWrite);
            }
            self.finish_handshake();
            Ok(TlsStatus::Done)
        }
    }

    fn finish_handshake(&mut self) {
        if self.peer_cert.is_none() {
            self.peer_cert = self
                .conn
                .peer_certificates()
                .and_then(|certs| certs.first().cloned());
        }
    }

    /// The peer's end-entity certificate (DER), once established.
    #[must_use]
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.peer_cert.as_ref()
    }

    /// Hand plaintext to rustls for encryption. Returns the number of bytes
    /// accepted; zero means the TLS buffer is full and the caller should
    /// flush and retry (the head-requeue path).
    pub fn queue_plaintext(&mut self, data: &[u8]) -> usize {
        self.conn.writer().write(data).unwrap_or(0)
    }

    /// Push queued TLS records to the socket.
    pub fn flush(&mut self, stream: &TcpStream) -> Result<TlsStatus> {
        let mut sock = SockAdapter(stream);
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut sock) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(TlsStatus::WantWrite);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(TlsStatus::Done)
    }

    /// Pump inbound records and surface decrypted plaintext.
    ///
    /// # Errors
    ///
    /// A rustls protocol error is fatal; the caller flips into the shutdown
    /// sub-machine (the alert rustls queued goes out on the first shutdown
    /// flush).
    pub fn pump_read(&mut self, stream: &TcpStream) -> Result<TlsReadOutcome> {
        let mut sock = SockAdapter(stream);
        let mut saw_eof = false;
        match self.conn.read_tls(&mut sock) {
            Ok(0) => saw_eof = true,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(Error::Io(e)),
        }
        let state = self
            .conn
            .process_new_packets()
            .map_err(|e| Error::Tls(e.to_string()))?;

        let pending = state.plaintext_bytes_to_read();
        if pending > 0 {
            let mut plain = BytesMut::zeroed(pending);
            let mut filled = 0;
            while filled < pending {
                match self.conn.reader().read(&mut plain[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(Error::Io(e)),
                }
            }
            plain.truncate(filled);
            if filled > 0 {
                return Ok(TlsReadOutcome::Data(plain.freeze()));
            }
        }
        if state.peer_has_closed() || saw_eof {
            Ok(TlsReadOutcome::Closed)
        } else {
            Ok(TlsReadOutcome::WantRead)
        }
    }

    /// Enter the shutdown sub-machine; idempotent.
    pub fn begin_shutdown(&mut self) {
        if !self.shutdown_started {
            self.shutdown_started = true;
            self.conn.send_close_notify();
        }
    }

    /// Drive the shutdown one step. Every failure path funnels into `Done`
    /// so the caller always reaches finalize.
    pub fn shutdown_step(&mut self, stream: &TcpStream) -> ShutdownStatus {
        debug_assert!(self.shutdown_started, "shutdown_step before begin_shutdown");
        self.shutdown_attempts += 1;
        if self.shutdown_attempts > SHUTDOWN_ATTEMPT_CEILING {
            tracing::debug!("tls shutdown attempt ceiling exceeded, finalizing");
            return ShutdownStatus::Done;
        }
        let mut sock = SockAdapter(stream);

        while self.conn.wants_write() {
            match self.conn.write_tls(&mut sock) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return ShutdownStatus::WantWrite;
                }
                Err(_) => return ShutdownStatus::Done,
            }
        }
        match self.conn.read_tls(&mut sock) {
            Ok(0) => ShutdownStatus::Done,
            Ok(_) => match self.conn.process_new_packets() {
                Ok(state) if state.peer_has_closed() => ShutdownStatus::Done,
                Ok(_) => ShutdownStatus::WantRead,
                Err(_) => ShutdownStatus::Done,
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ShutdownStatus::WantRead,
            Err(_) => ShutdownStatus::Done,
        }
    }
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("handshaking", &self.conn.is_handshaking())
            .field("handshake_attempts", &self.handshake_attempts)
            .field("shutdown_started", &self.shutdown_started)
            .finish()
    }
}

/// Blocking-trait adapter over the non-blocking tokio socket; `WouldBlock`
/// is the want-read/want-write signal.
struct SockAdapter<'a>(&'a TcpStream);

impl Read for SockAdapter<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for SockAdapter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
