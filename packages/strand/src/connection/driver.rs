//! The per-connection driver task.
//!
//! One spawned task owns the socket, the TLS session, the read pipeline and
//! the drain side of the write queue. Every state transition happens here,
//! on one cooperative loop: commands from the handle, socket readiness,
//! the enqueue wakeup, and timers all land in the same `select!`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use super::events::{CallbackTable, Event, EventHandler, EventKind};
use super::state::{Shared, SocketState};
use crate::aio::{AioRequest, RequestState};
use crate::config::ClientConfig;
use crate::dns::{self, AddrRing};
use crate::error::{CloseReason, ConnectFailure, Error};
use crate::framing::{ReadPipeline, TransformFn};
use crate::tls::{ShutdownStatus, TlsReadOutcome, TlsSession, TlsStatus};

/// Upper bound on how long a TLS shutdown may sit waiting for readiness
/// before the close is finalized regardless.
const TLS_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 16 * 1024;

/// Instructions sent from the handle to the driver.
pub(crate) enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Destroy,
    SetHandler(EventKind, EventHandler),
    ClearHandler(EventKind),
    SetTransform(Option<TransformFn>),
}

/// Whether the driver keeps running after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Destroy,
}

/// How a connect cycle ended.
enum CycleOutcome {
    /// Socket (and TLS session, when configured) ready for traffic.
    Established(TcpStream, Option<TlsSession>),
    /// The cycle failed; carries the Connect event's failure code.
    Failed(ConnectFailure),
    /// An owner command arrived mid-cycle and aborted it. `None` means the
    /// command channel closed (every handle dropped).
    Interrupted(Option<Command>),
}

/// Result of one write attempt against the head request.
enum WriteOutcome {
    /// Fully handed to the kernel or TLS layer.
    Consumed,
    /// Backpressure; the request went back to the head of the queue.
    Blocked,
    /// Fatal; close with this reason.
    Fatal(CloseReason),
}

pub(crate) struct Driver {
    config: ClientConfig,
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<Command>,
    callbacks: CallbackTable,
    pipeline: ReadPipeline,
    ring: AddrRing,
    rustls_config: Option<Arc<rustls::ClientConfig>>,
    stream: Option<TcpStream>,
    tls: Option<TlsSession>,
    rate_interval: Option<Interval>,
    reconnect_at: Option<Instant>,
    last_read: Instant,
    write_stalled_since: Option<Instant>,
    pending_write: bool,
    close_requested: bool,
}

impl Driver {
    pub(crate) fn new(
        config: ClientConfig,
        shared: Arc<Shared>,
        rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let pipeline = ReadPipeline::new(config.framing.clone());
        Self {
            config,
            shared,
            rx,
            callbacks: CallbackTable::default(),
            pipeline,
            ring: AddrRing::default(),
            rustls_config: None,
            stream: None,
            tls: None,
            rate_interval: None,
            reconnect_at: None,
            last_read: Instant::now(),
            write_stalled_since: None,
            pending_write: false,
            close_requested: false,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let flow = if self.stream.is_some() {
                self.connected_turn().await
            } else {
                self.idle_turn().await
            };
            if flow == Flow::Destroy {
                break;
            }
        }
        self.teardown();
    }

    /// One turn while no socket exists: wait for a command or for the
    /// reconnect timer.
    async fn idle_turn(&mut self) -> Flow {
        if let Some(at) = self.reconnect_at {
            tokio::select! {
                cmd = self.rx.recv() => self.handle_command(cmd).await,
                _ = time::sleep_until(at) => {
                    self.reconnect_at = None;
                    tracing::debug!("reconnect timer fired");
                    self.start_connect().await
                }
            }
        } else {
            let cmd = self.rx.recv().await;
            self.handle_command(cmd).await
        }
    }

    /// One turn while connected: drain pending writes, then wait for
    /// whichever of readiness, command, wakeup or timer fires first.
    async fn connected_turn(&mut self) -> Flow {
        if self.pending_write || self.close_requested || !self.shared.queue.is_empty() {
            if let Some(reason) = self.drain_writes() {
                return self.close(reason).await;
            }
        }
        if self.stream.is_none() {
            return Flow::Continue;
        }

        let interest = if self.pending_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let read_deadline = (self.config.read_timeout_ms > 0)
            .then(|| self.last_read + Duration::from_millis(self.config.read_timeout_ms));
        let write_deadline = match (self.config.write_timeout_ms, self.write_stalled_since) {
            (ms, Some(since)) if ms > 0 => Some(since + Duration::from_millis(ms)),
            _ => None,
        };

        enum Turn {
            Cmd(Option<Command>),
            Wake,
            Readiness(std::io::Result<Ready>),
            RateTick,
            ReadTimeout,
            WriteTimeout,
        }

        let turn = {
            let stream = match self.stream.as_ref() {
                Some(stream) => stream,
                None => return Flow::Continue,
            };
            tokio::select! {
                cmd = self.rx.recv() => Turn::Cmd(cmd),
                _ = self.shared.write_wake.notified() => Turn::Wake,
                ready = stream.ready(interest) => Turn::Readiness(ready),
                _ = tick_opt(self.rate_interval.as_mut()) => Turn::RateTick,
                _ = sleep_opt(read_deadline) => Turn::ReadTimeout,
                _ = sleep_opt(write_deadline) => Turn::WriteTimeout,
            }
        };

        match turn {
            Turn::Cmd(cmd) => self.handle_command(cmd).await,
            // The loop re-drains at the top of the next turn.
            Turn::Wake => Flow::Continue,
            Turn::Readiness(Err(e)) => {
                tracing::debug!(error = %e, "readiness poll failed");
                self.close(CloseReason::Error).await
            }
            Turn::Readiness(Ok(ready)) => {
                if ready.is_readable() || ready.is_read_closed() {
                    if let Some(reason) = self.handle_readable() {
                        return self.close(reason).await;
                    }
                }
                if ready.is_writable() && (self.pending_write || self.close_requested) {
                    if let Some(reason) = self.drain_writes() {
                        return self.close(reason).await;
                    }
                }
                Flow::Continue
            }
            Turn::RateTick => {
                self.shared
                    .stats
                    .sample(Duration::from_millis(self.config.datarate_sample_ms));
                Flow::Continue
            }
            Turn::ReadTimeout => {
                tracing::debug!("read idle timeout expired");
                self.close(CloseReason::Timeout).await
            }
            Turn::WriteTimeout => {
                tracing::debug!("write stall timeout expired");
                self.close(CloseReason::Timeout).await
            }
        }
    }

    async fn handle_command(&mut self, cmd: Option<Command>) -> Flow {
        let Some(cmd) = cmd else {
            // Every handle dropped: the connection is being destroyed.
            return Flow::Destroy;
        };
        match cmd {
            Command::Connect => {
                if self.stream.is_some() {
                    tracing::debug!("connect ignored, already connected");
                    return Flow::Continue;
                }
                self.reconnect_at = None;
                self.start_connect().await
            }
            Command::Disconnect => {
                self.reconnect_at = None;
                if self.stream.is_none() {
                    return Flow::Continue;
                }
                if self.shared.queue.is_empty() && !self.pending_write {
                    self.close(CloseReason::Requested).await
                } else {
                    // Finish the drain first; the close finalizes when the
                    // queue empties.
                    tracing::debug!("close deferred until write queue drains");
                    self.close_requested = true;
                    self.pending_write = true;
                    Flow::Continue
                }
            }
            Command::Reconnect => {
                if self.stream.is_some() {
                    if self.close(CloseReason::Requested).await == Flow::Destroy {
                        return Flow::Destroy;
                    }
                }
                self.reconnect_at = None;
                self.start_connect().await
            }
            Command::Destroy => Flow::Destroy,
            Command::SetHandler(kind, handler) => {
                self.callbacks.set(kind, handler);
                Flow::Continue
            }
            Command::ClearHandler(kind) => {
                self.callbacks.clear(kind);
                Flow::Continue
            }
            Command::SetTransform(transform) => {
                self.pipeline.set_transform(transform);
                Flow::Continue
            }
        }
    }

    /// Run one full connect cycle and dispatch the Connect event.
    async fn start_connect(&mut self) -> Flow {
        loop {
            self.shared.stats.reset();
            self.shared.set_state(SocketState::Connecting);
            tracing::debug!(host = %self.config.host, port = self.config.port, "connecting");
            match self.connect_cycle().await {
                CycleOutcome::Established(stream, tls) => {
                    self.stream = Some(stream);
                    self.tls = tls;
                    self.shared.set_peer_cert(
                        self.tls
                            .as_ref()
                            .and_then(|tls| tls.peer_certificate().cloned()),
                    );
                    self.shared.set_state(SocketState::Connected);
                    self.last_read = Instant::now();
                    if self.config.datarate_sample_ms > 0 {
                        let period = Duration::from_millis(self.config.datarate_sample_ms);
                        let mut interval = time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        self.rate_interval = Some(interval);
                    }
                    self.pending_write = !self.shared.queue.is_empty();
                    tracing::debug!("connected");
                    self.callbacks.dispatch(Event::Connect(Ok(())));
                    return Flow::Continue;
                }
                CycleOutcome::Failed(failure) => {
                    self.stream = None;
                    self.tls = None;
                    self.shared.set_state(SocketState::ConnectFailed(failure));
                    tracing::debug!(?failure, "connect failed");
                    self.callbacks.dispatch(Event::Connect(Err(failure)));
                    if self.config.reconnect.destroy_after_connect_fail {
                        return Flow::Destroy;
                    }
                    let cause = match failure {
                        ConnectFailure::Timeout => CloseReason::Timeout,
                        _ => CloseReason::Error,
                    };
                    if let Some(delay) = self.config.reconnect.delay_for(cause) {
                        if self.config.reconnect.balance_across_resolved_ips {
                            self.ring.advance();
                        }
                        tracing::debug!(?delay, "reconnect scheduled after failure");
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    return Flow::Continue;
                }
                CycleOutcome::Interrupted(cmd) => {
                    // Owner-initiated abort: no Connect event, the attempt
                    // simply never happened as far as events go.
                    self.shared.set_state(SocketState::Disconnected);
                    match cmd {
                        Some(Command::Reconnect) => {
                            tracing::debug!("connect cycle restarted by reconnect");
                            continue;
                        }
                        Some(Command::Disconnect) => {
                            tracing::debug!("connect cycle aborted by disconnect");
                            self.reconnect_at = None;
                            return Flow::Continue;
                        }
                        _ => {
                            tracing::debug!("connect cycle aborted, destroying");
                            return Flow::Destroy;
                        }
                    }
                }
            }
        }
    }

    /// One connect cycle: resolve, connect, handshake. The whole cycle runs
    /// under one `connect_timeout` deadline, and every wait also listens on
    /// the command channel so the owner can abort from any point.
    async fn connect_cycle(&mut self) -> CycleOutcome {
        let deadline = Instant::now() + self.config.connect_timeout();

        let ip = match time::timeout_at(deadline, self.pick_addr()).await {
            Ok(Ok(ip)) => ip,
            Ok(Err(failure)) => return CycleOutcome::Failed(failure),
            Err(_) => {
                tracing::debug!(host = %self.config.host, "resolution timed out");
                return CycleOutcome::Failed(ConnectFailure::Timeout);
            }
        };
        let addr = SocketAddr::new(ip, self.config.port);
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        };
        let socket = match socket {
            Ok(socket) => socket,
            Err(e) => {
                tracing::debug!(error = %e, "socket creation failed");
                return CycleOutcome::Failed(ConnectFailure::Unknown);
            }
        };
        if let Some(src) = self.config.source_address {
            if let Err(e) = socket.bind(SocketAddr::new(src, 0)) {
                tracing::debug!(error = %e, "source address bind failed");
                return CycleOutcome::Failed(ConnectFailure::Unknown);
            }
        }
        let connect_fut = time::timeout_at(deadline, socket.connect(addr));
        tokio::pin!(connect_fut);
        let stream = loop {
            tokio::select! {
                connected = &mut connect_fut => match connected {
                    Ok(Ok(stream)) => break stream,
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, %addr, "connect failed");
                        return CycleOutcome::Failed(ConnectFailure::from_io(&e));
                    }
                    Err(_) => {
                        tracing::debug!(%addr, "connect timed out");
                        return CycleOutcome::Failed(ConnectFailure::Timeout);
                    }
                },
                cmd = self.rx.recv() => {
                    if let Some(interrupt) = self.absorb_cycle_command(cmd) {
                        return interrupt;
                    }
                }
            }
        };
        let _ = stream.set_nodelay(true);

        let tls = match &self.config.tls {
            None => None,
            Some(tls_config) => {
                self.shared.set_state(SocketState::TlsHandshake);
                let config = match &self.rustls_config {
                    Some(config) => Arc::clone(config),
                    None => match crate::tls::client_config(tls_config) {
                        Ok(config) => {
                            self.rustls_config = Some(Arc::clone(&config));
                            config
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "tls context construction failed");
                            return CycleOutcome::Failed(ConnectFailure::TlsContext);
                        }
                    },
                };
                let mut session = match TlsSession::new(config, self.config.sni()) {
                    Ok(session) => session,
                    Err(_) => return CycleOutcome::Failed(ConnectFailure::TlsContext),
                };
                loop {
                    let interest = match session.handshake_step(&stream) {
                        Ok(TlsStatus::Done) => break,
                        Ok(TlsStatus::WantRead) => Interest::READABLE,
                        Ok(TlsStatus::WantWrite) => Interest::WRITABLE,
                        Err(Error::Io(e)) => {
                            tracing::debug!(error = %e, "handshake i/o failed");
                            return CycleOutcome::Failed(ConnectFailure::TlsHandshake);
                        }
                        Err(_) => return CycleOutcome::Failed(ConnectFailure::TlsHandshake),
                    };
                    tokio::select! {
                        ready = time::timeout_at(deadline, stream.ready(interest)) => {
                            match ready {
                                Ok(Ok(_)) => {}
                                Ok(Err(_)) => {
                                    return CycleOutcome::Failed(ConnectFailure::Unknown);
                                }
                                Err(_) => {
                                    // A peer that accepted TCP but never
                                    // handshakes must not park the driver.
                                    tracing::debug!("tls handshake timed out");
                                    return CycleOutcome::Failed(ConnectFailure::Timeout);
                                }
                            }
                        }
                        cmd = self.rx.recv() => {
                            if let Some(interrupt) = self.absorb_cycle_command(cmd) {
                                return interrupt;
                            }
                        }
                    }
                }
                tracing::debug!("tls handshake complete");
                Some(session)
            }
        };
        CycleOutcome::Established(stream, tls)
    }

    /// Handle a command that arrived mid-cycle. Handler and transform
    /// updates apply in place (`None`: keep going); lifecycle commands
    /// abort the cycle (`Some`).
    fn absorb_cycle_command(&mut self, cmd: Option<Command>) -> Option<CycleOutcome> {
        match cmd {
            Some(Command::SetHandler(kind, handler)) => {
                self.callbacks.set(kind, handler);
                None
            }
            Some(Command::ClearHandler(kind)) => {
                self.callbacks.clear(kind);
                None
            }
            Some(Command::SetTransform(transform)) => {
                self.pipeline.set_transform(transform);
                None
            }
            // Already connecting; nothing to start.
            Some(Command::Connect) => None,
            other => Some(CycleOutcome::Interrupted(other)),
        }
    }

    async fn pick_addr(&mut self) -> Result<std::net::IpAddr, ConnectFailure> {
        if let Ok(ip) = self.config.host.parse() {
            return Ok(ip);
        }
        if self.ring.is_empty() {
            let addrs = dns::resolve(&self.config.host).await.map_err(|e| {
                tracing::debug!(error = %e, host = %self.config.host, "resolution failed");
                ConnectFailure::Dns
            })?;
            self.ring.fill(addrs);
        }
        self.ring.current().ok_or(ConnectFailure::Dns)
    }

    /// Drain the write queue head-first until backpressure or empty.
    /// Returns a close reason when draining surfaced a fatal condition or a
    /// deferred close is ready to finalize.
    fn drain_writes(&mut self) -> Option<CloseReason> {
        loop {
            self.stream.as_ref()?;
            let Some(mut req) = self.shared.queue.take_head() else {
                // Queue empty: flush any TLS records still buffered.
                if let (Some(tls), Some(stream)) = (self.tls.as_mut(), self.stream.as_ref()) {
                    match tls.flush(stream) {
                        Ok(TlsStatus::WantWrite) => self.pending_write = true,
                        Ok(_) => self.pending_write = false,
                        Err(_) => return Some(CloseReason::Error),
                    }
                } else {
                    self.pending_write = false;
                }
                if !self.pending_write {
                    self.write_stalled_since = None;
                    if self.close_requested {
                        return Some(CloseReason::Requested);
                    }
                }
                return None;
            };
            if req.state() == RequestState::Cancelled {
                tracing::trace!(id = req.id(), "discarding cancelled write request");
                continue;
            }
            let outcome = if self.tls.is_some() {
                self.tls_write(&mut req)
            } else {
                self.plain_write(&mut req)
            };
            match outcome {
                WriteOutcome::Consumed => {
                    if !self.close_requested {
                        req.complete_ok();
                    }
                    self.shared.stats.record_sent_packet();
                    self.write_stalled_since = None;
                }
                WriteOutcome::Blocked => {
                    self.shared.queue.requeue_head(req);
                    self.pending_write = true;
                    if self.write_stalled_since.is_none() {
                        self.write_stalled_since = Some(Instant::now());
                    }
                    return None;
                }
                WriteOutcome::Fatal(reason) => {
                    self.shared.queue.requeue_head(req);
                    return Some(reason);
                }
            }
        }
    }

    fn plain_write(&mut self, req: &mut AioRequest) -> WriteOutcome {
        let Some(stream) = self.stream.as_ref() else {
            return WriteOutcome::Blocked;
        };
        loop {
            match stream.try_write(req.remaining()) {
                Ok(n) => {
                    req.advance(n);
                    self.shared.stats.record_sent(n as u64);
                    if req.is_done() {
                        return WriteOutcome::Consumed;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return WriteOutcome::Blocked;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "write failed");
                    return WriteOutcome::Fatal(CloseReason::Error);
                }
            }
        }
    }

    fn tls_write(&mut self, req: &mut AioRequest) -> WriteOutcome {
        loop {
            let (tls, stream) = match (self.tls.as_mut(), self.stream.as_ref()) {
                (Some(tls), Some(stream)) => (tls, stream),
                _ => return WriteOutcome::Blocked,
            };
            let accepted = tls.queue_plaintext(req.remaining());
            if accepted == 0 {
                // TLS buffer full: flush what we can, head-requeue and wait
                // for write readiness.
                if tls.flush(stream).is_err() {
                    return WriteOutcome::Fatal(CloseReason::Error);
                }
                return WriteOutcome::Blocked;
            }
            req.advance(accepted);
            self.shared.stats.record_sent(accepted as u64);
            match tls.flush(stream) {
                Ok(TlsStatus::WantWrite) => self.pending_write = true,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "tls write failed");
                    return WriteOutcome::Fatal(CloseReason::Error);
                }
            }
            if req.is_done() {
                return WriteOutcome::Consumed;
            }
        }
    }

    /// Absorb everything currently readable. Returns a close reason on EOF
    /// or a fatal read error.
    fn handle_readable(&mut self) -> Option<CloseReason> {
        if self.tls.is_some() {
            self.handle_readable_tls()
        } else {
            self.handle_readable_plain()
        }
    }

    fn handle_readable_plain(&mut self) -> Option<CloseReason> {
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            let Some(stream) = self.stream.as_ref() else {
                return None;
            };
            match stream.try_read(&mut scratch) {
                Ok(0) => {
                    tracing::debug!("peer closed the connection");
                    return Some(CloseReason::Eof);
                }
                Ok(n) => {
                    self.shared.stats.record_received(n as u64);
                    self.last_read = Instant::now();
                    if let Some(delivery) = self.pipeline.absorb(&scratch[..n]) {
                        self.dispatch_read(delivery);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    tracing::debug!(error = %e, "read failed");
                    return Some(CloseReason::Error);
                }
            }
        }
    }

    fn handle_readable_tls(&mut self) -> Option<CloseReason> {
        loop {
            let outcome = {
                let (tls, stream) = match (self.tls.as_mut(), self.stream.as_ref()) {
                    (Some(tls), Some(stream)) => (tls, stream),
                    _ => return None,
                };
                tls.pump_read(stream)
            };
            match outcome {
                Ok(TlsReadOutcome::Data(bytes)) => {
                    self.shared.stats.record_received(bytes.len() as u64);
                    self.last_read = Instant::now();
                    if let Some(delivery) = self.pipeline.absorb(&bytes) {
                        self.dispatch_read(delivery);
                    }
                }
                Ok(TlsReadOutcome::WantRead) => return None,
                Ok(TlsReadOutcome::Closed) => {
                    tracing::debug!("peer closed the tls connection");
                    return Some(CloseReason::Eof);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "tls read fatal");
                    return Some(CloseReason::Error);
                }
            }
        }
    }

    fn dispatch_read(&mut self, bytes: Bytes) {
        self.shared.stats.record_received_packet();
        self.callbacks.dispatch(Event::Read(bytes));
    }

    /// Close the connection: TLS shutdown if active, then finalize and
    /// apply the resolution policy.
    async fn close(&mut self, reason: CloseReason) -> Flow {
        self.shared.set_state(SocketState::Disconnecting);
        if self.tls.is_some() {
            if let Err(_elapsed) =
                time::timeout(TLS_SHUTDOWN_DEADLINE, self.tls_shutdown_loop()).await
            {
                tracing::debug!("tls shutdown deadline hit, finalizing");
            }
        }
        self.finalize_close(reason)
    }

    async fn tls_shutdown_loop(&mut self) {
        if let Some(tls) = self.tls.as_mut() {
            tls.begin_shutdown();
        }
        loop {
            let (tls, stream) = match (self.tls.as_mut(), self.stream.as_ref()) {
                (Some(tls), Some(stream)) => (tls, stream),
                _ => return,
            };
            match tls.shutdown_step(stream) {
                ShutdownStatus::Done => return,
                ShutdownStatus::WantRead => {
                    if stream.ready(Interest::READABLE).await.is_err() {
                        return;
                    }
                }
                ShutdownStatus::WantWrite => {
                    if stream.ready(Interest::WRITABLE).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Tear socket state down, fire the Close event once, and arm the
    /// reconnect timer when the policy asks for it.
    fn finalize_close(&mut self, reason: CloseReason) -> Flow {
        self.stream = None;
        self.tls = None;
        self.shared.set_peer_cert(None);
        self.pipeline.clear();
        self.rate_interval = None;
        self.pending_write = false;
        self.write_stalled_since = None;
        self.close_requested = false;
        self.shared.queue.fail_all();
        self.shared.set_state(SocketState::Disconnected);
        tracing::debug!(?reason, "connection closed");
        self.callbacks.dispatch(Event::Close(reason));
        if let Some(delay) = self.config.reconnect.delay_for(reason) {
            if self.config.reconnect.balance_across_resolved_ips {
                self.ring.advance();
            }
            tracing::debug!(?delay, "reconnect scheduled");
            self.reconnect_at = Some(Instant::now() + delay);
        }
        Flow::Continue
    }

    fn teardown(&mut self) {
        self.shared.mark_destroyed();
        self.shared.queue.fail_all();
        self.callbacks.clear_all();
        self.stream = None;
        self.tls = None;
        self.shared.set_peer_cert(None);
        self.pipeline.clear();
        self.rate_interval = None;
        self.reconnect_at = None;
        self.shared.set_state(SocketState::Disconnected);
        tracing::debug!("connection destroyed");
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
