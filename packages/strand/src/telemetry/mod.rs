//! Per-connection traffic statistics with cache-padded atomic counters.
//!
//! Counters are updated by the connection driver on every read and drained
//! write, and sampled on the datarate timer into a previous-window snapshot
//! so owners can read byte rates without locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;

/// Thread-safe per-connection counters, cache padded to avoid false sharing
/// between the driver task and pool-side readers.
#[derive(Debug, Default)]
pub struct ConnStats {
    /// Total bytes written to the socket (or TLS layer).
    pub bytes_sent: CachePadded<AtomicU64>,
    /// Total bytes absorbed from the socket.
    pub bytes_received: CachePadded<AtomicU64>,
    /// Number of drained write requests.
    pub packets_sent: CachePadded<AtomicU64>,
    /// Number of read deliveries to the owner.
    pub packets_received: CachePadded<AtomicU64>,
    /// `bytes_sent` as of the previous sampling tick.
    prev_bytes_sent: CachePadded<AtomicU64>,
    /// `bytes_received` as of the previous sampling tick.
    prev_bytes_received: CachePadded<AtomicU64>,
    /// Send rate over the last sampling window, bytes per second.
    send_rate: CachePadded<AtomicU64>,
    /// Receive rate over the last sampling window, bytes per second.
    recv_rate: CachePadded<AtomicU64>,
}

impl ConnStats {
    pub(crate) fn record_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_sent_packet(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_received_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Roll the sampling window: derive rates from the delta against the
    /// previous tick and store the current totals as the new baseline.
    pub(crate) fn sample(&self, window: Duration) {
        let secs = window.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let sent = self.bytes_sent.load(Ordering::Relaxed);
        let recv = self.bytes_received.load(Ordering::Relaxed);
        let prev_sent = self.prev_bytes_sent.swap(sent, Ordering::Relaxed);
        let prev_recv = self.prev_bytes_received.swap(recv, Ordering::Relaxed);
        let send_rate = ((sent.saturating_sub(prev_sent)) as f64 / secs) as u64;
        let recv_rate = ((recv.saturating_sub(prev_recv)) as f64 / secs) as u64;
        self.send_rate.store(send_rate, Ordering::Relaxed);
        self.recv_rate.store(recv_rate, Ordering::Relaxed);
    }

    /// Zero every counter. Used when a connection is torn down for reuse.
    pub(crate) fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.packets_sent.store(0, Ordering::Relaxed);
        self.packets_received.store(0, Ordering::Relaxed);
        self.prev_bytes_sent.store(0, Ordering::Relaxed);
        self.prev_bytes_received.store(0, Ordering::Relaxed);
        self.send_rate.store(0, Ordering::Relaxed);
        self.recv_rate.store(0, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            send_rate_bps: self.send_rate.load(Ordering::Relaxed),
            recv_rate_bps: self.recv_rate.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a connection's counters and derived rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Bytes per second sent over the last sampling window.
    pub send_rate_bps: u64,
    /// Bytes per second received over the last sampling window.
    pub recv_rate_bps: u64,
}
