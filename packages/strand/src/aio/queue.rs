//! The per-connection FIFO of pending write requests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use super::request::{AioRequest, CompleteFn, DestroyFn, RequestState};
use crate::error::{Error, Result};

/// Ordered collection of pending writes plus aggregate byte statistics.
///
/// The deque sits behind a mutex because producers may enqueue from worker
/// threads while the connection driver drains; the aggregates are atomics so
/// pool selection can read them without contending for the lock.
pub struct WriteQueue {
    inner: Mutex<VecDeque<AioRequest>>,
    queued_bytes: AtomicU64,
    total_bytes_ever_queued: AtomicU64,
    next_id: AtomicU64,
    capacity: usize,
}

impl WriteQueue {
    /// Create a queue bounded at `capacity` outstanding requests.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            queued_bytes: AtomicU64::new(0),
            total_bytes_ever_queued: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Append a request at the tail.
    ///
    /// # Errors
    ///
    /// `Error::QueueFull` when the queue is at capacity,
    /// `Error::ZeroLengthWrite` for an empty payload (caller contract
    /// violation; asserts in debug builds).
    pub fn submit(
        &self,
        data: Bytes,
        on_complete: Option<CompleteFn>,
        on_destroy: Option<DestroyFn>,
    ) -> Result<u64> {
        debug_assert!(!data.is_empty(), "zero-length write submitted");
        if data.is_empty() {
            return Err(Error::ZeroLengthWrite);
        }
        let len = data.len() as u64;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.len() >= self.capacity {
            return Err(Error::QueueFull);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        inner.push_back(AioRequest::new(id, data, on_complete, on_destroy));
        self.queued_bytes.fetch_add(len, Ordering::Relaxed);
        self.total_bytes_ever_queued.fetch_add(len, Ordering::Relaxed);
        Ok(id)
    }

    /// Take the head request for draining. The request's remaining bytes
    /// leave the aggregate until it is requeued.
    pub(crate) fn take_head(&self) -> Option<AioRequest> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut req = inner.pop_front()?;
        self.queued_bytes
            .fetch_sub(req.remaining_len(), Ordering::Relaxed);
        req.set_state(RequestState::InFlight);
        Some(req)
    }

    /// Put a partially written request back at the head so it retries
    /// before any other queued request. This is the only head insertion.
    pub(crate) fn requeue_head(&self, mut req: AioRequest) {
        self.queued_bytes
            .fetch_add(req.remaining_len(), Ordering::Relaxed);
        req.set_state(RequestState::Queued);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.push_front(req);
    }

    /// Mark a queued request cancelled. Returns `false` when the id is no
    /// longer in the queue.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for req in inner.iter_mut() {
            if req.id() == id {
                req.cancel();
                return true;
            }
        }
        false
    }

    /// Tear the queue down: every pending request gets its completion
    /// callback with an error (unless cancelled), then is destroyed.
    pub(crate) fn fail_all(&self) {
        let drained: Vec<AioRequest> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.drain(..).collect()
        };
        self.queued_bytes.store(0, Ordering::Relaxed);
        for mut req in drained {
            req.fail(Error::Closed);
        }
    }

    /// Sum of remaining bytes across requests currently in the queue.
    #[must_use]
    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    /// Total bytes ever accepted by `submit`, monotone over the queue's life.
    #[must_use]
    pub fn total_bytes_ever_queued(&self) -> u64 {
        self.total_bytes_ever_queued.load(Ordering::Relaxed)
    }

    /// Number of requests currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the queue holds no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("len", &self.len())
            .field("queued_bytes", &self.queued_bytes())
            .field("capacity", &self.capacity)
            .finish()
    }
}
