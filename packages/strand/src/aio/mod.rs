//! Asynchronous write requests and the ordered queue that drains them.
//!
//! Every write path, plain or TLS, funnels through one [`WriteQueue`] per
//! connection. Requests drain in FIFO submission order; the only head
//! insertion is the requeue of a partially written request, which preserves
//! order rather than violating it. Producers may submit from any thread;
//! the connection driver drains on the reactor side.

mod queue;
mod request;

pub use queue::WriteQueue;
pub use request::{AioRequest, CompleteFn, DestroyFn, RequestState};

use std::sync::Weak;

/// Handle to a queued write request, returned by every submission call.
///
/// The id is monotonic and never reused, so a stale handle can never cancel
/// a later request that happens to occupy the same slot.
#[derive(Debug, Clone)]
pub struct WriteHandle {
    id: u64,
    queue: Weak<WriteQueue>,
}

impl WriteHandle {
    pub(crate) fn new(id: u64, queue: Weak<WriteQueue>) -> Self {
        Self { id, queue }
    }

    /// The request's queue-unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the request cancelled.
    ///
    /// A cancelled request is discarded at drain time without being sent;
    /// its completion callback is suppressed but its destroy callback still
    /// runs. Returns `false` if the request already drained or the
    /// connection is gone.
    pub fn cancel(&self) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.cancel(self.id),
            None => false,
        }
    }
}
