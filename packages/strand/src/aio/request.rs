//! A single queued write request.

use bytes::Bytes;

use crate::error::Error;

/// Completion callback: invoked once when the request fully drains, or with
/// an error when the connection tears down underneath it.
pub type CompleteFn = Box<dyn FnOnce(Result<(), Error>) + Send + 'static>;

/// Destroy callback: invoked exactly once at request destruction, on every
/// exit path, to release resources owned by the submitter.
pub type DestroyFn = Box<dyn FnOnce() + Send + 'static>;

/// Where a request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Sitting in the queue.
    Queued,
    /// Taken by the drain loop.
    InFlight,
    /// Marked cancelled; will be discarded unsent at drain time.
    Cancelled,
}

/// One outbound write unit.
pub struct AioRequest {
    id: u64,
    data: Bytes,
    offset: usize,
    state: RequestState,
    on_complete: Option<CompleteFn>,
    on_destroy: Option<DestroyFn>,
}

impl AioRequest {
    pub(crate) fn new(
        id: u64,
        data: Bytes,
        on_complete: Option<CompleteFn>,
        on_destroy: Option<DestroyFn>,
    ) -> Self {
        Self {
            id,
            data,
            offset: 0,
            state: RequestState::Queued,
            on_complete,
            on_destroy,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> RequestState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RequestState) {
        // Cancellation is sticky: a cancelled request never goes back in
        // flight with callbacks armed.
        if self.state != RequestState::Cancelled {
            self.state = state;
        }
    }

    pub(crate) fn cancel(&mut self) {
        self.state = RequestState::Cancelled;
    }

    /// Bytes not yet handed to the socket or TLS layer.
    pub(crate) fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    pub(crate) fn remaining_len(&self) -> u64 {
        (self.data.len() - self.offset) as u64
    }

    pub(crate) fn advance(&mut self, sent: usize) {
        debug_assert!(self.offset + sent <= self.data.len());
        self.offset = (self.offset + sent).min(self.data.len());
    }

    pub(crate) fn is_done(&self) -> bool {
        self.offset == self.data.len()
    }

    /// Fire the completion callback with success. Suppressed for cancelled
    /// requests and silently idempotent.
    pub(crate) fn complete_ok(&mut self) {
        if self.state == RequestState::Cancelled {
            self.on_complete = None;
            return;
        }
        if let Some(complete) = self.on_complete.take() {
            complete(Ok(()));
        }
    }

    /// Fire the completion callback with an error (queue teardown path).
    /// Suppressed for cancelled requests.
    pub(crate) fn fail(&mut self, err: Error) {
        if self.state == RequestState::Cancelled {
            self.on_complete = None;
            return;
        }
        if let Some(complete) = self.on_complete.take() {
            complete(Err(err));
        }
    }
}

impl Drop for AioRequest {
    fn drop(&mut self) {
        if let Some(destroy) = self.on_destroy.take() {
            destroy();
        }
    }
}

impl std::fmt::Debug for AioRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AioRequest")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("offset", &self.offset)
            .field("state", &self.state)
            .finish()
    }
}
