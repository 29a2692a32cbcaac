//! Owner-facing events and the per-connection callback table.

use bytes::Bytes;

use crate::error::{CloseReason, ConnectFailure};

/// The three event kinds a connection dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connect,
    Read,
    Close,
}

/// One event delivered to an owner callback.
#[derive(Debug)]
pub enum Event {
    /// A connect cycle finished, successfully or not.
    Connect(Result<(), ConnectFailure>),
    /// Bytes delivered by the read pipeline (one frame, or one raw chunk).
    Read(Bytes),
    /// The connection went down; carries the reason.
    Close(CloseReason),
}

impl Event {
    pub(crate) fn kind(&self) -> EventKind {
        match self {
            Event::Connect(_) => EventKind::Connect,
            Event::Read(_) => EventKind::Read,
            Event::Close(_) => EventKind::Close,
        }
    }
}

/// Owner callback for one event kind.
pub type EventHandler = Box<dyn FnMut(Event) + Send + 'static>;

/// One optional slot per event kind.
#[derive(Default)]
pub(crate) struct CallbackTable {
    connect: Option<EventHandler>,
    read: Option<EventHandler>,
    close: Option<EventHandler>,
}

impl CallbackTable {
    fn slot(&mut self, kind: EventKind) -> &mut Option<EventHandler> {
        match kind {
            EventKind::Connect => &mut self.connect,
            EventKind::Read => &mut self.read,
            EventKind::Close => &mut self.close,
        }
    }

    pub(crate) fn set(&mut self, kind: EventKind, handler: EventHandler) {
        *self.slot(kind) = Some(handler);
    }

    pub(crate) fn clear(&mut self, kind: EventKind) {
        *self.slot(kind) = None;
    }

    pub(crate) fn clear_all(&mut self) {
        self.connect = None;
        self.read = None;
        self.close = None;
    }

    /// Invoke the handler registered for the event's kind, if any.
    pub(crate) fn dispatch(&mut self, event: Event) {
        let kind = event.kind();
        if let Some(handler) = self.slot(kind).as_mut() {
            handler(event);
        } else {
            tracing::trace!(?kind, "event dropped, no handler registered");
        }
    }
}
