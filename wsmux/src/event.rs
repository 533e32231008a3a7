//! Application-facing events and the single-callback dispatcher.

use crate::frame::Opcode;

/// What happened on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Upgrade completed. Payload: request path.
    Connected,
    /// Session ended, whatever the cause. Payload: empty.
    Disconnected,
    Text,
    Binary,
    Ping,
    Pong,
    /// First frame of a fragmented text message.
    FragmentTextStart,
    /// First frame of a fragmented binary message.
    FragmentBinaryStart,
    /// Middle frame of a fragmented message.
    Fragment,
    /// Last frame of a fragmented message.
    FragmentFin,
    /// Protocol violation. Payload: reason text. A `Disconnected` follows.
    Error,
}

/// Data message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    pub fn opcode(self) -> Opcode {
        match self {
            MessageKind::Text => Opcode::Text,
            MessageKind::Binary => Opcode::Binary,
        }
    }

    /// Event fired for a complete message of this kind.
    pub fn event(self) -> EventKind {
        match self {
            MessageKind::Text => EventKind::Text,
            MessageKind::Binary => EventKind::Binary,
        }
    }

    pub(crate) fn fragment_start(self) -> EventKind {
        match self {
            MessageKind::Text => EventKind::FragmentTextStart,
            MessageKind::Binary => EventKind::FragmentBinaryStart,
        }
    }
}

type Handler = Box<dyn FnMut(usize, EventKind, &[u8])>;

/// Holds at most one callback; registering again replaces it.
#[derive(Default)]
pub struct Dispatcher {
    handler: Option<Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<F>(&mut self, handler: F)
    where
        F: FnMut(usize, EventKind, &[u8]) + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    pub fn is_set(&self) -> bool {
        self.handler.is_some()
    }

    /// Deliver one event. Dropped silently when nothing is registered.
    #[inline]
    pub fn emit(&mut self, slot: usize, kind: EventKind, payload: &[u8]) {
        if let Some(handler) = self.handler.as_mut() {
            handler(slot, kind, payload);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("registered", &self.is_set()).finish()
    }
}
