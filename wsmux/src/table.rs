//! Fixed-capacity connection table.
//!
//! Slots are allocated once and addressed by index for the table's lifetime. A slot
//! owns its transport only while it is in use: the transport and the connection phase
//! travel together in one `Option`, so "connected without a transport" cannot be
//! expressed.

use crate::channel::Channel;
use crate::handshake::RequestState;
use crate::transport::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    NotConnected,
    AwaitingHeaders,
    Connected,
}

/// Phase of an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    AwaitingHeaders,
    Connected,
}

pub(crate) struct Link<S> {
    pub stream: S,
    pub phase: Phase,
}

/// Per-connection record.
pub struct Slot<S> {
    index: usize,
    pub(crate) link: Option<Link<S>>,
    pub(crate) request: RequestState,
    pub(crate) channel: Channel,
    pub(crate) accepted_at: u64,
    pub(crate) last_activity: u64,
}

impl<S: Stream> Slot<S> {
    fn new(index: usize) -> Self {
        Self {
            index,
            link: None,
            request: RequestState::default(),
            channel: Channel::default(),
            accepted_at: 0,
            last_activity: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> SlotStatus {
        match self.link.as_ref().map(|l| l.phase) {
            None => SlotStatus::NotConnected,
            Some(Phase::AwaitingHeaders) => SlotStatus::AwaitingHeaders,
            Some(Phase::Connected) => SlotStatus::Connected,
        }
    }

    pub fn is_free(&self) -> bool {
        self.link.is_none()
    }

    /// Request path of the current session (empty before the request line).
    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// Sub-protocol the client asked for.
    pub fn protocol(&self) -> &str {
        &self.request.protocol
    }

    /// Extensions the client offered. Recorded, never negotiated.
    pub fn extensions(&self) -> &str {
        &self.request.extensions
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.link.as_ref().and_then(|l| l.stream.peer_addr())
    }

    fn bind(&mut self, stream: S, now: u64) {
        self.clear_session();
        self.link = Some(Link { stream, phase: Phase::AwaitingHeaders });
        self.accepted_at = now;
        self.last_activity = now;
    }

    /// Close and drop the transport and wipe all session state.
    ///
    /// Returns whether a session was actually torn down.
    pub(crate) fn release(&mut self) -> bool {
        let Some(mut link) = self.link.take() else {
            return false;
        };
        link.stream.close();
        self.clear_session();
        true
    }

    fn clear_session(&mut self) {
        self.request.reset();
        self.channel.reset();
        self.accepted_at = 0;
        self.last_activity = 0;
    }
}

/// Preallocated arena of slots.
pub struct ConnectionTable<S> {
    slots: Vec<Slot<S>>,
}

impl<S: Stream> ConnectionTable<S> {
    pub fn new(capacity: usize) -> Self {
        Self { slots: (0..capacity).map(Slot::new).collect() }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bind `stream` to the first free slot.
    ///
    /// The stream is handed back when the table is full so the caller can close it.
    pub fn acquire(&mut self, stream: S, now: u64) -> Result<usize, S> {
        match self.slots.iter_mut().find(|s| s.is_free()) {
            Some(slot) => {
                slot.bind(stream, now);
                Ok(slot.index)
            }
            None => Err(stream),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Slot<S>> {
        self.slots.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Slot<S>> {
        self.slots.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot<S>> {
        self.slots.iter()
    }

    pub fn count(&self, status: SlotStatus) -> usize {
        self.slots.iter().filter(|s| s.status() == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;
    use std::rc::Rc;

    /// Stream that only records how often it was closed.
    struct Dummy {
        closes: Rc<Cell<usize>>,
    }

    impl Stream for Dummy {
        fn is_connected(&mut self) -> bool {
            true
        }
        fn bytes_available(&mut self) -> usize {
            0
        }
        fn read_line(&mut self, _terminator: u8) -> Option<Vec<u8>> {
            None
        }
        fn read_available(&mut self, _max: usize) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn write(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn close(&mut self) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    fn dummy(closes: &Rc<Cell<usize>>) -> Dummy {
        Dummy { closes: closes.clone() }
    }

    #[test]
    fn test_capacity_is_fixed() {
        let closes = Rc::new(Cell::new(0));
        let mut table = ConnectionTable::new(2);
        assert_eq!(table.acquire(dummy(&closes), 0).ok(), Some(0));
        assert_eq!(table.acquire(dummy(&closes), 0).ok(), Some(1));
        assert!(table.acquire(dummy(&closes), 0).is_err());
        assert_eq!(table.capacity(), 2);
        assert_eq!(table.count(SlotStatus::AwaitingHeaders), 2);
    }

    #[test]
    fn test_release_closes_exactly_once_and_frees_slot() {
        let closes = Rc::new(Cell::new(0));
        let mut table = ConnectionTable::new(2);
        let _ = table.acquire(dummy(&closes), 0);
        let _ = table.acquire(dummy(&closes), 0);

        let slot = table.get_mut(0).unwrap();
        assert!(slot.release());
        assert!(!slot.release());
        assert_eq!(closes.get(), 1);
        assert_eq!(slot.status(), SlotStatus::NotConnected);

        // the freed slot is the one reused
        assert_eq!(table.acquire(dummy(&closes), 5).ok(), Some(0));
    }

    #[test]
    fn test_session_state_does_not_leak() {
        let closes = Rc::new(Cell::new(0));
        let mut table = ConnectionTable::new(1);
        let _ = table.acquire(dummy(&closes), 10);

        let slot = table.get_mut(0).unwrap();
        slot.request.path = "/old".to_string();
        slot.request.mandatory_seen = 3;
        slot.request.headers_valid = false;
        slot.link.as_mut().unwrap().phase = Phase::Connected;
        assert_eq!(slot.status(), SlotStatus::Connected);
        slot.release();

        let _ = table.acquire(dummy(&closes), 20);
        let slot = table.get(0).unwrap();
        assert_eq!(slot.status(), SlotStatus::AwaitingHeaders);
        assert_eq!(slot.path(), "");
        assert_eq!(slot.request, RequestState::default());
        assert_eq!(slot.accepted_at, 20);
    }
}
