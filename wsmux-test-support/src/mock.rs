//! In-memory transports.
//!
//! A [`MockStream`] is the engine's end of a pipe; the matching [`MockPeer`] is the
//! test's end. Both share one [`parking_lot::Mutex`]-guarded state, so the test can
//! keep writing and inspecting after the stream has been moved into a server or
//! client.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wsmux::frame::{self, Frame, Opcode};
use wsmux::{Connector, Listener, Stream};

use crate::chaos::ChunkedDelivery;

#[derive(Default)]
struct PipeState {
    /// Peer → engine.
    inbound: VecDeque<u8>,
    /// How much of `inbound` the engine may see. Only grows by chunks when a
    /// [`ChunkedDelivery`] is installed.
    visible: usize,
    /// Engine → peer.
    outbound: Vec<u8>,
    chunking: Option<ChunkedDelivery>,
    peer_hung_up: bool,
    closed: bool,
    close_calls: usize,
    fail_writes: bool,
    peer_addr: Option<SocketAddr>,
}

impl PipeState {
    fn release(&mut self) {
        self.visible = match self.chunking.as_mut() {
            Some(chunks) => (self.visible + chunks.next_chunk()).min(self.inbound.len()),
            None => self.inbound.len(),
        };
    }

    fn take_inbound(&mut self, n: usize) -> Vec<u8> {
        self.visible -= n;
        self.inbound.drain(..n).collect()
    }
}

type Shared = Arc<Mutex<PipeState>>;

/// Connected pipe. The peer masks its frames like a browser would.
pub fn pair() -> (MockStream, MockPeer) {
    let state: Shared = Arc::default();
    (MockStream { state: state.clone() }, MockPeer { state, masking: true })
}

/// Engine side of a pipe.
pub struct MockStream {
    state: Shared,
}

impl Stream for MockStream {
    fn is_connected(&mut self) -> bool {
        let mut state = self.state.lock();
        state.release();
        !state.closed && !(state.peer_hung_up && state.inbound.is_empty())
    }

    fn bytes_available(&mut self) -> usize {
        self.state.lock().visible
    }

    fn read_line(&mut self, terminator: u8) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let visible = state.visible;
        let end = state.inbound.iter().take(visible).position(|&b| b == terminator)?;
        Some(state.take_inbound(end + 1))
    }

    fn read_available(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let mut state = self.state.lock();
        let n = max.min(state.visible);
        Ok(state.take_inbound(n))
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed || state.peer_hung_up || state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock pipe closed"));
        }
        state.outbound.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.closed = true;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.state.lock().peer_addr
    }
}

/// Test side of a pipe.
#[derive(Clone)]
pub struct MockPeer {
    state: Shared,
    masking: bool,
}

impl MockPeer {
    /// Frames from a server must not be masked.
    pub fn unmasked(mut self) -> Self {
        self.masking = false;
        self
    }

    /// Deliver future writes in random-sized pieces, one piece per engine poll.
    pub fn set_chunking(&self, chunks: ChunkedDelivery) {
        self.state.lock().chunking = Some(chunks);
    }

    pub fn set_peer_addr(&self, addr: SocketAddr) {
        self.state.lock().peer_addr = Some(addr);
    }

    /// Make every engine write fail from now on.
    pub fn fail_writes(&self) {
        self.state.lock().fail_writes = true;
    }

    pub fn write(&self, data: &[u8]) {
        self.state.lock().inbound.extend(data.iter().copied());
    }

    pub fn write_str(&self, text: &str) {
        self.write(text.as_bytes());
    }

    /// Send one frame, masked with a random key unless this peer is [`unmasked`](Self::unmasked).
    pub fn send_frame(&self, opcode: Opcode, payload: &[u8], fin: bool) {
        let mask = self.masking.then(rand::random::<[u8; 4]>);
        self.write(&frame::encode(opcode, payload, fin, mask));
    }

    pub fn send_text(&self, text: &str) {
        self.send_frame(Opcode::Text, text.as_bytes(), true);
    }

    /// The peer goes away; the engine sees it once the buffered bytes are read.
    pub fn hang_up(&self) {
        self.state.lock().peer_hung_up = true;
    }

    /// Everything the engine wrote since the last take.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().outbound)
    }

    /// Pop an HTTP head (up to and including the blank line) from the engine's output.
    pub fn take_http_head(&self) -> Option<String> {
        let mut state = self.state.lock();
        let end = state.outbound.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
        let head: Vec<u8> = state.outbound.drain(..end).collect();
        Some(String::from_utf8_lossy(&head).into_owned())
    }

    /// Pop every complete frame the engine wrote.
    pub fn take_frames(&self) -> Vec<Frame> {
        let mut state = self.state.lock();
        let mut frames = Vec::new();
        let mut used = 0;
        while let Ok((frame, n)) = frame::decode(&state.outbound[used..], usize::MAX) {
            frames.push(frame);
            used += n;
        }
        state.outbound.drain(..used);
        frames
    }

    /// The engine closed its end.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Bytes written by the peer that the engine has not consumed.
    pub fn unread(&self) -> usize {
        self.state.lock().inbound.len()
    }
}

/// Listener fed by the test. Clones share the pending queue.
#[derive(Clone, Default)]
pub struct MockListener {
    pending: Arc<Mutex<VecDeque<MockStream>>>,
}

impl MockListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound connection and return the client's end of it.
    pub fn connect(&self) -> MockPeer {
        let (stream, peer) = pair();
        self.pending.lock().push_back(stream);
        peer
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Listener for MockListener {
    type Stream = MockStream;

    fn accept(&mut self) -> io::Result<Option<MockStream>> {
        Ok(self.pending.lock().pop_front())
    }
}

/// Connector that hands out pipes prepared by the test and refuses otherwise.
#[derive(Clone, Default)]
pub struct MockConnector {
    ready: Arc<Mutex<VecDeque<MockStream>>>,
    attempts: Arc<Mutex<usize>>,
    last_timeout: Arc<Mutex<Option<Duration>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next `connect()` succeed; returns the server's end, unmasked.
    pub fn accept_next(&self) -> MockPeer {
        let (stream, peer) = pair();
        self.ready.lock().push_back(stream);
        peer.unmasked()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    /// Timeout passed to the most recent `connect()`.
    pub fn last_timeout(&self) -> Option<Duration> {
        *self.last_timeout.lock()
    }
}

impl Connector for MockConnector {
    type Stream = MockStream;

    fn connect(&mut self, timeout: Duration) -> io::Result<MockStream> {
        *self.attempts.lock() += 1;
        *self.last_timeout.lock() = Some(timeout);
        self.ready
            .lock()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no mock server ready"))
    }
}
