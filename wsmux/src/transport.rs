//! Non-blocking transport contract.
//!
//! The engine never touches sockets directly. Every backend (plain TCP, an in-memory
//! pipe in tests, a TLS wrapper) implements [`Stream`] and the engine polls it from
//! inside `tick()`. None of these calls may block.

use std::io;
use std::time::{Duration, Instant};

/// A connected byte stream.
pub trait Stream {
    /// False once the peer is gone and nothing is left to read.
    fn is_connected(&mut self) -> bool;

    /// Bytes that can be read right now without blocking.
    fn bytes_available(&mut self) -> usize;

    /// Pop one line ending in `terminator` (terminator included).
    ///
    /// Returns `None` until the terminator has arrived; the partial line stays buffered.
    fn read_line(&mut self, terminator: u8) -> Option<Vec<u8>>;

    /// Read up to `max` bytes that are already available.
    fn read_available(&mut self, max: usize) -> io::Result<Vec<u8>>;

    /// Write the whole buffer.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Close the stream. Idempotent.
    fn close(&mut self);

    /// Peer address, when the backend knows one.
    fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        None
    }
}

/// Source of inbound connections for the server.
pub trait Listener {
    type Stream: Stream;

    /// Pop one pending connection, `Ok(None)` when nothing is waiting.
    fn accept(&mut self) -> io::Result<Option<Self::Stream>>;
}

/// Source of outbound connections for the client.
pub trait Connector {
    type Stream: Stream;

    /// Open a connection, waiting no longer than `timeout`.
    fn connect(&mut self, timeout: Duration) -> io::Result<Self::Stream>;
}

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// [`Clock`] backed by [`Instant`], counting from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}
