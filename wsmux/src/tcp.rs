//! Non-blocking `std::net` backend.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::transport::{Connector, Listener, Stream};

const READ_CHUNK: usize = 4096;

/// Most received bytes held before the kernel is left to apply backpressure.
pub const DEFAULT_RX_LIMIT: usize = 16 * READ_CHUNK;

/// Most unsent bytes held for a peer that stopped reading.
pub const DEFAULT_TX_LIMIT: usize = 4 * 1024 * 1024;

/// TCP stream with its own receive buffer, so lines can be peeked for.
pub struct TcpTransport {
    stream: TcpStream,
    rx: Vec<u8>,
    /// Bytes the kernel did not take yet.
    tx: Vec<u8>,
    rx_limit: usize,
    tx_limit: usize,
    peer: Option<SocketAddr>,
    eof: bool,
    closed: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream,
            rx: Vec::new(),
            tx: Vec::new(),
            rx_limit: DEFAULT_RX_LIMIT,
            tx_limit: DEFAULT_TX_LIMIT,
            peer,
            eof: false,
            closed: false,
        })
    }

    /// Dial `addr`, giving up on each resolved address after `timeout`.
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<Self> {
        let timeout = timeout.max(Duration::from_millis(1));
        let mut last_err = io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing");
        for addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::new(stream),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Bound the receive buffer (at least one read chunk) and the pending-send buffer.
    pub fn with_limits(mut self, rx_limit: usize, tx_limit: usize) -> Self {
        self.rx_limit = rx_limit.max(READ_CHUNK);
        self.tx_limit = tx_limit;
        self
    }

    /// One non-blocking read into the receive buffer, skipped while the buffer is full.
    fn fill(&mut self) {
        if self.closed || self.eof {
            return;
        }
        let room = self.rx_limit.saturating_sub(self.rx.len()).min(READ_CHUNK);
        if room == 0 {
            return;
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk[..room]) {
                Ok(0) => self.eof = true,
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_e) => {
                    trace_debug!("tcp read failed: {}", _e);
                    self.eof = true;
                }
            }
            return;
        }
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        while !self.tx.is_empty() {
            match self.stream.write(&self.tx) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "peer stopped reading")),
                Ok(n) => {
                    self.tx.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Stream for TcpTransport {
    fn is_connected(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.flush_pending().is_err() {
            self.eof = true;
            self.rx.clear();
        }
        self.fill();
        !(self.eof && self.rx.is_empty())
    }

    fn bytes_available(&mut self) -> usize {
        self.rx.len()
    }

    fn read_line(&mut self, terminator: u8) -> Option<Vec<u8>> {
        self.fill();
        let end = self.rx.iter().position(|&b| b == terminator)?;
        Some(self.rx.drain(..=end).collect())
    }

    fn read_available(&mut self, max: usize) -> io::Result<Vec<u8>> {
        self.fill();
        let n = max.min(self.rx.len());
        Ok(self.rx.drain(..n).collect())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed"));
        }
        self.flush_pending()?;
        if !self.tx.is_empty() && self.tx.len() + data.len() > self.tx_limit {
            return Err(io::Error::new(io::ErrorKind::Other, "send buffer full"));
        }
        self.tx.extend_from_slice(data);
        self.flush_pending()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.flush_pending();
        let _ = self.stream.shutdown(Shutdown::Both);
        self.rx.clear();
        self.tx.clear();
        self.closed = true;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Non-blocking TCP listener.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for TcpAcceptor {
    type Stream = TcpTransport;

    fn accept(&mut self) -> io::Result<Option<TcpTransport>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                trace_debug!("tcp accept from {}", _addr);
                TcpTransport::new(stream).map(Some)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Dials a fixed address. The connect waits at most the caller's timeout; the
/// resulting stream never blocks.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpTransport;

    fn connect(&mut self, timeout: Duration) -> io::Result<TcpTransport> {
        TcpTransport::connect(self.addr.as_str(), timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_loopback_lines_and_bytes() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let addr = acceptor.local_addr().unwrap();
        let mut client = TcpConnector::new(addr.to_string()).connect(Duration::from_secs(1)).unwrap();

        let mut server = None;
        assert!(wait_for(|| {
            server = acceptor.accept().unwrap();
            server.is_some()
        }));
        let mut server = server.unwrap();
        assert!(server.peer_addr().is_some());

        client.write(b"GET / HTTP/1.1\r\npartial").unwrap();
        let mut line = None;
        assert!(wait_for(|| {
            line = server.read_line(b'\n');
            line.is_some()
        }));
        assert_eq!(line.unwrap(), b"GET / HTTP/1.1\r\n");
        assert!(wait_for(|| server.is_connected() && server.bytes_available() == 7));
        assert_eq!(server.read_line(b'\n'), None);
        assert_eq!(server.read_available(64).unwrap(), b"partial");

        client.close();
        assert!(!client.is_connected());
        assert!(wait_for(|| !server.is_connected()));
    }

    #[test]
    fn test_accept_without_pending_is_none() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        assert!(acceptor.accept().unwrap().is_none());
    }

    fn loopback_pair() -> (TcpTransport, TcpStream) {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let peer = TcpStream::connect(acceptor.local_addr().unwrap()).unwrap();
        let mut server = None;
        assert!(wait_for(|| {
            server = acceptor.accept().unwrap();
            server.is_some()
        }));
        (server.unwrap(), peer)
    }

    #[test]
    fn test_rx_buffer_bounded_under_flood() {
        const TOTAL: usize = 4 * 1024 * 1024;
        let (mut server, mut peer) = loopback_pair();
        let writer = std::thread::spawn(move || {
            peer.write_all(&vec![0x5a; TOTAL]).unwrap();
            peer
        });

        // consume slower than the backend reads
        let mut received = 0;
        let mut max_buffered = 0;
        let deadline = Instant::now() + Duration::from_secs(20);
        while received < TOTAL && Instant::now() < deadline {
            server.is_connected();
            let available = server.bytes_available();
            received += server.read_available(available.min(1024)).unwrap().len();
            max_buffered = max_buffered.max(server.rx.len());
        }
        let _peer = writer.join().unwrap();

        assert_eq!(received, TOTAL);
        assert!(max_buffered <= DEFAULT_RX_LIMIT, "rx grew to {} bytes", max_buffered);
    }

    #[test]
    fn test_tx_buffer_bounded_for_stalled_peer() {
        let (server, _peer) = loopback_pair();
        let mut server = server.with_limits(DEFAULT_RX_LIMIT, 256 * 1024);
        let chunk = vec![0u8; 64 * 1024];

        // the peer never reads: kernel buffers fill, then the pending buffer hits its limit
        let mut failed = false;
        for _ in 0..2000 {
            if server.write(&chunk).is_err() {
                failed = true;
                break;
            }
            assert!(server.tx.len() <= 256 * 1024);
        }
        assert!(failed);
    }

    #[test]
    fn test_connect_timeout_is_bounded() {
        // TEST-NET-1 is never routed; either the SYN is dropped or the route is refused
        let started = Instant::now();
        let result = TcpConnector::new("192.0.2.1:81").connect(Duration::from_millis(200));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
