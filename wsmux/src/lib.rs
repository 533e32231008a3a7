//! # wsmux
//!
//! Tick-driven WebSocket engine for constrained endpoints.
//!
//! ## Features
//!
//! - **RFC 6455 framing**: three-tier lengths, masking, fragmentation, control frames
//! - **Fixed capacity**: a preallocated connection table, never resized at runtime
//! - **Non-blocking**: every bit of work happens inside `tick()`, no threads, no blocking reads
//! - **Pluggable transport**: anything implementing [`Stream`] / [`Listener`] / [`Connector`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsmux::{EventKind, ServerConfig, TcpAcceptor, WsServer};
//!
//! let acceptor = TcpAcceptor::bind("127.0.0.1:8081")?;
//! let mut server = WsServer::new(acceptor, ServerConfig::default());
//!
//! server.on_event(|slot, kind, payload| {
//!     if kind == EventKind::Text {
//!         println!("[{}] {}", slot, String::from_utf8_lossy(payload));
//!     }
//! });
//!
//! loop {
//!     server.tick();
//! }
//! ```
//!
//! ## Layers
//!
//! ```text
//! transport bytes ─► WsServer (accept + service) ─► handshake ─► channel/frame ─► callback
//! ```

// Tracing macros - no-op when feature disabled
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => { if false { let _ = format!($($arg)*); } } }

#[cfg(feature = "tracing")]
macro_rules! trace_info { ($($arg:tt)*) => { tracing::info!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_info { ($($arg:tt)*) => { if false { let _ = format!($($arg)*); } } }

#[cfg(feature = "tracing")]
macro_rules! trace_warn { ($($arg:tt)*) => { tracing::warn!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn { ($($arg:tt)*) => { if false { let _ = format!($($arg)*); } } }

mod channel;
pub mod client;
pub mod config;
mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod heartbeat;
pub mod server;
pub mod table;
mod tcp;
mod transport;
pub mod validator;

pub use client::WsClient;
pub use config::{ClientConfig, HeartbeatConfig, ServerConfig};
pub use error::{FrameError, HandshakeError, Result, WsError};
pub use event::{EventKind, MessageKind};
pub use frame::{Frame, Opcode};
pub use handshake::accept_key;
pub use server::WsServer;
pub use table::SlotStatus;
pub use tcp::{TcpAcceptor, TcpConnector, TcpTransport};
pub use transport::{Clock, Connector, Listener, Stream, SystemClock};
pub use validator::HeaderValidator;

/// RFC 6455 protocol version spoken on both sides.
pub const WEBSOCKET_VERSION: u32 = 13;
