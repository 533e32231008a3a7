//! # wsmux-socketio
//!
//! Engine.IO v3 / Socket.IO client running over a [`wsmux::WsClient`].
//!
//! The layer answers Engine.IO pings, sends the `upgrade` packet once the WebSocket
//! is open, keeps its own 20 s Engine.IO heartbeat and hands Socket.IO packets to a
//! single callback.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsmux::TcpConnector;
//! use wsmux_socketio::{SocketIoClient, SocketIoEvent};
//!
//! let mut io = SocketIoClient::new(TcpConnector::new("127.0.0.1:3000"), "127.0.0.1", 3000);
//! io.on_event(|event, payload| {
//!     if let SocketIoEvent::Event(_) = event {
//!         println!("{}", String::from_utf8_lossy(payload));
//!     }
//! });
//!
//! loop {
//!     io.tick();
//!     if io.is_connected() {
//!         io.send_event(r#"["ping",{}]"#);
//!     }
//! }
//! ```

// Tracing macros - no-op when feature disabled
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => { if false { let _ = format!($($arg)*); } } }

#[cfg(feature = "tracing")]
macro_rules! trace_warn { ($($arg:tt)*) => { tracing::warn!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn { ($($arg:tt)*) => { if false { let _ = format!($($arg)*); } } }

pub mod client;
pub mod packet;

pub use client::{SocketIoClient, SocketIoEvent, DEFAULT_PATH, EIO_HEARTBEAT_INTERVAL_MS};
pub use packet::{EngineIoType, SocketIoType};
