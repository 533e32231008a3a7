//! Test harness for wsmux: in-memory transports, a manual clock and randomized
//! chunked delivery.

pub mod chaos;
pub mod clock;
pub mod mock;

pub use chaos::ChunkedDelivery;
pub use clock::ManualClock;
pub use mock::{pair, MockConnector, MockListener, MockPeer, MockStream};
