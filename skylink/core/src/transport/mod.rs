//! Transport Layer
//!
//! Moves frames between this process and a vehicle, a simulator or a ground
//! station:
//! - [`Transport`]: one stream connection, reconnecting on failure
//! - [`BufferedTransport`]: bounded outbound queue in front of another transport
//! - [`DatagramTransport`]: one frame per UDP datagram
//!
//! All of them implement [`FrameTransport`], which is what the protocol
//! adapter talks to.

pub mod buffered;
pub mod config;
pub mod datagram;
pub mod factory;
pub mod frame;
pub mod stream;
pub mod traits;

// Re-exports for convenience
pub use buffered::BufferedTransport;
pub use config::{BufferConfig, ConnectionKind, ConnectionSpec, TransportConfig};
pub use datagram::DatagramTransport;
pub use factory::{create_connection_factory, ConnectionFactory};
pub use frame::{checksum, read_frame, Frame, FrameError, MAX_PAYLOAD_SIZE, SYNC_MARKER};
pub use stream::{Transport, TransportBuilder};
pub use traits::{BoxedConnection, Connection, ConnectionId, FrameTransport, TransportError};
