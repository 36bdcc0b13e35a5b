//! Transport Traits
//!
//! Core definitions shared by every frame transport:
//! - [`FrameTransport`]: send and receive whole frames
//! - [`Connection`]: any byte stream a transport can run over
//! - [`TransportError`]: what can go wrong doing either

use std::fmt;
use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use super::config::ConnectionKind;
use super::frame::{Frame, FrameError};

/// Unique identifier for an accepted peer connection
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a new unique connection ID from a random 128-bit value
    #[must_use]
    pub fn new() -> Self {
        use rand::Rng;
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(format!("conn_{}", hex::encode(bytes)))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bidirectional byte stream a transport can run over
///
/// Implemented for every `AsyncRead + AsyncWrite` type, so TCP streams,
/// Unix sockets and in-memory duplex pipes all qualify.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased connection
pub type BoxedConnection = Box<dyn Connection>;

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Configured connection kind has no transport
    #[error("only stream connections are supported, configured kind is '{0}'")]
    UnsupportedConnectionKind(ConnectionKind),

    /// No connection was supplied or configured
    #[error("no connection supplied or configured")]
    NullConnection,

    /// Initial connection attempt failed
    #[error("failed to connect to {target}: {source}")]
    Connect {
        /// Address the transport tried to reach
        target: String,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// Link failed and the transport has no way to reconnect
    #[error("link failure: {0}")]
    Link(#[source] FrameError),

    /// Reconnect budget of a single call ran out
    #[error("exceeded the maximum number of allowed reconnects ({attempts}), cause was: {source}")]
    ReconnectBudgetExhausted {
        /// Reconnects attempted during the call
        attempts: u32,
        /// Last failure observed
        #[source]
        source: FrameError,
    },

    /// Transport was terminated
    #[error("transport terminated")]
    Closed,
}

/// A bidirectional carrier of whole frames
///
/// Implementations may be used from several tasks at once: one task
/// receiving while others send.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Send one frame
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Receive the next frame, waiting until one is available
    async fn receive(&self) -> Result<Frame, TransportError>;

    /// Stop the transport and release its connection
    ///
    /// Idempotent. Pending and later calls fail with [`TransportError::Closed`].
    async fn terminate(&self);

    /// Whether [`terminate`](Self::terminate) has been called
    fn is_terminated(&self) -> bool;

    /// Whether a failed call leaves the transport usable for later calls
    fn can_recover(&self) -> bool;
}
