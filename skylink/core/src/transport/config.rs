//! Transport Configuration
//!
//! Selects the connection a [`Transport`](super::Transport) runs over and how
//! hard it tries to get it back once lost.

use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default pause before each reconnect attempt in milliseconds
pub const DEFAULT_RECONNECTION_TIMEOUT_MS: u64 = 1000;

/// Default reconnect budget of a single send or receive
pub const DEFAULT_MAXIMUM_RECONNECTS: u32 = 100;

/// Default capacity of the outbound frame queue
pub const DEFAULT_SEND_BUFFER_LENGTH: usize = 10;

/// Kind of connection the transport runs over
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Ordered byte stream
    #[default]
    Stream,
    /// Datagram socket
    Datagram,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Datagram => write!(f, "datagram"),
        }
    }
}

/// Where a stream connection goes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionSpec {
    /// TCP connection to a host and port
    Tcp {
        /// Host name or address
        host: String,
        /// Port number
        port: u16,
    },
    /// Unix domain socket
    #[cfg(unix)]
    Unix {
        /// Socket file path
        path: PathBuf,
    },
}

impl fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            #[cfg(unix)]
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection kind, only `stream` has a transport
    pub connection_kind: ConnectionKind,
    /// Pause before each reconnect attempt in milliseconds
    pub reconnection_timeout_ms: u64,
    /// Reconnects a single send or receive may attempt
    pub maximum_reconnects: u32,
    /// Connection target
    pub connection: Option<ConnectionSpec>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connection_kind: ConnectionKind::Stream,
            reconnection_timeout_ms: DEFAULT_RECONNECTION_TIMEOUT_MS,
            maximum_reconnects: DEFAULT_MAXIMUM_RECONNECTS,
            connection: None,
        }
    }
}

impl TransportConfig {
    /// Config for a TCP connection with default reconnect settings
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            connection: Some(ConnectionSpec::Tcp {
                host: host.into(),
                port,
            }),
            ..Self::default()
        }
    }

    /// Config for a Unix socket connection with default reconnect settings
    #[cfg(unix)]
    #[must_use]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            connection: Some(ConnectionSpec::Unix { path: path.into() }),
            ..Self::default()
        }
    }

    /// Set the pause before each reconnect attempt
    #[must_use]
    pub fn with_reconnection_timeout(mut self, timeout: Duration) -> Self {
        self.reconnection_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the reconnect budget of a single call
    #[must_use]
    pub fn with_maximum_reconnects(mut self, maximum: u32) -> Self {
        self.maximum_reconnects = maximum;
        self
    }

    /// Pause before each reconnect attempt
    #[must_use]
    pub fn reconnection_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnection_timeout_ms)
    }
}

/// Outbound queue configuration of a
/// [`BufferedTransport`](super::BufferedTransport)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Frames that may wait in the queue
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SEND_BUFFER_LENGTH,
        }
    }
}
