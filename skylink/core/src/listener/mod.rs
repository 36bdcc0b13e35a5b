//! Listener Services
//!
//! Accept remote parties and attach each one to the message bus through its
//! own protocol adapter:
//!
//! ```text
//!   TcpListenerService                      UdpListenerService
//!          │ accept                                  │
//!   ┌──────┼──────────────┐                   DatagramTransport
//!   │      │              │                   (all UDP peers)
//!  peer-1 peer-2 ...   peer-N                        │
//!   │      │              │                   ProtocolAdapter
//!  Transport → BufferedTransport → ProtocolAdapter    │
//!   └──────┴──────────────┴────────── MessageBus ─────┘
//! ```
//!
//! All adapters of a service share one validated mapping table.

pub mod tcp;
pub mod udp;

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use tcp::TcpListenerService;
pub use udp::UdpListenerService;

/// Errors raised by listener services
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Could not bind the listening socket
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address the service tried to bind
        address: String,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// `start` was called twice
    #[error("service already started")]
    AlreadyStarted,

    /// Service was terminated
    #[error("service terminated")]
    Terminated,
}

/// TCP listener configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpListenerConfig {
    /// Address to bind
    pub bind_address: String,
    /// Port to listen on, 0 picks a free one
    pub port: u16,
    /// Peers served at once; further connections are closed right away
    pub max_peers: usize,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7000,
            max_peers: 64,
        }
    }
}

impl TcpListenerConfig {
    /// Config binding `address` on `port` with default limits
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// `address:port` as passed to bind
    #[must_use]
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// UDP listener configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpListenerConfig {
    /// Address to bind
    pub bind_address: String,
    /// Port to listen on, 0 picks a free one
    pub port: u16,
    /// Upper bound of each socket wait in milliseconds
    pub receive_timeout_ms: u64,
    /// How long a silent peer keeps receiving frames, in milliseconds
    pub client_timeout_ms: u64,
}

impl Default for UdpListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7001,
            receive_timeout_ms: 500,
            client_timeout_ms: 10_000,
        }
    }
}

impl UdpListenerConfig {
    /// Config binding `address` on `port` with default timeouts
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// `address:port` as passed to bind
    #[must_use]
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
