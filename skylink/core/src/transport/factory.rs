//! Connection Factory
//!
//! Opens connections for [`Transport`](super::Transport), both the first one
//! and every replacement after a link failure.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::config::{ConnectionKind, ConnectionSpec, TransportConfig};
use super::traits::{BoxedConnection, TransportError};

/// Opens new connections to a fixed target
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a fresh connection
    async fn connect(&self) -> io::Result<BoxedConnection>;

    /// Human-readable target, used in errors and logs
    fn target(&self) -> String;
}

#[async_trait]
impl ConnectionFactory for ConnectionSpec {
    async fn connect(&self) -> io::Result<BoxedConnection> {
        match self {
            Self::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Self::Unix { path } => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
        }
    }

    fn target(&self) -> String {
        self.to_string()
    }
}

/// Create the connection factory described by `config`
///
/// # Errors
///
/// Returns [`TransportError::UnsupportedConnectionKind`] for anything but
/// stream connections and [`TransportError::NullConnection`] when no target
/// is configured.
pub fn create_connection_factory(
    config: &TransportConfig,
) -> Result<Arc<dyn ConnectionFactory>, TransportError> {
    if config.connection_kind != ConnectionKind::Stream {
        return Err(TransportError::UnsupportedConnectionKind(
            config.connection_kind,
        ));
    }

    let spec = config
        .connection
        .clone()
        .ok_or(TransportError::NullConnection)?;
    tracing::debug!(connection = %spec, "Created connection factory");
    Ok(Arc::new(spec))
}
