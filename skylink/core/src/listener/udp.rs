//! UDP Listener Service
//!
//! A single server-mode datagram transport serves every UDP peer, so the
//! whole service is one protocol adapter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{ServiceError, UdpListenerConfig};
use crate::adapter::{MappingTable, ProtocolAdapter};
use crate::bus::MessageBus;
use crate::transport::{DatagramTransport, FrameTransport};

/// Bridges UDP peers onto the bus
pub struct UdpListenerService {
    adapter: Arc<ProtocolAdapter>,
    transport: Arc<DatagramTransport>,
    local_addr: SocketAddr,
    receive_loop: parking_lot::Mutex<Option<JoinHandle<()>>>,
    started: parking_lot::Mutex<bool>,
}

impl std::fmt::Debug for UdpListenerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpListenerService")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peer_count())
            .finish_non_exhaustive()
    }
}

impl UdpListenerService {
    /// Bind the datagram socket
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Bind`] when the address cannot be bound.
    pub async fn bind(
        config: &UdpListenerConfig,
        table: Arc<MappingTable>,
        bus: MessageBus,
    ) -> Result<Self, ServiceError> {
        let address = config.socket_address();
        let bind_error = |source| ServiceError::Bind {
            address: address.clone(),
            source,
        };
        let transport = DatagramTransport::bind(
            address.as_str(),
            Duration::from_millis(config.receive_timeout_ms),
            Duration::from_millis(config.client_timeout_ms),
        )
        .await
        .map_err(bind_error)?;
        let local_addr = transport.local_addr().map_err(bind_error)?;
        let transport = Arc::new(transport);
        let adapter = ProtocolAdapter::new(table, Arc::clone(&transport) as Arc<dyn FrameTransport>, bus);

        Ok(Self {
            adapter,
            transport,
            local_addr,
            receive_loop: parking_lot::Mutex::new(None),
            started: parking_lot::Mutex::new(false),
        })
    }

    /// Bound address
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peers heard from recently
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.transport.peer_count()
    }

    /// Start the adapter's receive loop
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AlreadyStarted`] on a second call and
    /// [`ServiceError::Terminated`] after [`terminate`](Self::terminate).
    pub fn start(&self) -> Result<(), ServiceError> {
        if self.transport.is_terminated() {
            return Err(ServiceError::Terminated);
        }
        let mut started = self.started.lock();
        if *started {
            return Err(ServiceError::AlreadyStarted);
        }
        *started = true;
        *self.receive_loop.lock() = Some(self.adapter.start());
        tracing::info!(local = %self.local_addr, "UDP listener started");
        Ok(())
    }

    /// Stop the adapter and close the socket; idempotent
    pub async fn terminate(&self) {
        self.adapter.terminate().await;
        let receive_loop = self.receive_loop.lock().take();
        if let Some(handle) = receive_loop {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Receive loop ended abnormally");
            }
            tracing::info!(local = %self.local_addr, "UDP listener terminated");
        }
    }
}
