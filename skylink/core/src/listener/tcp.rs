//! TCP Listener Service
//!
//! Accepts stream connections and gives every peer its own buffered
//! transport and protocol adapter. A peer's entry is removed as soon as its
//! receive loop ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::{ServiceError, TcpListenerConfig};
use crate::adapter::{MappingTable, ProtocolAdapter};
use crate::bus::MessageBus;
use crate::transport::config::DEFAULT_RECONNECTION_TIMEOUT_MS;
use crate::transport::{BufferConfig, BufferedTransport, ConnectionId, Transport};

/// Accepts TCP peers and bridges each onto the bus
pub struct TcpListenerService {
    listener: parking_lot::Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    max_peers: usize,
    table: Arc<MappingTable>,
    bus: MessageBus,
    buffer: BufferConfig,
    peers: Arc<DashMap<ConnectionId, Arc<ProtocolAdapter>>>,
    shutdown: watch::Sender<bool>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TcpListenerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListenerService")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peer_count())
            .finish_non_exhaustive()
    }
}

impl TcpListenerService {
    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Bind`] when the address cannot be bound.
    pub async fn bind(
        config: &TcpListenerConfig,
        buffer: BufferConfig,
        table: Arc<MappingTable>,
        bus: MessageBus,
    ) -> Result<Arc<Self>, ServiceError> {
        let address = config.socket_address();
        let bind_error = |source| ServiceError::Bind {
            address: address.clone(),
            source,
        };
        let listener = TcpListener::bind(&address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        let (shutdown, _) = watch::channel(false);

        tracing::info!(local = %local_addr, "TCP listener bound");
        Ok(Arc::new(Self {
            listener: parking_lot::Mutex::new(Some(listener)),
            local_addr,
            max_peers: config.max_peers,
            table,
            bus,
            buffer,
            peers: Arc::new(DashMap::new()),
            shutdown,
            accept_task: parking_lot::Mutex::new(None),
        }))
    }

    /// Bound address
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of peers currently attached
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Spawn the accept loop
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AlreadyStarted`] on a second call and
    /// [`ServiceError::Terminated`] after [`terminate`](Self::terminate).
    pub fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        if *self.shutdown.borrow() {
            return Err(ServiceError::Terminated);
        }
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(ServiceError::AlreadyStarted)?;

        let service = Arc::clone(self);
        let handle = tokio::spawn(async move { service.accept_loop(listener).await });
        *self.accept_task.lock() = Some(handle);
        Ok(())
    }

    /// Stop accepting, terminate every peer and wait for the accept loop
    ///
    /// Idempotent.
    pub async fn terminate(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        drop(self.listener.lock().take());

        let accept_task = self.accept_task.lock().take();
        if let Some(handle) = accept_task {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Accept loop ended abnormally");
            }
        }

        let peers: Vec<Arc<ProtocolAdapter>> =
            self.peers.iter().map(|entry| Arc::clone(entry.value())).collect();
        for adapter in peers {
            adapter.terminate().await;
        }
        self.peers.clear();
        tracing::info!(local = %self.local_addr, "TCP listener terminated");
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        tracing::info!(local = %self.local_addr, "Listening for connections");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.attach(stream, peer),
                Err(e) => tracing::error!(error = %e, "Accept failed"),
            }
        }
        tracing::debug!("Accept loop stopped");
    }

    fn attach(&self, stream: TcpStream, peer: SocketAddr) {
        if self.peers.len() >= self.max_peers {
            tracing::warn!(peer = %peer, max_peers = self.max_peers, "Peer limit reached, rejecting connection");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Could not disable Nagle's algorithm");
        }

        let conn_id = ConnectionId::new();
        let transport = Arc::new(Transport::from_connection(Box::new(stream)));
        let buffered = Arc::new(BufferedTransport::new(
            transport,
            &self.buffer,
            Duration::from_millis(DEFAULT_RECONNECTION_TIMEOUT_MS),
        ));
        let adapter = ProtocolAdapter::new(Arc::clone(&self.table), buffered, self.bus.clone());
        let receive_loop = adapter.start();
        self.peers.insert(conn_id.clone(), Arc::clone(&adapter));

        tracing::info!(
            conn_id = %conn_id,
            peer = %peer,
            active_peers = self.peers.len(),
            "New connection accepted"
        );

        let peers = Arc::clone(&self.peers);
        let span = tracing::info_span!("connection", %conn_id);
        tokio::spawn(
            async move {
                if let Err(e) = receive_loop.await {
                    tracing::warn!(error = %e, "Receive loop ended abnormally");
                }
                adapter.terminate().await;
                peers.remove(&conn_id);
                tracing::info!("Connection closed");
            }
            .instrument(span),
        );
    }
}
