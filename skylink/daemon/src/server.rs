//! Relay server
//!
//! Owns the message bus, the listener services and the optional uplink
//! adapter for the lifetime of the daemon.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use skylink_core::{
    MappingTable, MessageBus, MessageLogger, MessageRegistry, ProtocolAdapter, SkylinkConfig,
    TcpListenerService, UdpListenerService, ANY_MESSAGE,
};

/// Which services to run
#[derive(Clone, Copy, Debug)]
pub struct Services {
    pub tcp: bool,
    pub udp: bool,
    /// Dial `[transport]` when it names a connection
    pub uplink: bool,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            tcp: true,
            udp: true,
            uplink: true,
        }
    }
}

/// Outbound adapter and its receive loop
struct Uplink {
    adapter: Arc<ProtocolAdapter>,
    receive_loop: JoinHandle<()>,
}

/// Relay server state
pub struct RelayServer {
    config: SkylinkConfig,
    services: Services,
    table: Arc<MappingTable>,
    bus: MessageBus,
    tcp: Option<Arc<TcpListenerService>>,
    udp: Option<UdpListenerService>,
    uplink: Option<Uplink>,
}

impl RelayServer {
    /// Validate the mappings and prepare the bus
    pub fn new(config: SkylinkConfig, services: Services) -> Result<Self> {
        let registry = MessageRegistry::builtin();
        let table = config
            .mapping_table(&registry)
            .context("Invalid message mappings")?;

        let bus = MessageBus::new();
        bus.subscribe(Arc::new(MessageLogger::new()), &ANY_MESSAGE);

        Ok(Self {
            config,
            services,
            table: Arc::new(table),
            bus,
            tcp: None,
            udp: None,
            uplink: None,
        })
    }

    /// Bind the enabled listeners and dial the uplink
    pub async fn start(&mut self) -> Result<()> {
        if self.services.tcp {
            let service = TcpListenerService::bind(
                &self.config.tcp,
                self.config.buffer.clone(),
                Arc::clone(&self.table),
                self.bus.clone(),
            )
            .await
            .context("Failed to start TCP listener")?;
            service.start()?;
            info!(addr = %service.local_addr(), "TCP listener started");
            self.tcp = Some(service);
        }

        if self.services.udp {
            let service =
                UdpListenerService::bind(&self.config.udp, Arc::clone(&self.table), self.bus.clone())
                    .await
                    .context("Failed to start UDP listener")?;
            service.start()?;
            self.udp = Some(service);
        }

        if self.services.uplink {
            if let Some(target) = &self.config.transport.connection {
                let adapter = ProtocolAdapter::builder(self.bus.clone())
                    .table(Arc::clone(&self.table))
                    .transport_config(self.config.transport.clone(), self.config.buffer.clone())
                    .build()
                    .await
                    .with_context(|| format!("Failed to connect uplink to {target}"))?;
                let receive_loop = adapter.start();
                info!(target_addr = %target, adapter = %adapter.id(), "Uplink connected");
                self.uplink = Some(Uplink {
                    adapter,
                    receive_loop,
                });
            }
        }

        if self.tcp.is_none() && self.udp.is_none() && self.uplink.is_none() {
            warn!("All services disabled");
        }
        Ok(())
    }

    /// Start, run until `shutdown` flips to true, then stop
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.start().await?;
        info!(mappings = self.table.len(), "Relay running");

        // A dropped sender counts as shutdown
        let _ = shutdown.wait_for(|stop| *stop).await;

        self.stop().await;
        Ok(())
    }

    /// Terminate all services
    pub async fn stop(&mut self) {
        if let Some(uplink) = self.uplink.take() {
            uplink.adapter.terminate().await;
            if let Err(e) = uplink.receive_loop.await {
                warn!(error = %e, "Uplink receive loop ended abnormally");
            }
        }
        if let Some(tcp) = self.tcp.take() {
            tcp.terminate().await;
        }
        if let Some(udp) = self.udp.take() {
            udp.terminate().await;
        }
        info!(listeners = self.bus.listener_count(), "Relay stopped");
    }

    /// Bound TCP address, once started
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().map(|service| service.local_addr())
    }

    /// Bound UDP address, once started
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().map(UdpListenerService::local_addr)
    }

    /// Whether the uplink adapter is running
    pub fn uplink_running(&self) -> bool {
        self.uplink
            .as_ref()
            .is_some_and(|uplink| uplink.adapter.is_running())
    }

    /// The shared message bus
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }
}
