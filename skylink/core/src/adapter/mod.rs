//! Protocol Adapter
//!
//! Bridges one frame transport and the message bus:
//!
//! ```text
//!            receive loop: frame ─► tag lookup ─► decode ─► bus.publish
//!  transport ◄──────────────────────────────────────────────────────── bus
//!            on_message: message ─► type lookup ─► encode ─► send
//! ```
//!
//! The adapter publishes with its own listener ID, so messages it injects
//! are never routed back onto the link they came from.

pub mod mapping;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::bus::{ListenerError, ListenerId, MessageBus, MessageListener};
use crate::message::{Message, MessageRegistry};
use crate::transport::{
    BufferConfig, BufferedTransport, Frame, FrameError, FrameTransport, TransportConfig,
    TransportError,
};

pub use mapping::{MappingConfig, MappingEntry, MappingError, MappingTable};

/// Errors raised while building or running an adapter
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Neither a transport nor a transport config was supplied
    #[error("no transport supplied or configured")]
    NullTransport,

    /// Mapping configuration is invalid
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Message type has no mapping
    #[error("no mapping found for message type {0}")]
    NoMappingFound(&'static str),

    /// Encoded message does not fit into a frame
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Bridge between one frame transport and the message bus
pub struct ProtocolAdapter {
    id: ListenerId,
    table: Arc<MappingTable>,
    transport: Arc<dyn FrameTransport>,
    bus: MessageBus,
    running: AtomicBool,
}

impl std::fmt::Debug for ProtocolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolAdapter")
            .field("id", &self.id)
            .field("mappings", &self.table.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ProtocolAdapter {
    /// Assemble an adapter from validated parts
    #[must_use]
    pub fn new(
        table: Arc<MappingTable>,
        transport: Arc<dyn FrameTransport>,
        bus: MessageBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ListenerId::new(),
            table,
            transport,
            bus,
            running: AtomicBool::new(false),
        })
    }

    /// Start building an adapter attached to `bus`
    #[must_use]
    pub fn builder(bus: MessageBus) -> AdapterBuilder {
        AdapterBuilder::new(bus)
    }

    /// Subscribe advertised types and spawn the receive loop
    ///
    /// Must be called inside a Tokio runtime. The returned handle completes
    /// when the loop ends, after the adapter unsubscribed itself.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        for entry in self.table.advertised() {
            self.bus
                .subscribe(Arc::clone(self) as Arc<dyn MessageListener>, entry.message_type());
        }

        let adapter = Arc::clone(self);
        tokio::spawn(async move { adapter.receive_loop().await })
    }

    /// Encode `message` and send it over the transport
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::NoMappingFound`] for unmapped types, and
    /// frame or transport errors from encoding and sending.
    pub async fn send_message(&self, message: &dyn Message) -> Result<(), AdapterError> {
        let message_type = message.message_type();
        let entry = self
            .table
            .by_type(message_type)
            .ok_or(AdapterError::NoMappingFound(message_type.name))?;

        let frame = Frame::new(entry.tag(), message.to_bytes())?;
        self.transport.send(frame).await?;
        Ok(())
    }

    /// Stop receiving, leave the bus and terminate the transport
    pub async fn terminate(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.bus.unsubscribe(self.id);
        self.transport.terminate().await;
    }

    /// Whether the receive loop is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Identity used as bus sender and subscriber
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Shared mapping table
    #[must_use]
    pub fn table(&self) -> &Arc<MappingTable> {
        &self.table
    }

    async fn receive_loop(self: Arc<Self>) {
        tracing::info!(adapter = %self.id, "Receive loop started");

        while self.is_running() {
            match self.transport.receive().await {
                Ok(frame) => self.dispatch(frame).await,
                Err(TransportError::Closed) => break,
                Err(e) if self.transport.can_recover() && !self.transport.is_terminated() => {
                    tracing::warn!(adapter = %self.id, error = %e, "Receive failed");
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    tracing::info!(adapter = %self.id, error = %e, "Link lost, stopping receive loop");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.bus.unsubscribe(self.id);
        tracing::info!(adapter = %self.id, "Receive loop stopped");
    }

    async fn dispatch(&self, frame: Frame) {
        let Some(entry) = self.table.by_tag(frame.tag()) else {
            tracing::trace!(adapter = %self.id, tag = frame.tag(), "Discarding frame with unmapped tag");
            return;
        };

        match entry.message_type().decode(frame.payload()) {
            Ok(message) => {
                if let Err(e) = self.bus.publish(Some(self.id), message).await {
                    tracing::warn!(adapter = %self.id, error = %e, "Publish failed");
                }
            }
            Err(e) => tracing::warn!(
                adapter = %self.id,
                tag = frame.tag(),
                mapping = entry.name(),
                error = %e,
                "Discarding undecodable frame"
            ),
        }
    }
}

#[async_trait]
impl MessageListener for ProtocolAdapter {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    async fn on_message(&self, message: Arc<dyn Message>) -> Result<(), ListenerError> {
        if let Err(e) = self.send_message(message.as_ref()).await {
            tracing::warn!(
                adapter = %self.id,
                message_type = message.message_type().name,
                error = %e,
                "Failed to forward message"
            );
        }
        Ok(())
    }
}

/// Builder for [`ProtocolAdapter`]
///
/// Mappings are validated before any connection is opened.
pub struct AdapterBuilder {
    bus: MessageBus,
    registry: Option<MessageRegistry>,
    mappings: Option<Vec<MappingConfig>>,
    table: Option<Arc<MappingTable>>,
    transport: Option<Arc<dyn FrameTransport>>,
    transport_config: Option<(TransportConfig, BufferConfig)>,
}

impl AdapterBuilder {
    fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            registry: None,
            mappings: None,
            table: None,
            transport: None,
            transport_config: None,
        }
    }

    /// Registry resolving class names, defaults to [`MessageRegistry::builtin`]
    #[must_use]
    pub fn registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Mapping configuration to validate
    #[must_use]
    pub fn mappings(mut self, mappings: Vec<MappingConfig>) -> Self {
        self.mappings = Some(mappings);
        self
    }

    /// Already validated mapping table, takes precedence over [`mappings`](Self::mappings)
    #[must_use]
    pub fn table(mut self, table: Arc<MappingTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Caller-supplied transport
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn FrameTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Connect a buffered transport from config when no transport is supplied
    #[must_use]
    pub fn transport_config(mut self, transport: TransportConfig, buffer: BufferConfig) -> Self {
        self.transport_config = Some((transport, buffer));
        self
    }

    /// Validate, connect if needed, and build
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Mapping`] for invalid or missing mappings,
    /// [`AdapterError::NullTransport`] when no transport is available and
    /// [`AdapterError::Transport`] when connecting fails.
    pub async fn build(self) -> Result<Arc<ProtocolAdapter>, AdapterError> {
        let table = match (self.table, self.mappings) {
            (Some(table), _) => table,
            (None, Some(mappings)) => {
                let registry = self.registry.unwrap_or_else(MessageRegistry::builtin);
                Arc::new(MappingTable::build(&mappings, &registry)?)
            }
            (None, None) => return Err(MappingError::Empty.into()),
        };

        let transport: Arc<dyn FrameTransport> = match (self.transport, self.transport_config) {
            (Some(transport), _) => transport,
            (None, Some((transport, buffer))) => {
                Arc::new(BufferedTransport::connect(&transport, &buffer).await?)
            }
            (None, None) => return Err(AdapterError::NullTransport),
        };

        Ok(ProtocolAdapter::new(table, transport, self.bus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use crate::message::{shared, ANY_MESSAGE};
    use crate::messages::{CommandData, IdleLimit, MotorSignals};
    use crate::transport::{read_frame, Transport};

    #[derive(Default)]
    struct Recorder {
        id: ListenerId,
        received: parking_lot::Mutex<Vec<Arc<dyn Message>>>,
    }

    #[async_trait]
    impl MessageListener for Recorder {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        async fn on_message(&self, message: Arc<dyn Message>) -> Result<(), ListenerError> {
            self.received.lock().push(message);
            Ok(())
        }
    }

    fn mappings() -> Vec<MappingConfig> {
        vec![
            MappingConfig::new("command", 13, "CommandData", true),
            MappingConfig::new("motors", 7, "MotorSignals", false),
        ]
    }

    async fn adapter_over_pipe(bus: &MessageBus) -> (Arc<ProtocolAdapter>, DuplexStream) {
        let (local, remote) = duplex(4096);
        let transport = Arc::new(Transport::from_connection(Box::new(local)));
        let adapter = ProtocolAdapter::builder(bus.clone())
            .mappings(mappings())
            .transport(transport)
            .build()
            .await
            .unwrap();
        (adapter, remote)
    }

    async fn settle<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_builder_requires_transport() {
        let result = ProtocolAdapter::builder(MessageBus::new())
            .mappings(mappings())
            .build()
            .await;
        assert!(matches!(result, Err(AdapterError::NullTransport)));
    }

    #[tokio::test]
    async fn test_builder_validates_mappings_first() {
        let result = ProtocolAdapter::builder(MessageBus::new())
            .mappings(vec![MappingConfig::new("command", 0, "CommandData", true)])
            .build()
            .await;
        assert!(matches!(
            result,
            Err(AdapterError::Mapping(MappingError::NonPositiveTag { .. }))
        ));

        let result = ProtocolAdapter::builder(MessageBus::new()).build().await;
        assert!(matches!(result, Err(AdapterError::Mapping(MappingError::Empty))));
    }

    #[tokio::test]
    async fn test_inbound_frame_published_to_bus() {
        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(recorder.clone(), &ANY_MESSAGE);
        let (adapter, mut remote) = adapter_over_pipe(&bus).await;
        let _loop = adapter.start();

        let signals = MotorSignals {
            front: 1,
            right: 2,
            rear: 3,
            left: 4,
            id: 5,
        };
        let frame = Frame::new(7, signals.to_bytes()).unwrap();
        remote.write_all(&frame.encode()).await.unwrap();

        settle(|| recorder.received.lock().len() == 1).await;
        let received = recorder.received.lock()[0].clone();
        assert_eq!(received.downcast_ref::<MotorSignals>(), Some(&signals));
    }

    #[tokio::test]
    async fn test_unmapped_and_malformed_frames_skipped() {
        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(recorder.clone(), &ANY_MESSAGE);
        let (adapter, mut remote) = adapter_over_pipe(&bus).await;
        let _loop = adapter.start();

        remote
            .write_all(&Frame::new(99, vec![1]).unwrap().encode())
            .await
            .unwrap();
        remote
            .write_all(&Frame::new(13, vec![1, 2]).unwrap().encode())
            .await
            .unwrap();
        let command = CommandData::new(1.0, 0.0, 0.0, 2.0);
        remote
            .write_all(&Frame::new(13, command.to_bytes()).unwrap().encode())
            .await
            .unwrap();

        settle(|| recorder.received.lock().len() == 1).await;
        assert!(recorder.received.lock()[0].is::<CommandData>());
        assert!(adapter.is_running());
    }

    #[tokio::test]
    async fn test_advertised_bus_message_sent_on_link() {
        let bus = MessageBus::new();
        let (adapter, mut remote) = adapter_over_pipe(&bus).await;
        let _loop = adapter.start();

        let command = CommandData::new(0.0, 0.0, 0.0, 1.0);
        let delivered = bus.publish(None, shared(command)).await.unwrap();
        assert_eq!(delivered, 1);

        let frame = read_frame(&mut remote).await.unwrap();
        assert_eq!(frame.tag(), 13);
        assert_eq!(frame.payload(), command.to_bytes().as_slice());
    }

    #[tokio::test]
    async fn test_non_advertised_type_not_forwarded() {
        let bus = MessageBus::new();
        let (adapter, mut remote) = adapter_over_pipe(&bus).await;
        let _loop = adapter.start();

        let delivered = bus
            .publish(None, shared(MotorSignals::default()))
            .await
            .unwrap();
        assert_eq!(delivered, 0);

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(50), remote.read(&mut buf)).await;
        assert!(read.is_err(), "nothing should have been written");
    }

    #[tokio::test]
    async fn test_own_messages_not_echoed() {
        let bus = MessageBus::new();
        let (adapter, mut remote) = adapter_over_pipe(&bus).await;
        let _loop = adapter.start();

        let command = CommandData::new(0.0, 0.0, 0.0, 1.0);
        remote
            .write_all(&Frame::new(13, command.to_bytes()).unwrap().encode())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(50), remote.read(&mut buf)).await;
        assert!(read.is_err(), "inbound message was echoed back");
    }

    #[tokio::test]
    async fn test_send_message_requires_mapping() {
        let bus = MessageBus::new();
        let (adapter, _remote) = adapter_over_pipe(&bus).await;

        let result = adapter.send_message(&IdleLimit { limit: 3 }).await;
        assert!(matches!(result, Err(AdapterError::NoMappingFound("IdleLimit"))));
    }

    #[tokio::test]
    async fn test_loop_ends_when_peer_disconnects() {
        let bus = MessageBus::new();
        let (adapter, remote) = adapter_over_pipe(&bus).await;
        let handle = adapter.start();
        assert_eq!(bus.listener_count(), 1);

        drop(remote);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(!adapter.is_running());
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_terminate_stops_loop() {
        let bus = MessageBus::new();
        let (adapter, _remote) = adapter_over_pipe(&bus).await;
        let handle = adapter.start();

        adapter.terminate().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bus.listener_count(), 0);
    }
}
