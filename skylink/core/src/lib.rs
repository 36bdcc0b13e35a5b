//! Skylink Core - Framed Telemetry and Command Relay
//!
//! Moves small binary frames between flight controllers, simulators and
//! ground stations, and turns them into typed messages on an in-process bus.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Remote Peers                             │
//! │   ┌──────────┐   ┌──────────────┐   ┌──────────────────────────┐  │
//! │   │ Vehicle  │   │  Simulator   │   │  Ground station / plot   │  │
//! │   └────┬─────┘   └──────┬───────┘   └────────────┬─────────────┘  │
//! │        └────────────────┴────── FF FF type len payload ck ───┘    │
//! └────────────────────────────────┼─────────────────────────────────┘
//!                                  │  TCP / Unix / UDP
//! ┌────────────────────────────────┼─────────────────────────────────┐
//! │                         SKYLINK CORE                              │
//! │  ┌─────────────┐   ┌──────────────────┐   ┌────────────────────┐  │
//! │  │  Transport  │──►│ BufferedTransport│──►│  ProtocolAdapter   │  │
//! │  │ (reconnect) │   │  (bounded queue) │   │ (tag ⇄ MessageType)│  │
//! │  └─────────────┘   └──────────────────┘   └─────────┬──────────┘  │
//! │                                                      │             │
//! │                     ┌────────────────────────────────┴──────────┐  │
//! │                     │               MessageBus                  │  │
//! │                     │  (typed subscriptions, no echo to sender) │  │
//! │                     └───────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Frame`]: one checksummed frame on the wire
//! - [`Transport`]: stream connection that reconnects within a budget
//! - [`BufferedTransport`]: outbound queue that never drops a frame
//! - [`MessageBus`]: publish/subscribe hub keyed by [`MessageType`]
//! - [`ProtocolAdapter`]: bridge between a transport and the bus
//! - [`TcpListenerService`] / [`UdpListenerService`]: accept remote peers
//!
//! # Module Overview
//!
//! - [`transport`]: frame codec, stream, buffered and datagram transports
//! - [`message`]: message trait, type descriptors and registry
//! - [`messages`]: the built-in flight message set
//! - [`bus`]: message bus and listeners
//! - [`adapter`]: mapping table and protocol adapter
//! - [`listener`]: TCP and UDP listener services
//! - [`config`]: TOML configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod bus;
pub mod config;
pub mod listener;
pub mod message;
pub mod messages;
pub mod transport;

// Re-exports for convenience
pub use adapter::{
    AdapterBuilder, AdapterError, MappingConfig, MappingEntry, MappingError, MappingTable,
    ProtocolAdapter,
};
pub use bus::{BusError, ListenerError, ListenerId, MessageBus, MessageListener, MessageLogger};
pub use message::{shared, Message, MessageError, MessageRegistry, MessageType, ANY_MESSAGE};
pub use messages::{
    CommandData, ControllerGains, EnableSensors, GroundReport, IdleLimit, JaviatorData,
    MotorOffsets, MotorSignals, PilotCommand, PilotData, PositionControllerParameters,
    RevvingParameters, SensorData, SimulationData, TrimValues, YawControllerParameters,
};
pub use transport::{
    BufferConfig, BufferedTransport, ConnectionKind, ConnectionSpec, DatagramTransport, Frame,
    FrameError, FrameTransport, Transport, TransportConfig, TransportError,
};

// Listener exports
pub use listener::{
    ServiceError, TcpListenerConfig, TcpListenerService, UdpListenerConfig, UdpListenerService,
};

// Config exports
pub use config::{default_config_path, load_config, load_config_from_path, ConfigError, SkylinkConfig};
