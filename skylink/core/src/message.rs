//! Messages and Message Types
//!
//! A message is a typed value that knows its wire encoding. Every concrete
//! message kind is described by a static [`MessageType`]: its name, the
//! families it belongs to and how to decode it from a frame payload.
//!
//! # Type Families
//!
//! Message types form a family tree rooted at [`ANY_MESSAGE`]. A type is a
//! member of itself and of every family reachable through its parents:
//!
//! ```text
//!                 Message (ANY_MESSAGE)
//!        ┌──────────┬─────┴──────┬────────────────────┐
//!  CommandData  MotorSignals  IdleLimit     ControllerParameters
//!                                          ┌──────────┴──────────┐
//!                                   PositionController    YawController
//!                                       Parameters          Parameters
//! ```
//!
//! Bus subscriptions are made against a family and receive every member.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;

use crate::messages;

/// Decodes a frame payload into a message
pub type DecodeFn = fn(&[u8]) -> Result<Arc<dyn Message>, MessageError>;

/// Errors raised while decoding message payloads
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// Payload has the wrong size for the message kind
    #[error("{message_type}: payload length of {actual} bytes does not match the expected {expected} bytes")]
    PayloadLength {
        /// Message type being decoded
        message_type: &'static str,
        /// Required payload length
        expected: usize,
        /// Length actually received
        actual: usize,
    },

    /// Family types have no wire encoding of their own
    #[error("{0} is a message family and cannot be decoded")]
    Abstract(&'static str),
}

/// Descriptor of a message kind or family
///
/// Identity is by name, which must be unique across a registry.
pub struct MessageType {
    /// Unique name, referenced by mapping configuration
    pub name: &'static str,
    /// Direct parent families
    pub parents: &'static [&'static MessageType],
    /// Payload decoder, `None` for abstract families
    pub decoder: Option<DecodeFn>,
}

impl MessageType {
    /// Unique name
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this type is a family without its own encoding
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.decoder.is_none()
    }

    /// Whether this type equals `family` or descends from it
    #[must_use]
    pub fn is_a(&self, family: &MessageType) -> bool {
        self == family || self.parents.iter().any(|parent| parent.is_a(family))
    }

    /// Whether this type belongs to the message tree at all
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.is_a(&ANY_MESSAGE)
    }

    /// Decode a frame payload into a message of this type
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Abstract`] for families and whatever the
    /// decoder reports for malformed payloads.
    pub fn decode(&self, payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
        let decode = self.decoder.ok_or(MessageError::Abstract(self.name))?;
        decode(payload)
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType")
            .field("name", &self.name)
            .field("parents", &self.parents.iter().map(|p| p.name).collect::<Vec<_>>())
            .field("abstract", &self.is_abstract())
            .finish()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Root of the message type tree; subscribing to it receives everything
pub static ANY_MESSAGE: MessageType = MessageType {
    name: "Message",
    parents: &[],
    decoder: None,
};

/// A typed value that can travel in a frame payload
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Static descriptor of this message's kind
    fn message_type(&self) -> &'static MessageType;

    /// Wire encoding of the message
    fn to_bytes(&self) -> Vec<u8>;

    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;
}

impl dyn Message {
    /// Downcast to a concrete message type
    #[must_use]
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Whether the message is of concrete type `T`
    #[must_use]
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Move a message behind a shared pointer, ready for the bus
pub fn shared<M: Message>(message: M) -> Arc<dyn Message> {
    Arc::new(message)
}

/// Name lookup for message types referenced by configuration
#[derive(Clone, Debug, Default)]
pub struct MessageRegistry {
    types: HashMap<&'static str, &'static MessageType>,
}

impl MessageRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bundled message type and family
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(&ANY_MESSAGE);
        for message_type in messages::ALL_TYPES {
            registry.register(message_type);
        }
        registry
    }

    /// Add a type, replacing any previous type of the same name
    pub fn register(&mut self, message_type: &'static MessageType) -> &mut Self {
        if let Some(previous) = self.types.insert(message_type.name, message_type) {
            tracing::debug!(name = previous.name, "Replaced registered message type");
        }
        self
    }

    /// Look up a type by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'static MessageType> {
        self.types.get(name).copied()
    }

    /// Number of registered types
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
