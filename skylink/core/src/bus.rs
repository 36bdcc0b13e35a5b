//! Message Bus - Type-Family Publish/Subscribe
//!
//! In-process hub connecting message producers and consumers. Listeners
//! subscribe to message types; a subscription to a family receives every
//! member of it (see [`MessageType::is_a`]).
//!
//! # Architecture
//!
//! ```text
//!                          MessageBus
//!              ┌──────────────────────────────────────┐
//!              │ Vec<Subscriber>                      │
//!              │   listener + subscribed types        │
//!              │   wrapped in Arc<RwLock<>>           │
//!              └──────────────────┬───────────────────┘
//!       publish(sender, msg)      │   snapshot matching listeners,
//!                                 │   deliver outside the lock
//!              ┌──────────────────┼───────────────────┐
//!       ┌──────▼──────┐    ┌──────▼──────┐     ┌──────▼──────┐
//!       │ TCP adapter │    │ UDP adapter │     │   Logger    │
//!       │ listener-1  │    │ listener-2  │     │ listener-3  │
//!       └─────────────┘    └─────────────┘     └─────────────┘
//! ```
//!
//! A message is never delivered back to the listener named as its sender.
//! Listeners may subscribe, unsubscribe or publish from inside their own
//! callback, since delivery runs on a snapshot taken before the first call.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use thiserror::Error;

use crate::message::{Message, MessageType, ANY_MESSAGE};

/// Unique identifier of a bus listener
///
/// Used as the sender of published messages to suppress echoes and to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Create a new unique listener ID
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Errors returned by the bus itself
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// Publish was called without a message
    #[error("refusing to send a null message")]
    NullMessage,
}

/// Failure reported by a listener callback
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ListenerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ListenerError {
    /// Failure with a description only
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Failure caused by another error
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Receiver of bus messages
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Stable identity of this listener
    fn listener_id(&self) -> ListenerId;

    /// Handle one message
    ///
    /// Errors and panics are logged by the bus and do not stop delivery to
    /// other listeners.
    async fn on_message(&self, message: Arc<dyn Message>) -> Result<(), ListenerError>;
}

struct Subscriber {
    id: ListenerId,
    listener: Arc<dyn MessageListener>,
    types: Vec<&'static MessageType>,
}

impl Subscriber {
    fn accepts(&self, message_type: &MessageType) -> bool {
        self.types.iter().any(|family| message_type.is_a(family))
    }
}

/// Publish/subscribe hub
///
/// Cloning is cheap; clones share the same subscriptions.
#[derive(Clone, Default)]
pub struct MessageBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("listeners", &self.listener_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl MessageBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to `message_type` and all of its descendants
    ///
    /// Repeated subscriptions are idempotent. Subscribing to
    /// [`ANY_MESSAGE`] replaces the listener's narrower subscriptions.
    pub fn subscribe(&self, listener: Arc<dyn MessageListener>, message_type: &'static MessageType) {
        let id = listener.listener_id();
        let mut subscribers = self.subscribers.write();

        match subscribers.iter_mut().find(|s| s.id == id) {
            Some(subscriber) => {
                if subscriber.types.contains(&&ANY_MESSAGE)
                    || subscriber.types.contains(&message_type)
                {
                    return;
                }
                if *message_type == ANY_MESSAGE {
                    subscriber.types.clear();
                }
                subscriber.types.push(message_type);
            }
            None => subscribers.push(Subscriber {
                id,
                listener,
                types: vec![message_type],
            }),
        }

        tracing::debug!(listener = %id, message_type = message_type.name, "Subscribed");
    }

    /// Remove every subscription of a listener
    ///
    /// Returns `true` if the listener was subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if removed {
            tracing::debug!(listener = %id, "Unsubscribed");
        }
        removed
    }

    /// Deliver `message` to every matching listener except `sender`
    ///
    /// Listeners run one after another on the calling task. Returns the
    /// number of listeners that handled the message without error.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NullMessage`] when called with `None`.
    pub async fn publish(
        &self,
        sender: Option<ListenerId>,
        message: impl Into<Option<Arc<dyn Message>>>,
    ) -> Result<usize, BusError> {
        let Some(message) = message.into() else {
            tracing::warn!("Refusing to send a null message");
            return Err(BusError::NullMessage);
        };
        let message_type = message.message_type();

        let recipients: Vec<(ListenerId, Arc<dyn MessageListener>)> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| Some(s.id) != sender && s.accepts(message_type))
            .map(|s| (s.id, Arc::clone(&s.listener)))
            .collect();

        let mut delivered = 0;
        for (id, listener) in recipients {
            let outcome = AssertUnwindSafe(listener.on_message(Arc::clone(&message)))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => tracing::warn!(
                    listener = %id,
                    message_type = message_type.name,
                    error = %e,
                    "Listener failed to handle message"
                ),
                Err(_) => tracing::error!(
                    listener = %id,
                    message_type = message_type.name,
                    "Listener panicked while handling message"
                ),
            }
        }

        tracing::trace!(message_type = message_type.name, delivered, "Published");
        Ok(delivered)
    }

    /// Number of subscribed listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of (listener, type) subscriptions
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscribers.read().iter().map(|s| s.types.len()).sum()
    }
}

/// Listener that logs every message it receives at debug level
#[derive(Debug, Default)]
pub struct MessageLogger {
    id: ListenerId,
}

impl MessageLogger {
    /// Create a logger with a fresh identity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageListener for MessageLogger {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    async fn on_message(&self, message: Arc<dyn Message>) -> Result<(), ListenerError> {
        tracing::debug!(
            message_type = message.message_type().name,
            message = ?message,
            "Message received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::shared;
    use crate::messages::{
        CommandData, ControllerGains, IdleLimit, PositionControllerParameters,
        YawControllerParameters, COMMAND_DATA, CONTROLLER_PARAMETERS, IDLE_LIMIT,
    };
    use pretty_assertions::assert_eq;

    /// Records what it receives
    #[derive(Default)]
    struct Recorder {
        id: ListenerId,
        received: parking_lot::Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn received(&self) -> Vec<&'static str> {
            self.received.lock().clone()
        }
    }

    #[async_trait]
    impl MessageListener for Recorder {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        async fn on_message(&self, message: Arc<dyn Message>) -> Result<(), ListenerError> {
            self.received.lock().push(message.message_type().name);
            Ok(())
        }
    }

    /// Fails or panics on every message
    struct Faulty {
        id: ListenerId,
        panic: bool,
    }

    #[async_trait]
    impl MessageListener for Faulty {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        async fn on_message(&self, _message: Arc<dyn Message>) -> Result<(), ListenerError> {
            if self.panic {
                panic!("listener exploded");
            }
            Err(ListenerError::new("cannot handle"))
        }
    }

    /// Unsubscribes itself while handling a message
    struct OneShot {
        id: ListenerId,
        bus: MessageBus,
        calls: parking_lot::Mutex<usize>,
    }

    #[async_trait]
    impl MessageListener for OneShot {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        async fn on_message(&self, _message: Arc<dyn Message>) -> Result<(), ListenerError> {
            *self.calls.lock() += 1;
            self.bus.unsubscribe(self.id);
            Ok(())
        }
    }

    /// Brings another listener onto the bus while handling a message
    struct Recruiter {
        id: ListenerId,
        bus: MessageBus,
        recruit: Arc<Recorder>,
    }

    #[async_trait]
    impl MessageListener for Recruiter {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        async fn on_message(&self, _message: Arc<dyn Message>) -> Result<(), ListenerError> {
            self.bus.subscribe(self.recruit.clone(), &COMMAND_DATA);
            Ok(())
        }
    }

    fn command() -> Arc<dyn Message> {
        shared(CommandData::new(1.0, 2.0, 3.0, 4.0))
    }

    fn position_gains() -> Arc<dyn Message> {
        shared(PositionControllerParameters(ControllerGains::default()))
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let a = ListenerId::new();
        let b = ListenerId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("listener-"));
    }

    #[tokio::test]
    async fn test_exact_type_delivery() {
        let bus = MessageBus::new();
        let recorder = Recorder::new();
        bus.subscribe(recorder.clone(), &COMMAND_DATA);

        assert_eq!(bus.publish(None, command()).await.unwrap(), 1);
        assert_eq!(bus.publish(None, shared(IdleLimit { limit: 1 })).await.unwrap(), 0);
        assert_eq!(recorder.received(), vec!["CommandData"]);
    }

    #[tokio::test]
    async fn test_family_subscription_receives_members() {
        let bus = MessageBus::new();
        let recorder = Recorder::new();
        bus.subscribe(recorder.clone(), &CONTROLLER_PARAMETERS);

        bus.publish(None, position_gains()).await.unwrap();
        bus.publish(None, shared(YawControllerParameters(ControllerGains::default())))
            .await
            .unwrap();
        bus.publish(None, command()).await.unwrap();

        assert_eq!(
            recorder.received(),
            vec!["PositionControllerParameters", "YawControllerParameters"]
        );
    }

    #[tokio::test]
    async fn test_sender_does_not_receive_its_own_message() {
        let bus = MessageBus::new();
        let a = Recorder::new();
        let b = Recorder::new();
        bus.subscribe(a.clone(), &COMMAND_DATA);
        bus.subscribe(b.clone(), &COMMAND_DATA);

        let delivered = bus.publish(Some(a.listener_id()), command()).await.unwrap();

        assert_eq!(delivered, 1);
        assert!(a.received().is_empty());
        assert_eq!(b.received(), vec!["CommandData"]);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_delivers_once() {
        let bus = MessageBus::new();
        let recorder = Recorder::new();
        bus.subscribe(recorder.clone(), &COMMAND_DATA);
        bus.subscribe(recorder.clone(), &COMMAND_DATA);

        assert_eq!(bus.subscription_count(), 1);
        bus.publish(None, command()).await.unwrap();
        assert_eq!(recorder.received().len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_subscriptions_deliver_once() {
        let bus = MessageBus::new();
        let recorder = Recorder::new();
        bus.subscribe(recorder.clone(), &CONTROLLER_PARAMETERS);
        bus.subscribe(recorder.clone(), &crate::messages::POSITION_CONTROLLER_PARAMETERS);

        bus.publish(None, position_gains()).await.unwrap();
        assert_eq!(recorder.received().len(), 1);
    }

    #[tokio::test]
    async fn test_root_subscription_collapses_others() {
        let bus = MessageBus::new();
        let recorder = Recorder::new();
        bus.subscribe(recorder.clone(), &COMMAND_DATA);
        bus.subscribe(recorder.clone(), &IDLE_LIMIT);
        bus.subscribe(recorder.clone(), &ANY_MESSAGE);
        bus.subscribe(recorder.clone(), &COMMAND_DATA);

        assert_eq!(bus.listener_count(), 1);
        assert_eq!(bus.subscription_count(), 1);

        bus.publish(None, position_gains()).await.unwrap();
        assert_eq!(recorder.received(), vec!["PositionControllerParameters"]);
    }

    #[tokio::test]
    async fn test_null_message_rejected() {
        let bus = MessageBus::new();
        assert_eq!(
            bus.publish(None, None::<Arc<dyn Message>>).await,
            Err(BusError::NullMessage)
        );
        assert_eq!(
            BusError::NullMessage.to_string(),
            "refusing to send a null message"
        );
    }

    #[tokio::test]
    async fn test_failing_listeners_do_not_block_others() {
        let bus = MessageBus::new();
        let erroring = Arc::new(Faulty {
            id: ListenerId::new(),
            panic: false,
        });
        let panicking = Arc::new(Faulty {
            id: ListenerId::new(),
            panic: true,
        });
        let recorder = Recorder::new();
        bus.subscribe(erroring, &ANY_MESSAGE);
        bus.subscribe(panicking, &ANY_MESSAGE);
        bus.subscribe(recorder.clone(), &ANY_MESSAGE);

        let delivered = bus.publish(None, command()).await.unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(recorder.received(), vec!["CommandData"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_from_callback() {
        let bus = MessageBus::new();
        let one_shot = Arc::new(OneShot {
            id: ListenerId::new(),
            bus: bus.clone(),
            calls: parking_lot::Mutex::new(0),
        });
        bus.subscribe(one_shot.clone(), &ANY_MESSAGE);

        bus.publish(None, command()).await.unwrap();
        bus.publish(None, command()).await.unwrap();

        assert_eq!(*one_shot.calls.lock(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_from_callback() {
        let bus = MessageBus::new();
        let recruit = Recorder::new();
        let recruiter = Arc::new(Recruiter {
            id: ListenerId::new(),
            bus: bus.clone(),
            recruit: recruit.clone(),
        });
        bus.subscribe(recruiter, &ANY_MESSAGE);

        // the recruit joins after the recipients were chosen
        assert_eq!(bus.publish(None, command()).await.unwrap(), 1);
        assert!(recruit.received().is_empty());
        assert_eq!(bus.listener_count(), 2);

        assert_eq!(bus.publish(None, command()).await.unwrap(), 2);
        assert_eq!(recruit.received(), vec!["CommandData"]);
        assert_eq!(bus.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_listener() {
        let bus = MessageBus::new();
        assert!(!bus.unsubscribe(ListenerId::new()));
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = MessageBus::new();
        let recorder = Recorder::new();
        bus.subscribe(recorder.clone(), &ANY_MESSAGE);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    bus.publish(None, command()).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(recorder.received().len(), 200);
    }

    #[tokio::test]
    async fn test_logger_accepts_everything() {
        let bus = MessageBus::new();
        let logger = Arc::new(MessageLogger::new());
        bus.subscribe(logger, &ANY_MESSAGE);
        assert_eq!(bus.publish(None, command()).await.unwrap(), 1);
    }
}
