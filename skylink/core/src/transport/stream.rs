//! Reconnecting Stream Transport
//!
//! Carries frames over one byte-stream connection. When a send or receive
//! fails and the transport knows how to open a new connection, it reconnects
//! and retries transparently, up to a per-call budget.
//!
//! # Reconnection
//!
//! Only one reconnect runs at a time. Every finished attempt, successful or
//! not, advances an epoch counter. A caller that fails on a link remembers
//! the epoch it saw; if the epoch has moved on by the time it gets to
//! reconnect, someone else already did the work and the caller adopts that
//! outcome instead of tearing down a fresh connection.
//!
//! ```text
//!  task A: send fails (epoch 4) ──► reconnect ──► new link, epoch 5
//!  task B: recv fails (epoch 4) ──► waits ──────► epoch moved, retry on new link
//! ```

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};

use super::config::{TransportConfig, DEFAULT_MAXIMUM_RECONNECTS, DEFAULT_RECONNECTION_TIMEOUT_MS};
use super::factory::{create_connection_factory, ConnectionFactory};
use super::frame::{read_frame, Frame, FrameError};
use super::traits::{BoxedConnection, FrameTransport, TransportError};

/// One live connection, split for concurrent reading and writing
struct Link {
    generation: u64,
    reader: Mutex<BufReader<ReadHalf<BoxedConnection>>>,
    writer: Mutex<WriteHalf<BoxedConnection>>,
    /// Flipped once the link has been replaced or closed
    abandoned: watch::Sender<bool>,
}

impl Link {
    fn new(connection: BoxedConnection, generation: u64) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(connection);
        let (abandoned, _) = watch::channel(false);
        Arc::new(Self {
            generation,
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            abandoned,
        })
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), FrameError> {
        self.unless_abandoned(async {
            let mut writer = self.writer.lock().await;
            writer.write_all(bytes).await?;
            writer.flush().await?;
            Ok::<(), FrameError>(())
        })
        .await
    }

    async fn read(&self) -> Result<Frame, FrameError> {
        self.unless_abandoned(async {
            let mut reader = self.reader.lock().await;
            read_frame(&mut *reader).await
        })
        .await
    }

    /// Run `op` but fail as soon as the link is abandoned
    async fn unless_abandoned<T>(
        &self,
        op: impl Future<Output = Result<T, FrameError>>,
    ) -> Result<T, FrameError> {
        let mut abandoned = self.abandoned.subscribe();
        tokio::select! {
            biased;
            _ = abandoned.wait_for(|gone| *gone) => Err(FrameError::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection was replaced",
            ))),
            result = op => result,
        }
    }

    fn abandon(&self) {
        self.abandoned.send_replace(true);
    }
}

/// Failure of the most recent reconnect, replayed to waiters that share it
#[derive(Clone, Debug)]
struct ReconnectFailure {
    kind: io::ErrorKind,
    message: String,
}

impl ReconnectFailure {
    fn to_error(&self) -> FrameError {
        FrameError::Io(io::Error::new(self.kind, self.message.clone()))
    }
}

/// Frame transport over a single reconnectable stream connection
///
/// Safe to share between one receiving task and any number of sending
/// tasks. Sends are serialized so frames never interleave on the wire.
pub struct Transport {
    link: RwLock<Option<Arc<Link>>>,
    factory: Option<Arc<dyn ConnectionFactory>>,
    reconnection_timeout: Duration,
    maximum_reconnects: u32,
    /// Finished reconnect attempts, only advanced while `link` is write-locked
    epoch: AtomicU64,
    /// Successful connections so far
    generation: AtomicU64,
    /// Single-flight gate, holds the outcome of the latest attempt
    reconnect_gate: Mutex<Option<ReconnectFailure>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("target", &self.factory.as_ref().map(|factory| factory.target()))
            .field("generation", &self.generation())
            .field("connected", &self.is_connected())
            .field("closed", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Connect as described by `config`
    ///
    /// The transport keeps the configured target and reconnects to it on
    /// link failure.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnsupportedConnectionKind`] or
    /// [`TransportError::NullConnection`] for unusable configs and
    /// [`TransportError::Connect`] when the first connection attempt fails.
    pub async fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let factory = create_connection_factory(config)?;
        let connection = factory
            .connect()
            .await
            .map_err(|source| TransportError::Connect {
                target: factory.target(),
                source,
            })?;

        tracing::info!(
            target_addr = %factory.target(),
            maximum_reconnects = config.maximum_reconnects,
            "Transport connected"
        );

        Self::builder()
            .connection(connection)
            .factory(factory)
            .reconnection_timeout(config.reconnection_timeout())
            .maximum_reconnects(config.maximum_reconnects)
            .build()
    }

    /// Wrap an already established connection without reconnect support
    #[must_use]
    pub fn from_connection(connection: BoxedConnection) -> Self {
        Self::assemble(
            connection,
            None,
            Duration::from_millis(DEFAULT_RECONNECTION_TIMEOUT_MS),
            0,
        )
    }

    /// Start building a transport from parts
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    fn assemble(
        connection: BoxedConnection,
        factory: Option<Arc<dyn ConnectionFactory>>,
        reconnection_timeout: Duration,
        maximum_reconnects: u32,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            link: RwLock::new(Some(Link::new(connection, 1))),
            factory,
            reconnection_timeout,
            maximum_reconnects,
            epoch: AtomicU64::new(0),
            generation: AtomicU64::new(1),
            reconnect_gate: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Send one frame, reconnecting and retrying on link failure
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once terminated,
    /// [`TransportError::Link`] when the link fails and there is no way to
    /// reconnect, or [`TransportError::ReconnectBudgetExhausted`] when this
    /// call ran out of reconnects.
    pub async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let bytes: Arc<[u8]> = frame.encode().into();
        self.until_terminated(self.with_link(move |link| {
            let bytes = Arc::clone(&bytes);
            async move { link.write(&bytes).await }.boxed()
        }))
        .await
    }

    /// Receive the next frame, reconnecting and retrying on link failure
    ///
    /// Decode failures such as checksum mismatches count as link failures.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn receive(&self) -> Result<Frame, TransportError> {
        self.until_terminated(self.with_link(|link| async move { link.read().await }.boxed()))
            .await
    }

    /// Close the connection; idempotent
    pub async fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        let link = self.link.write().take();
        if let Some(link) = link {
            link.abandon();
            // A writer still holding the lock is about to observe shutdown
            if let Ok(mut writer) = link.writer.try_lock() {
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!(error = %e, "Error shutting down connection");
                }
            }
        }
        tracing::info!(generation = self.generation(), "Transport terminated");
    }

    /// Whether [`terminate`](Self::terminate) has been called
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether a live connection is currently installed
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.read().is_some()
    }

    /// Number of connections established so far, the first one included
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether this transport can replace a failed connection
    #[must_use]
    pub fn can_reconnect(&self) -> bool {
        self.factory.is_some()
    }

    /// Pause before each reconnect attempt
    #[must_use]
    pub fn reconnection_timeout(&self) -> Duration {
        self.reconnection_timeout
    }

    /// Reconnect budget of a single call
    #[must_use]
    pub fn maximum_reconnects(&self) -> u32 {
        self.maximum_reconnects
    }

    async fn until_terminated<T>(
        &self,
        op: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => Err(TransportError::Closed),
            result = op => result,
        }
    }

    /// Current epoch and link, read consistently
    fn snapshot(&self) -> (u64, Option<Arc<Link>>) {
        let link = self.link.read();
        (self.epoch.load(Ordering::SeqCst), link.clone())
    }

    /// Run `op` against the current link, reconnecting on failure
    async fn with_link<T, F>(&self, op: F) -> Result<T, TransportError>
    where
        F: Fn(Arc<Link>) -> BoxFuture<'static, Result<T, FrameError>>,
    {
        let mut attempts = 0u32;
        let mut pending: Option<FrameError> = None;

        loop {
            if self.is_terminated() {
                return Err(TransportError::Closed);
            }

            let (epoch, link) = self.snapshot();
            let cause = match link {
                Some(link) => match op(link).await {
                    Ok(value) => return Ok(value),
                    Err(e) => e,
                },
                None => pending.take().unwrap_or_else(|| {
                    FrameError::Io(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "no connection established",
                    ))
                }),
            };

            if self.is_terminated() {
                return Err(TransportError::Closed);
            }
            let Some(factory) = self.factory.as_ref() else {
                return Err(TransportError::Link(cause));
            };
            if attempts >= self.maximum_reconnects {
                tracing::error!(
                    attempts,
                    error = %cause,
                    "Exceeded the maximum number of allowed reconnects"
                );
                return Err(TransportError::ReconnectBudgetExhausted {
                    attempts,
                    source: cause,
                });
            }

            attempts += 1;
            tracing::warn!(
                attempt = attempts,
                maximum = self.maximum_reconnects,
                error = %cause,
                "Link failed, reconnecting"
            );
            if let Err(e) = self.reconnect(epoch, factory).await {
                pending = Some(e);
            }
        }
    }

    /// Replace the connection unless another caller already did since `seen_epoch`
    async fn reconnect(
        &self,
        seen_epoch: u64,
        factory: &Arc<dyn ConnectionFactory>,
    ) -> Result<(), FrameError> {
        let mut last_failure = self.reconnect_gate.lock().await;
        if self.epoch.load(Ordering::SeqCst) != seen_epoch {
            return match last_failure.as_ref() {
                None => Ok(()),
                Some(failure) => Err(failure.to_error()),
            };
        }

        let stale = self.link.write().take();
        if let Some(stale) = stale {
            stale.abandon();
            tracing::debug!(generation = stale.generation, "Closed failed connection");
        }

        tokio::time::sleep(self.reconnection_timeout).await;
        let outcome = factory.connect().await;

        let mut link = self.link.write();
        let result = match outcome {
            Ok(_) if self.is_terminated() => Err(FrameError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport terminated during reconnect",
            ))),
            Ok(connection) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *link = Some(Link::new(connection, generation));
                *last_failure = None;
                tracing::info!(target_addr = %factory.target(), generation, "Reconnected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(target_addr = %factory.target(), error = %e, "Reconnect attempt failed");
                *last_failure = Some(ReconnectFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Err(FrameError::Io(e))
            }
        };
        self.epoch.fetch_add(1, Ordering::SeqCst);
        drop(link);
        result
    }
}

#[async_trait]
impl FrameTransport for Transport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        Transport::send(self, &frame).await
    }

    async fn receive(&self) -> Result<Frame, TransportError> {
        Transport::receive(self).await
    }

    async fn terminate(&self) {
        Transport::terminate(self).await;
    }

    fn is_terminated(&self) -> bool {
        Transport::is_terminated(self)
    }

    fn can_recover(&self) -> bool {
        self.can_reconnect()
    }
}

/// Builder for [`Transport`]
pub struct TransportBuilder {
    connection: Option<BoxedConnection>,
    factory: Option<Arc<dyn ConnectionFactory>>,
    reconnection_timeout: Duration,
    maximum_reconnects: u32,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self {
            connection: None,
            factory: None,
            reconnection_timeout: Duration::from_millis(DEFAULT_RECONNECTION_TIMEOUT_MS),
            maximum_reconnects: DEFAULT_MAXIMUM_RECONNECTS,
        }
    }
}

impl TransportBuilder {
    /// Initial connection, required
    #[must_use]
    pub fn connection(mut self, connection: BoxedConnection) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Source of replacement connections; without one, link failures are final
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Pause before each reconnect attempt
    #[must_use]
    pub fn reconnection_timeout(mut self, timeout: Duration) -> Self {
        self.reconnection_timeout = timeout;
        self
    }

    /// Reconnect budget of a single call
    #[must_use]
    pub fn maximum_reconnects(mut self, maximum: u32) -> Self {
        self.maximum_reconnects = maximum;
        self
    }

    /// Build the transport
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NullConnection`] when no initial connection
    /// was supplied.
    pub fn build(self) -> Result<Transport, TransportError> {
        let connection = self.connection.ok_or(TransportError::NullConnection)?;
        Ok(Transport::assemble(
            connection,
            self.factory,
            self.reconnection_timeout,
            self.maximum_reconnects,
        ))
    }
}
