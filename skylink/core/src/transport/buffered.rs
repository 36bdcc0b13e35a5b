//! Buffered Transport
//!
//! Decouples producers from link latency: `send` enqueues into a bounded
//! queue and returns, a dedicated sender task drains the queue onto the
//! wrapped transport.
//!
//! ```text
//!  producers ──► [ bounded queue ] ──► sender task ──► inner.send()
//!     ▲  blocks when full                   │ fails: keep frame at head,
//!     └─────────────────────────────────────┘ wait, retry
//! ```
//!
//! A frame that fails to send stays at the head of the queue and is retried
//! after the reconnection timeout, so nothing is dropped while the link is
//! down. When the wrapped transport cannot recover, the sender task stops
//! and later sends fail with [`TransportError::Closed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::config::{BufferConfig, TransportConfig};
use super::frame::Frame;
use super::stream::Transport;
use super::traits::{FrameTransport, TransportError};

/// Frame transport whose sends go through a bounded queue
pub struct BufferedTransport {
    inner: Arc<dyn FrameTransport>,
    queue: mpsc::Sender<Frame>,
    capacity: usize,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    sender_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BufferedTransport {
    /// Wrap `inner`, retrying failed frames every `retry_interval`
    ///
    /// Spawns the sender task, so this must be called inside a Tokio runtime.
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(inner: Arc<dyn FrameTransport>, config: &BufferConfig, retry_interval: Duration) -> Self {
        let capacity = config.capacity.max(1);
        let (queue, pending) = mpsc::channel(capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let sender_task = tokio::spawn(drain_queue(
            Arc::clone(&inner),
            pending,
            shutdown_rx,
            retry_interval,
        ));

        Self {
            inner,
            queue,
            capacity,
            closed: AtomicBool::new(false),
            shutdown,
            sender_task: parking_lot::Mutex::new(Some(sender_task)),
        }
    }

    /// Connect a [`Transport`] as described by `transport` and buffer it
    ///
    /// Failed frames are retried after the configured reconnection timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::connect`].
    pub async fn connect(
        transport: &TransportConfig,
        buffer: &BufferConfig,
    ) -> Result<Self, TransportError> {
        let inner = Transport::connect(transport).await?;
        Ok(Self::new(
            Arc::new(inner),
            buffer,
            transport.reconnection_timeout(),
        ))
    }

    /// Enqueue a frame, waiting while the queue is full
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once terminated or after the sender
    /// task stopped on an unrecoverable link.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_terminated() {
            return Err(TransportError::Closed);
        }
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => Err(TransportError::Closed),
            sent = self.queue.send(frame) => sent.map_err(|_| TransportError::Closed),
        }
    }

    /// Frames waiting in the queue
    #[must_use]
    pub fn queued(&self) -> usize {
        self.capacity.saturating_sub(self.queue.capacity())
    }

    /// Maximum number of frames the queue holds
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop the sender task and terminate the wrapped transport; idempotent
    ///
    /// Frames still queued are discarded.
    pub async fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        self.inner.terminate().await;

        let sender_task = self.sender_task.lock().take();
        if let Some(handle) = sender_task {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Sender task ended abnormally");
            }
        }
        tracing::debug!("Buffered transport terminated");
    }

    /// Whether [`terminate`](Self::terminate) has been called
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameTransport for BufferedTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        BufferedTransport::send(self, frame).await
    }

    async fn receive(&self) -> Result<Frame, TransportError> {
        if self.is_terminated() {
            return Err(TransportError::Closed);
        }
        self.inner.receive().await
    }

    async fn terminate(&self) {
        BufferedTransport::terminate(self).await;
    }

    fn is_terminated(&self) -> bool {
        BufferedTransport::is_terminated(self)
    }

    fn can_recover(&self) -> bool {
        self.inner.can_recover()
    }
}

/// Sender task: move frames from the queue onto the wire, head first
async fn drain_queue(
    inner: Arc<dyn FrameTransport>,
    mut pending: mpsc::Receiver<Frame>,
    mut shutdown: watch::Receiver<bool>,
    retry_interval: Duration,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => break,
            next = pending.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        loop {
            let sent = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => return,
                sent = inner.send(frame.clone()) => sent,
            };
            match sent {
                Ok(()) => break,
                Err(TransportError::Closed) => return,
                Err(e) if inner.can_recover() => {
                    tracing::warn!(
                        tag = frame.tag(),
                        error = %e,
                        "Send failed, keeping frame at the head of the queue"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|closed| *closed) => return,
                        () = tokio::time::sleep(retry_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(
                        tag = frame.tag(),
                        error = %e,
                        "Link lost and cannot be re-established, stopping sender"
                    );
                    return;
                }
            }
        }
    }
    tracing::debug!("Sender task stopped");
}
