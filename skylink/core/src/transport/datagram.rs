//! Datagram Transport
//!
//! One frame per UDP datagram. Two modes:
//!
//! - **Server**: bound to a local port, learns its peers from incoming
//!   datagrams and sends every outbound frame to each peer heard from within
//!   the client timeout. Peers that went quiet are forgotten.
//! - **Client**: talks to one fixed remote address.
//!
//! Every datagram stands alone, so a corrupted one is reported and the next
//! receive carries on.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::watch;

use super::frame::{read_frame, Frame, MAX_PAYLOAD_SIZE};
use super::traits::{FrameTransport, TransportError};

/// Largest datagram a valid frame produces: marker, type, length, payload, checksum
const MAX_DATAGRAM_SIZE: usize = 4 + MAX_PAYLOAD_SIZE + 2;

#[derive(Debug, Clone, Copy)]
enum Mode {
    Server { client_timeout: Duration },
    Client { remote: SocketAddr },
}

/// Frame transport over a UDP socket
#[derive(Debug)]
pub struct DatagramTransport {
    socket: UdpSocket,
    mode: Mode,
    /// Peer address and when it was last heard from
    peers: DashMap<SocketAddr, Instant>,
    receive_timeout: Duration,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl DatagramTransport {
    /// Bind a server-mode transport to `addr`
    ///
    /// `receive_timeout` bounds each socket wait, `client_timeout` is how
    /// long a silent peer keeps receiving frames.
    ///
    /// # Errors
    ///
    /// Returns the bind failure.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        receive_timeout: Duration,
        client_timeout: Duration,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(local = %socket.local_addr()?, "Datagram transport bound");
        Ok(Self::with_socket(
            socket,
            Mode::Server { client_timeout },
            receive_timeout,
        ))
    }

    /// Create a client-mode transport sending to `remote`
    ///
    /// # Errors
    ///
    /// Returns resolution or bind failures.
    pub async fn connect(remote: impl ToSocketAddrs, receive_timeout: Duration) -> io::Result<Self> {
        let remote = tokio::net::lookup_host(remote)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;
        let local = if remote.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::with_socket(socket, Mode::Client { remote }, receive_timeout))
    }

    fn with_socket(socket: UdpSocket, mode: Mode, receive_timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            socket,
            mode,
            peers: DashMap::new(),
            receive_timeout,
            closed: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Local socket address
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Number of peers currently known
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Send `frame` to the remote (client) or every active peer (server)
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once terminated and
    /// [`TransportError::Link`] for socket failures.
    pub async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.is_terminated() {
            return Err(TransportError::Closed);
        }
        let bytes = frame.encode();

        match self.mode {
            Mode::Client { remote } => {
                self.socket
                    .send_to(&bytes, remote)
                    .await
                    .map_err(|e| TransportError::Link(e.into()))?;
            }
            Mode::Server { client_timeout } => {
                let now = Instant::now();
                self.peers.retain(|peer, last_heard| {
                    let active = now.duration_since(*last_heard) <= client_timeout;
                    if !active {
                        tracing::debug!(peer = %peer, "Dropping stale datagram peer");
                    }
                    active
                });
                let peers: Vec<SocketAddr> = self.peers.iter().map(|entry| *entry.key()).collect();
                for peer in peers {
                    if let Err(e) = self.socket.send_to(&bytes, peer).await {
                        tracing::warn!(peer = %peer, error = %e, "Datagram send failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Receive the next frame
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once terminated and
    /// [`TransportError::Link`] for socket failures and malformed datagrams.
    pub async fn receive(&self) -> Result<Frame, TransportError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            if self.is_terminated() {
                return Err(TransportError::Closed);
            }
            let waited = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => return Err(TransportError::Closed),
                waited = tokio::time::timeout(self.receive_timeout, self.socket.recv_from(&mut buffer)) => waited,
            };
            let Ok(received) = waited else {
                continue;
            };
            let (len, peer) = received.map_err(|e| TransportError::Link(e.into()))?;

            match self.mode {
                Mode::Server { .. } => {
                    if self.peers.insert(peer, Instant::now()).is_none() {
                        tracing::info!(peer = %peer, "New datagram peer");
                    }
                }
                Mode::Client { remote } if remote != peer => {
                    tracing::debug!(peer = %peer, "Ignoring datagram from unknown sender");
                    continue;
                }
                Mode::Client { .. } => {}
            }

            let mut datagram = &buffer[..len];
            return match read_frame(&mut datagram).await {
                Ok(frame) if datagram.is_empty() => Ok(frame),
                Ok(frame) => {
                    tracing::debug!(tag = frame.tag(), trailing = datagram.len(), "Ignoring trailing datagram bytes");
                    Ok(frame)
                }
                Err(e) => Err(TransportError::Link(e)),
            };
        }
    }

    /// Stop the transport; idempotent
    pub fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        self.peers.clear();
        tracing::info!("Datagram transport terminated");
    }

    /// Whether [`terminate`](Self::terminate) has been called
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameTransport for DatagramTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        DatagramTransport::send(self, &frame).await
    }

    async fn receive(&self) -> Result<Frame, TransportError> {
        DatagramTransport::receive(self).await
    }

    async fn terminate(&self) {
        DatagramTransport::terminate(self);
    }

    fn is_terminated(&self) -> bool {
        DatagramTransport::is_terminated(self)
    }

    fn can_recover(&self) -> bool {
        true
    }
}
