use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};

use super::handshake::*;
use crate::config::HandshakeConfig;
use crate::error::Result;
use crate::exec::Executor;
use crate::rdma::qp::{Qp, QpFactory};

/// Passive side of connection setup.
///
/// For every inbound byte stream, the acceptor first reads the peer's
/// [`QpHandshake`], then creates a local queue pair, brings it up with the
/// peer's parameters, and answers with its own handshake. Receiving before
/// sending is what keeps an acceptor and a [`Connector`](super::Connector),
/// which always sends first, from waiting on each other.
pub struct Acceptor {
    listener: Option<TcpListener>,
    factory: Arc<dyn QpFactory>,
    exec: Arc<Executor>,
    user_data: Bytes,
    max_user_data: usize,
}

impl Acceptor {
    /// Listen on `addr`.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        factory: Arc<dyn QpFactory>,
        exec: Arc<Executor>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, factory, exec))
    }

    /// Accept connections from an existing listener.
    pub fn from_listener(
        listener: TcpListener,
        factory: Arc<dyn QpFactory>,
        exec: Arc<Executor>,
    ) -> Self {
        let mut acceptor = Self::detached(factory, exec);
        acceptor.listener = Some(listener);
        acceptor
    }

    /// Create an acceptor without a listener, for streams obtained elsewhere
    /// and handed to [`accept_on`](Self::accept_on).
    pub fn detached(factory: Arc<dyn QpFactory>, exec: Arc<Executor>) -> Self {
        Self {
            listener: None,
            factory,
            exec,
            user_data: Bytes::new(),
            max_user_data: HandshakeConfig::default().max_user_data,
        }
    }

    /// Set the user data sent to every peer.
    pub fn with_user_data(mut self, user_data: impl Into<Bytes>) -> Self {
        self.user_data = user_data.into();
        self
    }

    /// Apply handshake settings.
    pub fn with_config(mut self, config: &HandshakeConfig) -> Self {
        self.max_user_data = config.max_user_data;
        self
    }

    /// Local address of the listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "acceptor has no listener")),
        }
    }

    /// Wait for one inbound connection and set up a queue pair over it.
    ///
    /// The byte stream is closed when this returns, whether or not the
    /// handshake succeeded.
    pub async fn accept(&self) -> Result<Qp> {
        let listener = self.listener.as_ref().ok_or_else(|| {
            HandshakeError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "acceptor has no listener",
            ))
        })?;
        log::debug!("cordma: acceptor {}", HandshakeState::Listening);
        let (stream, peer_addr) = listener.accept().await.map_err(HandshakeError::Io)?;
        log::debug!("cordma: acceptor {} from {}", HandshakeState::Accepted, peer_addr);
        self.accept_on(stream).await
    }

    /// Set up a queue pair over an already established byte stream.
    pub async fn accept_on<S>(&self, mut stream: S) -> Result<Qp>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer = recv_handshake(&mut stream, self.max_user_data).await?;
        log::debug!(
            "cordma: acceptor {} peer {}",
            HandshakeState::Received,
            peer.endpoint()
        );

        let raw = self.factory.create_qp().map_err(HandshakeError::from)?;
        let mut qp = Qp::new(raw, self.exec.clone());
        qp.bind_peer(peer).map_err(HandshakeError::Connect)?;

        let local = QpHandshake::new(qp.endpoint(), self.user_data.clone());
        send_handshake(&mut stream, &local).await?;
        log::debug!("cordma: acceptor {} local {}", HandshakeState::Sent, local.endpoint());

        log::debug!("cordma: acceptor {}", HandshakeState::Ready);
        Ok(qp)
    }
}
