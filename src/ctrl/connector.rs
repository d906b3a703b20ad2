use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};

use super::handshake::*;
use crate::config::HandshakeConfig;
use crate::error::Result;
use crate::exec::Executor;
use crate::rdma::qp::{Qp, QpFactory};

/// Active side of connection setup.
///
/// The connector creates its queue pair up front, sends its
/// [`QpHandshake`], then reads the peer's answer and brings the queue pair
/// up with it.
pub struct Connector {
    factory: Arc<dyn QpFactory>,
    exec: Arc<Executor>,
    user_data: Bytes,
    max_user_data: usize,
}

impl Connector {
    pub fn new(factory: Arc<dyn QpFactory>, exec: Arc<Executor>) -> Self {
        Self {
            factory,
            exec,
            user_data: Bytes::new(),
            max_user_data: HandshakeConfig::default().max_user_data,
        }
    }

    /// Set the user data sent to the peer.
    pub fn with_user_data(mut self, user_data: impl Into<Bytes>) -> Self {
        self.user_data = user_data.into();
        self
    }

    /// Apply handshake settings.
    pub fn with_config(mut self, config: &HandshakeConfig) -> Self {
        self.max_user_data = config.max_user_data;
        self
    }

    /// Locally connect two QPs, without involving any networking.
    pub fn connect_local(first: &mut Qp, second: &mut Qp) -> io::Result<()> {
        let ep_first = first.endpoint();
        let ep_second = second.endpoint();

        first.bind_peer(QpHandshake::new(ep_second, Bytes::new()))?;
        second.bind_peer(QpHandshake::new(ep_first, Bytes::new()))
    }

    /// Connect to an acceptor at `addr` and set up a queue pair.
    ///
    /// No retry is attempted; the byte stream is closed when this returns.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> Result<Qp> {
        let stream = TcpStream::connect(addr).await.map_err(HandshakeError::Io)?;
        log::debug!("cordma: connector {}", HandshakeState::Connecting);
        self.connect_on(stream).await
    }

    /// Set up a queue pair over an already established byte stream.
    pub async fn connect_on<S>(&self, mut stream: S) -> Result<Qp>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let raw = self.factory.create_qp().map_err(HandshakeError::from)?;
        let mut qp = Qp::new(raw, self.exec.clone());

        let local = QpHandshake::new(qp.endpoint(), self.user_data.clone());
        send_handshake(&mut stream, &local).await?;
        log::debug!("cordma: connector {} local {}", HandshakeState::Sent, local.endpoint());

        let peer = recv_handshake(&mut stream, self.max_user_data).await?;
        log::debug!(
            "cordma: connector {} peer {}",
            HandshakeState::Received,
            peer.endpoint()
        );

        qp.bind_peer(peer).map_err(HandshakeError::Connect)?;
        log::debug!("cordma: connector {}", HandshakeState::Ready);
        Ok(qp)
    }
}
