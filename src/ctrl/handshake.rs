use std::fmt;
use std::io;

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::rdma::qp::{QpCreationError, QpEndpoint};
use crate::rdma::type_alias::*;
use crate::wire::{self, DecodeError};

/// Handshake error type.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The byte stream failed.
    #[error("handshake I/O error")]
    Io(#[from] io::Error),

    /// The peer sent a malformed handshake.
    #[error("malformed handshake")]
    Decode(#[from] DecodeError),

    /// The peer sent more user data than allowed.
    #[error("peer user data exceeds {limit} bytes")]
    UserDataTooLarge { limit: usize },

    /// The local queue pair could not be created.
    #[error("cannot create local queue pair")]
    QpCreation(#[from] QpCreationError),

    /// The local queue pair could not be brought up with the peer's
    /// parameters.
    #[error("cannot connect queue pair to peer")]
    Connect(#[source] io::Error),
}

/// Progress of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for an inbound byte-stream connection.
    Listening,
    /// Inbound byte stream established.
    Accepted,
    /// Outbound byte stream established.
    Connecting,
    /// Local parameters written.
    Sent,
    /// Peer parameters read.
    Received,
    /// Queue pair is routable; the byte stream is no longer needed.
    Ready,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parameters one side sends to stand up a reliable connection.
///
/// Wire form, network byte order:
///
/// | field     | width     |
/// |-----------|-----------|
/// | lid       | 2         |
/// | qp_num    | 4         |
/// | sq_psn    | 4         |
/// | user_data | remainder |
///
/// There is no length prefix: `user_data` extends to the end of the
/// message, which is the end of the sender's half of the byte stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QpHandshake {
    pub lid: Lid,
    pub qp_num: Qpn,
    pub sq_psn: Psn,
    pub user_data: Bytes,
}

impl QpHandshake {
    /// Size of the fixed fields.
    pub const HEADER_SIZE: usize = 10;

    pub fn new(ep: QpEndpoint, user_data: impl Into<Bytes>) -> Self {
        Self {
            lid: ep.lid,
            qp_num: ep.qpn,
            sq_psn: ep.psn,
            user_data: user_data.into(),
        }
    }

    /// Routable parameters of the sender's queue pair.
    #[inline]
    pub fn endpoint(&self) -> QpEndpoint {
        QpEndpoint::new(self.lid, self.qp_num, self.sq_psn)
    }

    /// Opaque application payload.
    #[inline]
    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    /// Append the wire form to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        wire::put(buf, self.lid);
        wire::put(buf, self.qp_num);
        wire::put(buf, self.sq_psn);
        buf.put_slice(&self.user_data);
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.user_data.len());
        self.encode(&mut buf);
        buf
    }

    /// Parse a whole message. Everything after the fixed fields is taken as
    /// user data, so `buf` is always fully consumed on success.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        wire::ensure(buf, Self::HEADER_SIZE)?;
        let lid = wire::get(buf)?;
        let qp_num = wire::get(buf)?;
        let sq_psn = wire::get(buf)?;
        let user_data = buf.copy_to_bytes(buf.remaining());
        Ok(Self {
            lid,
            qp_num,
            sq_psn,
            user_data,
        })
    }
}

/// Write a handshake and close the write half of the stream, which marks
/// the end of the message.
pub async fn send_handshake<S>(stream: &mut S, hs: &QpHandshake) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&hs.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read a handshake up to the end of the peer's half of the stream.
///
/// Fail with [`HandshakeError::UserDataTooLarge`] as soon as the peer sends
/// more than `max_user_data` bytes of user data.
pub async fn recv_handshake<S>(
    stream: &mut S,
    max_user_data: usize,
) -> Result<QpHandshake, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let limit = QpHandshake::HEADER_SIZE.saturating_add(max_user_data);
    let mut buf = Vec::with_capacity(limit.min(4096));
    (&mut *stream)
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut buf)
        .await?;
    if buf.len() > limit {
        return Err(HandshakeError::UserDataTooLarge {
            limit: max_user_data,
        });
    }
    Ok(QpHandshake::decode(&mut &buf[..])?)
}
