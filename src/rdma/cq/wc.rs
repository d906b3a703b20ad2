use std::fmt;

use thiserror::Error;

use crate::rdma::type_alias::*;

/// Opcode of a completion queue entry.
///
/// Discriminants follow `enum ibv_wc_opcode`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum WcOpcode {
    /// Send request.
    Send = 0,
    /// RDMA write request.
    RdmaWrite = 1,
    /// RDMA read request.
    RdmaRead = 2,
    /// RDMA compare-and-swap request.
    CompSwap = 3,
    /// RDMA fetch-and-add request.
    FetchAdd = 4,
    /// Memory window bind request.
    BindMw = 5,
    /// Receive request.
    Recv = 128,
    /// Receive request consumed by an RDMA write with immediate data.
    RecvRdmaImm = 129,
}

impl TryFrom<u32> for WcOpcode {
    type Error = u32;

    fn try_from(opcode: u32) -> Result<Self, Self::Error> {
        Ok(match opcode {
            0 => WcOpcode::Send,
            1 => WcOpcode::RdmaWrite,
            2 => WcOpcode::RdmaRead,
            3 => WcOpcode::CompSwap,
            4 => WcOpcode::FetchAdd,
            5 => WcOpcode::BindMw,
            128 => WcOpcode::Recv,
            129 => WcOpcode::RecvRdmaImm,
            x => return Err(x),
        })
    }
}

/// Status of a completion queue entry.
///
/// Discriminants follow `enum ibv_wc_status`. Descriptions are condensed
/// from [RDMAmojo](https://www.rdmamojo.com/2013/02/15/ibv_poll_cq/).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u32)]
pub enum WcStatus {
    /// The work request (and every unsignaled one posted before it) ended and
    /// its buffers may be reused.
    #[error("success")]
    Success = 0,

    /// A message exceeded the port's maximum message size, or a receive
    /// buffer was too small for the incoming message.
    #[error("local length error")]
    LocLenErr = 1,

    /// An internal QP consistency error, e.g. an opcode the transport does
    /// not support.
    #[error("local QP operation error")]
    LocQpOpErr = 2,

    /// Relevant only to RD QPs, unused.
    #[error("local EE context operation error")]
    LocEecOpErr = 3,

    /// A local scatter/gather entry does not reference a memory region valid
    /// for the requested operation.
    #[error("local protection error")]
    LocProtErr = 4,

    /// The work request was outstanding when the QP entered the error state.
    #[error("WR flush error")]
    WrFlushErr = 5,

    /// Binding a memory window to a memory region failed.
    #[error("memory window bind error")]
    MwBindErr = 6,

    /// The responder returned an unexpected transport opcode.
    #[error("bad response error")]
    BadRespErr = 7,

    /// Protection error on a local buffer targeted by an incoming RDMA write
    /// with immediate.
    #[error("local access error")]
    LocAccessErr = 8,

    /// The responder detected an invalid message on the channel.
    #[error("remote invalid request error")]
    RemInvReqErr = 9,

    /// Protection error on the remote buffer of an RDMA read, write or
    /// atomic operation.
    #[error("remote access error")]
    RemAccessErr = 10,

    /// The responder could not complete the operation.
    #[error("remote operation error")]
    RemOpErr = 11,

    /// The transport retry counter was exceeded: the remote never
    /// acknowledged. Usually wrong connection attributes or a vanished peer.
    #[error("transport retry counter exceeded")]
    RetryExcErr = 12,

    /// The RNR NAK retry counter was exceeded: the remote had no receive
    /// posted.
    #[error("RNR retry counter exceeded")]
    RnrRetryExcErr = 13,

    /// Relevant only to RD QPs, unused.
    #[error("local RDD violation error")]
    LocRddViolErr = 14,

    /// Relevant only to RD QPs, unused.
    #[error("remote invalid RD request")]
    RemInvRdReqErr = 15,

    /// The responder aborted the operation.
    #[error("remote aborted error")]
    RemAbortErr = 16,

    /// Relevant only to RD QPs, unused.
    #[error("invalid EE context number")]
    InvEecnErr = 17,

    /// Relevant only to RD QPs, unused.
    #[error("invalid EE context state error")]
    InvEecStateErr = 18,

    /// A fatal error that may not be recoverable.
    #[error("fatal error")]
    FatalErr = 19,

    /// A response timed out.
    #[error("response timeout error")]
    RespTimeoutErr = 20,

    /// Any other error.
    #[error("general error")]
    GeneralErr = 21,
}

impl WcStatus {
    const ALL: [WcStatus; 22] = [
        WcStatus::Success,
        WcStatus::LocLenErr,
        WcStatus::LocQpOpErr,
        WcStatus::LocEecOpErr,
        WcStatus::LocProtErr,
        WcStatus::WrFlushErr,
        WcStatus::MwBindErr,
        WcStatus::BadRespErr,
        WcStatus::LocAccessErr,
        WcStatus::RemInvReqErr,
        WcStatus::RemAccessErr,
        WcStatus::RemOpErr,
        WcStatus::RetryExcErr,
        WcStatus::RnrRetryExcErr,
        WcStatus::LocRddViolErr,
        WcStatus::RemInvRdReqErr,
        WcStatus::RemAbortErr,
        WcStatus::InvEecnErr,
        WcStatus::InvEecStateErr,
        WcStatus::FatalErr,
        WcStatus::RespTimeoutErr,
        WcStatus::GeneralErr,
    ];

    /// Whether this is [`WcStatus::Success`].
    #[inline]
    pub fn is_success(self) -> bool {
        self == WcStatus::Success
    }
}

impl TryFrom<u32> for WcStatus {
    type Error = u32;

    fn try_from(status: u32) -> Result<Self, Self::Error> {
        Self::ALL.get(status as usize).copied().ok_or(status)
    }
}

/// Work completion entry.
///
/// One entry is produced by the device for every finished (signaled) work
/// request and is consumed exactly once by the [`Executor`](crate::Executor).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Wc {
    wr_id: WrId,
    status: WcStatus,
    opcode: WcOpcode,
    byte_len: u32,
    imm: Option<ImmData>,
}

impl Wc {
    /// Create a work completion entry.
    pub fn new(wr_id: WrId, status: WcStatus, opcode: WcOpcode, byte_len: u32) -> Self {
        Self {
            wr_id,
            status,
            opcode,
            byte_len,
            imm: None,
        }
    }

    /// Attach immediate data.
    pub fn with_imm(mut self, imm: ImmData) -> Self {
        self.imm = Some(imm);
        self
    }

    /// Get the work request ID.
    #[inline]
    pub fn wr_id(&self) -> WrId {
        self.wr_id
    }

    /// Get the completion status.
    #[inline]
    pub fn status(&self) -> WcStatus {
        self.status
    }

    /// Get the completion status as a `Result`.
    ///
    /// - If the status is success, return the number of bytes processed or transferred.
    /// - Otherwise, return the status as an error.
    #[inline]
    pub fn ok(&self) -> Result<usize, WcStatus> {
        match self.status {
            WcStatus::Success => Ok(self.bytes()),
            status => Err(status),
        }
    }

    /// Get the opcode of the work request.
    #[inline]
    pub fn opcode(&self) -> WcOpcode {
        self.opcode
    }

    /// Get the number of bytes processed or transferred.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.byte_len as usize
    }

    /// Get the immediate data, if the completion carries any.
    #[inline]
    pub fn imm(&self) -> Option<ImmData> {
        self.imm
    }
}

impl Default for Wc {
    /// A successful zero-length send completion with ID 0, used to fill
    /// polling buffers.
    fn default() -> Self {
        Self::new(0, WcStatus::Success, WcOpcode::Send, 0)
    }
}

impl fmt::Debug for Wc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wc")
            .field("wr_id", &self.wr_id)
            .field("status", &self.status)
            .field("opcode", &self.opcode)
            .field("byte_len", &self.byte_len)
            .field("imm", &self.imm)
            .finish()
    }
}
