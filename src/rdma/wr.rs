//! Work requests.
//!
//! A work request describes one operation handed to a queue pair. The
//! `wr_id` is returned unchanged in the matching [`Wc`](crate::Wc).

use crate::rdma::cq::WcOpcode;
use crate::rdma::mr::{MrRemote, MrSlice};
use crate::rdma::type_alias::*;

/// Operation carried by a send-queue work request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOp {
    /// Two-sided send that consumes a receive posted by the peer.
    Send { imm: Option<ImmData> },

    /// One-sided write into peer memory. With immediate data, it also
    /// consumes a receive posted by the peer.
    Write { remote: MrRemote, imm: Option<ImmData> },

    /// One-sided read from peer memory.
    Read { remote: MrRemote },

    /// 64-bit compare-and-swap on peer memory. The original value is
    /// written into the local buffer.
    CompareSwap {
        remote: MrRemote,
        compare: u64,
        swap: u64,
    },

    /// 64-bit fetch-and-add on peer memory. The original value is written
    /// into the local buffer.
    FetchAdd { remote: MrRemote, add: u64 },
}

impl SendOp {
    /// Opcode reported by the completion of this operation.
    pub fn wc_opcode(&self) -> WcOpcode {
        match self {
            SendOp::Send { .. } => WcOpcode::Send,
            SendOp::Write { .. } => WcOpcode::RdmaWrite,
            SendOp::Read { .. } => WcOpcode::RdmaRead,
            SendOp::CompareSwap { .. } => WcOpcode::CompSwap,
            SendOp::FetchAdd { .. } => WcOpcode::FetchAdd,
        }
    }

    /// Whether the operation is an 8-byte atomic.
    #[inline]
    pub fn is_atomic(&self) -> bool {
        matches!(self, SendOp::CompareSwap { .. } | SendOp::FetchAdd { .. })
    }

    /// Remote memory targeted by a one-sided operation.
    pub fn remote(&self) -> Option<&MrRemote> {
        match self {
            SendOp::Send { .. } => None,
            SendOp::Write { remote, .. }
            | SendOp::Read { remote }
            | SendOp::CompareSwap { remote, .. }
            | SendOp::FetchAdd { remote, .. } => Some(remote),
        }
    }

    /// Immediate data delivered to the peer's receive, if any.
    pub fn imm(&self) -> Option<ImmData> {
        match self {
            SendOp::Send { imm } | SendOp::Write { imm, .. } => *imm,
            _ => None,
        }
    }
}

/// Send-queue work request.
#[derive(Clone, Debug)]
pub struct SendWr {
    pub wr_id: WrId,
    pub sgl: Vec<MrSlice>,
    pub op: SendOp,
}

impl SendWr {
    pub fn new(wr_id: WrId, sgl: &[MrSlice], op: SendOp) -> Self {
        Self {
            wr_id,
            sgl: sgl.to_vec(),
            op,
        }
    }
}

/// Receive-queue work request.
#[derive(Clone, Debug)]
pub struct RecvWr {
    pub wr_id: WrId,
    pub sgl: Vec<MrSlice>,
}

impl RecvWr {
    pub fn new(wr_id: WrId, sgl: &[MrSlice]) -> Self {
        Self {
            wr_id,
            sgl: sgl.to_vec(),
        }
    }
}
