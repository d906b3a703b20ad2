use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::cq::CqRing;
use super::NicInner;
use crate::rdma::cq::{Wc, WcOpcode, WcStatus};
use crate::rdma::mr::{MrRemote, MrSlice};
use crate::rdma::qp::*;
use crate::rdma::type_alias::*;
use crate::rdma::wr::*;
use crate::utils::os_error_explained;

/// Data carried by a message that consumes a receive.
enum Payload {
    Send(Vec<u8>),
    WriteImm(usize),
}

/// Message waiting for (or landing in) a posted receive.
struct Inbound {
    payload: Payload,
    imm: Option<ImmData>,
    wr_id: WrId,
    opcode: WcOpcode,
    sender: Weak<QpShared>,
    sender_scq: Arc<CqRing>,
}

impl Inbound {
    fn len(&self) -> usize {
        match &self.payload {
            Payload::Send(data) => data.len(),
            Payload::WriteImm(len) => *len,
        }
    }

    /// Report the outcome to the sender.
    fn finish(self, status: WcStatus) {
        let len = if status.is_success() { self.len() } else { 0 };
        self.sender_scq
            .push(Wc::new(self.wr_id, status, self.opcode, len as u32));
        if !status.is_success() {
            if let Some(sender) = self.sender.upgrade() {
                sender.fail();
            }
        }
    }
}

struct QpStatus {
    state: QpState,
    remote: Option<QpEndpoint>,
    recvs: VecDeque<RecvWr>,
    inbox: VecDeque<Inbound>,
}

/// Queue pair body, reachable from peers through the fabric.
pub(crate) struct QpShared {
    nic: Arc<NicInner>,
    qpn: Qpn,
    sq_psn: Psn,
    caps: QpCaps,
    scq: Arc<CqRing>,
    rcq: Arc<CqRing>,
    status: Mutex<QpStatus>,
}

impl QpShared {
    fn endpoint(&self) -> QpEndpoint {
        QpEndpoint::new(self.nic.lid(), self.qpn, self.sq_psn)
    }

    /// Whether a request from `from` reaches this queue pair.
    ///
    /// A peer not yet connected is assumed to become ready within the
    /// sender's retry window.
    fn accepts_from(&self, from: &QpEndpoint) -> bool {
        let status = self.status.lock();
        match status.state {
            QpState::Reset | QpState::Init => true,
            QpState::Error | QpState::Unknown => false,
            _ => status.remote.as_ref() == Some(from),
        }
    }

    /// Move to the error state and flush everything outstanding.
    fn fail(&self) {
        let (recvs, inbox) = {
            let mut status = self.status.lock();
            status.state = QpState::Error;
            (
                std::mem::take(&mut status.recvs),
                std::mem::take(&mut status.inbox),
            )
        };
        for wr in recvs {
            self.rcq
                .push(Wc::new(wr.wr_id, WcStatus::WrFlushErr, WcOpcode::Recv, 0));
        }
        for msg in inbox {
            msg.finish(WcStatus::RnrRetryExcErr);
        }
    }

    fn complete_send(&self, wc: Wc) {
        let failed = !wc.status().is_success();
        self.scq.push(wc);
        if failed {
            self.fail();
        }
    }

    /// Hand a message to this (receiving) queue pair.
    fn deliver(&self, msg: Inbound) {
        let recv = {
            let mut status = self.status.lock();
            if matches!(status.state, QpState::Error | QpState::Unknown) {
                drop(status);
                return msg.finish(WcStatus::RetryExcErr);
            }
            match status.recvs.pop_front() {
                Some(recv) => recv,
                None => {
                    status.inbox.push_back(msg);
                    return;
                }
            }
        };
        self.land(msg, recv);
    }

    /// Complete a receive with a message.
    fn land(&self, msg: Inbound, recv: RecvWr) {
        let len = msg.len() as u32;
        let (wc, send_status) = match &msg.payload {
            Payload::Send(data) => match self.nic.scatter(&recv.sgl, data) {
                Ok(()) => (
                    Wc::new(recv.wr_id, WcStatus::Success, WcOpcode::Recv, len),
                    WcStatus::Success,
                ),
                Err(status) => (
                    Wc::new(recv.wr_id, status, WcOpcode::Recv, 0),
                    WcStatus::RemOpErr,
                ),
            },
            Payload::WriteImm(_) => (
                Wc::new(recv.wr_id, WcStatus::Success, WcOpcode::RecvRdmaImm, len),
                WcStatus::Success,
            ),
        };
        let wc = match msg.imm {
            Some(imm) if wc.status().is_success() => wc.with_imm(imm),
            _ => wc,
        };

        self.rcq.push(wc);
        if !wc.status().is_success() {
            self.fail();
        }
        msg.finish(send_status);
    }

    /// Run a one-sided operation against `peer`. Return the byte count.
    fn one_sided(&self, peer: &QpShared, wr: &SendWr) -> Result<usize, WcStatus> {
        match wr.op {
            SendOp::Send { .. } => Err(WcStatus::LocQpOpErr),
            SendOp::Write { remote, .. } => {
                let data = self.nic.gather(&wr.sgl)?;
                peer.nic.remote_write(&remote, &data)?;
                Ok(data.len())
            }
            SendOp::Read { remote } => {
                let len = MrSlice::total_len(&wr.sgl);
                let data = peer.nic.remote_read(&remote, len)?;
                self.nic.scatter(&wr.sgl, &data)?;
                Ok(len)
            }
            SendOp::CompareSwap {
                remote,
                compare,
                swap,
            } => self.atomic(peer, wr, &remote, |v| if v == compare { swap } else { v }),
            SendOp::FetchAdd { remote, add } => {
                self.atomic(peer, wr, &remote, |v| v.wrapping_add(add))
            }
        }
    }

    fn atomic(
        &self,
        peer: &QpShared,
        wr: &SendWr,
        remote: &MrRemote,
        f: impl FnOnce(u64) -> u64,
    ) -> Result<usize, WcStatus> {
        if MrSlice::total_len(&wr.sgl) != 8 {
            return Err(WcStatus::LocLenErr);
        }
        let old = peer.nic.remote_atomic(remote, f)?;
        self.nic.scatter(&wr.sgl, &old.to_ne_bytes())?;
        Ok(8)
    }

    fn execute_send(self: &Arc<Self>, wr: &SendWr, remote: QpEndpoint) {
        let opcode = wr.op.wc_opcode();
        let fail = |status| Wc::new(wr.wr_id, status, opcode, 0);

        let me = self.endpoint();
        let peer = match self.nic.fabric().route(remote.lid, remote.qpn) {
            Some(peer) if peer.accepts_from(&me) => peer,
            _ => return self.complete_send(fail(WcStatus::RetryExcErr)),
        };

        let inbound = |payload, imm| Inbound {
            payload,
            imm,
            wr_id: wr.wr_id,
            opcode,
            sender: Arc::downgrade(self),
            sender_scq: self.scq.clone(),
        };

        match wr.op {
            SendOp::Send { imm } => match self.nic.gather(&wr.sgl) {
                Ok(data) => peer.deliver(inbound(Payload::Send(data), imm)),
                Err(status) => self.complete_send(fail(status)),
            },
            SendOp::Write {
                imm: Some(imm),
                ..
            } => match self.one_sided(&peer, wr) {
                Ok(len) => peer.deliver(inbound(Payload::WriteImm(len), Some(imm))),
                Err(status) => self.complete_send(fail(status)),
            },
            _ => match self.one_sided(&peer, wr) {
                Ok(len) => {
                    self.complete_send(Wc::new(wr.wr_id, WcStatus::Success, opcode, len as u32))
                }
                Err(status) => self.complete_send(fail(status)),
            },
        }
    }
}

/// Reliable-connection queue pair on a [`SoftNic`](super::SoftNic).
///
/// Created by a [`QpBuilder`](super::QpBuilder) in the RESET state.
pub struct SoftQp {
    shared: Arc<QpShared>,
}

impl fmt::Debug for SoftQp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftQp")
            .field("endpoint", &self.shared.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

impl SoftQp {
    pub(crate) fn new(
        nic: Arc<NicInner>,
        caps: QpCaps,
        sq_psn: Psn,
        scq: Arc<CqRing>,
        rcq: Arc<CqRing>,
    ) -> Self {
        let qpn = nic.alloc_qpn();
        let shared = Arc::new(QpShared {
            nic,
            qpn,
            sq_psn,
            caps,
            scq,
            rcq,
            status: Mutex::new(QpStatus {
                state: QpState::Reset,
                remote: None,
                recvs: VecDeque::new(),
                inbox: VecDeque::new(),
            }),
        });
        shared.nic.fabric().register(shared.nic.lid(), qpn, &shared);
        Self { shared }
    }

    /// Get the queue pair number.
    #[inline]
    pub fn qp_num(&self) -> Qpn {
        self.shared.qpn
    }

    /// Number of posted receives not yet consumed.
    pub fn posted_recvs(&self) -> usize {
        self.shared.status.lock().recvs.len()
    }
}

impl RawQp for SoftQp {
    fn endpoint(&self) -> QpEndpoint {
        self.shared.endpoint()
    }

    fn state(&self) -> QpState {
        self.shared.status.lock().state
    }

    fn caps(&self) -> QpCaps {
        self.shared.caps
    }

    fn connect(&self, peer: &QpEndpoint) -> io::Result<()> {
        let mut status = self.shared.status.lock();
        if status.state != QpState::Reset {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot connect QP in state {:?}", status.state),
            ));
        }
        // RESET -> INIT -> RTR -> RTS under one lock: no intermediate state
        // is observable.
        status.remote = Some(*peer);
        status.state = QpState::Rts;
        log::trace!(
            "cordma: soft QP {} connected to {}",
            self.shared.endpoint(),
            peer
        );
        Ok(())
    }

    fn post_send(&self, wr: &SendWr) -> io::Result<()> {
        let shared = &self.shared;
        if wr.sgl.len() > shared.caps.max_send_sge as usize {
            return Err(os_error_explained(libc::EINVAL, send_err_explanation));
        }

        let (state, remote) = {
            let status = shared.status.lock();
            (status.state, status.remote)
        };
        match (state, remote) {
            (QpState::Rts, Some(remote)) => {
                shared.execute_send(wr, remote);
                Ok(())
            }
            (QpState::Error, _) => {
                shared.scq.push(Wc::new(
                    wr.wr_id,
                    WcStatus::WrFlushErr,
                    wr.op.wc_opcode(),
                    0,
                ));
                Ok(())
            }
            _ => Err(os_error_explained(libc::EINVAL, send_err_explanation)),
        }
    }

    fn post_recv(&self, wr: &RecvWr) -> io::Result<()> {
        let shared = &self.shared;
        if wr.sgl.len() > shared.caps.max_recv_sge as usize {
            return Err(os_error_explained(libc::EINVAL, recv_err_explanation));
        }

        let msg = {
            let mut status = shared.status.lock();
            match status.state {
                QpState::Reset | QpState::Unknown => {
                    return Err(os_error_explained(libc::EINVAL, recv_err_explanation));
                }
                QpState::Error => {
                    drop(status);
                    shared
                        .rcq
                        .push(Wc::new(wr.wr_id, WcStatus::WrFlushErr, WcOpcode::Recv, 0));
                    return Ok(());
                }
                _ => {}
            }
            match status.inbox.pop_front() {
                Some(msg) => msg,
                None => {
                    if status.recvs.len() >= shared.caps.max_recv_wr as usize {
                        return Err(os_error_explained(libc::ENOMEM, recv_err_explanation));
                    }
                    status.recvs.push_back(wr.clone());
                    return Ok(());
                }
            }
        };
        shared.land(msg, wr.clone());
        Ok(())
    }
}

impl Drop for SoftQp {
    fn drop(&mut self) {
        let shared = &self.shared;
        shared.nic.fabric().unregister(shared.nic.lid(), shared.qpn);
        shared.fail();
    }
}
