//! In-process RDMA device.
//!
//! A [`Fabric`] connects any number of [`SoftNic`]s living in the same
//! process. Queue pairs created on them implement [`RawQp`](crate::RawQp)
//! and report to [`SoftCq`]s, so the whole engine (pollers, executor,
//! handshake, awaitable verbs) runs without RDMA hardware.
//!
//! Operations are carried out while they are posted. The device models
//! reliable-connection semantics closely enough for the error paths to be
//! exercised:
//!
//! - a SEND consumes the oldest receive posted by the peer, or waits in the
//!   peer's inbox until one is posted;
//! - one-sided operations check the remote key, bounds and permissions
//!   (`RemAccessErr`), local SGEs check the local key (`LocProtErr`);
//! - a receive buffer too small for a message fails the receive with
//!   `LocLenErr` and the send with `RemOpErr`;
//! - a missing peer, or a peer bound to a different endpoint or PSN, fails
//!   with `RetryExcErr`;
//! - any error completion moves the queue pair to the error state and
//!   flushes its outstanding receives with `WrFlushErr`, as does dropping it.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::rdma::cq::{CqCreationError, WcStatus};
use crate::rdma::mr::*;
use crate::rdma::type_alias::*;

pub use self::builder::QpBuilder;
pub use self::cq::SoftCq;
pub use self::mr::SoftMr;
pub use self::qp::SoftQp;

mod builder;
mod cq;
mod mr;
mod qp;

use self::mr::MrInner;
use self::qp::QpShared;

/// Device limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAttr {
    /// Largest completion queue depth.
    pub max_cqe: u32,
    /// Largest number of outstanding work requests per queue.
    pub max_qp_wr: u32,
    /// Largest scatter/gather list.
    pub max_sge: u32,
}

impl Default for DeviceAttr {
    fn default() -> Self {
        Self {
            max_cqe: 4096,
            max_qp_wr: 1024,
            max_sge: 16,
        }
    }
}

struct FabricInner {
    next_lid: AtomicU16,
    qps: DashMap<(Lid, Qpn), Weak<QpShared>>,
}

/// Interconnect routing between software NICs.
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Fabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fabric")
            .field("qps", &self.inner.qps.len())
            .finish()
    }
}

impl Fabric {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FabricInner {
                next_lid: AtomicU16::new(1),
                qps: DashMap::new(),
            }),
        }
    }

    /// Attach a new NIC with default limits.
    pub fn open_nic(&self) -> SoftNic {
        self.open_nic_with(DeviceAttr::default())
    }

    /// Attach a new NIC with the given limits. Each NIC gets its own LID.
    pub fn open_nic_with(&self, attr: DeviceAttr) -> SoftNic {
        let lid = self.inner.next_lid.fetch_add(1, Ordering::Relaxed);
        SoftNic {
            inner: Arc::new(NicInner {
                fabric: self.clone(),
                lid,
                attr,
                next_qpn: AtomicU32::new(1),
                next_key: AtomicU32::new(1),
                mrs: DashMap::new(),
            }),
        }
    }

    pub(crate) fn register(&self, lid: Lid, qpn: Qpn, qp: &Arc<QpShared>) {
        self.inner.qps.insert((lid, qpn), Arc::downgrade(qp));
    }

    pub(crate) fn unregister(&self, lid: Lid, qpn: Qpn) {
        self.inner.qps.remove(&(lid, qpn));
    }

    pub(crate) fn route(&self, lid: Lid, qpn: Qpn) -> Option<Arc<QpShared>> {
        let weak = self.inner.qps.get(&(lid, qpn))?.clone();
        weak.upgrade()
    }
}

pub(crate) struct NicInner {
    fabric: Fabric,
    lid: Lid,
    attr: DeviceAttr,
    next_qpn: AtomicU32,
    next_key: AtomicU32,
    mrs: DashMap<u32, Weak<MrInner>>,
}

impl NicInner {
    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn lid(&self) -> Lid {
        self.lid
    }

    pub fn alloc_qpn(&self) -> Qpn {
        self.next_qpn.fetch_add(1, Ordering::Relaxed)
    }

    pub fn dereg_mr(&self, mr: &MrInner) {
        self.mrs.remove(&mr.lkey());
        self.mrs.remove(&mr.rkey());
    }

    fn lookup(&self, key: u32) -> Option<Arc<MrInner>> {
        let weak = self.mrs.get(&key)?.clone();
        weak.upgrade()
    }

    /// Resolve a local SGE to its region and offset.
    fn local(&self, sge: &MrSlice) -> Result<(Arc<MrInner>, usize), WcStatus> {
        let mr = self
            .lookup(sge.lkey())
            .filter(|mr| mr.lkey() == sge.lkey())
            .ok_or(WcStatus::LocProtErr)?;
        let off = mr
            .offset_of(sge.addr(), sge.len())
            .ok_or(WcStatus::LocProtErr)?;
        Ok((mr, off))
    }

    /// Resolve `len` bytes of a remote descriptor that must allow `perm`.
    fn remote(
        &self,
        rmr: &MrRemote,
        len: usize,
        perm: Permission,
    ) -> Result<(Arc<MrInner>, usize), WcStatus> {
        if len > rmr.len as usize {
            return Err(WcStatus::RemAccessErr);
        }
        let mr = self
            .lookup(rmr.rkey)
            .filter(|mr| mr.rkey() == rmr.rkey && mr.perm().contains(perm))
            .ok_or(WcStatus::RemAccessErr)?;
        let off = mr
            .offset_of(rmr.addr, len)
            .ok_or(WcStatus::RemAccessErr)?;
        Ok((mr, off))
    }

    /// Copy the content of a local SGL out.
    pub fn gather(&self, sgl: &[MrSlice]) -> Result<Vec<u8>, WcStatus> {
        let mut data = Vec::with_capacity(MrSlice::total_len(sgl));
        for sge in sgl {
            let (mr, off) = self.local(sge)?;
            mr.read(off, &mut data, sge.len());
        }
        Ok(data)
    }

    /// Copy `data` into a local SGL, which must be large enough.
    pub fn scatter(&self, sgl: &[MrSlice], data: &[u8]) -> Result<(), WcStatus> {
        if data.len() > MrSlice::total_len(sgl) {
            return Err(WcStatus::LocLenErr);
        }
        let mut rest = data;
        for sge in sgl {
            if rest.is_empty() {
                break;
            }
            let (mr, off) = self.local(sge)?;
            if !mr.perm().contains(Permission::LOCAL_WRITE) {
                return Err(WcStatus::LocProtErr);
            }
            let n = sge.len().min(rest.len());
            mr.write(off, &rest[..n]);
            rest = &rest[n..];
        }
        Ok(())
    }

    pub fn remote_write(&self, rmr: &MrRemote, data: &[u8]) -> Result<(), WcStatus> {
        let (mr, off) = self.remote(rmr, data.len(), Permission::REMOTE_WRITE)?;
        mr.write(off, data);
        Ok(())
    }

    pub fn remote_read(&self, rmr: &MrRemote, len: usize) -> Result<Vec<u8>, WcStatus> {
        let (mr, off) = self.remote(rmr, len, Permission::REMOTE_READ)?;
        let mut data = Vec::with_capacity(len);
        mr.read(off, &mut data, len);
        Ok(data)
    }

    /// Atomically update the 8-byte word at the start of `rmr`; return the
    /// previous value.
    ///
    /// Buffers are only byte-aligned here, so the word must be 8-byte aligned
    /// relative to the start of its region.
    pub fn remote_atomic(
        &self,
        rmr: &MrRemote,
        f: impl FnOnce(u64) -> u64,
    ) -> Result<u64, WcStatus> {
        let (mr, off) = self.remote(rmr, 8, Permission::REMOTE_ATOMIC)?;
        if off % 8 != 0 {
            return Err(WcStatus::RemInvReqErr);
        }
        Ok(mr.update_u64(off, f))
    }
}

/// Software NIC attached to a [`Fabric`].
///
/// Clones refer to the same NIC.
#[derive(Clone)]
pub struct SoftNic {
    inner: Arc<NicInner>,
}

impl fmt::Debug for SoftNic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftNic")
            .field("lid", &self.inner.lid)
            .field("attr", &self.inner.attr)
            .finish()
    }
}

impl SoftNic {
    /// Get the LID of this NIC.
    #[inline]
    pub fn lid(&self) -> Lid {
        self.inner.lid
    }

    /// Get the device limits.
    #[inline]
    pub fn attr(&self) -> &DeviceAttr {
        &self.inner.attr
    }

    /// Get the fabric this NIC is attached to.
    #[inline]
    pub fn fabric(&self) -> &Fabric {
        &self.inner.fabric
    }

    pub(crate) fn inner(&self) -> &Arc<NicInner> {
        &self.inner
    }

    /// Create a completion queue holding up to `depth` entries.
    pub fn create_cq(&self, depth: u32) -> Result<SoftCq, CqCreationError> {
        if depth > self.inner.attr.max_cqe {
            return Err(CqCreationError::TooManyCqes(self.inner.attr.max_cqe));
        }
        if depth == 0 {
            return Err(
                io::Error::new(io::ErrorKind::InvalidInput, "CQ depth must be positive").into(),
            );
        }
        Ok(SoftCq::new(depth))
    }

    /// Register a zeroed buffer of `len` bytes with every permission.
    pub fn reg_mr(&self, len: usize) -> io::Result<SoftMr> {
        self.reg_mr_with(len, Permission::default())
    }

    /// Register a zeroed buffer of `len` bytes with the given permissions.
    pub fn reg_mr_with(&self, len: usize, perm: Permission) -> io::Result<SoftMr> {
        if u32::try_from(len).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "memory region larger than 4 GiB",
            ));
        }
        let lkey = self.inner.next_key.fetch_add(2, Ordering::Relaxed);
        let rkey = lkey + 1;
        let mr = Arc::new(MrInner::new(len, lkey, rkey, perm));
        self.inner.mrs.insert(lkey, Arc::downgrade(&mr));
        self.inner.mrs.insert(rkey, Arc::downgrade(&mr));
        Ok(SoftMr::new(mr, self.inner.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nics_get_distinct_lids() {
        let fabric = Fabric::new();
        let a = fabric.open_nic();
        let b = fabric.open_nic();
        assert_ne!(a.lid(), b.lid());
        assert_eq!(a.attr().max_cqe, 4096);
    }

    #[test]
    fn test_cq_depth_limit() {
        let nic = Fabric::new().open_nic();
        assert!(nic.create_cq(4096).is_ok());
        assert!(matches!(
            nic.create_cq(4097),
            Err(CqCreationError::TooManyCqes(4096))
        ));
        assert!(matches!(nic.create_cq(0), Err(CqCreationError::IoError(_))));
    }

    #[test]
    fn test_local_key_checks() {
        let nic = Fabric::new().open_nic();
        let mr = nic.reg_mr(32).unwrap();
        let inner = nic.inner();

        let sge = mr.slice(0, 16).unwrap();
        inner.scatter(&[sge], &[7u8; 16]).unwrap();
        assert_eq!(inner.gather(&[sge]).unwrap(), vec![7u8; 16]);
        assert_eq!(inner.scatter(&[sge], &[0u8; 17]), Err(WcStatus::LocLenErr));

        let forged = MrSlice::new(sge.addr(), 16, mr.rkey());
        assert_eq!(inner.gather(&[forged]), Err(WcStatus::LocProtErr));
        let beyond = MrSlice::new(sge.addr() + 24, 16, mr.lkey());
        assert_eq!(inner.gather(&[beyond]), Err(WcStatus::LocProtErr));
    }

    #[test]
    fn test_remote_permissions() {
        let nic = Fabric::new().open_nic();
        let ro = nic
            .reg_mr_with(16, Permission::REMOTE_READ)
            .unwrap();
        let inner = nic.inner();
        let remote = ro.as_remote();

        assert_eq!(inner.remote_read(&remote, 16).unwrap().len(), 16);
        assert_eq!(inner.remote_write(&remote, &[1]), Err(WcStatus::RemAccessErr));
        assert_eq!(inner.remote_atomic(&remote, |v| v), Err(WcStatus::RemAccessErr));
        assert_eq!(inner.remote_read(&remote, 17), Err(WcStatus::RemAccessErr));

        let stale = remote;
        drop(ro);
        assert_eq!(inner.remote_read(&stale, 1), Err(WcStatus::RemAccessErr));
    }
}
