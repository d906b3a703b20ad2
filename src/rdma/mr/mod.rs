//! Memory region descriptors.
//!
//! Registering memory is the device's business (see
//! [`SoftNic::reg_mr`](crate::soft::SoftNic::reg_mr)); this module only
//! describes registered memory the way work requests refer to it.

mod perm;
mod remote;
mod slicing;

pub use self::perm::*;
pub use self::remote::*;
pub use self::slicing::*;

use crate::rdma::type_alias::LKey;

/// Slice of a local memory region.
///
/// A slice corresponds to an RDMA scatter-gather list entry, which can be
/// used in RDMA data-plane verbs.
///
/// **NOTE:** a slice is a plain descriptor. The registration it was taken
/// from must stay alive until every work request that uses it has
/// completed; a slice whose `lkey` is no longer registered completes with
/// [`LocProtErr`](crate::WcStatus::LocProtErr).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MrSlice {
    addr: u64,
    len: u32,
    lkey: LKey,
}

impl MrSlice {
    /// Create a slice descriptor from raw parts.
    pub fn new(addr: u64, len: u32, lkey: LKey) -> Self {
        Self { addr, len, lkey }
    }

    /// Get the local key of the memory region.
    #[inline]
    pub fn lkey(&self) -> LKey {
        self.lkey
    }

    /// Total length of a scatter-gather list.
    pub fn total_len(sgl: &[MrSlice]) -> usize {
        sgl.iter().map(|s| s.len as usize).sum()
    }
}

impl Slicing for MrSlice {
    type Output = Self;

    #[inline]
    fn addr(&self) -> u64 {
        self.addr
    }

    #[inline]
    fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    fn slice_checked(&self, offset: usize, len: usize) -> Self {
        Self::new(self.addr + offset as u64, len as u32, self.lkey)
    }
}
