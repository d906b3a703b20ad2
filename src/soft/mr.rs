use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::NicInner;
use crate::rdma::mr::*;
use crate::rdma::type_alias::*;

/// Registered buffer as seen by the device.
pub(crate) struct MrInner {
    buf: Mutex<Box<[u8]>>,
    addr: u64,
    len: usize,
    lkey: LKey,
    rkey: RKey,
    perm: Permission,
}

impl MrInner {
    pub fn new(len: usize, lkey: LKey, rkey: RKey, perm: Permission) -> Self {
        let buf = vec![0u8; len].into_boxed_slice();
        let addr = buf.as_ptr() as u64;
        Self {
            buf: Mutex::new(buf),
            addr,
            len,
            lkey,
            rkey,
            perm,
        }
    }

    #[inline]
    pub fn lkey(&self) -> LKey {
        self.lkey
    }

    #[inline]
    pub fn rkey(&self) -> RKey {
        self.rkey
    }

    #[inline]
    pub fn perm(&self) -> Permission {
        self.perm
    }

    /// Offset of `[addr, addr + len)` inside this region, if it fits.
    pub fn offset_of(&self, addr: u64, len: usize) -> Option<usize> {
        let off = usize::try_from(addr.checked_sub(self.addr)?).ok()?;
        (off.checked_add(len)? <= self.len).then_some(off)
    }

    pub fn read(&self, off: usize, out: &mut Vec<u8>, len: usize) {
        out.extend_from_slice(&self.buf.lock()[off..off + len]);
    }

    pub fn write(&self, off: usize, data: &[u8]) {
        self.buf.lock()[off..off + data.len()].copy_from_slice(data);
    }

    /// Apply `f` to the native-endian `u64` at `off` and return the previous
    /// value, atomically with respect to every other access of the region.
    pub fn update_u64(&self, off: usize, f: impl FnOnce(u64) -> u64) -> u64 {
        let mut buf = self.buf.lock();
        let cell = &mut buf[off..off + 8];
        let mut old = [0u8; 8];
        old.copy_from_slice(cell);
        let old = u64::from_ne_bytes(old);
        cell.copy_from_slice(&f(old).to_ne_bytes());
        old
    }
}

/// Memory region registered on a [`SoftNic`](super::SoftNic).
///
/// The region owns a zero-initialized buffer. Work requests refer to it
/// through [`MrSlice`]s (local) or [`MrRemote`]s (handed to a peer); the
/// application reads and writes its content with
/// [`with_bytes`](Self::with_bytes) / [`with_bytes_mut`](Self::with_bytes_mut).
///
/// Dropping the region deregisters it: later work requests using its keys
/// complete with a protection or access error.
pub struct SoftMr {
    inner: Arc<MrInner>,
    nic: Arc<NicInner>,
}

impl fmt::Debug for SoftMr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftMr")
            .field("addr", &format_args!("{:#x}", self.inner.addr))
            .field("len", &self.inner.len)
            .field("lkey", &self.inner.lkey)
            .field("rkey", &self.inner.rkey)
            .finish()
    }
}

impl SoftMr {
    pub(crate) fn new(inner: Arc<MrInner>, nic: Arc<NicInner>) -> Self {
        Self { inner, nic }
    }

    /// Get the local key of the memory region.
    #[inline]
    pub fn lkey(&self) -> LKey {
        self.inner.lkey
    }

    /// Get the remote key of the memory region.
    #[inline]
    pub fn rkey(&self) -> RKey {
        self.inner.rkey
    }

    /// Get the access permissions the region was registered with.
    #[inline]
    pub fn perm(&self) -> Permission {
        self.inner.perm
    }

    /// Get a remote descriptor of the whole region, to be sent to a peer.
    pub fn as_remote(&self) -> MrRemote {
        MrRemote::new(self.inner.addr, self.inner.len as u32, self.inner.rkey)
    }

    /// Run `f` on the region's content.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.inner.buf.lock())
    }

    /// Run `f` on the region's content, mutably.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.inner.buf.lock())
    }

    /// Copy the region's content out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_bytes(<[u8]>::to_vec)
    }

    /// Read the native-endian `u64` at `offset`, as left by an atomic.
    ///
    /// # Panics
    ///
    /// Panic if `offset + 8` exceeds the region.
    pub fn read_u64(&self, offset: usize) -> u64 {
        self.with_bytes(|b| {
            let mut v = [0u8; 8];
            v.copy_from_slice(&b[offset..offset + 8]);
            u64::from_ne_bytes(v)
        })
    }
}

impl Slicing for SoftMr {
    type Output = MrSlice;

    #[inline]
    fn addr(&self) -> u64 {
        self.inner.addr
    }

    #[inline]
    fn len(&self) -> usize {
        self.inner.len
    }

    #[inline]
    fn slice_checked(&self, offset: usize, len: usize) -> MrSlice {
        MrSlice::new(self.inner.addr + offset as u64, len as u32, self.inner.lkey)
    }
}

impl Drop for SoftMr {
    fn drop(&mut self) {
        self.nic.dereg_mr(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_of() {
        let mr = MrInner::new(64, 1, 2, Permission::default());
        let base = mr.addr;
        assert_eq!(mr.offset_of(base, 64), Some(0));
        assert_eq!(mr.offset_of(base + 8, 56), Some(8));
        assert_eq!(mr.offset_of(base + 8, 57), None);
        assert_eq!(mr.offset_of(base.wrapping_sub(1), 1), None);
        assert_eq!(mr.offset_of(base + 64, 0), Some(64));
    }

    #[test]
    fn test_update_u64() {
        let mr = MrInner::new(16, 1, 2, Permission::default());
        assert_eq!(mr.update_u64(8, |v| v + 5), 0);
        assert_eq!(mr.update_u64(8, |v| v * 2), 5);
        let mut out = Vec::new();
        mr.read(8, &mut out, 8);
        assert_eq!(out, 10u64.to_ne_bytes());
    }
}
