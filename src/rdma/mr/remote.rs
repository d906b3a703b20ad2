use bytes::{Buf, BufMut};

use super::Slicing;
use crate::rdma::type_alias::RKey;
use crate::wire::{self, DecodeError};

/// Remote registered memory.
///
/// This structure describes a memory region registered by the peer and does
/// not hold any RDMA resources locally. It can represent a part of the
/// remote region by narrowing `addr` and `len`.
///
/// The descriptor stays valid only as long as the peer keeps the original
/// registration alive; the library cannot detect a stale `rkey` until an
/// operation using it completes with
/// [`RemAccessErr`](crate::WcStatus::RemAccessErr).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MrRemote {
    pub addr: u64,
    pub len: u32,
    pub rkey: RKey,
}

impl MrRemote {
    /// Encoded size: `addr` (64 bits), `length` (32 bits), `rkey` (32 bits).
    pub const SERIALIZED_SIZE: usize = 16;

    /// Create a new piece of remote registered memory data.
    pub fn new(addr: u64, len: u32, rkey: RKey) -> Self {
        Self { addr, len, rkey }
    }

    /// Get a pointer at the given offset.
    #[inline]
    pub fn at(&self, offset: usize) -> u64 {
        self.addr + offset as u64
    }

    /// Append the wire form to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        wire::put(buf, self.addr);
        wire::put(buf, self.len);
        wire::put(buf, self.rkey);
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SERIALIZED_SIZE);
        self.encode(&mut buf);
        buf
    }

    /// Parse the wire form, advancing `buf` past it.
    ///
    /// Nothing is consumed if the input is too short.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        wire::ensure(buf, Self::SERIALIZED_SIZE)?;
        Ok(Self {
            addr: wire::get(buf)?,
            len: wire::get(buf)?,
            rkey: wire::get(buf)?,
        })
    }
}

impl Slicing for MrRemote {
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
        Self::new(self.addr + offset as u64, len as u32, self.rkey)
    }
}
