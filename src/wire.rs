//! Fixed-width, network-byte-order encoding primitives.
//!
//! Every field has a width known at compile time, so several values can be
//! encoded back-to-back into one buffer and parsed again from a single
//! cursor without any length prefix. Encoding appends to any [`BufMut`]
//! (e.g. `Vec<u8>`); decoding consumes from any [`Buf`] (e.g. `&[u8]`) and
//! leaves the cursor just past the consumed bytes.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Decoding error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input ended before a fixed-width field could be read.
    #[error("truncated input: need {need} bytes, {have} remaining")]
    Truncated { need: usize, have: usize },
}

/// Integer that travels in network byte order with a fixed width.
pub trait WireInt: Copy + Sized {
    /// Encoded width in bytes.
    const WIDTH: usize;

    #[doc(hidden)]
    fn put_be(self, buf: &mut impl BufMut);

    #[doc(hidden)]
    fn get_be(buf: &mut impl Buf) -> Self;
}

macro_rules! impl_wire_int {
    ($($t:ty => $put:ident, $get:ident;)*) => ($(
        impl WireInt for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            #[inline]
            fn put_be(self, buf: &mut impl BufMut) {
                buf.$put(self);
            }

            #[inline]
            fn get_be(buf: &mut impl Buf) -> Self {
                buf.$get()
            }
        }
    )*)
}

impl_wire_int! {
    u16 => put_u16, get_u16;
    u32 => put_u32, get_u32;
    u64 => put_u64, get_u64;
}

/// Append `value` to `buf` in network byte order.
#[inline]
pub fn put<T: WireInt>(buf: &mut impl BufMut, value: T) {
    value.put_be(buf);
}

/// Consume exactly `T::WIDTH` bytes from `buf` and decode them.
///
/// On error nothing is consumed.
#[inline]
pub fn get<T: WireInt>(buf: &mut impl Buf) -> Result<T, DecodeError> {
    ensure(buf, T::WIDTH)?;
    Ok(T::get_be(buf))
}

/// Check that at least `need` bytes remain.
#[inline]
pub fn ensure(buf: &impl Buf, need: usize) -> Result<(), DecodeError> {
    let have = buf.remaining();
    if have < need {
        return Err(DecodeError::Truncated { need, have });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_byte_order() {
        let mut buf = Vec::new();
        put(&mut buf, 0x0102u16);
        put(&mut buf, 0x0304_0506u32);
        put(&mut buf, 0x0708_090a_0b0c_0d0eu64);
        assert_eq!(
            buf,
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14],
            "fields must be big-endian and packed"
        );
    }

    #[test]
    fn test_cursor_advances() {
        let bytes = [0u8, 7, 0, 0, 0, 42, 0xff];
        let mut cur = &bytes[..];
        assert_eq!(get::<u16>(&mut cur), Ok(7));
        assert_eq!(get::<u32>(&mut cur), Ok(42));
        assert_eq!(cur, &[0xff]);
    }

    #[test]
    fn test_truncated_consumes_nothing() {
        let bytes = [0u8, 1, 2];
        let mut cur = &bytes[..];
        assert_eq!(
            get::<u32>(&mut cur),
            Err(DecodeError::Truncated { need: 4, have: 3 })
        );
        assert_eq!(cur.len(), 3);
        assert_eq!(get::<u16>(&mut cur), Ok(1));
    }

    #[test]
    fn test_widths() {
        assert_eq!(<u16 as WireInt>::WIDTH, 2);
        assert_eq!(<u32 as WireInt>::WIDTH, 4);
        assert_eq!(<u64 as WireInt>::WIDTH, 8);
    }
}
