use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

/// Memory region permissions.
///
/// Bit values follow `enum ibv_access_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const EMPTY: Self = Self(0);
    pub const LOCAL_WRITE: Self = Self(1);
    pub const REMOTE_WRITE: Self = Self(1 << 1);
    pub const REMOTE_READ: Self = Self(1 << 2);
    pub const REMOTE_ATOMIC: Self = Self(1 << 3);

    /// Whether every permission in `other` is also in `self`.
    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw access-flag bits.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl Default for Permission {
    /// Allow local write, remote read/write, and remote atomic.
    fn default() -> Self {
        Self::LOCAL_WRITE | Self::REMOTE_READ | Self::REMOTE_WRITE | Self::REMOTE_ATOMIC
    }
}

impl BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Permission {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl Sub for Permission {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 & !rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let p = Permission::default();
        assert!(p.contains(Permission::REMOTE_WRITE | Permission::REMOTE_READ));
        let ro = p - Permission::REMOTE_WRITE;
        assert!(!ro.contains(Permission::REMOTE_WRITE));
        assert!(ro.contains(Permission::REMOTE_READ));
        assert!(ro.contains(Permission::EMPTY));
        assert_eq!((ro & Permission::LOCAL_WRITE).bits(), 1);
    }
}
