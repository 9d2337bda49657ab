//! Event masks for fd interest and reported readiness.

/// Bitfield of fd events.
///
/// The same type describes both the events a waiter arms
/// (readable, writable, remote-close) and the events the kernel
/// reports (which may additionally carry [`EventMask::ERROR`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u8);

impl EventMask {
    /// No events.
    pub const EMPTY: Self = Self(0);
    /// The fd is readable.
    pub const READABLE: Self = Self(0b0001);
    /// The fd is writable.
    pub const WRITABLE: Self = Self(0b0010);
    /// The peer closed its end.
    pub const REMOTE_CLOSE: Self = Self(0b0100);
    /// The kernel reported an error condition. Never armed explicitly;
    /// always delivered.
    pub const ERROR: Self = Self(0b1000);

    /// Returns the combination of both masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if the masks share any bit.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if no bits are set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if the readable bit is set.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.intersects(Self::READABLE)
    }

    /// Returns true if the writable bit is set.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.intersects(Self::WRITABLE)
    }

    /// Returns true if the error bit is set.
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.intersects(Self::ERROR)
    }

    /// Returns true if the remote-close bit is set.
    #[must_use]
    pub const fn is_remote_close(self) -> bool {
        self.intersects(Self::REMOTE_CLOSE)
    }
}

impl std::ops::BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_contains() {
        let mask = EventMask::READABLE | EventMask::REMOTE_CLOSE;
        assert!(mask.contains(EventMask::READABLE));
        assert!(mask.contains(EventMask::REMOTE_CLOSE));
        assert!(!mask.contains(EventMask::WRITABLE));
        assert!(mask.contains(EventMask::EMPTY));
    }

    #[test]
    fn intersects_is_any_bit() {
        let mask = EventMask::READABLE | EventMask::WRITABLE;
        assert!(mask.intersects(EventMask::READABLE));
        assert!(!mask.intersects(EventMask::ERROR));
        assert!(!EventMask::EMPTY.intersects(mask));
    }

    #[test]
    fn predicates_match_bits() {
        assert!(EventMask::READABLE.is_readable());
        assert!(EventMask::WRITABLE.is_writable());
        assert!(EventMask::ERROR.is_error());
        assert!(EventMask::REMOTE_CLOSE.is_remote_close());
        assert!(EventMask::EMPTY.is_empty());
        assert!(!EventMask::READABLE.is_writable());
    }
}
