//! Time-related types based on the DW1000's system time

use core::ops::Add;

#[cfg(feature = "defmt")]
use defmt::Format;

/// The maximum value of 40-bit system time stamps.
pub const TIME_MAX: u64 = 0xff_ffff_ffff;

/// Represents an instant in time
///
/// You can get the current DW1000 system time by calling [`DW1000::sys_time`].
///
/// Internally uses the same 40-bit timestamps that the DW1000 uses.
///
/// [`DW1000::sys_time`]: ../hl/struct.DW1000.html#method.sys_time
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instant(u64);

impl Instant {
    /// Creates a new instance of `Instant`
    ///
    /// Returns `None` if `value` does not fit in 40 bits.
    ///
    /// ``` rust
    /// use dw1000_link::time::{TIME_MAX, Instant};
    ///
    /// assert!(Instant::new(TIME_MAX).is_some());
    /// assert!(Instant::new(TIME_MAX + 1).is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        } else {
            None
        }
    }

    /// Creates an `Instant` from the low 40 bits of `value`
    pub fn wrapping(value: u64) -> Self {
        Instant(value & TIME_MAX)
    }

    /// Returns the raw 40-bit timestamp
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than `earlier`. The
    /// counter wraps, so numerical order says nothing about time order.
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        if self.0 >= earlier.0 {
            Duration(self.0 - earlier.0)
        } else {
            Duration(TIME_MAX - earlier.0 + self.0 + 1)
        }
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        // Both operands are 40-bit, the sum can't overflow a `u64`.
        Instant((self.0 + rhs.0) % (TIME_MAX + 1))
    }
}

/// A duration in DW1000 time units
///
/// One unit is 1/(128*499.2*10^6) s, about 15.65 ps.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Duration(u64);

impl Duration {
    /// Creates a new instance of `Duration`
    ///
    /// Returns `None` if `value` does not fit in 40 bits.
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Duration(value))
        } else {
            None
        }
    }

    /// Creates a `Duration` from whole nanoseconds, rounding to the nearest
    /// unit
    ///
    /// 1 ns is 63.8976 DW1000 time units.
    pub fn from_nanos(nanos: u32) -> Self {
        // At most 32 bits times a 20-bit factor, well inside 40 bits after the
        // division.
        Duration((nanos as u64 * 638_976 + 5_000) / 10_000)
    }

    /// Returns the raw 40-bit value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the duration in nanoseconds, rounded down
    pub fn as_nanos(&self) -> u64 {
        self.0 * 10_000 / 638_976
    }
}

impl From<u32> for Duration {
    fn from(value: u32) -> Self {
        Duration(value as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_add_duration_wraps() {
        let instant = Instant::new(TIME_MAX).unwrap();
        let duration = Duration::new(2).unwrap();

        assert_eq!((instant + duration).value(), 1);
    }

    #[test]
    fn instant_duration_since_wraps() {
        let earlier = Instant::new(TIME_MAX - 9).unwrap();
        let later = Instant::new(40).unwrap();

        assert_eq!(later.duration_since(earlier).value(), 50);
    }

    #[test]
    fn duration_from_nanos() {
        assert_eq!(Duration::from_nanos(1).value(), 64);
        assert_eq!(Duration::from_nanos(6).value(), 383);
        assert_eq!(Duration::from_nanos(1_000).as_nanos(), 1_000);
    }
}
