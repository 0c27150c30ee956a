//! # Deterministic Arithmetic Helpers (utils.rs)
//!
//! Small, exactly-reproducible building blocks shared by the rest of the
//! engine: the caller-supplied timestamp type and the integer math used to
//! derive bucket requirements.
//!
//! ## Why No Wall Clock?
//!
//! ```text
//!     Node A ──┐
//!     Node B ──┼── same consensus time ──► same leak ──► same verdict
//!     Node C ──┘
//! ```
//!
//! Every node in the network must reach the same admission decision from
//! the same inputs. The engine therefore never reads a clock: `Timestamp`
//! values are injected by the caller (usually the consensus timestamp of
//! the unit of work), and every computation on them is integer-only.

use serde::{Deserialize, Serialize};

/// Nanoseconds per second, as used throughout the leak math.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Internal nano-units per external unit.
///
/// One external unit (a milli-op requirement, a unit of gas, a byte, an
/// ops-duration unit) is carried internally as `UNIT_SCALE` nano-units so
/// that a bucket leaking `R` external units per second leaks exactly `R`
/// nano-units per nanosecond — no division, no remainder, no drift.
pub(crate) const UNIT_SCALE: u128 = 1_000_000_000;

/// A caller-supplied instant with nanosecond resolution.
///
/// This is the only notion of time the engine knows about. It is expected
/// to be a consensus timestamp (or, at admission time, the node's best
/// estimate of one), and it must be non-decreasing across successive calls
/// into the same accumulator for the leak math to behave as specified.
///
/// # Example
///
/// ```rust
/// use ledger_throttle::Timestamp;
///
/// let t = Timestamp::from_secs(1_700_000_000);
/// assert_eq!(t.seconds, 1_700_000_000);
/// assert_eq!(t.plus_nanos(500).nanos, 500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Whole seconds since the caller's epoch.
    pub seconds: u64,
    /// Sub-second nanoseconds, `0..NANOS_PER_SEC`.
    pub nanos: u32,
}

impl Timestamp {
    /// Creates a timestamp from whole seconds.
    pub fn from_secs(seconds: u64) -> Self {
        Self { seconds, nanos: 0 }
    }

    /// Creates a timestamp from seconds and sub-second nanoseconds.
    ///
    /// Nanoseconds are normalized into the seconds field if they overflow
    /// a whole second.
    pub fn new(seconds: u64, nanos: u32) -> Self {
        let extra = (nanos as u64) / NANOS_PER_SEC;
        Self {
            seconds: seconds.saturating_add(extra),
            nanos: (nanos as u64 % NANOS_PER_SEC) as u32,
        }
    }

    /// Total nanoseconds since the epoch, saturating at `u64::MAX`.
    ///
    /// A `u64` of nanoseconds covers roughly 584 years, which is plenty
    /// for any realistic consensus timeline.
    pub fn as_nanos(&self) -> u64 {
        self.seconds
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(self.nanos as u64)
    }

    /// Returns this timestamp advanced by the given nanoseconds.
    pub fn plus_nanos(&self, nanos: u64) -> Self {
        let total = self.as_nanos().saturating_add(nanos);
        Self {
            seconds: total / NANOS_PER_SEC,
            nanos: (total % NANOS_PER_SEC) as u32,
        }
    }

    /// Returns this timestamp advanced by the given seconds.
    pub fn plus_secs(&self, seconds: u64) -> Self {
        Self {
            seconds: self.seconds.saturating_add(seconds),
            nanos: self.nanos,
        }
    }
}

/// Greatest common divisor (Euclid). `gcd(n, 0) == n`.
pub(crate) fn gcd(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Least common multiple, `None` on overflow or when either input is zero.
///
/// Used to derive the logical rate of a bucket from its rate groups; an
/// overflowing combination is a malformed definition, not a panic.
pub(crate) fn lcm(a: u64, b: u64) -> Option<u64> {
    if a == 0 || b == 0 {
        return None;
    }
    (a / gcd(a, b)).checked_mul(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_nanos_roundtrip() {
        let t = Timestamp::new(12, 345);
        assert_eq!(t.as_nanos(), 12 * NANOS_PER_SEC + 345);

        let t2 = t.plus_nanos(NANOS_PER_SEC + 1);
        assert_eq!(t2.seconds, 13);
        assert_eq!(t2.nanos, 346);
    }

    #[test]
    fn timestamp_normalizes_overflowing_nanos() {
        let t = Timestamp::new(1, 2_500_000_000);
        assert_eq!(t.seconds, 3);
        assert_eq!(t.nanos, 500_000_000);
    }

    #[test]
    fn timestamp_saturates_instead_of_wrapping() {
        let t = Timestamp::from_secs(u64::MAX);
        assert_eq!(t.as_nanos(), u64::MAX);
    }

    #[test]
    fn gcd_lcm_basics() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(lcm(4, 6), Some(12));
        assert_eq!(lcm(1, 1), Some(1));
        assert_eq!(lcm(0, 5), None);
        assert_eq!(lcm(u64::MAX, 2), None);
    }
}
