//! # Deterministic Bucket Primitives (bucket.rs)
//!
//! This module implements the atomic rate-limited resource at the heart of
//! the admission engine: a leaky bucket with nanosecond-resolution leak
//! math, exact integer arithmetic, and a strict reserve/rollback contract.
//!
//! ## The Leaky Bucket Model
//!
//! ```text
//!     One bucket, three capacity interpretations:
//!
//!     ┌─────────────────────────────┐ ◄── ceiling
//!     │░░░░░░░░░░░░░░░░░░░░░░░░░░░░░│
//!     │░░░░░░░ free capacity ░░░░░░░│
//!     ├─────────────────────────────┤ ◄── used
//!     │█████ reserved so far ███████│      │
//!     └───────────┬─────────────────┘      │ leaks at a fixed
//!                 └──────────────────────◄─┘ rate per nanosecond
//! ```
//!
//! All three bucket flavors (per-category capacity, leaky gas/byte, and
//! ops-duration) share the same leak-then-test-then-reserve core and differ
//! only in how their ceiling and leak rate are derived from configuration —
//! a closed set of kinds, expressed as a tagged enum rather than open
//! inheritance.
//!
//! ## Determinism Rules
//!
//! - All state and arithmetic is integer; intermediate products are `u128`.
//! - Overflow saturates to the maximum representable value; it never wraps
//!   and never panics.
//! - Time is caller-supplied nanoseconds; the bucket never reads a clock.
//! - A failed reservation mutates nothing beyond the leak that preceded it.

use serde::{Deserialize, Serialize};

use super::utils::UNIT_SCALE;

/// Stable index of a bucket within the accumulator's bucket arena.
///
/// Requirement groups address buckets by id rather than holding live
/// references, so several groups can share one physical bucket and a
/// rebuild is a single atomic swap of the arena.
pub type BucketId = usize;

/// How a bucket's ceiling and leak rate are interpreted.
///
/// The kind set is fixed: these are the only three resource dimensions the
/// engine accounts for, and they are never extended at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketKind {
    /// Per-category transaction-rate bucket. The rate is expressed in
    /// milli-operations per second (already divided by the capacity
    /// split), and the ceiling is `rate × burst period`.
    Capacity {
        /// Milli-operations per second after the capacity split.
        milli_ops_per_sec: u64,
        /// Burst window in milliseconds.
        burst_period_ms: u64,
    },
    /// Raw-unit bucket (gas, bytes). The rate is external units per
    /// second and the ceiling is `rate × burst seconds`.
    LeakyUnit {
        /// External units leaked (and admitted, sustained) per second.
        units_per_sec: u64,
        /// Burst window in whole seconds.
        burst_secs: u64,
    },
    /// Weighted-cost bucket (contract ops duration). Capacity is an
    /// absolute unit ceiling rather than a rate, and over-consumption is
    /// explicitly allowed.
    Duration {
        /// Absolute ceiling in external units.
        capacity: u64,
        /// External units freed per second.
        units_freed_per_sec: u64,
    },
}

/// A deterministic leaky bucket.
///
/// Internally the bucket counts *nano-units*: one external unit is
/// `1e9` nano-units, so a bucket leaking `R` external units per second
/// leaks exactly `R` nano-units per nanosecond. This keeps the leak math
/// free of division and therefore free of truncation drift between nodes.
///
/// # Example
///
/// ```rust
/// use ledger_throttle::Bucket;
///
/// // 1000 gas per second, 1 second burst window.
/// let mut gas = Bucket::leaky_unit("Gas", 1000, 1).unwrap();
///
/// assert!(gas.try_reserve_units(0, 800));
/// assert!(!gas.try_reserve_units(0, 300));   // 800 + 300 > 1000
/// assert!(gas.try_reserve_units(0, 200));    // exactly fills the bucket
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    name: String,
    kind: BucketKind,
    /// Ceiling in nano-units.
    ceiling: u128,
    /// Leak per nanosecond, in nano-units.
    leak_per_ns: u128,
    /// Nano-units currently reserved. May exceed `ceiling` only for the
    /// `Duration` kind, via `force_use`.
    used: u128,
    /// Nanosecond timestamp of the last leak calculation.
    last_decision_ns: u64,
}

impl Bucket {
    /// Creates a per-category capacity bucket.
    ///
    /// `milli_ops_per_sec` is the post-split rate. Both the rate and the
    /// burst period must be nonzero: a capacity bucket that can never
    /// admit anything is a definition error, reported by the rebuild path
    /// rather than silently constructed.
    pub fn capacity(
        name: impl Into<String>,
        milli_ops_per_sec: u64,
        burst_period_ms: u64,
    ) -> Result<Self, BucketSpecError> {
        let name = name.into();
        if milli_ops_per_sec == 0 {
            return Err(BucketSpecError::ZeroRate { name });
        }
        if burst_period_ms == 0 {
            return Err(BucketSpecError::ZeroBurstPeriod { name });
        }
        // ceiling = mtps × burst-seconds external units, in nano-units:
        // mtps × (burst_ms / 1000) × 1e9 = mtps × burst_ms × 1e6.
        let ceiling = (milli_ops_per_sec as u128)
            .saturating_mul(burst_period_ms as u128)
            .saturating_mul(1_000_000);
        Ok(Self {
            name,
            kind: BucketKind::Capacity {
                milli_ops_per_sec,
                burst_period_ms,
            },
            ceiling,
            leak_per_ns: milli_ops_per_sec as u128,
            used: 0,
            last_decision_ns: 0,
        })
    }

    /// Creates a raw-unit (gas/byte) bucket.
    ///
    /// A zero rate is allowed here: "accounting enabled but capacity zero"
    /// is a valid, if probably unintended, deny-everything configuration
    /// that the caller warns about rather than rejects.
    pub fn leaky_unit(
        name: impl Into<String>,
        units_per_sec: u64,
        burst_secs: u64,
    ) -> Result<Self, BucketSpecError> {
        let name = name.into();
        if burst_secs == 0 {
            return Err(BucketSpecError::ZeroBurstPeriod { name });
        }
        let ceiling = (units_per_sec as u128)
            .saturating_mul(burst_secs as u128)
            .saturating_mul(UNIT_SCALE);
        Ok(Self {
            name,
            kind: BucketKind::LeakyUnit {
                units_per_sec,
                burst_secs,
            },
            ceiling,
            leak_per_ns: units_per_sec as u128,
            used: 0,
            last_decision_ns: 0,
        })
    }

    /// Creates an ops-duration bucket with an absolute unit ceiling.
    pub fn duration(
        name: impl Into<String>,
        capacity: u64,
        units_freed_per_sec: u64,
    ) -> Result<Self, BucketSpecError> {
        Ok(Self {
            name: name.into(),
            kind: BucketKind::Duration {
                capacity,
                units_freed_per_sec,
            },
            ceiling: (capacity as u128).saturating_mul(UNIT_SCALE),
            leak_per_ns: units_freed_per_sec as u128,
            used: 0,
            last_decision_ns: 0,
        })
    }

    /// The bucket's display name (stable across rebuilds with the same
    /// definitions; used as the snapshot identity).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The capacity interpretation this bucket was built with.
    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    /// Ceiling in internal nano-units.
    pub(crate) fn ceiling(&self) -> u128 {
        self.ceiling
    }

    /// Currently reserved amount in internal nano-units.
    pub(crate) fn used(&self) -> u128 {
        self.used
    }

    /// Nanosecond timestamp of the last leak calculation.
    pub(crate) fn last_decision_ns(&self) -> u64 {
        self.last_decision_ns
    }

    /// Moves `last_decision_ns` forward to `now_ns` and drains the amount
    /// that leaked out in between, clamped at zero.
    ///
    /// Leaking twice at the same instant is a no-op the second time, and a
    /// timestamp earlier than the last decision never rewinds state.
    pub fn leak_until(&mut self, now_ns: u64) {
        if now_ns <= self.last_decision_ns {
            return;
        }
        let elapsed = now_ns - self.last_decision_ns;
        let leaked = (elapsed as u128).saturating_mul(self.leak_per_ns);
        self.used = self.used.saturating_sub(leaked);
        self.last_decision_ns = now_ns;
    }

    /// Leak-then-test-then-reserve, in internal nano-units.
    ///
    /// Returns `false` without reserving anything if the bucket lacks
    /// room. The capacity test is monotone: if `amount` is denied, every
    /// larger amount is denied too, and neither attempt mutates `used`.
    pub(crate) fn try_reserve(&mut self, now_ns: u64, amount: u128) -> bool {
        self.leak_until(now_ns);
        if amount > self.ceiling.saturating_sub(self.used) {
            return false;
        }
        self.used += amount;
        true
    }

    /// Reserves in external units. Convenience wrapper used by the gas and
    /// byte accounting paths, where amounts arrive unscaled.
    pub fn try_reserve_units(&mut self, now_ns: u64, units: u64) -> bool {
        self.try_reserve(now_ns, (units as u128).saturating_mul(UNIT_SCALE))
    }

    /// Subtracts a previously reserved internal amount without leaking,
    /// clamped at zero. `last_decision_ns` is untouched, so a reserve
    /// followed by a release restores the prior state bit-for-bit.
    pub(crate) fn release(&mut self, amount: u128) {
        self.used = self.used.saturating_sub(amount);
    }

    /// Releases in external units (the gas-refund path).
    pub fn release_units(&mut self, units: u64) {
        self.release((units as u128).saturating_mul(UNIT_SCALE));
    }

    /// Leaks to `now_ns`, then adds `units` unconditionally.
    ///
    /// This is the duration bucket's post-execution accounting: the charge
    /// is applied after the work already ran, so there is nothing to deny.
    /// `used` may exceed the ceiling — the intentional one-time overrun
    /// allowance — after which the bucket reports zero free capacity until
    /// enough has leaked out.
    pub fn force_use_units(&mut self, now_ns: u64, units: u64) {
        self.leak_until(now_ns);
        self.used = self
            .used
            .saturating_add((units as u128).saturating_mul(UNIT_SCALE));
    }

    /// Free capacity in external units, clamped at zero.
    pub fn free_capacity_units(&self) -> u64 {
        let free = self.ceiling.saturating_sub(self.used) / UNIT_SCALE;
        free.min(u64::MAX as u128) as u64
    }

    /// Instantaneous utilization in basis points (0..=10_000), with no
    /// time-based leak applied. Integer math only — congestion-pricing
    /// consumers need identical answers on every node.
    ///
    /// A zero-ceiling bucket reports fully utilized.
    pub fn utilization_bps(&self) -> u32 {
        if self.ceiling == 0 {
            return 10_000;
        }
        let bps = self.used.saturating_mul(10_000) / self.ceiling;
        bps.min(10_000) as u32
    }

    /// Captures the mutable state for a usage snapshot.
    pub(crate) fn snapshot_state(&self) -> (u128, u64) {
        (self.used, self.last_decision_ns)
    }

    /// Restores mutable state from a usage snapshot.
    ///
    /// The snapshot is trusted to have come from a bucket with the same
    /// configuration; `used` above the ceiling is carried as-is, matching
    /// the duration bucket's overrun semantics.
    pub(crate) fn restore_state(&mut self, used: u128, last_decision_ns: u64) {
        self.used = used;
        self.last_decision_ns = last_decision_ns;
    }
}

/// A structurally invalid bucket specification.
///
/// Raised at construction time only; a running bucket never fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BucketSpecError {
    /// A capacity bucket was given a zero rate, so it could never admit
    /// anything by construction.
    #[error("bucket '{name}' has a zero rate and can never admit work")]
    ZeroRate {
        /// The offending bucket's name.
        name: String,
    },
    /// The burst window is zero, which would make the ceiling zero.
    #[error("bucket '{name}' has a zero burst period")]
    ZeroBurstPeriod {
        /// The offending bucket's name.
        name: String,
    },
}
