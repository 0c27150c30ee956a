//! # Requirement Groups (group.rs)
//!
//! A category's admission cost is rarely a single bucket reservation. Each
//! category resolves to a *requirement group*: an ordered list of
//! (bucket, units-per-occurrence) pairs that must all be satisfied for one
//! verdict.
//!
//! ```text
//!     check(Transfer, n = 3)
//!        │
//!        ├─ bucket "Throughput"  needs 3 × 2e9 nano-units ── ok
//!        ├─ bucket "Priorities"  needs 3 × 5e9 nano-units ── FULL
//!        │
//!        └─ roll back "Throughput" and deny
//! ```
//!
//! Reservations are attempted in definition order and rolled back in
//! reverse on the first failure, so a denied call leaves every bucket with
//! exactly the state it had before the call (modulo the leak that time
//! itself caused).

use super::bucket::{Bucket, BucketId};
use super::config::ScaleFactor;

/// One bucket charge within a requirement group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Requirement {
    /// Arena index of the bucket to charge.
    pub bucket: BucketId,
    /// Nano-units charged per occurrence, before scaling.
    pub units_per_occurrence: u128,
}

/// The full set of bucket charges behind one category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RequirementGroup {
    requirements: Vec<Requirement>,
}

impl RequirementGroup {
    pub(crate) fn new(requirements: Vec<Requirement>) -> Self {
        Self { requirements }
    }

    /// Attempts to reserve `occurrences` worth of every requirement,
    /// scaled by `scale`, against the bucket arena.
    ///
    /// All-or-nothing: on the first bucket that lacks room, every charge
    /// already placed by this call is released in reverse order and the
    /// method returns `false`. On success the charges are appended to
    /// `usages` so the caller can credit its sink (or replay the exact
    /// inverse later).
    ///
    /// Buckets are assumed already leaked to the decision instant; this
    /// method performs no leaking of its own, so rollback is bit-exact.
    pub(crate) fn all_satisfied_at(
        &self,
        arena: &mut [Bucket],
        now_ns: u64,
        occurrences: u64,
        scale: ScaleFactor,
        usages: &mut Vec<ThrottleUsage>,
    ) -> bool {
        let mark = usages.len();
        for req in &self.requirements {
            let amount = scale.scaling(req.units_per_occurrence.saturating_mul(occurrences as u128));
            if arena[req.bucket].try_reserve(now_ns, amount) {
                usages.push(ThrottleUsage {
                    bucket: BucketRef::Tps(req.bucket),
                    amount,
                });
            } else {
                for undo in usages.drain(mark..).rev() {
                    if let BucketRef::Tps(id) = undo.bucket {
                        arena[id].release(undo.amount);
                    }
                }
                return false;
            }
        }
        true
    }

    /// Releases `occurrences` worth of every unscaled requirement.
    ///
    /// This is the inverse of a prior `all_satisfied_at` with the identity
    /// scale; it never leaks, so it composes with later decisions exactly.
    pub(crate) fn undo_claimed(&self, arena: &mut [Bucket], occurrences: u64) {
        for req in &self.requirements {
            let amount = req.units_per_occurrence.saturating_mul(occurrences as u128);
            arena[req.bucket].release(amount);
        }
    }

    /// Arena indices of every bucket this group charges, in charge order.
    pub(crate) fn bucket_ids(&self) -> impl Iterator<Item = BucketId> + '_ {
        self.requirements.iter().map(|r| r.bucket)
    }

    /// Human-readable summary for rebuild logging.
    pub(crate) fn describe(&self, arena: &[Bucket]) -> String {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|r| format!("{} nano-units in '{}'", r.units_per_occurrence, arena[r.bucket].name()))
            .collect();
        parts.join(" + ")
    }
}

/// Which physical bucket a usage entry refers to.
///
/// Tps buckets are addressed by arena index; the gas and byte buckets are
/// singletons and get their own tags so a usage list survives a rebuild
/// of the tps arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketRef {
    /// A per-category capacity bucket, by arena index.
    Tps(BucketId),
    /// The whole-node gas bucket.
    Gas,
    /// The whole-node byte bucket.
    Bytes,
}

/// One successful bucket charge, as recorded for a usage sink.
///
/// Replaying a usage list through `release_usage` is the exact inverse of
/// the admission that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleUsage {
    /// The bucket that was charged.
    pub bucket: BucketRef,
    /// The charge, in internal nano-units.
    pub amount: u128,
}

/// Where successful admissions report their bucket charges.
///
/// The disabled state is a first-class variant rather than an optional
/// sink, so call sites never branch on nullability.
#[derive(Debug)]
pub enum UsageSink<'a> {
    /// Charges are applied but not reported.
    Disabled,
    /// Charges are appended to the given list on admission.
    Recording(&'a mut Vec<ThrottleUsage>),
}

impl UsageSink<'_> {
    pub(crate) fn record(&mut self, usages: Vec<ThrottleUsage>) {
        if let UsageSink::Recording(out) = self {
            out.extend(usages);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Vec<Bucket> {
        vec![
            Bucket::capacity("A", 10_000, 1_000).unwrap(),
            Bucket::capacity("B", 1, 1_000).unwrap(),
        ]
    }

    fn group() -> RequirementGroup {
        RequirementGroup::new(vec![
            Requirement {
                bucket: 0,
                units_per_occurrence: 1_000_000_000,
            },
            Requirement {
                bucket: 1,
                units_per_occurrence: 1_000_000_000,
            },
        ])
    }

    #[test]
    fn satisfied_group_charges_every_bucket() {
        let mut arena = arena();
        let mut usages = Vec::new();

        assert!(group().all_satisfied_at(&mut arena, 0, 1, ScaleFactor::ONE_TO_ONE, &mut usages));
        assert_eq!(arena[0].used(), 1_000_000_000);
        assert_eq!(arena[1].used(), 1_000_000_000);
        assert_eq!(usages.len(), 2);
        assert_eq!(usages[0].bucket, BucketRef::Tps(0));
    }

    #[test]
    fn failed_group_rolls_back_partial_charges() {
        let mut arena = arena();
        let mut usages = Vec::new();

        // Bucket B holds exactly one occurrence; the second attempt fails
        // there after A was already charged.
        assert!(group().all_satisfied_at(&mut arena, 0, 1, ScaleFactor::ONE_TO_ONE, &mut usages));
        let a_used = arena[0].used();

        assert!(!group().all_satisfied_at(&mut arena, 0, 1, ScaleFactor::ONE_TO_ONE, &mut usages));
        assert_eq!(arena[0].used(), a_used);
        assert_eq!(usages.len(), 2);
    }

    #[test]
    fn scale_applies_to_the_whole_charge() {
        let mut arena = arena();
        let mut usages = Vec::new();
        let half = ScaleFactor::new(1, 2).unwrap();

        assert!(group().all_satisfied_at(&mut arena, 0, 2, half, &mut usages));
        assert_eq!(arena[0].used(), 1_000_000_000);
        assert_eq!(arena[1].used(), 1_000_000_000);
    }

    #[test]
    fn undo_claimed_is_the_unscaled_inverse() {
        let mut arena = arena();
        let mut usages = Vec::new();
        let g = group();

        assert!(g.all_satisfied_at(&mut arena, 0, 1, ScaleFactor::ONE_TO_ONE, &mut usages));
        g.undo_claimed(&mut arena, 1);
        assert_eq!(arena[0].used(), 0);
        assert_eq!(arena[1].used(), 0);
    }

    #[test]
    fn disabled_sink_discards_records() {
        let mut sink = UsageSink::Disabled;
        sink.record(vec![ThrottleUsage {
            bucket: BucketRef::Gas,
            amount: 1,
        }]);

        let mut out = Vec::new();
        let mut sink = UsageSink::Recording(&mut out);
        sink.record(vec![ThrottleUsage {
            bucket: BucketRef::Gas,
            amount: 1,
        }]);
        assert_eq!(out.len(), 1);
    }
}
