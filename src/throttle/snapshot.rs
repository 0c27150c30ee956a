//! # Usage Snapshots (snapshot.rs)
//!
//! A node that restarts mid-second must not grant itself a fresh burst
//! window. The mutable half of every bucket (`used`, last decision time)
//! is exported as a plain serializable snapshot, persisted by the
//! embedder, and restored on startup.
//!
//! Restoration is tolerant of configuration drift: when the persisted
//! shape no longer matches the running definitions, the engine keeps its
//! fresh (empty) state rather than guessing at a mapping.

use serde::{Deserialize, Serialize};

/// The persisted mutable state of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketUsage {
    /// Bucket display name, recorded for operator-facing diffing.
    pub name: String,
    /// Reserved nano-units at snapshot time.
    pub used: u128,
    /// Nanosecond timestamp of the bucket's last leak calculation.
    pub last_decision_ns: u64,
}

/// The complete mutable state of one accumulator.
///
/// Bucket order is structural: normal-volume buckets in definition order,
/// then high-volume buckets in definition order. The gas and ops-duration
/// entries are present only when the corresponding bucket was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Per-category capacity buckets.
    pub tps: Vec<BucketUsage>,
    /// The whole-node gas bucket, when gas accounting is configured.
    pub gas: Option<BucketUsage>,
    /// The ops-duration bucket, when duration accounting is configured.
    pub ops_duration: Option<BucketUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_serde() {
        let snap = UsageSnapshot {
            tps: vec![BucketUsage {
                name: "Throughput".into(),
                used: 123_456_789_000,
                last_decision_ns: 42,
            }],
            gas: Some(BucketUsage {
                name: "Gas".into(),
                used: u128::MAX,
                last_decision_ns: 7,
            }),
            ops_duration: None,
        };

        let json = serde_json::to_string(&snap).unwrap();
        let back: UsageSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
