//! # Engine Configuration (config.rs)
//!
//! Two layers of configuration feed the admission engine:
//!
//! ```text
//!     BucketDefinition (declarative, reloadable)
//!     ┌────────────────────────────────────────────┐
//!     │ name: "ThroughputPriorities"               │
//!     │ burst_period_ms: 1000                      │
//!     │ high_volume: false                         │
//!     │ groups:                                    │
//!     │   10_000 milli-ops/s → Transfer, TokenMint │
//!     │    1_000 milli-ops/s → AccountCreate       │
//!     └────────────────────────────────────────────┘
//!              │  lcm of group rates = logical rate
//!              ▼
//!     one shared Bucket + per-category requirements
//!
//!     EngineConfig (tunables)
//!     gas / byte / duration capacities, exemption range,
//!     scale factors, schedule ceilings, feature flags
//! ```
//!
//! The declarative definitions are reloaded wholesale (`rebuild`), while
//! the gas, byte, and duration buckets are rebuilt independently from
//! `EngineConfig` knobs — they represent whole-node budgets and are never
//! divided by the capacity split.

use serde::{Deserialize, Serialize};

use super::bucket::{Bucket, BucketSpecError};
use super::utils::{lcm, UNIT_SCALE};

/// Default burst window, in seconds, for the gas and byte buckets.
pub const DEFAULT_BURST_SECS: u64 = 1;

/// Functional classification of a unit of work.
///
/// The category selects which requirement group (and which
/// category-specific accounting policy) applies. The set is closed: an
/// incoming body that cannot be resolved to one of these is denied before
/// it ever reaches a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Batched fungible + non-fungible value transfer.
    Transfer,
    /// Explicit account creation (also charged for implicit creations).
    AccountCreate,
    /// Token mint; NFT mints fan out per metadata entry.
    TokenMint,
    /// Token burn.
    TokenBurn,
    /// Token-to-account association (also charged for auto-associations).
    TokenAssociate,
    /// Contract call transaction (gas metered).
    ContractCall,
    /// Contract creation transaction (gas metered).
    ContractCreate,
    /// Read-only local contract call query (gas metered).
    ContractCallLocal,
    /// Ethereum-style externally-keyed transaction (gas metered).
    EthereumTransaction,
    /// Hook dispatch (gas metered).
    HookDispatch,
    /// Deferred-execution creation.
    ScheduleCreate,
    /// Signature added to a deferred execution.
    ScheduleSign,
    /// Consensus message submission.
    SubmitMessage,
    /// File append.
    FileAppend,
    /// Account balance query (optionally counted per association).
    BalanceQuery,
    /// Account info query.
    AccountInfoQuery,
}

impl Category {
    /// Whether work of this category is charged against the gas bucket.
    pub fn is_gas_metered(self) -> bool {
        matches!(
            self,
            Category::ContractCall
                | Category::ContractCreate
                | Category::ContractCallLocal
                | Category::EthereumTransaction
                | Category::HookDispatch
        )
    }

    /// Whether work of this category can trigger implicit account
    /// creation via alias credits.
    pub fn can_auto_create(self) -> bool {
        matches!(self, Category::Transfer | Category::EthereumTransaction)
    }
}

/// A rational scale applied to a bucket requirement: `amount × num / den`,
/// truncating, computed in `u128` so realistic inputs never overflow an
/// intermediate product.
///
/// # Example
///
/// ```rust
/// use ledger_throttle::ScaleFactor;
///
/// let five_to_two = ScaleFactor::new(5, 2).unwrap();
/// assert_eq!(five_to_two.scaling(4), 10);
/// assert_eq!(five_to_two.scaling(3), 7); // truncates 7.5
/// assert_eq!(ScaleFactor::ONE_TO_ONE.scaling(42), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleFactor {
    numerator: u32,
    denominator: u32,
}

impl ScaleFactor {
    /// The identity scale.
    pub const ONE_TO_ONE: ScaleFactor = ScaleFactor {
        numerator: 1,
        denominator: 1,
    };

    /// Creates a scale factor; a zero denominator is rejected.
    pub fn new(numerator: u32, denominator: u32) -> Result<Self, ConfigError> {
        if denominator == 0 {
            return Err(ConfigError::ZeroScaleDenominator { numerator });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Applies the scale with truncating integer division.
    pub fn scaling(&self, amount: u128) -> u128 {
        amount.saturating_mul(self.numerator as u128) / self.denominator as u128
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::ONE_TO_ONE
    }
}

/// One declarative rate group: a milli-ops-per-second budget shared by a
/// set of categories within one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateGroup {
    /// Logical milli-operations per second granted to this group.
    pub milli_ops_per_sec: u64,
    /// Categories charged against this group.
    pub categories: Vec<Category>,
}

impl RateGroup {
    /// Convenience constructor.
    pub fn new(milli_ops_per_sec: u64, categories: impl Into<Vec<Category>>) -> Self {
        Self {
            milli_ops_per_sec,
            categories: categories.into(),
        }
    }
}

/// One declarative bucket: a named burst window shared by one or more
/// rate groups. Reloaded wholesale on `rebuild`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDefinition {
    /// Stable display name; also the snapshot identity.
    pub name: String,
    /// Burst window in milliseconds.
    pub burst_period_ms: u64,
    /// Whether this bucket lives in the high-volume overflow namespace.
    pub high_volume: bool,
    /// The rate groups sharing this bucket.
    pub groups: Vec<RateGroup>,
}

impl BucketDefinition {
    /// Convenience constructor for a normal-volume bucket.
    pub fn new(
        name: impl Into<String>,
        burst_period_ms: u64,
        groups: impl Into<Vec<RateGroup>>,
    ) -> Self {
        Self {
            name: name.into(),
            burst_period_ms,
            high_volume: false,
            groups: groups.into(),
        }
    }

    /// Marks this bucket as belonging to the high-volume namespace.
    pub fn high_volume(mut self) -> Self {
        self.high_volume = true;
        self
    }

    /// Resolves this definition into a live bucket plus the per-category
    /// requirements charged against it.
    ///
    /// The bucket's logical rate is the least common multiple of its
    /// groups' rates; each group's per-occurrence requirement is
    /// `lcm / group_rate` external units, and the physical rate is the
    /// logical rate integer-divided by `capacity_split`. Every requirement
    /// must fit the resulting ceiling, otherwise the definition is
    /// unsatisfiable and rejected as a whole.
    pub(crate) fn resolve(
        &self,
        capacity_split: u64,
    ) -> Result<(Bucket, Vec<(Category, u128)>), DefinitionError> {
        if capacity_split == 0 {
            return Err(DefinitionError::ZeroCapacitySplit);
        }
        if self.groups.is_empty() {
            return Err(DefinitionError::NoGroups {
                bucket: self.name.clone(),
            });
        }

        let mut logical_mtps: u64 = 1;
        for group in &self.groups {
            if group.milli_ops_per_sec == 0 {
                return Err(DefinitionError::ZeroGroupRate {
                    bucket: self.name.clone(),
                });
            }
            if group.categories.is_empty() {
                return Err(DefinitionError::EmptyGroup {
                    bucket: self.name.clone(),
                });
            }
            logical_mtps = lcm(logical_mtps, group.milli_ops_per_sec).ok_or_else(|| {
                DefinitionError::RateOverflow {
                    bucket: self.name.clone(),
                }
            })?;
        }

        let split_mtps = logical_mtps / capacity_split;
        if split_mtps == 0 {
            return Err(DefinitionError::VanishingAfterSplit {
                bucket: self.name.clone(),
                capacity_split,
            });
        }

        let bucket = Bucket::capacity(self.name.clone(), split_mtps, self.burst_period_ms)
            .map_err(DefinitionError::BadBucket)?;

        let mut requirements = Vec::new();
        let mut seen: Vec<Category> = Vec::new();
        for group in &self.groups {
            let ops_required = logical_mtps / group.milli_ops_per_sec;
            let units_per_occurrence = (ops_required as u128).saturating_mul(UNIT_SCALE);
            if units_per_occurrence > bucket.ceiling() {
                return Err(DefinitionError::Unsatisfiable {
                    bucket: self.name.clone(),
                    milli_ops_per_sec: group.milli_ops_per_sec,
                });
            }
            for &category in &group.categories {
                if seen.contains(&category) {
                    return Err(DefinitionError::RepeatedCategory {
                        bucket: self.name.clone(),
                        category,
                    });
                }
                seen.push(category);
                requirements.push((category, units_per_occurrence));
            }
        }

        Ok((bucket, requirements))
    }
}

/// A malformed declarative bucket definition.
///
/// During `rebuild`, one bad definition is logged and skipped; the rest of
/// the configuration still applies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// The capacity split was zero, so no bucket could hold anything.
    #[error("capacity split must be nonzero")]
    ZeroCapacitySplit,
    /// A bucket with no rate groups throttles nothing.
    #[error("bucket '{bucket}' declares no rate groups")]
    NoGroups {
        /// The offending bucket.
        bucket: String,
    },
    /// A rate group with no categories is meaningless.
    #[error("bucket '{bucket}' declares a rate group with no categories")]
    EmptyGroup {
        /// The offending bucket.
        bucket: String,
    },
    /// A rate group declared zero milli-ops per second.
    #[error("bucket '{bucket}' declares a zero-rate group")]
    ZeroGroupRate {
        /// The offending bucket.
        bucket: String,
    },
    /// The least common multiple of the group rates overflowed.
    #[error("bucket '{bucket}' has group rates whose logical rate overflows")]
    RateOverflow {
        /// The offending bucket.
        bucket: String,
    },
    /// Integer division by the capacity split left no capacity at all.
    #[error("bucket '{bucket}' has zero capacity after splitting {capacity_split} ways")]
    VanishingAfterSplit {
        /// The offending bucket.
        bucket: String,
        /// The configured split.
        capacity_split: u64,
    },
    /// The burst window cannot hold even one occurrence of some group.
    #[error(
        "bucket '{bucket}' cannot hold one occurrence of its \
         {milli_ops_per_sec} milli-ops/sec group within its burst period"
    )]
    Unsatisfiable {
        /// The offending bucket.
        bucket: String,
        /// The group rate whose requirement does not fit.
        milli_ops_per_sec: u64,
    },
    /// The same category appeared in two groups of one bucket.
    #[error("bucket '{bucket}' lists category {category:?} more than once")]
    RepeatedCategory {
        /// The offending bucket.
        bucket: String,
        /// The repeated category.
        category: Category,
    },
    /// The underlying bucket construction failed.
    #[error(transparent)]
    BadBucket(#[from] BucketSpecError),
}

/// Engine tunables supplied by the node's configuration layer.
///
/// The engine holds one immutable copy per accumulator; the caller swaps
/// in a fresh copy (followed by the relevant `apply_*_config` /
/// `rebuild` calls) when the node's configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Payer ids `1..=throttle_exempt_max_id` are exempt: they neither
    /// consume capacity nor are limited by it.
    pub throttle_exempt_max_id: u64,

    /// Whether gas accounting gates gas-metered categories.
    pub gas_throttle_enabled: bool,
    /// Gas admitted per second by the admission-time (frontend) instance.
    pub max_gas_per_sec_frontend: u64,
    /// Gas admitted per second by the consensus-time (backend) instance.
    pub max_gas_per_sec_backend: u64,

    /// Whether oversized payloads are charged against the byte bucket.
    pub oversize_enabled: bool,
    /// Bytes of oversize admitted per second.
    pub max_bytes_per_sec: u64,
    /// Payload bytes below this threshold are never byte-charged.
    pub max_ordinary_payload_bytes: u64,
    /// Categories allowed to carry oversized payloads at all.
    pub oversize_categories: Vec<Category>,

    /// Whether the ops-duration bucket is considered by callers.
    pub duration_throttle_enabled: bool,
    /// Absolute ops-duration capacity.
    pub duration_capacity: u64,
    /// Ops-duration units freed per second.
    pub duration_units_freed_per_sec: u64,

    /// Scale applied to per-metadata NFT mint fan-out.
    pub nft_mint_scale: ScaleFactor,
    /// Whether implicit token associations are charged during transfers.
    pub unlimited_auto_associations_enabled: bool,

    /// Whether deferred executions use long-term scheduling semantics.
    pub long_term_schedules_enabled: bool,
    /// Ceiling on executions already due within one expiry second.
    pub max_schedules_per_sec: u64,
    /// Expiry offset applied when no explicit expiry is given, seconds.
    pub default_schedule_expiry_secs: u64,

    /// Categories eligible for the high-volume overflow namespace.
    pub high_volume_categories: Vec<Category>,

    /// Whether balance queries are charged per existing association.
    pub counting_balance_queries_enabled: bool,
    /// Clamp on the association count charged per balance query.
    pub max_relations_per_balance_query: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle_exempt_max_id: 100,
            gas_throttle_enabled: true,
            max_gas_per_sec_frontend: 15_000_000,
            max_gas_per_sec_backend: 15_000_000,
            oversize_enabled: false,
            max_bytes_per_sec: 0,
            max_ordinary_payload_bytes: 6_144,
            oversize_categories: vec![Category::EthereumTransaction],
            duration_throttle_enabled: true,
            duration_capacity: 10_000_000,
            duration_units_freed_per_sec: 1_000_000,
            nft_mint_scale: ScaleFactor::ONE_TO_ONE,
            unlimited_auto_associations_enabled: true,
            long_term_schedules_enabled: false,
            max_schedules_per_sec: 100,
            default_schedule_expiry_secs: 1_800,
            high_volume_categories: vec![Category::Transfer],
            counting_balance_queries_enabled: false,
            max_relations_per_balance_query: 1_000,
        }
    }
}

impl EngineConfig {
    /// Structural validation.
    ///
    /// Contradictory-but-runnable settings (accounting enabled with zero
    /// capacity) are *not* errors — they are warned about when the
    /// corresponding bucket is built, and the engine runs in the
    /// deny-everything mode those settings describe.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.long_term_schedules_enabled && self.default_schedule_expiry_secs == 0 {
            return Err(ConfigError::ZeroScheduleExpiryOffset);
        }
        Ok(())
    }
}

/// An invalid engine configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A scale factor denominator of zero was supplied.
    #[error("scale factor {numerator}:0 has a zero denominator")]
    ZeroScaleDenominator {
        /// The numerator that came with the bad denominator.
        numerator: u32,
    },
    /// Long-term scheduling without a default expiry offset would pin
    /// every implicit expiry to the valid-start second.
    #[error("long-term scheduling requires a nonzero default expiry offset")]
    ZeroScheduleExpiryOffset,
}
