//! # Throttle Engine Modules
//!
//! The engine is organized bottom-up:
//!
//! ```text
//!     utils        timestamps, gcd/lcm, the nano-unit scale
//!       │
//!     bucket       one leaky bucket, three capacity interpretations
//!       │
//!     group        per-category requirement groups over a bucket arena
//!       │
//!     config ──────declarative definitions + engine tunables
//!     work ────────the unit-of-work model and alias heuristics
//!     stores ──────read-only seams into ledger state
//!     snapshot ────serializable mutable state
//!       │
//!     accumulator  the orchestrator rendering verdicts
//! ```
//!
//! Everything a typical embedder needs is re-exported from the crate
//! root; the modules themselves stay private.

mod accumulator;
mod bucket;
mod config;
mod group;
mod snapshot;
mod stores;
mod utils;
mod work;

pub use accumulator::{DenialReason, EngineRole, ThrottleAccumulator, Verdict};
pub use bucket::{Bucket, BucketId, BucketKind, BucketSpecError};
pub use config::{
    BucketDefinition, Category, ConfigError, DefinitionError, EngineConfig, RateGroup,
    ScaleFactor, DEFAULT_BURST_SECS,
};
pub use group::{BucketRef, ThrottleUsage, UsageSink};
pub use snapshot::{BucketUsage, UsageSnapshot};
pub use stores::{AccountLookup, InMemoryState, ScheduleLookup, StateStores};
pub use utils::{Timestamp, NANOS_PER_SEC};
pub use work::{
    AccountId, AccountRef, Adjustment, EthPayload, NftTransfer, QueryDetails, ScheduledWork,
    TokenId, TokenTransferList, TransferBody, WorkDetails, WorkItem, EVM_ADDRESS_LEN,
};
