//! # ledger-throttle
//!
//! Deterministic, multi-dimensional admission control for distributed
//! ledger nodes.
//!
//! Every node in a ledger network must agree on which units of work are
//! admitted; a throttle that consults wall clocks, floats, or thread
//! timing would fork the network. This crate renders admission verdicts
//! from caller-supplied timestamps using exact integer arithmetic, so
//! identical inputs yield identical verdicts on every machine.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!      WorkItem ──────►│      ThrottleAccumulator     │────► Verdict
//!      Timestamp ─────►│                              │
//!                      │  ┌────────┐  ┌────────────┐  │
//!      StateStores ───►│  │  gas   │  │  capacity  │  │
//!      (aliases,       │  │ bytes  │  │  buckets   │  │
//!       relations,     │  │duration│  │ (by group) │  │
//!       schedules)     │  └────────┘  └────────────┘  │
//!                      └──────────────────────────────┘
//! ```
//!
//! Three resource dimensions are accounted for:
//!
//! - **Throughput** — per-category leaky buckets built from declarative
//!   [`BucketDefinition`]s, with multi-bucket requirement groups,
//!   high-volume overflow routing, and hidden-work policies (implicit
//!   account creation, auto-association, NFT mint fan-out, deferred
//!   executions).
//! - **Gas** — a whole-node budget gating contract work, with admission
//!   reservation and post-execution refund.
//! - **Bytes / ops duration** — oversized-payload and execution-time
//!   budgets with explicit overrun semantics.
//!
//! ## Quick Start
//!
//! ```rust
//! use ledger_throttle::prelude::*;
//!
//! let engine_result = EngineBuilder::new(EngineRole::Backend)
//!     .config(EngineConfig::default())
//!     .definitions(vec![BucketDefinition::new(
//!         "Throughput",
//!         1_000, // 1s burst window
//!         vec![
//!             RateGroup::new(10_000, vec![Category::Transfer, Category::SubmitMessage]),
//!             RateGroup::new(2_000, vec![Category::AccountCreate]),
//!         ],
//!     )])
//!     .try_build();
//! let mut engine = engine_result.unwrap();
//!
//! let state = InMemoryState::default();
//! let work = WorkItem::plain(AccountId(2_001), Category::Transfer);
//! let verdict = engine.check_and_reserve(
//!     &work,
//!     Timestamp::from_secs(0),
//!     &state,
//!     UsageSink::Disabled,
//!     false,
//! );
//! assert!(verdict.is_admitted());
//! ```
//!
//! ## Determinism Guarantees
//!
//! - No clocks: time is a caller-supplied [`Timestamp`].
//! - No floats: all arithmetic is integer (`u128` intermediates).
//! - No panics on data: overflow saturates; malformed input is a denial.
//! - Denied calls roll back every reservation they placed, so a denial
//!   is invisible to later decisions.
//!
//! The engine is intentionally single-threaded: a node runs one
//! accumulator per decision point and serializes decisions through it,
//! because the verdict sequence itself must be deterministic.

mod throttle;

pub use throttle::*;

/// Crate version, from the manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// The most common imports, bundled.
///
/// ```rust
/// use ledger_throttle::prelude::*;
/// ```
pub mod prelude {
    pub use crate::throttle::{
        AccountId, AccountRef, BucketDefinition, Category, DenialReason, EngineConfig,
        EngineRole, InMemoryState, QueryDetails, RateGroup, ScaleFactor, StateStores,
        ThrottleAccumulator, Timestamp, UsageSink, UsageSnapshot, Verdict, WorkDetails, WorkItem,
    };
    pub use crate::EngineBuilder;
}

use tracing::debug;

/// A configuration that an [`EngineBuilder`] refused to build from.
///
/// The builder is strict where the running engine is lenient: a rebuild
/// on a live accumulator skips bad definitions and keeps going, but a
/// builder given a bad definition fails outright, on the theory that
/// startup is the right time to notice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The engine configuration failed validation.
    #[error(transparent)]
    Config(#[from] throttle::ConfigError),
    /// A declarative bucket definition failed to resolve.
    #[error(transparent)]
    Definition(#[from] throttle::DefinitionError),
}

/// Step-by-step construction of a [`ThrottleAccumulator`].
///
/// # Example
///
/// ```rust
/// use ledger_throttle::prelude::*;
///
/// let engine = EngineBuilder::new(EngineRole::Frontend)
///     .capacity_split(4)
///     .definitions(vec![BucketDefinition::new(
///         "Throughput",
///         1_000,
///         vec![RateGroup::new(4_000, vec![Category::Transfer])],
///     )])
///     .try_build()
///     .unwrap();
/// assert_eq!(engine.role(), EngineRole::Frontend);
/// ```
#[derive(Debug)]
pub struct EngineBuilder {
    role: EngineRole,
    capacity_split: u64,
    config: EngineConfig,
    definitions: Vec<BucketDefinition>,
    initial_snapshot: Option<UsageSnapshot>,
}

impl EngineBuilder {
    /// Starts a builder for the given decision point, with a default
    /// configuration, no definitions, and an undivided capacity split.
    pub fn new(role: EngineRole) -> Self {
        Self {
            role,
            capacity_split: 1,
            config: EngineConfig::default(),
            definitions: Vec::new(),
            initial_snapshot: None,
        }
    }

    /// Sets how many ways whole-network capacity is divided (usually the
    /// number of nodes sharing the frontend budget). Zero is treated
    /// as one.
    pub fn capacity_split(mut self, split: u64) -> Self {
        self.capacity_split = split.max(1);
        self
    }

    /// Sets the engine tunables.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the declarative bucket definitions.
    pub fn definitions(mut self, definitions: Vec<BucketDefinition>) -> Self {
        self.definitions = definitions;
        self
    }

    /// Restores persisted usage state after construction, so a restarted
    /// node does not grant itself a fresh burst window.
    pub fn initial_snapshot(mut self, snapshot: UsageSnapshot) -> Self {
        self.initial_snapshot = Some(snapshot);
        self
    }

    /// Validates everything and builds the accumulator.
    pub fn try_build(self) -> Result<ThrottleAccumulator, BuildError> {
        self.config.validate()?;
        for definition in &self.definitions {
            definition.resolve(self.capacity_split)?;
        }

        let mut engine = ThrottleAccumulator::new(self.role, self.capacity_split, self.config);
        engine.rebuild(&self.definitions);
        if let Some(snapshot) = &self.initial_snapshot {
            debug!("restoring initial usage snapshot");
            engine.restore_usage_snapshot(snapshot);
        }
        Ok(engine)
    }

    /// Builds the accumulator, panicking on an invalid configuration.
    ///
    /// Prefer [`try_build`](Self::try_build) anywhere the inputs are not
    /// literals under the caller's control.
    ///
    /// # Panics
    ///
    /// Panics if the configuration or any definition is invalid.
    pub fn build(self) -> ThrottleAccumulator {
        match self.try_build() {
            Ok(engine) => engine,
            Err(err) => panic!("invalid throttle engine configuration: {err}"),
        }
    }
}
