//! # The Admission Orchestrator (accumulator.rs)
//!
//! `ThrottleAccumulator` ties the primitives together: it owns the bucket
//! arena, the per-category requirement groups, and the three whole-node
//! side buckets (gas, bytes, ops duration), and renders one `Verdict` per
//! unit of work.
//!
//! ```text
//!     check_and_reserve(work, now, stores, sink)
//!        │
//!        ├─ 1. Noop role? ───────────────────────────► Admitted
//!        ├─ 2. exempt payer? (state untouched) ──────► Admitted
//!        ├─ 3. leak every bucket to `now`
//!        ├─ 4. malformed body? ──────────────────────► Denied
//!        ├─ 5. gas-metered? charge the gas bucket ───► Denied (short
//!        │                                             circuit, no
//!        │                                             capacity charges)
//!        ├─ 6. oversized payload? charge bytes ──────► Denied + rollback
//!        ├─ 7. category policy → requirement group,
//!        │     occurrences, scale → charge buckets ──► Denied + rollback
//!        └─ 8. record usages in the sink ────────────► Admitted
//! ```
//!
//! A node runs one accumulator per decision point: a `Frontend` instance
//! at ingestion (its own estimate of time, frontend gas budget) and a
//! `Backend` instance at consensus (consensus time, backend gas budget).
//! The `Noop` role admits everything and is used where throttling is
//! switched off wholesale.
//!
//! ## Rollback Discipline
//!
//! Every reservation placed during one call is released, in reverse
//! order, if that call ends in a denial. Combined with the leak rule
//! (leaks never rewind), this makes a denied call invisible to later
//! decisions.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use super::bucket::{Bucket, BucketId};
use super::config::{
    BucketDefinition, Category, EngineConfig, ScaleFactor, DEFAULT_BURST_SECS,
};
use super::group::{BucketRef, Requirement, RequirementGroup, ThrottleUsage, UsageSink};
use super::snapshot::{BucketUsage, UsageSnapshot};
use super::stores::StateStores;
use super::utils::Timestamp;
use super::work::{AccountId, QueryDetails, WorkDetails, WorkItem};

/// Which decision point this accumulator serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRole {
    /// Ingestion-time instance; uses the frontend gas budget and enforces
    /// the per-second schedule-expiry ceiling.
    Frontend,
    /// Consensus-time instance; uses the backend gas budget.
    Backend,
    /// Admits everything without touching any bucket.
    Noop,
}

/// Why a unit of work was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The gas bucket lacked room, or no gas limit was declared.
    GasExhausted,
    /// The payload exceeded the ordinary size and the byte bucket lacked
    /// room, or the category does not admit oversized payloads.
    PayloadBytes,
    /// Some capacity bucket in the requirement group lacked room.
    CapacityExceeded,
    /// No requirement group is configured for the category.
    UnknownCategory,
    /// The body could not be interpreted for accounting.
    MalformedWork,
    /// Too many deferred executions already due in the expiry second.
    ScheduleBacklog,
}

/// The admission decision for one unit of work.
///
/// Denial is a value, not an error: it is the engine's ordinary answer
/// under load, and callers are expected to branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an unobserved verdict admits nothing and denies nothing"]
pub enum Verdict {
    /// Every required reservation was placed.
    Admitted,
    /// Nothing was reserved (any partial charges were rolled back).
    Denied(DenialReason),
}

impl Verdict {
    /// Whether the work was denied.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Verdict::Denied(_))
    }

    /// Whether the work was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted)
    }
}

/// Deterministic multi-dimensional admission control for one decision
/// point.
///
/// # Example
///
/// ```rust
/// use ledger_throttle::{
///     AccountId, BucketDefinition, Category, EngineConfig, EngineRole,
///     InMemoryState, RateGroup, ThrottleAccumulator, Timestamp, UsageSink,
///     WorkItem,
/// };
///
/// let mut engine = ThrottleAccumulator::new(EngineRole::Backend, 1, EngineConfig::default());
/// engine.rebuild(&[BucketDefinition::new(
///     "Throughput",
///     1_000,
///     vec![RateGroup::new(10_000, vec![Category::Transfer])],
/// )]);
///
/// let state = InMemoryState::default();
/// let work = WorkItem::plain(AccountId(2_001), Category::Transfer);
/// let verdict = engine.check_and_reserve(
///     &work,
///     Timestamp::from_secs(0),
///     &state,
///     UsageSink::Disabled,
///     false,
/// );
/// assert!(verdict.is_admitted());
/// ```
#[derive(Debug)]
pub struct ThrottleAccumulator {
    role: EngineRole,
    capacity_split: u64,
    config: EngineConfig,

    /// All capacity buckets, normal and high-volume, in definition order.
    buckets: Vec<Bucket>,
    /// Arena indices of normal-volume buckets, in definition order.
    normal_ids: Vec<BucketId>,
    /// Arena indices of high-volume buckets, in definition order.
    high_volume_ids: Vec<BucketId>,
    normal_groups: BTreeMap<Category, RequirementGroup>,
    high_volume_groups: BTreeMap<Category, RequirementGroup>,

    gas_bucket: Option<Bucket>,
    bytes_bucket: Option<Bucket>,
    duration_bucket: Option<Bucket>,
}

impl ThrottleAccumulator {
    /// Creates an accumulator with no capacity buckets yet.
    ///
    /// The gas, byte, and duration buckets are built immediately from the
    /// configuration; capacity buckets arrive with the first `rebuild`.
    pub fn new(role: EngineRole, capacity_split: u64, config: EngineConfig) -> Self {
        let mut engine = Self {
            role,
            capacity_split: capacity_split.max(1),
            config,
            buckets: Vec::new(),
            normal_ids: Vec::new(),
            high_volume_ids: Vec::new(),
            normal_groups: BTreeMap::new(),
            high_volume_groups: BTreeMap::new(),
            gas_bucket: None,
            bytes_bucket: None,
            duration_bucket: None,
        };
        engine.apply_gas_config();
        engine.apply_bytes_config();
        engine.apply_duration_config();
        engine
    }

    /// This accumulator's decision point.
    pub fn role(&self) -> EngineRole {
        self.role
    }

    /// The currently applied configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the configuration and rebuilds the gas, byte, and
    /// duration buckets from it.
    ///
    /// Capacity buckets are untouched; call `rebuild` separately when the
    /// declarative definitions changed too.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
        self.apply_gas_config();
        self.apply_bytes_config();
        self.apply_duration_config();
    }

    // ---------------------------------------------------------------
    // Admission
    // ---------------------------------------------------------------

    /// Decides one unit of work, reserving capacity on admission.
    ///
    /// `gas_always_enforced` forces gas accounting even when the gas
    /// throttle is disabled in configuration (used by callers that must
    /// bound gas regardless, such as pre-execution screens).
    ///
    /// On denial, nothing this call reserved remains reserved.
    pub fn check_and_reserve(
        &mut self,
        work: &WorkItem,
        now: Timestamp,
        stores: &dyn StateStores,
        mut sink: UsageSink<'_>,
        gas_always_enforced: bool,
    ) -> Verdict {
        if matches!(self.role, EngineRole::Noop) {
            return Verdict::Admitted;
        }
        // Exempt payers are decided before any bookkeeping so their
        // traffic leaves bucket state bit-for-bit untouched.
        if self.is_exempt(work.payer) {
            return Verdict::Admitted;
        }

        let now_ns = now.as_nanos();
        self.leak_all_to(now_ns);

        // Malformed bodies are rejected before anything is reserved.
        match &work.details {
            WorkDetails::EthereumTx { payload: None } => {
                debug!(payer = work.payer.0, "denying ethereum work with undecodable payload");
                return Verdict::Denied(DenialReason::MalformedWork);
            }
            WorkDetails::ScheduleCreate { scheduled: None, .. } => {
                debug!(payer = work.payer.0, "denying schedule creation with no inner work");
                return Verdict::Denied(DenialReason::MalformedWork);
            }
            _ => {}
        }

        let mut usages: Vec<ThrottleUsage> = Vec::new();

        // Gas gate. Work without a declared limit asks for unbounded gas
        // and is always denied here.
        if work.category.is_gas_metered()
            && (self.config.gas_throttle_enabled || gas_always_enforced)
        {
            let Some(limit) = work.gas_limit() else {
                return Verdict::Denied(DenialReason::GasExhausted);
            };
            if !self.charge_gas(now_ns, limit, &mut usages) {
                return Verdict::Denied(DenialReason::GasExhausted);
            }
        }

        // Byte gate for oversized payloads. Only allowlisted categories
        // are byte-accounted at all; everything else proceeds straight to
        // the capacity check regardless of size.
        if self.config.oversize_enabled
            && self.config.oversize_categories.contains(&work.category)
        {
            let excess = work
                .payload_size
                .saturating_sub(self.config.max_ordinary_payload_bytes);
            if excess > 0 && !self.charge_bytes(now_ns, excess, &mut usages) {
                self.roll_back(&usages);
                return Verdict::Denied(DenialReason::PayloadBytes);
            }
        }

        // Category policy: which group to charge, how many occurrences,
        // and at what scale. Long-term schedule creations additionally
        // carry a frontend-only expiry-second ceiling, applied after the
        // rate charge.
        //
        // High-volume eligibility is decided once, from the work's own
        // category; a policy that reroutes the charge (say a transfer
        // charging the creation budget) carries that decision along.
        let use_high_volume = work.high_volume
            && self.config.high_volume_categories.contains(&work.category);
        let mut expiry_ceiling_second: Option<u64> = None;
        let (charge_category, occurrences, scale) = match &work.details {
            WorkDetails::TokenMint { metadata_count } if *metadata_count > 0 => {
                (work.category, *metadata_count, self.config.nft_mint_scale)
            }
            WorkDetails::Transfer(body) => {
                let implicit = body.implicit_work(
                    stores,
                    self.config.unlimited_auto_associations_enabled,
                );
                if implicit.creations > 0 {
                    (Category::AccountCreate, implicit.creations, ScaleFactor::ONE_TO_ONE)
                } else if implicit.auto_associations > 0 {
                    (
                        Category::TokenAssociate,
                        implicit.auto_associations,
                        ScaleFactor::ONE_TO_ONE,
                    )
                } else {
                    (work.category, 1, ScaleFactor::ONE_TO_ONE)
                }
            }
            WorkDetails::EthereumTx { payload: Some(payload) } => {
                let creations = payload.implicit_creations(stores);
                if creations > 0 {
                    (Category::AccountCreate, creations, ScaleFactor::ONE_TO_ONE)
                } else {
                    (work.category, 1, ScaleFactor::ONE_TO_ONE)
                }
            }
            WorkDetails::ScheduleCreate {
                scheduled: Some(scheduled),
                wait_for_expiry,
                expiration_time,
                valid_start,
            } => {
                if self.config.long_term_schedules_enabled {
                    if matches!(self.role, EngineRole::Frontend) {
                        let second = if *wait_for_expiry {
                            expiration_time.unwrap_or_default().seconds
                        } else {
                            valid_start
                                .seconds
                                .saturating_add(self.config.default_schedule_expiry_secs)
                        };
                        expiry_ceiling_second = Some(second);
                    }
                    (work.category, 1, ScaleFactor::ONE_TO_ONE)
                } else {
                    // Legacy mode charges the hidden creations of an
                    // alias-bearing scheduled transfer instead of the
                    // schedule-creation budget.
                    let creations = match &scheduled.transfer {
                        Some(body)
                            if scheduled.category == Category::Transfer
                                && body.uses_aliases() =>
                        {
                            body.implicit_work(stores, false).creations
                        }
                        _ => 0,
                    };
                    if creations > 0 {
                        (Category::AccountCreate, creations, ScaleFactor::ONE_TO_ONE)
                    } else {
                        (work.category, 1, ScaleFactor::ONE_TO_ONE)
                    }
                }
            }
            _ => (work.category, 1, ScaleFactor::ONE_TO_ONE),
        };

        let group = match Self::lookup_group(
            &self.normal_groups,
            &self.high_volume_groups,
            charge_category,
            use_high_volume,
        ) {
            Some(group) => group,
            None => {
                self.roll_back(&usages);
                return Verdict::Denied(DenialReason::UnknownCategory);
            }
        };
        if !group.all_satisfied_at(&mut self.buckets, now_ns, occurrences, scale, &mut usages) {
            self.roll_back(&usages);
            return Verdict::Denied(DenialReason::CapacityExceeded);
        }

        if let Some(second) = expiry_ceiling_second {
            if stores.count_due_at(second) >= self.config.max_schedules_per_sec {
                self.roll_back(&usages);
                return Verdict::Denied(DenialReason::ScheduleBacklog);
            }
        }

        sink.record(usages);
        Verdict::Admitted
    }

    /// Decides one query.
    ///
    /// Queries never carry payload-byte or schedule semantics. Gas-metered
    /// queries (local contract calls) are decided on the gas bucket alone,
    /// never on requirement groups; with gas accounting disabled they are
    /// admitted outright. All other queries charge their category's
    /// requirement group, with balance queries fanning out per existing
    /// association when that mode is enabled.
    pub fn check_query(
        &mut self,
        category: Category,
        now: Timestamp,
        payer: Option<AccountId>,
        query: &QueryDetails,
        stores: &dyn StateStores,
    ) -> Verdict {
        if matches!(self.role, EngineRole::Noop) {
            return Verdict::Admitted;
        }
        if let Some(payer) = payer {
            if self.is_exempt(payer) {
                return Verdict::Admitted;
            }
        }

        let now_ns = now.as_nanos();
        self.leak_all_to(now_ns);

        // Gas-metered queries are a pure gas decision: requirement
        // groups are never consulted for them.
        if category.is_gas_metered() {
            if !self.config.gas_throttle_enabled {
                return Verdict::Admitted;
            }
            let limit = match query {
                QueryDetails::ContractCallLocal { gas_limit } => *gas_limit,
                _ => None,
            };
            let Some(limit) = limit else {
                return Verdict::Denied(DenialReason::GasExhausted);
            };
            let mut usages = Vec::new();
            return if self.charge_gas(now_ns, limit, &mut usages) {
                Verdict::Admitted
            } else {
                Verdict::Denied(DenialReason::GasExhausted)
            };
        }

        let occurrences = match query {
            QueryDetails::Balance { account }
                if self.config.counting_balance_queries_enabled =>
            {
                // Ceiling first, then the floor: even a zero ceiling (or
                // an account with no associations) costs one slot.
                stores
                    .association_count(*account)
                    .min(self.config.max_relations_per_balance_query)
                    .max(1)
            }
            _ => 1,
        };

        let mut usages: Vec<ThrottleUsage> = Vec::new();
        let group = match self.normal_groups.get(&category) {
            Some(group) => group,
            None => {
                return Verdict::Denied(DenialReason::UnknownCategory);
            }
        };
        if !group.all_satisfied_at(
            &mut self.buckets,
            now_ns,
            occurrences,
            ScaleFactor::ONE_TO_ONE,
            &mut usages,
        ) {
            return Verdict::Denied(DenialReason::CapacityExceeded);
        }
        Verdict::Admitted
    }

    /// Convenience inversion of `check_and_reserve` with no usage sink
    /// and no forced gas accounting.
    pub fn allow(&mut self, work: &WorkItem, now: Timestamp, stores: &dyn StateStores) -> bool {
        !self
            .check_and_reserve(work, now, stores, UsageSink::Disabled, false)
            .is_throttled()
    }

    /// Bulk pre-charge: reserves `n` unscaled occurrences of a category
    /// in one decision (used when one body expands to a known number of
    /// child operations).
    pub fn check_n_of(&mut self, n: u64, category: Category, now: Timestamp) -> Verdict {
        if matches!(self.role, EngineRole::Noop) {
            return Verdict::Admitted;
        }
        let now_ns = now.as_nanos();
        for bucket in &mut self.buckets {
            bucket.leak_until(now_ns);
        }
        let Some(group) = self.normal_groups.get(&category) else {
            return Verdict::Denied(DenialReason::UnknownCategory);
        };
        let mut usages = Vec::new();
        if group.all_satisfied_at(
            &mut self.buckets,
            now_ns,
            n,
            ScaleFactor::ONE_TO_ONE,
            &mut usages,
        ) {
            Verdict::Admitted
        } else {
            Verdict::Denied(DenialReason::CapacityExceeded)
        }
    }

    /// Timestamp-free inverse of `check_n_of`: releases `n` unscaled
    /// occurrences without leaking.
    ///
    /// A category with no requirement group is logged and ignored; the
    /// release is a cleanup path and must not fail.
    pub fn release_n_of(&mut self, n: u64, category: Category) {
        match self.normal_groups.get(&category) {
            Some(group) => group.undo_claimed(&mut self.buckets, n),
            None => {
                error!(?category, "no requirement group to release against");
            }
        }
    }

    /// Replays the exact inverse of a recorded usage list.
    ///
    /// Feeding back the list recorded by an admission restores every
    /// touched bucket to its pre-admission fill (modulo leaking).
    pub fn release_usage(&mut self, usages: &[ThrottleUsage]) {
        self.roll_back(usages);
    }

    // ---------------------------------------------------------------
    // Gas and duration side channels
    // ---------------------------------------------------------------

    /// Refunds gas that was reserved at admission but not consumed in
    /// execution. No leak is applied; the refund clamps at zero.
    pub fn release_gas(&mut self, payer: AccountId, amount: u64) {
        if matches!(self.role, EngineRole::Noop) || self.is_exempt(payer) {
            return;
        }
        if let Some(gas) = self.gas_bucket.as_mut() {
            gas.release_units(amount);
        }
    }

    /// Free ops-duration units at `now`, clamped at zero.
    ///
    /// Reports `u64::MAX` when duration accounting is off (or the role is
    /// `Noop`), so callers can treat the answer as a plain budget.
    pub fn available_duration_capacity(&mut self, now: Timestamp) -> u64 {
        if matches!(self.role, EngineRole::Noop) {
            return u64::MAX;
        }
        match self.duration_bucket.as_mut() {
            Some(bucket) => {
                bucket.leak_until(now.as_nanos());
                bucket.free_capacity_units()
            }
            None => u64::MAX,
        }
    }

    /// Records ops-duration actually consumed by an execution.
    ///
    /// This is post-hoc accounting; the charge always lands, and may push
    /// the bucket past its ceiling (the one-time overrun allowance).
    pub fn consume_duration_capacity(&mut self, now: Timestamp, amount: u64) {
        if matches!(self.role, EngineRole::Noop) {
            return;
        }
        if let Some(bucket) = self.duration_bucket.as_mut() {
            bucket.force_use_units(now.as_nanos(), amount);
        }
    }

    // ---------------------------------------------------------------
    // Congestion-pricing queries
    // ---------------------------------------------------------------

    /// Arena indices of the buckets a category charges, in charge order.
    pub fn bucket_ids_for(&self, category: Category) -> Vec<BucketId> {
        self.normal_groups
            .get(&category)
            .map(|g| g.bucket_ids().collect())
            .unwrap_or_default()
    }

    /// Read access to one capacity bucket.
    pub fn bucket(&self, id: BucketId) -> Option<&Bucket> {
        self.buckets.get(id)
    }

    /// Peak instantaneous utilization, in basis points, across the
    /// buckets serving a category's dedicated high-volume traffic.
    ///
    /// A category with no dedicated high-volume bucket reports zero: its
    /// high-volume traffic shares the normal buckets for admission, but
    /// congestion pricing keyed on the high-volume namespace must not
    /// read the normal fill as if it were overflow pressure.
    ///
    /// No leak is applied: congestion pricing reads the same fill on
    /// every node.
    pub fn high_volume_utilization_bps(&self, category: Category) -> u32 {
        match self.high_volume_groups.get(&category) {
            Some(group) => group
                .bucket_ids()
                .map(|id| self.buckets[id].utilization_bps())
                .max()
                .unwrap_or(0),
            None => 0,
        }
    }

    // ---------------------------------------------------------------
    // Rebuild and per-dimension configuration
    // ---------------------------------------------------------------

    /// Rebuilds every capacity bucket from declarative definitions.
    ///
    /// A malformed definition is logged and skipped; the remaining
    /// definitions still apply. The new arena and group maps are built
    /// aside and swapped in at once, so no decision ever observes a
    /// half-rebuilt engine. All usage state resets to empty — callers
    /// that need continuity restore a snapshot afterwards.
    pub fn rebuild(&mut self, definitions: &[BucketDefinition]) {
        let mut buckets: Vec<Bucket> = Vec::new();
        let mut normal_ids: Vec<BucketId> = Vec::new();
        let mut high_volume_ids: Vec<BucketId> = Vec::new();
        let mut normal_reqs: BTreeMap<Category, Vec<Requirement>> = BTreeMap::new();
        let mut high_volume_reqs: BTreeMap<Category, Vec<Requirement>> = BTreeMap::new();

        for definition in definitions {
            let (bucket, requirements) = match definition.resolve(self.capacity_split) {
                Ok(resolved) => resolved,
                Err(err) => {
                    error!(bucket = %definition.name, %err, "skipping malformed bucket definition");
                    continue;
                }
            };
            let id = buckets.len();
            buckets.push(bucket);
            let (ids, reqs) = if definition.high_volume {
                (&mut high_volume_ids, &mut high_volume_reqs)
            } else {
                (&mut normal_ids, &mut normal_reqs)
            };
            ids.push(id);
            for (category, units_per_occurrence) in requirements {
                reqs.entry(category).or_default().push(Requirement {
                    bucket: id,
                    units_per_occurrence,
                });
            }
        }

        self.normal_groups = normal_reqs
            .into_iter()
            .map(|(c, r)| (c, RequirementGroup::new(r)))
            .collect();
        self.high_volume_groups = high_volume_reqs
            .into_iter()
            .map(|(c, r)| (c, RequirementGroup::new(r)))
            .collect();
        self.normal_ids = normal_ids;
        self.high_volume_ids = high_volume_ids;
        self.buckets = buckets;

        info!(
            buckets = self.buckets.len(),
            categories = self.normal_groups.len(),
            high_volume_categories = self.high_volume_groups.len(),
            "rebuilt capacity buckets"
        );
        for (category, group) in &self.normal_groups {
            debug!(?category, requirements = %group.describe(&self.buckets), "resolved");
        }
    }

    /// Rebuilds the gas bucket from the configuration, using the rate
    /// that matches this accumulator's role. Usage state resets.
    pub fn apply_gas_config(&mut self) {
        let rate = match self.role {
            EngineRole::Backend => self.config.max_gas_per_sec_backend,
            EngineRole::Frontend | EngineRole::Noop => self.config.max_gas_per_sec_frontend,
        };
        if self.config.gas_throttle_enabled && rate == 0 {
            warn!("gas accounting is enabled with zero capacity; all gas-metered work will be denied");
        }
        // The burst window is a nonzero constant, so construction cannot
        // fail here.
        self.gas_bucket = Bucket::leaky_unit("Gas", rate, DEFAULT_BURST_SECS).ok();
    }

    /// Rebuilds the byte bucket from the configuration. Usage state
    /// resets; when oversize accounting is off the bucket is dropped.
    pub fn apply_bytes_config(&mut self) {
        if !self.config.oversize_enabled {
            self.bytes_bucket = None;
            return;
        }
        if self.config.max_bytes_per_sec == 0 {
            warn!("oversize accounting is enabled with zero capacity; all oversized payloads will be denied");
        }
        self.bytes_bucket =
            Bucket::leaky_unit("Bytes", self.config.max_bytes_per_sec, DEFAULT_BURST_SECS).ok();
    }

    /// Rebuilds the ops-duration bucket from the configuration. Usage
    /// state resets; when duration accounting is off the bucket is
    /// dropped.
    pub fn apply_duration_config(&mut self) {
        if !self.config.duration_throttle_enabled {
            self.duration_bucket = None;
            return;
        }
        self.duration_bucket = Bucket::duration(
            "OpsDuration",
            self.config.duration_capacity,
            self.config.duration_units_freed_per_sec,
        )
        .ok();
    }

    // ---------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------

    /// Exports the mutable state of every bucket.
    pub fn usage_snapshot(&self) -> UsageSnapshot {
        let usage_of = |bucket: &Bucket| {
            let (used, last_decision_ns) = bucket.snapshot_state();
            BucketUsage {
                name: bucket.name().to_string(),
                used,
                last_decision_ns,
            }
        };
        UsageSnapshot {
            tps: self
                .normal_ids
                .iter()
                .chain(self.high_volume_ids.iter())
                .map(|&id| usage_of(&self.buckets[id]))
                .collect(),
            gas: self.gas_bucket.as_ref().map(usage_of),
            ops_duration: self.duration_bucket.as_ref().map(usage_of),
        }
    }

    /// Restores mutable bucket state from a snapshot.
    ///
    /// Shape tolerance, in order: an exact bucket-count match restores
    /// everything; a count matching only the normal-volume buckets (the
    /// shape persisted before high-volume buckets existed) restores those
    /// and leaves the rest fresh; any other count leaves all capacity
    /// buckets fresh. Mismatches are informational, never fatal.
    pub fn restore_usage_snapshot(&mut self, snapshot: &UsageSnapshot) {
        let full = self.normal_ids.len() + self.high_volume_ids.len();
        if snapshot.tps.len() == full {
            let order: Vec<BucketId> = self
                .normal_ids
                .iter()
                .chain(self.high_volume_ids.iter())
                .copied()
                .collect();
            for (&id, usage) in order.iter().zip(&snapshot.tps) {
                self.buckets[id].restore_state(usage.used, usage.last_decision_ns);
            }
        } else if snapshot.tps.len() == self.normal_ids.len() {
            info!(
                "snapshot predates high-volume buckets; restoring {} normal buckets only",
                self.normal_ids.len()
            );
            let order = self.normal_ids.clone();
            for (&id, usage) in order.iter().zip(&snapshot.tps) {
                self.buckets[id].restore_state(usage.used, usage.last_decision_ns);
            }
        } else {
            info!(
                expected = full,
                found = snapshot.tps.len(),
                "snapshot shape does not match the running definitions; starting fresh"
            );
        }

        if let (Some(bucket), Some(usage)) = (self.gas_bucket.as_mut(), snapshot.gas.as_ref()) {
            bucket.restore_state(usage.used, usage.last_decision_ns);
        }
        if let (Some(bucket), Some(usage)) =
            (self.duration_bucket.as_mut(), snapshot.ops_duration.as_ref())
        {
            bucket.restore_state(usage.used, usage.last_decision_ns);
        }
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn is_exempt(&self, payer: AccountId) -> bool {
        payer.0 >= 1 && payer.0 <= self.config.throttle_exempt_max_id
    }

    fn leak_all_to(&mut self, now_ns: u64) {
        for bucket in &mut self.buckets {
            bucket.leak_until(now_ns);
        }
        if let Some(bucket) = self.gas_bucket.as_mut() {
            bucket.leak_until(now_ns);
        }
        if let Some(bucket) = self.bytes_bucket.as_mut() {
            bucket.leak_until(now_ns);
        }
    }

    fn charge_gas(&mut self, now_ns: u64, limit: u64, usages: &mut Vec<ThrottleUsage>) -> bool {
        let Some(gas) = self.gas_bucket.as_mut() else {
            return false;
        };
        if !gas.try_reserve_units(now_ns, limit) {
            return false;
        }
        usages.push(ThrottleUsage {
            bucket: BucketRef::Gas,
            amount: (limit as u128).saturating_mul(super::utils::UNIT_SCALE),
        });
        true
    }

    fn charge_bytes(&mut self, now_ns: u64, excess: u64, usages: &mut Vec<ThrottleUsage>) -> bool {
        let Some(bytes) = self.bytes_bucket.as_mut() else {
            return false;
        };
        if !bytes.try_reserve_units(now_ns, excess) {
            return false;
        }
        usages.push(ThrottleUsage {
            bucket: BucketRef::Bytes,
            amount: (excess as u128).saturating_mul(super::utils::UNIT_SCALE),
        });
        true
    }

    fn roll_back(&mut self, usages: &[ThrottleUsage]) {
        for usage in usages.iter().rev() {
            match usage.bucket {
                BucketRef::Tps(id) => {
                    if let Some(bucket) = self.buckets.get_mut(id) {
                        bucket.release(usage.amount);
                    }
                }
                BucketRef::Gas => {
                    if let Some(bucket) = self.gas_bucket.as_mut() {
                        bucket.release(usage.amount);
                    }
                }
                BucketRef::Bytes => {
                    if let Some(bucket) = self.bytes_bucket.as_mut() {
                        bucket.release(usage.amount);
                    }
                }
            }
        }
    }

    /// Resolves the requirement group to charge. `use_high_volume` is the
    /// already-decided eligibility of the unit of work as a whole, so a
    /// rerouted charge keeps the routing of the category it came from.
    fn lookup_group<'a>(
        normal: &'a BTreeMap<Category, RequirementGroup>,
        high_volume: &'a BTreeMap<Category, RequirementGroup>,
        category: Category,
        use_high_volume: bool,
    ) -> Option<&'a RequirementGroup> {
        if use_high_volume {
            if let Some(group) = high_volume.get(&category) {
                return Some(group);
            }
            // No dedicated high-volume bucket configured for this
            // category; its traffic shares the normal buckets.
        }
        normal.get(&category)
    }
}
