//! # State Lookup Seams (stores.rs)
//!
//! Admission decisions sometimes depend on ledger state the engine does
//! not own: whether an alias already resolves to an account, whether a
//! token relation exists, how many executions are already due in a given
//! second. These dependencies are expressed as narrow read-only traits so
//! the embedding node supplies its own state views and tests supply maps.

use std::collections::{BTreeMap, BTreeSet};

use super::utils::Timestamp;
use super::work::{AccountId, AccountRef, TokenId};

/// Read-only account and token-relation state.
pub trait AccountLookup {
    /// Resolves an alias to an existing account, if any.
    fn resolve_alias(&self, alias: &[u8]) -> Option<AccountId>;

    /// Whether the given party already has a relation with the token.
    ///
    /// Alias parties are resolved first; an unresolvable alias has no
    /// relations.
    fn relation_exists(&self, account: &AccountRef, token: TokenId) -> bool;

    /// Number of token associations the account currently holds.
    fn association_count(&self, account: AccountId) -> u64;
}

/// Read-only deferred-execution state.
pub trait ScheduleLookup {
    /// Number of executions already scheduled to trigger within the given
    /// whole second.
    fn count_due_at(&self, second: u64) -> u64;
}

/// The combined state view the engine takes at each decision point.
pub trait StateStores: AccountLookup + ScheduleLookup {}

impl<T: AccountLookup + ScheduleLookup> StateStores for T {}

/// Map-backed state for tests and lightweight embedders.
///
/// # Example
///
/// ```rust
/// use ledger_throttle::{AccountId, AccountLookup, InMemoryState};
///
/// let mut state = InMemoryState::default();
/// state.register_alias(vec![0xAB; 20], AccountId(1001));
/// assert_eq!(state.resolve_alias(&[0xAB; 20]), Some(AccountId(1001)));
/// assert_eq!(state.resolve_alias(&[0xCD; 20]), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryState {
    aliases: BTreeMap<Vec<u8>, AccountId>,
    relations: BTreeSet<(AccountId, TokenId)>,
    association_counts: BTreeMap<AccountId, u64>,
    scheduled: BTreeMap<u64, u64>,
}

impl InMemoryState {
    /// Registers an alias as owned by an existing account.
    pub fn register_alias(&mut self, alias: Vec<u8>, account: AccountId) {
        self.aliases.insert(alias, account);
    }

    /// Registers an account-token relation.
    pub fn register_relation(&mut self, account: AccountRef, token: TokenId) {
        if let Some(id) = self.resolve_ref(&account) {
            self.relations.insert((id, token));
        }
    }

    /// Sets the association count reported for an account.
    pub fn set_association_count(&mut self, account: AccountId, count: u64) {
        self.association_counts.insert(account, count);
    }

    /// Records a deferred execution due at the given instant's second.
    pub fn schedule_at(&mut self, expiry: Timestamp) {
        *self.scheduled.entry(expiry.seconds).or_insert(0) += 1;
    }

    fn resolve_ref(&self, account: &AccountRef) -> Option<AccountId> {
        match account {
            AccountRef::Id(id) => Some(*id),
            AccountRef::Alias(alias) => self.resolve_alias(alias),
        }
    }
}

impl AccountLookup for InMemoryState {
    fn resolve_alias(&self, alias: &[u8]) -> Option<AccountId> {
        self.aliases.get(alias).copied()
    }

    fn relation_exists(&self, account: &AccountRef, token: TokenId) -> bool {
        match self.resolve_ref(account) {
            Some(id) => self.relations.contains(&(id, token)),
            None => false,
        }
    }

    fn association_count(&self, account: AccountId) -> u64 {
        self.association_counts.get(&account).copied().unwrap_or(0)
    }
}

impl ScheduleLookup for InMemoryState {
    fn count_due_at(&self, second: u64) -> u64 {
        self.scheduled.get(&second).copied().unwrap_or(0)
    }
}
