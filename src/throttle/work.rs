//! # Work Items and Alias Classification (work.rs)
//!
//! The engine's input is a pre-parsed, self-contained description of one
//! unit of work. Nothing here touches wire formats: the embedding node
//! translates its transaction bodies into `WorkItem` values, and the
//! engine inspects only the fields that drive accounting.
//!
//! ## Implicit Creation
//!
//! A transfer that credits an *alias* nobody owns yet will, on execution,
//! create a brand-new account. That hidden creation must be charged
//! against the account-creation budget, not the transfer budget:
//!
//! ```text
//!     credit to alias ──► alias resolves? ──yes──► ordinary transfer
//!            │
//!            no
//!            │
//!            ▼
//!     plausible auto-create?          (positive credit AND the alias is
//!            │                         a serialized key or a 20-byte
//!           yes                        address that is not numeric)
//!            │
//!            ▼
//!     charge AccountCreate, once per qualifying adjustment
//! ```
//!
//! Currency credits, token credits, and received NFTs all qualify; the
//! charge follows the per-adjustment work of walking the body, so two
//! credits to the same unknown alias cost two occurrences.

use serde::{Deserialize, Serialize};

use super::config::Category;
use super::stores::AccountLookup;
use super::utils::Timestamp;

/// Length in bytes of an EVM-style address alias.
pub const EVM_ADDRESS_LEN: usize = 20;

/// An account number within the ledger's local realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

/// A token number within the ledger's local realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(pub u64);

/// An account reference as it appears inside a transfer body: either a
/// resolved number or a raw alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountRef {
    /// A concrete account number.
    Id(AccountId),
    /// An unresolved alias (serialized key or EVM address bytes).
    Alias(Vec<u8>),
}

impl AccountRef {
    /// The alias bytes, if this reference is an alias.
    pub fn alias(&self) -> Option<&[u8]> {
        match self {
            AccountRef::Id(_) => None,
            AccountRef::Alias(bytes) => Some(bytes),
        }
    }
}

/// Whether the bytes are shaped like a 20-byte EVM address.
pub(crate) fn is_evm_address(alias: &[u8]) -> bool {
    alias.len() == EVM_ADDRESS_LEN
}

/// Whether the bytes are a "long-zero" address: a 20-byte value whose
/// first 12 bytes are zero, which encodes an entity number rather than a
/// foreign key. Crediting one can never create an account.
pub(crate) fn is_numeric_alias(alias: &[u8]) -> bool {
    is_evm_address(alias) && alias[..12].iter().all(|&b| b == 0)
}

/// Whether the bytes are shaped like a serialized public key:
/// a one-byte tag followed by the key material (ed25519 or ECDSA).
pub(crate) fn is_serialized_key(alias: &[u8]) -> bool {
    matches!(
        (alias.first(), alias.len()),
        (Some(0x01), 33) | (Some(0x02), 34)
    )
}

/// Whether one adjustment against an unknown alias would plausibly
/// auto-create an account on execution.
pub(crate) fn plausibly_auto_creates(amount: i64, alias: &[u8]) -> bool {
    if amount <= 0 {
        return false;
    }
    is_serialized_key(alias) || (is_evm_address(alias) && !is_numeric_alias(alias))
}

/// One signed balance adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    /// The account debited or credited.
    pub account: AccountRef,
    /// Signed amount; positive is a credit.
    pub amount: i64,
}

/// One non-fungible transfer within a token transfer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftTransfer {
    /// The sending party.
    pub sender: AccountRef,
    /// The receiving party.
    pub receiver: AccountRef,
    /// The serial being moved.
    pub serial: i64,
}

/// Adjustments against one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransferList {
    /// The token all of these adjustments touch.
    pub token: TokenId,
    /// Fungible adjustments.
    pub adjustments: Vec<Adjustment>,
    /// Non-fungible transfers.
    pub nft_transfers: Vec<NftTransfer>,
}

/// The transfer portion of a work item (or of a scheduled work item).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBody {
    /// Plain currency adjustments.
    pub adjustments: Vec<Adjustment>,
    /// Per-token adjustment lists.
    pub token_transfers: Vec<TokenTransferList>,
}

impl TransferBody {
    /// Whether any party in the body is referenced by alias.
    pub fn uses_aliases(&self) -> bool {
        let adj_alias = |a: &Adjustment| matches!(a.account, AccountRef::Alias(_));
        self.adjustments.iter().any(adj_alias)
            || self.token_transfers.iter().any(|tt| {
                tt.adjustments.iter().any(adj_alias)
                    || tt.nft_transfers.iter().any(|n| {
                        matches!(n.sender, AccountRef::Alias(_))
                            || matches!(n.receiver, AccountRef::Alias(_))
                    })
            })
    }

    /// Counts the hidden work this body implies: one account creation per
    /// adjustment that plausibly auto-creates (a positive currency or
    /// token credit to an unknown creatable alias, or an NFT whose
    /// receiver is one), plus (when enabled) the implicit token
    /// associations its token credits would require.
    ///
    /// An alias already resolvable through `lookup` is an ordinary party.
    /// Repeated credits to the same unknown alias each count; the charge
    /// mirrors the per-adjustment work of walking the body, not the
    /// number of accounts that end up existing.
    pub(crate) fn implicit_work(
        &self,
        lookup: &dyn AccountLookup,
        count_auto_associations: bool,
    ) -> ImplicitWork {
        let mut creations: u64 = 0;
        let mut auto_associations: u64 = 0;

        let creates = |amount: i64, account: &AccountRef| match account {
            AccountRef::Alias(alias) => {
                lookup.resolve_alias(alias).is_none() && plausibly_auto_creates(amount, alias)
            }
            AccountRef::Id(_) => false,
        };

        for adj in &self.adjustments {
            if creates(adj.amount, &adj.account) {
                creations += 1;
            }
        }

        for tt in &self.token_transfers {
            for adj in &tt.adjustments {
                if creates(adj.amount, &adj.account) {
                    creations += 1;
                }
                if adj.amount > 0
                    && count_auto_associations
                    && !lookup.relation_exists(&adj.account, tt.token)
                {
                    auto_associations += 1;
                }
            }
            for nft in &tt.nft_transfers {
                // An NFT received (serial > 0) plays the role of a
                // positive credit for the creation heuristic.
                if creates(nft.serial, &nft.receiver) {
                    creations += 1;
                }
                if count_auto_associations && !lookup.relation_exists(&nft.receiver, tt.token) {
                    auto_associations += 1;
                }
            }
        }

        ImplicitWork {
            creations,
            auto_associations,
        }
    }
}

/// Hidden per-transfer work discovered by alias and relation inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ImplicitWork {
    /// Distinct plausible auto-creations.
    pub creations: u64,
    /// Missing token relations that would auto-associate.
    pub auto_associations: u64,
}

/// The decoded inner payload of an Ethereum-style transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthPayload {
    /// Call target address bytes; empty for contract creation.
    pub to: Vec<u8>,
    /// Whether the transaction moves a positive value.
    pub transfers_value: bool,
    /// Declared gas limit.
    pub gas_limit: u64,
}

impl EthPayload {
    /// Counts the plausible auto-creation this payload implies: a
    /// value-bearing call to a 20-byte address that resolves to no known
    /// account behaves like a credit to an unknown alias.
    pub(crate) fn implicit_creations(&self, lookup: &dyn AccountLookup) -> u64 {
        let creates = self.transfers_value
            && is_evm_address(&self.to)
            && !is_numeric_alias(&self.to)
            && lookup.resolve_alias(&self.to).is_none();
        u64::from(creates)
    }
}

/// The inner work a deferred execution will perform when it triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledWork {
    /// The category of the deferred work.
    pub category: Category,
    /// The transfer body, when the deferred work is a transfer.
    pub transfer: Option<TransferBody>,
}

/// Category-specific fields of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkDetails {
    /// No category-specific accounting inputs.
    Plain,
    /// A gas-metered contract operation.
    ContractOp {
        /// Declared gas limit; `None` means the submitter declined to
        /// bound it, which the gas throttle always rejects.
        gas_limit: Option<u64>,
    },
    /// A token mint with its metadata fan-out.
    TokenMint {
        /// Number of NFT metadata entries; zero for fungible mints.
        metadata_count: u64,
    },
    /// A transfer with its full body.
    Transfer(TransferBody),
    /// An Ethereum-style transaction.
    EthereumTx {
        /// The decoded payload, or `None` when decoding failed upstream.
        payload: Option<EthPayload>,
    },
    /// Creation of a deferred execution.
    ScheduleCreate {
        /// The deferred work, or `None` when the body was malformed.
        scheduled: Option<ScheduledWork>,
        /// Whether execution waits for the expiry second.
        wait_for_expiry: bool,
        /// Explicit expiry, when given.
        expiration_time: Option<Timestamp>,
        /// The valid-start instant of the creating transaction.
        valid_start: Timestamp,
    },
}

/// Category-specific fields of a query presented for admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryDetails {
    /// No category-specific accounting inputs.
    Plain,
    /// A read-only local contract call.
    ContractCallLocal {
        /// Declared gas limit; `None` is treated as unbounded and denied.
        gas_limit: Option<u64>,
    },
    /// A balance query against a specific account.
    Balance {
        /// The account whose balance (and associations) are read.
        account: AccountId,
    },
}

/// One unit of work presented for admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// The paying account.
    pub payer: AccountId,
    /// Functional classification.
    pub category: Category,
    /// Whether the submitter asked for high-volume routing.
    pub high_volume: bool,
    /// Serialized payload size in bytes.
    pub payload_size: u64,
    /// Category-specific inputs.
    pub details: WorkDetails,
}

impl WorkItem {
    /// A work item with no category-specific details.
    pub fn plain(payer: AccountId, category: Category) -> Self {
        Self {
            payer,
            category,
            high_volume: false,
            payload_size: 0,
            details: WorkDetails::Plain,
        }
    }

    /// The declared gas limit, if this work carries one.
    ///
    /// Gas-metered work without a declared limit also returns `None`;
    /// the gas throttle treats that as an unbounded request and denies it.
    pub fn gas_limit(&self) -> Option<u64> {
        match &self.details {
            WorkDetails::ContractOp { gas_limit } => *gas_limit,
            WorkDetails::EthereumTx {
                payload: Some(payload),
            } => Some(payload.gas_limit),
            _ => None,
        }
    }
}
