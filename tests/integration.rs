//! End-to-end admission scenarios exercised through the public API only.

use ledger_throttle::prelude::*;
use ledger_throttle::{EthPayload, ScheduledWork, TokenId, TokenTransferList};
use ledger_throttle::{Adjustment, TransferBody};

const PAYER: AccountId = AccountId(2_001);

fn at(seconds: u64) -> Timestamp {
    Timestamp::from_secs(seconds)
}

fn quiet_config() -> EngineConfig {
    EngineConfig {
        gas_throttle_enabled: false,
        ..EngineConfig::default()
    }
}

fn backend(definitions: Vec<BucketDefinition>, config: EngineConfig) -> ThrottleAccumulator {
    EngineBuilder::new(EngineRole::Backend)
        .config(config)
        .definitions(definitions)
        .try_build()
        .expect("scenario definitions are valid")
}

#[test]
fn single_slot_window_admits_once_and_recovers() {
    let mut engine = backend(
        vec![BucketDefinition::new(
            "Narrow",
            1_000,
            vec![RateGroup::new(1, vec![Category::Transfer])],
        )],
        quiet_config(),
    );
    let state = InMemoryState::default();
    let work = WorkItem::plain(PAYER, Category::Transfer);

    assert!(engine.allow(&work, at(100), &state));
    assert!(!engine.allow(&work, at(100), &state));
    // Half the window refills half a slot, which is not enough.
    assert!(!engine.allow(&work, Timestamp::new(100, 500_000_000), &state));
    assert!(engine.allow(&work, at(101), &state));
}

#[test]
fn sustained_rate_matches_configuration() {
    // 5 ops/sec over a 2s window: 10 slots of burst, then 5 per second.
    let mut engine = backend(
        vec![BucketDefinition::new(
            "Sustained",
            2_000,
            vec![RateGroup::new(5, vec![Category::SubmitMessage])],
        )],
        quiet_config(),
    );
    let state = InMemoryState::default();
    let work = WorkItem::plain(PAYER, Category::SubmitMessage);

    for _ in 0..10 {
        assert!(engine.allow(&work, at(0), &state));
    }
    assert!(!engine.allow(&work, at(0), &state));

    let mut admitted = 0;
    for _ in 0..10 {
        if engine.allow(&work, at(1), &state) {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);
}

#[test]
fn gas_denial_leaves_capacity_buckets_untouched() {
    let config = EngineConfig {
        gas_throttle_enabled: true,
        max_gas_per_sec_backend: 1_000,
        ..EngineConfig::default()
    };
    let mut engine = backend(
        vec![BucketDefinition::new(
            "Contracts",
            1_000,
            vec![RateGroup::new(100, vec![Category::ContractCall])],
        )],
        config,
    );
    let state = InMemoryState::default();

    let mut work = WorkItem::plain(PAYER, Category::ContractCall);
    work.details = WorkDetails::ContractOp {
        gas_limit: Some(2_000),
    };

    let verdict = engine.check_and_reserve(&work, at(0), &state, UsageSink::Disabled, false);
    assert_eq!(verdict, Verdict::Denied(DenialReason::GasExhausted));
    for usage in engine.usage_snapshot().tps {
        assert_eq!(usage.used, 0);
    }

    // Within budget the same work is admitted, and the reservation is
    // visible in the gas snapshot entry.
    work.details = WorkDetails::ContractOp {
        gas_limit: Some(900),
    };
    assert!(engine.allow(&work, at(0), &state));
    assert!(engine.usage_snapshot().gas.expect("gas bucket exists").used > 0);
}

#[test]
fn forced_gas_accounting_applies_when_disabled_in_config() {
    let mut engine = backend(
        vec![BucketDefinition::new(
            "Contracts",
            1_000,
            vec![RateGroup::new(100_000, vec![Category::ContractCall])],
        )],
        EngineConfig {
            gas_throttle_enabled: false,
            max_gas_per_sec_backend: 100,
            ..EngineConfig::default()
        },
    );
    let state = InMemoryState::default();
    let mut work = WorkItem::plain(PAYER, Category::ContractCall);
    work.details = WorkDetails::ContractOp {
        gas_limit: Some(500),
    };

    // Disabled: gas is ignored entirely.
    assert!(engine.allow(&work, at(0), &state));
    // Forced: the declared limit exceeds the budget.
    let verdict = engine.check_and_reserve(&work, at(0), &state, UsageSink::Disabled, true);
    assert_eq!(verdict, Verdict::Denied(DenialReason::GasExhausted));
}

#[test]
fn transfer_to_unknown_alias_charges_creation_budget() {
    let definitions = vec![
        BucketDefinition::new(
            "Transfers",
            1_000,
            vec![RateGroup::new(10_000, vec![Category::Transfer])],
        ),
        BucketDefinition::new(
            "Creations",
            1_000,
            vec![RateGroup::new(2, vec![Category::AccountCreate])],
        ),
    ];
    let mut engine = backend(definitions, quiet_config());

    let mut state = InMemoryState::default();
    state.register_alias(vec![0x0A; 20], AccountId(900));

    let credit = |alias: Vec<u8>| WorkItem {
        details: WorkDetails::Transfer(TransferBody {
            adjustments: vec![Adjustment {
                account: AccountRef::Alias(alias),
                amount: 10,
            }],
            token_transfers: vec![],
        }),
        ..WorkItem::plain(PAYER, Category::Transfer)
    };

    // A known alias is an ordinary transfer; the two-slot creation
    // budget is untouched by any number of them.
    for _ in 0..5 {
        assert!(engine.allow(&credit(vec![0x0A; 20]), at(0), &state));
    }

    // Unknown aliases consume the creation budget instead.
    assert!(engine.allow(&credit(vec![0x0B; 20]), at(0), &state));
    assert!(engine.allow(&credit(vec![0x0C; 20]), at(0), &state));
    assert!(!engine.allow(&credit(vec![0x0D; 20]), at(0), &state));

    // And ordinary transfers still flow while creations are exhausted.
    assert!(engine.allow(&credit(vec![0x0A; 20]), at(0), &state));
}

#[test]
fn auto_associations_charge_the_association_budget() {
    let definitions = vec![
        BucketDefinition::new(
            "Transfers",
            1_000,
            vec![RateGroup::new(10_000, vec![Category::Transfer])],
        ),
        BucketDefinition::new(
            "Associations",
            1_000,
            vec![RateGroup::new(1, vec![Category::TokenAssociate])],
        ),
    ];
    let mut engine = backend(definitions, quiet_config());
    let state = InMemoryState::default();

    let work = WorkItem {
        details: WorkDetails::Transfer(TransferBody {
            adjustments: vec![],
            token_transfers: vec![TokenTransferList {
                token: TokenId(7),
                adjustments: vec![Adjustment {
                    account: AccountRef::Id(AccountId(5_555)),
                    amount: 3,
                }],
                nft_transfers: vec![],
            }],
        }),
        ..WorkItem::plain(PAYER, Category::Transfer)
    };

    assert!(engine.allow(&work, at(0), &state));
    assert!(!engine.allow(&work, at(0), &state));
}

#[test]
fn nft_mints_fan_out_per_metadata_entry_with_scale() {
    let definitions = vec![BucketDefinition::new(
        "Mints",
        1_000,
        vec![RateGroup::new(10, vec![Category::TokenMint])],
    )];
    let config = EngineConfig {
        nft_mint_scale: ScaleFactor::new(5, 1).expect("valid scale"),
        ..quiet_config()
    };
    let mut engine = backend(definitions, config);
    let state = InMemoryState::default();

    // 2 metadata entries × 5:1 scale = the full 10-slot budget.
    let mut mint = WorkItem::plain(PAYER, Category::TokenMint);
    mint.details = WorkDetails::TokenMint { metadata_count: 2 };
    assert!(engine.allow(&mint, at(0), &state));
    assert!(!engine.allow(&mint, at(0), &state));

    // A fungible mint (no metadata) costs a single unscaled slot, but
    // the window is already full.
    let mut fungible = WorkItem::plain(PAYER, Category::TokenMint);
    fungible.details = WorkDetails::TokenMint { metadata_count: 0 };
    assert!(!engine.allow(&fungible, at(0), &state));
    assert!(engine.allow(&fungible, at(1), &state));
}

#[test]
fn ethereum_payloads_route_like_transfers() {
    let definitions = vec![
        BucketDefinition::new(
            "Eth",
            1_000,
            vec![RateGroup::new(100, vec![Category::EthereumTransaction])],
        ),
        BucketDefinition::new(
            "Creations",
            1_000,
            vec![RateGroup::new(1, vec![Category::AccountCreate])],
        ),
    ];
    let mut engine = backend(definitions, quiet_config());
    let state = InMemoryState::default();

    let eth = |payload: Option<EthPayload>| WorkItem {
        details: WorkDetails::EthereumTx { payload },
        ..WorkItem::plain(PAYER, Category::EthereumTransaction)
    };

    // Undecodable payloads are denied as malformed, charging nothing.
    let verdict = engine.check_and_reserve(&eth(None), at(0), &state, UsageSink::Disabled, false);
    assert_eq!(verdict, Verdict::Denied(DenialReason::MalformedWork));

    // Value to a fresh address consumes the single creation slot.
    let value_call = EthPayload {
        to: vec![0x42; 20],
        transfers_value: true,
        gas_limit: 21_000,
    };
    assert!(engine.allow(&eth(Some(value_call.clone())), at(0), &state));
    assert!(!engine.allow(&eth(Some(value_call)), at(0), &state));

    // A plain call charges the ethereum budget, which is still open.
    let plain_call = EthPayload {
        to: vec![0x42; 20],
        transfers_value: false,
        gas_limit: 21_000,
    };
    assert!(engine.allow(&eth(Some(plain_call)), at(0), &state));
}

#[test]
fn long_term_schedule_ceiling_applies_only_at_the_frontend() {
    let config = EngineConfig {
        long_term_schedules_enabled: true,
        max_schedules_per_sec: 2,
        default_schedule_expiry_secs: 30,
        ..quiet_config()
    };
    let definitions = vec![BucketDefinition::new(
        "Schedules",
        1_000,
        vec![RateGroup::new(100_000, vec![Category::ScheduleCreate])],
    )];

    let mut state = InMemoryState::default();
    state.schedule_at(at(230));
    state.schedule_at(at(230));

    let schedule = WorkItem {
        details: WorkDetails::ScheduleCreate {
            scheduled: Some(ScheduledWork {
                category: Category::SubmitMessage,
                transfer: None,
            }),
            wait_for_expiry: false,
            expiration_time: None,
            valid_start: at(200),
        },
        ..WorkItem::plain(PAYER, Category::ScheduleCreate)
    };

    let mut frontend = EngineBuilder::new(EngineRole::Frontend)
        .config(config.clone())
        .definitions(definitions.clone())
        .try_build()
        .unwrap();
    let verdict = frontend.check_and_reserve(&schedule, at(200), &state, UsageSink::Disabled, false);
    assert_eq!(verdict, Verdict::Denied(DenialReason::ScheduleBacklog));

    // An explicit wait-for-expiry time picks a different, open second.
    let explicit = WorkItem {
        details: WorkDetails::ScheduleCreate {
            scheduled: Some(ScheduledWork {
                category: Category::SubmitMessage,
                transfer: None,
            }),
            wait_for_expiry: true,
            expiration_time: Some(at(500)),
            valid_start: at(200),
        },
        ..WorkItem::plain(PAYER, Category::ScheduleCreate)
    };
    assert!(frontend.allow(&explicit, at(200), &state));

    // The backend never consults the schedule store.
    let mut backend_engine = backend(definitions, config);
    assert!(backend_engine.allow(&schedule, at(200), &state));
}

#[test]
fn exempt_payers_never_move_any_bucket() {
    let mut engine = backend(
        vec![BucketDefinition::new(
            "Narrow",
            1_000,
            vec![RateGroup::new(1, vec![Category::Transfer])],
        )],
        quiet_config(),
    );
    let state = InMemoryState::default();
    let baseline = engine.usage_snapshot();

    for payer in [1, 50, 100] {
        for _ in 0..3 {
            let work = WorkItem::plain(AccountId(payer), Category::Transfer);
            assert!(engine.allow(&work, at(7), &state));
        }
    }
    assert_eq!(engine.usage_snapshot(), baseline);
}

#[test]
fn snapshots_survive_a_json_round_trip() {
    let mut engine = backend(
        vec![BucketDefinition::new(
            "Narrow",
            1_000,
            vec![RateGroup::new(1, vec![Category::Transfer])],
        )],
        quiet_config(),
    );
    let state = InMemoryState::default();
    let work = WorkItem::plain(PAYER, Category::Transfer);
    assert!(engine.allow(&work, at(10), &state));

    let json = serde_json::to_string(&engine.usage_snapshot()).unwrap();
    let restored: UsageSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, engine.usage_snapshot());

    // A restarted engine carrying the snapshot stays saturated.
    let mut restarted = EngineBuilder::new(EngineRole::Backend)
        .config(quiet_config())
        .definitions(vec![BucketDefinition::new(
            "Narrow",
            1_000,
            vec![RateGroup::new(1, vec![Category::Transfer])],
        )])
        .initial_snapshot(restored)
        .try_build()
        .unwrap();
    assert!(!restarted.allow(&work, at(10), &state));
    assert!(restarted.allow(&work, at(11), &state));
}

#[test]
fn duration_budget_drains_and_recovers_deterministically() {
    let config = EngineConfig {
        duration_capacity: 1_000,
        duration_units_freed_per_sec: 250,
        ..quiet_config()
    };
    let mut engine = backend(vec![], config);

    assert_eq!(engine.available_duration_capacity(at(0)), 1_000);
    engine.consume_duration_capacity(at(0), 1_100);
    assert_eq!(engine.available_duration_capacity(at(0)), 0);
    // 100 units over: closed through t=0.4s, then draining normally.
    assert_eq!(engine.available_duration_capacity(at(1)), 150);
    assert_eq!(engine.available_duration_capacity(at(4)), 900);
    assert_eq!(engine.available_duration_capacity(at(5)), 1_000);
    assert_eq!(engine.available_duration_capacity(at(60)), 1_000);
}

#[test]
fn capacity_split_scales_per_node_budgets() {
    let definitions = vec![BucketDefinition::new(
        "Shared",
        1_000,
        vec![RateGroup::new(4, vec![Category::Transfer])],
    )];
    let mut engine = EngineBuilder::new(EngineRole::Frontend)
        .config(quiet_config())
        .capacity_split(4)
        .definitions(definitions)
        .try_build()
        .unwrap();
    let state = InMemoryState::default();
    let work = WorkItem::plain(PAYER, Category::Transfer);

    // One quarter of the 4-op budget: a single slot per window.
    assert!(engine.allow(&work, at(0), &state));
    assert!(!engine.allow(&work, at(0), &state));
}

#[test]
fn shared_bucket_groups_compete_for_one_window() {
    // Transfers and creations share one bucket 10:1; every creation
    // displaces ten transfers.
    let definitions = vec![BucketDefinition::new(
        "Shared",
        1_000,
        vec![
            RateGroup::new(10, vec![Category::Transfer]),
            RateGroup::new(1, vec![Category::AccountCreate]),
        ],
    )];
    let mut engine = backend(definitions, quiet_config());
    let state = InMemoryState::default();

    assert!(engine.allow(&WorkItem::plain(PAYER, Category::AccountCreate), at(0), &state));
    // The creation consumed the whole window; no transfer fits.
    assert!(!engine.allow(&WorkItem::plain(PAYER, Category::Transfer), at(0), &state));

    // A fresh window fits ten transfers instead.
    let mut admitted = 0;
    for _ in 0..12 {
        if engine.allow(&WorkItem::plain(PAYER, Category::Transfer), at(2), &state) {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}
