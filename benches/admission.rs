//! Hot-path micro-benchmarks: one admission decision per iteration.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ledger_throttle::prelude::*;
use ledger_throttle::{Adjustment, TransferBody};

fn definitions() -> Vec<BucketDefinition> {
    vec![
        BucketDefinition::new(
            "Throughput",
            1_000,
            vec![
                RateGroup::new(1_000_000, vec![Category::Transfer, Category::SubmitMessage]),
                RateGroup::new(100_000, vec![Category::AccountCreate]),
            ],
        ),
        BucketDefinition::new(
            "Contracts",
            1_000,
            vec![RateGroup::new(350_000, vec![Category::ContractCall])],
        ),
    ]
}

fn engine() -> ThrottleAccumulator {
    EngineBuilder::new(EngineRole::Backend)
        .definitions(definitions())
        .try_build()
        .expect("benchmark definitions are valid")
}

fn bench_plain_admission(c: &mut Criterion) {
    let mut engine = engine();
    let state = InMemoryState::default();
    let work = WorkItem::plain(AccountId(2_001), Category::Transfer);
    let mut nanos: u64 = 0;

    c.bench_function("admit_plain_transfer", |b| {
        b.iter(|| {
            // Advance time each iteration so the bucket keeps leaking and
            // the verdict stays on the admission path.
            nanos += 1_000;
            let now = Timestamp::new(0, 0).plus_nanos(nanos);
            black_box(engine.allow(black_box(&work), now, &state))
        })
    });
}

fn bench_gas_metered_admission(c: &mut Criterion) {
    let mut engine = engine();
    let state = InMemoryState::default();
    let mut work = WorkItem::plain(AccountId(2_001), Category::ContractCall);
    work.details = WorkDetails::ContractOp {
        gas_limit: Some(50_000),
    };
    let mut nanos: u64 = 0;

    c.bench_function("admit_contract_call", |b| {
        b.iter(|| {
            nanos += 10_000;
            let now = Timestamp::new(0, 0).plus_nanos(nanos);
            black_box(engine.allow(black_box(&work), now, &state))
        })
    });
}

fn bench_alias_inspection(c: &mut Criterion) {
    let mut engine = engine();
    let mut state = InMemoryState::default();
    state.register_alias(vec![0xAA; 20], AccountId(900));
    let work = WorkItem {
        details: WorkDetails::Transfer(TransferBody {
            adjustments: vec![Adjustment {
                account: AccountRef::Alias(vec![0xAA; 20]),
                amount: 10,
            }],
            token_transfers: vec![],
        }),
        ..WorkItem::plain(AccountId(2_001), Category::Transfer)
    };
    let mut nanos: u64 = 0;

    c.bench_function("admit_alias_transfer", |b| {
        b.iter(|| {
            nanos += 1_000;
            let now = Timestamp::new(0, 0).plus_nanos(nanos);
            black_box(engine.allow(black_box(&work), now, &state))
        })
    });
}

criterion_group!(
    benches,
    bench_plain_admission,
    bench_gas_metered_admission,
    bench_alias_inspection
);
criterion_main!(benches);
