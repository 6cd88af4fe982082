use std::hint::black_box;

use atelier_sync::entity::{EntityKind, IndexEntry, UpdateBatch};
use atelier_sync::pending::{ChangeTarget, PendingChange, PendingChangeQueue, Revision};
use atelier_sync::protocol::InboundFrame;
use atelier_sync::reconcile::{reconcile, Store};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use serde_json::{json, Value};

fn cards(n: i64) -> Vec<Value> {
    (0..n)
        .map(|id| json!({"@class": "Card", "id": id, "parentId": id % 32, "title": "card", "color": "#aabbcc"}))
        .collect()
}

fn bench_reconcile_upserts(c: &mut Criterion) {
    let batch = UpdateBatch::upserts(cards(1_000));

    c.bench_function("reconcile_1k_card_upserts", |b| {
        b.iter_batched(
            || (Store::new(), batch.clone()),
            |(mut store, batch)| {
                black_box(reconcile(&mut store, batch).unwrap());
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_reconcile_replay(c: &mut Criterion) {
    // Same batch against a warm cache: every upsert is a no-op replace.
    let batch = UpdateBatch::upserts(cards(1_000));
    let mut warm = Store::new();
    reconcile(&mut warm, batch.clone()).unwrap();

    c.bench_function("reconcile_1k_unchanged", |b| {
        b.iter_batched(
            || batch.clone(),
            |batch| {
                black_box(reconcile(&mut warm, batch).unwrap());
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_reconcile_deletions(c: &mut Criterion) {
    let upserts = UpdateBatch::upserts(cards(1_000));
    let deletions = UpdateBatch::deletions((0..1_000).map(|id| IndexEntry::new(EntityKind::Card, id)).collect());

    c.bench_function("reconcile_1k_card_deletions", |b| {
        b.iter_batched(
            || {
                let mut store = Store::new();
                reconcile(&mut store, upserts.clone()).unwrap();
                (store, deletions.clone())
            },
            |(mut store, batch)| {
                black_box(reconcile(&mut store, batch).unwrap());
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_frame_parse(c: &mut Criterion) {
    let frame = json!([
        {"kind": "Ping"},
        {"kind": "ChannelUpdate", "channel": "urn:atelier:project:1", "diff": 1},
        {"kind": "UpdateMessage", "updated": cards(100), "deleted": []}
    ])
    .to_string();

    c.bench_function("frame_parse_100_cards", |b| {
        b.iter(|| {
            black_box(InboundFrame::parse(black_box(&frame)).unwrap().demux());
        })
    });
}

fn bench_pending_queue(c: &mut Criterion) {
    let target = ChangeTarget::new(EntityKind::Document, 1);

    c.bench_function("pending_apply_1k_revisions", |b| {
        b.iter(|| {
            let mut queue = PendingChangeQueue::new();
            for rev in 0..1_000 {
                queue.apply(PendingChange::local(target, Revision::new(format!("r{rev}")), Value::Null));
            }
            black_box(queue.fold(target, 0usize, |n, _| n + 1));
        })
    });
}

criterion_group!(
    benches,
    bench_reconcile_upserts,
    bench_reconcile_replay,
    bench_reconcile_deletions,
    bench_frame_parse,
    bench_pending_queue,
);
criterion_main!(benches);
