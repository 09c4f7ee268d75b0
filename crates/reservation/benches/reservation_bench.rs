use std::sync::Arc;

use common::{CartId, HoldId, Sku};
use criterion::{Criterion, criterion_group, criterion_main};
use reservation::{EngineConfig, InMemoryLedgerStore, ReservationEngine};

fn bench_reserve_release_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let engine = {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = ReservationEngine::self_managed(store, EngineConfig::default());
        rt.block_on(engine.seed(&Sku::new("sku-bench"), 1_000_000))
            .unwrap();
        engine
    };
    let sku = Sku::new("sku-bench");
    let cart = CartId::new("cart-bench");
    let hold_id = HoldId::for_cart_sku(&cart, &sku);

    c.bench_function("reservation/reserve_release_cycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.reserve(&sku, 1, &cart, Some(60)).await.unwrap();
                engine.release(&sku, &hold_id).await.unwrap();
            });
        });
    });
}

fn bench_reserve_contended_sku(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("reservation/reserve_contended_sku_8_carts", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(InMemoryLedgerStore::new());
                let engine = Arc::new(ReservationEngine::self_managed(
                    store,
                    EngineConfig::default(),
                ));
                let sku = Sku::new("sku-bench");
                engine.seed(&sku, 8).await.unwrap();

                let tasks: Vec<_> = (0..8)
                    .map(|i| {
                        let engine = engine.clone();
                        let sku = sku.clone();
                        tokio::spawn(async move {
                            engine
                                .reserve(&sku, 1, &CartId::new(format!("cart-{i}")), Some(60))
                                .await
                                .unwrap()
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap();
                }
            });
        });
    });
}

fn bench_snapshot_read(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let engine = {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = ReservationEngine::self_managed(store, EngineConfig::default());
        rt.block_on(engine.seed(&Sku::new("sku-bench"), 100)).unwrap();
        engine
    };
    let sku = Sku::new("sku-bench");

    c.bench_function("reservation/snapshot_read", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.snapshot(&sku).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_release_cycle,
    bench_reserve_contended_sku,
    bench_snapshot_read
);
criterion_main!(benches);
