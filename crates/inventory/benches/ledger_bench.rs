//! Reservation throughput of the in-memory ledger.
//!
//! Run with: `cargo bench -p inventory`

use common::{AggregateId, ProductId};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use inventory::{InMemoryInventoryLedger, InventoryLedger, ReservationLine};
use tokio::runtime::Runtime;

fn ledger_with_stock(products: usize) -> InMemoryInventoryLedger {
    let rt = Runtime::new().unwrap();
    let ledger = InMemoryInventoryLedger::new();
    rt.block_on(async {
        for i in 0..products {
            ledger
                .restock(&ProductId::new(format!("SKU-{i:03}")), u32::MAX / 2)
                .await
                .unwrap();
        }
    });
    ledger
}

fn reserve_release(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("reserve_release");

    for lines in [1usize, 3, 10] {
        let ledger = ledger_with_stock(lines);
        let request: Vec<_> = (0..lines)
            .map(|i| ReservationLine::new(format!("SKU-{i:03}"), 1))
            .collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &request, |b, request| {
            b.to_async(&rt).iter(|| async {
                let order_id = AggregateId::new();
                ledger.reserve(order_id, request).await.unwrap();
                ledger.release(order_id).await.unwrap();
            });
        });
    }

    group.finish();
}

fn contended_reserve(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ledger = ledger_with_stock(1);

    c.bench_function("contended_reserve_8_tasks", |b| {
        b.to_async(&rt).iter(|| async {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let ledger = ledger.clone();
                    tokio::spawn(async move {
                        let order_id = AggregateId::new();
                        ledger
                            .reserve(order_id, &[ReservationLine::new("SKU-000", 1)])
                            .await
                            .unwrap();
                        ledger.release(order_id).await.unwrap();
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }
        });
    });
}

criterion_group!(benches, reserve_release, contended_reserve);
criterion_main!(benches);
