//! Stock guard throughput: uncontended pairs and contended fan-out.

use std::sync::Arc;

use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};

use tradepost_catalog::Product;
use tradepost_core::ProductId;
use tradepost_infra::{CatalogStore, InMemoryCatalog};

fn seed(rt: &tokio::runtime::Runtime, catalog: &InMemoryCatalog, quantity: i64) -> ProductId {
    let product =
        Product::new(ProductId::new(), "Bench widget", 1_000, quantity, Utc::now()).unwrap();
    let id = product.id;
    rt.block_on(catalog.upsert(product)).unwrap();
    id
}

fn bench_uncontended(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let catalog = InMemoryCatalog::new();
    let id = seed(&rt, &catalog, i64::MAX / 2);

    c.bench_function("stock_guard/decrement_increment_pair", |b| {
        b.iter(|| {
            rt.block_on(async {
                catalog.decrement_if_available(id, 1).await.unwrap();
                catalog.increment(id, 1).await.unwrap();
            })
        })
    });
}

fn bench_contended(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("stock_guard/contended_8x64", |b| {
        b.iter(|| {
            let catalog = Arc::new(InMemoryCatalog::new());
            let id = seed(&rt, &catalog, 8 * 64);

            rt.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..8 {
                    let catalog = catalog.clone();
                    handles.push(tokio::spawn(async move {
                        for _ in 0..64 {
                            catalog.decrement_if_available(id, 1).await.unwrap();
                        }
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        })
    });
}

criterion_group!(benches, bench_uncontended, bench_contended);
criterion_main!(benches);
