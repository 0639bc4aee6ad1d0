use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use stratum_storage::{
    LowerCachingTier, LowerCachingTierProvider, ResourcePool, StoreBackedTier, StoreConfig,
    StoreTierProvider, ValueHolder,
};

fn bench_tier(provider: &StoreTierProvider) -> Arc<StoreBackedTier<String, Vec<u8>>> {
    let tier = provider
        .create_caching_tier(StoreConfig::new(ResourcePool::unbounded_heap()), &[])
        .expect("create tier");
    provider.init_caching_tier(&tier).expect("init tier");
    tier
}

fn payload() -> Vec<u8> {
    vec![7u8; 256]
}

fn bench_install_hit(c: &mut Criterion) {
    let provider = StoreTierProvider::new();
    let tier = bench_tier(&provider);
    let keys: Vec<String> = (0..1_024).map(|i| format!("key-{i}")).collect();
    for key in &keys {
        tier.install_mapping(key, Box::new(|_k: &String| Ok(Some(tier.new_holder(payload())))))
            .expect("warm install");
    }

    let mut next = 0usize;
    c.bench_function("tier/install_hit", |b| {
        b.iter(|| {
            let key = &keys[next & 1_023];
            next = next.wrapping_add(1);
            let holder = tier
                .install_mapping(key, Box::new(|_k: &String| Ok(None)))
                .expect("install hit");
            black_box(holder);
        });
    });
}

fn bench_install_miss(c: &mut Criterion) {
    let provider = StoreTierProvider::new();
    let tier = bench_tier(&provider);

    c.bench_function("tier/install_miss_then_move", |b| {
        b.iter_batched(
            || ValueHolder::new(payload(), chrono::Utc::now()),
            |holder| {
                let key = "churn".to_string();
                let installed = tier
                    .install_mapping(&key, Box::new(move |_k: &String| Ok(Some(holder))))
                    .expect("install miss");
                black_box(installed);
                black_box(tier.get_and_remove(&key).expect("move"));
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_invalidate(c: &mut Criterion) {
    let provider = StoreTierProvider::new();
    let tier = bench_tier(&provider);
    tier.set_invalidation_listener(Arc::new(|key: &String, holder: Arc<ValueHolder<Vec<u8>>>| {
        black_box((key.len(), holder.value().len()));
    }));

    c.bench_function("tier/install_then_invalidate", |b| {
        b.iter(|| {
            let key = "invalidated".to_string();
            tier.install_mapping(&key, Box::new(|_k: &String| Ok(Some(tier.new_holder(payload())))))
                .expect("install");
            tier.invalidate(black_box(&key)).expect("invalidate");
        });
    });
}

criterion_group!(benches, bench_install_hit, bench_install_miss, bench_invalidate);
criterion_main!(benches);
