//! Benchmarks for cache load/unload churn

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use stowage_bundles::{BundleDescriptor, CacheConfig, CacheProvider, Manifest, PackageRegistry};
use stowage_test_utils::MockLoaderBackend;

/// `count` bundles in a chain, each with four assets and depending on the previous one.
fn chain_registry(count: usize) -> PackageRegistry {
    let mut manifest = Manifest::new();
    for i in 0..count {
        let mut bundle = BundleDescriptor::new(format!("bundle/{i}")).with_size(1024);
        for a in 0..4 {
            bundle = bundle.with_asset(format!("bundle/{i}/asset{a}"));
        }
        if i > 0 {
            bundle = bundle.with_dependency(format!("bundle/{}", i - 1));
        }
        manifest = manifest.with_bundle(bundle);
    }
    PackageRegistry::from_manifest(manifest).expect("valid manifest")
}

fn bench_cold_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("cold_load");

    for depth in [1, 8, 32] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let registry = std::sync::Arc::new(chain_registry(depth));
            let leaf = format!("bundle/{}/asset0", depth - 1);
            b.iter(|| {
                let mut provider = CacheProvider::new(
                    registry.clone(),
                    MockLoaderBackend::new(),
                    CacheConfig::default(),
                );
                provider.load_asset::<String, _>(&leaf, |_| {});
                provider.pump();
                black_box(provider.bundle_count())
            });
        });
    }

    group.finish();
}

fn bench_warm_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("warm_churn");

    group.bench_function("retained_reload", |b| {
        let mut provider = CacheProvider::new(
            chain_registry(16),
            MockLoaderBackend::new(),
            CacheConfig::default(),
        );
        provider.load_asset::<String, _>("bundle/15/asset0", |_| {});
        provider.pump();
        provider.unload_asset("bundle/15/asset0");

        b.iter(|| {
            provider.load_asset::<String, _>("bundle/15/asset0", |asset| {
                black_box(asset);
            });
            provider.unload_asset("bundle/15/asset0");
        });
    });

    group.bench_function("tick_idle", |b| {
        let mut provider = CacheProvider::new(
            chain_registry(64),
            MockLoaderBackend::new(),
            CacheConfig::default(),
        );
        for i in 0..64 {
            provider.load_asset::<String, _>(&format!("bundle/{i}/asset1"), |_| {});
        }
        provider.pump();

        b.iter(|| provider.tick(black_box(0.016)));
    });

    group.finish();
}

criterion_group!(benches, bench_cold_load, bench_warm_churn);
criterion_main!(benches);
