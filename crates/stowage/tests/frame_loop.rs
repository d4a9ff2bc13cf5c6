//! Driving the cache from a frame clock.

use std::time::Duration;

use stowage::prelude::*;
use stowage_test_utils::MockLoaderBackend;

fn provider() -> CacheProvider {
    let manifest = Manifest::new()
        .with_bundle(BundleDescriptor::new("hud").with_asset("hud/health").with_dependency("fonts"))
        .with_bundle(BundleDescriptor::new("fonts").with_asset("fonts/mono"));
    let registry = PackageRegistry::from_manifest(manifest).expect("valid manifest");
    let config = CacheConfig::default()
        .with_bundle_retention(1.0)
        .with_asset_retention(1.0);
    CacheProvider::new(registry, MockLoaderBackend::new(), config)
}

const FRAME: Duration = Duration::from_millis(100);

#[test]
fn test_retained_bundles_evict_after_enough_frames() {
    let mut cache = provider();
    let mut clock = FrameClock::new();

    cache.load_asset::<String, _>("hud/health", |_| {});
    clock.drive_by(&mut cache, FRAME);
    assert_eq!(cache.bundle_stage("hud"), Some(Stage::Loaded));

    cache.unload_asset("hud/health");
    for _ in 0..9 {
        clock.drive_by(&mut cache, FRAME);
    }
    assert_eq!(cache.bundle_count(), 2, "still inside the window");

    clock.drive_by(&mut cache, FRAME);
    clock.drive_by(&mut cache, FRAME);
    assert_eq!(cache.bundle_count(), 0);
    assert_eq!(clock.frame_count(), 12);
}

#[test]
fn test_paused_clock_still_pumps_but_never_evicts() {
    let mut cache = provider();
    let mut clock = FrameClock::new();
    clock.pause();

    cache.load_asset::<String, _>("hud/health", |_| {});
    clock.drive_by(&mut cache, FRAME);
    assert_eq!(cache.asset_stage("hud/health"), Some(Stage::Loaded));

    cache.unload_asset("hud/health");
    for _ in 0..50 {
        clock.drive_by(&mut cache, FRAME);
    }
    assert_eq!(cache.bundle_stage("hud"), Some(Stage::Retained));

    clock.resume();
    for _ in 0..11 {
        clock.drive_by(&mut cache, FRAME);
    }
    assert_eq!(cache.bundle_count(), 0);
}

#[test]
fn test_hitch_is_capped() {
    let mut cache = provider();
    let mut clock = FrameClock::new();
    clock.set_max_delta(Duration::from_millis(250));

    cache.load_asset::<String, _>("fonts/mono", |_| {});
    clock.drive_by(&mut cache, FRAME);
    cache.unload_asset("fonts/mono");

    clock.drive_by(&mut cache, Duration::from_secs(30));
    assert_eq!(cache.bundle_stage("fonts"), Some(Stage::Retained));
    let remaining = cache
        .try_get_bundle_cache("fonts")
        .map(|b| b.retain_time_remaining())
        .unwrap_or_default();
    assert!((remaining - 0.75).abs() < 1e-4);
}
