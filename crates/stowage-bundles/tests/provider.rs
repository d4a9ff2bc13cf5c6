//! Provider-level behaviour: coalescing, direct bundle loads, sweeps,
//! snapshots and startup from a manifest file.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use stowage_bundles::*;
use stowage_test_utils::{LoaderCall, MockLoaderBackend};

fn registry() -> PackageRegistry {
    let manifest = Manifest::new()
        .with_bundle(
            BundleDescriptor::new("ui/shop")
                .with_asset("ui/shop/panel")
                .with_asset("ui/shop/icon")
                .with_dependency("ui/common")
                .with_size(300),
        )
        .with_bundle(
            BundleDescriptor::new("ui/common")
                .with_asset("ui/common/font")
                .with_dependency("core")
                .with_size(200),
        )
        .with_bundle(BundleDescriptor::new("core").with_asset("core/shader").with_size(100));
    PackageRegistry::from_manifest(manifest).expect("valid manifest")
}

fn load_noop(provider: &mut CacheProvider, path: &str) {
    provider.load_asset::<String, _>(path, |_| {});
}

// ============================================================================
// Coalescing
// ============================================================================

#[test]
fn test_concurrent_requests_trigger_one_backend_load() {
    let backend = MockLoaderBackend::deferred();
    let mut provider = CacheProvider::with_defaults(registry(), backend.clone());

    let order = Rc::new(RefCell::new(Vec::new()));
    for i in 0..4 {
        let sink = order.clone();
        provider.load_asset::<String, _>("ui/shop/panel", move |value| {
            assert_eq!(value.as_deref().map(String::as_str), Some("ui/shop/panel"));
            sink.borrow_mut().push(i);
        });
    }

    assert_eq!(backend.count_bundle_loads("ui/shop"), 1);
    assert_eq!(backend.count_bundle_loads("ui/common"), 1);
    assert_eq!(backend.count_bundle_loads("core"), 1);

    backend.resolve_all();
    provider.pump();
    assert_eq!(backend.count_asset_loads("ui/shop/panel"), 1);
    assert!(order.borrow().is_empty());

    backend.resolve_all();
    provider.pump();
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3], "registration order");
    assert_eq!(
        provider
            .try_get_bundle_cache("ui/shop")
            .and_then(|b| b.asset("ui/shop/panel"))
            .map(|a| a.ref_count()),
        Some(4)
    );
}

#[test]
fn test_sibling_assets_share_the_bundle_load() {
    let backend = MockLoaderBackend::deferred();
    let mut provider = CacheProvider::with_defaults(registry(), backend.clone());

    load_noop(&mut provider, "ui/shop/panel");
    load_noop(&mut provider, "ui/shop/icon");
    load_noop(&mut provider, "ui/common/font");
    assert_eq!(backend.count_bundle_loads("ui/shop"), 1);
    assert_eq!(backend.count_bundle_loads("ui/common"), 1);

    backend.resolve_all();
    provider.pump();
    assert_eq!(backend.pending_assets().len(), 3);

    backend.resolve_all();
    provider.pump();
    // One hold from each loaded asset plus the dependency edge.
    assert_eq!(provider.try_get_bundle_cache("ui/shop").unwrap().ref_count(), 2);
    assert_eq!(provider.try_get_bundle_cache("ui/common").unwrap().ref_count(), 2);
    assert_eq!(provider.try_get_bundle_cache("core").unwrap().ref_count(), 1);
}

#[test]
fn test_dependencies_requested_at_higher_priority() {
    let backend = MockLoaderBackend::new();
    let mut provider = CacheProvider::with_defaults(registry(), backend.clone());

    provider.load_asset_with_priority::<String, _>("ui/shop/panel", 5, |_| {});

    assert_eq!(backend.last_bundle_priority("ui/shop"), Some(5));
    assert_eq!(backend.last_bundle_priority("ui/common"), Some(6));
    assert_eq!(backend.last_bundle_priority("core"), Some(7));

    let order: Vec<String> = backend
        .bundle_load_order()
        .iter()
        .map(|p| p.to_string())
        .collect();
    assert_eq!(order, vec!["core", "ui/common", "ui/shop"]);
}

// ============================================================================
// Direct bundle loads
// ============================================================================

#[test]
fn test_load_bundle_takes_a_reference() {
    let backend = MockLoaderBackend::new();
    let mut provider = CacheProvider::with_defaults(registry(), backend.clone());

    let results = Rc::new(RefCell::new(Vec::new()));
    let sink = results.clone();
    provider.load_bundle("ui/common", move |ok| sink.borrow_mut().push(ok));
    provider.pump();

    assert_eq!(*results.borrow(), vec![true]);
    assert_eq!(provider.try_get_bundle_cache("ui/common").unwrap().ref_count(), 1);
    assert_eq!(provider.try_get_bundle_cache("core").unwrap().ref_count(), 1);

    assert!(provider.unload_bundle("ui/common"));
    assert_eq!(provider.bundle_stage("ui/common"), Some(Stage::Retained));
    assert_eq!(provider.bundle_stage("core"), Some(Stage::Retained));

    let sink = results.clone();
    provider.load_bundle("ui/common", move |ok| sink.borrow_mut().push(ok));
    assert_eq!(*results.borrow(), vec![true, true], "retained bundle answers synchronously");
    assert_eq!(provider.bundle_stage("core"), Some(Stage::Loaded));
    assert_eq!(backend.count_bundle_loads("ui/common"), 1);

    let sink = results.clone();
    provider.load_bundle("nope", move |ok| sink.borrow_mut().push(ok));
    assert_eq!(*results.borrow(), vec![true, true, false]);
}

// ============================================================================
// Sweeps and teardown
// ============================================================================

#[test]
fn test_unload_unused_flushes_only_idle_entries() {
    let backend = MockLoaderBackend::new();
    let mut provider = CacheProvider::with_defaults(registry(), backend.clone());

    load_noop(&mut provider, "ui/shop/panel");
    load_noop(&mut provider, "ui/common/font");
    provider.pump();
    assert_eq!(provider.unload_unused(), 0);

    provider.unload_asset("ui/shop/panel");
    // The panel and its bundle; ui/common is still held by the font.
    assert_eq!(provider.unload_unused(), 2);
    assert!(provider.try_get_bundle_cache("ui/shop").is_none());
    assert_eq!(provider.bundle_stage("ui/common"), Some(Stage::Loaded));
    assert!(provider.peek_asset::<String>("ui/common/font").is_some());

    provider.unload_asset("ui/common/font");
    assert_eq!(provider.unload_unused(), 3);
    assert_eq!(provider.bundle_count(), 0);
    assert_eq!(backend.count_bundle_releases("core"), 1);
}

#[test]
fn test_shutdown_tears_down_dependents_first() {
    let backend = MockLoaderBackend::new();
    let mut provider = CacheProvider::with_defaults(registry(), backend.clone());

    load_noop(&mut provider, "ui/shop/panel");
    provider.pump();
    backend.clear_calls();
    provider.drain_events().for_each(drop);

    provider.shutdown();
    assert_eq!(provider.bundle_count(), 0);

    let released: Vec<String> = backend
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            LoaderCall::ReleaseBundle { path } => Some(path.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(released, vec!["ui/shop", "ui/common", "core"]);

    // Only the caller's unbalanced asset reference is a leak.
    let leaks: Vec<CacheEvent> = provider
        .drain_events()
        .filter(|e| matches!(e, CacheEvent::Leak { .. }))
        .collect();
    assert_eq!(
        leaks,
        vec![CacheEvent::Leak {
            path: BundlePath::new("ui/shop"),
            ref_count: 1,
        }]
    );
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_snapshot_reports_counts_and_sizes() {
    let backend = MockLoaderBackend::new();
    let mut provider = CacheProvider::with_defaults(registry(), backend.clone());

    load_noop(&mut provider, "ui/shop/panel");
    provider.pump();

    let snapshot = provider.snapshot();
    let paths: Vec<&str> = snapshot.bundles.iter().map(|b| b.path.as_str()).collect();
    assert_eq!(paths, vec!["core", "ui/common", "ui/shop"]);

    let shop = snapshot.bundle("ui/shop").unwrap();
    assert_eq!(shop.stage, Stage::Loaded);
    assert_eq!(shop.ref_count, 1);
    assert_eq!(shop.resident_size, 300);
    assert!(!shop.orphan);

    let panel = snapshot.asset("ui/shop/panel").unwrap();
    assert_eq!(panel.ref_count, 1);
    assert_eq!(panel.resident_size, "ui/shop/panel".len() as u64);

    assert_eq!(
        snapshot.resident_bytes(),
        600 + "ui/shop/panel".len() as u64
    );
    assert_eq!(snapshot.orphans().count(), 0);

    let json = snapshot.to_json().unwrap();
    assert!(json.contains("\"ui/shop/panel\""));
    assert!(json.contains("\"Loaded\""));
}

#[test]
fn test_untouched_cache_is_created_not_loaded() {
    let backend = MockLoaderBackend::new();
    let mut provider = CacheProvider::with_defaults(registry(), backend.clone());

    let core = provider.get_or_create_bundle_cache("core").unwrap();
    assert_eq!(core.stage(), Stage::Created);
    assert_eq!(core.ref_count(), 0);
    assert!(!core.is_orphan());
    assert!(backend.calls().is_empty());
    assert_eq!(provider.bundle_count(), 1);

    // Created caches are never evicted by a sweep.
    assert_eq!(provider.unload_unused(), 0);
    provider.tick(100.0);
    assert_eq!(provider.bundle_count(), 1);
}

// ============================================================================
// Startup
// ============================================================================

#[test]
fn test_registry_from_manifest_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "bundles": [
                {{ "path": "levels/forest", "assets": ["levels/forest/map"], "dependencies": ["shared"], "size": 4096 }},
                {{ "path": "shared", "assets": ["shared/palette"] }}
            ]
        }}"#
    )
    .unwrap();

    let manifest = Manifest::from_path(file.path()).unwrap();
    let registry = PackageRegistry::from_manifest(manifest).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.bundle_for_asset("levels/forest/map").map(|d| d.path.as_str()),
        Some("levels/forest")
    );
    assert_eq!(registry.total_size(), 4096);

    let backend = MockLoaderBackend::new();
    let mut provider = CacheProvider::with_defaults(registry, backend);
    load_noop(&mut provider, "levels/forest/map");
    provider.pump();
    assert_eq!(provider.bundle_stage("shared"), Some(Stage::Loaded));
}

#[test]
fn test_missing_manifest_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Manifest::from_path(dir.path().join("missing.json"));
    assert!(matches!(result, Err(ManifestError::Io { .. })));
}

#[test]
fn test_malformed_manifest_refuses_to_start() {
    let json = r#"{ "bundles": [
        { "path": "a", "assets": ["shared"] },
        { "path": "b", "assets": ["shared"] }
    ] }"#;
    assert!(matches!(
        PackageRegistry::from_json_str(json),
        Err(ManifestError::DuplicateAsset { .. })
    ));

    let json = r#"{ "bundles": [ { "path": "a", "dependencies": ["ghost"] } ] }"#;
    assert!(matches!(
        PackageRegistry::from_json_str(json),
        Err(ManifestError::MissingDependency { .. })
    ));
}
