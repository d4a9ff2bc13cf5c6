//! A backend that loads on worker threads while the cache stays on the main
//! thread.
//!
//! Run with `RUST_LOG=debug` to see the cache transitions.

use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use stowage_bundles::{
    AssetCompletion, AssetRequest, BundleCompletion, BundleHandle, BundleRequest, CacheConfig,
    CacheProvider, LoadedAsset, LoaderBackend, PackageRegistry,
};

const MANIFEST: &str = r#"{
    "bundles": [
        { "path": "levels/forest", "assets": ["levels/forest/map"], "dependencies": ["shared"], "size": 4096 },
        { "path": "shared", "assets": ["shared/palette"], "size": 512 }
    ]
}"#;

/// Pretend bundle bytes.
struct BundleBytes {
    name: String,
}

struct ThreadedBackend {
    latency: Duration,
}

impl LoaderBackend for ThreadedBackend {
    fn load_bundle(&mut self, request: BundleRequest, completion: BundleCompletion) {
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            completion.succeed(BundleHandle::new(BundleBytes {
                name: request.path().to_string(),
            }));
        });
    }

    fn load_asset(&mut self, request: AssetRequest, completion: AssetCompletion) {
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            let Some(bundle) = request.bundle.downcast_ref::<BundleBytes>() else {
                completion.fail();
                return;
            };
            let text = format!("{} from {}", request.asset, bundle.name);
            let size = text.len() as u64;
            completion.succeed(LoadedAsset::new(text).with_size(size));
        });
    }

    fn release_bundle(&mut self, path: &stowage_bundles::BundlePath, _handle: BundleHandle) {
        tracing::info!("Backend dropped bundle '{}'", path);
    }
}

fn main() {
    stowage_core::logging::init();
    stowage_core::profiling::set_enabled(true);

    let registry = match PackageRegistry::from_json_str(MANIFEST) {
        Ok(registry) => registry,
        Err(err) => {
            tracing::error!("Bad manifest: {}", err);
            return;
        }
    };
    let backend = ThreadedBackend {
        latency: Duration::from_millis(20),
    };
    let config = CacheConfig::default()
        .with_bundle_retention(0.2)
        .with_asset_retention(0.2);
    let mut provider = CacheProvider::new(registry, backend, config);

    let loaded = Rc::new(Cell::new(false));
    let flag = loaded.clone();
    provider.load_asset::<String, _>("levels/forest/map", move |map| {
        match map {
            Some(map) => tracing::info!("Got '{}'", map),
            None => tracing::warn!("Map failed to load"),
        }
        flag.set(true);
    });

    let mut last = Instant::now();
    let start = last;
    while start.elapsed() < Duration::from_secs(2) {
        stowage_core::profiling::new_frame();
        let now = Instant::now();
        provider.tick((now - last).as_secs_f32());
        last = now;

        if loaded.replace(false) {
            provider.unload_asset("levels/forest/map");
        }
        if provider.bundle_count() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(16));
    }

    tracing::info!("Final state: {:?}", provider.snapshot());
}
