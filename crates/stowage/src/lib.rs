//! Stowage - asset bundle caching
//!
//! Stowage loads assets that ship packed into bundles. It provides:
//!
//! - **Package Registry**: the manifest of bundles, their assets and dependencies
//! - **Cache Provider**: reference-counted bundle and asset caches with
//!   request coalescing and a retain window before eviction
//! - **Loader Backends**: the seam where actual I/O plugs in
//! - **Frame Clock**: drives the cache from a frame loop
//!
//! # Quick Start
//!
//! ```ignore
//! use stowage::prelude::*;
//!
//! stowage::core::logging::init();
//!
//! let registry = PackageRegistry::from_manifest(Manifest::from_path("bundles.json")?)?;
//! let mut cache = CacheProvider::new(registry, MyBackend::new(), CacheConfig::default());
//! let mut clock = FrameClock::new();
//!
//! cache.load_asset::<Texture, _>("ui/shop/panel.png", |texture| { /* ... */ });
//!
//! loop {
//!     clock.drive(&mut cache);
//!     // Frame work
//! }
//! ```

pub mod clock;

pub use stowage_bundles as bundles;
pub use stowage_core as core;

pub use clock::FrameClock;
pub use stowage_bundles::{
    AssetPath, BundleDescriptor, BundlePath, CacheConfig, CacheEvent, CacheProvider,
    CacheSnapshot, LoadedAsset, LoaderBackend, Manifest, ManifestError, PackageRegistry, Stage,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::clock::FrameClock;
    pub use stowage_bundles::{
        AssetCompletion, AssetRequest, BundleCompletion, BundleDescriptor, BundleHandle,
        BundleRequest, CacheConfig, CacheEvent, CacheProvider, LoadedAsset, LoaderBackend,
        Manifest, PackageRegistry, Stage,
    };
}
