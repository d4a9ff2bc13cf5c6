//! Stowage Bundles
//!
//! Reference-counted cache for assets packed into bundles. Assets are
//! requested by path; the [`PackageRegistry`] maps each one to the bundle
//! that contains it and the [`CacheProvider`] loads that bundle, and every
//! bundle it depends on, through a [`LoaderBackend`] before asking for the
//! asset itself.
//!
//! Concurrent requests for the same path coalesce into one backend call.
//! Content that loses its last reference is kept for a retain window and
//! evicted by [`CacheProvider::tick`] once the window runs out; a new
//! reference inside the window cancels the eviction.
//!
//! Everything runs on the thread that owns the provider. Backends may do
//! their work anywhere and answer through the `Send` completion tokens; the
//! answers are applied, and user callbacks invoked, from `pump`/`tick`.

mod asset_cache;
mod backend;
mod bundle_cache;
mod config;
mod error;
mod event;
mod manifest;
mod path;
mod provider;
mod registry;
mod snapshot;
mod stage;
mod waiter;

pub use asset_cache::AssetCache;
pub use backend::{
    AssetCompletion, AssetRequest, BundleCompletion, BundleHandle, BundleRequest, LoadedAsset,
    LoaderBackend, Ticket,
};
pub use bundle_cache::BundleCache;
pub use config::CacheConfig;
pub use error::{ManifestError, ManifestResult};
pub use event::{CacheEvent, CacheEventBuffer};
pub use manifest::{BundleDescriptor, Manifest};
pub use path::{AssetPath, BundlePath};
pub use provider::CacheProvider;
pub use registry::PackageRegistry;
pub use snapshot::{AssetSnapshot, BundleSnapshot, CacheSnapshot};
pub use stage::Stage;
