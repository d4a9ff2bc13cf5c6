//! Test utilities for stowage.
//!
//! The main component is [`MockLoaderBackend`], a [`LoaderBackend`] that
//! records every call and either answers at once or parks the completion
//! tokens until the test decides how each request resolves.
//!
//! # Example
//!
//! ```rust
//! use stowage_bundles::{BundleDescriptor, CacheProvider, Manifest, PackageRegistry};
//! use stowage_test_utils::MockLoaderBackend;
//!
//! let manifest = Manifest::new()
//!     .with_bundle(BundleDescriptor::new("b1").with_asset("x"));
//! let registry = PackageRegistry::from_manifest(manifest).unwrap();
//!
//! let backend = MockLoaderBackend::deferred();
//! let mut provider = CacheProvider::with_defaults(registry, backend.clone());
//!
//! provider.load_asset::<String, _>("x", |_| {});
//! assert_eq!(backend.count_bundle_loads("b1"), 1);
//!
//! backend.resolve_all();
//! provider.pump();
//! backend.resolve_all();
//! provider.pump();
//! assert!(provider.peek_asset::<String>("x").is_some());
//! ```
//!
//! [`LoaderBackend`]: stowage_bundles::LoaderBackend

pub mod mock_loader;

pub use mock_loader::*;
