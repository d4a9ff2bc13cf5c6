//! Error types for manifest loading and registry construction.
//!
//! Only configuration problems are errors. Load failures at runtime are
//! reported through callbacks and [`CacheEvent`](crate::event::CacheEvent)s.

use std::path::PathBuf;

use thiserror::Error;

use crate::path::{AssetPath, BundlePath};

/// A manifest that cannot be turned into a [`PackageRegistry`](crate::PackageRegistry).
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest contains a bundle or asset with an empty path")]
    EmptyPath,

    #[error("bundle '{0}' is declared more than once")]
    DuplicateBundle(BundlePath),

    #[error("asset '{asset}' is claimed by both '{first}' and '{second}'")]
    DuplicateAsset {
        asset: AssetPath,
        first: BundlePath,
        second: BundlePath,
    },

    #[error("bundle '{bundle}' lists dependency '{dependency}' more than once")]
    DuplicateDependency {
        bundle: BundlePath,
        dependency: BundlePath,
    },

    #[error("bundle '{0}' depends on itself")]
    SelfDependency(BundlePath),

    #[error("bundle '{bundle}' depends on '{dependency}', which is not in the manifest")]
    MissingDependency {
        bundle: BundlePath,
        dependency: BundlePath,
    },

    #[error("dependency cycle: {}", format_cycle(.0))]
    DependencyCycle(Vec<BundlePath>),
}

fn format_cycle(chain: &[BundlePath]) -> String {
    chain
        .iter()
        .map(BundlePath::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type alias for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
