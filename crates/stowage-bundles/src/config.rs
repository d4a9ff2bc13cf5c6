//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Tuning for retention and load priorities.
///
/// # Example
///
/// ```
/// use stowage_bundles::CacheConfig;
///
/// let config = CacheConfig::default()
///     .with_bundle_retention(10.0)
///     .with_asset_retention(2.0);
/// assert_eq!(config.bundle_retain_secs, 10.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Grace period, in seconds, before a zero-referenced bundle is evicted.
    pub bundle_retain_secs: f32,
    /// Grace period, in seconds, before a zero-referenced asset is evicted.
    pub asset_retain_secs: f32,
    /// When disabled, retain timers start at zero and entries become
    /// eligible for eviction on the next tick.
    pub retention_enabled: bool,
    /// Added to the requester's priority when a bundle kicks its dependencies.
    pub dependency_priority_step: i32,
    /// Priority used by `load_asset`/`load_bundle`.
    pub default_priority: i32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bundle_retain_secs: 5.0,
            asset_retain_secs: 5.0,
            retention_enabled: true,
            dependency_priority_step: 1,
            default_priority: 0,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_bundle_retention(mut self, secs: f32) -> Self {
        self.bundle_retain_secs = secs.max(0.0);
        self
    }

    pub fn with_asset_retention(mut self, secs: f32) -> Self {
        self.asset_retain_secs = secs.max(0.0);
        self
    }

    /// Evict zero-referenced entries on the next tick.
    pub fn without_retention(mut self) -> Self {
        self.retention_enabled = false;
        self
    }

    pub fn with_dependency_priority_step(mut self, step: i32) -> Self {
        self.dependency_priority_step = step;
        self
    }

    pub(crate) fn bundle_retain_time(&self) -> f32 {
        if self.retention_enabled {
            self.bundle_retain_secs
        } else {
            0.0
        }
    }

    pub(crate) fn asset_retain_time(&self) -> f32 {
        if self.retention_enabled {
            self.asset_retain_secs
        } else {
            0.0
        }
    }
}
