//! Point-in-time view of the cache for tooling.

use serde::Serialize;

use crate::asset_cache::AssetCache;
use crate::bundle_cache::BundleCache;
use crate::path::{AssetPath, BundlePath};
use crate::stage::Stage;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSnapshot {
    pub path: AssetPath,
    pub stage: Stage,
    pub ref_count: u32,
    pub retain_time_remaining: f32,
    pub resident_size: u64,
}

impl From<&AssetCache> for AssetSnapshot {
    fn from(asset: &AssetCache) -> Self {
        Self {
            path: asset.path().clone(),
            stage: asset.stage(),
            ref_count: asset.ref_count(),
            retain_time_remaining: asset.retain_time_remaining(),
            resident_size: asset.resident_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleSnapshot {
    pub path: BundlePath,
    pub stage: Stage,
    pub ref_count: u32,
    pub retain_time_remaining: f32,
    pub resident_size: u64,
    /// `Loaded`, unreferenced, nothing pending.
    pub orphan: bool,
    /// Sorted by path.
    pub assets: Vec<AssetSnapshot>,
}

impl From<&BundleCache> for BundleSnapshot {
    fn from(bundle: &BundleCache) -> Self {
        let mut assets: Vec<AssetSnapshot> = bundle.assets().map(AssetSnapshot::from).collect();
        assets.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            path: bundle.path().clone(),
            stage: bundle.stage(),
            ref_count: bundle.ref_count(),
            retain_time_remaining: bundle.retain_time_remaining(),
            resident_size: bundle.resident_size(),
            orphan: bundle.is_orphan(),
            assets,
        }
    }
}

/// Every live bundle cache, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheSnapshot {
    pub bundles: Vec<BundleSnapshot>,
}

impl CacheSnapshot {
    pub fn bundle(&self, path: &str) -> Option<&BundleSnapshot> {
        self.bundles.iter().find(|b| b.path.as_str() == path)
    }

    pub fn asset(&self, path: &str) -> Option<&AssetSnapshot> {
        self.bundles
            .iter()
            .flat_map(|b| b.assets.iter())
            .find(|a| a.path.as_str() == path)
    }

    /// Bundle bytes plus reported asset sizes of everything resident.
    pub fn resident_bytes(&self) -> u64 {
        self.bundles
            .iter()
            .map(|b| b.resident_size + b.assets.iter().map(|a| a.resident_size).sum::<u64>())
            .sum()
    }

    pub fn orphans(&self) -> impl Iterator<Item = &BundleSnapshot> {
        self.bundles.iter().filter(|b| b.orphan)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
