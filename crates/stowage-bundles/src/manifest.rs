//! Serialized bundle manifest.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};
use crate::path::{AssetPath, BundlePath};

/// Immutable description of one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDescriptor {
    pub path: BundlePath,
    #[serde(default)]
    pub assets: Vec<AssetPath>,
    #[serde(default)]
    pub dependencies: Vec<BundlePath>,
    /// Size of the bundle's bytes once resident.
    #[serde(default)]
    pub size: u64,
}

impl BundleDescriptor {
    pub fn new(path: impl Into<BundlePath>) -> Self {
        Self {
            path: path.into(),
            assets: Vec::new(),
            dependencies: Vec::new(),
            size: 0,
        }
    }

    pub fn with_asset(mut self, asset: impl Into<AssetPath>) -> Self {
        self.assets.push(asset.into());
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<BundlePath>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

/// The list of bundle descriptors produced by the content build.
///
/// ```json
/// {
///   "bundles": [
///     { "path": "ui/common", "assets": ["ui/common/font.ttf"], "size": 2048 },
///     { "path": "ui/shop", "assets": ["ui/shop/panel.prefab"], "dependencies": ["ui/common"] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub bundles: Vec<BundleDescriptor>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, bundle: BundleDescriptor) -> Self {
        self.bundles.push(bundle);
        self
    }

    pub fn from_json_str(json: &str) -> ManifestResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader(reader: impl Read) -> ManifestResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> ManifestResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn to_json(&self) -> ManifestResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_optional_fields() {
        let manifest = Manifest::from_json_str(r#"{ "bundles": [ { "path": "fonts" } ] }"#).unwrap();
        let fonts = &manifest.bundles[0];
        assert!(fonts.assets.is_empty());
        assert!(fonts.dependencies.is_empty());
        assert_eq!(fonts.size, 0);
    }

    #[test]
    fn test_malformed_json() {
        let result = Manifest::from_json_str("{ \"bundles\": [ { \"assets\": [] } ] }");
        assert!(matches!(result, Err(ManifestError::Parse(_))));
    }

    #[test]
    fn test_builder_matches_json() {
        let built = Manifest::new().with_bundle(
            BundleDescriptor::new("ui/shop")
                .with_asset("ui/shop/panel.prefab")
                .with_dependency("ui/common")
                .with_size(512),
        );
        let json = built.to_json().unwrap();
        assert_eq!(Manifest::from_json_str(&json).unwrap(), built);
    }
}
