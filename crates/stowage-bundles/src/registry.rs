//! Package registry: static lookup from asset and bundle paths to descriptors.

use std::sync::Arc;

use stowage_core::alloc::{HashMap, HashSet};

use crate::error::{ManifestError, ManifestResult};
use crate::manifest::{BundleDescriptor, Manifest};
use crate::path::{AssetPath, BundlePath};

/// Immutable table built once from a [`Manifest`].
///
/// Construction validates the manifest; a registry that exists is always
/// internally consistent (every dependency resolves, no cycles, every asset
/// belongs to exactly one bundle).
#[derive(Debug, Clone)]
pub struct PackageRegistry {
    bundles: HashMap<BundlePath, Arc<BundleDescriptor>>,
    assets: HashMap<AssetPath, BundlePath>,
    /// Manifest order, for deterministic iteration.
    order: Vec<BundlePath>,
}

impl PackageRegistry {
    pub fn from_manifest(manifest: Manifest) -> ManifestResult<Self> {
        let mut bundles: HashMap<BundlePath, Arc<BundleDescriptor>> = HashMap::new();
        let mut assets: HashMap<AssetPath, BundlePath> = HashMap::new();
        let mut order = Vec::with_capacity(manifest.bundles.len());

        for descriptor in manifest.bundles {
            if descriptor.path.is_empty() || descriptor.assets.iter().any(AssetPath::is_empty) {
                return Err(ManifestError::EmptyPath);
            }
            if bundles.contains_key(&descriptor.path) {
                return Err(ManifestError::DuplicateBundle(descriptor.path));
            }
            for asset in &descriptor.assets {
                if let Some(first) = assets.insert(asset.clone(), descriptor.path.clone()) {
                    return Err(ManifestError::DuplicateAsset {
                        asset: asset.clone(),
                        first,
                        second: descriptor.path.clone(),
                    });
                }
            }
            order.push(descriptor.path.clone());
            bundles.insert(descriptor.path.clone(), Arc::new(descriptor));
        }

        for path in &order {
            let descriptor = &bundles[path];
            let mut seen = HashSet::new();
            for dependency in &descriptor.dependencies {
                if dependency == path {
                    return Err(ManifestError::SelfDependency(path.clone()));
                }
                if !seen.insert(dependency) {
                    return Err(ManifestError::DuplicateDependency {
                        bundle: path.clone(),
                        dependency: dependency.clone(),
                    });
                }
                if !bundles.contains_key(dependency) {
                    return Err(ManifestError::MissingDependency {
                        bundle: path.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let registry = Self {
            bundles,
            assets,
            order,
        };
        registry.check_acyclic()?;

        tracing::info!(
            "Package registry built: {} bundles, {} assets, {} bytes",
            registry.bundles.len(),
            registry.assets.len(),
            registry.total_size()
        );
        Ok(registry)
    }

    pub fn from_json_str(json: &str) -> ManifestResult<Self> {
        Self::from_manifest(Manifest::from_json_str(json)?)
    }

    fn check_acyclic(&self) -> ManifestResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            registry: &'a PackageRegistry,
            path: &'a BundlePath,
            marks: &mut HashMap<&'a BundlePath, Mark>,
            stack: &mut Vec<&'a BundlePath>,
        ) -> ManifestResult<()> {
            match marks.get(path) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|p| *p == path).unwrap_or(0);
                    let mut chain: Vec<BundlePath> =
                        stack[start..].iter().map(|p| (*p).clone()).collect();
                    chain.push(path.clone());
                    return Err(ManifestError::DependencyCycle(chain));
                }
                None => {}
            }

            marks.insert(path, Mark::Visiting);
            stack.push(path);
            for dependency in &registry.bundles[path].dependencies {
                visit(registry, dependency, marks, stack)?;
            }
            stack.pop();
            marks.insert(path, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        for path in &self.order {
            visit(self, path, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    /// Descriptor of the bundle that contains `asset`.
    pub fn bundle_for_asset(&self, asset: &str) -> Option<&Arc<BundleDescriptor>> {
        self.assets.get(asset).and_then(|bundle| self.bundles.get(bundle))
    }

    pub fn descriptor(&self, bundle: &str) -> Option<&Arc<BundleDescriptor>> {
        self.bundles.get(bundle)
    }

    pub fn contains_asset(&self, asset: &str) -> bool {
        self.assets.contains_key(asset)
    }

    /// Descriptors in manifest order.
    pub fn bundles(&self) -> impl Iterator<Item = &Arc<BundleDescriptor>> + '_ {
        self.order.iter().map(|path| &self.bundles[path])
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn total_size(&self) -> u64 {
        self.bundles.values().map(|d| d.size).sum()
    }

    /// All transitive dependencies of `bundle`, leaf-first, without `bundle` itself.
    pub fn dependency_closure(&self, bundle: &str) -> Vec<BundlePath> {
        fn walk(
            registry: &PackageRegistry,
            path: &BundlePath,
            seen: &mut HashSet<BundlePath>,
            out: &mut Vec<BundlePath>,
        ) {
            for dependency in &registry.bundles[path].dependencies {
                if seen.insert(dependency.clone()) {
                    walk(registry, dependency, seen, out);
                    out.push(dependency.clone());
                }
            }
        }

        let mut out = Vec::new();
        if let Some(descriptor) = self.bundles.get(bundle) {
            let mut seen = HashSet::new();
            walk(self, &descriptor.path, &mut seen, &mut out);
        }
        out
    }
}
