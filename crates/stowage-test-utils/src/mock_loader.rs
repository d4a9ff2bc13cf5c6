//! Mock implementation of LoaderBackend for testing.
//!
//! Bundle handles are [`MockBundle`] values. Assets default to a `String`
//! holding the asset path unless a value was registered with
//! [`MockLoaderBackend::set_asset_value`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use stowage_bundles::{
    AssetCompletion, AssetPath, AssetRequest, BundleCompletion, BundleHandle, BundlePath,
    BundleRequest, LoadedAsset, LoaderBackend,
};

/// Records a backend call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderCall {
    LoadBundle { path: BundlePath, priority: i32 },
    LoadAsset {
        path: AssetPath,
        bundle: BundlePath,
        type_name: &'static str,
    },
    ReleaseBundle { path: BundlePath },
    ReleaseAsset { path: AssetPath },
}

/// How the mock answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Answer inside the `load_*` call.
    Immediate,
    /// Park the tokens until the test resolves them.
    Deferred,
}

/// Handle value stored in every bundle the mock loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBundle {
    pub path: BundlePath,
}

#[derive(Default)]
struct MockState {
    calls: Vec<LoaderCall>,
    pending_bundles: Vec<(BundleRequest, BundleCompletion)>,
    pending_assets: Vec<(AssetRequest, AssetCompletion)>,
    failing_bundles: HashSet<String>,
    failing_assets: HashSet<String>,
    asset_values: HashMap<String, LoadedAsset>,
}

impl MockState {
    fn bundle_result(&self, request: &BundleRequest) -> Option<BundleHandle> {
        if self.failing_bundles.contains(request.path().as_str()) {
            None
        } else {
            Some(BundleHandle::new(MockBundle {
                path: request.path().clone(),
            }))
        }
    }

    fn asset_result(&self, request: &AssetRequest) -> Option<LoadedAsset> {
        let path = request.asset.as_str();
        if self.failing_assets.contains(path) {
            return None;
        }
        Some(match self.asset_values.get(path) {
            Some(value) => value.clone(),
            None => LoadedAsset::new(path.to_string()).with_size(path.len() as u64),
        })
    }
}

/// Mock implementation of LoaderBackend for testing.
///
/// Cloning shares the recorded state, so a test keeps one clone while the
/// provider owns another.
#[derive(Clone)]
pub struct MockLoaderBackend {
    mode: CompletionMode,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockLoaderBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLoaderBackend {
    /// A backend that answers every request immediately.
    pub fn new() -> Self {
        Self::with_mode(CompletionMode::Immediate)
    }

    /// A backend that parks every request until resolved by the test.
    pub fn deferred() -> Self {
        Self::with_mode(CompletionMode::Deferred)
    }

    pub fn with_mode(mode: CompletionMode) -> Self {
        Self {
            mode,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Make every future load of `bundle` fail.
    pub fn fail_bundle_loads(&self, bundle: &str) {
        self.state.lock().failing_bundles.insert(bundle.to_string());
    }

    /// Make every future load of `asset` fail.
    pub fn fail_asset_loads(&self, asset: &str) {
        self.state.lock().failing_assets.insert(asset.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_bundles.clear();
        state.failing_assets.clear();
    }

    /// Value handed out for `asset` instead of the default `String`.
    pub fn set_asset_value(&self, asset: &str, value: LoadedAsset) {
        self.state
            .lock()
            .asset_values
            .insert(asset.to_string(), value);
    }

    // =========================================================================
    // Resolving parked requests
    // =========================================================================

    pub fn pending_bundles(&self) -> Vec<BundlePath> {
        self.state
            .lock()
            .pending_bundles
            .iter()
            .map(|(request, _)| request.path().clone())
            .collect()
    }

    pub fn pending_assets(&self) -> Vec<AssetPath> {
        self.state
            .lock()
            .pending_assets
            .iter()
            .map(|(request, _)| request.asset.clone())
            .collect()
    }

    /// Answer the oldest parked request for `bundle` with success.
    pub fn complete_bundle(&self, bundle: &str) -> bool {
        self.answer_bundle(bundle, true)
    }

    /// Answer the oldest parked request for `bundle` with failure.
    pub fn fail_bundle(&self, bundle: &str) -> bool {
        self.answer_bundle(bundle, false)
    }

    /// Answer the oldest parked request for `asset` with success.
    pub fn complete_asset(&self, asset: &str) -> bool {
        self.answer_asset(asset, true)
    }

    /// Answer the oldest parked request for `asset` with failure.
    pub fn fail_asset(&self, asset: &str) -> bool {
        self.answer_asset(asset, false)
    }

    /// Take the parked token for `bundle` out of the mock, to be answered
    /// (or dropped) by the test directly.
    pub fn take_bundle_completion(&self, bundle: &str) -> Option<(BundleRequest, BundleCompletion)> {
        let mut state = self.state.lock();
        let index = state
            .pending_bundles
            .iter()
            .position(|(request, _)| request.path().as_str() == bundle)?;
        Some(state.pending_bundles.remove(index))
    }

    pub fn take_asset_completion(&self, asset: &str) -> Option<(AssetRequest, AssetCompletion)> {
        let mut state = self.state.lock();
        let index = state
            .pending_assets
            .iter()
            .position(|(request, _)| request.asset.as_str() == asset)?;
        Some(state.pending_assets.remove(index))
    }

    /// Answer every parked request, honouring injected failures. Returns
    /// how many were answered.
    pub fn resolve_all(&self) -> usize {
        let (bundles, assets) = {
            let mut state = self.state.lock();
            let pending_bundles = std::mem::take(&mut state.pending_bundles);
            let pending_assets = std::mem::take(&mut state.pending_assets);
            let bundles: Vec<_> = pending_bundles
                .into_iter()
                .map(|(request, completion)| (state.bundle_result(&request), completion))
                .collect();
            let assets: Vec<_> = pending_assets
                .into_iter()
                .map(|(request, completion)| (state.asset_result(&request), completion))
                .collect();
            (bundles, assets)
        };

        let answered = bundles.len() + assets.len();
        for (result, completion) in bundles {
            completion.complete(result);
        }
        for (result, completion) in assets {
            completion.complete(result);
        }
        answered
    }

    fn answer_bundle(&self, bundle: &str, success: bool) -> bool {
        let Some((request, completion)) = self.take_bundle_completion(bundle) else {
            return false;
        };
        if success {
            completion.succeed(BundleHandle::new(MockBundle {
                path: request.path().clone(),
            }));
        } else {
            completion.fail();
        }
        true
    }

    fn answer_asset(&self, asset: &str, success: bool) -> bool {
        let Some((request, completion)) = self.take_asset_completion(asset) else {
            return false;
        };
        if success {
            let result = self.state.lock().asset_result(&request);
            completion.complete(result);
        } else {
            completion.fail();
        }
        true
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<LoaderCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count_bundle_loads(&self, bundle: &str) -> usize {
        self.count(|call| matches!(call, LoaderCall::LoadBundle { path, .. } if path.as_str() == bundle))
    }

    pub fn count_asset_loads(&self, asset: &str) -> usize {
        self.count(|call| matches!(call, LoaderCall::LoadAsset { path, .. } if path.as_str() == asset))
    }

    pub fn count_bundle_releases(&self, bundle: &str) -> usize {
        self.count(|call| matches!(call, LoaderCall::ReleaseBundle { path } if path.as_str() == bundle))
    }

    pub fn count_asset_releases(&self, asset: &str) -> usize {
        self.count(|call| matches!(call, LoaderCall::ReleaseAsset { path } if path.as_str() == asset))
    }

    /// Bundle paths in the order the backend was asked to load them.
    pub fn bundle_load_order(&self) -> Vec<BundlePath> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                LoaderCall::LoadBundle { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Priority of the most recent load request for `bundle`.
    pub fn last_bundle_priority(&self, bundle: &str) -> Option<i32> {
        self.state
            .lock()
            .calls
            .iter()
            .rev()
            .find_map(|call| match call {
                LoaderCall::LoadBundle { path, priority } if path.as_str() == bundle => {
                    Some(*priority)
                }
                _ => None,
            })
    }

    fn count(&self, filter: impl Fn(&LoaderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| filter(call)).count()
    }
}

impl LoaderBackend for MockLoaderBackend {
    fn load_bundle(&mut self, request: BundleRequest, completion: BundleCompletion) {
        let mut state = self.state.lock();
        state.calls.push(LoaderCall::LoadBundle {
            path: request.path().clone(),
            priority: request.priority,
        });
        match self.mode {
            CompletionMode::Immediate => {
                let result = state.bundle_result(&request);
                drop(state);
                completion.complete(result);
            }
            CompletionMode::Deferred => state.pending_bundles.push((request, completion)),
        }
    }

    fn load_asset(&mut self, request: AssetRequest, completion: AssetCompletion) {
        let mut state = self.state.lock();
        state.calls.push(LoaderCall::LoadAsset {
            path: request.asset.clone(),
            bundle: request.bundle_path.clone(),
            type_name: request.type_name,
        });
        match self.mode {
            CompletionMode::Immediate => {
                let result = state.asset_result(&request);
                drop(state);
                completion.complete(result);
            }
            CompletionMode::Deferred => state.pending_assets.push((request, completion)),
        }
    }

    fn release_bundle(&mut self, path: &BundlePath, _handle: BundleHandle) {
        self.state
            .lock()
            .calls
            .push(LoaderCall::ReleaseBundle { path: path.clone() });
    }

    fn release_asset(&mut self, path: &AssetPath, _asset: LoadedAsset) {
        self.state
            .lock()
            .calls
            .push(LoaderCall::ReleaseAsset { path: path.clone() });
    }
}
