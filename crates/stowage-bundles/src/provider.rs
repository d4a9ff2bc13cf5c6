//! Cache provider - the main coordinator for bundle and asset operations.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::Arc;

use stowage_core::alloc::sparse_set::{IndexSlot, SparseSet};
use stowage_core::alloc::{HashMap, HashSet};
use stowage_core::profiling::profile_function;

use crate::backend::{
    AssetCompletion, AssetRequest, BundleCompletion, BundleHandle, BundleRequest, Completion,
    CompletionQueue, LoadedAsset, LoaderBackend, Ticket, TicketSource,
};
use crate::asset_cache::{AssetCache, AssetLoad};
use crate::bundle_cache::{BundleCache, BundleLoad};
use crate::config::CacheConfig;
use crate::event::{CacheEvent, CacheEventBuffer};
use crate::manifest::BundleDescriptor;
use crate::path::{AssetPath, BundlePath};
use crate::registry::PackageRegistry;
use crate::snapshot::{BundleSnapshot, CacheSnapshot};
use crate::stage::{RefTransition, Stage};
use crate::waiter::{AssetWaiter, BundleWaiter, Deferred};

/// The entry point for loading and releasing assets by path.
///
/// Owns every [`BundleCache`] and routes asset requests to the bundle that
/// contains them, loading dependency bundles first. All state lives on the
/// thread that owns the provider; backends report back through completion
/// tokens that are applied on [`pump`](Self::pump) or [`tick`](Self::tick).
///
/// # Example
///
/// ```ignore
/// let registry = PackageRegistry::from_json_str(manifest_json)?;
/// let mut provider = CacheProvider::new(registry, MyBackend::new(), CacheConfig::default());
///
/// provider.load_asset::<Texture, _>("sprites/player.png", |texture| {
///     if let Some(texture) = texture {
///         // Use the texture
///     }
/// });
///
/// // Once per frame
/// provider.tick(dt);
///
/// // Later, balance the reference
/// provider.unload_asset("sprites/player.png");
/// ```
pub struct CacheProvider {
    registry: Arc<PackageRegistry>,
    config: CacheConfig,
    backend: Box<dyn LoaderBackend>,
    /// Live bundle caches.
    bundles: SparseSet<BundleCache>,
    /// Bundle path to arena slot.
    index: HashMap<BundlePath, IndexSlot>,
    completions: CompletionQueue,
    tickets: TicketSource,
    events: CacheEventBuffer,
    /// User callbacks, run once the cache is consistent again.
    deferred: VecDeque<Deferred>,
}

impl CacheProvider {
    pub fn new(
        registry: impl Into<Arc<PackageRegistry>>,
        backend: impl LoaderBackend + 'static,
        config: CacheConfig,
    ) -> Self {
        let registry = registry.into();
        tracing::debug!(
            "Cache provider created for {} bundles ({} assets)",
            registry.len(),
            registry.asset_count()
        );
        Self {
            registry,
            config,
            backend: Box::new(backend),
            bundles: SparseSet::new(),
            index: HashMap::new(),
            completions: CompletionQueue::new(),
            tickets: TicketSource::default(),
            events: CacheEventBuffer::new(),
            deferred: VecDeque::new(),
        }
    }

    pub fn with_defaults(
        registry: impl Into<Arc<PackageRegistry>>,
        backend: impl LoaderBackend + 'static,
    ) -> Self {
        Self::new(registry, backend, CacheConfig::default())
    }

    pub fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of live bundle caches.
    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    /// Completions reported by the backend but not yet applied.
    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    // =========================================================================
    // Assets
    // =========================================================================

    /// Load an asset by path.
    ///
    /// The callback receives the asset, or `None` if the path is unknown,
    /// the load failed, or the loaded value is not a `T`. Every `Some`
    /// delivery carries one reference that must be balanced with
    /// [`unload_asset`](Self::unload_asset).
    pub fn load_asset<T, F>(&mut self, path: &str, callback: F)
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<Arc<T>>) + 'static,
    {
        let priority = self.config.default_priority;
        self.load_asset_with_priority(path, priority, callback);
    }

    /// Like [`load_asset`](Self::load_asset) with an explicit backend priority
    /// for the owning bundle.
    pub fn load_asset_with_priority<T, F>(&mut self, path: &str, priority: i32, callback: F)
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<Arc<T>>) + 'static,
    {
        profile_function!();
        let waiter = AssetWaiter::typed::<T, F>(callback);

        let Some(descriptor) = self.registry.bundle_for_asset(path).cloned() else {
            tracing::warn!("Asset '{}' is not listed in any bundle", path);
            self.events.push(CacheEvent::AssetLoadFailed {
                path: AssetPath::new(path),
            });
            self.deferred.push_back(waiter.resolve(None));
            self.flush_deferred();
            return;
        };

        let asset_path = AssetPath::new(path);
        let slot = self.ensure_bundle(&descriptor);
        let Some(bundle) = self.bundles.get_mut(slot) else {
            return;
        };
        let outcome = bundle.get_or_create_asset_cache(&asset_path).load_async(waiter);

        match outcome {
            AssetLoad::Ready(waiter) => self.deliver_resident(slot, &asset_path, waiter),
            AssetLoad::Coalesced => {
                tracing::trace!("Asset '{}' already loading, request coalesced", asset_path);
            }
            AssetLoad::Start => {
                self.request_bundle(slot, priority, BundleWaiter::Asset(asset_path));
            }
        }
        self.flush_deferred();
    }

    /// Release one reference taken by a successful [`load_asset`](Self::load_asset).
    ///
    /// Returns `false` if nothing was released: unknown path, no reference
    /// held, or a load still in flight.
    pub fn unload_asset(&mut self, path: &str) -> bool {
        let Some(bundle_path) = self.registry.bundle_for_asset(path).map(|d| d.path.clone())
        else {
            tracing::warn!("unload_asset: '{}' is not listed in any bundle", path);
            return false;
        };
        let Some(slot) = self.index.get(&bundle_path).copied() else {
            self.ref_imbalance(path);
            return false;
        };

        let retain = self.config.asset_retain_time();
        let Some(asset) = self
            .bundles
            .get_mut(slot)
            .and_then(|bundle| bundle.asset_mut(path))
        else {
            self.ref_imbalance(path);
            return false;
        };

        if asset.stage().is_loading() {
            tracing::warn!("unload_asset('{}') while its load is in flight; ignored", path);
            self.ref_imbalance(path);
            return false;
        }

        let released = match asset.dec_ref(retain) {
            RefTransition::Retained => {
                let asset_path = asset.path().clone();
                self.on_asset_retained(slot, asset_path, retain);
                true
            }
            RefTransition::Underflow => {
                self.ref_imbalance(path);
                false
            }
            RefTransition::Unchanged | RefTransition::Promoted => true,
        };
        self.flush_deferred();
        released
    }

    /// The resident value of an asset without taking a reference.
    pub fn peek_asset<T: Any + Send + Sync>(&self, path: &str) -> Option<Arc<T>> {
        self.asset_entry(path)?.loaded()?.downcast::<T>()
    }

    pub fn asset_stage(&self, path: &str) -> Option<Stage> {
        self.asset_entry(path).map(|asset| asset.stage())
    }

    fn asset_entry(&self, path: &str) -> Option<&AssetCache> {
        let descriptor = self.registry.bundle_for_asset(path)?;
        self.try_get_bundle_cache(&descriptor.path)?.asset(path)
    }

    // =========================================================================
    // Bundles
    // =========================================================================

    /// Load a bundle and its dependencies directly.
    ///
    /// On success the caller holds one bundle reference, released with
    /// [`unload_bundle`](Self::unload_bundle).
    pub fn load_bundle<F>(&mut self, path: &str, callback: F)
    where
        F: FnOnce(bool) + 'static,
    {
        profile_function!();
        let Some(descriptor) = self.registry.descriptor(path).cloned() else {
            tracing::warn!("Bundle '{}' is not in the manifest", path);
            self.deferred.push_back(Box::new(move || callback(false)));
            self.flush_deferred();
            return;
        };

        let slot = self.ensure_bundle(&descriptor);
        let priority = self.config.default_priority;
        self.request_bundle(slot, priority, BundleWaiter::External(Box::new(callback)));
        self.flush_deferred();
    }

    /// Release one reference taken by a successful [`load_bundle`](Self::load_bundle).
    pub fn unload_bundle(&mut self, path: &str) -> bool {
        let Some(slot) = self.index.get(path).copied() else {
            self.ref_imbalance(path);
            return false;
        };
        if self
            .bundles
            .get(slot)
            .is_some_and(|bundle| bundle.stage().is_loading())
        {
            tracing::warn!("unload_bundle('{}') while its load is in flight; ignored", path);
            self.ref_imbalance(path);
            return false;
        }

        let released = self.release_bundle_ref(slot);
        self.flush_deferred();
        released
    }

    /// Tear a bundle down now, regardless of references or its retain timer.
    ///
    /// Outstanding references are reported as a [`CacheEvent::Leak`]; pending
    /// callbacks receive failure and in-flight backend answers are discarded
    /// when they arrive.
    pub fn force_unload(&mut self, path: &str) -> bool {
        let Some(slot) = self.index.get(path).copied() else {
            return false;
        };
        self.teardown_bundle(slot);
        self.flush_deferred();
        true
    }

    /// Tear down every bundle, dependents before their dependencies.
    pub fn shutdown(&mut self) {
        profile_function!();
        let order = self.dependents_first();
        tracing::info!("Shutting down cache provider ({} bundles)", order.len());
        for slot in order {
            self.teardown_bundle(slot);
        }
        self.flush_deferred();
    }

    /// The bundle cache for `path`, created in `Created` if it does not exist.
    ///
    /// Returns `None` if the bundle is not in the manifest.
    pub fn get_or_create_bundle_cache(&mut self, path: &str) -> Option<&BundleCache> {
        let descriptor = self.registry.descriptor(path).cloned()?;
        let slot = self.ensure_bundle(&descriptor);
        self.bundles.get(slot)
    }

    /// The bundle cache for `path` if one is live. Never creates one.
    pub fn try_get_bundle_cache(&self, path: &str) -> Option<&BundleCache> {
        let slot = self.index.get(path)?;
        self.bundles.get(*slot)
    }

    pub fn bundle_stage(&self, path: &str) -> Option<Stage> {
        self.try_get_bundle_cache(path).map(|bundle| bundle.stage())
    }

    pub fn bundle_caches(&self) -> impl Iterator<Item = &BundleCache> {
        self.bundles.iter().map(|(_, bundle)| bundle)
    }

    // =========================================================================
    // Update loop
    // =========================================================================

    /// Apply pending backend completions, advance retain timers by `dt`
    /// seconds and evict whatever expired.
    pub fn tick(&mut self, dt: f32) {
        profile_function!();
        self.drain_completions();

        let mut expired = Vec::new();
        for slot in self.bundles.slots() {
            let Some(bundle) = self.bundles.get_mut(slot) else {
                continue;
            };
            let outcome = bundle.tick(dt);
            for (asset_path, loaded) in outcome.evicted_assets {
                self.dispose_asset(asset_path, loaded);
            }
            if outcome.expired {
                expired.push(slot);
            }
        }

        for slot in expired {
            if self
                .bundles
                .get(slot)
                .is_some_and(|bundle| bundle.is_evictable())
            {
                self.teardown_bundle(slot);
            }
        }
        self.flush_deferred();
    }

    /// Apply pending backend completions without advancing time.
    ///
    /// Returns the number of completions applied.
    pub fn pump(&mut self) -> usize {
        let applied = self.drain_completions();
        self.flush_deferred();
        applied
    }

    /// Evict every retained, unreferenced asset and bundle now, ignoring
    /// their timers. Returns how many entries were evicted.
    pub fn unload_unused(&mut self) -> usize {
        profile_function!();
        let mut evicted = 0;

        let slots = self.bundles.slots();
        for &slot in &slots {
            let Some(bundle) = self.bundles.get_mut(slot) else {
                continue;
            };
            for (asset_path, loaded) in bundle.evict_retained_assets() {
                self.dispose_asset(asset_path, loaded);
                evicted += 1;
            }
        }

        for slot in slots {
            if self
                .bundles
                .get(slot)
                .is_some_and(|bundle| bundle.is_evictable())
            {
                self.teardown_bundle(slot);
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::info!("Flushed {} unused cache entries", evicted);
        }
        self.flush_deferred();
        evicted
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn snapshot(&self) -> CacheSnapshot {
        let mut bundles: Vec<BundleSnapshot> = self
            .bundles
            .iter()
            .map(|(_, bundle)| BundleSnapshot::from(bundle))
            .collect();
        bundles.sort_by(|a, b| a.path.cmp(&b.path));
        CacheSnapshot { bundles }
    }

    /// Bundles that are `Loaded` with no references and nothing pending.
    pub fn orphans(&self) -> Vec<BundlePath> {
        let mut orphans: Vec<BundlePath> = self
            .bundles
            .iter()
            .filter(|(_, bundle)| bundle.is_orphan())
            .map(|(_, bundle)| bundle.path().clone())
            .collect();
        orphans.sort();
        orphans
    }

    /// Drain all events since the last call.
    pub fn drain_events(&mut self) -> impl Iterator<Item = CacheEvent> + '_ {
        self.events.drain()
    }

    pub fn events(&self) -> impl Iterator<Item = &CacheEvent> {
        self.events.iter()
    }

    // =========================================================================
    // Bundle loading
    // =========================================================================

    fn ensure_bundle(&mut self, descriptor: &Arc<BundleDescriptor>) -> IndexSlot {
        if let Some(slot) = self.index.get(&descriptor.path) {
            return *slot;
        }
        let slot = self.bundles.push(BundleCache::new(Arc::clone(descriptor)));
        self.index.insert(descriptor.path.clone(), slot);
        tracing::trace!("Created bundle cache '{}'", descriptor.path);
        slot
    }

    fn request_bundle(&mut self, slot: IndexSlot, priority: i32, waiter: BundleWaiter) {
        let Some(bundle) = self.bundles.get_mut(slot) else {
            self.serve_bundle_waiter(slot, waiter, false);
            return;
        };
        match bundle.load_async(priority, waiter) {
            BundleLoad::Ready(waiter) => self.serve_bundle_waiter(slot, waiter, true),
            BundleLoad::Coalesced => {}
            BundleLoad::Start { priority } => self.start_bundle_load(slot, priority),
        }
    }

    /// Kick every dependency, pinned by interest, then the bundle's own bytes.
    fn start_bundle_load(&mut self, slot: IndexSlot, priority: i32) {
        let Some(bundle) = self.bundles.get_mut(slot) else {
            return;
        };
        let descriptor = Arc::clone(bundle.descriptor());
        bundle.expect_dependencies(descriptor.dependencies.len());

        tracing::debug!(
            "Loading bundle '{}' ({} dependencies, priority {})",
            descriptor.path,
            descriptor.dependencies.len(),
            priority
        );

        let dependency_priority = priority.saturating_add(self.config.dependency_priority_step);
        for dependency in &descriptor.dependencies {
            let Some(dependency) = self.registry.descriptor(dependency).cloned() else {
                tracing::warn!(
                    "Bundle '{}' depends on unknown bundle '{}'",
                    descriptor.path,
                    dependency
                );
                self.dependency_settled(slot, false);
                continue;
            };
            let dependency_slot = self.ensure_bundle(&dependency);
            self.pin_bundle(slot, dependency_slot);
            self.request_bundle(
                dependency_slot,
                dependency_priority,
                BundleWaiter::Dependent(slot),
            );
        }

        let Some(bundle) = self.bundles.get_mut(slot) else {
            return;
        };
        let ticket = self.tickets.next();
        bundle.begin_request(ticket);
        let completion = BundleCompletion::new(
            slot,
            ticket,
            descriptor.path.clone(),
            self.completions.sender(),
        );
        self.backend.load_bundle(
            BundleRequest {
                descriptor,
                priority,
                ticket,
            },
            completion,
        );
    }

    fn serve_bundle_waiter(&mut self, slot: IndexSlot, waiter: BundleWaiter, success: bool) {
        match waiter {
            BundleWaiter::External(callback) => {
                if success {
                    self.acquire_bundle(slot);
                }
                self.deferred.push_back(Box::new(move || callback(success)));
            }
            BundleWaiter::Asset(asset_path) => {
                if success {
                    self.start_asset_load(slot, &asset_path);
                } else {
                    self.fail_waiting_asset(slot, &asset_path);
                }
            }
            BundleWaiter::Dependent(dependent) => self.dependency_settled(dependent, success),
            BundleWaiter::Edge(dependent) => {
                if success {
                    self.restore_edge(dependent, slot);
                } else {
                    tracing::warn!(
                        "Could not reload a dependency of a loaded bundle; the edge stays missing"
                    );
                }
            }
        }
    }

    /// Hold interest on `target` for the load of `owner`. A retained target
    /// does not hold its own dependencies, so they are pinned as well.
    fn pin_bundle(&mut self, owner: IndexSlot, target: IndexSlot) {
        let Some(bundle) = self.bundles.get_mut(target) else {
            return;
        };
        bundle.add_interest();
        let retained = bundle.stage().is_retained();
        let descriptor = Arc::clone(bundle.descriptor());
        if let Some(owner) = self.bundles.get_mut(owner) {
            owner.record_pin(target);
        }
        if retained {
            for dependency in &descriptor.dependencies {
                if let Some(next) = self.index.get(dependency).copied() {
                    self.pin_bundle(owner, next);
                }
            }
        }
    }

    fn dependency_settled(&mut self, slot: IndexSlot, success: bool) {
        let Some(bundle) = self.bundles.get_mut(slot) else {
            return;
        };
        bundle.dependency_settled(success);
        if bundle.ready_to_finish() {
            self.finish_bundle(slot);
        }
    }

    fn on_bundle_completion(
        &mut self,
        slot: IndexSlot,
        path: BundlePath,
        ticket: Ticket,
        result: Option<BundleHandle>,
    ) {
        let Some(bundle) = self
            .bundles
            .get_mut(slot)
            .filter(|bundle| bundle.is_current(ticket))
        else {
            self.stale_completion(path.as_str(), ticket);
            if let Some(handle) = result {
                self.backend.release_bundle(&path, handle);
            }
            return;
        };

        if result.is_none() {
            tracing::warn!("Backend failed to load bundle '{}'", path);
        }
        bundle.record_own_result(result);
        if bundle.ready_to_finish() {
            self.finish_bundle(slot);
        }
    }

    /// Settle a load whose own bytes and dependencies are all in.
    fn finish_bundle(&mut self, slot: IndexSlot) {
        let Some(bundle) = self.bundles.get_mut(slot) else {
            return;
        };
        let finish = bundle.finish();
        let path = bundle.path().clone();

        if finish.success {
            tracing::debug!("Bundle '{}' loaded", path);
            self.events.push(CacheEvent::BundleLoaded { path: path.clone() });
            self.take_dependency_edges(slot);
        } else {
            let dependency_failed = finish.discarded.is_some();
            if dependency_failed {
                tracing::warn!(
                    "Bundle '{}' failed to load: a dependency failed",
                    path
                );
            } else {
                tracing::warn!("Bundle '{}' failed to load", path);
            }
            self.events.push(CacheEvent::BundleLoadFailed {
                path: path.clone(),
                dependency_failed,
            });
            if let Some(handle) = finish.discarded {
                self.backend.release_bundle(&path, handle);
            }
        }

        let pins = self
            .bundles
            .get_mut(slot)
            .map(BundleCache::take_pins)
            .unwrap_or_default();
        self.release_pins(pins);

        for waiter in finish.waiters {
            self.serve_bundle_waiter(slot, waiter, finish.success);
        }
        self.settle_idle(slot);
    }

    fn release_pins(&mut self, pins: Vec<IndexSlot>) {
        for pinned in pins {
            let Some(bundle) = self.bundles.get_mut(pinned) else {
                continue;
            };
            bundle.release_interest();
            self.settle_idle(pinned);
        }
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Take one reference. A retained bundle is promoted and re-acquires its
    /// dependency edges.
    fn acquire_bundle(&mut self, slot: IndexSlot) {
        let Some(bundle) = self.bundles.get_mut(slot) else {
            return;
        };
        if bundle.inc_ref() == RefTransition::Promoted {
            tracing::debug!("Bundle '{}' re-referenced while retained", bundle.path());
            self.take_dependency_edges(slot);
        }
    }

    /// The bundle just became `Loaded`: take one reference on every
    /// dependency. A dependency that is no longer resident is fetched again
    /// and the edge is taken once it arrives.
    fn take_dependency_edges(&mut self, slot: IndexSlot) {
        let Some(bundle) = self.bundles.get(slot) else {
            return;
        };
        let descriptor = Arc::clone(bundle.descriptor());
        for dependency in &descriptor.dependencies {
            let resident = self
                .index
                .get(dependency)
                .copied()
                .filter(|&d| self.bundles.get(d).is_some_and(|b| b.stage().is_resident()));
            match resident {
                Some(dependency_slot) => {
                    self.acquire_bundle(dependency_slot);
                    if let Some(bundle) = self.bundles.get_mut(slot) {
                        bundle.hold_edge(dependency_slot);
                    }
                }
                None => self.reload_dependency(slot, &descriptor.path, dependency),
            }
        }
    }

    fn reload_dependency(&mut self, slot: IndexSlot, path: &BundlePath, dependency: &BundlePath) {
        let Some(descriptor) = self.registry.descriptor(dependency).cloned() else {
            return;
        };
        tracing::warn!(
            "Bundle '{}' is loaded but its dependency '{}' is not resident; reloading it",
            path,
            dependency
        );
        let dependency_slot = self.ensure_bundle(&descriptor);
        let priority = self
            .config
            .default_priority
            .saturating_add(self.config.dependency_priority_step);
        self.request_bundle(dependency_slot, priority, BundleWaiter::Edge(slot));
    }

    /// A reloaded dependency arrived: take the edge if the dependent still
    /// needs it.
    fn restore_edge(&mut self, dependent: IndexSlot, dependency: IndexSlot) {
        let needs_edge = self
            .bundles
            .get(dependent)
            .is_some_and(|b| b.stage() == Stage::Loaded && !b.holds_edge(dependency));
        if !needs_edge {
            return;
        }
        self.acquire_bundle(dependency);
        if let Some(bundle) = self.bundles.get_mut(dependent) {
            bundle.hold_edge(dependency);
        }
    }

    /// Drop one reference. Returns `false` on underflow.
    fn release_bundle_ref(&mut self, slot: IndexSlot) -> bool {
        let retain = self.config.bundle_retain_time();
        let Some(bundle) = self.bundles.get_mut(slot) else {
            return false;
        };
        match bundle.dec_ref(retain) {
            RefTransition::Retained => {
                self.on_bundle_retained(slot, retain);
                true
            }
            RefTransition::Underflow => {
                let path = bundle.path().to_string();
                self.ref_imbalance(&path);
                false
            }
            RefTransition::Unchanged | RefTransition::Promoted => true,
        }
    }

    /// An unreferenced, idle `Loaded` bundle becomes `Retained`.
    fn settle_idle(&mut self, slot: IndexSlot) {
        let retain = self.config.bundle_retain_time();
        if self
            .bundles
            .get_mut(slot)
            .is_some_and(|bundle| bundle.enter_retained(retain))
        {
            self.on_bundle_retained(slot, retain);
        }
    }

    /// The bundle just entered `Retained`: release its dependency edges.
    fn on_bundle_retained(&mut self, slot: IndexSlot, retain: f32) {
        let Some(bundle) = self.bundles.get_mut(slot) else {
            return;
        };
        let path = bundle.path().clone();
        let edges = bundle.take_edges();
        tracing::debug!("Bundle '{}' retained for {:.2}s", path, retain);
        self.events.push(CacheEvent::BundleRetained {
            path: path.clone(),
            retain_secs: retain,
        });
        self.release_dependency_edges(&path, edges);
    }

    /// Edges whose dependency was torn down in the meantime are dropped.
    fn release_dependency_edges(&mut self, path: &BundlePath, edges: Vec<IndexSlot>) {
        for dependency in edges {
            if self.bundles.contains(dependency) {
                self.release_bundle_ref(dependency);
            } else {
                tracing::debug!(
                    "Bundle '{}' dropped an edge to a dependency that was torn down",
                    path
                );
            }
        }
    }

    fn ref_imbalance(&mut self, path: &str) {
        tracing::warn!("Release of '{}' without a matching reference", path);
        self.events.push(CacheEvent::RefImbalance {
            path: path.to_string(),
        });
    }

    fn stale_completion(&mut self, path: &str, ticket: Ticket) {
        tracing::warn!(
            "Discarding stale completion for '{}' (ticket {})",
            path,
            ticket.get()
        );
        self.events.push(CacheEvent::StaleCompletion {
            path: path.to_string(),
        });
    }

    // =========================================================================
    // Asset loading
    // =========================================================================

    /// Serve a request for an asset that is already `Loaded` or `Retained`.
    fn deliver_resident(&mut self, slot: IndexSlot, path: &AssetPath, waiter: AssetWaiter) {
        let Some(asset) = self
            .bundles
            .get_mut(slot)
            .and_then(|bundle| bundle.asset_mut(path))
        else {
            self.deferred.push_back(waiter.resolve(None));
            return;
        };
        let Some(loaded) = asset.loaded().cloned() else {
            self.deferred.push_back(waiter.resolve(None));
            return;
        };

        if !waiter.accepts(&loaded) {
            tracing::warn!(
                "Asset '{}' is a {}, requested as {}",
                path,
                loaded.type_name(),
                waiter.type_name()
            );
            self.deferred.push_back(waiter.resolve(None));
            return;
        }

        if asset.inc_ref() == RefTransition::Promoted {
            tracing::debug!("Asset '{}' re-referenced while retained", path);
            // Loaded again: the asset holds its bundle.
            self.acquire_bundle(slot);
        }
        self.deferred.push_back(waiter.resolve(Some(loaded)));
    }

    fn start_asset_load(&mut self, slot: IndexSlot, path: &AssetPath) {
        let Some(bundle) = self.bundles.get_mut(slot) else {
            return;
        };
        let Some(handle) = bundle.handle().cloned() else {
            self.fail_waiting_asset(slot, path);
            return;
        };
        let bundle_path = bundle.path().clone();
        let Some(asset) = bundle.asset_mut(path) else {
            return;
        };
        if !asset.stage().is_loading() {
            return;
        }

        let (type_id, type_name) = asset
            .requested_type()
            .unwrap_or((TypeId::of::<()>(), "()"));
        let ticket = self.tickets.next();
        asset.begin_request(ticket);
        // The request holds the bundle, and through it every dependency.
        self.acquire_bundle(slot);

        tracing::trace!("Loading asset '{}' from bundle '{}'", path, bundle_path);
        let completion = AssetCompletion::new(slot, ticket, path.clone(), self.completions.sender());
        self.backend.load_asset(
            AssetRequest {
                bundle_path,
                bundle: handle,
                asset: path.clone(),
                type_id,
                type_name,
                ticket,
            },
            completion,
        );
    }

    /// The owning bundle could not be loaded; fail everyone waiting on the asset.
    fn fail_waiting_asset(&mut self, slot: IndexSlot, path: &AssetPath) {
        let Some(asset) = self
            .bundles
            .get_mut(slot)
            .and_then(|bundle| bundle.asset_mut(path))
        else {
            return;
        };
        if !asset.stage().is_loading() {
            return;
        }
        let waiters = asset.complete(None);
        tracing::warn!("Asset '{}' failed: its bundle did not load", path);
        self.events
            .push(CacheEvent::AssetLoadFailed { path: path.clone() });
        for waiter in waiters {
            self.deferred.push_back(waiter.resolve(None));
        }
    }

    fn on_asset_completion(
        &mut self,
        slot: IndexSlot,
        path: AssetPath,
        ticket: Ticket,
        result: Option<LoadedAsset>,
    ) {
        let Some(asset) = self
            .bundles
            .get_mut(slot)
            .and_then(|bundle| bundle.asset_mut(&path))
            .filter(|asset| asset.is_current(ticket))
        else {
            self.stale_completion(path.as_str(), ticket);
            if let Some(loaded) = result {
                self.backend.release_asset(&path, loaded);
            }
            return;
        };

        let waiters = asset.complete(result.clone());
        let Some(loaded) = result else {
            tracing::warn!("Backend failed to load asset '{}'", path);
            self.events
                .push(CacheEvent::AssetLoadFailed { path: path.clone() });
            for waiter in waiters {
                self.deferred.push_back(waiter.resolve(None));
            }
            self.release_bundle_ref(slot);
            return;
        };

        tracing::debug!("Asset '{}' loaded ({})", path, loaded.type_name());
        self.events
            .push(CacheEvent::AssetLoaded { path: path.clone() });

        let mut accepted = 0u32;
        for waiter in waiters {
            if waiter.accepts(&loaded) {
                accepted += 1;
                self.deferred.push_back(waiter.resolve(Some(loaded.clone())));
            } else {
                tracing::warn!(
                    "Asset '{}' is a {}, requested as {}",
                    path,
                    loaded.type_name(),
                    waiter.type_name()
                );
                self.deferred.push_back(waiter.resolve(None));
            }
        }

        if accepted == 0 {
            // Nobody took it: straight to the retain window, bundle released.
            let retain = self.config.asset_retain_time();
            if asset.enter_retained(retain) {
                self.on_asset_retained(slot, path, retain);
            } else {
                self.release_bundle_ref(slot);
            }
            return;
        }

        // The bundle reference taken with the request carries over.
        for _ in 0..accepted {
            asset.inc_ref();
        }
    }

    /// The asset just entered `Retained`: release its hold on the bundle.
    fn on_asset_retained(&mut self, slot: IndexSlot, path: AssetPath, retain: f32) {
        tracing::debug!("Asset '{}' retained for {:.2}s", path, retain);
        self.events.push(CacheEvent::AssetRetained {
            path,
            retain_secs: retain,
        });
        self.release_bundle_ref(slot);
    }

    fn dispose_asset(&mut self, path: AssetPath, loaded: Option<LoadedAsset>) {
        tracing::debug!("Evicted asset '{}'", path);
        if let Some(loaded) = loaded {
            self.backend.release_asset(&path, loaded);
        }
        self.events.push(CacheEvent::AssetEvicted { path });
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    fn teardown_bundle(&mut self, slot: IndexSlot) {
        let Some(mut bundle) = self.bundles.remove(slot) else {
            return;
        };
        let path = bundle.path().clone();
        self.index.remove(&path);

        let teardown = bundle.unload();
        if teardown.leaked_refs > 0 {
            self.events.push(CacheEvent::Leak {
                path: path.clone(),
                ref_count: teardown.leaked_refs,
            });
        }

        for (asset_path, loaded) in teardown.assets {
            self.dispose_asset(asset_path, Some(loaded));
        }
        for waiter in teardown.asset_waiters {
            self.deferred.push_back(waiter.resolve(None));
        }
        if let Some(handle) = teardown.handle {
            self.backend.release_bundle(&path, handle);
        }

        self.release_dependency_edges(&path, teardown.edges);
        self.release_pins(teardown.pins);

        tracing::debug!("Evicted bundle '{}'", path);
        self.events.push(CacheEvent::BundleEvicted { path });

        for waiter in teardown.bundle_waiters {
            self.serve_bundle_waiter(slot, waiter, false);
        }
    }

    /// Live bundles ordered so that every bundle precedes its dependencies.
    fn dependents_first(&self) -> Vec<IndexSlot> {
        fn visit(
            registry: &PackageRegistry,
            index: &HashMap<BundlePath, IndexSlot>,
            path: &BundlePath,
            seen: &mut HashSet<BundlePath>,
            order: &mut Vec<IndexSlot>,
        ) {
            if !seen.insert(path.clone()) {
                return;
            }
            if let Some(descriptor) = registry.descriptor(path) {
                for dependency in &descriptor.dependencies {
                    visit(registry, index, dependency, seen, order);
                }
            }
            if let Some(slot) = index.get(path) {
                order.push(*slot);
            }
        }

        let mut live: Vec<&BundlePath> = self.index.keys().collect();
        live.sort();

        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(live.len());
        for path in live {
            visit(&self.registry, &self.index, path, &mut seen, &mut order);
        }
        order.reverse();
        order
    }

    // =========================================================================
    // Completion pump
    // =========================================================================

    fn drain_completions(&mut self) -> usize {
        profile_function!();
        let mut applied = 0;
        // Synchronous backends report straight back into the queue; keep
        // draining until it is empty.
        while let Some(completion) = self.completions.try_recv() {
            applied += 1;
            match completion {
                Completion::Bundle {
                    slot,
                    path,
                    ticket,
                    result,
                } => self.on_bundle_completion(slot, path, ticket, result),
                Completion::Asset {
                    slot,
                    asset,
                    ticket,
                    result,
                } => self.on_asset_completion(slot, asset, ticket, result),
            }
        }
        applied
    }

    fn flush_deferred(&mut self) {
        while let Some(callback) = self.deferred.pop_front() {
            callback();
        }
    }
}

impl std::fmt::Debug for CacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("bundles", &self.bundles.len())
            .field("pending_completions", &self.completions.len())
            .field("pending_events", &self.events.len())
            .finish()
    }
}
