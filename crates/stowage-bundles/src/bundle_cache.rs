//! Per-bundle runtime state.
//!
//! A bundle cache owns its asset caches by value. References it holds on its
//! dependencies are plain counter edges managed by the
//! [`CacheProvider`](crate::CacheProvider): they are held exactly while the
//! bundle is `Loaded`, released on `Loaded -> Retained` and re-acquired on
//! `Retained -> Loaded`. Edges and load pins are recorded by arena slot, so
//! a dependency that was torn down and created again is never released on
//! behalf of the old instance.

use std::sync::Arc;

use stowage_core::alloc::HashMap;
use stowage_core::alloc::sparse_set::IndexSlot;

use crate::asset_cache::AssetCache;
use crate::backend::{BundleHandle, LoadedAsset, Ticket};
use crate::manifest::BundleDescriptor;
use crate::path::{AssetPath, BundlePath};
use crate::stage::{RefTransition, Stage};
use crate::waiter::{AssetWaiter, BundleWaiter, WaiterList};

/// What a load request against a [`BundleCache`] turned into.
pub(crate) enum BundleLoad {
    /// Resident; the waiter is handed back to be served immediately.
    Ready(BundleWaiter),
    /// Joined the in-flight load.
    Coalesced,
    /// Queued and moved to `Loading`; the caller kicks dependencies and then
    /// the backend.
    Start { priority: i32 },
}

/// Result of settling a load once its own bytes and all dependencies are in.
pub(crate) struct BundleFinish {
    pub(crate) success: bool,
    pub(crate) waiters: Vec<BundleWaiter>,
    /// Own bytes that arrived but were rejected because a dependency failed.
    pub(crate) discarded: Option<BundleHandle>,
}

/// What one tick did to a bundle.
#[derive(Default)]
pub(crate) struct BundleTick {
    pub(crate) evicted_assets: Vec<(AssetPath, Option<LoadedAsset>)>,
    pub(crate) expired: bool,
}

/// Everything released by a hard teardown.
pub(crate) struct BundleTeardown {
    pub(crate) handle: Option<BundleHandle>,
    pub(crate) assets: Vec<(AssetPath, LoadedAsset)>,
    pub(crate) asset_waiters: Vec<AssetWaiter>,
    pub(crate) bundle_waiters: Vec<BundleWaiter>,
    /// Dependency edges still held.
    pub(crate) edges: Vec<IndexSlot>,
    /// Interest still held by an unfinished load.
    pub(crate) pins: Vec<IndexSlot>,
    /// References not accounted for by the bundle's own in-flight asset loads.
    pub(crate) leaked_refs: u32,
}

/// Runtime state of one bundle.
pub struct BundleCache {
    descriptor: Arc<BundleDescriptor>,
    stage: Stage,
    ref_count: u32,
    retain_timer: f32,
    handle: Option<BundleHandle>,
    assets: HashMap<AssetPath, AssetCache>,
    waiters: WaiterList<BundleWaiter>,
    in_flight: Option<Ticket>,
    /// Own bytes, parked until every dependency has settled.
    own_result: Option<Option<BundleHandle>>,
    pending_dependencies: usize,
    dependency_failed: bool,
    /// Loading dependents that will take an edge on this bundle when they finish.
    dependent_interest: u32,
    /// Dependencies this bundle holds one reference on.
    edges: Vec<IndexSlot>,
    /// Bundles this one holds interest on while loading.
    pins: Vec<IndexSlot>,
}

impl BundleCache {
    pub(crate) fn new(descriptor: Arc<BundleDescriptor>) -> Self {
        Self {
            descriptor,
            stage: Stage::Created,
            ref_count: 0,
            retain_timer: 0.0,
            handle: None,
            assets: HashMap::new(),
            waiters: WaiterList::default(),
            in_flight: None,
            own_result: None,
            pending_dependencies: 0,
            dependency_failed: false,
            dependent_interest: 0,
            edges: Vec::new(),
            pins: Vec::new(),
        }
    }

    pub fn path(&self) -> &BundlePath {
        &self.descriptor.path
    }

    pub fn descriptor(&self) -> &Arc<BundleDescriptor> {
        &self.descriptor
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Seconds left before eviction; zero unless `Retained`.
    pub fn retain_time_remaining(&self) -> f32 {
        if self.stage.is_retained() {
            self.retain_timer.max(0.0)
        } else {
            0.0
        }
    }

    pub fn handle(&self) -> Option<&BundleHandle> {
        self.handle.as_ref()
    }

    /// Bytes held by the bundle itself while resident.
    pub fn resident_size(&self) -> u64 {
        if self.stage.is_resident() {
            self.descriptor.size
        } else {
            0
        }
    }

    pub fn asset(&self, path: &str) -> Option<&AssetCache> {
        self.assets.get(path)
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetCache> {
        self.assets.values()
    }

    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    /// In flight, waited on, or pinned by a loading dependent.
    pub fn is_busy(&self) -> bool {
        self.dependent_interest > 0
            || !self.waiters.is_empty()
            || self.stage.is_loading()
            || self.assets.values().any(|a| a.stage().is_loading())
    }

    /// `Loaded` with nobody referencing it and nothing pending: some caller
    /// took a reference path that was never balanced.
    pub fn is_orphan(&self) -> bool {
        self.stage == Stage::Loaded && self.ref_count == 0 && !self.is_busy()
    }

    pub(crate) fn asset_mut(&mut self, path: &str) -> Option<&mut AssetCache> {
        self.assets.get_mut(path)
    }

    pub(crate) fn get_or_create_asset_cache(&mut self, path: &AssetPath) -> &mut AssetCache {
        self.assets
            .entry(path.clone())
            .or_insert_with(|| AssetCache::new(path.clone()))
    }

    pub(crate) fn load_async(&mut self, priority: i32, waiter: BundleWaiter) -> BundleLoad {
        if self.stage.is_resident() {
            return BundleLoad::Ready(waiter);
        }
        self.waiters.push(waiter);
        if self.stage.needs_load() {
            self.stage = Stage::Loading;
            BundleLoad::Start { priority }
        } else {
            BundleLoad::Coalesced
        }
    }

    pub(crate) fn begin_request(&mut self, ticket: Ticket) {
        self.in_flight = Some(ticket);
    }

    pub(crate) fn expect_dependencies(&mut self, count: usize) {
        self.own_result = None;
        self.pending_dependencies = count;
        self.dependency_failed = false;
    }

    pub(crate) fn is_current(&self, ticket: Ticket) -> bool {
        self.stage.is_loading() && self.in_flight == Some(ticket)
    }

    pub(crate) fn record_own_result(&mut self, result: Option<BundleHandle>) {
        self.in_flight = None;
        self.own_result = Some(result);
    }

    pub(crate) fn dependency_settled(&mut self, success: bool) {
        self.pending_dependencies = self.pending_dependencies.saturating_sub(1);
        if !success {
            self.dependency_failed = true;
        }
    }

    pub(crate) fn ready_to_finish(&self) -> bool {
        self.stage.is_loading() && self.own_result.is_some() && self.pending_dependencies == 0
    }

    /// Settle the load. Success requires the bundle's own bytes and every
    /// dependency; anything less reverts the bundle to `Created`.
    pub(crate) fn finish(&mut self) -> BundleFinish {
        let own = self.own_result.take().flatten();
        let dependency_failed = std::mem::take(&mut self.dependency_failed);
        let waiters = self.waiters.take();

        match own {
            Some(handle) if !dependency_failed => {
                self.handle = Some(handle);
                self.stage = Stage::Loaded;
                BundleFinish {
                    success: true,
                    waiters,
                    discarded: None,
                }
            }
            own => {
                self.stage = Stage::Created;
                BundleFinish {
                    success: false,
                    waiters,
                    discarded: own,
                }
            }
        }
    }

    pub(crate) fn add_interest(&mut self) {
        self.dependent_interest += 1;
    }

    pub(crate) fn release_interest(&mut self) {
        self.dependent_interest = self.dependent_interest.saturating_sub(1);
    }

    pub(crate) fn record_pin(&mut self, slot: IndexSlot) {
        self.pins.push(slot);
    }

    pub(crate) fn take_pins(&mut self) -> Vec<IndexSlot> {
        std::mem::take(&mut self.pins)
    }

    pub(crate) fn hold_edge(&mut self, slot: IndexSlot) {
        self.edges.push(slot);
    }

    pub(crate) fn take_edges(&mut self) -> Vec<IndexSlot> {
        std::mem::take(&mut self.edges)
    }

    pub(crate) fn holds_edge(&self, slot: IndexSlot) -> bool {
        self.edges.contains(&slot)
    }

    pub(crate) fn inc_ref(&mut self) -> RefTransition {
        self.ref_count += 1;
        if self.stage.is_retained() {
            self.stage = Stage::Loaded;
            self.retain_timer = 0.0;
            RefTransition::Promoted
        } else {
            RefTransition::Unchanged
        }
    }

    pub(crate) fn dec_ref(&mut self, retain_time: f32) -> RefTransition {
        if self.ref_count == 0 {
            return RefTransition::Underflow;
        }
        self.ref_count -= 1;
        if self.ref_count == 0 && self.enter_retained(retain_time) {
            RefTransition::Retained
        } else {
            RefTransition::Unchanged
        }
    }

    /// `Loaded` with no references and nothing pending becomes `Retained`.
    pub(crate) fn enter_retained(&mut self, retain_time: f32) -> bool {
        if self.stage == Stage::Loaded && self.ref_count == 0 && !self.is_busy() {
            self.stage = Stage::Retained;
            self.retain_timer = retain_time;
            true
        } else {
            false
        }
    }

    /// Count timers down and evict expired assets.
    ///
    /// Assets only hold a bundle reference while `Loaded`, so evicting a
    /// retained asset does not touch `ref_count`.
    pub(crate) fn tick(&mut self, dt: f32) -> BundleTick {
        let mut outcome = BundleTick::default();

        let expired: Vec<AssetPath> = self
            .assets
            .values_mut()
            .filter_map(|asset| asset.tick(dt).then(|| asset.path().clone()))
            .collect();
        for path in expired {
            if let Some(mut asset) = self.assets.remove(&path) {
                let (loaded, _) = asset.unload();
                outcome.evicted_assets.push((path, loaded));
            }
        }

        if self.stage.is_retained() {
            self.retain_timer -= dt;
            outcome.expired = self.is_evictable() && self.retain_timer <= 0.0;
        }
        outcome
    }

    pub(crate) fn is_evictable(&self) -> bool {
        self.stage.is_retained() && self.ref_count == 0 && !self.is_busy()
    }

    /// Evict every retained, unreferenced asset regardless of its timer.
    pub(crate) fn evict_retained_assets(&mut self) -> Vec<(AssetPath, Option<LoadedAsset>)> {
        let idle: Vec<AssetPath> = self
            .assets
            .values()
            .filter(|asset| asset.is_evictable())
            .map(|asset| asset.path().clone())
            .collect();
        idle.into_iter()
            .filter_map(|path| {
                let mut asset = self.assets.remove(&path)?;
                let (loaded, _) = asset.unload();
                Some((path, loaded))
            })
            .collect()
    }

    /// Synchronous teardown, not gated by the retain timer.
    ///
    /// Disposes every asset cache and moves the bundle to `Unloaded`. The
    /// provider releases the dependency edges reported in the teardown.
    pub(crate) fn unload(&mut self) -> BundleTeardown {
        // An asset with a request out holds one reference of its own.
        let asset_loads = self.assets.values().filter(|a| a.has_request()).count() as u32;
        let leaked_refs = if self.stage.is_retained() {
            0
        } else {
            self.ref_count.saturating_sub(asset_loads)
        };
        if leaked_refs > 0 {
            tracing::warn!(
                "Bundle '{}' unloaded with {} outstanding references",
                self.path(),
                leaked_refs
            );
        }

        let mut assets = Vec::new();
        let mut asset_waiters = Vec::new();
        for (path, mut asset) in self.assets.drain() {
            let (loaded, waiters) = asset.unload();
            if let Some(loaded) = loaded {
                assets.push((path, loaded));
            }
            asset_waiters.extend(waiters);
        }

        let mut handle = self.handle.take();
        if handle.is_none() {
            handle = self.own_result.take().flatten();
        }

        self.stage = Stage::Unloaded;
        self.ref_count = 0;
        self.retain_timer = 0.0;
        self.in_flight = None;
        self.own_result = None;
        self.pending_dependencies = 0;
        self.dependency_failed = false;

        BundleTeardown {
            handle,
            assets,
            asset_waiters,
            bundle_waiters: self.waiters.take(),
            edges: self.take_edges(),
            pins: self.take_pins(),
            leaked_refs,
        }
    }
}

impl std::fmt::Debug for BundleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleCache")
            .field("path", self.path())
            .field("stage", &self.stage)
            .field("ref_count", &self.ref_count)
            .field("retain_timer", &self.retain_timer)
            .field("assets", &self.assets.len())
            .field("pending_waiters", &self.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TicketSource;

    fn bundle(path: &str) -> BundleCache {
        BundleCache::new(Arc::new(
            BundleDescriptor::new(path).with_asset("x").with_size(128),
        ))
    }

    fn loaded(path: &str) -> BundleCache {
        let mut cache = bundle(path);
        let mut tickets = TicketSource::default();
        assert!(matches!(
            cache.load_async(0, BundleWaiter::Asset(AssetPath::new("x"))),
            BundleLoad::Start { priority: 0 }
        ));
        cache.begin_request(tickets.next());
        cache.expect_dependencies(0);
        cache.record_own_result(Some(BundleHandle::new(())));
        let finish = cache.finish();
        assert!(finish.success);
        cache
    }

    #[test]
    fn test_second_request_coalesces() {
        let mut cache = bundle("b");
        assert!(matches!(
            cache.load_async(3, BundleWaiter::External(Box::new(|_| {}))),
            BundleLoad::Start { priority: 3 }
        ));
        assert!(matches!(
            cache.load_async(0, BundleWaiter::External(Box::new(|_| {}))),
            BundleLoad::Coalesced
        ));
        assert_eq!(cache.pending_waiters(), 2);
    }

    #[test]
    fn test_finish_waits_for_dependencies() {
        let mut cache = bundle("b");
        cache.load_async(0, BundleWaiter::External(Box::new(|_| {})));
        cache.expect_dependencies(2);
        cache.record_own_result(Some(BundleHandle::new(())));
        assert!(!cache.ready_to_finish());
        cache.dependency_settled(true);
        assert!(!cache.ready_to_finish());
        cache.dependency_settled(true);
        assert!(cache.ready_to_finish());
    }

    #[test]
    fn test_dependency_failure_discards_own_bytes() {
        let mut cache = bundle("b");
        cache.load_async(0, BundleWaiter::External(Box::new(|_| {})));
        cache.expect_dependencies(1);
        cache.record_own_result(Some(BundleHandle::new(())));
        cache.dependency_settled(false);

        let finish = cache.finish();
        assert!(!finish.success);
        assert!(finish.discarded.is_some());
        assert_eq!(finish.waiters.len(), 1);
        assert_eq!(cache.stage(), Stage::Created);
    }

    #[test]
    fn test_zero_refs_retains_then_expires() {
        let mut cache = loaded("b");
        assert!(cache.enter_retained(1.0));
        assert_eq!(cache.resident_size(), 128);
        assert!(!cache.tick(0.5).expired);
        assert!(cache.tick(0.5).expired);
    }

    #[test]
    fn test_interest_blocks_eviction() {
        let mut cache = loaded("b");
        cache.enter_retained(0.0);
        cache.add_interest();
        assert!(!cache.tick(1.0).expired);
        cache.release_interest();
        assert!(cache.tick(0.0).expired);
    }

    #[test]
    fn test_orphan_detection() {
        let cache = loaded("b");
        assert!(cache.is_orphan());
    }

    #[test]
    fn test_unload_reports_leak_and_edges() {
        let mut cache = loaded("b");
        cache.inc_ref();
        let dependency = IndexSlot::new(3, 7);
        cache.hold_edge(dependency);
        let teardown = cache.unload();
        assert_eq!(teardown.leaked_refs, 1);
        assert_eq!(teardown.edges, vec![dependency]);
        assert!(teardown.pins.is_empty());
        assert!(teardown.handle.is_some());
        assert_eq!(cache.stage(), Stage::Unloaded);
        assert!(!cache.holds_edge(dependency));
    }

    #[test]
    fn test_in_flight_asset_reference_is_not_a_leak() {
        let mut cache = loaded("b");
        let mut tickets = TicketSource::default();
        let asset = cache.get_or_create_asset_cache(&AssetPath::new("x"));
        assert!(matches!(
            asset.load_async(AssetWaiter::typed::<String, _>(|_| {})),
            crate::asset_cache::AssetLoad::Start
        ));
        asset.begin_request(tickets.next());
        cache.inc_ref();

        let teardown = cache.unload();
        assert_eq!(teardown.leaked_refs, 0);
        assert_eq!(teardown.asset_waiters.len(), 1);
    }
}
