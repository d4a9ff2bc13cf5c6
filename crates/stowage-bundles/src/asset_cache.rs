//! Per-asset runtime state.

use crate::backend::{LoadedAsset, Ticket};
use crate::path::AssetPath;
use crate::stage::{RefTransition, Stage};
use crate::waiter::{AssetWaiter, WaiterList};

/// What a load request against an [`AssetCache`] turned into.
pub(crate) enum AssetLoad {
    /// Content is resident; the waiter is handed back for immediate delivery.
    Ready(AssetWaiter),
    /// A load is in flight; the waiter joined it.
    Coalesced,
    /// The waiter was queued and the cache moved to `Loading`. The caller
    /// must make the owning bundle resident and then issue the backend load.
    Start,
}

/// Runtime state of one asset, owned by its bundle cache.
///
/// From the moment its backend request goes out until it enters `Retained`
/// (or the load fails) an asset holds one reference on its bundle.
pub struct AssetCache {
    path: AssetPath,
    stage: Stage,
    ref_count: u32,
    retain_timer: f32,
    loaded: Option<LoadedAsset>,
    waiters: WaiterList<AssetWaiter>,
    in_flight: Option<Ticket>,
}

impl AssetCache {
    pub(crate) fn new(path: AssetPath) -> Self {
        Self {
            path,
            stage: Stage::Created,
            ref_count: 0,
            retain_timer: 0.0,
            loaded: None,
            waiters: WaiterList::default(),
            in_flight: None,
        }
    }

    pub fn path(&self) -> &AssetPath {
        &self.path
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

    pub fn loaded(&self) -> Option<&LoadedAsset> {
        self.loaded.as_ref()
    }

    pub fn resident_size(&self) -> u64 {
        self.loaded.as_ref().map_or(0, LoadedAsset::size)
    }

    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn load_async(&mut self, waiter: AssetWaiter) -> AssetLoad {
        if self.stage.is_resident() {
            return AssetLoad::Ready(waiter);
        }
        self.waiters.push(waiter);
        if self.stage.needs_load() {
            self.stage = Stage::Loading;
            AssetLoad::Start
        } else {
            AssetLoad::Coalesced
        }
    }

    /// Type requested by the oldest waiter, forwarded to the backend.
    pub(crate) fn requested_type(&self) -> Option<(std::any::TypeId, &'static str)> {
        self.waiters
            .iter()
            .next()
            .map(|waiter| (waiter.type_id(), waiter.type_name()))
    }

    pub(crate) fn begin_request(&mut self, ticket: Ticket) {
        self.in_flight = Some(ticket);
    }

    pub(crate) fn is_current(&self, ticket: Ticket) -> bool {
        self.stage.is_loading() && self.in_flight == Some(ticket)
    }

    /// A backend request is out. The asset holds its bundle from here on.
    pub(crate) fn has_request(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Apply the backend's answer and hand back every waiter, oldest first.
    ///
    /// On success the cache is `Loaded` with zero references; the caller
    /// counts deliveries into it. On failure it reverts to `Created`.
    pub(crate) fn complete(&mut self, result: Option<LoadedAsset>) -> Vec<AssetWaiter> {
        self.in_flight = None;
        match result {
            Some(asset) => {
                self.loaded = Some(asset);
                self.stage = Stage::Loaded;
            }
            None => {
                self.loaded = None;
                self.stage = Stage::Created;
            }
        }
        self.waiters.take()
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

    /// `Loaded` with no references becomes `Retained`. Returns whether it moved.
    pub(crate) fn enter_retained(&mut self, retain_time: f32) -> bool {
        if self.stage == Stage::Loaded && self.ref_count == 0 {
            self.stage = Stage::Retained;
            self.retain_timer = retain_time;
            true
        } else {
            false
        }
    }

    /// Count the retain timer down. Returns `true` once the asset is due for eviction.
    pub(crate) fn tick(&mut self, dt: f32) -> bool {
        if self.stage.is_retained() {
            self.retain_timer -= dt;
            self.is_evictable() && self.retain_timer <= 0.0
        } else {
            false
        }
    }

    pub(crate) fn is_evictable(&self) -> bool {
        self.stage.is_retained() && self.ref_count == 0
    }

    /// Immediate teardown. Returns the resident content and any waiters that
    /// will now never be served.
    pub(crate) fn unload(&mut self) -> (Option<LoadedAsset>, Vec<AssetWaiter>) {
        if self.ref_count > 0 {
            tracing::warn!(
                "Asset '{}' unloaded with {} outstanding references",
                self.path,
                self.ref_count
            );
        }
        self.stage = Stage::Unloaded;
        self.ref_count = 0;
        self.retain_timer = 0.0;
        self.in_flight = None;
        (self.loaded.take(), self.waiters.take())
    }
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("path", &self.path)
            .field("stage", &self.stage)
            .field("ref_count", &self.ref_count)
            .field("retain_timer", &self.retain_timer)
            .field("pending_waiters", &self.waiters.len())
            .finish()
    }
}
