//! Cache events for tooling and change detection.

use crate::path::{AssetPath, BundlePath};

/// Events emitted by the cache provider.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A bundle finished loading along with all its dependencies.
    BundleLoaded { path: BundlePath },

    /// A bundle load failed, either its own bytes or a dependency.
    BundleLoadFailed {
        path: BundlePath,
        /// `true` if the bundle's own bytes loaded but a dependency did not.
        dependency_failed: bool,
    },

    /// A bundle lost its last reference and its retain timer started.
    BundleRetained { path: BundlePath, retain_secs: f32 },

    /// A bundle was removed from the cache.
    BundleEvicted { path: BundlePath },

    AssetLoaded { path: AssetPath },

    AssetLoadFailed { path: AssetPath },

    AssetRetained { path: AssetPath, retain_secs: f32 },

    AssetEvicted { path: AssetPath },

    /// A hard teardown found references that were never released.
    Leak { path: BundlePath, ref_count: u32 },

    /// A release was requested for something that holds no reference.
    RefImbalance { path: String },

    /// A backend answered a request the cache had stopped waiting for.
    StaleCompletion { path: String },
}

impl CacheEvent {
    /// The bundle or asset path this event is about.
    pub fn path(&self) -> &str {
        match self {
            CacheEvent::BundleLoaded { path }
            | CacheEvent::BundleLoadFailed { path, .. }
            | CacheEvent::BundleRetained { path, .. }
            | CacheEvent::BundleEvicted { path }
            | CacheEvent::Leak { path, .. } => path.as_str(),
            CacheEvent::AssetLoaded { path }
            | CacheEvent::AssetLoadFailed { path }
            | CacheEvent::AssetRetained { path, .. }
            | CacheEvent::AssetEvicted { path } => path.as_str(),
            CacheEvent::RefImbalance { path } | CacheEvent::StaleCompletion { path } => path,
        }
    }

    pub fn is_eviction(&self) -> bool {
        matches!(
            self,
            CacheEvent::BundleEvicted { .. } | CacheEvent::AssetEvicted { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CacheEvent::BundleLoadFailed { .. } | CacheEvent::AssetLoadFailed { .. }
        )
    }

    /// Caller bugs: leaks and unbalanced releases.
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            CacheEvent::Leak { .. } | CacheEvent::RefImbalance { .. }
        )
    }
}

/// A buffer of cache events that can be drained each frame.
#[derive(Debug, Default)]
pub struct CacheEventBuffer {
    events: Vec<CacheEvent>,
}

impl CacheEventBuffer {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: CacheEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = CacheEvent> + '_ {
        self.events.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEvent> {
        self.events.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
