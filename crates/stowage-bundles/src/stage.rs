//! Lifecycle stage shared by bundle and asset caches.

use serde::Serialize;

/// The current stage of a cache entry in the loading pipeline.
///
/// ```text
/// Created -> Loading -> Loaded <-> Retained -> Unloaded
///               |
///               +-> Created (load failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Stage {
    /// Known but not loaded. Also the stage a failed load reverts to.
    #[default]
    Created,

    /// A backend load is in flight.
    Loading,

    /// Resident and referenced.
    Loaded,

    /// Resident with zero references, waiting out its retain timer.
    Retained,

    /// Torn down. Terminal for this cache instance.
    Unloaded,
}

impl Stage {
    /// Returns `true` if the content is resident (`Loaded` or `Retained`).
    pub fn is_resident(&self) -> bool {
        matches!(self, Stage::Loaded | Stage::Retained)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Stage::Loading)
    }

    pub fn is_retained(&self) -> bool {
        matches!(self, Stage::Retained)
    }

    /// Returns `true` if a new load request has to start a backend load.
    pub fn needs_load(&self) -> bool {
        matches!(self, Stage::Created | Stage::Unloaded)
    }
}

/// Outcome of a reference-count change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTransition {
    /// Count changed, stage did not.
    Unchanged,
    /// `Retained -> Loaded`: the entry is referenced again and must re-acquire
    /// the references it holds on its parents.
    Promoted,
    /// `Loaded -> Retained`: the last reference is gone; references held on
    /// parents must be released and the retain timer is running.
    Retained,
    /// A decrement was requested on a count that was already zero.
    Underflow,
}
