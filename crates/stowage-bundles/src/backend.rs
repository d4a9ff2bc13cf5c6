//! Loader backend contract.
//!
//! The cache never touches bytes itself. It hands a [`BundleRequest`] or an
//! [`AssetRequest`] to a [`LoaderBackend`] together with a single-use
//! completion token. The backend may resolve the token on any thread; the
//! result is queued and applied by [`CacheProvider::pump`] on the thread that
//! owns the provider.
//!
//! [`CacheProvider::pump`]: crate::CacheProvider::pump

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use stowage_core::alloc::sparse_set::IndexSlot;

use crate::manifest::BundleDescriptor;
use crate::path::{AssetPath, BundlePath};

/// Identifies one backend request. Completions carrying a ticket the cache no
/// longer waits for are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn get(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub(crate) struct TicketSource {
    next: u64,
}

impl TicketSource {
    pub(crate) fn next(&mut self) -> Ticket {
        self.next += 1;
        Ticket(self.next)
    }
}

/// Backend-defined resident bundle content.
#[derive(Clone)]
pub struct BundleHandle(Arc<dyn Any + Send + Sync>);

impl BundleHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &BundleHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for BundleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleHandle").finish_non_exhaustive()
    }
}

/// A loaded asset, type-erased until it is delivered to a caller.
#[derive(Clone)]
pub struct LoadedAsset {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    size: u64,
}

impl LoadedAsset {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: std::any::type_name::<T>(),
            size: 0,
        }
    }

    /// Resident size reported in cache snapshots.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// `TypeId` of the stored value (not of the wrapper).
    pub fn value_type_id(&self) -> TypeId {
        Any::type_id(&*self.value)
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for LoadedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedAsset")
            .field("type", &self.type_name)
            .field("size", &self.size)
            .finish()
    }
}

/// Request to make a bundle's bytes resident.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub descriptor: Arc<BundleDescriptor>,
    /// Larger is more urgent. Dependencies are requested one step above
    /// the bundle that needs them.
    pub priority: i32,
    pub ticket: Ticket,
}

impl BundleRequest {
    pub fn path(&self) -> &BundlePath {
        &self.descriptor.path
    }
}

/// Request to load one asset out of an already resident bundle.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub bundle_path: BundlePath,
    pub bundle: BundleHandle,
    pub asset: AssetPath,
    /// Type asked for by the first caller of a coalesced request.
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub ticket: Ticket,
}

pub(crate) enum Completion {
    Bundle {
        slot: IndexSlot,
        path: BundlePath,
        ticket: Ticket,
        result: Option<BundleHandle>,
    },
    Asset {
        slot: IndexSlot,
        asset: AssetPath,
        ticket: Ticket,
        result: Option<LoadedAsset>,
    },
}

/// Single-use answer to a [`BundleRequest`].
///
/// Dropping the token without answering reports a failure.
pub struct BundleCompletion {
    slot: IndexSlot,
    ticket: Ticket,
    path: BundlePath,
    sender: Option<Sender<Completion>>,
}

impl BundleCompletion {
    pub(crate) fn new(
        slot: IndexSlot,
        ticket: Ticket,
        path: BundlePath,
        sender: Sender<Completion>,
    ) -> Self {
        Self {
            slot,
            ticket,
            path,
            sender: Some(sender),
        }
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn path(&self) -> &BundlePath {
        &self.path
    }

    /// `None` reports a failed load.
    pub fn complete(mut self, result: Option<BundleHandle>) {
        self.send(result);
    }

    pub fn succeed(self, handle: BundleHandle) {
        self.complete(Some(handle));
    }

    pub fn fail(self) {
        self.complete(None);
    }

    fn send(&mut self, result: Option<BundleHandle>) {
        if let Some(sender) = self.sender.take() {
            // The provider may already be gone; nothing is waiting then.
            let _ = sender.send(Completion::Bundle {
                slot: self.slot,
                path: self.path.clone(),
                ticket: self.ticket,
                result,
            });
        }
    }
}

impl Drop for BundleCompletion {
    fn drop(&mut self) {
        if self.sender.is_some() {
            tracing::warn!("Bundle load '{}' dropped without an answer", self.path);
            self.send(None);
        }
    }
}

impl fmt::Debug for BundleCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleCompletion")
            .field("path", &self.path)
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// Single-use answer to an [`AssetRequest`].
///
/// Dropping the token without answering reports a failure.
pub struct AssetCompletion {
    slot: IndexSlot,
    ticket: Ticket,
    asset: AssetPath,
    sender: Option<Sender<Completion>>,
}

impl AssetCompletion {
    pub(crate) fn new(
        slot: IndexSlot,
        ticket: Ticket,
        asset: AssetPath,
        sender: Sender<Completion>,
    ) -> Self {
        Self {
            slot,
            ticket,
            asset,
            sender: Some(sender),
        }
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn path(&self) -> &AssetPath {
        &self.asset
    }

    /// `None` reports a failed load.
    pub fn complete(mut self, result: Option<LoadedAsset>) {
        self.send(result);
    }

    pub fn succeed(self, asset: LoadedAsset) {
        self.complete(Some(asset));
    }

    pub fn fail(self) {
        self.complete(None);
    }

    fn send(&mut self, result: Option<LoadedAsset>) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Completion::Asset {
                slot: self.slot,
                asset: self.asset.clone(),
                ticket: self.ticket,
                result,
            });
        }
    }
}

impl Drop for AssetCompletion {
    fn drop(&mut self) {
        if self.sender.is_some() {
            tracing::warn!("Asset load '{}' dropped without an answer", self.asset);
            self.send(None);
        }
    }
}

impl fmt::Debug for AssetCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetCompletion")
            .field("asset", &self.asset)
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// Performs the actual byte-level loads.
///
/// Every call to `load_bundle`/`load_asset` must eventually resolve its
/// completion token exactly once; the token type enforces this (it is
/// consumed on use and reports failure when dropped).
pub trait LoaderBackend {
    fn load_bundle(&mut self, request: BundleRequest, completion: BundleCompletion);

    fn load_asset(&mut self, request: AssetRequest, completion: AssetCompletion);

    /// Called when a bundle's content is evicted or torn down.
    fn release_bundle(&mut self, _path: &BundlePath, _handle: BundleHandle) {}

    /// Called when an asset is evicted or torn down.
    fn release_asset(&mut self, _path: &AssetPath, _asset: LoadedAsset) {}
}

/// Channel the completion tokens report into.
pub(crate) struct CompletionQueue {
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
}

impl CompletionQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = crossbeam::channel::unbounded();
        Self { sender, receiver }
    }

    pub(crate) fn sender(&self) -> Sender<Completion> {
        self.sender.clone()
    }

    pub(crate) fn try_recv(&self) -> Option<Completion> {
        self.receiver.try_recv().ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loaded_asset_downcast() {
        let asset = LoadedAsset::new(String::from("hello")).with_size(5);
        assert!(asset.is::<String>());
        assert!(!asset.is::<u32>());
        assert_eq!(asset.downcast::<String>().as_deref().map(String::as_str), Some("hello"));
        assert!(asset.downcast::<u32>().is_none());
        assert_eq!(asset.size(), 5);
    }

    #[test]
    fn test_dropped_completion_reports_failure() {
        let queue = CompletionQueue::new();
        let completion = BundleCompletion::new(
            IndexSlot::new(0, 0),
            Ticket(1),
            BundlePath::new("b"),
            queue.sender(),
        );
        drop(completion);

        match queue.try_recv() {
            Some(Completion::Bundle { ticket, result, .. }) => {
                assert_eq!(ticket, Ticket(1));
                assert!(result.is_none());
            }
            _ => panic!("expected a bundle completion"),
        }
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn test_completion_is_sent_once() {
        let queue = CompletionQueue::new();
        let completion = AssetCompletion::new(
            IndexSlot::new(0, 3),
            Ticket(7),
            AssetPath::new("x"),
            queue.sender(),
        );
        completion.succeed(LoadedAsset::new(1u32));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_ticket_source_is_monotonic() {
        let mut tickets = TicketSource::default();
        let a = tickets.next();
        let b = tickets.next();
        assert!(b > a);
    }
}
