//! Waiter lists for coalesced loads.
//!
//! A load that is already in flight does not start a second backend request;
//! the new caller is appended to the list and every waiter is resolved, in
//! registration order, when the single request completes.

use std::any::{Any, TypeId};
use std::sync::Arc;

use stowage_core::alloc::sparse_set::IndexSlot;

use crate::backend::LoadedAsset;
use crate::path::AssetPath;

/// A callback ready to run once the cache is back in a stable state.
pub(crate) type Deferred = Box<dyn FnOnce()>;

/// Who is waiting for a bundle load.
pub(crate) enum BundleWaiter {
    /// A bundle that lists this one as a dependency and is itself loading.
    Dependent(IndexSlot),
    /// An asset inside this bundle waiting for the bundle bytes.
    Asset(AssetPath),
    /// A caller of `load_bundle`. Takes a bundle reference on success.
    External(Box<dyn FnOnce(bool)>),
    /// A `Loaded` bundle whose dependency had been torn down and is being
    /// fetched again. Takes the missing dependency edge on success.
    Edge(IndexSlot),
}

/// A caller of `load_asset`, typed at registration and erased for storage.
pub(crate) struct AssetWaiter {
    type_id: TypeId,
    type_name: &'static str,
    deliver: Box<dyn FnOnce(Option<&LoadedAsset>)>,
}

impl AssetWaiter {
    pub(crate) fn typed<T, F>(callback: F) -> Self
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<Arc<T>>) + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            deliver: Box::new(move |asset| callback(asset.and_then(LoadedAsset::downcast::<T>))),
        }
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether delivering `asset` to this waiter yields a value.
    pub(crate) fn accepts(&self, asset: &LoadedAsset) -> bool {
        asset.value_type_id() == self.type_id
    }

    pub(crate) fn resolve(self, asset: Option<LoadedAsset>) -> Deferred {
        let deliver = self.deliver;
        Box::new(move || deliver(asset.as_ref()))
    }
}

/// FIFO of pending waiters.
pub(crate) struct WaiterList<W> {
    waiters: Vec<W>,
}

impl<W> Default for WaiterList<W> {
    fn default() -> Self {
        Self {
            waiters: Vec::new(),
        }
    }
}

impl<W> WaiterList<W> {
    pub(crate) fn push(&mut self, waiter: W) {
        self.waiters.push(waiter);
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Take every waiter, oldest first.
    pub(crate) fn take(&mut self) -> Vec<W> {
        std::mem::take(&mut self.waiters)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &W> {
        self.waiters.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_take_preserves_registration_order() {
        let mut list = WaiterList::default();
        list.push(1);
        list.push(2);
        list.push(3);
        assert_eq!(list.take(), vec![1, 2, 3]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_typed_waiter_delivers_value() {
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        let waiter = AssetWaiter::typed::<String, _>(move |value| {
            *sink.borrow_mut() = value.map(|v| v.as_str().to_owned());
        });

        let asset = LoadedAsset::new(String::from("panel"));
        assert!(waiter.accepts(&asset));
        waiter.resolve(Some(asset))();
        assert_eq!(seen.borrow().as_deref(), Some("panel"));
    }

    #[test]
    fn test_typed_waiter_rejects_other_types() {
        let seen = Rc::new(RefCell::new(Some(0u32)));
        let sink = Rc::clone(&seen);
        let waiter = AssetWaiter::typed::<u32, _>(move |value| {
            *sink.borrow_mut() = value.map(|v| *v);
        });

        let asset = LoadedAsset::new(String::from("not a number"));
        assert!(!waiter.accepts(&asset));
        waiter.resolve(Some(asset))();
        assert_eq!(*seen.borrow(), None);
    }
}
