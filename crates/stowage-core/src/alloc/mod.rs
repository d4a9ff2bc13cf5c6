//! Collection types used across stowage.
//!
//! This module provides:
//! - Re-exports of hash collections using AHash
//! - `SparseSet`, a generational arena handing out `IndexSlot`s

pub mod sparse_set;

pub use ahash::{AHashMap as HashMap, AHashSet as HashSet, RandomState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashmap_ahash() {
        let mut map = HashMap::new();
        map.insert("bundle", 3u32);
        assert_eq!(map.get("bundle"), Some(&3));
    }

    #[test]
    fn test_hashset_ahash() {
        let mut set = HashSet::new();
        set.insert("ui/common");
        assert!(set.contains("ui/common"));
    }
}
