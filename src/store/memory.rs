//! In-memory posting store backed by a `BTreeMap`.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::store::{PostingStore, ScanDirection, StoreCursor, StoreFactory};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory store. The reference backend for tests and for
/// embedding without a durable store.
#[derive(Debug, Clone)]
pub struct MemoryPostingStore {
    name: String,
    map: Arc<RwLock<Map>>,
}

impl MemoryPostingStore {
    /// Create an empty store named `name`.
    pub fn new<S: Into<String>>(name: S) -> Self {
        MemoryPostingStore {
            name: name.into(),
            map: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl PostingStore for MemoryPostingStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.map.write().remove(key).is_some())
    }

    fn first_key(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().keys().next().cloned())
    }

    fn last_key(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().keys().next_back().cloned())
    }

    fn cursor(
        &self,
        start: Option<&[u8]>,
        direction: ScanDirection,
    ) -> Result<Box<dyn StoreCursor>> {
        Ok(Box::new(MemoryCursor {
            map: Arc::clone(&self.map),
            next_from: start.map(|k| Bound::Included(k.to_vec())),
            direction,
        }))
    }

    fn len(&self) -> Result<u64> {
        Ok(self.map.read().len() as u64)
    }
}

/// Cursor that re-seeks from the last returned key on every step, so it
/// never holds the map lock between steps.
struct MemoryCursor {
    map: Arc<RwLock<Map>>,
    next_from: Option<Bound<Vec<u8>>>,
    direction: ScanDirection,
}

impl StoreCursor for MemoryCursor {
    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        let bound = self.next_from.clone().unwrap_or(Bound::Unbounded);
        let found = match self.direction {
            ScanDirection::Forward => map
                .range::<Vec<u8>, _>((bound, Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone())),
            ScanDirection::Backward => map
                .range::<Vec<u8>, _>((Bound::Unbounded, bound))
                .next_back()
                .map(|(k, v)| (k.clone(), v.clone())),
        };
        drop(map);

        if let Some((key, _)) = &found {
            self.next_from = Some(Bound::Excluded(key.clone()));
        }
        Ok(found)
    }
}

/// Factory producing [`MemoryPostingStore`] instances.
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreFactory;

impl StoreFactory for MemoryStoreFactory {
    fn create(&self, name: &str) -> Result<Arc<dyn PostingStore>> {
        Ok(Arc::new(MemoryPostingStore::new(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryPostingStore::new("t");
        store.put(b"fox", b"1").unwrap();
        store.put(b"dog", b"2").unwrap();

        assert_eq!(store.get(b"fox").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"cat").unwrap(), None);
        assert_eq!(store.len().unwrap(), 2);

        assert!(store.delete(b"fox").unwrap());
        assert!(!store.delete(b"fox").unwrap());
        assert_eq!(store.get(b"fox").unwrap(), None);
    }

    #[test]
    fn test_edges() {
        let store = MemoryPostingStore::new("t");
        assert_eq!(store.first_key().unwrap(), None);

        store.put(b"b", b"").unwrap();
        store.put(b"a", b"").unwrap();
        store.put(b"c", b"").unwrap();

        assert_eq!(store.first_key().unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.last_key().unwrap(), Some(b"c".to_vec()));
    }

    #[test]
    fn test_forward_cursor() {
        let store = MemoryPostingStore::new("t");
        for key in ["car", "cart", "cat", "dog"] {
            store.put(key.as_bytes(), b"").unwrap();
        }

        let mut cursor = store.cursor(Some(b"cas"), ScanDirection::Forward).unwrap();
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next_entry().unwrap() {
            keys.push(key);
        }
        assert_eq!(keys, vec![b"cat".to_vec(), b"dog".to_vec()]);
    }

    #[test]
    fn test_backward_cursor() {
        let store = MemoryPostingStore::new("t");
        for key in ["car", "cart", "cat", "dog"] {
            store.put(key.as_bytes(), b"").unwrap();
        }

        let mut cursor = store.cursor(Some(b"cat"), ScanDirection::Backward).unwrap();
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next_entry().unwrap() {
            keys.push(key);
        }
        assert_eq!(keys, vec![b"cat".to_vec(), b"cart".to_vec(), b"car".to_vec()]);
    }

    #[test]
    fn test_cursor_survives_mutation() {
        let store = MemoryPostingStore::new("t");
        store.put(b"a", b"").unwrap();
        store.put(b"c", b"").unwrap();

        let mut cursor = store.cursor(None, ScanDirection::Forward).unwrap();
        assert_eq!(cursor.next_entry().unwrap().unwrap().0, b"a".to_vec());

        store.put(b"b", b"").unwrap();
        assert_eq!(cursor.next_entry().unwrap().unwrap().0, b"b".to_vec());
        assert_eq!(cursor.next_entry().unwrap().unwrap().0, b"c".to_vec());
        assert!(cursor.next_entry().unwrap().is_none());
    }
}
