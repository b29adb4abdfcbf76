//! Posting store abstraction.
//!
//! An index persists its postings (and side structures) in an ordered
//! byte-keyed map. The durable implementation is supplied by the embedding
//! application; [`MemoryPostingStore`] is the reference backend used for
//! tests and in-process indexes.

pub mod memory;

pub use memory::{MemoryPostingStore, MemoryStoreFactory};

use std::sync::Arc;

use crate::error::Result;

/// Direction of a [`StoreCursor`] walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Backward,
}

/// An ordered map from byte keys to byte values.
///
/// Keys are compared as raw bytes; callers encode keys so that byte order
/// matches their logical order. All methods take `&self`; implementations
/// handle their own interior locking so a store can be shared behind an
/// `Arc<dyn PostingStore>`.
pub trait PostingStore: Send + Sync + std::fmt::Debug {
    /// Identifying name (used in logs and error messages).
    fn name(&self) -> &str;

    /// Fetch the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any existing value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`. Returns whether a value was present.
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// The smallest key, if any.
    fn first_key(&self) -> Result<Option<Vec<u8>>>;

    /// The largest key, if any.
    fn last_key(&self) -> Result<Option<Vec<u8>>>;

    /// Open a cursor at the first key `>= start` (forward) or the last key
    /// `<= start` (backward); `None` starts at the store edge.
    fn cursor(&self, start: Option<&[u8]>, direction: ScanDirection)
    -> Result<Box<dyn StoreCursor>>;

    /// Number of stored keys.
    fn len(&self) -> Result<u64>;

    /// Whether the store holds no keys.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A stateful walk over a [`PostingStore`] in one direction.
///
/// Cursors re-seek per step rather than pinning the underlying map, so they
/// stay valid across concurrent mutation and across the owning store handle
/// being swapped out.
pub trait StoreCursor: Send {
    /// Advance and return the next `(key, value)` pair, or `None` at the
    /// store edge.
    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}

/// Creates the store identities an index needs: the postings store itself
/// plus side stores, and the fresh stores a batch commit builds into.
pub trait StoreFactory: Send + Sync + std::fmt::Debug {
    /// Open the store named `name`, creating it empty when the backend has
    /// no existing data under that name. Durable backends must hand back
    /// the previously written store, not a truncated one; indexes rely on
    /// this to reattach to committed generations on reopen.
    fn create(&self, name: &str) -> Result<Arc<dyn PostingStore>>;
}
