//! Collection Module
//!
//! The façade applications use to read and write one collection of a store.
//!
//! ## Responsibilities
//! - Byte-level get/set/delete over an engine collection
//! - Typed object access through a pluggable codec
//! - Serialize mutations per collection and signal the store's flusher
//!   after each one

mod codec;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::{random_priority, EngineCollection, Item};
use crate::error::{KvFileError, Result};
use crate::store::FlushNotifier;

pub use codec::{BincodeCodec, Codec, JsonCodec};

/// A collection of a store
///
/// ## Concurrency Model
///
/// - **Writes** (`set`, `set_item`, `delete`, `write`): serialized by the
///   collection's write lock, which is shared by every handle to the same
///   collection. The lock is held across the engine call and the flush
///   notification, so notifications follow the mutations they announce.
/// - **Reads** (`get`, `get_object`, ...): never take the write lock.
///
/// A mutation is durable once the store's flusher has processed the
/// notification, or after an explicit `Store::flush`.
pub struct Collection<C = JsonCodec> {
    inner: Arc<EngineCollection>,
    notifier: FlushNotifier,
    write_lock: Arc<Mutex<()>>,
    codec: C,
}

impl Collection<JsonCodec> {
    pub(crate) fn new(
        inner: Arc<EngineCollection>,
        notifier: FlushNotifier,
        write_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            inner,
            notifier,
            write_lock,
            codec: JsonCodec,
        }
    }
}

impl<C: Codec> Collection<C> {
    /// Collection name, `None` for private collections
    pub fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    /// Use `codec` for object access from now on
    pub fn with_codec<D: Codec>(self, codec: D) -> Collection<D> {
        Collection {
            inner: self.inner,
            notifier: self.notifier,
            write_lock: self.write_lock,
            codec,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    // =========================================================================
    // Byte-level access
    // =========================================================================

    /// Store `val` under `key` with a random treap priority
    pub fn set(&self, key: &[u8], val: &[u8]) -> Result<()> {
        self.set_item(Item::new(key.to_vec(), val.to_vec(), random_priority()))
    }

    /// Store an item with an explicit priority
    pub fn set_item(&self, item: Item) -> Result<()> {
        self.mutate(|collection| collection.set_item(item))
    }

    /// Delete `key`, returning whether it existed
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.mutate(|collection| collection.delete(key))
    }

    /// Append pending mutations to the store file without changing anything
    pub fn write(&self) -> Result<()> {
        self.mutate(|collection| collection.write())
    }

    /// Value under `key`, `None` if absent
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    /// Item under `key`, `None` if absent
    pub fn get_item(&self, key: &[u8]) -> Result<Option<Item>> {
        self.inner.get_item(key)
    }

    // =========================================================================
    // Object access
    // =========================================================================

    /// Marshal `object` with the collection codec and store it under `key`
    pub fn set_object<T: Serialize + ?Sized>(&self, key: &str, object: &T) -> Result<()> {
        let bytes = self.codec.marshal(object).map_err(KvFileError::Codec)?;
        self.set(key.as_bytes(), &bytes)
    }

    /// Unmarshal the value under `key` into `object`
    ///
    /// An absent key is not an error: `object` is left untouched.
    pub fn get_object<T: DeserializeOwned>(&self, key: &str, object: &mut T) -> Result<()> {
        if let Some(found) = self.object(key)? {
            *object = found;
        }
        Ok(())
    }

    /// Unmarshal the value under `key`, `None` if absent
    pub fn object<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get(key.as_bytes())? {
            Some(bytes) => self
                .codec
                .unmarshal(&bytes)
                .map(Some)
                .map_err(KvFileError::Codec),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Ordered access
    // =========================================================================

    pub fn len(&self) -> Result<usize> {
        self.inner.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty()
    }

    pub fn min_item(&self) -> Result<Option<Item>> {
        self.inner.min_item()
    }

    pub fn max_item(&self) -> Result<Option<Item>> {
        self.inner.max_item()
    }

    /// Visit items with keys >= `start` in ascending order until `visitor`
    /// returns `false`
    pub fn visit_items_ascend<F>(&self, start: &[u8], visitor: F) -> Result<()>
    where
        F: FnMut(&Item) -> bool,
    {
        self.inner.visit_items_ascend(start, visitor)
    }

    /// Run one engine mutation under the write lock, then signal the flusher.
    /// The signal is sent even if the mutation failed.
    fn mutate<T>(&self, op: impl FnOnce(&EngineCollection) -> Result<T>) -> Result<T> {
        let _write_guard = self.write_lock.lock();
        let result = op(&self.inner);
        self.notifier.notify();
        result
    }
}

impl<C: Clone> Clone for Collection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            notifier: self.notifier.clone(),
            write_lock: Arc::clone(&self.write_lock),
            codec: self.codec.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Collection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("inner", &self.inner)
            .finish()
    }
}
