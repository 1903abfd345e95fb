//! Engine collection
//!
//! One ordered namespace of items inside an engine store.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{KvFileError, Result};

use super::treap::{self, Link};
use super::writer::Log;
use super::{Item, KeyCompare, Record};

/// Current tree of a collection
#[derive(Clone)]
pub(crate) struct Tree {
    root: Link,
    compare: KeyCompare,
    len: usize,
}

impl Tree {
    pub(crate) fn empty(compare: KeyCompare) -> Self {
        Self {
            root: None,
            compare,
            len: 0,
        }
    }

    fn upsert(&mut self, item: Item) -> bool {
        let (root, replaced) = treap::upsert(&self.root, Arc::new(item), &self.compare);
        self.root = Some(root);
        if !replaced {
            self.len += 1;
        }
        replaced
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        match treap::remove(&self.root, key, &self.compare) {
            Some(root) => {
                self.root = root;
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn visit(
        &self,
        start: Option<&[u8]>,
        visitor: &mut dyn FnMut(&Item) -> bool,
    ) -> bool {
        treap::visit_ascend(&self.root, start, &self.compare, visitor)
    }
}

/// An ordered collection of items
///
/// ## Concurrency
/// - Reads clone the current root under a short read lock and walk the
///   snapshot without holding any lock.
/// - Mutations are individually atomic, but callers that need a mutation
///   ordered with a follow-up action must serialize themselves.
pub struct EngineCollection {
    /// `None` for private collections, which are never persisted
    name: Option<String>,

    tree: RwLock<Tree>,

    /// Mutations not yet appended to the store file
    pending: Mutex<Vec<Record>>,

    log: Arc<Log>,

    removed: AtomicBool,
}

impl EngineCollection {
    pub(crate) fn new(name: Option<String>, tree: Tree, log: Arc<Log>) -> Self {
        Self {
            name,
            tree: RwLock::new(tree),
            pending: Mutex::new(Vec::new()),
            log,
            removed: AtomicBool::new(false),
        }
    }

    /// Collection name, `None` for private collections
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get_item(key)?.map(|item| item.val))
    }

    /// Get the full item (including priority) stored under `key`
    pub fn get_item(&self, key: &[u8]) -> Result<Option<Item>> {
        let tree = self.snapshot()?;
        Ok(treap::get(&tree.root, key, &tree.compare).map(|item| (*item).clone()))
    }

    /// Insert or replace an item
    pub fn set_item(&self, item: Item) -> Result<()> {
        let _admitted = self.log.admit()?;
        self.ensure_present()?;

        let mut tree = self.tree.write();
        let record = self.name.as_ref().map(|name| Record::SetItem {
            collection: name.clone(),
            key: item.key.clone(),
            val: item.val.clone(),
            priority: item.priority,
        });
        tree.upsert(item);
        if let Some(record) = record {
            self.pending.lock().push(record);
        }
        Ok(())
    }

    /// Remove the item under `key`, reporting whether it existed
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let _admitted = self.log.admit()?;
        self.ensure_present()?;

        let mut tree = self.tree.write();
        let existed = tree.remove(key);
        if existed {
            if let Some(name) = &self.name {
                self.pending.lock().push(Record::Delete {
                    collection: name.clone(),
                    key: key.to_vec(),
                });
            }
        }
        Ok(existed)
    }

    /// Append this collection's pending mutations to the store file
    ///
    /// Pushes them to the OS but does not `fsync`.
    pub fn write(&self) -> Result<()> {
        self.ensure_usable()?;
        self.append_pending()
    }

    /// Append pending mutations without checking whether the engine is
    /// still open; used by the final drain on close
    pub(crate) fn append_pending(&self) -> Result<()> {
        if self.name.is_none() || self.removed.load(Ordering::Acquire) {
            return Ok(());
        }

        self.log.append_with(
            || mem::take(&mut *self.pending.lock()),
            |failed| {
                let mut pending = self.pending.lock();
                let newer = mem::replace(&mut *pending, failed);
                pending.extend(newer);
            },
        )
    }

    /// Number of items
    pub fn len(&self) -> Result<usize> {
        Ok(self.snapshot()?.len)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Item with the smallest key
    pub fn min_item(&self) -> Result<Option<Item>> {
        let tree = self.snapshot()?;
        Ok(treap::min(&tree.root).map(|item| (*item).clone()))
    }

    /// Item with the largest key
    pub fn max_item(&self) -> Result<Option<Item>> {
        let tree = self.snapshot()?;
        Ok(treap::max(&tree.root).map(|item| (*item).clone()))
    }

    /// Visit items with keys >= `start` in ascending order until `visitor`
    /// returns `false`.
    pub fn visit_items_ascend<F>(&self, start: &[u8], mut visitor: F) -> Result<()>
    where
        F: FnMut(&Item) -> bool,
    {
        let tree = self.snapshot()?;
        tree.visit(Some(start), &mut visitor);
        Ok(())
    }

    // =========================================================================
    // Crate-internal helpers
    // =========================================================================

    /// Consistent view of the tree; cheap because nodes are shared
    pub(crate) fn snapshot(&self) -> Result<Tree> {
        self.ensure_usable()?;
        Ok(self.tree.read().clone())
    }

    /// Re-sort every item under a new comparator
    pub(crate) fn set_compare(&self, compare: KeyCompare) {
        let mut tree = self.tree.write();
        let mut rebuilt = Tree::empty(compare);
        tree.visit(None, &mut |item| {
            rebuilt.upsert(item.clone());
            true
        });
        *tree = rebuilt;
    }

    /// Apply a replayed record without queueing it for persistence
    pub(crate) fn replay_set(&self, item: Item) {
        self.tree.write().upsert(item);
    }

    pub(crate) fn replay_delete(&self, key: &[u8]) {
        self.tree.write().remove(key);
    }

    /// Detach from the store; pending mutations are discarded
    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
        self.pending.lock().clear();
    }

    fn ensure_usable(&self) -> Result<()> {
        self.log.ensure_open()?;
        self.ensure_present()
    }

    fn ensure_present(&self) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(KvFileError::CollectionRemoved(
                self.name.clone().unwrap_or_default(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for EngineCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCollection")
            .field("name", &self.name)
            .field("len", &self.tree.read().len)
            .finish()
    }
}
