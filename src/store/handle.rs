//! Store
//!
//! One open store file: the engine attached to it, the file handle used for
//! `fsync`, and the flush thread that keeps both durable.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::collection::Collection;
use crate::config::Config;
use crate::engine::{EngineCollection, EngineStore, KeyCompare};
use crate::error::{KvFileError, Result};

use super::flusher::{Durable, FlushCoordinator};
use super::registry::RegistryShared;

/// What the flush thread needs to make a store durable
pub(crate) struct StoreCore {
    path: PathBuf,
    engine: EngineStore,
    /// `None` once the store is closed
    file: Mutex<Option<File>>,
}

impl Durable for StoreCore {
    fn sync(&self) -> Result<()> {
        self.engine.flush()?;
        match self.file.lock().as_ref() {
            Some(file) => {
                file.sync_all()?;
                Ok(())
            }
            None => Err(KvFileError::StoreClosed(self.path.clone())),
        }
    }
}

/// An open store
///
/// Obtained from [`StoreRegistry::open`](super::StoreRegistry::open); at
/// most one live `Store` exists per path within a registry.
pub struct Store {
    core: Arc<StoreCore>,
    flusher: FlushCoordinator,

    /// Write locks of named collections, shared by every handle to the same
    /// collection
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    registry: Weak<RegistryShared>,
    closed: AtomicBool,

    /// Serializes `close`
    close_lock: Mutex<()>,
}

impl Store {
    /// Attach to an already prepared, open store file and start flushing
    pub(crate) fn attach(
        path: &Path,
        file: File,
        config: &Config,
        registry: Weak<RegistryShared>,
    ) -> Result<Self> {
        let engine = EngineStore::open(file.try_clone()?)?;
        let core = Arc::new(StoreCore {
            path: path.to_path_buf(),
            engine,
            file: Mutex::new(Some(file)),
        });

        let label = path.display().to_string();
        let flusher =
            FlushCoordinator::start(&label, Arc::clone(&core), config.flush_queue_capacity)?;

        Ok(Self {
            core,
            flusher,
            write_locks: Mutex::new(HashMap::new()),
            registry,
            closed: AtomicBool::new(false),
            close_lock: Mutex::new(()),
        })
    }

    /// Canonical path of the store file
    pub fn path(&self) -> &Path {
        &self.core.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Collections
    // =========================================================================

    /// Create the named collection, or return the existing one
    ///
    /// A comparator given for an existing collection replaces its ordering.
    pub fn set_collection(&self, name: &str, compare: Option<KeyCompare>) -> Result<Collection> {
        self.ensure_open()?;
        let inner = self.core.engine.set_collection(name, compare)?;
        Ok(self.wrap(name, inner))
    }

    /// Return the named collection, `None` if it does not exist
    pub fn get_collection(&self, name: &str) -> Result<Option<Collection>> {
        self.ensure_open()?;
        Ok(self
            .core
            .engine
            .get_collection(name)?
            .map(|inner| self.wrap(name, inner)))
    }

    /// Return the named collection, creating it empty if needed
    ///
    /// The flag is `true` when the collection was created by this call.
    pub fn get_collection_create_empty(&self, name: &str) -> Result<(bool, Collection)> {
        match self.get_collection(name)? {
            Some(collection) => Ok((false, collection)),
            None => Ok((true, self.set_collection(name, None)?)),
        }
    }

    /// Create an unnamed collection that lives only in memory
    pub fn make_private_collection(&self, compare: Option<KeyCompare>) -> Result<Collection> {
        self.ensure_open()?;
        let inner = self.core.engine.make_private_collection(compare)?;
        Ok(Collection::new(
            inner,
            self.flusher.notifier(),
            Arc::new(Mutex::new(())),
        ))
    }

    /// Drop a named collection with all of its items
    pub fn remove_collection(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        let removed = self.core.engine.remove_collection(name)?;
        if removed {
            self.write_locks.lock().remove(name);
            self.flusher.notifier().notify();
        }
        Ok(removed)
    }

    /// Names of all named collections
    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.core.engine.collection_names()
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Flush synchronously: engine buffers to the file, then `fsync`
    ///
    /// Reports (once) a failure that stopped the background flush thread.
    pub fn flush(&self) -> Result<()> {
        if let Some(e) = self.flusher.take_failure() {
            return Err(KvFileError::BackgroundFlush(Box::new(e)));
        }
        self.ensure_open()?;
        self.core.sync()
    }

    /// Physical flushes performed by the background thread so far
    pub fn background_flushes(&self) -> u64 {
        self.flusher.flush_count()
    }

    /// Whether background flushing stopped on an error that the next
    /// `flush` or `close` will report
    pub fn background_flush_failed(&self) -> bool {
        self.flusher.has_failure()
    }

    /// Final flush, stop the flush thread, release the file and leave the
    /// registry
    ///
    /// If the final flush fails the store stays open and the error is
    /// returned; `close` can be retried. Closing a closed store is a no-op.
    ///
    /// Mutations racing with `close` either fail with `EngineClosed` or are
    /// written and synced before the file is released.
    pub fn close(&self) -> Result<()> {
        let _close_guard = self.close_lock.lock();
        if self.is_closed() {
            return Ok(());
        }

        self.flush()?;

        self.flusher.shutdown();
        let mut engine_result = self.core.engine.close();
        if let Some(file) = self.core.file.lock().take() {
            engine_result = engine_result.and(file.sync_all().map_err(KvFileError::from));
        }
        self.closed.store(true, Ordering::Release);

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.path(), self);
        }

        tracing::info!(path = %self.path().display(), "Store closed");
        engine_result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(KvFileError::StoreClosed(self.core.path.clone()));
        }
        Ok(())
    }

    fn wrap(&self, name: &str, inner: Arc<EngineCollection>) -> Collection {
        let write_lock = Arc::clone(
            self.write_locks
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        Collection::new(inner, self.flusher.notifier(), write_lock)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.core.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
