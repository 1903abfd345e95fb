//! Store Registry
//!
//! Maps store paths to open stores so that each path has exactly one live
//! `Store`, however many callers open it.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{KvFileError, Result};

use super::compaction;
use super::handle::Store;

/// Per-path slot. Its mutex serializes opening that path; other paths are
/// not affected.
type Slot = Arc<Mutex<Option<Arc<Store>>>>;

/// Registry of open stores
///
/// ## Concurrency
/// - The path → slot map is behind an `RwLock`: lookups share it, inserting
///   a new slot takes it exclusively.
/// - Opening a path holds only that path's slot lock, so a concurrent
///   `open` of the same path blocks and then receives the same `Store`.
/// - A slot is removed from the map only when it is empty and no caller
///   holds a handle to it, so two callers can never end up holding
///   different slots for one path.
///
/// Paths are keyed by their canonical parent directory plus file name, so
/// `a.db`, `./a.db` and `dir/../a.db` name the same store. Symlinks to the
/// file itself are not resolved.
///
/// Cloning the registry yields another handle to the same set of stores.
#[derive(Clone)]
pub struct StoreRegistry {
    shared: Arc<RegistryShared>,
}

pub(crate) struct RegistryShared {
    config: Config,
    state: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<PathBuf, Slot>,
    default: Option<PathBuf>,
}

impl StoreRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                config,
                state: RwLock::new(RegistryState::default()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Open the store at `path`, or return it if it is already open
    ///
    /// For a path that is not open yet:
    /// 1. Recover from an interrupted compaction swap
    /// 2. Compact the file if it exists, or create it
    /// 3. Attach the engine and start the flush thread
    /// 4. Register the store (as default if there is none yet)
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Arc<Store>> {
        let key = store_key(path.as_ref())?;
        let path = key.as_path();
        let slot = self.slot(path);
        let mut guard = slot.lock();

        if let Some(store) = guard.as_ref() {
            if !store.is_closed() {
                return Ok(Arc::clone(store));
            }
        }

        let store = Arc::new(self.open_fresh(path)?);
        *guard = Some(Arc::clone(&store));

        let mut state = self.shared.state.write();
        if state.default.is_none() {
            tracing::debug!(path = %path.display(), "Default store set");
            state.default = Some(path.to_path_buf());
        }

        Ok(store)
    }

    /// Open the default store: the first path ever opened through this
    /// registry
    ///
    /// Fails with `NoDefaultStore` when no store is currently open.
    pub fn open_default(&self) -> Result<Arc<Store>> {
        let default = self.shared.state.read().default.clone();
        match default {
            Some(path) if !self.open_stores().is_empty() => self.open(path),
            _ => Err(KvFileError::NoDefaultStore),
        }
    }

    /// Canonical path of the default store, if one was ever opened
    pub fn default_path(&self) -> Option<PathBuf> {
        self.shared.state.read().default.clone()
    }

    /// Whether `path` currently has a live store
    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        let key = match store_key(path.as_ref()) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let slot = self.shared.state.read().slots.get(&key).cloned();
        slot.map_or(false, |slot| slot.lock().as_ref().map_or(false, |s| !s.is_closed()))
    }

    /// Every live store
    pub fn open_stores(&self) -> Vec<Arc<Store>> {
        let slots: Vec<Slot> = self.shared.state.read().slots.values().cloned().collect();
        slots
            .iter()
            .filter_map(|slot| slot.lock().clone())
            .filter(|store| !store.is_closed())
            .collect()
    }

    /// Close every live store
    ///
    /// Keeps going after a failure and returns the first error.
    pub fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for store in self.open_stores() {
            if let Err(e) = store.close() {
                tracing::error!(path = %store.path().display(), error = %e, "Closing store failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn slot(&self, path: &Path) -> Slot {
        if let Some(slot) = self.shared.state.read().slots.get(path) {
            return Arc::clone(slot);
        }
        let mut state = self.shared.state.write();
        Arc::clone(state.slots.entry(path.to_path_buf()).or_default())
    }

    fn open_fresh(&self, path: &Path) -> Result<Store> {
        let config = &self.shared.config;

        compaction::recover_interrupted_swap(path)?;

        let file = match fs::metadata(path) {
            Ok(_) => {
                if config.compact_on_open {
                    compaction::compact_store_file(path, config)?;
                } else {
                    compaction::remove_stale_tmp(path)?;
                }
                OpenOptions::new().read(true).append(true).open(path)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Creating store file");
                OpenOptions::new()
                    .read(true)
                    .append(true)
                    .create(true)
                    .open(path)?
            }
            Err(e) => return Err(e.into()),
        };

        let store = Store::attach(path, file, config, Arc::downgrade(&self.shared))?;
        tracing::info!(path = %path.display(), "Store opened");
        Ok(store)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl RegistryShared {
    /// Empty the slot of `path` if it still holds `store`, then drop the
    /// slot if nobody else is using it
    ///
    /// A later `open(path)` then creates a fresh store.
    pub(crate) fn remove(&self, path: &Path, store: &Store) {
        let slot = self.state.read().slots.get(path).cloned();
        let slot = match slot {
            Some(slot) => slot,
            None => return,
        };

        {
            let mut guard = slot.lock();
            if guard
                .as_ref()
                .map_or(false, |current| std::ptr::eq(Arc::as_ptr(current), store))
            {
                *guard = None;
            }
        }
        drop(slot);

        // Slot handles are only cloned under the state lock, so with the write
        // lock held a count of one means no caller can reach this slot.
        let mut state = self.state.write();
        let unused = state.slots.get(path).map_or(false, |slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().map_or(false, |guard| guard.is_none())
        });
        if unused {
            state.slots.remove(path);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.state.read().slots.len()
    }
}

/// Registry key of `path`: canonical parent directory joined with the file
/// name
fn store_key(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("store path {} has no file name", path.display()),
        )
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(fs::canonicalize(parent)?.join(file_name))
}
