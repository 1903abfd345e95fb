//! Engine store
//!
//! Attaches to one store file: replays it on open, appends mutations, and
//! can copy its live state into a fresh file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{KvFileError, Result};

use super::collection::Tree;
use super::record::{read_frame, Frame, MAGIC, MAGIC_LEN};
use super::writer::{Log, LogWriter};
use super::{bytes_compare, EngineCollection, Item, KeyCompare, Record};

/// An open engine store
///
/// Cheap to clone; clones share the same file and collections.
#[derive(Clone)]
pub struct EngineStore {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    log: Arc<Log>,
    collections: RwLock<BTreeMap<String, Arc<EngineCollection>>>,
}

impl EngineStore {
    /// Attach to `file`, replaying its records
    ///
    /// The file must be readable and writable; appends go to its end. An
    /// empty file is initialised with the magic header. A torn or corrupt
    /// tail is truncated away.
    pub fn open(file: File) -> Result<Self> {
        let file_len = file.metadata()?.len();
        let log = Arc::new(Log::new(LogWriter::new(BufWriter::new(file.try_clone()?))));
        let mut collections = BTreeMap::new();

        if file_len == 0 {
            let mut out = &file;
            out.write_all(MAGIC)?;
            out.flush()?;
        } else {
            let valid_len = replay(&file, &log, &mut collections)?;
            if valid_len < file_len {
                tracing::warn!(valid_len, file_len, "Truncating torn tail of store file");
                file.set_len(valid_len)?;
            }
            tracing::debug!(
                collections = collections.len(),
                bytes = valid_len,
                "Replayed store file"
            );
        }

        Ok(Self::from_parts(log, collections))
    }

    /// Attach to `file` for reading its live state without changing it
    ///
    /// A torn tail is skipped instead of truncated and an empty file is not
    /// given a header. Used as the source of `copy_to`; the store must not
    /// be mutated.
    pub fn open_snapshot(file: File) -> Result<Self> {
        let file_len = file.metadata()?.len();
        let log = Arc::new(Log::new(LogWriter::new(BufWriter::new(file.try_clone()?))));
        let mut collections = BTreeMap::new();

        if file_len > 0 {
            let valid_len = replay(&file, &log, &mut collections)?;
            if valid_len < file_len {
                tracing::warn!(valid_len, file_len, "Skipping torn tail of store file");
            }
        }

        Ok(Self::from_parts(log, collections))
    }

    fn from_parts(log: Arc<Log>, collections: BTreeMap<String, Arc<EngineCollection>>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                log,
                collections: RwLock::new(collections),
            }),
        }
    }

    /// Create a collection that is never persisted and has no name
    pub fn make_private_collection(
        &self,
        compare: Option<KeyCompare>,
    ) -> Result<Arc<EngineCollection>> {
        self.inner.log.ensure_open()?;
        Ok(Arc::new(EngineCollection::new(
            None,
            Tree::empty(compare.unwrap_or_else(bytes_compare)),
            Arc::clone(&self.inner.log),
        )))
    }

    /// Create the named collection, or return the existing one
    ///
    /// Passing a comparator for an existing collection re-sorts it.
    pub fn set_collection(
        &self,
        name: &str,
        compare: Option<KeyCompare>,
    ) -> Result<Arc<EngineCollection>> {
        let _admitted = self.inner.log.admit()?;

        let mut collections = self.inner.collections.write();
        if let Some(existing) = collections.get(name) {
            if let Some(compare) = compare {
                existing.set_compare(compare);
            }
            return Ok(Arc::clone(existing));
        }

        let collection = Arc::new(EngineCollection::new(
            Some(name.to_string()),
            Tree::empty(compare.unwrap_or_else(bytes_compare)),
            Arc::clone(&self.inner.log),
        ));
        collections.insert(name.to_string(), Arc::clone(&collection));
        self.inner.log.push_meta(Record::CreateCollection {
            name: name.to_string(),
        });

        Ok(collection)
    }

    /// Look up a named collection
    pub fn get_collection(&self, name: &str) -> Result<Option<Arc<EngineCollection>>> {
        self.inner.log.ensure_open()?;
        Ok(self.inner.collections.read().get(name).cloned())
    }

    /// Drop a named collection and all of its items
    pub fn remove_collection(&self, name: &str) -> Result<bool> {
        let _admitted = self.inner.log.admit()?;

        let removed = self.inner.collections.write().remove(name);
        match removed {
            Some(collection) => {
                collection.mark_removed();
                self.inner.log.push_meta(Record::DropCollection {
                    name: name.to_string(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Names of all named collections, in order
    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.inner.log.ensure_open()?;
        Ok(self.inner.collections.read().keys().cloned().collect())
    }

    /// Append every pending mutation and push buffers to the OS
    ///
    /// Does not `fsync`; the owner of the file decides when to sync.
    pub fn flush(&self) -> Result<()> {
        self.inner.log.ensure_open()?;

        // Metadata goes out even when no collection has pending records.
        self.inner.log.append_with(Vec::new, |_| {})?;

        let collections: Vec<_> = self.inner.collections.read().values().cloned().collect();
        for collection in collections {
            collection.write()?;
        }
        Ok(())
    }

    /// Write only the live items of every named collection into `target`
    /// and return a store attached to it
    ///
    /// With `flush_every > 0` buffered output is pushed to the OS every that
    /// many items. Comparators carry over to the returned store.
    pub fn copy_to(&self, target: File, flush_every: usize) -> Result<EngineStore> {
        self.inner.log.ensure_open()?;

        let mut out = BufWriter::new(target);
        out.write_all(MAGIC)?;

        let collections: Vec<_> = self
            .inner
            .collections
            .read()
            .iter()
            .map(|(name, collection)| (name.clone(), Arc::clone(collection)))
            .collect();

        let log = Arc::new(Log::new(LogWriter::new(BufWriter::new(
            out.get_ref().try_clone()?,
        ))));
        let mut copied = BTreeMap::new();
        let mut since_flush = 0usize;

        for (name, collection) in collections {
            let tree = collection.snapshot()?;

            out.write_all(&Record::CreateCollection { name: name.clone() }.encode()?)?;

            let mut failure: Option<KvFileError> = None;
            tree.visit(None, &mut |item| {
                let record = Record::SetItem {
                    collection: name.clone(),
                    key: item.key.clone(),
                    val: item.val.clone(),
                    priority: item.priority,
                };
                let written = record
                    .encode()
                    .and_then(|frame| out.write_all(&frame).map_err(KvFileError::from));
                if let Err(e) = written {
                    failure = Some(e);
                    return false;
                }

                since_flush += 1;
                if flush_every > 0 && since_flush >= flush_every {
                    since_flush = 0;
                    if let Err(e) = out.flush() {
                        failure = Some(e.into());
                        return false;
                    }
                }
                true
            });
            if let Some(e) = failure {
                return Err(e);
            }

            copied.insert(
                name.clone(),
                Arc::new(EngineCollection::new(Some(name), tree, Arc::clone(&log))),
            );
        }

        out.flush()?;
        Ok(Self::from_parts(log, copied))
    }

    /// Detach from the file. Every later call fails with `EngineClosed`.
    ///
    /// Mutations that returned before `close` are appended to the file
    /// first; the caller still decides whether to `fsync`.
    pub fn close(&self) -> Result<()> {
        if self.inner.log.is_released() {
            return Ok(());
        }
        self.inner.log.seal();

        let mut drained = self.inner.log.append_with(Vec::new, |_| {});
        let collections: Vec<_> = self.inner.collections.read().values().cloned().collect();
        for collection in collections {
            let appended = collection.append_pending();
            drained = drained.and(appended);
        }

        let released = self.inner.log.release();
        drained.and(released)
    }

    /// Records appended since this store was attached
    pub fn records_written(&self) -> u64 {
        self.inner.log.records_written()
    }
}

/// Rebuild collections from the file; returns the length of the valid prefix
fn replay(
    file: &File,
    log: &Arc<Log>,
    collections: &mut BTreeMap<String, Arc<EngineCollection>>,
) -> Result<u64> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; MAGIC_LEN];
    if reader.read_exact(&mut magic).is_err() || &magic != MAGIC {
        return Err(KvFileError::Corruption(
            "missing or unknown store file header".to_string(),
        ));
    }

    let mut valid_len = MAGIC_LEN as u64;
    let mut records = 0u64;

    loop {
        let record = match read_frame(&mut reader)? {
            Frame::Record(record, size) => {
                valid_len += size;
                record
            }
            Frame::End => break,
            Frame::Torn(reason) => {
                tracing::warn!(offset = valid_len, reason = %reason, "Torn record in store file");
                break;
            }
        };
        records += 1;

        match record {
            Record::CreateCollection { name } => {
                collection_for(collections, log, &name);
            }
            Record::SetItem {
                collection,
                key,
                val,
                priority,
            } => {
                collection_for(collections, log, &collection)
                    .replay_set(Item::new(key, val, priority));
            }
            Record::Delete { collection, key } => {
                if let Some(target) = collections.get(&collection) {
                    target.replay_delete(&key);
                }
            }
            Record::DropCollection { name } => {
                collections.remove(&name);
            }
        }
    }

    tracing::trace!(records, "Store file records applied");
    Ok(valid_len)
}

fn collection_for<'a>(
    collections: &'a mut BTreeMap<String, Arc<EngineCollection>>,
    log: &Arc<Log>,
    name: &str,
) -> &'a Arc<EngineCollection> {
    collections.entry(name.to_string()).or_insert_with(|| {
        Arc::new(EngineCollection::new(
            Some(name.to_string()),
            Tree::empty(bytes_compare()),
            Arc::clone(log),
        ))
    })
}
