//! Append side of a store file
//!
//! One `Log` per engine store, shared by all of its collections. Appends
//! are serialized by the writer mutex; store-level metadata records are
//! always written ahead of any collection records in the same append.
//!
//! Mutations enter through [`Log::admit`]. Sealing waits for every admitted
//! mutation to finish, so nothing can be queued after the final drain.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::error::{KvFileError, Result};

use super::Record;

pub(crate) struct Log {
    /// `None` once the engine has been closed
    writer: Mutex<Option<LogWriter>>,

    /// Pending collection create/drop records
    meta: Mutex<Vec<Record>>,

    /// Held shared by mutations, exclusively by `seal`
    gate: RwLock<()>,

    closed: AtomicBool,
}

pub(crate) struct LogWriter {
    out: BufWriter<File>,
    records_written: u64,
}

impl LogWriter {
    pub(crate) fn new(out: BufWriter<File>) -> Self {
        Self {
            out,
            records_written: 0,
        }
    }

    /// Append `records` and hand the bytes to the OS
    pub(crate) fn append_all(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            self.out.write_all(&record.encode()?)?;
            self.records_written += 1;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl Log {
    pub(crate) fn new(writer: LogWriter) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            meta: Mutex::new(Vec::new()),
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvFileError::EngineClosed);
        }
        Ok(())
    }

    /// Admit one mutation; the engine cannot be sealed while the returned
    /// guard is alive
    pub(crate) fn admit(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let guard = self.gate.read();
        self.ensure_open()?;
        Ok(guard)
    }

    pub(crate) fn push_meta(&self, record: Record) {
        self.meta.lock().push(record);
    }

    /// Append whatever `drain` hands back, after any pending metadata.
    ///
    /// `drain` runs with the writer lock held, so records drained by
    /// concurrent callers reach the file in drain order. On failure the
    /// drained records are given to `restore` so a later append retries
    /// them.
    pub(crate) fn append_with<D, R>(&self, drain: D, restore: R) -> Result<()>
    where
        D: FnOnce() -> Vec<Record>,
        R: FnOnce(Vec<Record>),
    {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(KvFileError::EngineClosed)?;

        let meta = mem::take(&mut *self.meta.lock());
        if let Err(e) = writer.append_all(&meta) {
            let mut pending = self.meta.lock();
            let newer = mem::replace(&mut *pending, meta);
            pending.extend(newer);
            return Err(e);
        }

        let records = drain();
        if let Err(e) = writer.append_all(&records) {
            restore(records);
            return Err(e);
        }
        Ok(())
    }

    /// Number of records appended through this log
    pub(crate) fn records_written(&self) -> u64 {
        self.writer
            .lock()
            .as_ref()
            .map_or(0, |writer| writer.records_written)
    }

    /// Reject further use once every admitted mutation has finished.
    ///
    /// The writer stays attached so pending records can still be drained.
    pub(crate) fn seal(&self) {
        let _gate = self.gate.write();
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_released(&self) -> bool {
        self.writer.lock().is_none()
    }

    /// Detach the writer, pushing its buffer to the OS
    pub(crate) fn release(&self) -> Result<()> {
        self.seal();
        if let Some(mut writer) = self.writer.lock().take() {
            writer.out.flush()?;
        }
        Ok(())
    }
}
