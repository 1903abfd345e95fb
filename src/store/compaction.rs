//! Compaction on open
//!
//! Rewrites an existing store file so that it holds only live items, then
//! swaps the rewrite into place.
//!
//! ## Sequence
//! ```text
//!  1. remove stale  P.tmp
//!  2. create        P.tmp
//!  3. attach engine to P
//!  4. copy live items      P ──copy_to──▶ P.tmp
//!  5. flush + fsync P.tmp        (failure: P untouched)
//!  6. close both
//!  7. rename P     ─▶ P.bck
//!  8. rename P.tmp ─▶ P          (failure: P.bck ─▶ P, or fatal)
//!  9. remove P.bck
//! ```
//!
//! The original is opened read-only and attached as a snapshot, so until
//! step 7 it is not modified at all. Step 8 is the only point where a
//! failure can leave the store without a file at `P`.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{Config, SwapFailurePolicy};
use crate::engine::EngineStore;
use crate::error::{KvFileError, Result};

/// Sizes before and after a compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub original_bytes: u64,
    pub compacted_bytes: u64,
}

/// `<path>.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

/// `<path>.bck`
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, ".bck")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Remove a leftover `<path>.tmp`; returns whether one existed
pub fn remove_stale_tmp(path: &Path) -> Result<bool> {
    match fs::remove_file(tmp_path(path)) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed stale compaction output");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Finish or roll back a swap that was interrupted by a crash
///
/// - `P` missing, `P.bck` present: the crash hit between steps 7 and 8, so
///   the backup is renamed back to `P`.
/// - Both present: the crash hit between steps 8 and 9, so `P` is the
///   compacted file and the backup is removed.
///
/// Returns whether anything was recovered.
pub fn recover_interrupted_swap(path: &Path) -> Result<bool> {
    let backup = backup_path(path);
    if !backup.try_exists()? {
        return Ok(false);
    }

    if path.try_exists()? {
        fs::remove_file(&backup)?;
        tracing::info!(path = %path.display(), "Removed backup left by a completed swap");
    } else {
        fs::rename(&backup, path)?;
        tracing::warn!(
            path = %path.display(),
            backup = %backup.display(),
            "Restored store file from backup of an interrupted swap"
        );
    }
    Ok(true)
}

/// Run the full compaction sequence on an existing store file
pub fn compact_store_file(path: &Path, config: &Config) -> Result<CompactionReport> {
    let tmp = tmp_path(path);
    let backup = backup_path(path);

    // Step 1
    remove_stale_tmp(path)?;

    // Steps 2-6; on failure the original is untouched.
    let report = match write_compacted(path, &tmp, config.copy_flush_every) {
        Ok(report) => report,
        Err(e) => {
            discard(&tmp);
            tracing::warn!(path = %path.display(), error = %e, "Compaction aborted, original kept");
            return Err(e);
        }
    };

    // Step 7
    if let Err(e) = fs::rename(path, &backup) {
        discard(&tmp);
        return Err(e.into());
    }

    // Step 8
    install_compacted(path, &tmp, &backup, config.swap_failure, |from, to| {
        fs::rename(from, to)
    })?;

    // Step 9
    fs::remove_file(&backup)?;

    tracing::info!(
        path = %path.display(),
        original_bytes = report.original_bytes,
        compacted_bytes = report.compacted_bytes,
        "Compacted store file"
    );
    Ok(report)
}

fn write_compacted(path: &Path, tmp: &Path, flush_every: usize) -> Result<CompactionReport> {
    // Step 2
    let target = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(tmp)?;

    // Step 3
    let source_file = OpenOptions::new().read(true).open(path)?;
    let original_bytes = source_file.metadata()?.len();
    let source = EngineStore::open_snapshot(source_file.try_clone()?)?;

    // Step 4
    let compacted = match source.copy_to(target.try_clone()?, flush_every) {
        Ok(compacted) => compacted,
        Err(e) => {
            close_quietly(&source);
            return Err(e);
        }
    };

    // Step 5
    if let Err(e) = sync_target(&compacted, &target) {
        close_quietly(&compacted);
        close_quietly(&source);
        return Err(e);
    }

    // Step 6
    compacted.close()?;
    drop(target);
    source.close()?;
    drop(source_file);

    let compacted_bytes = fs::metadata(tmp)?.len();
    Ok(CompactionReport {
        original_bytes,
        compacted_bytes,
    })
}

fn sync_target(compacted: &EngineStore, target: &File) -> Result<()> {
    compacted.flush()?;
    target.sync_all()?;
    Ok(())
}

/// Step 8: move the compacted file into place, restoring the backup if
/// that fails
fn install_compacted<F>(
    path: &Path,
    tmp: &Path,
    backup: &Path,
    policy: SwapFailurePolicy,
    rename: F,
) -> Result<()>
where
    F: Fn(&Path, &Path) -> io::Result<()>,
{
    let install = match rename(tmp, path) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    tracing::warn!(
        path = %path.display(),
        error = %install,
        "Installing compacted file failed, restoring backup"
    );

    let restore = match rename(backup, path) {
        Ok(()) => return Err(install.into()),
        Err(e) => e,
    };

    let err = KvFileError::UnrecoverableSwap {
        path: path.to_path_buf(),
        backup: backup.to_path_buf(),
        install,
        restore,
    };
    tracing::error!(error = %err, "Compaction swap failed and backup could not be restored");

    match policy {
        SwapFailurePolicy::Abort => std::process::abort(),
        SwapFailurePolicy::Surface => Err(err),
    }
}

fn discard(tmp: &Path) {
    if let Err(e) = fs::remove_file(tmp) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %tmp.display(), error = %e, "Could not remove compaction output");
        }
    }
}

fn close_quietly(store: &EngineStore) {
    if let Err(e) = store.close() {
        tracing::debug!(error = %e, "Ignoring close failure during compaction cleanup");
    }
}
