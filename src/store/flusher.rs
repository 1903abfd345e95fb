//! Write-Flush Coordinator
//!
//! Every mutating collection call sends a notification; one background
//! thread per store turns notifications into durable flushes.
//!
//! ## Semantics
//! - At least one flush runs after every notification. Notifications that
//!   queue up while a flush is in progress are coalesced into the next one.
//! - The first failed flush stops the thread. The error is kept until the
//!   store's next direct flush or close takes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{KvFileError, Result};

/// Something that can be made durable: engine buffers plus `fsync`
pub(crate) trait Durable: Send + Sync + 'static {
    fn sync(&self) -> Result<()>;
}

enum Signal {
    Dirty,
    Shutdown,
}

/// Sending half handed to every collection of a store
#[derive(Clone)]
pub struct FlushNotifier {
    sender: Sender<Signal>,
}

impl FlushNotifier {
    /// Request a flush. Blocks only while a bounded queue is full.
    pub(crate) fn notify(&self) {
        if self.sender.send(Signal::Dirty).is_err() {
            // The flush thread has stopped; its failure is reported by the
            // store's next flush/close.
            tracing::trace!("Flush thread gone, notification dropped");
        }
    }
}

pub(crate) struct FlushCoordinator {
    notifier: FlushNotifier,
    handle: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<Mutex<Option<KvFileError>>>,
    flushes: Arc<AtomicU64>,
}

impl FlushCoordinator {
    /// Spawn the flush thread for `target`
    ///
    /// `capacity` bounds the notification queue; `None` leaves it unbounded.
    pub(crate) fn start<D: Durable>(
        label: &str,
        target: Arc<D>,
        capacity: Option<usize>,
    ) -> Result<Self> {
        let (sender, receiver) = match capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };

        let failure = Arc::new(Mutex::new(None));
        let flushes = Arc::new(AtomicU64::new(0));

        let handle = {
            let failure = Arc::clone(&failure);
            let flushes = Arc::clone(&flushes);
            let label = label.to_string();
            thread::Builder::new()
                .name("kvfile-flush".to_string())
                .spawn(move || flush_loop(&label, receiver, target, failure, flushes))?
        };

        Ok(Self {
            notifier: FlushNotifier { sender },
            handle: Mutex::new(Some(handle)),
            failure,
            flushes,
        })
    }

    pub(crate) fn notifier(&self) -> FlushNotifier {
        self.notifier.clone()
    }

    /// Take the error that stopped the flush thread, if any
    pub(crate) fn take_failure(&self) -> Option<KvFileError> {
        self.failure.lock().take()
    }

    /// Whether a failure stopped the flush thread and has not been taken yet
    pub(crate) fn has_failure(&self) -> bool {
        self.failure.lock().is_some()
    }

    /// Physical flushes performed by the background thread
    pub(crate) fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }

    /// Stop the flush thread and wait for it to exit
    pub(crate) fn shutdown(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            // Fails only when the thread already exited.
            let _ = self.notifier.sender.send(Signal::Shutdown);
            if handle.join().is_err() {
                tracing::error!("Flush thread panicked");
            }
        }
    }
}

impl Drop for FlushCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flush_loop<D: Durable>(
    label: &str,
    receiver: Receiver<Signal>,
    target: Arc<D>,
    failure: Arc<Mutex<Option<KvFileError>>>,
    flushes: Arc<AtomicU64>,
) {
    tracing::debug!(store = label, "Flush thread started");

    while let Ok(signal) = receiver.recv() {
        let mut dirty = matches!(signal, Signal::Dirty);
        let mut shutdown = !dirty;

        // Coalesce everything already queued into one flush.
        for queued in receiver.try_iter() {
            match queued {
                Signal::Dirty => dirty = true,
                Signal::Shutdown => shutdown = true,
            }
        }

        if dirty {
            if let Err(e) = target.sync() {
                tracing::error!(store = label, error = %e, "Background flush failed, stopping");
                *failure.lock() = Some(e);
                return;
            }
            flushes.fetch_add(1, Ordering::AcqRel);
        }

        if shutdown {
            break;
        }
    }

    tracing::debug!(store = label, "Flush thread stopped");
}
