//! Store Module
//!
//! Opening, compacting, flushing and closing store files.
//!
//! ## Responsibilities
//! - Registry: one live `Store` per path, plus a default store
//! - Compaction: crash-safe rewrite-and-swap of existing files on open
//! - Flushing: a background thread per store makes every mutation durable
//!
//! ## Lifecycle
//! ```text
//!  registry.open(P)
//!       │
//!       ├─ P.bck left behind? ──▶ recover swap
//!       ├─ P exists?          ──▶ compact (P.tmp, P.bck)
//!       │                   else create P
//!       ▼
//!  Store ── engine ── file
//!    │
//!    └─ flush thread ◀── notifications ◀── Collection mutations
//!       │
//!  store.close() ─▶ final flush ─▶ stop thread ─▶ release file ─▶ deregister
//! ```

mod compaction;
mod flusher;
mod handle;
mod registry;

pub use compaction::{
    backup_path, compact_store_file, recover_interrupted_swap, remove_stale_tmp, tmp_path,
    CompactionReport,
};
pub(crate) use flusher::FlushNotifier;
pub use handle::Store;
pub use registry::StoreRegistry;
