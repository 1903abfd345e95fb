//! Tree Engine Module
//!
//! A small copy-on-write ordered key-value engine. The rest of the crate
//! only uses it through `EngineStore` and `EngineCollection`.
//!
//! ## Responsibilities
//! - Named and private collections of items ordered by a pluggable comparator
//! - Treap balancing driven by per-item priorities
//! - Append-only persistence of mutations
//! - Compacting copy of the live state into a fresh file (`copy_to`)
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Magic "KVFILE01" (8)                    │
//! ├─────────────────────────────────────────┤
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬─────────────────┐ │
//! │ │ Len (4) │ CRC (4) │ bincode payload │ │
//! │ └─────────┴─────────┴─────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2 ...                            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Replaced and deleted items leave their old records behind. Only
//! `copy_to` produces a file holding nothing but live items.

mod collection;
mod writer;
mod record;
mod store;
mod treap;

use std::cmp::Ordering;
use std::sync::Arc;

use rand::Rng;

pub use collection::EngineCollection;
pub use record::{read_frame, Frame, Record, FRAME_HEADER_SIZE, MAGIC, MAGIC_LEN};
pub use store::EngineStore;

/// Orders keys within a collection
pub type KeyCompare = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Plain lexicographic byte order, used when no comparator is given
pub fn bytes_compare() -> KeyCompare {
    Arc::new(|a: &[u8], b: &[u8]| a.cmp(b))
}

/// Uniformly random, non-negative treap priority
pub fn random_priority() -> i32 {
    rand::thread_rng().gen_range(0..=i32::MAX)
}

/// A key/value pair plus the treap priority that places it in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Vec<u8>,
    pub val: Vec<u8>,
    pub priority: i32,
}

impl Item {
    pub fn new(key: Vec<u8>, val: Vec<u8>, priority: i32) -> Self {
        Self { key, val, priority }
    }

    /// Build an item with a random priority
    pub fn with_random_priority(key: Vec<u8>, val: Vec<u8>) -> Self {
        Self::new(key, val, random_priority())
    }
}
