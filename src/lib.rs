//! # kvfile
//!
//! Lifecycle management for file-backed, ordered key-value stores:
//! - One live store per file path, handed out by a registry
//! - Crash-safe compaction of existing store files on open
//! - A background flush thread per store that makes every mutation durable
//! - Typed object access over byte values through a pluggable codec
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      StoreRegistry                           │
//! │           (path → Store, default store, shutdown)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ open(path): recover swap → compact → attach
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Store                                 │
//! │        (engine + file handle + flush coordinator)            │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐   notifications   ┌─────────────┐
//!   │   Collection    │ ────────────────▶ │ Flush thread│
//!   │ (write lock,    │                   │ flush+fsync │
//!   │  codec)         │                   └─────────────┘
//!   └────────┬────────┘
//!            ▼
//!   ┌─────────────────┐
//!   │  Tree engine    │
//!   │ (treap, append- │
//!   │  only records)  │
//!   └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use kvfile::StoreRegistry;
//!
//! # fn main() -> kvfile::Result<()> {
//! let registry = StoreRegistry::default();
//! let store = registry.open("/tmp/app.db")?;
//! let users = store.set_collection("users", None)?;
//!
//! users.set_object("ada", &vec!["admin", "ops"])?;
//! let roles: Option<Vec<String>> = users.object("ada")?;
//! assert_eq!(roles.unwrap().len(), 2);
//!
//! registry.shutdown()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod engine;
pub mod collection;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use collection::{BincodeCodec, Codec, Collection, JsonCodec};
pub use config::{Config, SwapFailurePolicy};
pub use engine::{Item, KeyCompare};
pub use error::{KvFileError, Result};
pub use store::{Store, StoreRegistry};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvfile
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
