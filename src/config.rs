//! Configuration for kvfile
//!
//! Centralized configuration with sensible defaults.

/// Main configuration shared by every store a registry opens
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Open / Compaction Configuration
    // -------------------------------------------------------------------------
    /// Rewrite an existing store file into a compacted copy before attaching.
    pub compact_on_open: bool,

    /// Flush the compaction target's buffered output every N items.
    /// `0` flushes only once the copy is complete.
    pub copy_flush_every: usize,

    /// What to do when a compaction swap fails and the backup cannot be
    /// restored.
    pub swap_failure: SwapFailurePolicy,

    // -------------------------------------------------------------------------
    // Flush Configuration
    // -------------------------------------------------------------------------
    /// Capacity of each store's flush notification queue.
    /// `None` makes the queue unbounded.
    pub flush_queue_capacity: Option<usize>,
}

/// Reaction to an unrecoverable compaction swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapFailurePolicy {
    /// Log and abort the process
    Abort,

    /// Return `KvFileError::UnrecoverableSwap` to the caller of `open`
    Surface,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compact_on_open: true,
            copy_flush_every: 0,
            swap_failure: SwapFailurePolicy::Abort,
            flush_queue_capacity: Some(1024),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Enable or disable compaction of existing files on open
    pub fn compact_on_open(mut self, enabled: bool) -> Self {
        self.config.compact_on_open = enabled;
        self
    }

    /// Set how often (in items) the compaction copy flushes its output
    pub fn copy_flush_every(mut self, items: usize) -> Self {
        self.config.copy_flush_every = items;
        self
    }

    /// Set the unrecoverable swap policy
    pub fn swap_failure(mut self, policy: SwapFailurePolicy) -> Self {
        self.config.swap_failure = policy;
        self
    }

    /// Set the flush queue capacity (`None` for unbounded)
    pub fn flush_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.flush_queue_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
