//! Runtime options for the packing engine.

/// How change-frame lists move between consecutive blobs of one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ReplicationMode {
    /// One consumer reads each snapshot once; the new blob takes the previous
    /// blob's list instead of copying it.
    #[default]
    SingleConsumer,
    /// Several observer streams read history at different ticks; every new
    /// blob gets its own deep copy.
    MultiObserver,
}

/// Packing options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PackConfig {
    /// Use changed-offset lists to re-encode only touched properties.
    pub fast_path: bool,
    /// Pack entities of one tick across a worker pool.
    pub parallel: bool,
    /// Dedicated pool size; `None` uses the global pool.
    pub worker_threads: Option<usize>,
    /// Re-run the full diff after every fast-path pack and log disagreements.
    pub validate: bool,
    /// Never reuse a previous blob just because the entity is not dirty.
    pub always_reverify: bool,
    pub mode: ReplicationMode,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            fast_path: true,
            parallel: true,
            worker_threads: None,
            validate: false,
            always_reverify: false,
            mode: ReplicationMode::SingleConsumer,
        }
    }
}

impl PackConfig {
    /// Single-threaded, validating configuration for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            fast_path: true,
            parallel: false,
            worker_threads: None,
            validate: true,
            always_reverify: false,
            mode: ReplicationMode::SingleConsumer,
        }
    }
}
