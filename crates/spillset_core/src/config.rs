//! Spill configuration.

/// Read-back verification performed after a segment is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOptions {
    /// Re-read the element count from the trailer and compare it.
    pub verify_size: bool,
    /// Re-read the first elements and compare them with what was written.
    pub verify_elements: bool,
    /// How many leading elements to compare when `verify_elements` is set.
    pub elements_to_verify: usize,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            verify_size: true,
            verify_elements: true,
            elements_to_verify: 100,
        }
    }
}

impl PersistOptions {
    /// Options that skip all read-back verification.
    #[must_use]
    pub const fn unverified() -> Self {
        Self {
            verify_size: false,
            verify_elements: false,
            elements_to_verify: 0,
        }
    }
}

/// Configuration for a buffered, spilling sorted set.
#[derive(Debug, Clone)]
pub struct SpillConfig {
    /// Buffer size (in elements) at which the buffer is spilled to a segment.
    pub buffer_persist_threshold: usize,

    /// Maximum number of spilled segments kept after `persist()`.
    /// Also bounds how many segments one compaction merges at once.
    /// Zero disables compaction.
    pub max_open_files: usize,

    /// Additional attempts per location before the location is abandoned.
    pub retries: u32,

    /// Verification performed after every segment write.
    pub persist_options: PersistOptions,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            buffer_persist_threshold: 1000,
            max_open_files: 100,
            retries: 2,
            persist_options: PersistOptions::default(),
        }
    }
}

impl SpillConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buffer spill threshold.
    #[must_use]
    pub const fn buffer_persist_threshold(mut self, elements: usize) -> Self {
        self.buffer_persist_threshold = elements;
        self
    }

    /// Sets the maximum number of spilled segments.
    #[must_use]
    pub const fn max_open_files(mut self, files: usize) -> Self {
        self.max_open_files = files;
        self
    }

    /// Sets the retry budget per location.
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the persist verification options.
    #[must_use]
    pub fn persist_options(mut self, options: PersistOptions) -> Self {
        self.persist_options = options;
        self
    }

    /// Checks the configuration for values the set cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidConfig`] for a zero spill threshold
    /// or a `max_open_files` of one (a merge needs at least two inputs).
    pub fn validate(&self) -> crate::CoreResult<()> {
        if self.buffer_persist_threshold == 0 {
            return Err(crate::CoreError::invalid_config(
                "buffer_persist_threshold must be at least 1",
            ));
        }
        if self.max_open_files == 1 {
            return Err(crate::CoreError::invalid_config(
                "max_open_files must be 0 (unbounded) or at least 2",
            ));
        }
        Ok(())
    }
}
