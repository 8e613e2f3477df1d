//! Configuration for a merge run.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised by configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field contains an invalid value.
    #[error("invalid value for field '{field}': {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}

/// Configuration for a merge run.
///
/// Contains the ordered list of sources to merge plus the knobs that govern
/// queue sizing, schema-discovery spilling, and queue binding retries. How the
/// configuration is loaded and persisted is up to the caller.
#[derive(Clone, Debug, Deserialize)]
pub struct MergeConfig {
    /// Ordered names of the sources to merge.
    ///
    /// The order determines union field order (first-seen wins) and the index
    /// space used for field mappings and spill logs.
    pub sources: Vec<String>,
    /// Maximum number of rows a source queue buffers before producers block.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of discovery iterations tolerated for an unresolved source
    /// before queued rows start spilling to disk.
    #[serde(default = "default_spill_trigger")]
    pub spill_trigger: u64,
    /// Number of attempts to locate a source's queue before treating the
    /// source as contributing zero rows.
    #[serde(default = "default_locate_retries")]
    pub locate_retries: u32,
    /// Fixed delay, in milliseconds, between queue-locate attempts.
    #[serde(default = "default_locate_retry_delay_ms")]
    pub locate_retry_delay_ms: u64,
    /// Directory for spill logs. Defaults to the system temp directory.
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,
    /// Emit a progress log line every this many rows.
    #[serde(default = "default_feedback_interval")]
    pub feedback_interval: u64,
}

impl MergeConfig {
    /// Default source queue capacity, matching the usual row set size of the
    /// transformation engines this step is fed from.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

    /// Default number of discovery iterations before spilling starts.
    pub const DEFAULT_SPILL_TRIGGER: u64 = 100_000;

    /// Default number of queue-locate attempts.
    pub const DEFAULT_LOCATE_RETRIES: u32 = 10;

    /// Default delay between queue-locate attempts in milliseconds.
    pub const DEFAULT_LOCATE_RETRY_DELAY_MS: u64 = 100;

    /// Default number of rows between progress log lines.
    pub const DEFAULT_FEEDBACK_INTERVAL: u64 = 50_000;

    /// Creates a configuration for the given sources with default settings.
    pub fn new(sources: Vec<String>) -> Self {
        Self {
            sources,
            queue_capacity: default_queue_capacity(),
            spill_trigger: default_spill_trigger(),
            locate_retries: default_locate_retries(),
            locate_retry_delay_ms: default_locate_retry_delay_ms(),
            spill_dir: None,
            feedback_interval: default_feedback_interval(),
        }
    }

    /// Sets the source queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the discovery spill trigger.
    pub fn with_spill_trigger(mut self, spill_trigger: u64) -> Self {
        self.spill_trigger = spill_trigger;
        self
    }

    /// Sets the queue-locate retry budget.
    pub fn with_locate_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.locate_retries = retries;
        self.locate_retry_delay_ms = delay_ms;
        self
    }

    /// Sets the spill directory.
    pub fn with_spill_dir(mut self, spill_dir: PathBuf) -> Self {
        self.spill_dir = Some(spill_dir);
        self
    }

    /// Validates configuration settings.
    ///
    /// Ensures at least one source is configured and sizing knobs are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sources.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "sources".to_string(),
                constraint: "at least one source must be configured".to_string(),
            });
        }

        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "queue_capacity".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.spill_trigger == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "spill_trigger".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    MergeConfig::DEFAULT_QUEUE_CAPACITY
}

fn default_spill_trigger() -> u64 {
    MergeConfig::DEFAULT_SPILL_TRIGGER
}

fn default_locate_retries() -> u32 {
    MergeConfig::DEFAULT_LOCATE_RETRIES
}

fn default_locate_retry_delay_ms() -> u64 {
    MergeConfig::DEFAULT_LOCATE_RETRY_DELAY_MS
}

fn default_feedback_interval() -> u64 {
    MergeConfig::DEFAULT_FEEDBACK_INTERVAL
}
