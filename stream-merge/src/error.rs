//! Error types for the stream-merge crate.

use thiserror::Error;

use crate::config::ValidationError;

/// Errors that can occur while merging source streams.
#[derive(Error, Debug)]
pub enum MergeError {
    /// IO error on a spill log.
    ///
    /// Spill IO failures are fatal: once a write is interrupted mid-record the
    /// source's row order can no longer be trusted.
    #[error("spill IO error: {0}")]
    SpillIo(#[from] std::io::Error),

    /// A spill frame could not be decoded.
    #[error("corrupt spill frame: {0}")]
    SpillCorrupt(String),

    /// A spill frame carried a source index other than the one being drained.
    #[error("spill log desynchronized: expected rows for source {expected}, found source {found}")]
    SpillDesync { expected: usize, found: usize },

    /// A row was drained whose origin has no mapping entry.
    ///
    /// Indicates the bookkeeping between buffered rows and configured sources
    /// has desynchronized; the run aborts rather than guessing an origin.
    #[error("no field mapping for source '{0}', cannot route its rows")]
    UnknownOrigin(String),

    /// A spill append targeted a source with no open write log.
    #[error("no spill log open for source index {0}")]
    SpillUnopened(usize),

    /// The spill buffer was used outside its write-then-read lifecycle.
    #[error("spill buffer lifecycle violation: {0}")]
    SpillLifecycle(&'static str),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    /// The downstream sink rejected a row or the completion signal.
    #[error("sink error: {0}")]
    Sink(String),
}

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;
