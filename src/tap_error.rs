//! TapError: unified error type for tapcomm public APIs
//!
//! Every construction phase and every apply-time exchange returns this error
//! instead of panicking. Transport failures are fatal to the collective
//! operation that hit them; there is no retry layer.

use thiserror::Error;

/// Unified error type for schedule construction and execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TapError {
    /// A rank-ordering scheme that is not one of cyclic, block or alternating.
    #[error("unsupported MPI rank ordering `{0}` (expected cyclic, block or alternating)")]
    UnsupportedOrdering(String),
    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A process rank outside `0..size`.
    #[error("rank {rank} is out of range for {size} processes")]
    RankOutOfRange { rank: usize, size: usize },
    /// Two parallel arrays that must have equal length do not.
    #[error("length mismatch: {what} has {got} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// The same global column was listed twice in a dependency set.
    #[error("column {0} appears more than once in the dependency set")]
    DuplicateColumn(usize),
    /// The transport failed while talking to `peer`.
    #[error("communication with rank {peer} failed: {reason}")]
    Comm { peer: usize, reason: String },
    /// A received payload did not have the byte length the schedule promised.
    #[error("payload from rank {peer}: expected {expected} bytes, got {got}")]
    PayloadSize {
        peer: usize,
        expected: usize,
        got: usize,
    },
    /// A global index has no position in the upstream buffer it is remapped into.
    #[error("global index {index} is missing from the {buffer} buffer")]
    MissingIndex { index: usize, buffer: &'static str },
}

impl TapError {
    pub(crate) fn comm(peer: usize, reason: impl Into<String>) -> Self {
        TapError::Comm {
            peer,
            reason: reason.into(),
        }
    }
}
