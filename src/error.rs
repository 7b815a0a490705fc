//! Error kinds shared across the engine.
//!
//! Module-specific errors (`ReviewError`, `BatchError`, `StoreError`,
//! `DispatchError`, `SessionError`) wrap these two.

use serde::Serialize;
use thiserror::Error;

/// A transition was attempted on an entity whose state no longer matches
/// the caller's precondition. Recoverable by re-fetching and retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{entity} {id} is {actual}, expected {expected} (attempted {attempted})")]
pub struct StaleStateError {
    pub entity: &'static str,
    pub id: String,
    pub expected: String,
    pub actual: String,
    pub attempted: String,
}

impl StaleStateError {
    pub fn new(
        entity: &'static str,
        id: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
        attempted: impl Into<String>,
    ) -> Self {
        Self {
            entity,
            id: id.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            attempted: attempted.into(),
        }
    }
}

/// Malformed input rejected at the call boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Score range is inverted: {lo} > {hi}")]
    InvertedScoreRange { lo: u8, hi: u8 },

    #[error("Score bound {value} exceeds 100")]
    ScoreOutOfRange { value: u8 },

    #[error("Date range is inverted")]
    InvertedDateRange,

    #[error("Quality ratings must be between 1 and 5")]
    InvalidRatings,

    #[error("A reviewer identity is required")]
    MissingReviewer,

    #[error("A name is required")]
    MissingName,

    #[error("Batch {batch_id} has no cases")]
    EmptyBatch { batch_id: String },

    #[error("Progress {value} is outside 0-100")]
    ProgressOutOfRange { value: u8 },

    #[error("Invalid key binding: {detail}")]
    InvalidKey { detail: String },
}

/// Coarse classification the rendering layer uses to phrase a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    StaleState,
    /// Refused while a write is outstanding; retry once it confirms.
    Busy,
    NotFound,
    Store,
    Configuration,
}

impl ErrorKind {
    /// Stale state is fixed by re-fetching, store failures by retrying the
    /// whole command, busy refusals by waiting. Anything else needs
    /// different input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleState | Self::Busy | Self::Store)
    }
}
