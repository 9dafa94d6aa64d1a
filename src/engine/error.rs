use thiserror::Error;
use ulid::Ulid;

use crate::lifecycle::ReservationStatus;
use crate::model::{ConflictReport, Ms};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("overlaps existing reservations: {0}")]
    Overlap(ConflictReport),
    #[error("cannot {attempted} reservation {id} in status {from}")]
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        attempted: &'static str,
    },
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: Ulid, expected: u64, actual: u64 },
    #[error("degenerate range [{start}, {end})")]
    DegenerateRange { start: Ms, end: Ms },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("unknown resource: {0}")]
    UnknownResource(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    pub fn conflict(&self) -> Option<&ConflictReport> {
        match self {
            EngineError::Overlap(report) => Some(report),
            _ => None,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Overlap(_) => "overlap",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::VersionConflict { .. } => "version_conflict",
            EngineError::DegenerateRange { .. } => "degenerate_range",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::UnknownResource(_) => "unknown_resource",
            EngineError::LimitExceeded(_) => "limit_exceeded",
        }
    }
}
