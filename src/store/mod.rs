//! Contracts with the persistence collaborator.
//!
//! A session talks to its store only through these traits. The store is the
//! authority: it re-validates every change, enforces optimistic versions and
//! pushes committed snapshots back to subscribers.

pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::engine::EngineError;
use crate::lifecycle::ReservationStatus;
use crate::model::*;

/// Opaque company/tenant scope, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope(pub String);

impl Scope {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Successful commit: the authoritative record after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Committed {
    pub reservation: Reservation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: ReservationId, expected: u64, actual: u64 },
    #[error("overlaps existing reservations: {0}")]
    OverlapConflict(ConflictReport),
    #[error("cannot {attempted} reservation {id} in status {from}")]
    InvalidTransition {
        id: ReservationId,
        from: ReservationStatus,
        attempted: &'static str,
    },
    #[error("not found: {0}")]
    NotFound(ReservationId),
    #[error("invalid change: {0}")]
    Invalid(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl Rejection {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::VersionConflict { .. } => "version_conflict",
            Rejection::OverlapConflict(_) => "overlap",
            Rejection::InvalidTransition { .. } => "invalid_transition",
            Rejection::NotFound(_) => "not_found",
            Rejection::Invalid(_) => "invalid",
            Rejection::Unavailable(_) => "unavailable",
        }
    }

    /// The caller may resend the same change later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Rejection::Unavailable(_))
    }
}

impl From<EngineError> for Rejection {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Overlap(report) => Rejection::OverlapConflict(report),
            EngineError::InvalidTransition { id, from, attempted } => {
                Rejection::InvalidTransition { id, from, attempted }
            }
            EngineError::VersionConflict { id, expected, actual } => {
                Rejection::VersionConflict { id, expected, actual }
            }
            EngineError::NotFound(id) => Rejection::NotFound(id),
            other => Rejection::Invalid(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    /// Every record on `vehicles` whose range overlaps `window`, blackouts included.
    async fn fetch_reservations(
        &self,
        vehicles: &[ResourceId],
        window: Span,
    ) -> Result<Vec<Reservation>, Rejection>;

    /// Validate and persist `change` if the stored version equals
    /// `expected_version` (`0` for creates).
    async fn submit_change(&self, change: Change, expected_version: u64) -> Result<Committed, Rejection>;

    /// Pushed authoritative snapshots for one vehicle, if the store supports it.
    fn subscribe(&self, _vehicle_id: ResourceId) -> Option<broadcast::Receiver<Reservation>> {
        None
    }
}

#[async_trait]
pub trait ResourceDirectory: Send + Sync + 'static {
    async fn list_resources(&self, scope: &Scope) -> Result<Vec<ResourceInfo>, Rejection>;

    /// Maintenance / out-of-service ranges in `window`.
    async fn blackouts(&self, scope: &Scope, window: Span) -> Result<Vec<Reservation>, Rejection>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn engine_errors_map_to_rejections() {
        let id = Ulid::new();
        assert_eq!(
            Rejection::from(EngineError::VersionConflict { id, expected: 3, actual: 4 }),
            Rejection::VersionConflict { id, expected: 3, actual: 4 }
        );
        assert_eq!(Rejection::from(EngineError::NotFound(id)), Rejection::NotFound(id));
        assert!(matches!(
            Rejection::from(EngineError::DegenerateRange { start: 5, end: 5 }),
            Rejection::Invalid(msg) if msg.contains("degenerate")
        ));
        assert!(matches!(
            Rejection::from(EngineError::Overlap(ConflictReport::default())),
            Rejection::OverlapConflict(_)
        ));
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(Rejection::Unavailable("timeout".into()).is_retryable());
        assert!(!Rejection::NotFound(Ulid::new()).is_retryable());
    }
}
