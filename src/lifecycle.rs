//! Reservation status machine.
//!
//! ```text
//! draft ──► confirmed ──► active ──► completed
//!   │           │           │
//!   └───────────┴───────────┴──► cancelled
//! ```
//!
//! `blackout` is the status of synthetic unavailability ranges (maintenance,
//! out-of-service). It has no transitions at all.

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::model::ReservationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Draft,
    Confirmed,
    Active,
    Completed,
    Cancelled,
    Blackout,
}

/// How a reservation in a given status sits in the interval index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    /// Takes part in conflict checks.
    Binding,
    /// Kept for audit; blocks new bookings only until its range ends.
    Retained,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Draft => "draft",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Blackout => "blackout",
        }
    }

    pub fn occupancy(&self) -> Option<Occupancy> {
        match self {
            ReservationStatus::Confirmed | ReservationStatus::Active | ReservationStatus::Blackout => {
                Some(Occupancy::Binding)
            }
            ReservationStatus::Completed => Some(Occupancy::Retained),
            ReservationStatus::Draft | ReservationStatus::Cancelled => None,
        }
    }

    pub fn is_binding(&self) -> bool {
        self.occupancy() == Some(Occupancy::Binding)
    }

    /// Move/Resize/Reassign are only legal before hand-over.
    pub fn allows_reschedule(&self) -> bool {
        matches!(self, ReservationStatus::Draft | ReservationStatus::Confirmed)
    }

    pub fn can_transition_to(&self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, to),
            (Draft, Confirmed)
                | (Confirmed, Active)
                | (Active, Completed)
                | (Draft, Cancelled)
                | (Confirmed, Cancelled)
                | (Active, Cancelled)
        )
    }

    /// Statuses a reservation may be created in.
    pub fn is_initial(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Draft | ReservationStatus::Confirmed | ReservationStatus::Blackout
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn check_transition(
    id: ReservationId,
    from: ReservationStatus,
    to: ReservationStatus,
) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            id,
            from,
            attempted: to.as_str(),
        })
    }
}

pub(crate) fn check_reschedule(
    id: ReservationId,
    from: ReservationStatus,
    attempted: &'static str,
) -> Result<(), EngineError> {
    if from.allows_reschedule() {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { id, from, attempted })
    }
}
