use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::lifecycle::ReservationStatus;

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

pub type ReservationId = Ulid;
pub type ResourceId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Caller guarantees `start < end`; use [`Span::try_new`] for untrusted input.
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::DegenerateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The overlapping sub-range, if any.
    pub fn intersection(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Span { start, end })
    }
}

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vehicle,
    Driver,
}

/// Which index a collision was found in.
pub type Axis = ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub kind: ResourceKind,
    #[serde(default)]
    pub name: Option<String>,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub vehicle_id: ResourceId,
    pub driver_id: Option<ResourceId>,
    pub span: Span,
    pub status: ReservationStatus,
    /// Opaque customer reference.
    pub customer: Option<String>,
    pub version: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
    /// Drafts are only held until this instant; the reaper cancels them afterwards.
    #[serde(default)]
    pub hold_until: Option<Ms>,
}

impl Reservation {
    pub fn occupies(&self) -> bool {
        self.status.occupancy().is_some()
    }
}

/// Booking request payload for [`Change::Create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub id: ReservationId,
    pub vehicle_id: ResourceId,
    #[serde(default)]
    pub driver_id: Option<ResourceId>,
    pub span: Span,
    pub status: ReservationStatus,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub hold_until: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverChange {
    #[default]
    Keep,
    Assign(ResourceId),
    Unassign,
}

/// A requested reservation change. Flat and serializable; this is also the
/// payload carried to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    Create(NewReservation),
    Move {
        id: ReservationId,
        span: Span,
    },
    Resize {
        id: ReservationId,
        edge: Edge,
        to: Ms,
    },
    Reassign {
        id: ReservationId,
        #[serde(default)]
        vehicle: Option<ResourceId>,
        #[serde(default)]
        driver: DriverChange,
    },
    Transition {
        id: ReservationId,
        to: ReservationStatus,
    },
    Cancel {
        id: ReservationId,
    },
}

impl Change {
    pub fn reservation_id(&self) -> ReservationId {
        match self {
            Change::Create(new) => new.id,
            Change::Move { id, .. }
            | Change::Resize { id, .. }
            | Change::Reassign { id, .. }
            | Change::Transition { id, .. }
            | Change::Cancel { id } => *id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Change::Create(_) => "create",
            Change::Move { .. } => "move",
            Change::Resize { .. } => "resize",
            Change::Reassign { .. } => "reassign",
            Change::Transition { .. } => "transition",
            Change::Cancel { .. } => "cancel",
        }
    }
}

// ── Conflicts ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collision {
    pub reservation_id: ReservationId,
    pub resource_id: ResourceId,
    pub axis: Axis,
    /// Intersection of the proposed range with the colliding one.
    pub overlap: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictReport {
    pub collisions: Vec<Collision>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.collisions.is_empty()
    }

    pub fn reservation_ids(&self) -> Vec<ReservationId> {
        let mut ids: Vec<_> = self.collisions.iter().map(|c| c.reservation_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn extend(&mut self, other: ConflictReport) {
        self.collisions.extend(other.collisions);
    }
}

impl std::fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, c) in self.collisions.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let axis = match c.axis {
                ResourceKind::Vehicle => "vehicle",
                ResourceKind::Driver => "driver",
            };
            write!(
                f,
                "{} on {axis} {} during [{}, {})",
                c.reservation_id, c.resource_id, c.overlap.start, c.overlap.end
            )?;
        }
        Ok(())
    }
}

// ── Presentation ─────────────────────────────────────────────────

/// Snapshot handed to the UI layer. `conflict` is presentation state only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub id: ReservationId,
    pub vehicle_id: ResourceId,
    pub driver_id: Option<ResourceId>,
    pub span: Span,
    pub status: ReservationStatus,
    pub version: u64,
    pub conflict: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn try_new_rejects_degenerate() {
        assert!(Span::try_new(100, 200).is_ok());
        assert!(matches!(
            Span::try_new(100, 100),
            Err(EngineError::DegenerateRange { start: 100, end: 100 })
        ));
        assert!(matches!(
            Span::try_new(200, 100),
            Err(EngineError::DegenerateRange { .. })
        ));
    }

    #[test]
    fn intersection() {
        let a = Span::new(100, 300);
        assert_eq!(a.intersection(&Span::new(200, 400)), Some(Span::new(200, 300)));
        assert_eq!(a.intersection(&Span::new(300, 400)), None);
        assert_eq!(a.intersection(&Span::new(150, 160)), Some(Span::new(150, 160)));
    }

    #[test]
    fn change_json_shape() {
        let id = Ulid::new();
        let change = Change::Move { id, span: Span::new(1, 2) };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["op"], "move");
        let back: Change = serde_json::from_value(json).unwrap();
        assert_eq!(back, change);
        assert_eq!(back.reservation_id(), id);
    }

    #[test]
    fn conflict_report_display_names_reservation() {
        let rid = Ulid::new();
        let report = ConflictReport {
            collisions: vec![Collision {
                reservation_id: rid,
                resource_id: Ulid::new(),
                axis: ResourceKind::Driver,
                overlap: Span::new(10, 20),
            }],
        };
        let text = report.to_string();
        assert!(text.contains(&rid.to_string()));
        assert!(text.contains("driver"));
    }
}
