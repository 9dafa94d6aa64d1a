use crate::lifecycle::{ReservationStatus, check_reschedule, check_transition};
use crate::model::*;

use super::conflict::{validate_customer, validate_span};
use super::{EngineError, Schedule};

impl Schedule {
    /// Decide whether `change` is legal and return the reservation as it
    /// would look afterwards. Never mutates.
    ///
    /// Spatial legality (vehicle index + driver overlay) and status legality
    /// (lifecycle) are both checked here; a change commits only if both
    /// accept. A no-op move/resize/reassign returns the current record
    /// unchanged, version included.
    pub fn propose(&self, change: &Change, now: Ms) -> Result<Reservation, EngineError> {
        match change {
            Change::Create(new) => self.propose_create(new, now),
            Change::Move { id, span } => {
                let cur = self.existing(id)?;
                check_reschedule(*id, cur.status, "move")?;
                validate_span(span)?;
                self.rescheduled(cur, cur.vehicle_id, cur.driver_id, *span, now)
            }
            Change::Resize { id, edge, to } => {
                let cur = self.existing(id)?;
                check_reschedule(*id, cur.status, "resize")?;
                let span = match edge {
                    Edge::Start => Span::try_new(*to, cur.span.end)?,
                    Edge::End => Span::try_new(cur.span.start, *to)?,
                };
                validate_span(&span)?;
                self.rescheduled(cur, cur.vehicle_id, cur.driver_id, span, now)
            }
            Change::Reassign { id, vehicle, driver } => {
                let cur = self.existing(id)?;
                check_reschedule(*id, cur.status, "reassign")?;
                let vehicle_id = vehicle.unwrap_or(cur.vehicle_id);
                let driver_id = match driver {
                    DriverChange::Keep => cur.driver_id,
                    DriverChange::Assign(d) => Some(*d),
                    DriverChange::Unassign => None,
                };
                self.rescheduled(cur, vehicle_id, driver_id, cur.span, now)
            }
            Change::Transition { id, to } => {
                let cur = self.existing(id)?;
                check_transition(*id, cur.status, *to)?;
                if !cur.status.is_binding() && to.is_binding() {
                    // draft → confirmed: the spatial check becomes binding here.
                    self.ensure_free(cur.vehicle_id, cur.driver_id, &cur.span, Some(*id), now)?;
                }
                let mut next = bumped(cur, now);
                next.status = *to;
                if *to != ReservationStatus::Draft {
                    next.hold_until = None;
                }
                Ok(next)
            }
            Change::Cancel { id } => {
                let cur = self.existing(id)?;
                check_transition(*id, cur.status, ReservationStatus::Cancelled)?;
                let mut next = bumped(cur, now);
                next.status = ReservationStatus::Cancelled;
                next.hold_until = None;
                Ok(next)
            }
        }
    }

    /// `VersionConflict` unless the stored version equals `expected`
    /// (`0` for a reservation that does not exist yet).
    pub fn check_version(&self, change: &Change, expected: u64) -> Result<(), EngineError> {
        let id = change.reservation_id();
        match (change, self.reservations.get(&id)) {
            (Change::Create(_), Some(_)) => Err(EngineError::AlreadyExists(id)),
            (Change::Create(_), None) if expected == 0 => Ok(()),
            (Change::Create(_), None) => Err(EngineError::VersionConflict {
                id,
                expected,
                actual: 0,
            }),
            (_, None) => Err(EngineError::NotFound(id)),
            (_, Some(cur)) if cur.version == expected => Ok(()),
            (_, Some(cur)) => Err(EngineError::VersionConflict {
                id,
                expected,
                actual: cur.version,
            }),
        }
    }

    fn propose_create(&self, new: &NewReservation, now: Ms) -> Result<Reservation, EngineError> {
        if self.reservations.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if !new.status.is_initial() {
            return Err(EngineError::InvalidTransition {
                id: new.id,
                from: new.status,
                attempted: "create",
            });
        }
        validate_span(&new.span)?;
        validate_customer(new.customer.as_deref())?;
        self.vehicle_index(&new.vehicle_id)?;
        if let Some(driver_id) = &new.driver_id {
            self.driver_index(driver_id)?;
        }
        if new.status.is_binding() {
            self.ensure_free(new.vehicle_id, new.driver_id, &new.span, None, now)?;
        }
        Ok(Reservation {
            id: new.id,
            vehicle_id: new.vehicle_id,
            driver_id: new.driver_id,
            span: new.span,
            status: new.status,
            customer: new.customer.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
            hold_until: if new.status == ReservationStatus::Draft {
                new.hold_until
            } else {
                None
            },
        })
    }

    /// Shared tail of move/resize/reassign.
    fn rescheduled(
        &self,
        cur: &Reservation,
        vehicle_id: ResourceId,
        driver_id: Option<ResourceId>,
        span: Span,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        if span == cur.span && vehicle_id == cur.vehicle_id && driver_id == cur.driver_id {
            return Ok(cur.clone());
        }
        self.vehicle_index(&vehicle_id)?;
        if let Some(driver_id) = &driver_id {
            self.driver_index(driver_id)?;
        }
        if cur.status.is_binding() {
            self.ensure_free(vehicle_id, driver_id, &span, Some(cur.id), now)?;
        }
        let mut next = bumped(cur, now);
        next.vehicle_id = vehicle_id;
        next.driver_id = driver_id;
        next.span = span;
        Ok(next)
    }
}

fn bumped(cur: &Reservation, now: Ms) -> Reservation {
    let mut next = cur.clone();
    next.version = cur.version + 1;
    next.updated_at = now;
    next
}
