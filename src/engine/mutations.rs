use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::lifecycle::Occupancy;
use crate::model::*;
use crate::observability;

use super::{EngineError, Schedule, validate_span};

impl Schedule {
    /// `propose` + commit. Either every index reflects the new state or
    /// nothing changed.
    pub fn apply(&mut self, change: Change, now: Ms) -> Result<Reservation, EngineError> {
        let label = change.label();
        let next = match self.propose(&change, now) {
            Ok(next) => next,
            Err(e) => {
                metrics::counter!(observability::PROPOSALS_TOTAL, "change" => label, "outcome" => e.label())
                    .increment(1);
                return Err(e);
            }
        };
        let prev = self.reservations.get(&next.id).cloned();
        if prev.as_ref() != Some(&next) {
            self.commit(prev.as_ref(), &next)?;
            self.reservations.insert(next.id, next.clone());
        }
        metrics::counter!(observability::PROPOSALS_TOTAL, "change" => label, "outcome" => "accepted")
            .increment(1);
        Ok(next)
    }

    /// Version check, then `apply`. This is the store-side entry point.
    pub fn apply_versioned(
        &mut self,
        change: Change,
        expected_version: u64,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        self.check_version(&change, expected_version)?;
        self.apply(change, now)
    }

    /// Install an authoritative record as-is, replacing any local copy.
    /// All-or-nothing: if the record cannot be placed the previous state is
    /// kept and the overlap is returned. A malformed range is refused before
    /// anything is touched.
    pub fn replace(&mut self, record: Reservation) -> Result<(), EngineError> {
        validate_span(&record.span)?;
        if !self.vehicles.contains_key(&record.vehicle_id) {
            return Err(EngineError::UnknownResource(record.vehicle_id));
        }
        if let Some(driver_id) = record.driver_id {
            self.register_driver(driver_id);
        }
        let prev = self.reservations.get(&record.id).cloned();
        self.commit(prev.as_ref(), &record)?;
        self.reservations.insert(record.id, record);
        Ok(())
    }

    /// Drop a record and its slots. Used to undo an optimistic create.
    pub fn forget(&mut self, id: &ReservationId) -> Option<Reservation> {
        let record = self.reservations.remove(id)?;
        self.unplace(&record);
        Some(record)
    }

    /// Replace everything known about one vehicle with an authoritative
    /// snapshot. Local records elsewhere that collide with the snapshot on
    /// the driver overlay are evicted; the vehicles they sat on are returned
    /// so the caller can refresh them too.
    pub fn rebuild_vehicle(
        &mut self,
        vehicle_id: ResourceId,
        mut snapshot: Vec<Reservation>,
    ) -> Vec<ResourceId> {
        self.register_vehicle(vehicle_id);
        let local: Vec<ReservationId> = self
            .reservations
            .values()
            .filter(|r| r.vehicle_id == vehicle_id)
            .map(|r| r.id)
            .collect();
        for id in &local {
            self.forget(id);
        }
        for record in &snapshot {
            self.forget(&record.id);
        }
        if let Some(index) = self.vehicles.get_mut(&vehicle_id) {
            index.clear();
        }

        snapshot.sort_by_key(|r| r.span.start);
        let mut stale = BTreeSet::new();
        for record in snapshot {
            if record.vehicle_id != vehicle_id {
                warn!(
                    "snapshot for {vehicle_id} carries {} on {}; skipped",
                    record.id, record.vehicle_id
                );
                continue;
            }
            self.install(record, vehicle_id, &mut stale);
        }
        stale.remove(&vehicle_id);
        stale.into_iter().collect()
    }

    /// Reset to a full authoritative load.
    pub fn load(&mut self, resources: &[ResourceInfo], mut records: Vec<Reservation>) {
        self.clear();
        for resource in resources {
            self.register(resource);
        }
        records.sort_by_key(|r| r.span.start);
        for record in records {
            if !self.vehicles.contains_key(&record.vehicle_id) {
                debug!("skipping {} on unlisted vehicle {}", record.id, record.vehicle_id);
                continue;
            }
            if let Err(e) = self.replace(record.clone()) {
                warn!("load: dropping {}: {e}", record.id);
            }
        }
    }

    fn install(&mut self, record: Reservation, vehicle_id: ResourceId, stale: &mut BTreeSet<ResourceId>) {
        let id = record.id;
        let report = match self.replace(record.clone()) {
            Ok(()) => return,
            Err(EngineError::Overlap(report)) => report,
            Err(e) => {
                warn!("snapshot for {vehicle_id}: could not place {id}: {e}");
                return;
            }
        };
        let mut evicted = false;
        for collision in &report.collisions {
            let Some(owner) = self.reservations.get(&collision.reservation_id) else {
                continue;
            };
            if owner.vehicle_id == vehicle_id {
                // Two snapshot records collide; the store is inconsistent.
                warn!("snapshot for {vehicle_id}: {id} collides with {}", owner.id);
                return;
            }
            stale.insert(owner.vehicle_id);
            self.forget(&collision.reservation_id);
            evicted = true;
        }
        if evicted && let Err(e) = self.replace(record) {
            warn!("snapshot for {vehicle_id}: could not place {id}: {e}");
        }
    }

    fn commit(&mut self, prev: Option<&Reservation>, next: &Reservation) -> Result<(), EngineError> {
        if let Some(prev) = prev
            && stays_bound(prev, next)
            && self.is_placed(prev)
        {
            return self.shift(prev, next);
        }
        if let Some(prev) = prev {
            self.unplace(prev);
        }
        if let Err(e) = self.place(next) {
            if let Some(prev) = prev
                && let Err(restore) = self.place(prev) {
                    warn!("could not restore {} after failed commit: {restore}", prev.id);
                }
            return Err(e);
        }
        Ok(())
    }

    /// Binding before and after on the same vehicle and driver: move the
    /// slots in place on both axes.
    fn shift(&mut self, prev: &Reservation, next: &Reservation) -> Result<(), EngineError> {
        if prev.span == next.span {
            return Ok(());
        }
        self.vehicles
            .get_mut(&next.vehicle_id)
            .ok_or(EngineError::UnknownResource(next.vehicle_id))?
            .move_to(next.id, next.span)?;
        let Some(driver_id) = next.driver_id else {
            return Ok(());
        };
        let moved = match self.drivers.get_mut(&driver_id) {
            Some(driver) => driver.move_to(next.id, next.span),
            None => Err(EngineError::UnknownResource(driver_id)),
        };
        if moved.is_err()
            && let Some(vehicle) = self.vehicles.get_mut(&next.vehicle_id)
            && let Err(restore) = vehicle.move_to(next.id, prev.span)
        {
            warn!("could not restore {} after failed move: {restore}", prev.id);
        }
        moved
    }

    fn is_placed(&self, record: &Reservation) -> bool {
        self.vehicles
            .get(&record.vehicle_id)
            .is_some_and(|v| v.contains(&record.id))
            && record
                .driver_id
                .is_none_or(|d| self.drivers.get(&d).is_some_and(|ix| ix.contains(&record.id)))
    }

    fn place(&mut self, record: &Reservation) -> Result<(), EngineError> {
        let Some(occupancy) = record.status.occupancy() else {
            return Ok(());
        };
        let vehicle = self
            .vehicles
            .get_mut(&record.vehicle_id)
            .ok_or(EngineError::UnknownResource(record.vehicle_id))?;
        match occupancy {
            Occupancy::Retained => {
                vehicle.insert_retained(record.id, record.span);
                if let Some(driver_id) = record.driver_id
                    && let Some(driver) = self.drivers.get_mut(&driver_id) {
                        driver.insert_retained(record.id, record.span);
                    }
                Ok(())
            }
            Occupancy::Binding => {
                vehicle.insert(record.id, record.span)?;
                let Some(driver_id) = record.driver_id else {
                    return Ok(());
                };
                let placed = match self.drivers.get_mut(&driver_id) {
                    Some(driver) => driver.insert(record.id, record.span),
                    None => Err(EngineError::UnknownResource(driver_id)),
                };
                if placed.is_err()
                    && let Some(vehicle) = self.vehicles.get_mut(&record.vehicle_id) {
                        vehicle.remove(&record.id);
                    }
                placed
            }
        }
    }

    fn unplace(&mut self, record: &Reservation) {
        if let Some(vehicle) = self.vehicles.get_mut(&record.vehicle_id) {
            vehicle.remove(&record.id);
        }
        if let Some(driver_id) = record.driver_id
            && let Some(driver) = self.drivers.get_mut(&driver_id) {
                driver.remove(&record.id);
            }
    }
}

fn stays_bound(prev: &Reservation, next: &Reservation) -> bool {
    prev.status.occupancy() == Some(Occupancy::Binding)
        && next.status.occupancy() == Some(Occupancy::Binding)
        && prev.vehicle_id == next.vehicle_id
        && prev.driver_id == next.driver_id
}
