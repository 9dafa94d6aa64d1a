use crate::lifecycle::ReservationStatus;
use crate::model::*;

use super::availability::{covered_ms, free_within, intersect_intervals};
use super::conflict::validate_window;
use super::{EngineError, Schedule};

impl Schedule {
    /// All records on a vehicle (any status), in start order.
    pub fn reservations_on(&self, vehicle_id: &ResourceId) -> Vec<&Reservation> {
        let mut out: Vec<_> = self
            .reservations
            .values()
            .filter(|r| r.vehicle_id == *vehicle_id)
            .collect();
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }

    /// Records on the given vehicles whose range overlaps `window`.
    pub fn reservations_in(&self, vehicles: &[ResourceId], window: &Span) -> Vec<Reservation> {
        let mut out: Vec<_> = self
            .reservations
            .values()
            .filter(|r| vehicles.contains(&r.vehicle_id) && r.span.overlaps(window))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }

    /// Free sub-ranges of a vehicle inside `window`, as a booking made at
    /// `now` would see them.
    pub fn free_ranges(&self, vehicle_id: &ResourceId, window: &Span, now: Ms) -> Result<Vec<Span>, EngineError> {
        validate_window(window)?;
        let index = self.vehicle_index(vehicle_id)?;
        Ok(free_within(window, &index.blocking(window, now)))
    }

    /// Ranges inside `window` where both the vehicle and the driver are free.
    pub fn joint_free_ranges(
        &self,
        vehicle_id: &ResourceId,
        driver_id: &ResourceId,
        window: &Span,
        now: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let vehicle_free = self.free_ranges(vehicle_id, window, now)?;
        let driver = self.driver_index(driver_id)?;
        Ok(intersect_intervals(&vehicle_free, &free_within(window, &driver.blocking(window, now))))
    }

    /// Vehicles a booking for `span` made at `now` would fit on, sorted by id.
    pub fn available_vehicles(&self, span: &Span, now: Ms) -> Result<Vec<ResourceId>, EngineError> {
        validate_window(span)?;
        let mut ids: Vec<_> = self
            .vehicles
            .values()
            .filter(|ix| ix.blocking(span, now).is_empty())
            .map(|ix| ix.resource_id())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Share of `window` occupied by binding reservations, in `[0, 1]`.
    pub fn utilization(&self, vehicle_id: &ResourceId, window: &Span) -> Result<f64, EngineError> {
        validate_window(window)?;
        let index = self.vehicle_index(vehicle_id)?;
        let occupied: Vec<Span> = index.overlapping(window).iter().map(|s| s.span).collect();
        Ok(covered_ms(window, &occupied) as f64 / window.duration_ms() as f64)
    }

    /// Audit view: binding and completed records on a vehicle overlapping `window`.
    pub fn history(&self, vehicle_id: &ResourceId, window: &Span) -> Result<Vec<&Reservation>, EngineError> {
        let index = self.vehicle_index(vehicle_id)?;
        Ok(index
            .history(window)
            .iter()
            .filter_map(|slot| self.reservations.get(&slot.id))
            .collect())
    }

    /// Drafts whose hold ran out at or before `now`.
    pub fn expired_drafts(&self, now: Ms) -> Vec<(ReservationId, u64)> {
        let mut out: Vec<_> = self
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Draft)
            .filter(|r| r.hold_until.is_some_and(|h| h <= now))
            .map(|r| (r.id, r.version))
            .collect();
        out.sort();
        out
    }
}
