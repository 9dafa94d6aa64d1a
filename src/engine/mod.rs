mod availability;
mod conflict;
mod error;
mod mutations;
mod propose;
mod queries;

pub use availability::{covered_ms, free_within, intersect_intervals, subtract_intervals};
pub use conflict::{now_ms, validate_span};
pub(crate) use conflict::validate_window;
pub use error::EngineError;

use std::collections::HashMap;

use crate::index::{DriverIndex, IntervalIndex, VehicleIndex};
use crate::model::*;

/// The allocation engine: every reservation record plus one interval index
/// per vehicle and one per driver (the driver overlay).
///
/// `propose` is read-only; `apply` is `propose` followed by an all-or-nothing
/// commit into the indices. The same type backs a session's optimistic view
/// and the authoritative store.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    reservations: HashMap<ReservationId, Reservation>,
    vehicles: HashMap<ResourceId, VehicleIndex>,
    drivers: HashMap<ResourceId, DriverIndex>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource. Returns false if it was already known.
    pub fn register(&mut self, resource: &ResourceInfo) -> bool {
        match resource.kind {
            ResourceKind::Vehicle => self.register_vehicle(resource.id),
            ResourceKind::Driver => self.register_driver(resource.id),
        }
    }

    pub fn register_vehicle(&mut self, id: ResourceId) -> bool {
        if self.vehicles.contains_key(&id) {
            return false;
        }
        self.vehicles.insert(id, IntervalIndex::new(id));
        true
    }

    pub fn register_driver(&mut self, id: ResourceId) -> bool {
        if self.drivers.contains_key(&id) {
            return false;
        }
        self.drivers.insert(id, IntervalIndex::new(id));
        true
    }

    pub fn has_vehicle(&self, id: &ResourceId) -> bool {
        self.vehicles.contains_key(id)
    }

    pub fn has_driver(&self, id: &ResourceId) -> bool {
        self.drivers.contains_key(id)
    }

    pub fn vehicle(&self, id: &ResourceId) -> Option<&VehicleIndex> {
        self.vehicles.get(id)
    }

    pub fn driver(&self, id: &ResourceId) -> Option<&DriverIndex> {
        self.drivers.get(id)
    }

    pub fn vehicle_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.vehicles.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn driver_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.drivers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn clear(&mut self) {
        self.reservations.clear();
        self.vehicles.clear();
        self.drivers.clear();
    }

    fn vehicle_index(&self, id: &ResourceId) -> Result<&VehicleIndex, EngineError> {
        self.vehicles.get(id).ok_or(EngineError::UnknownResource(*id))
    }

    fn driver_index(&self, id: &ResourceId) -> Result<&DriverIndex, EngineError> {
        self.drivers.get(id).ok_or(EngineError::UnknownResource(*id))
    }

    fn existing(&self, id: &ReservationId) -> Result<&Reservation, EngineError> {
        self.reservations.get(id).ok_or(EngineError::NotFound(*id))
    }
}
