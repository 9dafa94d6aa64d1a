use std::collections::HashMap;
use std::marker::PhantomData;

use crate::engine::EngineError;
use crate::limits::MAX_RESERVATIONS_PER_RESOURCE;
use crate::model::*;

/// Marker for the resource axis an index belongs to.
pub trait IndexKind {
    const AXIS: ResourceKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vehicle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Driver;

impl IndexKind for Vehicle {
    const AXIS: ResourceKind = ResourceKind::Vehicle;
}

impl IndexKind for Driver {
    const AXIS: ResourceKind = ResourceKind::Driver;
}

pub type VehicleIndex = IntervalIndex<Vehicle>;
pub type DriverIndex = IntervalIndex<Driver>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub id: ReservationId,
    pub span: Span,
}

/// Occupied ranges of one resource.
///
/// Binding slots are sorted by `span.start` and pairwise disjoint, so their
/// ends are sorted too and an overlap query is two binary searches. Retained
/// slots (completed reservations) are kept apart for audit and never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalIndex<K> {
    resource_id: ResourceId,
    slots: Vec<Slot>,
    spans: HashMap<ReservationId, Span>,
    retained: Vec<Slot>,
    _kind: PhantomData<K>,
}

impl<K: IndexKind> IntervalIndex<K> {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            slots: Vec::new(),
            spans: HashMap::new(),
            retained: Vec::new(),
            _kind: PhantomData,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Binding slots in start order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn contains(&self, id: &ReservationId) -> bool {
        self.spans.contains_key(id)
    }

    pub fn span_of(&self, id: &ReservationId) -> Option<Span> {
        self.spans.get(id).copied()
    }

    /// Binding slots overlapping `query`.
    pub fn overlapping(&self, query: &Span) -> &[Slot] {
        // Everything before `lo` ends at or before query.start; everything at
        // or after `hi` starts at or after query.end.
        let lo = self.slots.partition_point(|s| s.span.end <= query.start);
        let hi = self.slots.partition_point(|s| s.span.start < query.end);
        &self.slots[lo..hi.max(lo)]
    }

    pub fn query(&self, query: &Span) -> Vec<ReservationId> {
        self.overlapping(query).iter().map(|s| s.id).collect()
    }

    /// Collisions `span` would have with binding slots, ignoring the slot
    /// owned by `exclude`.
    pub fn collisions(&self, span: &Span, exclude: Option<ReservationId>) -> ConflictReport {
        let collisions = self
            .overlapping(span)
            .iter()
            .filter(|s| Some(s.id) != exclude)
            .filter_map(|s| self.collision(s, span))
            .collect();
        ConflictReport { collisions }
    }

    /// Like [`collisions`](Self::collisions), but retained ranges that have
    /// not ended by `now` collide too. A vehicle returned early stays booked
    /// until the end of its range.
    pub fn collisions_at(&self, span: &Span, exclude: Option<ReservationId>, now: Ms) -> ConflictReport {
        let mut report = self.collisions(span, exclude);
        report.collisions.extend(
            self.unexpired_retained(span, now)
                .filter(|s| Some(s.id) != exclude)
                .filter_map(|s| self.collision(s, span)),
        );
        report
    }

    /// Retained slots overlapping `query` whose range ends after `now`.
    pub fn unexpired_retained(&self, query: &Span, now: Ms) -> impl Iterator<Item = &Slot> {
        let hi = self.retained.partition_point(|s| s.span.start < query.end);
        self.retained[..hi]
            .iter()
            .filter(move |s| s.span.end > now && s.span.end > query.start)
    }

    /// Ranges blocking new bookings inside `query` at `now`, in start order.
    pub fn blocking(&self, query: &Span, now: Ms) -> Vec<Span> {
        let mut spans: Vec<Span> = self.overlapping(query).iter().map(|s| s.span).collect();
        spans.extend(self.unexpired_retained(query, now).map(|s| s.span));
        spans.sort_by_key(|s| s.start);
        spans
    }

    pub fn insert(&mut self, id: ReservationId, span: Span) -> Result<(), EngineError> {
        if self.spans.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.slots.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        let report = self.collisions(&span, None);
        if !report.is_empty() {
            return Err(EngineError::Overlap(report));
        }
        self.insert_unchecked(Slot { id, span });
        Ok(())
    }

    /// Removes a binding or retained slot. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &ReservationId) -> Option<Slot> {
        if let Some(pos) = self.position(id) {
            self.spans.remove(id);
            return Some(self.slots.remove(pos));
        }
        let pos = self.retained.iter().position(|s| s.id == *id)?;
        Some(self.retained.remove(pos))
    }

    /// Atomic remove-then-conditional-insert. On collision the original slot
    /// is put back exactly where it was.
    pub fn move_to(&mut self, id: ReservationId, span: Span) -> Result<(), EngineError> {
        let pos = self.position(&id).ok_or(EngineError::NotFound(id))?;
        let original = self.slots.remove(pos);
        let report = self.collisions(&span, None);
        if !report.is_empty() {
            self.slots.insert(pos, original);
            return Err(EngineError::Overlap(report));
        }
        self.spans.remove(&id);
        self.insert_unchecked(Slot { id, span });
        Ok(())
    }

    /// Moves a binding slot into the audit history. Returns false if absent.
    /// Until its range ends the slot still counts in
    /// [`collisions_at`](Self::collisions_at).
    pub fn retire(&mut self, id: &ReservationId) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        self.spans.remove(id);
        let slot = self.slots.remove(pos);
        let at = self.retained.partition_point(|s| s.span.start <= slot.span.start);
        self.retained.insert(at, slot);
        true
    }

    /// Records an already-finished range straight into the history.
    pub fn insert_retained(&mut self, id: ReservationId, span: Span) {
        self.retained.retain(|s| s.id != id);
        let at = self.retained.partition_point(|s| s.span.start <= span.start);
        self.retained.insert(at, Slot { id, span });
    }

    /// Binding and retained slots overlapping `query`, in start order.
    pub fn history(&self, query: &Span) -> Vec<Slot> {
        let mut all: Vec<Slot> = self.overlapping(query).to_vec();
        all.extend(self.retained.iter().filter(|s| s.span.overlaps(query)).copied());
        all.sort_by_key(|s| s.span.start);
        all
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.spans.clear();
        self.retained.clear();
    }

    fn collision(&self, slot: &Slot, span: &Span) -> Option<Collision> {
        slot.span.intersection(span).map(|overlap| Collision {
            reservation_id: slot.id,
            resource_id: self.resource_id,
            axis: K::AXIS,
            overlap,
        })
    }

    fn position(&self, id: &ReservationId) -> Option<usize> {
        let span = self.spans.get(id)?;
        // Binding starts are unique because slots are disjoint.
        self.slots
            .binary_search_by_key(&span.start, |s| s.span.start)
            .ok()
            .filter(|&pos| self.slots[pos].id == *id)
    }

    fn insert_unchecked(&mut self, slot: Slot) {
        let pos = self.slots.partition_point(|s| s.span.start < slot.span.start);
        self.spans.insert(slot.id, slot.span);
        self.slots.insert(pos, slot);
    }
}
