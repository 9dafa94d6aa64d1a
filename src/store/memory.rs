use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::engine::{Schedule, now_ms};
use crate::lifecycle::ReservationStatus;
use crate::limits::MAX_RESOURCES_PER_SCOPE;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;

use super::{Committed, Rejection, ReservationStore, ResourceDirectory, Scope};

/// Authoritative store held in memory. Every change is re-validated with the
/// same `Schedule` the sessions use; one write lock serializes commits, so
/// the first accepted change wins.
pub struct InMemoryStore {
    schedule: RwLock<Schedule>,
    scopes: DashMap<Scope, Vec<ResourceInfo>>,
    notify: Arc<NotifyHub>,
    config: SchedulerConfig,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            schedule: RwLock::new(Schedule::new()),
            scopes: DashMap::new(),
            notify: Arc::new(NotifyHub::new()),
            config,
        }
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    /// Registers a vehicle or driver under `scope`.
    pub async fn add_resource(&self, scope: &Scope, info: ResourceInfo) -> Result<(), Rejection> {
        {
            let mut listed = self.scopes.entry(scope.clone()).or_default();
            if listed.iter().any(|r| r.id == info.id) {
                return Ok(());
            }
            if listed.len() >= MAX_RESOURCES_PER_SCOPE {
                return Err(Rejection::Invalid(format!("too many resources in scope {scope}")));
            }
            listed.push(info.clone());
        }
        self.schedule.write().await.register(&info);
        Ok(())
    }

    /// Installs a record as-is, bypassing versions and the lifecycle.
    /// Used for bootstrapping and tests.
    pub async fn seed(&self, record: Reservation) -> Result<(), Rejection> {
        let vehicle_id = record.vehicle_id;
        self.schedule.write().await.replace(record.clone())?;
        self.notify.send(vehicle_id, &record);
        Ok(())
    }

    pub async fn get(&self, id: &ReservationId) -> Option<Reservation> {
        self.schedule.read().await.get(id).cloned()
    }

    /// Every record, sorted by id.
    pub async fn reservations(&self) -> Vec<Reservation> {
        let schedule = self.schedule.read().await;
        let mut out: Vec<_> = schedule.reservations().cloned().collect();
        out.sort_by_key(|r| r.id);
        out
    }

    /// Drafts whose hold has run out, with the version to cancel against.
    pub async fn expired_drafts(&self, now: Ms) -> Vec<(ReservationId, u64)> {
        self.schedule.read().await.expired_drafts(now)
    }

    pub async fn free_ranges(&self, vehicle_id: &ResourceId, window: &Span) -> Result<Vec<Span>, Rejection> {
        Ok(self.schedule.read().await.free_ranges(vehicle_id, window, now_ms())?)
    }

    pub async fn available_vehicles(&self, span: &Span) -> Result<Vec<ResourceId>, Rejection> {
        Ok(self.schedule.read().await.available_vehicles(span, now_ms())?)
    }

    fn scope_vehicles(&self, scope: &Scope) -> Vec<ResourceId> {
        self.scopes
            .get(scope)
            .map(|listed| {
                listed
                    .iter()
                    .filter(|r| r.kind == ResourceKind::Vehicle)
                    .map(|r| r.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn stamp_hold(&self, change: &mut Change, now: Ms) {
        if let Change::Create(new) = change
            && new.status == ReservationStatus::Draft
            && new.hold_until.is_none()
        {
            new.hold_until = Some(self.config.hold_deadline(now));
        }
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn fetch_reservations(
        &self,
        vehicles: &[ResourceId],
        window: Span,
    ) -> Result<Vec<Reservation>, Rejection> {
        Ok(self.schedule.read().await.reservations_in(vehicles, &window))
    }

    async fn submit_change(&self, mut change: Change, expected_version: u64) -> Result<Committed, Rejection> {
        let now = now_ms();
        self.stamp_hold(&mut change, now);
        let label = change.label();
        let id = change.reservation_id();

        let mut schedule = self.schedule.write().await;
        let prev_vehicle = schedule.get(&id).map(|r| r.vehicle_id);
        let result = schedule.apply_versioned(change, expected_version, now);
        drop(schedule);

        match result {
            Ok(record) => {
                metrics::counter!(observability::STORE_COMMITS_TOTAL, "change" => label, "outcome" => "accepted")
                    .increment(1);
                debug!("committed {label} {id} at v{}", record.version);
                self.notify
                    .send_moved(prev_vehicle.unwrap_or(record.vehicle_id), &record);
                Ok(Committed { reservation: record })
            }
            Err(e) => {
                metrics::counter!(observability::STORE_COMMITS_TOTAL, "change" => label, "outcome" => e.label())
                    .increment(1);
                debug!("rejected {label} {id}: {e}");
                Err(e.into())
            }
        }
    }

    fn subscribe(&self, vehicle_id: ResourceId) -> Option<broadcast::Receiver<Reservation>> {
        Some(self.notify.subscribe(vehicle_id))
    }
}

#[async_trait]
impl ResourceDirectory for InMemoryStore {
    async fn list_resources(&self, scope: &Scope) -> Result<Vec<ResourceInfo>, Rejection> {
        Ok(self.scopes.get(scope).map(|r| r.value().clone()).unwrap_or_default())
    }

    async fn blackouts(&self, scope: &Scope, window: Span) -> Result<Vec<Reservation>, Rejection> {
        let vehicles = self.scope_vehicles(scope);
        let schedule = self.schedule.read().await;
        Ok(schedule
            .reservations_in(&vehicles, &window)
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Blackout)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    /// 2030-01-01T00:00:00Z, safely in the future.
    const T0: Ms = 1_893_456_000_000;

    fn span(from_h: Ms, to_h: Ms) -> Span {
        Span::new(T0 + from_h * H, T0 + to_h * H)
    }

    async fn setup() -> (InMemoryStore, Scope, ResourceId) {
        let store = InMemoryStore::new();
        let scope = Scope::new("acme");
        let v = Ulid::new();
        store
            .add_resource(&scope, ResourceInfo { id: v, kind: ResourceKind::Vehicle, name: Some("V1".into()) })
            .await
            .unwrap();
        (store, scope, v)
    }

    fn create(vehicle: ResourceId, span: Span, status: ReservationStatus) -> Change {
        Change::Create(NewReservation {
            id: Ulid::new(),
            vehicle_id: vehicle,
            driver_id: None,
            span,
            status,
            customer: None,
            hold_until: None,
        })
    }

    #[tokio::test]
    async fn create_then_versioned_move() {
        let (store, _, v) = setup().await;
        let a = store
            .submit_change(create(v, span(9, 11), ReservationStatus::Confirmed), 0)
            .await
            .unwrap()
            .reservation;
        assert_eq!(a.version, 1);

        let moved = store
            .submit_change(Change::Move { id: a.id, span: span(8, 10) }, 1)
            .await
            .unwrap()
            .reservation;
        assert_eq!(moved.version, 2);

        let err = store
            .submit_change(Change::Move { id: a.id, span: span(12, 13) }, 1)
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::VersionConflict { id: a.id, expected: 1, actual: 2 });
    }

    #[tokio::test]
    async fn overlap_rejected_with_report() {
        let (store, _, v) = setup().await;
        let a = store
            .submit_change(create(v, span(9, 11), ReservationStatus::Confirmed), 0)
            .await
            .unwrap()
            .reservation;
        match store
            .submit_change(create(v, span(10, 12), ReservationStatus::Confirmed), 0)
            .await
        {
            Err(Rejection::OverlapConflict(report)) => assert_eq!(report.reservation_ids(), vec![a.id]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn commits_are_pushed_to_subscribers() {
        let (store, _, v) = setup().await;
        let mut rx = store.subscribe(v).unwrap();
        let a = store
            .submit_change(create(v, span(9, 11), ReservationStatus::Confirmed), 0)
            .await
            .unwrap()
            .reservation;
        assert_eq!(rx.recv().await.unwrap(), a);
    }

    #[tokio::test]
    async fn drafts_get_a_hold_deadline() {
        let (store, _, v) = setup().await;
        let before = now_ms();
        let d = store
            .submit_change(create(v, span(9, 11), ReservationStatus::Draft), 0)
            .await
            .unwrap()
            .reservation;
        let hold = d.hold_until.unwrap();
        assert!(hold >= before + 24 * H);
    }

    #[tokio::test]
    async fn blackouts_and_resources_are_scoped() {
        let (store, scope, v) = setup().await;
        let other = Scope::new("globex");
        let w = Ulid::new();
        store
            .add_resource(&other, ResourceInfo { id: w, kind: ResourceKind::Vehicle, name: None })
            .await
            .unwrap();

        store
            .submit_change(create(v, span(0, 24), ReservationStatus::Blackout), 0)
            .await
            .unwrap();
        store
            .submit_change(create(w, span(0, 24), ReservationStatus::Blackout), 0)
            .await
            .unwrap();
        store
            .submit_change(create(v, span(30, 31), ReservationStatus::Confirmed), 0)
            .await
            .unwrap();

        let listed = store.list_resources(&scope).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, v);

        let blackouts = store.blackouts(&scope, span(0, 48)).await.unwrap();
        assert_eq!(blackouts.len(), 1);
        assert_eq!(blackouts[0].vehicle_id, v);
        assert!(store.list_resources(&Scope::new("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_overlapping_commits_first_wins() {
        let (store, _, v) = setup().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let s = Span::new(T0 + 9 * H + i * 60_000, T0 + 11 * H);
                store.submit_change(create(v, s, ReservationStatus::Confirmed), 0).await
            }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(store.reservations().await.len(), 1);
    }
}
