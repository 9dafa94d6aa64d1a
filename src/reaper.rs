use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::now_ms;
use crate::model::{Change, Ms};
use crate::observability;
use crate::store::{InMemoryStore, ReservationStore};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Background task that periodically cancels drafts whose hold ran out.
/// A zero period is raised to one millisecond.
pub async fn run_reaper(store: Arc<InMemoryStore>, every: Duration) {
    let mut interval = tokio::time::interval(every.max(MIN_PERIOD));
    loop {
        interval.tick().await;
        reap_expired(&store, now_ms()).await;
    }
}

/// One sweep. Returns how many drafts were cancelled.
pub async fn reap_expired(store: &InMemoryStore, now: Ms) -> usize {
    let mut reaped = 0;
    for (id, version) in store.expired_drafts(now).await {
        match store.submit_change(Change::Cancel { id }, version).await {
            Ok(_) => {
                info!("reaped expired draft {id}");
                metrics::counter!(observability::REAPED_DRAFTS_TOTAL).increment(1);
                reaped += 1;
            }
            Err(e) => {
                // Confirmed or edited since the scan; that's fine
                debug!("reaper skip {id}: {e}");
            }
        }
    }
    reaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ReservationStatus;
    use crate::model::*;
    use crate::store::Scope;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const T0: Ms = 1_893_456_000_000;

    async fn store_with_vehicle() -> (InMemoryStore, ResourceId) {
        let store = InMemoryStore::new();
        let v = Ulid::new();
        store
            .add_resource(&Scope::new("acme"), ResourceInfo { id: v, kind: ResourceKind::Vehicle, name: None })
            .await
            .unwrap();
        (store, v)
    }

    fn draft(vehicle_id: ResourceId, from_h: Ms, hold_until: Option<Ms>) -> Change {
        Change::Create(NewReservation {
            id: Ulid::new(),
            vehicle_id,
            driver_id: None,
            span: Span::new(T0 + from_h * H, T0 + (from_h + 2) * H),
            status: ReservationStatus::Draft,
            customer: None,
            hold_until,
        })
    }

    #[tokio::test]
    async fn reaper_cancels_expired_drafts_only() {
        let (store, v) = store_with_vehicle().await;
        let now = now_ms();

        let expired = store
            .submit_change(draft(v, 1, Some(now - 1_000)), 0)
            .await
            .unwrap()
            .reservation;
        let held = store
            .submit_change(draft(v, 4, Some(now + H)), 0)
            .await
            .unwrap()
            .reservation;

        assert_eq!(reap_expired(&store, now).await, 1);
        assert_eq!(store.get(&expired.id).await.unwrap().status, ReservationStatus::Cancelled);
        assert_eq!(store.get(&held.id).await.unwrap().status, ReservationStatus::Draft);

        // Nothing left to do.
        assert_eq!(reap_expired(&store, now).await, 0);
    }

    #[tokio::test]
    async fn confirmed_drafts_are_not_reaped() {
        let (store, v) = store_with_vehicle().await;
        let now = now_ms();
        let d = store
            .submit_change(draft(v, 1, Some(now - 1_000)), 0)
            .await
            .unwrap()
            .reservation;
        store
            .submit_change(Change::Transition { id: d.id, to: ReservationStatus::Confirmed }, 1)
            .await
            .unwrap();
        assert_eq!(reap_expired(&store, now).await, 0);
        assert_eq!(store.get(&d.id).await.unwrap().status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn zero_period_still_runs() {
        let (store, v) = store_with_vehicle().await;
        let d = store
            .submit_change(draft(v, 1, Some(now_ms() - 1_000)), 0)
            .await
            .unwrap()
            .reservation;
        let store = Arc::new(store);
        let task = tokio::spawn(run_reaper(store.clone(), Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        task.abort();
        assert_eq!(store.get(&d.id).await.unwrap().status, ReservationStatus::Cancelled);
    }
}
