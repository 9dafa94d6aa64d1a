use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Reservation, ResourceId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-vehicle broadcast of committed reservation snapshots.
pub struct NotifyHub {
    channels: DashMap<ResourceId, broadcast::Sender<Reservation>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to snapshots for a vehicle. Creates the channel if needed.
    pub fn subscribe(&self, vehicle_id: ResourceId) -> broadcast::Receiver<Reservation> {
        let sender = self
            .channels
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a snapshot. No-op if nobody is listening.
    pub fn send(&self, vehicle_id: ResourceId, record: &Reservation) {
        if let Some(sender) = self.channels.get(&vehicle_id) {
            let _ = sender.send(record.clone());
        }
    }

    /// Publish on the old vehicle too when a reassign moved the record away.
    pub fn send_moved(&self, from: ResourceId, record: &Reservation) {
        if from != record.vehicle_id {
            self.send(from, record);
        }
        self.send(record.vehicle_id, record);
    }

    pub fn remove(&self, vehicle_id: &ResourceId) {
        self.channels.remove(vehicle_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ReservationStatus;
    use crate::model::Span;
    use ulid::Ulid;

    fn record(vehicle_id: ResourceId) -> Reservation {
        Reservation {
            id: Ulid::new(),
            vehicle_id,
            driver_id: None,
            span: Span::new(1_000, 2_000),
            status: ReservationStatus::Confirmed,
            customer: None,
            version: 1,
            created_at: 0,
            updated_at: 0,
            hold_until: None,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        let mut rx = hub.subscribe(vid);

        let r = record(vid);
        hub.send(vid, &r);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, r);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        // No subscriber, should not panic
        hub.send(vid, &record(vid));
    }

    #[tokio::test]
    async fn moved_record_reaches_both_vehicles() {
        let hub = NotifyHub::new();
        let (old, new) = (Ulid::new(), Ulid::new());
        let mut rx_old = hub.subscribe(old);
        let mut rx_new = hub.subscribe(new);

        let r = record(new);
        hub.send_moved(old, &r);
        assert_eq!(rx_old.recv().await.unwrap().id, r.id);
        assert_eq!(rx_new.recv().await.unwrap().id, r.id);
    }

    #[tokio::test]
    async fn removed_channel_closes_receivers() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        let mut rx = hub.subscribe(vid);
        hub.remove(&vid);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
