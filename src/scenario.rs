//! JSON scenarios replayed against an [`InMemoryStore`].
//!
//! ```json
//! {
//!   "scope": "demo",
//!   "resources": [{ "id": "01J...", "kind": "vehicle", "name": "VW Polo" }],
//!   "steps": [
//!     { "change": { "op": "create", "id": "01J...", "vehicle_id": "01J...",
//!                   "span": { "start": 1767254400000, "end": 1767261600000 },
//!                   "status": "confirmed" } },
//!     { "change": { "op": "cancel", "id": "01J..." }, "expected_version": 1 }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::store::{InMemoryStore, Rejection, ReservationStore, Scope};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub scope: Scope,
    #[serde(default)]
    pub resources: Vec<ResourceInfo>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub change: Change,
    /// Defaults to the stored version, i.e. an unconditional change.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// One line of output per step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub step: usize,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub async fn load_resources(&self, store: &InMemoryStore) -> Result<(), Rejection> {
        for info in &self.resources {
            store.add_resource(&self.scope, info.clone()).await?;
        }
        Ok(())
    }

    /// Replay every step in order. Rejections are outcomes, not errors.
    pub async fn replay(&self, store: &InMemoryStore) -> Result<Vec<Outcome>, Rejection> {
        self.load_resources(store).await?;
        let mut out = Vec::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            let expected = match step.expected_version {
                Some(v) => v,
                None => store
                    .get(&step.change.reservation_id())
                    .await
                    .map_or(0, |r| r.version),
            };
            let result = store.submit_change(step.change.clone(), expected).await;
            out.push(Outcome {
                step: i,
                op: step.change.label(),
                reservation: result.as_ref().ok().map(|c| c.reservation.clone()),
                rejection: result.err(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const T0: Ms = 1_893_456_000_000;

    #[tokio::test]
    async fn replays_the_double_booking_case() {
        let v = Ulid::new();
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        let create = |id: Ulid, from: Ms, to: Ms| {
            serde_json::json!({
                "change": {
                    "op": "create",
                    "id": id,
                    "vehicle_id": v,
                    "span": { "start": T0 + from * H, "end": T0 + to * H },
                    "status": "confirmed"
                }
            })
        };
        let text = serde_json::json!({
            "scope": "demo",
            "resources": [{ "id": v, "kind": "vehicle" }],
            "steps": [create(a, 9, 11), create(b, 10, 12), create(c, 11, 12)]
        })
        .to_string();

        let scenario = Scenario::from_json(&text).unwrap();
        let store = InMemoryStore::new();
        let out = scenario.replay(&store).await.unwrap();

        assert_eq!(out.len(), 3);
        assert!(out[0].reservation.is_some());
        match &out[1].rejection {
            Some(Rejection::OverlapConflict(report)) => assert_eq!(report.reservation_ids(), vec![a]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(out[2].reservation.as_ref().unwrap().id, c);
    }

    #[tokio::test]
    async fn explicit_stale_version_is_rejected() {
        let v = Ulid::new();
        let a = Ulid::new();
        let text = serde_json::json!({
            "scope": "demo",
            "resources": [{ "id": v, "kind": "vehicle" }],
            "steps": [
                { "change": { "op": "create", "id": a, "vehicle_id": v,
                              "span": { "start": T0, "end": T0 + H }, "status": "draft" } },
                { "change": { "op": "cancel", "id": a }, "expected_version": 7 }
            ]
        })
        .to_string();
        let out = Scenario::from_json(&text)
            .unwrap()
            .replay(&InMemoryStore::new())
            .await
            .unwrap();
        assert!(matches!(
            out[1].rejection,
            Some(Rejection::VersionConflict { expected: 7, actual: 1, .. })
        ));
    }
}
