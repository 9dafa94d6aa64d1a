//! Interactive scheduling session.
//!
//! A session owns one `Schedule` for a visible window. Gestures are checked
//! against it with no I/O; committed changes are applied optimistically and
//! sent to the store on spawned tasks. Acknowledgements, pushed snapshots
//! and refetches come back over one channel and are folded in by
//! [`SchedulerSession::poll`] / [`SchedulerSession::next_event`].

mod pipeline;

pub use pipeline::CommitTicket;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::engine::{EngineError, Schedule, now_ms, validate_window};
use crate::model::*;
use crate::observability;
use crate::store::{Committed, Rejection, ReservationStore, ResourceDirectory, Scope};

use pipeline::Pipeline;

/// A session shared between tasks: one writer, many readers.
pub type SharedSession<S> = Arc<tokio::sync::RwLock<SchedulerSession<S>>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no gesture in progress on {0}")]
    NoGesture(ReservationId),
    #[error("a gesture is already in progress on {0}")]
    GestureInProgress(ReservationId),
    #[error(transparent)]
    Store(#[from] Rejection),
}

/// What happened on the timeline since the last poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The store accepted a change; `reservation` is the authoritative record.
    Committed {
        ticket: CommitTicket,
        reservation: Reservation,
    },
    /// A change was rolled back to the last acknowledged state. Retryable
    /// changes (timeouts, outages) may be resubmitted by the caller as-is.
    Reverted {
        ticket: CommitTicket,
        change: Change,
        reason: Rejection,
        retryable: bool,
    },
    /// A vehicle was rebuilt from an authoritative snapshot. `evicted` lists
    /// other vehicles that lost stale records on the driver overlay.
    Reconciled {
        vehicle_id: ResourceId,
        evicted: Vec<ResourceId>,
    },
    /// Someone else changed a visible reservation.
    Updated { reservation: Reservation },
}

/// Results of spawned store calls and subscriptions.
#[derive(Debug)]
enum Inbound {
    Ack {
        ticket: CommitTicket,
        outcome: Result<Committed, Rejection>,
        elapsed: std::time::Duration,
    },
    Snapshot {
        vehicle_id: ResourceId,
        result: Result<Vec<Reservation>, Rejection>,
    },
    Pushed(Reservation),
    Lagged(ResourceId),
}

#[derive(Debug, Clone)]
struct Gesture {
    origin: Reservation,
    conflict: bool,
}

pub struct SchedulerSession<S> {
    store: Arc<S>,
    scope: Scope,
    window: Span,
    config: SchedulerConfig,
    schedule: Schedule,
    resources: Vec<ResourceInfo>,
    gesture: Option<Gesture>,
    pipelines: HashMap<ReservationId, Pipeline>,
    next_seq: u64,
    pending: VecDeque<SessionEvent>,
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<Inbound>,
    subscriptions: Vec<JoinHandle<()>>,
}

impl<S> Drop for SchedulerSession<S> {
    fn drop(&mut self) {
        for handle in &self.subscriptions {
            handle.abort();
        }
    }
}

impl<S: ReservationStore + ResourceDirectory> SchedulerSession<S> {
    /// Load resources, reservations and blackouts for `window`.
    pub async fn open(
        store: Arc<S>,
        scope: Scope,
        window: Span,
        config: SchedulerConfig,
    ) -> Result<Self, SessionError> {
        validate_window(&window)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = Self {
            store,
            scope,
            window,
            config,
            schedule: Schedule::new(),
            resources: Vec::new(),
            gesture: None,
            pipelines: HashMap::new(),
            next_seq: 1,
            pending: VecDeque::new(),
            tx,
            rx,
            subscriptions: Vec::new(),
        };
        session.load().await?;
        Ok(session)
    }

    pub fn into_shared(self) -> SharedSession<S> {
        Arc::new(tokio::sync::RwLock::new(self))
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn window(&self) -> Span {
        self.window
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn resources(&self) -> &[ResourceInfo] {
        &self.resources
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.schedule.get(id)
    }

    /// Reservations with a change sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_pending(&self, id: &ReservationId) -> bool {
        self.pipelines.contains_key(id)
    }

    /// The record as it was when the current gesture began.
    pub fn gesture(&self) -> Option<&Reservation> {
        self.gesture.as_ref().map(|g| &g.origin)
    }

    /// Everything visible, ordered by vehicle then start.
    pub fn views(&self) -> Vec<ReservationView> {
        let mut out: Vec<_> = self
            .schedule
            .reservations()
            .map(|r| ReservationView {
                id: r.id,
                vehicle_id: r.vehicle_id,
                driver_id: r.driver_id,
                span: r.span,
                status: r.status,
                version: r.version,
                conflict: self
                    .gesture
                    .as_ref()
                    .is_some_and(|g| g.origin.id == r.id && g.conflict),
            })
            .collect();
        out.sort_by_key(|v| (v.vehicle_id, v.span.start, v.id));
        out
    }

    // ── Gestures ─────────────────────────────────────────────

    pub fn begin_gesture(&mut self, id: ReservationId) -> Result<(), SessionError> {
        if let Some(g) = &self.gesture
            && g.origin.id != id
        {
            return Err(SessionError::GestureInProgress(g.origin.id));
        }
        let origin = self
            .schedule
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        debug!("gesture begins on {id}");
        self.gesture = Some(Gesture { origin, conflict: false });
        Ok(())
    }

    /// Would moving `id` to `span` be accepted? Reads the index only.
    pub fn preview_move(&mut self, id: ReservationId, span: Span) -> Result<(), EngineError> {
        let result = self
            .schedule
            .propose(&Change::Move { id, span }, now_ms())
            .map(|_| ());
        if let Some(g) = self.gesture.as_mut()
            && g.origin.id == id
        {
            g.conflict = result.is_err();
        }
        result
    }

    /// Read-only check of any change against the current view.
    pub fn preview(&self, change: &Change) -> Result<Reservation, EngineError> {
        self.schedule.propose(change, now_ms())
    }

    pub fn abort_gesture(&mut self, id: ReservationId) -> Result<(), SessionError> {
        match &self.gesture {
            Some(g) if g.origin.id == id => {
                debug!("gesture aborted on {id}");
                self.gesture = None;
                Ok(())
            }
            _ => Err(SessionError::NoGesture(id)),
        }
    }

    /// Ends the gesture by moving `id` to `span` optimistically and sending
    /// the move to the store. A locally rejected move ends the gesture with
    /// nothing changed.
    pub fn commit_gesture(&mut self, id: ReservationId, span: Span) -> Result<CommitTicket, SessionError> {
        match &self.gesture {
            Some(g) if g.origin.id == id => {}
            _ => return Err(SessionError::NoGesture(id)),
        }
        self.gesture = None;
        self.submit(Change::Move { id, span })
    }

    // ── Inbound ──────────────────────────────────────────────

    /// Fold in everything that has arrived and return the resulting events.
    /// Never blocks.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg);
        }
        self.pending.drain(..).collect()
    }

    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let msg = self.rx.recv().await?;
            self.handle(msg);
        }
    }

    fn handle(&mut self, msg: Inbound) {
        match msg {
            Inbound::Ack { ticket, outcome, elapsed } => self.on_ack(ticket, outcome, elapsed),
            Inbound::Snapshot { vehicle_id, result } => match result {
                Ok(snapshot) => {
                    self.reconcile(vehicle_id, snapshot);
                }
                Err(e) => warn!("refetch of {vehicle_id} failed: {e}"),
            },
            Inbound::Pushed(record) => self.on_pushed(record),
            Inbound::Lagged(vehicle_id) => {
                debug!("missed pushes for {vehicle_id}; refetching");
                self.request_refresh(vehicle_id);
            }
        }
    }

    fn on_pushed(&mut self, record: Reservation) {
        if self.pipelines.contains_key(&record.id) {
            // Our own acknowledgement settles it.
            return;
        }
        let local = self.schedule.get(&record.id);
        if local.is_some_and(|l| l.version >= record.version) {
            return;
        }
        if !self.schedule.has_vehicle(&record.vehicle_id) {
            // Reassigned out of view.
            self.schedule.forget(&record.id);
            return;
        }
        if local.is_none() && !record.span.overlaps(&self.window) {
            return;
        }
        match self.schedule.replace(record.clone()) {
            Ok(()) => self.pending.push_back(SessionEvent::Updated { reservation: record }),
            Err(e) => {
                debug!("pushed {} does not fit local view ({e}); refetching", record.id);
                self.request_refresh(record.vehicle_id);
            }
        }
    }

    // ── Reconciliation ───────────────────────────────────────

    /// Rebuild one vehicle from an authoritative list. Returns the other
    /// vehicles that lost stale records and are being refetched.
    pub fn reconcile(&mut self, vehicle_id: ResourceId, snapshot: Vec<Reservation>) -> Vec<ResourceId> {
        for record in &snapshot {
            if let Some(pipeline) = self.pipelines.get_mut(&record.id) {
                pipeline.rebase(record.clone());
            }
        }
        let count = snapshot.len();
        let evicted = self.schedule.rebuild_vehicle(vehicle_id, snapshot);
        metrics::counter!(observability::RECONCILES_TOTAL).increment(1);
        info!("reconciled {vehicle_id}: {count} records, {} stale vehicles", evicted.len());
        for other in &evicted {
            self.request_refresh(*other);
        }
        if let Some(g) = &self.gesture
            && self.schedule.get(&g.origin.id).is_none()
        {
            self.gesture = None;
        }
        self.pending.push_back(SessionEvent::Reconciled {
            vehicle_id,
            evicted: evicted.clone(),
        });
        evicted
    }

    /// Fetch and reconcile one vehicle now.
    pub async fn refresh(&mut self, vehicle_id: ResourceId) -> Result<Vec<ResourceId>, SessionError> {
        let snapshot = self
            .store
            .fetch_reservations(&[vehicle_id], self.window)
            .await?;
        Ok(self.reconcile(vehicle_id, snapshot))
    }

    /// Tear the session down and rebuild it for `window`. Unacknowledged
    /// changes are forgotten; the reload shows whatever the store kept.
    pub async fn change_window(&mut self, window: Span) -> Result<(), SessionError> {
        validate_window(&window)?;
        for handle in self.subscriptions.drain(..) {
            handle.abort();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = tx;
        self.rx = rx;
        self.pipelines.clear();
        self.pending.clear();
        self.gesture = None;
        self.window = window;
        self.load().await
    }

    async fn load(&mut self) -> Result<(), SessionError> {
        let resources = self.store.list_resources(&self.scope).await?;
        let vehicles: Vec<ResourceId> = resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Vehicle)
            .map(|r| r.id)
            .collect();
        // Subscribe first: a commit landing between the fetch and the
        // subscription would otherwise never reach this session. Pushes
        // already reflected in the fetch are dropped by the version check.
        for vehicle_id in &vehicles {
            if let Some(rx) = self.store.subscribe(*vehicle_id) {
                self.subscriptions.push(forward(*vehicle_id, rx, self.tx.clone()));
            }
        }
        let mut records: HashMap<ReservationId, Reservation> = HashMap::new();
        let fetched = self.store.fetch_reservations(&vehicles, self.window).await?;
        let blackouts = self.store.blackouts(&self.scope, self.window).await?;
        for record in fetched.into_iter().chain(blackouts) {
            match records.get(&record.id) {
                Some(known) if known.version >= record.version => {}
                _ => {
                    records.insert(record.id, record);
                }
            }
        }
        info!(
            "session {} loaded {} vehicles, {} reservations",
            self.scope,
            vehicles.len(),
            records.len()
        );
        self.schedule.load(&resources, records.into_values().collect());
        self.resources = resources;
        Ok(())
    }

    fn request_refresh(&self, vehicle_id: ResourceId) {
        let store = self.store.clone();
        let tx = self.tx.clone();
        let window = self.window;
        tokio::spawn(async move {
            let result = store.fetch_reservations(&[vehicle_id], window).await;
            let _ = tx.send(Inbound::Snapshot { vehicle_id, result });
        });
    }
}

fn forward(
    vehicle_id: ResourceId,
    mut rx: broadcast::Receiver<Reservation>,
    tx: mpsc::UnboundedSender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = match rx.recv().await {
                Ok(record) => Inbound::Pushed(record),
                Err(broadcast::error::RecvError::Lagged(_)) => Inbound::Lagged(vehicle_id),
                Err(broadcast::error::RecvError::Closed) => return,
            };
            if tx.send(msg).is_err() {
                return;
            }
        }
    })
}
