//! Optimistic commit pipeline.
//!
//! Per reservation at most one change is in flight; later changes queue
//! behind it and go out with the version from the previous acknowledgement.
//! The rollback point is always the last acknowledged record (`None` for a
//! create that was never acknowledged).

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::now_ms;
use crate::model::*;
use crate::observability;
use crate::store::{Committed, Rejection, ReservationStore, ResourceDirectory};

use super::{Inbound, SchedulerSession, SessionError, SessionEvent};

/// Identifies one submitted change. Acknowledgements carrying a ticket that
/// is no longer in flight are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CommitTicket {
    pub reservation_id: ReservationId,
    pub seq: u64,
}

#[derive(Debug)]
struct Queued {
    ticket: CommitTicket,
    change: Change,
}

#[derive(Debug)]
pub(super) struct Pipeline {
    acked: Option<Reservation>,
    in_flight: Queued,
    queued: VecDeque<Queued>,
    /// Vehicles the optimistic changes were applied on.
    touched: BTreeSet<ResourceId>,
}

impl Pipeline {
    /// An authoritative snapshot replaces the rollback point.
    pub(super) fn rebase(&mut self, record: Reservation) {
        self.acked = Some(record);
    }
}

impl<S: ReservationStore + ResourceDirectory> SchedulerSession<S> {
    /// Apply `change` locally and send it to the store. The local view
    /// changes immediately; the outcome arrives later as a `Committed` or
    /// `Reverted` event carrying the returned ticket.
    pub fn submit(&mut self, change: Change) -> Result<CommitTicket, SessionError> {
        let id = change.reservation_id();
        if let Some(g) = &self.gesture
            && g.origin.id == id
        {
            return Err(SessionError::GestureInProgress(id));
        }
        let before = self.schedule.get(&id).cloned();
        let after = self.schedule.apply(change.clone(), now_ms())?;
        let ticket = self.issue(id);

        if before.as_ref() == Some(&after) && !self.pipelines.contains_key(&id) {
            self.pending.push_back(SessionEvent::Committed {
                ticket,
                reservation: after,
            });
            return Ok(ticket);
        }

        if let Some(pipeline) = self.pipelines.get_mut(&id) {
            debug!("queued {} on {id} behind #{}", change.label(), pipeline.in_flight.ticket.seq);
            pipeline.touched.insert(after.vehicle_id);
            pipeline.queued.push_back(Queued { ticket, change });
            return Ok(ticket);
        }

        let expected = before.as_ref().map_or(0, |r| r.version);
        let in_flight = self.send(ticket, change, expected);
        self.pipelines.insert(
            id,
            Pipeline {
                acked: before,
                in_flight,
                queued: VecDeque::new(),
                touched: BTreeSet::from([after.vehicle_id]),
            },
        );
        Ok(ticket)
    }

    fn issue(&mut self, reservation_id: ReservationId) -> CommitTicket {
        let seq = self.next_seq;
        self.next_seq += 1;
        CommitTicket { reservation_id, seq }
    }

    fn send(&self, ticket: CommitTicket, change: Change, expected: u64) -> Queued {
        let store = self.store.clone();
        let tx = self.tx.clone();
        let timeout = self.config.commit_timeout;
        let label = change.label();
        metrics::counter!(observability::SESSION_COMMITS_TOTAL, "change" => label).increment(1);
        debug!("sending {label} #{} on {} at v{expected}", ticket.seq, ticket.reservation_id);

        let outgoing = change.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, store.submit_change(outgoing, expected)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Rejection::Unavailable(format!(
                    "no answer within {}ms",
                    timeout.as_millis()
                ))),
            };
            let _ = tx.send(Inbound::Ack {
                ticket,
                outcome,
                elapsed: started.elapsed(),
            });
        });
        Queued { ticket, change }
    }

    pub(super) fn on_ack(
        &mut self,
        ticket: CommitTicket,
        outcome: Result<Committed, Rejection>,
        elapsed: Duration,
    ) {
        let id = ticket.reservation_id;
        let current = self.pipelines.get(&id).map(|p| p.in_flight.ticket);
        if current != Some(ticket) {
            metrics::counter!(observability::STALE_ACKS_TOTAL).increment(1);
            debug!("discarding stale ack #{} on {id}", ticket.seq);
            return;
        }
        metrics::histogram!(observability::COMMIT_LATENCY_SECONDS).record(elapsed.as_secs_f64());
        match outcome {
            Ok(Committed { reservation }) => self.on_accepted(ticket, reservation),
            Err(reason) => self.on_rejected(ticket, reason),
        }
    }

    fn on_accepted(&mut self, ticket: CommitTicket, server: Reservation) {
        let id = ticket.reservation_id;
        self.pending.push_back(SessionEvent::Committed {
            ticket,
            reservation: server.clone(),
        });

        let next = match self.pipelines.get_mut(&id) {
            Some(pipeline) => {
                pipeline.acked = Some(server.clone());
                pipeline.queued.pop_front()
            }
            None => return,
        };
        if let Some(next) = next {
            let in_flight = self.send(next.ticket, next.change, server.version);
            if let Some(pipeline) = self.pipelines.get_mut(&id) {
                pipeline.in_flight = in_flight;
            }
            return;
        }

        self.pipelines.remove(&id);
        if self
            .schedule
            .get(&id)
            .is_some_and(|local| local.version > server.version)
        {
            metrics::counter!(observability::STALE_ACKS_TOTAL).increment(1);
            debug!("ack v{} on {id} is older than the local copy; kept local", server.version);
            return;
        }
        if let Err(e) = self.schedule.replace(server.clone()) {
            warn!("could not adopt committed {id}: {e}; refetching");
            self.schedule.forget(&id);
            self.request_refresh(server.vehicle_id);
        }
    }

    fn on_rejected(&mut self, ticket: CommitTicket, reason: Rejection) {
        let id = ticket.reservation_id;
        let Some(pipeline) = self.pipelines.remove(&id) else {
            return;
        };
        let retryable = reason.is_retryable();
        metrics::counter!(observability::SESSION_REVERTS_TOTAL, "reason" => reason.label()).increment(1);
        info!("{} #{} on {id} reverted: {reason}", pipeline.in_flight.change.label(), ticket.seq);

        let mut touched = pipeline.touched;
        if let Some(local) = self.schedule.get(&id) {
            touched.insert(local.vehicle_id);
        }
        self.rollback(id, pipeline.acked.as_ref());
        if let Some(acked) = &pipeline.acked {
            touched.insert(acked.vehicle_id);
        }

        for Queued { ticket, change } in std::iter::once(pipeline.in_flight).chain(pipeline.queued) {
            self.pending.push_back(SessionEvent::Reverted {
                ticket,
                change,
                reason: reason.clone(),
                retryable,
            });
        }

        // A timeout says nothing about the authoritative state.
        if !retryable {
            for vehicle_id in touched {
                if self.schedule.has_vehicle(&vehicle_id) {
                    self.request_refresh(vehicle_id);
                }
            }
        }
    }

    fn rollback(&mut self, id: ReservationId, acked: Option<&Reservation>) {
        let Some(acked) = acked else {
            self.schedule.forget(&id);
            return;
        };
        if let Err(e) = self.schedule.replace(acked.clone()) {
            warn!("rollback of {id} does not fit the local view ({e}); refetching");
            self.schedule.forget(&id);
            self.request_refresh(acked.vehicle_id);
        }
    }
}
