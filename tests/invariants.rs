use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ulid::Ulid;

use fleetslot::engine::{EngineError, Schedule};
use fleetslot::lifecycle::ReservationStatus;
use fleetslot::model::*;

const M: Ms = 60_000;
/// 2026-01-01T00:00:00Z
const T0: Ms = 1_767_225_600_000;
const DAY_MINUTES: i64 = 24 * 60;

struct World {
    schedule: Schedule,
    vehicles: Vec<ResourceId>,
    drivers: Vec<ResourceId>,
    ids: Vec<ReservationId>,
}

fn world() -> World {
    let mut schedule = Schedule::new();
    let vehicles: Vec<_> = (0..4).map(|_| Ulid::new()).collect();
    let drivers: Vec<_> = (0..3).map(|_| Ulid::new()).collect();
    for v in &vehicles {
        schedule.register_vehicle(*v);
    }
    for d in &drivers {
        schedule.register_driver(*d);
    }
    World { schedule, vehicles, drivers, ids: Vec::new() }
}

fn random_span(rng: &mut StdRng) -> Span {
    let start = rng.random_range(0..DAY_MINUTES - 30);
    let len = rng.random_range(15..=240);
    Span::new(T0 + start * M, T0 + (start + len).min(DAY_MINUTES) * M)
}

fn random_change(w: &World, rng: &mut StdRng) -> Change {
    let existing = (!w.ids.is_empty()).then(|| w.ids[rng.random_range(0..w.ids.len())]);
    let Some(id) = existing.filter(|_| rng.random_range(0..10) >= 3) else {
        let status = match rng.random_range(0..10) {
            0..=2 => ReservationStatus::Draft,
            3 => ReservationStatus::Blackout,
            _ => ReservationStatus::Confirmed,
        };
        let driver_id = rng
            .random_bool(0.6)
            .then(|| w.drivers[rng.random_range(0..w.drivers.len())]);
        return Change::Create(NewReservation {
            id: Ulid::new(),
            vehicle_id: w.vehicles[rng.random_range(0..w.vehicles.len())],
            driver_id,
            span: random_span(rng),
            status,
            customer: None,
            hold_until: None,
        });
    };
    match rng.random_range(0..6) {
        0 => Change::Move { id, span: random_span(rng) },
        1 => Change::Resize {
            id,
            edge: if rng.random_bool(0.5) { Edge::Start } else { Edge::End },
            to: T0 + rng.random_range(0..DAY_MINUTES) * M,
        },
        2 => Change::Reassign {
            id,
            vehicle: Some(w.vehicles[rng.random_range(0..w.vehicles.len())]),
            driver: match rng.random_range(0..3) {
                0 => DriverChange::Keep,
                1 => DriverChange::Unassign,
                _ => DriverChange::Assign(w.drivers[rng.random_range(0..w.drivers.len())]),
            },
        },
        3 => Change::Transition {
            id,
            to: match rng.random_range(0..3) {
                0 => ReservationStatus::Confirmed,
                1 => ReservationStatus::Active,
                _ => ReservationStatus::Completed,
            },
        },
        _ => Change::Cancel { id },
    }
}

/// Brute force over every pair of records. Every change runs at `T0`, so
/// completed ranges have not ended yet and still count.
fn blocks(r: &Reservation) -> bool {
    r.status.is_binding() || r.status == ReservationStatus::Completed
}

fn assert_no_overlaps(schedule: &Schedule) {
    let binding: Vec<&Reservation> = schedule.reservations().filter(|r| blocks(r)).collect();
    for (i, a) in binding.iter().enumerate() {
        for b in &binding[i + 1..] {
            if !a.span.overlaps(&b.span) {
                continue;
            }
            assert_ne!(a.vehicle_id, b.vehicle_id, "{} and {} share a vehicle", a.id, b.id);
            if let (Some(da), Some(db)) = (a.driver_id, b.driver_id) {
                assert_ne!(da, db, "{} and {} share a driver", a.id, b.id);
            }
        }
    }
}

/// Every index holds exactly the binding records placed on it.
fn assert_indices_match_records(w: &World) {
    for v in &w.vehicles {
        let mut indexed: Vec<_> = w.schedule.vehicle(v).unwrap().slots().iter().map(|s| s.id).collect();
        let mut expected: Vec<_> = w
            .schedule
            .reservations()
            .filter(|r| r.vehicle_id == *v && r.status.is_binding())
            .map(|r| r.id)
            .collect();
        indexed.sort();
        expected.sort();
        assert_eq!(indexed, expected, "vehicle index {v} out of sync");
    }
    for d in &w.drivers {
        let mut indexed: Vec<_> = w.schedule.driver(d).unwrap().slots().iter().map(|s| s.id).collect();
        let mut expected: Vec<_> = w
            .schedule
            .reservations()
            .filter(|r| r.driver_id == Some(*d) && r.status.is_binding())
            .map(|r| r.id)
            .collect();
        indexed.sort();
        expected.sort();
        assert_eq!(indexed, expected, "driver overlay {d} out of sync");
    }
}

#[test]
fn random_sequences_never_double_book() {
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut w = world();
        for _ in 0..400 {
            let change = random_change(&w, &mut rng);
            let before = w.schedule.clone();
            match w.schedule.apply(change.clone(), T0) {
                Ok(record) => {
                    if matches!(change, Change::Create(_)) {
                        w.ids.push(record.id);
                    }
                    let prev = before.get(&record.id);
                    if prev == Some(&record) {
                        continue;
                    }
                    let expected_version = prev.map_or(1, |p| p.version + 1);
                    assert_eq!(record.version, expected_version);
                }
                Err(_) => {
                    let id = change.reservation_id();
                    assert_eq!(w.schedule.get(&id), before.get(&id), "rejected {change:?} mutated the record");
                    for v in &w.vehicles {
                        assert_eq!(w.schedule.vehicle(v), before.vehicle(v), "rejected {change:?} touched {v}");
                    }
                    for d in &w.drivers {
                        assert_eq!(w.schedule.driver(d), before.driver(d), "rejected {change:?} touched {d}");
                    }
                }
            }
            assert_no_overlaps(&w.schedule);
        }
        assert_indices_match_records(&w);
    }
}

#[test]
fn conflict_reports_name_real_collisions() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut w = world();
    for _ in 0..500 {
        let change = random_change(&w, &mut rng);
        match w.schedule.apply(change.clone(), T0) {
            Ok(record) => {
                if matches!(change, Change::Create(_)) {
                    w.ids.push(record.id);
                }
            }
            Err(EngineError::Overlap(report)) => {
                assert!(!report.is_empty());
                for c in &report.collisions {
                    let other = w.schedule.get(&c.reservation_id).unwrap();
                    assert!(blocks(other));
                    assert_ne!(other.id, change.reservation_id());
                    assert!(other.span.contains_span(&c.overlap));
                }
            }
            Err(_) => {}
        }
    }
}
