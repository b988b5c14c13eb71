use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveTime;
use futures::future::join_all;
use ulid::Ulid;

use slotkeep::config::Policy;
use slotkeep::engine::{BookingRequest, Engine, EngineError};
use slotkeep::model::*;
use slotkeep::notify::NotifyHub;

const HOUR: Ms = 3_600_000;
/// 2026-03-02T00:00:00Z
const DAY: Ms = 1_772_409_600_000;

fn wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("slotkeep.wal")
}

async fn open(path: PathBuf) -> Arc<Engine> {
    Arc::new(
        Engine::open(path, Policy::default(), Arc::new(NotifyHub::new()))
            .await
            .unwrap(),
    )
}

fn all_day() -> WorkingHours {
    WorkingHours::new(
        NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
    )
}

async fn user(engine: &Engine, role: Role) -> Ulid {
    let id = Ulid::new();
    let hours = (role != Role::Client).then(all_day);
    engine.create_user(id, None, role, hours).await.unwrap();
    id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn no_double_booking_under_load() {
    const SLOTS: u32 = 4;
    const STAFF: usize = 6;
    const CLIENTS: usize = 24;

    let path = wal_path();
    let engine = open(path.clone()).await;
    let workspace = Ulid::new();
    engine.create_workspace(workspace, None, SLOTS).await.unwrap();
    let service = Ulid::new();
    engine.create_service(service, workspace, None, HOUR, 100).await.unwrap();

    let mut staff = Vec::new();
    for _ in 0..STAFF {
        let id = user(&engine, Role::Employee).await;
        engine.assign_service(id, service).await.unwrap();
        staff.push(id);
    }
    let mut clients = Vec::new();
    for _ in 0..CLIENTS {
        clients.push(user(&engine, Role::Client).await);
    }

    // Every client asks every staff member for overlapping windows at once.
    let mut tasks = Vec::new();
    for (i, client) in clients.iter().enumerate() {
        for (j, staff_id) in staff.iter().enumerate() {
            let engine = engine.clone();
            let request = BookingRequest {
                client_id: *client,
                staff_id: *staff_id,
                service_id: service,
                start: DAY + 10 * HOUR + ((i + j) % 4) as Ms * 15 * 60_000,
            };
            tasks.push(tokio::spawn(async move { engine.book(request).await }));
        }
    }
    let results = join_all(tasks).await;

    let mut accepted = Vec::new();
    for result in results {
        match result.unwrap() {
            Ok(appt) => accepted.push(appt),
            Err(
                EngineError::AppointmentOverlap { .. } | EngineError::WorkSpaceNotAvailable { .. },
            ) => {}
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }
    assert!(!accepted.is_empty());
    assert_invariants(&accepted, SLOTS);

    // The same holds after a restart from the log.
    drop(engine);
    let engine = open(path).await;
    let restored: Vec<Appointment> = accepted
        .iter()
        .map(|a| engine.appointment(&a.id).unwrap())
        .collect();
    assert_eq!(restored, accepted);
}

/// No participant holds two colliding active appointments and no instant is
/// covered by more than `slots` of them.
fn assert_invariants(accepted: &[Appointment], slots: u32) {
    for (i, a) in accepted.iter().enumerate() {
        for b in &accepted[i + 1..] {
            if a.window.collides(&b.window) {
                assert_ne!(a.client_id, b.client_id, "client double-booked");
                assert_ne!(a.staff_id, b.staff_id, "staff double-booked");
            }
        }
        let concurrent = accepted.iter().filter(|b| b.window.collides(&a.window)).count();
        assert!(concurrent <= slots as usize, "workspace over capacity");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_changes_race_to_one_winner() {
    let engine = open(wal_path()).await;
    let workspace = Ulid::new();
    engine.create_workspace(workspace, None, 1).await.unwrap();
    let service = Ulid::new();
    engine.create_service(service, workspace, None, HOUR, 100).await.unwrap();
    let staff = user(&engine, Role::Employee).await;
    engine.assign_service(staff, service).await.unwrap();
    let client = user(&engine, Role::Client).await;
    let appt = engine
        .book(BookingRequest {
            client_id: client,
            staff_id: staff,
            service_id: service,
            start: DAY + 10 * HOUR,
        })
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.change_status(appt.id, AppointmentStatus::Completed).await })
        })
        .collect();
    let completed = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(completed, 1);

    let stats = engine.staff_stats(&staff).await.unwrap();
    assert_eq!((stats.profit, stats.completed), (100, 1));
}
