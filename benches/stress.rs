use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveTime;
use ulid::Ulid;

use slotkeep::config::Policy;
use slotkeep::engine::{BookingRequest, Engine};
use slotkeep::model::*;
use slotkeep::notify::NotifyHub;

const HOUR: i64 = 3_600_000; // 1 hour in ms
/// 2026-03-02T00:00:00Z
const DAY: i64 = 1_772_409_600_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn open_engine() -> Arc<Engine> {
    let dir: PathBuf = std::env::temp_dir().join(format!("slotkeep_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Engine::open(dir.join("slotkeep.wal"), Policy::default(), Arc::new(NotifyHub::new()))
        .await
        .unwrap();
    Arc::new(engine)
}

/// One bookable unit: a workspace, its service and one staff member.
#[derive(Clone, Copy)]
struct Chair {
    workspace: Ulid,
    service: Ulid,
    staff: Ulid,
}

async fn setup_chair(engine: &Engine, slots: u32) -> Chair {
    let workspace = Ulid::new();
    engine.create_workspace(workspace, None, slots).await.unwrap();
    let service = Ulid::new();
    engine.create_service(service, workspace, None, HOUR, 100).await.unwrap();
    let staff = Ulid::new();
    let hours = WorkingHours::new(
        NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
    );
    engine
        .create_user(staff, None, Role::Employee, Some(hours))
        .await
        .unwrap();
    engine.assign_service(staff, service).await.unwrap();
    Chair {
        workspace,
        service,
        staff,
    }
}

async fn new_client(engine: &Engine) -> Ulid {
    let id = Ulid::new();
    engine.create_user(id, None, Role::Client, None).await.unwrap();
    id
}

/// Back-to-back one-hour slots with a one-minute gap (touching windows collide).
fn slot_start(i: usize) -> Ms {
    DAY + (i as i64) * (HOUR + 60_000)
}

async fn phase1_sequential(engine: &Engine) {
    let chair = setup_chair(engine, 1).await;
    let client = new_client(engine).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        engine
            .book(BookingRequest {
                client_id: client,
                staff_id: chair.staff,
                service_id: chair.service,
                start: slot_start(i),
            })
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: &Arc<Engine>) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // Each task books its own chair so lanes never contend.
            let chair = setup_chair(&engine, 1).await;
            let client = new_client(&engine).await;
            for j in 0..n_per_task {
                engine
                    .book(BookingRequest {
                        client_id: client,
                        staff_id: chair.staff,
                        service_id: chair.service,
                        start: slot_start(j),
                    })
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended(engine: &Arc<Engine>) {
    let slots = 10;
    let contenders = 200;
    let chair = setup_chair(engine, slots).await;
    let mut staff = vec![chair.staff];
    for _ in 1..contenders {
        let id = Ulid::new();
        let hours = WorkingHours::new(
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        );
        engine.create_user(id, None, Role::Employee, Some(hours)).await.unwrap();
        engine.assign_service(id, chair.service).await.unwrap();
        staff.push(id);
    }

    let accepted = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for staff_id in staff {
        let engine = engine.clone();
        let accepted = accepted.clone();
        handles.push(tokio::spawn(async move {
            let client = new_client(&engine).await;
            let result = engine
                .book(BookingRequest {
                    client_id: client,
                    staff_id,
                    service_id: chair.service,
                    start: DAY + 10 * HOUR,
                })
                .await;
            if result.is_ok() {
                accepted.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let ok = accepted.load(Ordering::Relaxed);
    println!(
        "  {contenders} contenders for {slots} slots: {ok} accepted in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(ok, slots as usize, "workspace capacity violated");
    let running = engine
        .count_appointments_in_workspace(&chair.workspace, &Window::new(DAY + 10 * HOUR, DAY + 11 * HOUR))
        .await
        .unwrap();
    assert_eq!(running, slots as usize);
}

async fn phase4_read_under_load(engine: &Arc<Engine>) {
    let chair = setup_chair(engine, 1).await;
    let reader_client = new_client(engine).await;
    for i in 0..200 {
        engine
            .book(BookingRequest {
                client_id: reader_client,
                staff_id: chair.staff,
                service_id: chair.service,
                start: slot_start(i),
            })
            .await
            .unwrap();
    }

    // Writer tasks: continuously add bookings on their own chairs
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let chair = setup_chair(&engine, 1).await;
            let client = new_client(&engine).await;
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine
                    .book(BookingRequest {
                        client_id: client,
                        staff_id: chair.staff,
                        service_id: chair.service,
                        start: slot_start(i),
                    })
                    .await;
                i += 1;
            }
        }));
    }

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let probe = Window::new(slot_start(i % 200), slot_start(i % 200) + HOUR);
        let t = Instant::now();
        let _ = engine
            .exists_overlapping_appointment(&chair.staff, &probe, None)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }
    print_latency("overlap query latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== slotkeep stress benchmark ===");
    let engine = open_engine().await;

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(&engine).await;

    println!("\n[phase 3] contended workspace");
    phase3_contended(&engine).await;

    println!("\n[phase 4] query latency under write load");
    phase4_read_under_load(&engine).await;

    let summary = engine.summary().await;
    println!(
        "\n  final state: {} users, {} appointments ({} active)",
        summary.users, summary.appointments, summary.active
    );
    println!("\n=== benchmark complete ===");
}
