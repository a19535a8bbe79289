use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, Utc};
use ulid::Ulid;

use moorage::clock::SystemClock;
use moorage::engine::{BookingRequest, Engine, ExpiryPolicy};
use moorage::model::{SlotKey, TimeOfDay, Window};
use moorage::notify::LogNotifier;

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
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

fn open_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("moorage_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    Arc::new(
        Engine::new(
            dir.join("moorage.wal"),
            ExpiryPolicy::default(),
            Arc::new(SystemClock),
            Arc::new(LogNotifier),
        )
        .expect("open engine"),
    )
}

fn hour_window(hour: u16) -> Window {
    let start = TimeOfDay::new(hour, 0).expect("valid hour");
    let end = TimeOfDay::new(hour + 1, 0).expect("valid hour");
    Window::new(start, end).expect("non-empty window")
}

/// Many actors race for the same hour on one resource; exactly one may win per hour.
async fn phase1_hot_slot(engine: &Arc<Engine>, key: SlotKey, actors: usize) {
    let start = Instant::now();
    let mut handles = Vec::new();
    for hour in 0..24u16 {
        for _ in 0..actors {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let t = Instant::now();
                let result = engine
                    .lock_slot(key, hour_window(hour), Ulid::new(), None)
                    .await;
                (result.is_ok(), t.elapsed())
            }));
        }
    }

    let mut wins = 0;
    let mut latencies = Vec::new();
    for handle in handles {
        let (won, elapsed) = handle.await.expect("task panicked");
        if won {
            wins += 1;
        }
        latencies.push(elapsed);
    }
    println!(
        "  {} attempts, {wins} locks placed in {:.2}s",
        latencies.len(),
        start.elapsed().as_secs_f64()
    );
    assert_eq!(wins, 24, "each hour must have exactly one winner");
    print_latency("lock_slot under contention", &mut latencies);
}

/// Independent resources book in parallel; throughput is bounded by WAL group commit.
async fn phase2_spread_bookings(engine: &Arc<Engine>, date: chrono::NaiveDate, resources: usize) {
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..resources {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let resource_id = Ulid::new();
            let mut latencies = Vec::new();
            for hour in 6..20u16 {
                let request = BookingRequest {
                    customer_id: Ulid::new(),
                    employee_id: Ulid::new(),
                    resource_id,
                    date,
                    window: hour_window(hour),
                    quoted_amount: 1000,
                    contact: None,
                };
                let t = Instant::now();
                engine.create_booking(request).await.expect("uncontended booking");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for handle in handles {
        latencies.extend(handle.await.expect("task panicked"));
    }
    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "  {} bookings in {elapsed:.2}s ({:.0}/s)",
        latencies.len(),
        latencies.len() as f64 / elapsed
    );
    print_latency("create_booking", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== moorage contention benchmark ===\n");
    let engine = open_engine();
    let date = Utc::now()
        .date_naive()
        .checked_add_days(Days::new(1))
        .expect("date in range");

    println!("[phase 1] hot slot contention");
    phase1_hot_slot(&engine, SlotKey::new(Ulid::new(), date), 32).await;

    println!("\n[phase 2] spread bookings");
    phase2_spread_bookings(&engine, date, 64).await;

    println!("\n[phase 3] sweep + compaction");
    let t = Instant::now();
    let swept = engine.sweep_expired().await.expect("sweep");
    println!("  swept {swept} records in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);
    let t = Instant::now();
    engine.compact_wal().await.expect("compact");
    println!("  compacted WAL in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);

    println!("\n=== benchmark complete ===");
}
