use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that periodically removes expired locks and bookings.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep_expired().await {
            Ok(0) => {}
            Ok(n) => info!("swept {n} expired records"),
            Err(e) => warn!("sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            debug!("compactor: {appends} appends since last compaction");
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::ExpiryPolicy;
    use crate::model::*;
    use crate::notify::LogNotifier;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("moorage_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 4).unwrap()
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_locks() {
        let path = test_wal_path("sweeper_evicts.wal");
        let clock = Arc::new(ManualClock::new(TimeOfDay::MIDNIGHT.on(date())));
        let engine = Arc::new(
            Engine::new(path, ExpiryPolicy::default(), clock.clone(), Arc::new(LogNotifier))
                .unwrap(),
        );

        let key = SlotKey::new(Ulid::new(), date());
        let window = Window::parse("09:00", "10:00").unwrap();
        engine.lock_slot(key, window, Ulid::new(), Some(0)).await.unwrap();

        let handle = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.list_slots(key).await.len(), 1);

        clock.set(window.end().on(date()));
        let mut gone = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if engine.slot_set_count() == 0 {
                gone = true;
                break;
            }
        }
        handle.abort();
        assert!(gone, "expired lock was not swept");
    }

    #[tokio::test]
    async fn compactor_waits_for_threshold() {
        let path = test_wal_path("compactor_threshold.wal");
        let clock = Arc::new(ManualClock::new(TimeOfDay::MIDNIGHT.on(date())));
        let engine = Arc::new(
            Engine::new(path, ExpiryPolicy::default(), clock, Arc::new(LogNotifier)).unwrap(),
        );

        let key = SlotKey::new(Ulid::new(), date());
        let actor = Ulid::new();
        let window = Window::parse("09:00", "10:00").unwrap();
        for _ in 0..3 {
            engine.lock_slot(key, window, actor, None).await.unwrap();
            engine.release_slot(key, window, actor).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 6);

        let handle = tokio::spawn(run_compactor(engine.clone(), 100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert_eq!(engine.wal_appends_since_compact().await, 6);

        let handle = tokio::spawn(run_compactor(engine.clone(), 5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
