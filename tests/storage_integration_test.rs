//! Integration tests for the storage backends
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests
//! - By default, both backends are tested; PostgreSQL tests are skipped unless
//!   DATABASE_URL points at a PostgreSQL server

use chrono::{Duration as ChronoDuration, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use visitlog::models::{NewVisit, VisitRequest};
use visitlog::storage::{DayWindow, PostgresStorage, SqliteStorage, Storage};

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true,
    }
}

/// Helper to create SQLite test storage
async fn create_sqlite_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1, Duration::from_secs(5))
        .await
        .unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper to create PostgreSQL test storage, starting from empty tables
async fn create_postgres_storage() -> Option<Arc<dyn Storage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    if !db_url.starts_with("postgres") {
        return None;
    }
    let storage = PostgresStorage::new(&db_url, 5, Duration::from_secs(5))
        .await
        .ok()?;
    storage.init().await.ok()?;
    storage.purge().await.ok()?;
    Some(Arc::new(storage))
}

fn visit_from(ip: &str) -> NewVisit {
    NewVisit::new(ip, Some("storage-test"), VisitRequest::default())
}

fn utc_plus_8() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

async fn check_ip_stat_matches_visit_rows(storage: Arc<dyn Storage>) {
    for ip in ["1.2.3.4", "1.2.3.4", "5.6.7.8", "1.2.3.4"] {
        storage.record_visit(&visit_from(ip)).await.unwrap();
    }

    let stats = storage.ip_stats(50).await.unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].ip_address, "1.2.3.4");
    assert_eq!(stats[0].visit_count, 3);
    assert!(stats[0].first_visit <= stats[0].last_visit);
    assert_eq!(stats[1].ip_address, "5.6.7.8");
    assert_eq!(stats[1].visit_count, 1);
    assert_eq!(stats[1].first_visit, stats[1].last_visit);

    let summary = storage
        .summary("1.2.3.4", DayWindow::containing(Utc::now(), utc_plus_8()))
        .await
        .unwrap();
    assert_eq!(summary.total_visits, 4);
    assert_eq!(summary.unique_ips, 2);
    assert_eq!(summary.your_visits, 3);
    assert_eq!(summary.today_visits, 4);
}

async fn check_purge_resets_sequence(storage: Arc<dyn Storage>) {
    for ip in ["1.2.3.4", "5.6.7.8", "9.9.9.9"] {
        storage.record_visit(&visit_from(ip)).await.unwrap();
    }

    storage.purge().await.unwrap();

    assert!(storage.logs(100, 0).await.unwrap().is_empty());
    assert!(storage.ip_stats(100).await.unwrap().is_empty());

    let recorded = storage.record_visit(&visit_from("1.2.3.4")).await.unwrap();
    assert_eq!(recorded.visit_id, 1);
}

#[tokio::test]
async fn test_ip_stat_matches_visit_rows_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_ip_stat_matches_visit_rows(create_sqlite_storage().await).await;
}

#[tokio::test]
async fn test_purge_resets_sequence_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_purge_resets_sequence(create_sqlite_storage().await).await;
}

// Both checks share one PostgreSQL database, so they run sequentially in one test
#[tokio::test]
async fn test_postgres_backend() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        return;
    };
    check_ip_stat_matches_visit_rows(Arc::clone(&storage)).await;
    storage.purge().await.unwrap();
    check_purge_resets_sequence(storage).await;
}

#[tokio::test]
async fn test_init_is_idempotent_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    let storage = create_sqlite_storage().await;
    storage.record_visit(&visit_from("1.2.3.4")).await.unwrap();

    storage.init().await.unwrap();

    assert_eq!(storage.logs(10, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ping_and_close_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    let storage = create_sqlite_storage().await;
    storage.ping().await.unwrap();

    storage.close().await;

    assert!(storage.ping().await.is_err());
}

#[tokio::test]
async fn test_today_excludes_other_days_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    let storage = create_sqlite_storage().await;
    let now = Utc::now();

    let mut yesterday = visit_from("1.2.3.4");
    yesterday.visit_time = now - ChronoDuration::days(1);
    storage.record_visit(&yesterday).await.unwrap();

    let mut tomorrow = visit_from("1.2.3.4");
    tomorrow.visit_time = now + ChronoDuration::days(1);
    storage.record_visit(&tomorrow).await.unwrap();

    storage.record_visit(&visit_from("5.6.7.8")).await.unwrap();

    let summary = storage
        .summary("5.6.7.8", DayWindow::containing(now, utc_plus_8()))
        .await
        .unwrap();
    assert_eq!(summary.total_visits, 3);
    assert_eq!(summary.today_visits, 1);
    assert_eq!(summary.your_visits, 1);
}

#[tokio::test]
async fn test_logs_newest_first_with_offset_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    let storage = create_sqlite_storage().await;
    let base = Utc::now() - ChronoDuration::hours(1);

    // Insert out of chronological order
    for minutes in [10, 30, 20, 40] {
        let mut visit = visit_from(&format!("10.0.0.{minutes}"));
        visit.visit_time = base + ChronoDuration::minutes(minutes);
        storage.record_visit(&visit).await.unwrap();
    }

    let logs = storage.logs(2, 1).await.unwrap();
    let ips: Vec<&str> = logs.iter().map(|v| v.ip_address.as_str()).collect();
    assert_eq!(ips, vec!["10.0.0.30", "10.0.0.20"]);

    let all = storage.logs(100, 0).await.unwrap();
    assert!(all.windows(2).all(|w| w[0].visit_time >= w[1].visit_time));

    let past_end = storage.logs(10, 10).await.unwrap();
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn test_export_snapshot_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    let storage = create_sqlite_storage().await;
    let base = Utc::now() - ChronoDuration::hours(2);

    for (ip, minutes) in [("1.2.3.4", 0), ("5.6.7.8", 30), ("1.2.3.4", 60)] {
        let mut visit = visit_from(ip);
        visit.visit_time = base + ChronoDuration::minutes(minutes);
        storage.record_visit(&visit).await.unwrap();
    }

    let bundle = storage.export().await.unwrap();
    assert_eq!(bundle.total_records, 3);
    assert_eq!(bundle.total_records, bundle.visits.len());
    assert_eq!(bundle.summary.unique_ips, 2);
    assert_eq!(bundle.summary.date_range.earliest, Some(bundle.visits[2].visit_time));
    assert_eq!(bundle.summary.date_range.latest, Some(bundle.visits[0].visit_time));
    assert!(bundle.summary.date_range.earliest < bundle.summary.date_range.latest);
    assert_eq!(bundle.ip_stats[0].ip_address, "1.2.3.4");
}

#[tokio::test]
async fn test_concurrent_visits_keep_counts_consistent_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    let storage = create_sqlite_storage().await;

    let mut handles = vec![];
    for i in 0..20 {
        let storage_clone = Arc::clone(&storage);
        let ip = if i % 2 == 0 { "1.2.3.4" } else { "5.6.7.8" };
        handles.push(tokio::spawn(async move {
            storage_clone.record_visit(&visit_from(ip)).await
        }));
    }

    let mut ids = vec![];
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().visit_id);
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20, "Every visit should get a distinct id");

    let stats = storage.ip_stats(10).await.unwrap();
    let total: i64 = stats.iter().map(|s| s.visit_count).sum();
    assert_eq!(total, 20);
    assert!(stats.iter().all(|s| s.visit_count == 10));
}
