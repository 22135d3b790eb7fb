use crate::models::{ExportBundle, IpStat, NewVisit, RecordedVisit, Summary, Visit};
use crate::storage::{DayWindow, Storage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Connection, SqlitePool};
use std::time::Duration;

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let mut options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout);

        // An in-memory database lives exactly as long as its connection
        if database_url.contains(":memory:") {
            options = options.idle_timeout(None).max_lifetime(None);
        }

        let pool = options
            .connect(database_url)
            .await
            .with_context(|| format!("failed to connect to {database_url}"))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address VARCHAR(45) NOT NULL,
                user_agent TEXT,
                referer VARCHAR(500),
                visit_time DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%f+00:00', 'now')),
                screen_resolution VARCHAR(20),
                language VARCHAR(10)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create visits table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visits_ip ON visits(ip_address)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visits_time ON visits(visit_time)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ip_stats (
                ip_address VARCHAR(45) PRIMARY KEY,
                visit_count INTEGER NOT NULL DEFAULT 1,
                first_visit DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%f+00:00', 'now')),
                last_visit DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%f+00:00', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create ip_stats table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ip_stats_count ON ip_stats(visit_count)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn record_visit(&self, visit: &NewVisit) -> Result<RecordedVisit> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin visit transaction")?;

        let result = sqlx::query(
            r#"
            INSERT INTO visits (ip_address, user_agent, referer, visit_time, screen_resolution, language)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(visit.ip_address.as_str())
        .bind(visit.user_agent.as_str())
        .bind(visit.referer.as_str())
        .bind(visit.visit_time)
        .bind(visit.screen_resolution.as_deref())
        .bind(visit.language.as_deref())
        .execute(&mut *tx)
        .await
        .context("failed to insert visit")?;

        let visit_id = result.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO ip_stats (ip_address, visit_count, first_visit, last_visit)
            VALUES (?, 1, ?, ?)
            ON CONFLICT (ip_address) DO UPDATE SET
                visit_count = ip_stats.visit_count + 1,
                last_visit = excluded.last_visit
            "#,
        )
        .bind(visit.ip_address.as_str())
        .bind(visit.visit_time)
        .bind(visit.visit_time)
        .execute(&mut *tx)
        .await
        .context("failed to update ip stats")?;

        tx.commit().await?;

        Ok(RecordedVisit {
            visit_id,
            ip: visit.ip_address.clone(),
            timestamp: visit.visit_time,
        })
    }

    async fn summary(&self, caller_ip: &str, today: DayWindow) -> Result<Summary> {
        let mut conn = self.pool.acquire().await?;

        let total_visits = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM visits")
            .fetch_one(&mut *conn)
            .await?;

        let unique_ips =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT ip_address) FROM visits")
                .fetch_one(&mut *conn)
                .await?;

        let your_visits = sqlx::query_scalar::<_, i64>(
            "SELECT visit_count FROM ip_stats WHERE ip_address = ?",
        )
        .bind(caller_ip)
        .fetch_optional(&mut *conn)
        .await?
        .unwrap_or(0);

        let today_visits = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM visits WHERE visit_time >= ? AND visit_time < ?",
        )
        .bind(today.start)
        .bind(today.end)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Summary {
            total_visits,
            unique_ips,
            your_visits,
            today_visits,
        })
    }

    async fn logs(&self, limit: i64, offset: i64) -> Result<Vec<Visit>> {
        let visits = sqlx::query_as::<_, Visit>(
            r#"
            SELECT id, ip_address, user_agent, referer, visit_time, screen_resolution, language
            FROM visits
            ORDER BY visit_time DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(visits)
    }

    async fn ip_stats(&self, limit: i64) -> Result<Vec<IpStat>> {
        let stats = sqlx::query_as::<_, IpStat>(
            r#"
            SELECT ip_address, visit_count, first_visit, last_visit
            FROM ip_stats
            ORDER BY visit_count DESC, last_visit DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn export(&self) -> Result<ExportBundle> {
        let mut tx = self.pool.begin().await?;

        let visits = sqlx::query_as::<_, Visit>(
            r#"
            SELECT id, ip_address, user_agent, referer, visit_time, screen_resolution, language
            FROM visits
            ORDER BY visit_time DESC, id DESC
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .context("failed to read visits")?;

        let ip_stats = sqlx::query_as::<_, IpStat>(
            r#"
            SELECT ip_address, visit_count, first_visit, last_visit
            FROM ip_stats
            ORDER BY visit_count DESC, last_visit DESC
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .context("failed to read ip stats")?;

        tx.commit().await?;

        Ok(ExportBundle::new(visits, ip_stats))
    }

    async fn purge(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM visits")
            .execute(&mut *tx)
            .await
            .context("failed to delete visits")?;

        sqlx::query("DELETE FROM ip_stats")
            .execute(&mut *tx)
            .await
            .context("failed to delete ip stats")?;

        sqlx::query("DELETE FROM sqlite_sequence WHERE name = 'visits'")
            .execute(&mut *tx)
            .await
            .context("failed to reset visit id sequence")?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn memory_storage() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 1, Duration::from_secs(5))
            .await
            .unwrap();
        storage.init().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_rows_written_outside_the_service_get_timestamps() {
        let storage = memory_storage().await;
        let before = Utc::now() - chrono::Duration::seconds(1);

        sqlx::query("INSERT INTO visits (ip_address, user_agent, referer) VALUES (?, ?, ?)")
            .bind("203.0.113.7")
            .bind("sqlite3 shell")
            .bind("direct access")
            .execute(&storage.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO ip_stats (ip_address) VALUES (?)")
            .bind("203.0.113.7")
            .execute(&storage.pool)
            .await
            .unwrap();

        let after = Utc::now() + chrono::Duration::seconds(1);

        let logs = storage.logs(10, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].visit_time > before && logs[0].visit_time < after);

        let stats = storage.ip_stats(10).await.unwrap();
        assert_eq!(stats[0].visit_count, 1);
        assert!(stats[0].first_visit > before && stats[0].last_visit < after);
    }

    #[tokio::test]
    async fn test_defaulted_rows_sort_with_service_rows() {
        let storage = memory_storage().await;

        let mut older = NewVisit::new("198.51.100.1", None, Default::default());
        older.visit_time = Utc::now() - chrono::Duration::hours(1);
        storage.record_visit(&older).await.unwrap();

        sqlx::query("INSERT INTO visits (ip_address) VALUES (?)")
            .bind("203.0.113.7")
            .execute(&storage.pool)
            .await
            .unwrap();

        let logs = storage.logs(10, 0).await.unwrap();
        let ips: Vec<&str> = logs.iter().map(|v| v.ip_address.as_str()).collect();
        assert_eq!(ips, vec!["203.0.113.7", "198.51.100.1"]);
    }
}
