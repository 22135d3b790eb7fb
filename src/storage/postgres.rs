use crate::models::{ExportBundle, IpStat, NewVisit, RecordedVisit, Summary, Visit};
use crate::storage::{DayWindow, Storage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgPool};
use std::time::Duration;

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .context("failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                id BIGSERIAL PRIMARY KEY,
                ip_address VARCHAR(45) NOT NULL,
                user_agent TEXT,
                referer VARCHAR(500),
                visit_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
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
                visit_count BIGINT NOT NULL DEFAULT 1,
                first_visit TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_visit TIMESTAMPTZ NOT NULL DEFAULT NOW()
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

        let visit_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO visits (ip_address, user_agent, referer, visit_time, screen_resolution, language)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(visit.ip_address.as_str())
        .bind(visit.user_agent.as_str())
        .bind(visit.referer.as_str())
        .bind(visit.visit_time)
        .bind(visit.screen_resolution.as_deref())
        .bind(visit.language.as_deref())
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert visit")?;

        sqlx::query(
            r#"
            INSERT INTO ip_stats (ip_address, visit_count, first_visit, last_visit)
            VALUES ($1, 1, $2, $2)
            ON CONFLICT (ip_address) DO UPDATE SET
                visit_count = ip_stats.visit_count + 1,
                last_visit = EXCLUDED.last_visit
            "#,
        )
        .bind(visit.ip_address.as_str())
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
            "SELECT visit_count FROM ip_stats WHERE ip_address = $1",
        )
        .bind(caller_ip)
        .fetch_optional(&mut *conn)
        .await?
        .unwrap_or(0);

        let today_visits = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM visits WHERE visit_time >= $1 AND visit_time < $2",
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
            LIMIT $1 OFFSET $2
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
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn export(&self) -> Result<ExportBundle> {
        let mut tx = self.pool.begin().await?;

        // Both reads must see the same snapshot
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

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

        sqlx::query("ALTER SEQUENCE visits_id_seq RESTART WITH 1")
            .execute(&mut *tx)
            .await
            .context("failed to reset visit id sequence")?;

        tx.commit().await?;

        Ok(())
    }
}
