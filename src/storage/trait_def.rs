use crate::models::{ExportBundle, IpStat, NewVisit, RecordedVisit, Summary, Visit};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};

/// Half-open UTC interval `[start, end)` covering one calendar day in a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// The calendar day containing `now` as observed in `offset`.
    pub fn containing(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local_midnight = now
            .with_timezone(&offset)
            .date_naive()
            .and_time(NaiveTime::MIN);
        let start_naive = local_midnight - Duration::seconds(i64::from(offset.local_minus_utc()));
        let start = start_naive.and_utc();

        Self {
            start,
            end: start + Duration::days(1),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Create the `visits` and `ip_stats` tables and their indexes if absent
    async fn init(&self) -> Result<()>;

    /// Acquire a connection, ping the server and release it
    async fn ping(&self) -> Result<()>;

    /// Close the pool, waiting for checked-out connections to be returned
    async fn close(&self);

    /// Insert a visit and bump the per-IP aggregate in one transaction
    async fn record_visit(&self, visit: &NewVisit) -> Result<RecordedVisit>;

    /// Total visits, distinct IPs, the caller's own count and the visits within `today`
    async fn summary(&self, caller_ip: &str, today: DayWindow) -> Result<Summary>;

    /// Visits newest first
    async fn logs(&self, limit: i64, offset: i64) -> Result<Vec<Visit>>;

    /// Per-IP aggregates ordered by visit count, then most recent visit
    async fn ip_stats(&self, limit: i64) -> Result<Vec<IpStat>>;

    /// Snapshot of both tables
    async fn export(&self) -> Result<ExportBundle>;

    /// Delete every row of both tables and restart the visit id sequence at 1
    async fn purge(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_window_in_positive_offset() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        // 2024-03-01 17:30 UTC is 2024-03-02 01:30 at +08:00
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 17, 30, 0).unwrap();

        let window = DayWindow::containing(now, offset);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 2, 16, 0, 0).unwrap());
    }

    #[test]
    fn test_day_window_in_utc() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let window = DayWindow::containing(now, offset);
        assert_eq!(window.start, now);
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_day_window_in_negative_offset() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        // 2024-03-01 03:00 UTC is 2024-02-29 22:00 at -05:00
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();

        let window = DayWindow::containing(now, offset);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 2, 29, 5, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap());
    }
}
