use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

pub const DEFAULT_USER_AGENT: &str = "unknown browser";
pub const DEFAULT_REFERER: &str = "direct access";

const MAX_IP_LEN: usize = 45;
const MAX_REFERER_LEN: usize = 500;
const MAX_SCREEN_RESOLUTION_LEN: usize = 20;
const MAX_LANGUAGE_LEN: usize = 10;

/// A row of the `visits` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visit {
    pub id: i64,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub visit_time: DateTime<Utc>,
    pub screen_resolution: Option<String>,
    pub language: Option<String>,
}

/// A row of the `ip_stats` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IpStat {
    pub ip_address: String,
    pub visit_count: i64,
    pub first_visit: DateTime<Utc>,
    pub last_visit: DateTime<Utc>,
}

/// Body of `POST /api/visit`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRequest {
    pub referer: Option<String>,
    pub screen_resolution: Option<String>,
    pub language: Option<String>,
}

impl VisitRequest {
    /// Parse a request body field by field. A field that is missing or not a
    /// string is treated as absent; a body that is not a JSON object yields an
    /// empty request.
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            referer: text("referer"),
            screen_resolution: text("screenResolution"),
            language: text("language"),
        }
    }
}

/// A visit ready to be written, with defaults applied and column limits enforced.
#[derive(Debug, Clone)]
pub struct NewVisit {
    pub ip_address: String,
    pub user_agent: String,
    pub referer: String,
    pub screen_resolution: Option<String>,
    pub language: Option<String>,
    pub visit_time: DateTime<Utc>,
}

impl NewVisit {
    pub fn new(ip: &str, user_agent: Option<&str>, request: VisitRequest) -> Self {
        let user_agent = user_agent
            .filter(|ua| !ua.is_empty())
            .unwrap_or(DEFAULT_USER_AGENT)
            .to_string();
        let referer = request
            .referer
            .filter(|r| !r.is_empty())
            .map(|r| truncate(&r, MAX_REFERER_LEN))
            .unwrap_or_else(|| DEFAULT_REFERER.to_string());

        Self {
            ip_address: truncate(ip, MAX_IP_LEN),
            user_agent,
            referer,
            screen_resolution: request
                .screen_resolution
                .map(|s| truncate(&s, MAX_SCREEN_RESOLUTION_LEN)),
            language: request.language.map(|l| truncate(&l, MAX_LANGUAGE_LEN)),
            visit_time: Utc::now(),
        }
    }
}

/// Result of recording a visit.
#[derive(Debug, Clone)]
pub struct RecordedVisit {
    pub visit_id: i64,
    pub ip: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counters backing `GET /api/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total_visits: i64,
    pub unique_ips: i64,
    pub your_visits: i64,
    pub today_visits: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub total_visits: usize,
    #[serde(rename = "uniqueIPs")]
    pub unique_ips: usize,
    pub date_range: DateRange,
}

/// Full dump of both tables.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub export_time: DateTime<Utc>,
    pub total_records: usize,
    pub visits: Vec<Visit>,
    pub ip_stats: Vec<IpStat>,
    pub summary: ExportSummary,
}

impl ExportBundle {
    /// Build a bundle from visits ordered newest first.
    pub fn new(visits: Vec<Visit>, ip_stats: Vec<IpStat>) -> Self {
        let date_range = DateRange {
            earliest: visits.last().map(|v| v.visit_time),
            latest: visits.first().map(|v| v.visit_time),
        };

        Self {
            export_time: Utc::now(),
            total_records: visits.len(),
            summary: ExportSummary {
                total_visits: visits.len(),
                unique_ips: ip_stats.len(),
                date_range,
            },
            visits,
            ip_stats,
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
