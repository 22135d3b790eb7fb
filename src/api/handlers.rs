use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{info, warn};

use super::error::ApiError;
use crate::client_ip::ClientIp;
use crate::models::{ExportBundle, IpStat, NewVisit, Visit, VisitRequest};
use crate::storage::{DayWindow, Storage};

pub const AVAILABLE_ENDPOINTS: [&str; 7] = [
    "GET /api/health",
    "GET /api/stats",
    "GET /api/logs",
    "POST /api/visit",
    "GET /api/ip-stats",
    "GET /api/export",
    "DELETE /api/logs",
];

const DEFAULT_LOG_LIMIT: i64 = 20;
const DEFAULT_IP_STATS_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 1000;
const USER_AGENT_LOG_CHARS: usize = 50;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    /// Offset defining the calendar day for "today" counts
    pub stats_offset: FixedOffset,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_visits: i64,
    #[serde(rename = "uniqueIPs")]
    pub unique_ips: i64,
    pub your_visits: i64,
    pub today_visits: i64,
    #[serde(rename = "currentIP")]
    pub current_ip: String,
    pub update_time: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundResponse {
    pub error: &'static str,
    pub message: String,
    pub available_endpoints: [&'static str; 7],
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct IpStatsQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub limit: Option<i64>,
}

/// `?limit=` from a form with a blank field means "use the default"
fn empty_string_as_none<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = Option::<String>::deserialize(de)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(de::Error::custom),
    }
}

fn page_limit(limit: Option<i64>, default: i64) -> Result<i64, ApiError> {
    match limit {
        None => Ok(default),
        Some(limit) if (1..=MAX_PAGE_LIMIT).contains(&limit) => Ok(limit),
        Some(limit) => Err(ApiError::InvalidParameter(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}, got {limit}"
        ))),
    }
}

fn page_offset(offset: Option<i64>) -> Result<i64, ApiError> {
    match offset {
        None => Ok(0),
        Some(offset) if offset >= 0 => Ok(offset),
        Some(offset) => Err(ApiError::InvalidParameter(format!(
            "offset must not be negative, got {offset}"
        ))),
    }
}

/// Health check endpoint, including a database round trip
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    match state.storage.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            message: "server is running",
            timestamp: Utc::now(),
            database: Some("connected"),
            error: None,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthResponse {
                    status: "error",
                    message: "database connection failed",
                    timestamp: Utc::now(),
                    database: None,
                    error: Some(format!("{e:#}")),
                }),
            )
                .into_response()
        }
    }
}

/// Record one visit for the calling client
pub async fn record_visit(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok());
    let visit = NewVisit::new(&ip, user_agent, VisitRequest::from_body(&body));

    match state.storage.record_visit(&visit).await {
        Ok(recorded) => {
            let ua_prefix: String = visit.user_agent.chars().take(USER_AGENT_LOG_CHARS).collect();
            info!(
                visit_id = recorded.visit_id,
                ip = %recorded.ip,
                user_agent = %ua_prefix,
                "recorded visit"
            );

            Json(VisitResponse {
                success: true,
                message: "visit recorded",
                visit_id: Some(recorded.visit_id),
                ip: Some(recorded.ip),
                timestamp: Some(recorded.timestamp),
                error: None,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(ip = %ip, error = %format!("{e:#}"), "failed to record visit");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(VisitResponse {
                    success: false,
                    message: "failed to record visit",
                    visit_id: None,
                    ip: None,
                    timestamp: None,
                    error: Some(format!("{e:#}")),
                }),
            )
                .into_response()
        }
    }
}

/// Aggregate counters plus the caller's own visit count
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> Result<Json<StatsResponse>, ApiError> {
    let now = Utc::now();
    let today = DayWindow::containing(now, state.stats_offset);

    let summary = state
        .storage
        .summary(&ip, today)
        .await
        .map_err(ApiError::storage("failed to get stats"))?;

    Ok(Json(StatsResponse {
        total_visits: summary.total_visits,
        unique_ips: summary.unique_ips,
        your_visits: summary.your_visits,
        today_visits: summary.today_visits,
        current_ip: ip,
        update_time: now,
    }))
}

/// Paginated visit log, newest first
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<Vec<Visit>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidParameter(e.body_text()))?;
    let limit = page_limit(query.limit, DEFAULT_LOG_LIMIT)?;
    let offset = page_offset(query.offset)?;

    let visits = state
        .storage
        .logs(limit, offset)
        .await
        .map_err(ApiError::storage("failed to get logs"))?;

    Ok(Json(visits))
}

/// Per-IP visit counts, busiest first
pub async fn list_ip_stats(
    State(state): State<Arc<AppState>>,
    query: Result<Query<IpStatsQuery>, QueryRejection>,
) -> Result<Json<Vec<IpStat>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidParameter(e.body_text()))?;
    let limit = page_limit(query.limit, DEFAULT_IP_STATS_LIMIT)?;

    let stats = state
        .storage
        .ip_stats(limit)
        .await
        .map_err(ApiError::storage("failed to get ip stats"))?;

    Ok(Json(stats))
}

/// Full dump of both tables as a downloadable JSON file
pub async fn export_data(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle: ExportBundle = state
        .storage
        .export()
        .await
        .map_err(ApiError::storage("failed to export data"))?;

    info!(records = bundle.total_records, "exported visit data");

    let disposition = format!(
        "attachment; filename=visitlog_export_{}.json",
        bundle.export_time.format("%Y-%m-%d")
    );

    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(bundle)))
}

/// Delete every visit and IP aggregate. Guarded by the admin middleware.
pub async fn purge_logs(State(state): State<Arc<AppState>>) -> Result<Json<PurgeResponse>, ApiError> {
    state
        .storage
        .purge()
        .await
        .map_err(ApiError::storage("failed to clear logs"))?;

    warn!("administrator cleared all visit logs");

    Ok(Json(PurgeResponse {
        success: true,
        message: "all visit logs cleared",
        timestamp: Utc::now(),
    }))
}

pub async fn not_found(uri: Uri) -> (StatusCode, Json<NotFoundResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            error: "not found",
            message: format!("path {} not found", uri.path()),
            available_endpoints: AVAILABLE_ENDPOINTS,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_limit() {
        assert_eq!(page_limit(None, 20).unwrap(), 20);
        assert_eq!(page_limit(Some(1), 20).unwrap(), 1);
        assert_eq!(page_limit(Some(1000), 20).unwrap(), 1000);
        assert!(page_limit(Some(0), 20).is_err());
        assert!(page_limit(Some(-5), 20).is_err());
        assert!(page_limit(Some(1001), 20).is_err());
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(None).unwrap(), 0);
        assert_eq!(page_offset(Some(40)).unwrap(), 40);
        assert!(page_offset(Some(-1)).is_err());
    }
}
