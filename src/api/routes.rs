use axum::{
    extract::DefaultBodyLimit,
    handler::HandlerWithoutStateExt,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::{require_admin, AdminAuth, ADMIN_PASSWORD_HEADER};
use crate::config::Config;
use crate::storage::Storage;

use super::handlers::{
    export_data, get_stats, health_check, list_ip_stats, list_logs, not_found, purge_logs,
    record_visit, AppState,
};

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn create_api_router(
    storage: Arc<dyn Storage>,
    admin: Arc<AdminAuth>,
    config: &Config,
) -> anyhow::Result<Router> {
    let state = Arc::new(AppState {
        storage,
        stats_offset: config.stats.offset()?,
    });

    let purge = delete(purge_logs).route_layer(middleware::from_fn_with_state(admin, require_admin));

    let router = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/visit", post(record_visit))
        .route("/api/stats", get(get_stats))
        .route("/api/logs", get(list_logs).merge(purge))
        .route("/api/ip-stats", get(list_ip_stats))
        .route("/api/export", get(export_data))
        .method_not_allowed_fallback(not_found);

    let router = match config.frontend.static_dir.as_deref() {
        Some(dir) => router.fallback_service(
            ServeDir::new(dir)
                .call_fallback_on_method_not_allowed(true)
                .not_found_service(not_found.into_service()),
        ),
        None => router.fallback(not_found),
    };

    Ok(router
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&config.cors.allowed_origins))
        .layer(TraceLayer::new_for_http()))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            if origin == "*" {
                tracing::warn!("Ignoring wildcard CORS origin, credentials require explicit origins");
                return None;
            }
            match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin '{origin}'");
                    None
                }
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ADMIN_PASSWORD_HEADER),
        ])
        .allow_credentials(true)
}
