use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use visitlog::api;
use visitlog::auth::AdminAuth;
use visitlog::config::Config;
use visitlog::storage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("visitlog=info,tower_http=info")),
        )
        .init();

    install_panic_hook();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let admin = config
        .admin
        .password
        .clone()
        .and_then(AdminAuth::new)
        .map(Arc::new)
        .context("ADMIN_PASSWORD must be set to a non-empty value")?;

    info!(
        backend = ?config.database.backend,
        max_connections = config.database.max_connections,
        "Connecting to database"
    );
    let storage = storage::connect(&config.database)
        .await
        .context("database connection failed, check the DATABASE_* settings")?;
    storage
        .ping()
        .await
        .context("database health check failed")?;
    info!("Database connection established");

    // Schema failures are logged, not fatal
    match storage.init().await {
        Ok(()) => info!("Database tables initialized"),
        Err(e) => error!(error = %format!("{e:#}"), "Failed to initialize database tables"),
    }

    let router = api::create_api_router(Arc::clone(&storage), admin, &config)?;

    if let Some(ref static_dir) = config.frontend.static_dir {
        info!("🎨 Serving static files from directory: {}", static_dir);
    }

    let addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🚀 Visit tracker listening on http://{}", addr);
    info!("   - API endpoints available at http://{}/api/...", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("🛑 Shutting down, closing database pool...");
    storage.close().await;
    info!("Database pool closed");

    Ok(())
}

/// Log panics through tracing and terminate so a supervisor can restart the process
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Unrecoverable fault: {}", panic_info);
        default_hook(panic_info);
        std::process::exit(1);
    }));
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
