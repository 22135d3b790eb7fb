use anyhow::Context;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000,http://localhost:8080";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub admin: AdminConfig,
    pub cors: CorsConfig,
    pub frontend: FrontendConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared secret expected in the `admin-password` header.
    /// The server refuses to start without it; the CLI does not need it.
    pub password: Option<String>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Directory of static files served for unmatched GET requests
    pub static_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Fixed offset (hours east of UTC) defining the calendar day for "today" counts
    pub utc_offset_hours: i32,
}

impl StatsConfig {
    pub const fn default_utc_offset_hours() -> i32 {
        8
    }

    pub fn offset(&self) -> anyhow::Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .with_context(|| format!("invalid UTC offset: {} hours", self.utc_offset_hours))
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: Self::default_utc_offset_hours(),
        }
    }
}

impl DatabaseConfig {
    const fn default_max_connections() -> u32 {
        10
    }

    const fn default_acquire_timeout_secs() -> u64 {
        60
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./visitlog.db?mode=rwc".to_string());

        let max_connections = parse_env("DATABASE_MAX_CONNECTIONS")?
            .unwrap_or_else(DatabaseConfig::default_max_connections);
        if max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }

        let acquire_timeout_secs = parse_env("DATABASE_ACQUIRE_TIMEOUT_SECS")?
            .unwrap_or_else(DatabaseConfig::default_acquire_timeout_secs);

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let api_port = parse_env::<u16>("API_PORT")?.unwrap_or(3000);

        let admin_password = std::env::var("ADMIN_PASSWORD")
            .ok()
            .filter(|p| !p.is_empty());

        let allowed_origins = parse_origins(
            &std::env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.to_string()),
        )?;

        let frontend_static_dir = std::env::var("STATIC_DIR").ok().filter(|d| !d.is_empty());

        let utc_offset_hours = parse_env("STATS_UTC_OFFSET_HOURS")?
            .unwrap_or_else(StatsConfig::default_utc_offset_hours);
        let stats = StatsConfig { utc_offset_hours };
        stats.offset()?;

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
                acquire_timeout_secs,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            admin: AdminConfig {
                password: admin_password,
            },
            cors: CorsConfig { allowed_origins },
            frontend: FrontendConfig {
                static_dir: frontend_static_dir,
            },
            stats,
        })
    }
}

fn parse_env<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value: '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn parse_origins(raw: &str) -> anyhow::Result<Vec<String>> {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();

    // Credentialed CORS cannot use a wildcard origin
    if origins.iter().any(|o| o == "*") {
        anyhow::bail!(
            "CORS_ALLOWED_ORIGINS must list explicit origins; '*' cannot be combined with credentials"
        );
    }

    Ok(origins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        let origins = parse_origins(" http://a.example , ,http://b.example").unwrap();
        assert_eq!(origins, vec!["http://a.example", "http://b.example"]);
    }

    #[test]
    fn test_wildcard_origin_rejected() {
        assert!(parse_origins("*").is_err());
        assert!(parse_origins("http://a.example, *").is_err());
    }

    #[test]
    fn test_stats_offset_bounds() {
        assert!(StatsConfig { utc_offset_hours: 8 }.offset().is_ok());
        assert!(StatsConfig { utc_offset_hours: -23 }.offset().is_ok());
        assert!(StatsConfig { utc_offset_hours: 24 }.offset().is_err());
    }

    #[test]
    fn test_admin_password_redacted_in_debug() {
        let admin = AdminConfig {
            password: Some("hunter2".to_string()),
        };
        let rendered = format!("{admin:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
