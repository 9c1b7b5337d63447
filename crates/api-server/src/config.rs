//! Server configuration
//!
//! Loaded once from environment variables at startup and handed to the
//! application state. Missing required variables abort startup.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

#[cfg(feature = "postgres")]
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;
use tracing::warn;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_DATA_DIR: &str = ".orgdesk-data";
const DEFAULT_SESSION_SECRET: &str = "dev-session-secret-change-me";
const DEFAULT_SESSION_TTL_SECONDS: i64 = 60 * 60 * 8;
const DEV_CLIENT_ORIGIN: &str = "http://localhost:3002";
const SESSION_COOKIE_NAME: &str = "orgdesk.session_token";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl PostgresConfig {
    /// Connection options built field by field, so credentials need no escaping.
    #[cfg(feature = "postgres")]
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database);
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        options
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Public url of the auth service
    pub base_url: String,
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub postgres: Option<PostgresConfig>,
    pub session_secret: String,
    pub session_ttl_seconds: i64,
    pub trusted_origins: Vec<String>,
    pub production: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let base_url = var("AUTH_BASE_URL")
            .or_else(|| var("BASE_URL"))
            .ok_or(ConfigError::Missing("AUTH_BASE_URL or BASE_URL"))?;
        let production = var("APP_ENV").is_some_and(|env| env == "production");

        let host = match var("HOST") {
            Some(raw) => raw
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::Invalid { name: "HOST", value: raw })?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = parse_or("PORT", var("PORT"), DEFAULT_PORT)?;

        let data_dir = var("ORGDESK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let postgres = match var("POSTGRES_DB") {
            Some(database) => Some(PostgresConfig {
                host: var("POSTGRES_HOST").unwrap_or_else(|| "postgres".to_string()),
                port: parse_or("POSTGRES_PORT", var("POSTGRES_PORT"), 5432)?,
                database,
                user: var("POSTGRES_USER"),
                password: var("POSTGRES_PASSWORD"),
            }),
            None => None,
        };

        let session_secret = match var("AUTH_SECRET") {
            Some(secret) => secret,
            None if production => return Err(ConfigError::Missing("AUTH_SECRET")),
            None => {
                warn!("AUTH_SECRET not set, using development session secret");
                DEFAULT_SESSION_SECRET.to_string()
            }
        };
        let session_ttl_seconds = parse_or(
            "AUTH_SESSION_TTL_SECONDS",
            var("AUTH_SESSION_TTL_SECONDS"),
            DEFAULT_SESSION_TTL_SECONDS,
        )?;
        if session_ttl_seconds <= 0 {
            return Err(ConfigError::Invalid {
                name: "AUTH_SESSION_TTL_SECONDS",
                value: session_ttl_seconds.to_string(),
            });
        }

        let mut trusted_origins: Vec<String> = var("TRUSTED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().trim_end_matches('/').to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        for origin in [DEV_CLIENT_ORIGIN, base_url.trim_end_matches('/')] {
            if !trusted_origins.iter().any(|known| known == origin) {
                trusted_origins.push(origin.to_string());
            }
        }

        Ok(Self {
            base_url,
            bind_addr: SocketAddr::new(host, port),
            data_dir,
            postgres,
            session_secret,
            session_ttl_seconds,
            trusted_origins,
            production,
        })
    }

    /// Session cookies get the `__Secure-` prefix when served over https.
    pub fn secure_cookies(&self) -> bool {
        self.production
    }

    pub fn session_cookie_name(&self) -> String {
        if self.secure_cookies() {
            format!("__Secure-{}", SESSION_COOKIE_NAME)
        } else {
            SESSION_COOKIE_NAME.to_string()
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}
