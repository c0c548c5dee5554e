//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::catalog::HouseRegistry;

/// Supabase connection settings
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

/// Which document store backs the product store
#[derive(Clone, Debug)]
pub enum StoreBackend {
    /// In-process store, lost on restart
    Memory,
    Supabase(SupabaseConfig),
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    pub store_backend: StoreBackend,
    /// Attempts before an id allocation gives up on a contended counter
    pub counter_max_retries: u32,
    /// Per-request timeout against the backing store
    pub store_timeout: Duration,

    pub houses: HouseRegistry,

    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
    /// Max mutating requests per second across all clients
    pub write_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let store_backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "supabase" => StoreBackend::Supabase(SupabaseConfig {
                url: env::var("SUPABASE_URL").map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
                service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                    .map_err(|_| ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?,
            }),
            other => {
                return Err(ConfigError::Invalid {
                    var: "STORE_BACKEND",
                    reason: format!("unknown backend '{}', expected memory or supabase", other),
                })
            }
        };

        let houses = match env::var("HOUSES") {
            Ok(raw) => HouseRegistry::from_json(&raw).map_err(|e| ConfigError::Invalid {
                var: "HOUSES",
                reason: e.to_string(),
            })?,
            Err(_) => HouseRegistry::default(),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            store_backend,
            counter_max_retries: parse_var("COUNTER_MAX_RETRIES", 10)?,
            store_timeout: Duration::from_secs(parse_var("STORE_TIMEOUT_SECS", 10)?),

            houses,

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            write_rate_limit: parse_var("WRITE_RATE_LIMIT", 10)?,
        })
    }
}

/// Parse an optional numeric variable, falling back to `default` when unset
fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}
