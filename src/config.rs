use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: Option<String>,
    /// JSON seed for the in-memory store, used only without `DATABASE_URL`.
    pub memory_seed_path: Option<String>,
    pub jwt_secret: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub default_duration_minutes: i32,
    pub auto_finalize_expired: bool,
    pub expiry_sweep_interval_secs: u64,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: "0.0.0.0:8080".to_string(),
            database_url: None,
            memory_seed_path: None,
            jwt_secret: String::new(),
            db_max_connections: 20,
            db_acquire_timeout_secs: 30,
            request_timeout_secs: 30,
            default_duration_minutes: 60,
            auto_finalize_expired: true,
            expiry_sweep_interval_secs: 60,
            log_format: LogFormat::Pretty,
        }
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let defaults = Config::default();

        let default_duration_minutes =
            get_env_parse_or("DEFAULT_DURATION_MINUTES", defaults.default_duration_minutes)?;
        if default_duration_minutes <= 0 {
            return Err(Error::Config(
                "DEFAULT_DURATION_MINUTES must be positive".to_string(),
            ));
        }

        Ok(Self {
            server_address: env::var("SERVER_ADDRESS").unwrap_or(defaults.server_address),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            memory_seed_path: env::var("MEMORY_SEED_PATH").ok().filter(|v| !v.trim().is_empty()),
            jwt_secret: get_env("JWT_SECRET")?,
            db_max_connections: get_env_parse_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_acquire_timeout_secs: get_env_parse_or(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.db_acquire_timeout_secs,
            )?,
            request_timeout_secs: get_env_parse_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            default_duration_minutes,
            auto_finalize_expired: get_env_parse_or(
                "AUTO_FINALIZE_EXPIRED",
                defaults.auto_finalize_expired,
            )?,
            expiry_sweep_interval_secs: get_env_parse_or(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                defaults.expiry_sweep_interval_secs,
            )?,
            log_format: get_env_parse_or("LOG_FORMAT", defaults.log_format)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
