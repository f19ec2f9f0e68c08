//! Runtime configuration read from the process environment.
//!
//! Every value has a default so the service starts with no configuration at
//! all. Unparseable values are logged and replaced by their default.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_DATA_DIR: &str = "./data";
/// Busy timeout for SQLite write transactions. Purchases issue codes one by
/// one inside the transaction, so writers may queue for a while.
pub const DEFAULT_TX_TIMEOUT_MS: u64 = 100_000;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub tx_timeout: Duration,
    pub page_size: u32,
    pub cors_any: bool,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 3000))),
            log_dir: data_dir.join("logs"),
            data_dir,
            tx_timeout: Duration::from_millis(DEFAULT_TX_TIMEOUT_MS),
            page_size: DEFAULT_PAGE_SIZE,
            cors_any: true,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Build the config from `EMAS_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = AppConfig::default();

        let bind_addr = match env::var("EMAS_BIND_ADDR") {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
                warn!(value = %raw, error = %e, "Invalid EMAS_BIND_ADDR, using default");
                defaults.bind_addr
            }),
            Err(_) => defaults.bind_addr,
        };

        let data_dir = env_path("EMAS_DATA_DIR").unwrap_or(defaults.data_dir);
        let log_dir = env_path("EMAS_LOG_DIR").unwrap_or_else(|| data_dir.join("logs"));

        let tx_timeout = Duration::from_millis(env_u64("EMAS_TX_TIMEOUT_MS", DEFAULT_TX_TIMEOUT_MS));
        let page_size = (env_u64("EMAS_PAGE_SIZE", DEFAULT_PAGE_SIZE as u64) as u32)
            .clamp(1, MAX_PAGE_SIZE);

        Self {
            bind_addr,
            data_dir,
            log_dir,
            tx_timeout,
            page_size,
            cors_any: env_bool("EMAS_CORS_ANY", defaults.cors_any),
            log_json: env_bool("EMAS_LOG_JSON", defaults.log_json),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("emas.db")
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => true,
            "0" | "false" | "FALSE" | "no" | "NO" => false,
            other => {
                warn!(name, value = %other, "Invalid boolean, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(v) => v.trim().parse::<u64>().unwrap_or_else(|_| {
            warn!(name, value = %v, "Invalid number, using default");
            default
        }),
        Err(_) => default,
    }
}
