//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use cdedb_core::CdeConfig;
use rust_decimal::Decimal;

/// Which storage engine backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// `RocksDB` in `data_dir`.
    RocksDb,
    /// Volatile in-memory store, for demos and tests.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rocksdb" | "rocks" => Ok(Self::RocksDb),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/cdedb").
    pub data_dir: String,

    /// Storage engine (default: `RocksDB`).
    pub store_backend: StoreBackend,

    /// Service API key required on every `/v1` route.
    pub service_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Organisation finance settings.
    pub cde: CdeConfig,
}

impl ServiceConfig {
    /// Load configuration from environment variables and the settings file.
    #[must_use]
    pub fn from_env() -> Self {
        let cde = load_cde_config();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/cdedb".into()),
            store_backend: std::env::var("STORE_BACKEND")
                .ok()
                .and_then(|s| match s.parse() {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring STORE_BACKEND");
                        None
                    }
                })
                .unwrap_or(StoreBackend::RocksDb),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(4 * 1024 * 1024), // 4MB, partial imports are large
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS").unwrap_or(30),
            cde,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/cdedb".into(),
            store_backend: StoreBackend::RocksDb,
            service_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 4 * 1024 * 1024,
            request_timeout_seconds: 30,
            cde: CdeConfig::default(),
        }
    }
}

/// Load organisation settings from file, then apply environment overrides.
fn load_cde_config() -> CdeConfig {
    let settings_paths = [".config/cdedb.json", "config/cdedb.json"];

    let mut cde = settings_paths
        .iter()
        .find_map(|path| match load_settings_file::<CdeConfig>(path) {
            Ok(cde) => {
                tracing::info!(path = %path, "Loaded organisation settings from file");
                Some(cde)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Unreadable settings file");
                None
            }
        })
        .unwrap_or_default();

    if let Some(periods) = env_parse("PERIODS_PER_YEAR") {
        cde.periods_per_year = periods;
    }
    if let Some(fee) = env_parse::<Decimal>("MEMBERSHIP_FEE") {
        cde.membership_fee = fee;
    }
    if let Some(fee) = env_parse::<Decimal>("LASTSCHRIFT_FAILED_FEE") {
        cde.lastschrift_failed_fee = fee;
    }
    if let Some(days) = env_parse("ARCHIVAL_INACTIVITY_DAYS") {
        cde.archival_inactivity_days = days;
    }
    cde
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Load settings from a JSON file.
fn load_settings_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Settings file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
