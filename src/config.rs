use std::path::PathBuf;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

use crate::cache::DEFAULT_RETENTION_DAYS;

const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
const NOMINATIM_PUBLIC_HOST: &str = "nominatim.openstreetmap.org";
const NOMINATIM_MIN_INTERVAL_MS: u64 = 1_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub gazetteer_source: String,
    pub geocoder_endpoint: String,
    pub geocoder_user_agent: String,
    pub geocoder_min_interval_ms: u64,
    pub geocoder_timeout_secs: u64,
    pub data_dir: PathBuf,
    pub cache_database_file_name: String,
    pub cache_retention_days: i64,
    pub cache_max_entries: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub gazetteer_source: String,
    pub geocoder_endpoint: String,
    pub geocoder_min_interval_ms: u64,
    pub geocoder_timeout_secs: u64,
    pub cache_database_path: String,
    pub cache_retention_days: i64,
    pub cache_max_entries: Option<usize>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let geocoder_endpoint = env::var("GEOCODER_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GEOCODER_ENDPOINT.to_string());
        let geocoder_min_interval_ms = clamp_interval(
            &geocoder_endpoint,
            parse_u64("GEOCODER_MIN_INTERVAL_MS", NOMINATIM_MIN_INTERVAL_MS),
        );
        Self {
            gazetteer_source: env::var("GAZETTEER_SOURCE")
                .unwrap_or_else(|_| "data/worldcities.csv".to_string()),
            geocoder_endpoint,
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(default_user_agent),
            geocoder_min_interval_ms,
            geocoder_timeout_secs: parse_u64("GEOCODER_TIMEOUT_SECS", 10).max(1),
            data_dir: env::var("LOCATION_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            cache_database_file_name: env::var("CACHE_DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "location-cache.db".to_string()),
            cache_retention_days: parse_i64("CACHE_RETENTION_DAYS", DEFAULT_RETENTION_DAYS)
                .max(1),
            cache_max_entries: env::var("CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok()),
        }
    }

    pub fn cache_database_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_database_file_name)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            gazetteer_source: self.gazetteer_source.clone(),
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            geocoder_min_interval_ms: self.geocoder_min_interval_ms,
            geocoder_timeout_secs: self.geocoder_timeout_secs,
            cache_database_path: self.cache_database_path().to_string_lossy().to_string(),
            cache_retention_days: self.cache_retention_days,
            cache_max_entries: self.cache_max_entries,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gazetteer_source: "data/worldcities.csv".to_string(),
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            geocoder_user_agent: default_user_agent(),
            geocoder_min_interval_ms: NOMINATIM_MIN_INTERVAL_MS,
            geocoder_timeout_secs: 10,
            data_dir: PathBuf::from("."),
            cache_database_file_name: "location-cache.db".to_string(),
            cache_retention_days: DEFAULT_RETENTION_DAYS,
            cache_max_entries: None,
        }
    }
}

fn default_user_agent() -> String {
    format!("location-resolver/{}", env!("CARGO_PKG_VERSION"))
}

// The public Nominatim instance allows one request per second per client.
fn clamp_interval(endpoint: &str, interval_ms: u64) -> u64 {
    if endpoint.contains(NOMINATIM_PUBLIC_HOST) {
        interval_ms.max(NOMINATIM_MIN_INTERVAL_MS)
    } else {
        interval_ms
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}
