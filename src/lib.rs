mod cache;
mod config;
mod db;
mod errors;
mod gazetteer;
mod local;
mod location;
mod remote;
mod resolver;
mod throttle;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::{CacheStore, ResultCache, SqliteStore, CACHE_PREFIX, DEFAULT_RETENTION_DAYS};
pub use crate::config::{AppConfig, PublicAppConfig};
pub use crate::db::{bootstrap, DatabaseBootstrap, DatabaseContext};
pub use crate::errors::{AppError, AppResult};
pub use crate::gazetteer::{country_aliases, us_state_abbreviation, DatasetSource, GazetteerIndex, Place};
pub use crate::local::{best_match, LocalResolver};
pub use crate::location::{LocationOutcome, ResolutionSource, ResolvedLocation};
pub use crate::remote::{NominatimClient, RemoteGeocoder};
pub use crate::resolver::{
    LocationResolver, ProgressObserver, ProgressPhase, ProgressState, ResolutionResult,
    ResolutionStats,
};
pub use crate::throttle::RequestThrottle;
pub use tokio_util::sync::CancellationToken;

const DATASET_TIMEOUT: Duration = Duration::from_secs(60);

pub fn build_resolver(config: &AppConfig) -> AppResult<LocationResolver> {
    let DatabaseBootstrap {
        context: DatabaseContext { connection, path },
        recovered,
    } = bootstrap(&config.data_dir, &config.cache_database_file_name)?;
    if recovered {
        warn!(path = %path.display(), "cache database was recreated; previous entries lost");
    }

    let store = SqliteStore::new(Arc::new(Mutex::new(connection)), config.cache_max_entries);
    let cache = ResultCache::with_retention(
        Arc::new(store),
        chrono::Duration::days(config.cache_retention_days),
    );

    let dataset_http = reqwest::Client::builder()
        .user_agent(config.geocoder_user_agent.as_str())
        .timeout(DATASET_TIMEOUT)
        .build()?;
    let local = LocalResolver::new(DatasetSource::parse(&config.gazetteer_source), dataset_http);

    let remote = NominatimClient::from_config(config)?;
    let throttle = RequestThrottle::new(Duration::from_millis(config.geocoder_min_interval_ms));

    info!(config = ?config.public_profile(), "location resolver configured");
    Ok(LocationResolver::new(cache, local, Arc::new(remote), throttle))
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,location_resolver=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
