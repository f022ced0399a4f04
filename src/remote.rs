use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::location::ResolvedLocation;

#[async_trait]
pub trait RemoteGeocoder: Send + Sync {
    async fn query(&self, raw: &str) -> AppResult<Option<ResolvedLocation>>;
}

pub struct NominatimClient {
    http: Client,
    endpoint: String,
}

impl NominatimClient {
    pub fn new(endpoint: impl Into<String>, user_agent: &str, timeout: Duration) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Self::new(
            config.geocoder_endpoint.clone(),
            &config.geocoder_user_agent,
            Duration::from_secs(config.geocoder_timeout_secs),
        )
    }
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    lat: Coordinate,
    lon: Coordinate,
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Coordinate {
    Text(String),
    Number(f64),
}

impl Coordinate {
    fn value(&self, field: &str) -> AppResult<f64> {
        let parsed = match self {
            Coordinate::Text(text) => text.trim().parse::<f64>().ok(),
            Coordinate::Number(value) => Some(*value),
        };
        parsed.filter(|v| v.is_finite()).ok_or_else(|| {
            AppError::RemoteLookupFailed(format!("provider returned non-numeric {field}"))
        })
    }
}

#[async_trait]
impl RemoteGeocoder for NominatimClient {
    async fn query(&self, raw: &str) -> AppResult<Option<ResolvedLocation>> {
        let query = raw.trim();
        if query.is_empty() {
            return Ok(None);
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|err| AppError::RemoteLookupFailed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteLookupFailed(format!(
                "provider responded with {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AppError::RemoteLookupFailed(err.to_string()))?;
        let results: Vec<SearchResult> = serde_json::from_slice(&body).map_err(|err| {
            AppError::RemoteLookupFailed(format!("unexpected provider payload: {err}"))
        })?;

        let Some(first) = results.into_iter().next() else {
            debug!(target: "remote_geocoder", query, "provider returned no candidates");
            return Ok(None);
        };

        let lat = first.lat.value("lat")?;
        let lng = first.lon.value("lon")?;
        trace!(target: "remote_geocoder", query, lat, lng, "provider match");
        Ok(Some(ResolvedLocation {
            lat,
            lng,
            display_name: first.display_name,
            resolved_at: Utc::now(),
        }))
    }
}
