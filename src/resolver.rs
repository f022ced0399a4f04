use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::cache::ResultCache;
use crate::errors::{AppError, AppResult};
use crate::local::LocalResolver;
use crate::location::{LocationOutcome, ResolutionSource, ResolvedLocation};
use crate::remote::RemoteGeocoder;
use crate::throttle::RequestThrottle;

pub type ProgressObserver = Arc<dyn Fn(ProgressState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Fetching,
    Resolving,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressState {
    pub phase: ProgressPhase,
    pub completed: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressState {
    pub fn fetching(message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Fetching,
            completed: 0,
            total: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Error,
            completed: 0,
            total: 0,
            message: message.into(),
        }
    }

    fn resolved(completed: usize, total: usize) -> Self {
        if completed >= total {
            Self {
                phase: ProgressPhase::Complete,
                completed,
                total,
                message: format!("Resolved {total} locations"),
            }
        } else {
            Self {
                phase: ProgressPhase::Resolving,
                completed,
                total,
                message: format!("Resolving locations... ({completed}/{total})"),
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionStats {
    pub total: usize,
    pub cache_hits: usize,
    pub local_hits: usize,
    pub remote_calls: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    entries: Vec<(String, LocationOutcome)>,
    positions: HashMap<String, usize>,
    stats: ResolutionStats,
}

impl ResolutionResult {
    fn with_total(total: usize) -> Self {
        Self {
            entries: Vec::with_capacity(total),
            positions: HashMap::with_capacity(total),
            stats: ResolutionStats {
                total,
                ..ResolutionStats::default()
            },
        }
    }

    fn record(&mut self, raw: String, outcome: LocationOutcome, source: ResolutionSource) {
        match source {
            ResolutionSource::Cache => self.stats.cache_hits += 1,
            ResolutionSource::Local => self.stats.local_hits += 1,
            ResolutionSource::Remote => self.stats.remote_calls += 1,
        }
        if outcome.is_resolved() {
            self.stats.resolved += 1;
        } else {
            self.stats.unresolved += 1;
        }
        self.positions.insert(raw.clone(), self.entries.len());
        self.entries.push((raw, outcome));
    }

    pub fn get(&self, raw: &str) -> Option<&LocationOutcome> {
        self.positions.get(raw).map(|idx| &self.entries[*idx].1)
    }

    pub fn location(&self, raw: &str) -> Option<&ResolvedLocation> {
        self.get(raw).and_then(LocationOutcome::location)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LocationOutcome)> {
        self.entries
            .iter()
            .map(|(raw, outcome)| (raw.as_str(), outcome))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &ResolutionStats {
        &self.stats
    }

    pub fn into_entries(self) -> Vec<(String, LocationOutcome)> {
        self.entries
    }
}

pub struct LocationResolver {
    cache: ResultCache,
    local: LocalResolver,
    remote: Arc<dyn RemoteGeocoder>,
    throttle: RequestThrottle,
}

impl LocationResolver {
    pub fn new(
        cache: ResultCache,
        local: LocalResolver,
        remote: Arc<dyn RemoteGeocoder>,
        throttle: RequestThrottle,
    ) -> Self {
        Self {
            cache,
            local,
            remote,
            throttle,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn throttle(&self) -> &RequestThrottle {
        &self.throttle
    }

    pub async fn resolve_all<S: AsRef<str>>(
        &self,
        raw_locations: &[S],
        observer: Option<ProgressObserver>,
        cancel: &CancellationToken,
    ) -> AppResult<ResolutionResult> {
        let unique = dedupe(raw_locations);
        if unique.is_empty() {
            return Err(AppError::NothingToResolve);
        }

        let total = unique.len();
        let mut result = ResolutionResult::with_total(total);
        for (idx, raw) in unique.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(self.abort(idx, total));
            }
            let (outcome, source) = self.resolve_one(&raw, cancel).await.map_err(|err| {
                match err {
                    AppError::Cancelled => self.abort(idx, total),
                    other => other,
                }
            })?;
            trace!(
                target: "resolver",
                raw = %raw,
                source = source.as_str(),
                resolved = outcome.is_resolved(),
                "location processed"
            );
            result.record(raw, outcome, source);
            if let Some(callback) = &observer {
                callback(ProgressState::resolved(idx + 1, total));
            }
        }

        let stats = result.stats();
        info!(
            target: "resolver",
            total = stats.total,
            cache_hits = stats.cache_hits,
            local_hits = stats.local_hits,
            remote_calls = stats.remote_calls,
            unresolved = stats.unresolved,
            "resolution batch complete"
        );
        Ok(result)
    }

    async fn resolve_one(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> AppResult<(LocationOutcome, ResolutionSource)> {
        if let Some(hit) = self.cache.get(raw) {
            return Ok((LocationOutcome::Resolved(hit), ResolutionSource::Cache));
        }

        let local = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            found = self.local.resolve(raw) => found,
        };
        if let Some(location) = local {
            self.cache.set(raw, &location);
            return Ok((LocationOutcome::Resolved(location), ResolutionSource::Local));
        }

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        match self.query_remote(raw, cancel).await? {
            Some(location) => {
                self.cache.set(raw, &location);
                Ok((LocationOutcome::Resolved(location), ResolutionSource::Remote))
            }
            // unresolved strings are retried on the next run
            None => Ok((LocationOutcome::Absent, ResolutionSource::Remote)),
        }
    }

    async fn query_remote(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<ResolvedLocation>> {
        let remote = Arc::clone(&self.remote);
        let query = raw.to_string();
        let task_cancel = cancel.clone();
        let throttled = self.throttle.execute(move || async move {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => Err(AppError::Cancelled),
                outcome = remote.query(&query) => outcome,
            }
        });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            outcome = throttled => outcome,
        };
        match outcome {
            Ok(found) => Ok(found),
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            Err(err) => {
                warn!(
                    target: "resolver",
                    raw,
                    error = %err,
                    "remote lookup failed; treating as absent"
                );
                Ok(None)
            }
        }
    }

    fn abort(&self, completed: usize, total: usize) -> AppError {
        let pending = self.throttle.queue_length();
        self.throttle.clear();
        info!(
            target: "resolver",
            completed,
            total,
            pending,
            "resolution cancelled"
        );
        AppError::Cancelled
    }
}

fn dedupe<S: AsRef<str>>(raw_locations: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for raw in raw_locations {
        let raw = raw.as_ref();
        if raw.trim().is_empty() {
            continue;
        }
        if seen.insert(raw) {
            unique.push(raw.to_string());
        }
    }
    unique
}
