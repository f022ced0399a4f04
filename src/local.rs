use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use crate::gazetteer::{self, DatasetSource, GazetteerIndex, Place};
use crate::location::ResolvedLocation;

static REGION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\s+(?:bay\s*area|metropolitan|metro|region|area))+\s*(,|$)")
        .expect("region suffix pattern compiles")
});

type IndexFuture = Shared<BoxFuture<'static, Arc<GazetteerIndex>>>;

enum IndexState {
    Uninitialized,
    Loading(IndexFuture),
    Ready(Arc<GazetteerIndex>),
}

pub struct LocalResolver {
    source: DatasetSource,
    http: reqwest::Client,
    state: Mutex<IndexState>,
}

impl LocalResolver {
    pub fn new(source: DatasetSource, http: reqwest::Client) -> Self {
        Self {
            source,
            http,
            state: Mutex::new(IndexState::Uninitialized),
        }
    }

    pub fn from_index(index: GazetteerIndex) -> Self {
        Self {
            source: DatasetSource::Inline(String::new()),
            http: reqwest::Client::new(),
            state: Mutex::new(IndexState::Ready(Arc::new(index))),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), IndexState::Ready(_))
    }

    pub async fn initialize(&self) -> Arc<GazetteerIndex> {
        let pending = {
            let mut state = self.state.lock();
            let in_flight = match &*state {
                IndexState::Ready(index) => return Arc::clone(index),
                IndexState::Loading(pending) => Some(pending.clone()),
                IndexState::Uninitialized => None,
            };
            match in_flight {
                Some(pending) => pending,
                None => {
                    let pending = load_or_empty(self.source.clone(), self.http.clone())
                        .boxed()
                        .shared();
                    *state = IndexState::Loading(pending.clone());
                    pending
                }
            }
        };

        let index = pending.await;
        let mut state = self.state.lock();
        if !matches!(*state, IndexState::Ready(_)) {
            *state = IndexState::Ready(Arc::clone(&index));
        }
        index
    }

    pub async fn resolve(&self, raw: &str) -> Option<ResolvedLocation> {
        if raw.trim().is_empty() {
            return None;
        }
        let index = self.initialize().await;
        let place = best_match(&index, raw)?;
        debug!(target: "local_resolver", raw, place = %place.display_name(), "local match");
        Some(ResolvedLocation::from_place(place))
    }
}

async fn load_or_empty(source: DatasetSource, http: reqwest::Client) -> Arc<GazetteerIndex> {
    match gazetteer::load(&source, &http).await {
        Ok(index) => Arc::new(index),
        Err(err) => {
            warn!(
                target: "gazetteer",
                error = %err,
                "gazetteer unavailable; local resolution disabled"
            );
            Arc::new(GazetteerIndex::default())
        }
    }
}

pub fn best_match<'a>(index: &'a GazetteerIndex, raw: &str) -> Option<&'a Place> {
    let key = raw.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }

    let exact = index.lookup(&key);
    if !exact.is_empty() {
        return most_populous(exact);
    }

    let segments: Vec<&str> = key.split(',').map(str::trim).collect();
    if segments.len() > 1 {
        let reversed = segments.iter().rev().copied().collect::<Vec<_>>().join(", ");
        let candidates = index.lookup(&reversed);
        if !candidates.is_empty() {
            return most_populous(candidates);
        }

        let mut candidates = index.lookup(segments[0]);
        if candidates.len() > 1 {
            candidates.retain(|place| place.matches_qualifier(segments[1]));
        }
        if !candidates.is_empty() {
            return most_populous(candidates);
        }
    }

    let pooled = rewrites(&key, &segments)
        .iter()
        .flat_map(|pattern| index.lookup(pattern))
        .collect::<Vec<_>>();
    most_populous(pooled)
}

fn rewrites(key: &str, segments: &[&str]) -> Vec<String> {
    let mut patterns = Vec::new();
    let stripped = REGION_SUFFIX.replace_all(key, "${1}").trim().to_string();
    if !stripped.is_empty() {
        patterns.push(stripped);
    }
    match key {
        "nyc" => patterns.push("new york".to_string()),
        "sf" => patterns.push("san francisco".to_string()),
        _ => {}
    }
    if segments.len() > 1 && !segments[0].is_empty() {
        patterns.push(segments[0].to_string());
    }
    patterns
}

// Ties keep the first place encountered.
fn most_populous<'a>(candidates: impl IntoIterator<Item = &'a Place>) -> Option<&'a Place> {
    candidates
        .into_iter()
        .fold(None, |best: Option<&'a Place>, place| match best {
            Some(current) if current.population >= place.population => Some(current),
            _ => Some(place),
        })
}
