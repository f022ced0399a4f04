use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gazetteer::Place;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub lat: f64,
    pub lng: f64,
    pub display_name: String,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedLocation {
    pub fn new(lat: f64, lng: f64, display_name: impl Into<String>) -> Self {
        Self {
            lat,
            lng,
            display_name: display_name.into(),
            resolved_at: Utc::now(),
        }
    }

    pub fn from_place(place: &Place) -> Self {
        Self::new(place.lat, place.lng, place.display_name())
    }

    pub fn same_point(&self, other: &ResolvedLocation) -> bool {
        self.lat == other.lat && self.lng == other.lng && self.display_name == other.display_name
    }
}

/// Outcome of one attempted resolution. `Absent` means the lookup ran and
/// found nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LocationOutcome {
    Resolved(ResolvedLocation),
    Absent,
}

impl LocationOutcome {
    pub fn location(&self) -> Option<&ResolvedLocation> {
        match self {
            LocationOutcome::Resolved(location) => Some(location),
            LocationOutcome::Absent => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, LocationOutcome::Resolved(_))
    }
}

impl From<Option<ResolvedLocation>> for LocationOutcome {
    fn from(value: Option<ResolvedLocation>) -> Self {
        match value {
            Some(location) => LocationOutcome::Resolved(location),
            None => LocationOutcome::Absent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Cache,
    Local,
    Remote,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Cache => "cache",
            ResolutionSource::Local => "local",
            ResolutionSource::Remote => "remote",
        }
    }
}
