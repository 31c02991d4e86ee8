/// BMKG (Badan Meteorologi, Klimatologi, dan Geofisika) forecast API client
///
/// Retrieves the public village-level weather forecast and extracts the next
/// upcoming rainfall value for a location.
///
/// API: https://api.bmkg.go.id/publik/prakiraan-cuaca?adm4=<code>
/// Response shape (fields not used here omitted):
///   { "data": [ { "cuaca": [ [ { "datetime": "2025-05-10T08:00:00Z", "tp": 4.5 }, ... ], ... ] } ] }

use crate::model::{FetchFailure, ForecastOutcome};
use crate::timestamps;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

pub const BMKG_FORECAST_URL: &str = "https://api.bmkg.go.id/publik/prakiraan-cuaca";

// ============================================================================
// BMKG API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BmkgResponse {
    #[serde(default)]
    pub data: Vec<BmkgPeriod>,
}

/// One forecast block; `cuaca` is a list of daily chunks of 3-hourly entries.
#[derive(Debug, Deserialize)]
pub struct BmkgPeriod {
    #[serde(default)]
    pub cuaca: Vec<Vec<BmkgEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BmkgEntry {
    /// UTC, `YYYY-MM-DDTHH:MM:SSZ`
    pub datetime: Option<String>,
    /// Total precipitation (mm)
    pub tp: Option<f64>,
}

/// A forecast entry with its time parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawForecastEntry {
    pub valid_at: DateTime<Utc>,
    pub precipitation: f64,
}

impl BmkgResponse {
    /// All usable entries in the order the API returned them.
    ///
    /// Entries with an unparseable time or no precipitation value are dropped.
    pub fn entries(&self) -> Vec<RawForecastEntry> {
        self.data
            .iter()
            .flat_map(|period| period.cuaca.iter())
            .flat_map(|chunk| chunk.iter())
            .filter_map(|entry| {
                let valid_at = parse_bmkg_datetime(entry.datetime.as_deref()?)?;
                let precipitation = entry.tp.filter(|v| v.is_finite())?;
                Some(RawForecastEntry { valid_at, precipitation })
            })
            .collect()
    }
}

/// Parses BMKG's UTC time (`2025-05-10T08:00:00Z`), falling back to RFC 3339.
pub fn parse_bmkg_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

// ============================================================================
// Weather API seam
// ============================================================================

/// Source of forecast entries for a location code.
pub trait WeatherApi: Send + Sync {
    fn fetch_entries(&self, location_code: &str) -> Result<Vec<RawForecastEntry>, FetchFailure>;
}

/// Blocking HTTP client for the BMKG public forecast.
pub struct BmkgClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl BmkgClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<BmkgClient, FetchFailure> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;
        Ok(BmkgClient {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Fetches and decodes the raw forecast document.
    pub fn fetch_response(&self, location_code: &str) -> Result<BmkgResponse, FetchFailure> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("adm4", location_code)])
            .header("Accept", "application/json")
            .send()
            .map_err(map_transport)?;

        if !response.status().is_success() {
            return Err(FetchFailure::HttpError(response.status().as_u16()));
        }

        response.json::<BmkgResponse>().map_err(|e| {
            if e.is_timeout() {
                FetchFailure::Timeout
            } else {
                FetchFailure::ParseError(e.to_string())
            }
        })
    }
}

fn map_transport(err: reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Transport(err.to_string())
    }
}

impl WeatherApi for BmkgClient {
    fn fetch_entries(&self, location_code: &str) -> Result<Vec<RawForecastEntry>, FetchFailure> {
        Ok(self.fetch_response(location_code)?.entries())
    }
}

// ============================================================================
// Forecast selection
// ============================================================================

/// First entry strictly after `now`, scanning in API order.
///
/// Entries at or before `now` are stale and never used as a fallback.
pub fn select_next(entries: &[RawForecastEntry], now: DateTime<Utc>) -> Option<&RawForecastEntry> {
    entries.iter().find(|e| e.valid_at > now)
}

/// Fetches one location and resolves it to a forecast outcome.
///
/// Never fails: every failure becomes `ForecastOutcome::Unavailable`.
pub fn next_forecast_at(
    api: &dyn WeatherApi,
    location_code: &str,
    offset: &FixedOffset,
    now: DateTime<Utc>,
) -> ForecastOutcome {
    let entries = match api.fetch_entries(location_code) {
        Ok(entries) => entries,
        Err(failure) => return ForecastOutcome::Unavailable(failure),
    };
    if entries.is_empty() {
        return ForecastOutcome::Unavailable(FetchFailure::NoForecastData);
    }

    match select_next(&entries, now) {
        Some(entry) => ForecastOutcome::Next {
            key: timestamps::format_key(entry.valid_at, offset),
            precipitation: entry.precipitation,
        },
        None => ForecastOutcome::Unavailable(FetchFailure::NoFutureEntry),
    }
}

/// `next_forecast_at` with the real clock.
pub fn next_forecast(api: &dyn WeatherApi, location_code: &str, offset: &FixedOffset) -> ForecastOutcome {
    next_forecast_at(api, location_code, offset, Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
