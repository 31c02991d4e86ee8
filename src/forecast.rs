/// Forecast writer and the forecast cycle.
///
/// Valid forecasts accumulate: each upcoming value is written as its own
/// timestamp child of the location node, and earlier children are never
/// cleared. Failures flip the location into a visible error state by writing
/// the `error` marker child; the next valid write clears the marker again.
///
///   {root}/{location}/{ts}    = precipitation   (valid)
///   {root}/{location}/error   = "Data tidak ditemukan"   (unavailable)

use crate::channels::{ForecastLocation, join_path};
use crate::ingest::bmkg::{self, WeatherApi};
use crate::logging::{self, Component};
use crate::model::{ERROR_MARKER_KEY, ERROR_MARKER_MESSAGE, ForecastOutcome, PipelineError};
use crate::store::TreeStore;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value, json};

pub struct ForecastWriter<'a> {
    store: &'a dyn TreeStore,
    root: &'a str,
}

impl<'a> ForecastWriter<'a> {
    pub fn new(store: &'a dyn TreeStore, root: &'a str) -> Self {
        ForecastWriter { store, root }
    }

    /// Writes one location's outcome. Replaying the same outcome rewrites the
    /// same path with the same value.
    pub fn write(&self, location: &str, outcome: &ForecastOutcome) -> Result<(), PipelineError> {
        let node = join_path(self.root, location);
        let marker = join_path(&node, ERROR_MARKER_KEY);

        match outcome {
            ForecastOutcome::Next { key, precipitation } => {
                self.put(&join_path(&node, key), json!(precipitation))?;
                self.put(&marker, Value::Null)
            }
            ForecastOutcome::Unavailable(_) => self.put(&marker, json!(ERROR_MARKER_MESSAGE)),
        }
    }

    fn put(&self, path: &str, value: Value) -> Result<(), PipelineError> {
        self.store.set(path, value).map_err(|e| {
            logging::log_store_failure(path, "forecast write", &e);
            PipelineError::StoreWriteFailure {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Per-location outcomes of one forecast cycle, in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastReport {
    pub outcomes: Vec<(String, ForecastOutcome)>,
}

impl ForecastReport {
    /// `{"<location>": {"<ts>": tp} | {"error": "..."}, ...}`
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (location, outcome) in &self.outcomes {
            map.insert(location.clone(), outcome.to_json());
        }
        Value::Object(map)
    }

    pub fn available(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_available()).count()
    }

    pub fn get(&self, location: &str) -> Option<&ForecastOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == location)
            .map(|(_, o)| o)
    }
}

/// Fetches every location and writes each result.
///
/// A fetch failure never aborts the cycle. A store write failure for one
/// location does not stop the others; the first one is returned once every
/// location has been attempted.
pub fn run_forecast_cycle_at(
    api: &dyn WeatherApi,
    store: &dyn TreeStore,
    root: &str,
    locations: &[ForecastLocation],
    offset: &FixedOffset,
    now: DateTime<Utc>,
) -> Result<ForecastReport, PipelineError> {
    let writer = ForecastWriter::new(store, root);
    let mut outcomes = Vec::with_capacity(locations.len());
    let mut first_failure = None;

    for location in locations {
        let outcome = bmkg::next_forecast_at(api, &location.code, offset, now);
        match &outcome {
            ForecastOutcome::Next { key, precipitation } => logging::debug(
                Component::Bmkg,
                Some(location.name.as_str()),
                &format!("next forecast {} → {} mm", key, precipitation),
            ),
            ForecastOutcome::Unavailable(failure) => {
                logging::log_bmkg_failure(&location.name, "forecast fetch", failure)
            }
        }

        if let Err(e) = writer.write(&location.name, &outcome) {
            first_failure.get_or_insert(e);
        }
        outcomes.push((location.name.clone(), outcome));
    }

    let report = ForecastReport { outcomes };
    let available = report.available();
    logging::log_cycle_summary(
        Component::Bmkg,
        locations.len(),
        available,
        locations.len() - available,
    );

    match first_failure {
        Some(e) => Err(e),
        None => Ok(report),
    }
}
