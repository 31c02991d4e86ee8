/// FeatureVector, Decision, ForecastOutcome, PipelineError, FetchFailure
/// core data structures and error handling
///
/// Core data types for the polder flood-control service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O and no external dependencies beyond `serde_json` for the
/// store representation of values.

use serde::Serialize;
use serde_json::{Map, Value, json};

// ---------------------------------------------------------------------------
// Store series names
// ---------------------------------------------------------------------------

/// Series holding the predicted pump activation count, one child per timestamp.
pub const SERIES_PUMP_ON: &str = "pump_on";

/// Series holding the predicted flood alert level, one child per timestamp.
pub const SERIES_STATUS_BANJIR: &str = "status_banjir";

/// Key of the error marker written under a forecast location.
pub const ERROR_MARKER_KEY: &str = "error";

/// Message carried by the forecast error marker.
pub const ERROR_MARKER_MESSAGE: &str = "Data tidak ditemukan";

// ---------------------------------------------------------------------------
// Feature vector
// ---------------------------------------------------------------------------

/// Number of sensor channels in the decision model's input contract.
pub const FEATURE_COUNT: usize = 8;

/// One scalar per channel, in `channels::CHANNEL_REGISTRY` order.
///
/// The order is shared with the classifier's training data. Construct it
/// through `features::FeatureAssembler` so the order cannot drift.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn from_values(values: Vec<f64>) -> Self {
        FeatureVector(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The vector as a single-row matrix, the shape the classifier consumes.
    pub fn as_row(&self) -> Vec<Vec<f64>> {
        vec![self.0.clone()]
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Largest pump activation count the pump house can act on.
pub const MAX_PUMP_ON: i64 = 4;

/// Flood alert levels, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Normal,
    Waspada,
    Bahaya,
}

impl AlertLevel {
    pub fn from_label(label: i64) -> Option<AlertLevel> {
        match label {
            0 => Some(AlertLevel::Normal),
            1 => Some(AlertLevel::Waspada),
            2 => Some(AlertLevel::Bahaya),
            _ => None,
        }
    }

    pub fn as_label(self) -> i64 {
        match self {
            AlertLevel::Normal => 0,
            AlertLevel::Waspada => 1,
            AlertLevel::Bahaya => 2,
        }
    }
}

/// The control decision produced for one feature vector.
///
/// Serializes as `{"pump_on": <int>, "alert_level": <int>}`, the shape the
/// pump house dashboard reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub pump_on: i64,
    pub alert_level: AlertLevel,
}

impl Decision {
    /// Builds a decision from the classifier's raw output labels.
    ///
    /// Labels arrive as floats; they must be finite whole numbers within the
    /// bounded ranges or nothing downstream may be written.
    pub fn from_labels(pump_label: f64, alert_label: f64) -> Result<Decision, PipelineError> {
        let pump_on = whole_label("pump_on", pump_label)?;
        if !(0..=MAX_PUMP_ON).contains(&pump_on) {
            return Err(PipelineError::InvalidPrediction(format!(
                "pump_on label {} outside 0..={}",
                pump_on, MAX_PUMP_ON
            )));
        }

        let alert = whole_label("alert_level", alert_label)?;
        let alert_level = AlertLevel::from_label(alert).ok_or_else(|| {
            PipelineError::InvalidPrediction(format!("alert_level label {} outside 0..=2", alert))
        })?;

        Ok(Decision { pump_on, alert_level })
    }
}

impl Serialize for Decision {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Decision", 2)?;
        s.serialize_field("pump_on", &self.pump_on)?;
        s.serialize_field("alert_level", &self.alert_level.as_label())?;
        s.end()
    }
}

fn whole_label(name: &str, label: f64) -> Result<i64, PipelineError> {
    if !label.is_finite() || label.fract() != 0.0 {
        return Err(PipelineError::InvalidPrediction(format!(
            "{} label {} is not a whole number",
            name, label
        )));
    }
    Ok(label as i64)
}

// ---------------------------------------------------------------------------
// Forecast types
// ---------------------------------------------------------------------------

/// Result of one forecast fetch for one location.
///
/// Errors are values here: a failed fetch becomes `Unavailable` and is written
/// to the store as the error marker instead of aborting the cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastOutcome {
    /// The first forecast entry strictly after "now", keyed in local time.
    Next { key: String, precipitation: f64 },
    /// No usable forecast; the reason is kept for logging only.
    Unavailable(FetchFailure),
}

impl ForecastOutcome {
    /// The JSON the on-demand surface returns for this location:
    /// `{"<key>": <tp>}` or the error marker object.
    pub fn to_json(&self) -> Value {
        match self {
            ForecastOutcome::Next { key, precipitation } => {
                let mut map = Map::new();
                map.insert(key.clone(), json!(precipitation));
                Value::Object(map)
            }
            ForecastOutcome::Unavailable(_) => error_marker(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ForecastOutcome::Next { .. })
    }
}

/// The marker object `{"error": "Data tidak ditemukan"}`.
pub fn error_marker() -> Value {
    json!({ ERROR_MARKER_KEY: ERROR_MARKER_MESSAGE })
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons a forecast could not be obtained for a location.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchFailure {
    /// Non-2xx HTTP response from the weather API.
    HttpError(u16),
    /// The request did not complete within the configured timeout.
    Timeout,
    /// Connection-level failure.
    Transport(String),
    /// The response body could not be deserialized.
    ParseError(String),
    /// The payload contained no forecast entries at all.
    NoForecastData,
    /// Every entry was at or before the current local time.
    NoFutureEntry,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::HttpError(code) => write!(f, "HTTP error: {}", code),
            FetchFailure::Timeout => write!(f, "request timeout"),
            FetchFailure::Transport(msg) => write!(f, "Transport error: {}", msg),
            FetchFailure::ParseError(msg) => write!(f, "Parse error: {}", msg),
            FetchFailure::NoForecastData => write!(f, "No data: payload contained no forecast entries"),
            FetchFailure::NoFutureEntry => write!(f, "No data: no forecast entry after current time"),
        }
    }
}

impl std::error::Error for FetchFailure {}

/// Failures that abort a prediction or forecast cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The feature vector's width disagrees with the classifier's input contract.
    ShapeMismatch { expected: usize, actual: usize },
    /// No usable classifier; fatal at startup.
    ModelUnavailable(String),
    /// The classifier produced labels that cannot form a `Decision`.
    InvalidPrediction(String),
    /// A store read failed (timeout, non-success status). Absence is not a failure.
    StoreReadFailure { path: String, reason: String },
    /// A store write failed; earlier writes of the same cycle are not rolled back.
    StoreWriteFailure { path: String, reason: String },
    /// A caller-supplied override could not be used as a feature value.
    InvalidOverride { channel: String, reason: String },
}

impl PipelineError {
    /// Short machine-readable kind, used in on-demand error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ShapeMismatch { .. } => "shape_mismatch",
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::InvalidPrediction(_) => "invalid_prediction",
            PipelineError::StoreReadFailure { .. } => "store_read_failure",
            PipelineError::StoreWriteFailure { .. } => "store_write_failure",
            PipelineError::InvalidOverride { .. } => "invalid_override",
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::ShapeMismatch { expected, actual } => {
                write!(f, "Shape mismatch: model expects {} features, got {}", expected, actual)
            }
            PipelineError::ModelUnavailable(msg) => write!(f, "Model unavailable: {}", msg),
            PipelineError::InvalidPrediction(msg) => write!(f, "Invalid prediction: {}", msg),
            PipelineError::StoreReadFailure { path, reason } => {
                write!(f, "Store read failed at {}: {}", path, reason)
            }
            PipelineError::StoreWriteFailure { path, reason } => {
                write!(f, "Store write failed at {}: {}", path, reason)
            }
            PipelineError::InvalidOverride { channel, reason } => {
                write!(f, "Invalid override for {}: {}", channel, reason)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_from_whole_labels() {
        let d = Decision::from_labels(1.0, 2.0).expect("labels are in range");
        assert_eq!(d.pump_on, 1);
        assert_eq!(d.alert_level, AlertLevel::Bahaya);
    }

    #[test]
    fn test_decision_rejects_out_of_range_labels() {
        assert!(Decision::from_labels(MAX_PUMP_ON as f64 + 1.0, 0.0).is_err());
        assert!(Decision::from_labels(-1.0, 0.0).is_err());
        assert!(Decision::from_labels(0.0, 3.0).is_err());
    }

    #[test]
    fn test_decision_rejects_fractional_and_nan_labels() {
        assert!(matches!(
            Decision::from_labels(0.5, 0.0),
            Err(PipelineError::InvalidPrediction(_))
        ));
        assert!(Decision::from_labels(f64::NAN, 0.0).is_err());
        assert!(Decision::from_labels(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_decision_serializes_alert_level_as_integer() {
        let d = Decision { pump_on: 2, alert_level: AlertLevel::Waspada };
        let v = serde_json::to_value(d).unwrap();
        assert_eq!(v, json!({"pump_on": 2, "alert_level": 1}));
    }

    #[test]
    fn test_alert_levels_are_ordered_by_severity() {
        assert!(AlertLevel::Normal < AlertLevel::Waspada);
        assert!(AlertLevel::Waspada < AlertLevel::Bahaya);
        for label in 0..=2 {
            assert_eq!(AlertLevel::from_label(label).unwrap().as_label(), label);
        }
    }

    #[test]
    fn test_unavailable_forecast_renders_as_error_marker() {
        let outcome = ForecastOutcome::Unavailable(FetchFailure::Timeout);
        assert_eq!(outcome.to_json(), json!({"error": "Data tidak ditemukan"}));
        assert!(!outcome.is_available());
    }

    #[test]
    fn test_available_forecast_renders_as_single_pair() {
        let outcome = ForecastOutcome::Next {
            key: "2025-05-10-15_00_00".to_string(),
            precipitation: 4.5,
        };
        assert_eq!(outcome.to_json(), json!({"2025-05-10-15_00_00": 4.5}));
    }

    #[test]
    fn test_pipeline_error_kinds_are_distinct() {
        let errors = [
            PipelineError::ShapeMismatch { expected: 8, actual: 5 },
            PipelineError::ModelUnavailable("x".into()),
            PipelineError::InvalidPrediction("x".into()),
            PipelineError::StoreReadFailure { path: "a".into(), reason: "b".into() },
            PipelineError::StoreWriteFailure { path: "a".into(), reason: "b".into() },
            PipelineError::InvalidOverride { channel: "a".into(), reason: "b".into() },
        ];
        let mut seen = std::collections::HashSet::new();
        for e in &errors {
            assert!(seen.insert(e.kind()), "duplicate kind {}", e.kind());
        }
    }
}
