/// On-demand handler.
///
/// The synchronous entry point an HTTP layer calls. Stateless per call:
/// every request goes through the shared `Pipeline`.
///
/// Request bodies:
///   absent, `null` or `{}`         → resolved-mode cycle, persisted
///   `{"persist": false}`           → resolved-mode, decision only
///   `{"<channel>": <number>, ...}` → override-mode inference
///   `{..., "persist": true}`       → override-mode, persisted
///
/// Keys that name no channel are logged and ignored.
///
/// Overrides are not persisted unless the request or `[on_demand]
/// persist_overrides` asks for it; synthetic inputs would otherwise enter the
/// same series the scheduled cycle writes.

use crate::channels;
use crate::logging::{self, Component};
use crate::model::PipelineError;
use crate::pipeline::{Pipeline, PredictionOutcome};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Reserved request key that asks for an override decision to be stored.
pub const PERSIST_KEY: &str = "persist";

#[derive(Debug, Clone, PartialEq)]
pub enum PredictionRequest {
    /// Read every channel from the store.
    Resolved,
    /// Read every channel from the store; return the decision unstored.
    Preview,
    /// Use caller-supplied channel values.
    Overrides {
        features: HashMap<String, f64>,
        /// Explicit persistence request; `None` defers to configuration.
        persist: Option<bool>,
    },
}

impl PredictionRequest {
    pub fn from_json(body: Option<&Value>) -> Result<PredictionRequest, PipelineError> {
        let map = match body {
            None | Some(Value::Null) => return Ok(PredictionRequest::Resolved),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(PipelineError::InvalidOverride {
                    channel: "<body>".to_string(),
                    reason: format!("expected an object of channel values, got {}", type_name(other)),
                });
            }
        };

        let mut features = HashMap::new();
        let mut persist = None;
        for (key, value) in map {
            if key == PERSIST_KEY {
                persist = Some(value.as_bool().ok_or_else(|| PipelineError::InvalidOverride {
                    channel: PERSIST_KEY.to_string(),
                    reason: format!("expected a boolean, got {}", type_name(value)),
                })?);
                continue;
            }
            if channels::find_channel(key).is_none() {
                logging::warn(Component::Pipeline, Some(key.as_str()), "unknown override key ignored");
                continue;
            }
            let number = value.as_f64().ok_or_else(|| PipelineError::InvalidOverride {
                channel: key.clone(),
                reason: format!("expected a number, got {}", type_name(value)),
            })?;
            features.insert(key.clone(), number);
        }

        if features.is_empty() {
            return Ok(match persist {
                Some(false) => PredictionRequest::Preview,
                _ => PredictionRequest::Resolved,
            });
        }
        Ok(PredictionRequest::Overrides { features, persist })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `{"error": <kind>, "message": <diagnostic>}`
pub fn error_body(err: &PipelineError) -> Value {
    json!({ "error": err.kind(), "message": err.to_string() })
}

pub struct OnDemandHandler {
    pipeline: Arc<Pipeline>,
    persist_overrides: bool,
}

impl OnDemandHandler {
    pub fn new(pipeline: Arc<Pipeline>, persist_overrides: bool) -> Self {
        OnDemandHandler {
            pipeline,
            persist_overrides,
        }
    }

    pub fn handle(&self, request: &PredictionRequest) -> Result<PredictionOutcome, PipelineError> {
        match request {
            PredictionRequest::Resolved => self.pipeline.run_prediction_now(),
            PredictionRequest::Preview => self.pipeline.preview_prediction_now(),
            PredictionRequest::Overrides { features, persist } => self
                .pipeline
                .run_prediction_with_overrides(features, persist.unwrap_or(self.persist_overrides)),
        }
    }

    /// Parses `body`, runs it, and renders the decision or the error body.
    pub fn handle_json(&self, body: Option<&Value>) -> Value {
        let result = PredictionRequest::from_json(body).and_then(|request| self.handle(&request));
        match result {
            Ok(outcome) => json!(outcome.decision),
            Err(e) => error_body(&e),
        }
    }

    /// One forecast cycle, rendered per location.
    pub fn forecast_json(&self) -> Value {
        match self.pipeline.run_forecast_fetch_now() {
            Ok(report) => report.to_json(),
            Err(e) => error_body(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_null_and_empty_bodies_are_resolved_mode() {
        assert_eq!(PredictionRequest::from_json(None).unwrap(), PredictionRequest::Resolved);
        assert_eq!(
            PredictionRequest::from_json(Some(&Value::Null)).unwrap(),
            PredictionRequest::Resolved
        );
        assert_eq!(
            PredictionRequest::from_json(Some(&json!({}))).unwrap(),
            PredictionRequest::Resolved
        );
    }

    #[test]
    fn test_override_body_with_persist_flag() {
        let body = json!({"TMA_hilir": 1.5, "bojongsoang": 3, "persist": true});
        match PredictionRequest::from_json(Some(&body)).unwrap() {
            PredictionRequest::Overrides { features, persist } => {
                assert_eq!(features.get("TMA_hilir"), Some(&1.5));
                assert_eq!(features.get("bojongsoang"), Some(&3.0));
                assert_eq!(persist, Some(true));
            }
            other => panic!("expected overrides, got {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_value_is_invalid_override() {
        let err = PredictionRequest::from_json(Some(&json!({"TMA_Kolam": "high"}))).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InvalidOverride {
                channel: "TMA_Kolam".to_string(),
                reason: "expected a number, got string".to_string(),
            }
        );
    }

    #[test]
    fn test_persist_false_without_channels_is_a_preview() {
        assert_eq!(
            PredictionRequest::from_json(Some(&json!({"persist": false}))).unwrap(),
            PredictionRequest::Preview
        );
        assert_eq!(
            PredictionRequest::from_json(Some(&json!({"persist": true}))).unwrap(),
            PredictionRequest::Resolved
        );
    }

    #[test]
    fn test_unknown_keys_are_ignored_whatever_their_value() {
        let body = json!({"note": "x", "source": [1, 2], "TMA_Kolam": 1});
        match PredictionRequest::from_json(Some(&body)).unwrap() {
            PredictionRequest::Overrides { features, persist } => {
                assert_eq!(features.len(), 1);
                assert_eq!(features.get("TMA_Kolam"), Some(&1.0));
                assert_eq!(persist, None);
            }
            other => panic!("expected overrides, got {:?}", other),
        }
        assert_eq!(
            PredictionRequest::from_json(Some(&json!({"note": "x"}))).unwrap(),
            PredictionRequest::Resolved
        );
    }

    #[test]
    fn test_non_boolean_persist_is_rejected() {
        let err = PredictionRequest::from_json(Some(&json!({"TMA_Kolam": 1, "persist": "yes"})))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_override");
    }

    #[test]
    fn test_array_body_is_rejected() {
        assert!(PredictionRequest::from_json(Some(&json!([1, 2, 3]))).is_err());
    }

    #[test]
    fn test_error_body_shape() {
        let body = error_body(&PipelineError::ShapeMismatch { expected: 8, actual: 5 });
        assert_eq!(body["error"], "shape_mismatch");
        assert_eq!(body["message"], "Shape mismatch: model expects 8 features, got 5");
    }
}
