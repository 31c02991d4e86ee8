/// Inference engine: feature vector in, decision out.
///
/// Wraps a loaded classifier behind the decision contract (8 inputs, 2
/// outputs: pump activation count and flood alert level). Artifacts with any
/// other contract, such as the older 5-input single-output model, are refused
/// when the engine is built rather than coerced.
///
/// Inference is pure and synchronous. There is no retry here.

use crate::classifier::Classifier;
use crate::logging::{self, Component};
use crate::model::{Decision, FEATURE_COUNT, FeatureVector, PipelineError};
use std::sync::Arc;

/// Number of labels the decision contract needs.
pub const DECISION_OUTPUTS: usize = 2;

pub struct InferenceEngine {
    classifier: Arc<dyn Classifier>,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("input_width", &self.classifier.input_width())
            .field("output_width", &self.classifier.output_width())
            .finish()
    }
}

impl InferenceEngine {
    /// Checks the classifier's contract; a mismatch means the process must
    /// not serve or schedule inference.
    pub fn new(classifier: Arc<dyn Classifier>) -> Result<InferenceEngine, PipelineError> {
        let inputs = classifier.input_width();
        let outputs = classifier.output_width();
        if inputs != FEATURE_COUNT || outputs != DECISION_OUTPUTS {
            return Err(PipelineError::ModelUnavailable(format!(
                "artifact contract is {} inputs / {} outputs, decision contract requires {} / {}",
                inputs, outputs, FEATURE_COUNT, DECISION_OUTPUTS
            )));
        }
        logging::info(
            Component::Model,
            None,
            &format!("classifier ready ({} inputs, {} outputs)", inputs, outputs),
        );
        Ok(InferenceEngine { classifier })
    }

    /// Runs the classifier on one vector.
    ///
    /// The vector width is checked before the classifier is called.
    pub fn infer(&self, features: &FeatureVector) -> Result<Decision, PipelineError> {
        let expected = self.classifier.input_width();
        if features.len() != expected {
            return Err(PipelineError::ShapeMismatch {
                expected,
                actual: features.len(),
            });
        }

        let output = self.classifier.predict(&features.as_row())?;
        let labels = output.first().ok_or_else(|| {
            PipelineError::InvalidPrediction("classifier returned no rows".to_string())
        })?;
        if labels.len() != DECISION_OUTPUTS {
            return Err(PipelineError::InvalidPrediction(format!(
                "classifier returned {} labels, expected {}",
                labels.len(),
                DECISION_OUTPUTS
            )));
        }

        let decision = Decision::from_labels(labels[0], labels[1])?;
        logging::debug(
            Component::Model,
            None,
            &format!(
                "features {:?} → pump_on={}, alert_level={}",
                features.values(),
                decision.pump_on,
                decision.alert_level.as_label()
            ),
        );
        Ok(decision)
    }
}
