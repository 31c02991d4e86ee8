/// Classifier contract and the serialized tree-ensemble artifact.
///
/// The decision model is trained offline; this service only evaluates it.
/// The artifact is a JSON document:
///
/// ```json
/// {
///   "n_features": 8,
///   "outputs": [
///     { "name": "pump_on",       "trees": [ <node>, ... ] },
///     { "name": "status_banjir", "trees": [ <node>, ... ] }
///   ]
/// }
/// ```
///
/// where a node is either a leaf `{"leaf": <class label>}` or a split
/// `{"feature": i, "threshold": t, "left": <node>, "right": <node>}`.
/// Rows go left when `row[i] <= t`. Each output head predicts the label most
/// of its trees vote for; ties go to the smallest label.

use crate::model::PipelineError;
use serde::Deserialize;
use std::path::Path;

/// An opaque multi-output classifier: rows in, one label per output out.
pub trait Classifier: Send + Sync {
    /// Number of columns each input row must have.
    fn input_width(&self) -> usize;

    /// Number of labels produced per row.
    fn output_width(&self) -> usize;

    /// Predicts one label vector per row.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, PipelineError>;
}

// ---------------------------------------------------------------------------
// Artifact structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Leaf {
        leaf: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn evaluate(&self, row: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { leaf } => return *leaf,
                TreeNode::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        match self {
            TreeNode::Leaf { leaf } => {
                if leaf.is_finite() {
                    Ok(())
                } else {
                    Err(format!("leaf label {} is not finite", leaf))
                }
            }
            TreeNode::Split { feature, threshold, left, right } => {
                if *feature >= n_features {
                    return Err(format!(
                        "split on feature {} but model declares {} features",
                        feature, n_features
                    ));
                }
                if threshold.is_nan() {
                    return Err(format!("split on feature {} has NaN threshold", feature));
                }
                left.validate(n_features)?;
                right.validate(n_features)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputHead {
    pub name: String,
    pub trees: Vec<TreeNode>,
}

impl OutputHead {
    fn vote(&self, row: &[f64]) -> f64 {
        let mut tally: Vec<(f64, usize)> = Vec::new();
        for tree in &self.trees {
            let label = tree.evaluate(row);
            match tally.iter_mut().find(|(l, _)| *l == label) {
                Some((_, count)) => *count += 1,
                None => tally.push((label, 1)),
            }
        }
        tally
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.total_cmp(&a.0)))
            .map(|(label, _)| label)
            .unwrap_or(0.0)
    }
}

/// A voting tree ensemble loaded from a JSON artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeEnsemble {
    pub n_features: usize,
    pub outputs: Vec<OutputHead>,
}

impl TreeEnsemble {
    /// Loads and validates an artifact from disk.
    pub fn load(path: &Path) -> Result<TreeEnsemble, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ModelUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates an artifact.
    pub fn from_json_str(text: &str) -> Result<TreeEnsemble, PipelineError> {
        let model: TreeEnsemble = serde_json::from_str(text)
            .map_err(|e| PipelineError::ModelUnavailable(format!("malformed artifact: {}", e)))?;
        model.validate().map_err(PipelineError::ModelUnavailable)?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), String> {
        if self.n_features == 0 {
            return Err("artifact declares zero features".to_string());
        }
        if self.outputs.is_empty() {
            return Err("artifact declares no outputs".to_string());
        }
        for head in &self.outputs {
            if head.trees.is_empty() {
                return Err(format!("output '{}' has no trees", head.name));
            }
            for tree in &head.trees {
                tree.validate(self.n_features)
                    .map_err(|e| format!("output '{}': {}", head.name, e))?;
            }
        }
        Ok(())
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|h| h.name.as_str()).collect()
    }
}

impl Classifier for TreeEnsemble {
    fn input_width(&self) -> usize {
        self.n_features
    }

    fn output_width(&self) -> usize {
        self.outputs.len()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, PipelineError> {
        rows.iter()
            .map(|row| {
                if row.len() != self.n_features {
                    return Err(PipelineError::ShapeMismatch {
                        expected: self.n_features,
                        actual: row.len(),
                    });
                }
                Ok(self.outputs.iter().map(|head| head.vote(row)).collect())
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
