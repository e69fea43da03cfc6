//! AKI classifier adapter.
//!
//! The trained gradient-boosted classifier is shipped as a JSON artifact:
//! per-feature standardization constants, a forest of binary decision trees
//! in flattened node-array form, and a bias term. The evaluator standardizes
//! the feature vector, sums the leaf outputs, applies the logistic function,
//! and thresholds at 0.5.
//!
//! The rest of the system treats the predictor as opaque behind the
//! [`Predictor`] trait; swapping the artifact format touches only this
//! module.

use crate::features::FEATURE_COUNT;
use serde::Deserialize;
use std::path::Path;

/// A leaf node is marked by `feature == -1`; its `value` is the tree output.
/// Interior nodes route left when `x[feature] < threshold`.
#[derive(Debug, Deserialize)]
struct Node {
    feature: i64,
    threshold: f64,
    left: usize,
    right: usize,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    means: Vec<f64>,
    scales: Vec<f64>,
    bias: f64,
    trees: Vec<Tree>,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("reading model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoding model artifact: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed model artifact: {0}")]
    Malformed(String),
}

/// Binary verdict from a feature vector. 1 = predicted AKI.
pub trait Predictor {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> u8;
}

/// The gradient-boosted-trees model loaded from disk.
#[derive(Debug)]
pub struct AkiModel {
    means: [f64; FEATURE_COUNT],
    scales: [f64; FEATURE_COUNT],
    bias: f64,
    trees: Vec<Tree>,
}

impl AkiModel {
    /// Load and validate the artifact. Any failure here is fatal at startup.
    pub fn load(path: &Path) -> Result<AkiModel, ModelError> {
        let contents = std::fs::read(path)?;
        let file: ModelFile = serde_json::from_slice(&contents)?;
        AkiModel::from_file(file)
    }

    fn from_file(file: ModelFile) -> Result<AkiModel, ModelError> {
        let means: [f64; FEATURE_COUNT] = file.means.as_slice().try_into().map_err(|_| {
            ModelError::Malformed(format!("expected {FEATURE_COUNT} means, got {}", file.means.len()))
        })?;
        let scales: [f64; FEATURE_COUNT] = file.scales.as_slice().try_into().map_err(|_| {
            ModelError::Malformed(format!(
                "expected {FEATURE_COUNT} scales, got {}",
                file.scales.len()
            ))
        })?;
        if scales.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(ModelError::Malformed("zero or non-finite scale".to_owned()));
        }
        if file.trees.is_empty() {
            return Err(ModelError::Malformed("empty forest".to_owned()));
        }
        for (i, tree) in file.trees.iter().enumerate() {
            validate_tree(tree).map_err(|reason| {
                ModelError::Malformed(format!("tree {i}: {reason}"))
            })?;
        }
        Ok(AkiModel {
            means,
            scales,
            bias: file.bias,
            trees: file.trees,
        })
    }
}

fn validate_tree(tree: &Tree) -> Result<(), String> {
    if tree.nodes.is_empty() {
        return Err("no nodes".to_owned());
    }
    for (i, node) in tree.nodes.iter().enumerate() {
        if node.feature >= 0 {
            if node.feature as usize >= FEATURE_COUNT {
                return Err(format!("node {i} splits on feature {}", node.feature));
            }
            // Children must point forward so traversal terminates.
            if node.left <= i || node.right <= i || node.left >= tree.nodes.len()
                || node.right >= tree.nodes.len()
            {
                return Err(format!("node {i} has out-of-order children"));
            }
        }
    }
    Ok(())
}

fn eval_tree(tree: &Tree, x: &[f64; FEATURE_COUNT]) -> f64 {
    let mut index = 0;
    loop {
        let node = &tree.nodes[index];
        if node.feature < 0 {
            return node.value;
        }
        index = if x[node.feature as usize] < node.threshold {
            node.left
        } else {
            node.right
        };
    }
}

impl Predictor for AkiModel {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> u8 {
        let mut x = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            x[i] = (features[i] - self.means[i]) / self.scales[i];
        }
        let margin: f64 = self.bias + self.trees.iter().map(|t| eval_tree(t, &x)).sum::<f64>();
        let probability = 1.0 / (1.0 + (-margin).exp());
        u8::from(probability >= 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A one-tree model: positive when the latest (standardized) creatinine
    /// is at or above 1.0.
    fn stub_json() -> String {
        r#"{
            "means": [0.0, 0.0, 0.0, 0.0, 100.0],
            "scales": [1.0, 1.0, 1.0, 1.0, 50.0],
            "bias": 0.0,
            "trees": [{
                "nodes": [
                    {"feature": 4, "threshold": 1.0, "left": 1, "right": 2, "value": 0.0},
                    {"feature": -1, "threshold": 0.0, "left": 0, "right": 0, "value": -2.0},
                    {"feature": -1, "threshold": 0.0, "left": 0, "right": 0, "value": 2.0}
                ]
            }]
        }"#
        .to_owned()
    }

    fn load_stub() -> AkiModel {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), stub_json()).unwrap();
        AkiModel::load(file.path()).unwrap()
    }

    #[test]
    fn thresholds_at_half_probability() {
        let model = load_stub();
        // latest = 250 standardizes to 3.0 -> leaf 2.0 -> sigmoid(2.0) > 0.5
        assert_eq!(model.predict(&[0.0, 0.0, 0.0, 0.0, 250.0]), 1);
        // latest = 100 standardizes to 0.0 -> leaf -2.0 -> sigmoid(-2.0) < 0.5
        assert_eq!(model.predict(&[0.0, 0.0, 0.0, 0.0, 100.0]), 0);
    }

    #[test]
    fn missing_artifact_is_an_io_error() {
        let err = AkiModel::load(Path::new("/nonexistent/aki-model.json")).unwrap_err();
        assert!(matches!(err, ModelError::Io(_)));
    }

    #[test]
    fn wrong_feature_count_is_rejected() {
        let json = stub_json().replace("[0.0, 0.0, 0.0, 0.0, 100.0]", "[0.0, 0.0]");
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();
        assert!(matches!(
            AkiModel::load(file.path()).unwrap_err(),
            ModelError::Malformed(_)
        ));
    }

    #[test]
    fn backward_child_pointers_are_rejected() {
        let json = stub_json().replace(r#""left": 1, "right": 2"#, r#""left": 0, "right": 2"#);
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();
        assert!(matches!(
            AkiModel::load(file.path()).unwrap_err(),
            ModelError::Malformed(_)
        ));
    }

    #[test]
    fn garbage_json_is_a_decode_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not json").unwrap();
        assert!(matches!(
            AkiModel::load(file.path()).unwrap_err(),
            ModelError::Json(_)
        ));
    }
}
