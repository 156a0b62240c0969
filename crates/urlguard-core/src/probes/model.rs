//! Phishing model probe
//!
//! Scores lexical URL features with a random forest exported to JSON:
//!
//! ```json
//! { "classes": [-1, 1],
//!   "trees": [ { "nodes": [
//!       { "feature": 7, "threshold": 0.5, "left": 1, "right": 2 },
//!       { "value": [40.0, 2.0] },
//!       { "value": [3.0, 55.0] } ] } ] }
//! ```
//!
//! Splits go left when `x[feature] <= threshold`. Leaf values are per-class
//! sample counts; the forest probability is the mean of the normalized leaves.

use crate::config::ModelConfig;
use crate::error::{GuardError, GuardResult, ProbeError};
use crate::features::{UrlFeatures, FEATURE_COUNT};
use crate::normalize::NormalizedUrl;
use crate::probe::{Probe, ProbeKind, ProbeVerdict, Rating};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Class label of phishing samples
pub const MALICIOUS_CLASS: i64 = -1;
/// Probability reported when no model is loaded
pub const NEUTRAL_PROBABILITY: f64 = 0.5;

/// Tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

/// Decision tree stored as a flat node array rooted at index 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn leaf(&self, x: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Split { feature, threshold, left, right } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf { value } => return value,
            }
        }
    }
}

/// Random forest classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub classes: Vec<i64>,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Parse and validate a JSON artifact
    pub fn from_json(json: &str) -> GuardResult<Self> {
        let forest: Self = serde_json::from_str(json)
            .map_err(|e| GuardError::Config(format!("model artifact: {}", e)))?;
        forest.validate()?;
        Ok(forest)
    }

    pub fn load(path: &str) -> GuardResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject artifacts that could index out of bounds or loop
    pub fn validate(&self) -> GuardResult<()> {
        let invalid = |msg: String| Err(GuardError::Config(format!("model artifact: {}", msg)));

        if !self.classes.contains(&MALICIOUS_CLASS) {
            return invalid(format!("classes must include {}", MALICIOUS_CLASS));
        }
        if self.trees.is_empty() {
            return invalid("no trees".into());
        }

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return invalid(format!("tree {} has no nodes", t));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                match node {
                    TreeNode::Split { feature, left, right, .. } => {
                        if *feature >= FEATURE_COUNT {
                            return invalid(format!("tree {} node {}: feature {} out of range", t, i, feature));
                        }
                        // children after parent rules out cycles
                        if *left <= i || *right <= i || *left >= tree.nodes.len() || *right >= tree.nodes.len() {
                            return invalid(format!("tree {} node {}: bad child index", t, i));
                        }
                    }
                    TreeNode::Leaf { value } => {
                        if value.len() != self.classes.len() {
                            return invalid(format!("tree {} node {}: leaf has {} values", t, i, value.len()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Per-class probabilities, in `classes` order
    pub fn predict_proba(&self, x: &[f64; FEATURE_COUNT]) -> Vec<f64> {
        let mut proba = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let leaf = tree.leaf(x);
            let total: f64 = leaf.iter().sum();
            if total <= 0.0 {
                continue;
            }
            for (p, v) in proba.iter_mut().zip(leaf) {
                *p += v / total;
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    /// Probability of the malicious class
    pub fn malicious_probability(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let idx = self.classes.iter().position(|c| *c == MALICIOUS_CLASS).unwrap_or(0);
        self.predict_proba(x)[idx]
    }
}

/// Hot-swappable model slot
pub struct ModelStore {
    model: ArcSwapOption<RandomForest>,
    path: Option<String>,
}

impl ModelStore {
    /// Empty store
    pub fn empty() -> Self {
        Self { model: ArcSwapOption::empty(), path: None }
    }

    /// Store holding a validated model
    pub fn with_model(model: RandomForest) -> GuardResult<Self> {
        model.validate()?;
        Ok(Self {
            model: ArcSwapOption::from_pointee(model),
            path: None,
        })
    }

    /// Load from the configured artifact; a missing artifact leaves the store empty
    pub fn from_config(config: &ModelConfig) -> Self {
        let store = Self {
            model: ArcSwapOption::empty(),
            path: config.artifact_path.clone(),
        };
        if let Err(e) = store.reload() {
            tracing::warn!("Phishing model not loaded: {}", e);
        }
        store
    }

    /// Re-read the artifact. The current model is kept on error.
    pub fn reload(&self) -> GuardResult<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| GuardError::Config("no model artifact configured".into()))?;
        let forest = RandomForest::load(path)?;
        tracing::info!("Loaded phishing model from {} ({} trees)", path, forest.trees.len());
        self.swap(forest)
    }

    /// Atomically replace the model. An invalid model leaves the current one in place.
    pub fn swap(&self, model: RandomForest) -> GuardResult<()> {
        model.validate()?;
        self.model.store(Some(Arc::new(model)));
        Ok(())
    }

    pub fn current(&self) -> Option<Arc<RandomForest>> {
        self.model.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.model.load().is_some()
    }
}

/// Phishing model probe
pub struct ModelProbe {
    store: Arc<ModelStore>,
    threshold: f64,
    deadline: Duration,
}

impl ModelProbe {
    pub fn new(store: Arc<ModelStore>, threshold: f64, deadline: Duration) -> Self {
        Self { store, threshold, deadline }
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }
}

#[async_trait]
impl Probe for ModelProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::ModelScorer
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn invoke(&self, url: &NormalizedUrl) -> Result<ProbeVerdict, ProbeError> {
        let Some(model) = self.store.current() else {
            return Ok(ProbeVerdict::Model {
                malicious_probability: NEUTRAL_PROBABILITY,
                rating: Rating::Unknown,
                model_available: false,
            });
        };

        let x = UrlFeatures::extract(url).to_vector();
        let p = model.malicious_probability(&x);
        Ok(ProbeVerdict::Model {
            malicious_probability: p,
            rating: if p >= self.threshold { Rating::Unsafe } else { Rating::Safe },
            model_available: true,
        })
    }
}
