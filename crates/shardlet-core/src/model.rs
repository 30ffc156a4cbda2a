//! Model artifact records loaded once at worker startup

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::BatchingConfig;
use crate::error::{ShardletError, ShardletResult};

/// File holding the model configuration
pub const MODEL_CONFIG_FILE: &str = "config.json";
/// File mapping class index strings to labels
pub const LABEL_MAP_FILE: &str = "index_to_name.json";

/// How an output row becomes a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionRule {
    /// Index of the highest score, looked up in the label map
    #[default]
    ArgMax,
    /// The raw output row, serialized as a JSON array
    PassThrough,
}

/// Contents of `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the compiled model artifact
    pub model_so_path: PathBuf,
    /// Overrides the batching `max_length`
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Overrides the batching `pad_id`
    #[serde(default)]
    pub pad_id: Option<i64>,
    /// Output decision rule
    #[serde(default)]
    pub decision_rule: DecisionRule,
    /// Task-specific settings passed through to the backend
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Class index to label mapping from `index_to_name.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap(HashMap<String, String>);

impl LabelMap {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self(labels)
    }

    /// Label for a class index
    pub fn label(&self, index: usize) -> Option<&str> {
        self.0.get(&index.to_string()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Immutable model records for one worker
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    /// Directory the artifacts were loaded from
    pub model_dir: PathBuf,
    /// Parsed model configuration
    pub config: ModelConfig,
    /// Parsed label map; empty for pass-through models without one
    pub labels: LabelMap,
}

impl ModelArtifacts {
    /// Load `config.json` and `index_to_name.json` from a model directory
    pub fn load(model_dir: &Path) -> ShardletResult<Self> {
        let config_path = model_dir.join(MODEL_CONFIG_FILE);
        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            ShardletError::ModelLoad(format!("{} not found: {}", config_path.display(), e))
        })?;
        let mut config: ModelConfig = serde_json::from_str(&content).map_err(|e| {
            ShardletError::ModelLoad(format!("Invalid {}: {}", config_path.display(), e))
        })?;
        if config.max_length == Some(0) {
            return Err(ShardletError::ModelLoad(format!(
                "Invalid {}: max_length must be at least 1",
                config_path.display()
            )));
        }
        if config.model_so_path.is_relative() {
            config.model_so_path = model_dir.join(&config.model_so_path);
        }

        let labels_path = model_dir.join(LABEL_MAP_FILE);
        let labels = match std::fs::read_to_string(&labels_path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ShardletError::ModelLoad(format!("Invalid {}: {}", labels_path.display(), e))
            })?,
            Err(_) if config.decision_rule == DecisionRule::PassThrough => LabelMap::default(),
            Err(e) => {
                return Err(ShardletError::ModelLoad(format!(
                    "{} not found: {}",
                    labels_path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            config,
            labels,
        })
    }

    /// Batching settings with the model's overrides applied
    pub fn effective_batching(&self, base: &BatchingConfig) -> BatchingConfig {
        let mut batching = base.clone();
        if let Some(max_length) = self.config.max_length {
            batching.max_length = max_length;
        }
        if let Some(pad_id) = self.config.pad_id {
            batching.pad_id = pad_id;
        }
        batching
    }
}
