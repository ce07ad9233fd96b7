use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::document::StartDoc;
use super::error::ConfigError;

/// The predicate deciding whether a start document belongs to a recognized
/// scan. Exactly one rule is active at a time; the two historical matching
/// behaviors are separate variants, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMatch {
    /// Exact equality on the start document's plan name
    PlanName(String),
    /// Presence of a sentinel key in the start document's metadata
    MetadataKey(String),
}

impl PlanMatch {
    pub fn matches(&self, start: &StartDoc) -> bool {
        match self {
            PlanMatch::PlanName(name) => start.plan_name == *name,
            PlanMatch::MetadataKey(key) => start.metadata.contains_key(key),
        }
    }
}

/// How the ROI channel address is obtained
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiChannel {
    /// A fixed channel address configured up front
    Static(String),
    /// Discovered at runtime from the `source` field of the named data key,
    /// on whichever descriptor carries it
    FromDescriptor(String),
}

/// Structure representing the worker configuration. Contains the transport
/// subscription, the plan predicate and the grid geometry.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub topics: Vec<String>,
    pub bootstrap_servers: String,
    pub group_id: String,
    pub plan_match: PlanMatch,
    pub array_counter_key: String,
    pub grid_rows: usize,
    pub grid_cols: usize,
    pub roi_channel: RoiChannel,
    pub read_timeout_ms: u64,
}

impl Default for Config {
    /// Generate a new Config object mirroring the TES deployment defaults
    fn default() -> Self {
        Self {
            topics: vec![String::from("tes.bluesky.documents")],
            bootstrap_servers: String::from("10.0.137.8:9092"),
            group_id: String::from("tes-livegrid-worker"),
            plan_match: PlanMatch::PlanName(String::from("list_scan")),
            array_counter_key: String::from("ArrayCounter"),
            grid_rows: 10,
            grid_cols: 10,
            roi_channel: RoiChannel::FromDescriptor(String::from("xs_channel1_rois_roi1_value")),
            read_timeout_ms: 1000,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the fields a broken config file could leave unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_rows == 0 || self.grid_cols == 0 {
            return Err(ConfigError::BadGridSize(self.grid_rows, self.grid_cols));
        }
        if self.array_counter_key.is_empty() {
            return Err(ConfigError::EmptyCounterKey);
        }
        Ok(())
    }

    /// Bound on the blocking ROI read
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
