//! Analyzer configuration
//!
//! Stored as TOML. Every field has a default, so a partial file (or none at
//! all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transaction splitter tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitterConfig {
    /// Bulk OUT endpoint carrying commands
    #[serde(default = "default_out_endpoint")]
    pub out_endpoint: u8,
    /// Bulk IN endpoint carrying responses
    #[serde(default = "default_in_endpoint")]
    pub in_endpoint: u8,
    /// Seed for the running intra-transaction latency estimate (seconds)
    #[serde(default = "default_initial_latency")]
    pub initial_latency_s: f64,
    /// A pre-positioning Submit must follow the response within this many
    /// latencies (never less than `min_preposition_window_s`)
    #[serde(default = "default_preposition_multiple")]
    pub preposition_latency_multiple: f64,
    #[serde(default = "default_min_preposition_window")]
    pub min_preposition_window_s: f64,
    /// Gaps longer than this many latencies confirm a transaction boundary
    #[serde(default = "default_boundary_multiple")]
    pub boundary_latency_multiple: f64,
    /// Number of outstanding pre-positioned IN buffers remembered
    #[serde(default = "default_lookback")]
    pub lookback: usize,
}

fn default_out_endpoint() -> u8 {
    0x01
}
fn default_in_endpoint() -> u8 {
    0x81
}
fn default_initial_latency() -> f64 {
    1e-4
}
fn default_preposition_multiple() -> f64 {
    20.0
}
fn default_min_preposition_window() -> f64 {
    0.002
}
fn default_boundary_multiple() -> f64 {
    64.0
}
fn default_lookback() -> usize {
    4
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            out_endpoint: default_out_endpoint(),
            in_endpoint: default_in_endpoint(),
            initial_latency_s: default_initial_latency(),
            preposition_latency_multiple: default_preposition_multiple(),
            min_preposition_window_s: default_min_preposition_window(),
            boundary_latency_multiple: default_boundary_multiple(),
            lookback: default_lookback(),
        }
    }
}

/// Decode/tag stage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Run the correlation validator on command transactions
    #[serde(default = "default_true")]
    pub validate: bool,
    /// Worker threads for decoding (0 = available parallelism)
    #[serde(default)]
    pub workers: usize,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validate: true,
            workers: 0,
        }
    }
}

/// Complete analyzer configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub splitter: SplitterConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AnalyzerConfig {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("km003c")
            .join("analyzer.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: AnalyzerConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let toml_str = AnalyzerConfig::default().to_toml().unwrap();
        assert!(toml_str.contains("[splitter]"));
        assert!(toml_str.contains("out_endpoint = 1"));
        assert!(toml_str.contains("in_endpoint = 129"));
        assert!(toml_str.contains("[pipeline]"));
        assert!(toml_str.contains("validate = true"));
    }

    #[test]
    fn test_roundtrip() {
        let mut config = AnalyzerConfig::default();
        config.splitter.lookback = 8;
        config.pipeline.workers = 2;
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AnalyzerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AnalyzerConfig = toml::from_str("[splitter]\nin_endpoint = 0x82\n").unwrap();
        assert_eq!(parsed.splitter.in_endpoint, 0x82);
        assert_eq!(parsed.splitter.out_endpoint, 0x01);
        assert_eq!(parsed.splitter.lookback, 4);
        assert_eq!(parsed.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = PathBuf::from("/nonexistent/km003c/analyzer.toml");
        assert_eq!(AnalyzerConfig::load(&path).unwrap(), AnalyzerConfig::default());
    }
}
