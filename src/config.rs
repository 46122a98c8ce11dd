//! Engine configuration
//!
//! One JSON document covers every tunable. Missing sections and fields
//! fall back to their defaults, so a file only needs what it changes.
//! A few deployment settings can also come from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `SEGUE_BRIDGE_URL` | `remote.url` |
//! | `SEGUE_BRIDGE_TIMEOUT_MS` | `bridge.timeout_ms`, `remote.timeout_ms` |
//! | `SEGUE_SAMPLE_RATE` | `render.sample_rate` |

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bridge::RemoteBridgeConfig;
use crate::error::{Result, SegueError};
use crate::orchestrator::{BridgeConfig, LayeringConfig, SearchConstraints};
use crate::render::RenderConfig;
use crate::scoring::ScorerConfig;

pub const ENV_BRIDGE_URL: &str = "SEGUE_BRIDGE_URL";
pub const ENV_BRIDGE_TIMEOUT_MS: &str = "SEGUE_BRIDGE_TIMEOUT_MS";
pub const ENV_SAMPLE_RATE: &str = "SEGUE_SAMPLE_RATE";

/// All engine settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegueConfig {
    pub scorer: ScorerConfig,
    pub search: SearchConstraints,
    pub bridge: BridgeConfig,
    pub layering: LayeringConfig,
    pub render: RenderConfig,
    pub remote: RemoteBridgeConfig,
}

impl SegueConfig {
    /// Read a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| SegueError::FileNotFound {
            path: path.display().to_string(),
            source: Some(e),
        })?;
        let config: SegueConfig = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Load `path` if given, apply environment overrides, then validate
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    /// Apply overrides from any variable lookup
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BRIDGE_URL).filter(|u| !u.trim().is_empty()) {
            self.remote.url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_BRIDGE_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(timeout_ms) => {
                    self.bridge.timeout_ms = timeout_ms;
                    self.remote.timeout_ms = timeout_ms;
                }
                Err(_) => warn!(variable = ENV_BRIDGE_TIMEOUT_MS, value = %raw, "ignoring unparsable override"),
            }
        }
        if let Some(raw) = lookup(ENV_SAMPLE_RATE) {
            match raw.trim().parse::<u32>() {
                Ok(rate) => self.render.sample_rate = rate,
                Err(_) => warn!(variable = ENV_SAMPLE_RATE, value = %raw, "ignoring unparsable override"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.scorer.validate()?;
        self.search.validate()?;
        self.bridge.validate()?;
        self.layering.validate()?;
        self.render.validate()?;
        if self.remote.url.trim().is_empty() {
            return Err(SegueError::InvalidParameter {
                param: "remote.url".to_string(),
                value: String::new(),
                expected: "service URL".to_string(),
            });
        }
        Ok(())
    }

    /// Pretty JSON, for writing a starter config
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SegueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.beam_width, 4);
        assert_eq!(config.bridge.timeout_ms, 45_000);
        assert_eq!(config.render.sample_rate, 44_100);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "search": {{ "beam_width": 6 }}, "bridge": {{ "threshold": 0.7 }} }}"#).unwrap();
        let config = SegueConfig::load(file.path()).unwrap();
        assert_eq!(config.search.beam_width, 6);
        assert_eq!(config.search.target_length, 8);
        assert_eq!(config.bridge.threshold, 0.7);
        assert_eq!(config.layering, LayeringConfig::default());
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = SegueConfig::default();
        let parsed: SegueConfig = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.json");
        assert!(matches!(SegueConfig::load(&missing), Err(SegueError::FileNotFound { .. })));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(SegueConfig::load(&bad), Err(SegueError::Serialization(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BRIDGE_URL, "http://gpu-box:5000"),
            (ENV_BRIDGE_TIMEOUT_MS, "1500"),
            (ENV_SAMPLE_RATE, "not a number"),
        ]
        .into_iter()
        .collect();
        let mut config = SegueConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.remote.url, "http://gpu-box:5000");
        assert_eq!(config.bridge.timeout_ms, 1500);
        assert_eq!(config.remote.timeout_ms, 1500);
        assert_eq!(config.render.sample_rate, 44_100);
    }

    #[test]
    fn test_validation_reaches_every_section() {
        let mut config = SegueConfig::default();
        config.search.beam_width = 0;
        assert!(config.validate().is_err());

        let mut config = SegueConfig::default();
        config.render.sample_rate = 100;
        assert!(matches!(
            config.validate(),
            Err(SegueError::InvalidParameter { ref param, .. }) if param == "render.sample_rate"
        ));
    }
}
