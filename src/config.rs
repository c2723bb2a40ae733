//! Stack configuration
//!
//! A flat string-to-string mapping read once at program start, from a YAML
//! file and/or `key=value` overrides. No ambient singleton: the loaded
//! config is passed explicitly into the stack program.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::StratusError;

/// Flat configuration map. Values are opaque to the core.
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    values: BTreeMap<String, String>,
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML file containing a flat map of scalars.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StratusError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, StratusError> {
        let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(text)?;
        let mut values = BTreeMap::new();
        for (key, value) in raw {
            let rendered = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                other => serde_yaml::to_string(&other)?.trim_end().to_string(),
            };
            values.insert(key, rendered);
        }
        Ok(Self { values })
    }

    /// Parse `key=value` override entries (e.g. from `--set`).
    pub fn apply_overrides(&mut self, entries: &[String]) -> Result<(), StratusError> {
        for entry in entries {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(StratusError::BadConfigEntry {
                    entry: entry.clone(),
                });
            };
            self.values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder-style insertion, for tests and embedding.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Required lookup. A missing key fails the whole run before any
    /// provisioning starts.
    pub fn require(&self, key: &str) -> Result<String, StratusError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| StratusError::MissingConfig {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_yaml_flat_map() {
        let config = StackConfig::from_yaml(
            "subscriptionid: sub-1234\nvnetcidr: 10.0.0.0/16\nsubnetcidr: 10.0.0.0/24\n",
        )
        .unwrap();

        assert_eq!(config.get("subscriptionid"), Some("sub-1234"));
        assert_eq!(config.get("vnetcidr"), Some("10.0.0.0/16"));
    }

    #[test]
    fn numeric_scalars_are_stringified() {
        let config = StackConfig::from_yaml("maxnodes: 10\nenabled: true\n").unwrap();
        assert_eq!(config.get("maxnodes"), Some("10"));
        assert_eq!(config.get("enabled"), Some("true"));
    }

    #[test]
    fn require_missing_key_fails() {
        let config = StackConfig::new();
        let err = config.require("subscriptionid").unwrap_err();
        assert!(matches!(err, StratusError::MissingConfig { key } if key == "subscriptionid"));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = StackConfig::from_yaml("vnetcidr: 10.0.0.0/16\n").unwrap();
        config
            .apply_overrides(&["vnetcidr=172.16.0.0/16".to_string()])
            .unwrap();
        assert_eq!(config.get("vnetcidr"), Some("172.16.0.0/16"));
    }

    #[test]
    fn malformed_override_rejected() {
        let mut config = StackConfig::new();
        let err = config
            .apply_overrides(&["no-equals-sign".to_string()])
            .unwrap_err();
        assert!(matches!(err, StratusError::BadConfigEntry { .. }));
    }
}
