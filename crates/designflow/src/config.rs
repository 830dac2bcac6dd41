//! Engine configuration.

use serde::Deserialize;

use crate::error::EngineError;

/// Default recompute timeout, in milliseconds.
pub const DEFAULT_SOLIDS_TIMEOUT_MS: u64 = 80_000;

/// Key under which design settings are stored.
pub const DEFAULT_SETTINGS_KEY: &str = "design";

/// Logical path of the serialized geometry cache.
pub const DEFAULT_CACHED_GEOMETRY_PATH: &str = ".solidsCache";

/// Runtime configuration for an [`Engine`](crate::Engine).
///
/// Every field has a default, so a partial JSON document (or `{}`) is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub settings_key: String,
    pub cached_geometry_path: String,
    pub event_capacity: usize,
    pub output_capacity: usize,
    #[serde(rename = "defaultSolidsTimeOutMs")]
    pub default_solids_time_out_ms: u64,
    pub default_instant_update: bool,
    pub default_auto_reload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settings_key: DEFAULT_SETTINGS_KEY.to_string(),
            cached_geometry_path: DEFAULT_CACHED_GEOMETRY_PATH.to_string(),
            event_capacity: 256,
            output_capacity: 64,
            default_solids_time_out_ms: DEFAULT_SOLIDS_TIMEOUT_MS,
            default_instant_update: true,
            default_auto_reload: true,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The policy knobs a freshly initialized design starts with.
    pub fn policy(&self) -> Policy {
        Policy {
            instant_update: self.default_instant_update,
            auto_reload: self.default_auto_reload,
            solids_time_out: self.default_solids_time_out_ms,
        }
    }
}

/// Recompute policy defaults fed into [`initialize_with`](crate::reducers::initialize_with).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub instant_update: bool,
    pub auto_reload: bool,
    pub solids_time_out: u64,
}

impl Default for Policy {
    fn default() -> Self {
        EngineConfig::default().policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.settings_key, "design");
        assert_eq!(config.cached_geometry_path, ".solidsCache");
    }

    #[test]
    fn partial_document_overrides_named_fields() {
        let config =
            EngineConfig::from_json_str(r#"{"defaultSolidsTimeOutMs": 100, "settingsKey": "cad"}"#)
                .unwrap();
        assert_eq!(config.default_solids_time_out_ms, 100);
        assert_eq!(config.settings_key, "cad");
        assert_eq!(config.policy().solids_time_out, 100);
        assert!(config.default_auto_reload);
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str("{\"eventCapacity\": \"lots\"}"),
            Err(EngineError::Config(_))
        ));
    }
}
