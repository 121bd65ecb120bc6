//! Refresh configuration.
//!
//! Configuration lives in a TOML file, by default `~/.nimbus/refresh.toml`.
//! The location can be overridden with `NIMBUS_CONFIG_PATH`, and a few
//! settings with their own environment variables.
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [inventory]
//! cache_all = false
//! refresh_mode = "full"
//!
//! [inventory.cache]
//! vms = true
//!
//! [[tags.mappings]]
//! label = "environment"
//! category = "environment"
//! resource_type = "VmTelefonica"
//! ```

use crate::error::{NimbusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "NIMBUS_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "NIMBUS_LOG_LEVEL";
pub const ENV_CACHE_ALL: &str = "NIMBUS_CACHE_ALL";
pub const ENV_REFRESH_MODE: &str = "NIMBUS_REFRESH_MODE";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Whether a run enumerates whole collections or a single target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    #[default]
    Full,
    Targeted,
}

impl std::str::FromStr for RefreshMode {
    type Err = NimbusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "targeted" => Ok(Self::Targeted),
            _ => Err(NimbusError::Config(format!(
                "Invalid refresh mode '{}'. Must be one of: full, targeted",
                s
            ))),
        }
    }
}

/// Top-level refresh configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub tags: TagConfig,
}

/// General settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Inventory collection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Preload every writable collection from the store before parsing
    #[serde(default)]
    pub cache_all: bool,
    /// Default refresh mode when the caller does not choose one
    #[serde(default)]
    pub refresh_mode: RefreshMode,
    /// Per-collection cache overrides, keyed by collection name
    #[serde(default)]
    pub cache: HashMap<String, bool>,
}

impl InventoryConfig {
    /// Effective cache mode for a collection given its declared default
    pub fn cache_enabled(&self, collection: &str, declared: bool) -> bool {
        self.cache
            .get(collection)
            .copied()
            .unwrap_or(declared || self.cache_all)
    }
}

/// Label to tag mapping settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    #[serde(default)]
    pub mappings: Vec<TagMappingRule>,
}

/// Maps a provider label to a tag category.
///
/// A rule without `resource_type` applies to every resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMappingRule {
    pub label: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

impl TagMappingRule {
    pub fn new(label: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            category: category.into(),
            resource_type: None,
        }
    }

    pub fn for_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }
}

impl RefreshConfig {
    /// Load configuration from the default location
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from_path(&config_path).await
    }

    /// Load configuration from a specific path
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading refresh configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NimbusError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml_str(&content)?;
        config.merge_env_vars()?;
        config.validate()?;

        info!("Refresh configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Serialize configuration to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| NimbusError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn merge_env_vars(&mut self) -> Result<()> {
        if let Ok(log_level) = std::env::var(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.general.log_level = log_level;
        }

        if let Ok(cache_all) = std::env::var(ENV_CACHE_ALL) {
            self.inventory.cache_all = cache_all.parse().map_err(|_| {
                NimbusError::Config(format!(
                    "Invalid {} value '{}'. Must be true or false",
                    ENV_CACHE_ALL, cache_all
                ))
            })?;
            debug!("Overriding cache_all from environment: {}", self.inventory.cache_all);
        }

        if let Ok(mode) = std::env::var(ENV_REFRESH_MODE) {
            self.inventory.refresh_mode = mode.parse()?;
            debug!("Overriding refresh_mode from environment: {}", mode);
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(NimbusError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        for (index, rule) in self.tags.mappings.iter().enumerate() {
            if rule.label.trim().is_empty() || rule.category.trim().is_empty() {
                return Err(NimbusError::Config(format!(
                    "Tag mapping #{} must name both a label and a category",
                    index
                )));
            }
            if rule.resource_type.as_deref().is_some_and(|t| t.trim().is_empty()) {
                return Err(NimbusError::Config(format!(
                    "Tag mapping #{} has a blank resource_type",
                    index
                )));
            }
        }

        Ok(())
    }

    /// Configuration file path, honouring `NIMBUS_CONFIG_PATH`
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
            return Ok(PathBuf::from(config_path));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| NimbusError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".nimbus").join("refresh.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RefreshConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.inventory.refresh_mode, RefreshMode::Full);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_overrides() {
        let mut inventory = InventoryConfig::default();
        assert!(!inventory.cache_enabled("vms", false));
        assert!(inventory.cache_enabled("vms", true));

        inventory.cache_all = true;
        inventory.cache.insert("disks".to_string(), false);
        assert!(inventory.cache_enabled("vms", false));
        assert!(!inventory.cache_enabled("disks", true));
    }

    #[test]
    fn test_parse_and_validate() {
        let config = RefreshConfig::from_toml_str(
            r#"
            [general]
            log_level = "debug"

            [inventory]
            refresh_mode = "targeted"

            [[tags.mappings]]
            label = "env"
            category = "environment"
            "#,
        )
        .unwrap();
        assert_eq!(config.inventory.refresh_mode, RefreshMode::Targeted);
        assert_eq!(config.tags.mappings, vec![TagMappingRule::new("env", "environment")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = RefreshConfig::default();
        config.general.log_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_blank_mapping_rejected() {
        let mut config = RefreshConfig::default();
        config.tags.mappings.push(TagMappingRule::new("env", " "));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_mode_from_str() {
        assert_eq!("FULL".parse::<RefreshMode>().unwrap(), RefreshMode::Full);
        assert!("partial".parse::<RefreshMode>().is_err());
    }
}
