//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Produce the `LinkLayerConfig` the sync engine is built from
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("link_layer.toml")).unwrap();
//! println!("Sync contexts: {}", config.max_periodic_syncs);
//! ```

mod parser;
mod validator;

pub use contracts::LinkLayerConfig;
pub use parser::ConfigFormat;

use contracts::LinkLayerError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<LinkLayerConfig, LinkLayerError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<LinkLayerConfig, LinkLayerError> {
        Self::parse_and_validate(content, format)
    }

    /// Validate an already constructed configuration
    pub fn validate(config: &LinkLayerConfig) -> Result<(), LinkLayerError> {
        validator::validate(config)
    }

    /// Serialize LinkLayerConfig to TOML string
    pub fn to_toml(config: &LinkLayerConfig) -> Result<String, LinkLayerError> {
        toml::to_string_pretty(config)
            .map_err(|e| LinkLayerError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize LinkLayerConfig to JSON string
    pub fn to_json(config: &LinkLayerConfig) -> Result<String, LinkLayerError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| LinkLayerError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, LinkLayerError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            LinkLayerError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            LinkLayerError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, LinkLayerError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<LinkLayerConfig, LinkLayerError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        tracing::debug!(
            max_periodic_syncs = config.max_periodic_syncs,
            local_ppm = config.local_clock_accuracy_ppm,
            "Link layer configuration loaded"
        );
        Ok(config)
    }
}
