use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ast::ParserOptions;

/// Settings read from `config.toml`.
///
/// ```toml
/// [parser]
/// max_depth = 64
///
/// [logging]
/// level = "info"
///
/// [mapping]
/// Target = "Target_1"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub parser: ParserOptions,
    pub logging: LoggingConfig,
    /// Logical target name -> registered name, used by `rewrite`.
    pub mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`. A
    /// missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = config_path()?;
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }
}

fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(config_dir.join("eplq").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.parser.max_depth, crate::ast::DEFAULT_MAX_DEPTH);
        assert_eq!(config.logging.level, "warn");
        assert!(config.mapping.is_empty());
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            [parser]
            max_depth = 16

            [mapping]
            Target = "Target_1"
            "#,
        )
        .unwrap();
        assert_eq!(config.parser.max_depth, 16);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.mapping.get("Target").map(String::as_str), Some("Target_1"));
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        assert!(Config::from_toml("[parser]\nmax_depth = \"deep\"").is_err());
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/eplq/config.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_explicit_file() {
        let path = std::env::temp_dir().join(format!("eplq-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
    }
}
