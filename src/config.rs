//! Analysis configuration.
//!
//! All fields are optional in YAML; omitted fields take the defaults below.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::finding::Category;

/// Default config file names searched by the CLI.
pub const DEFAULT_CONFIG_NAMES: &[&str] = &["polyaudit.yaml", ".polyaudit.yaml"];

const MAX_WINDOW: usize = 50;

/// Tunables shared by every analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub version: String,
    /// Statements after an external call that are checked for state writes.
    #[serde(default = "default_window")]
    pub reentrancy_window: usize,
    /// Statements before an external call that are checked for an
    /// authorization primitive.
    #[serde(default = "default_window")]
    pub call_lookback: usize,
    /// Treat syntax-error nodes in a parse tree as a parse failure.
    #[serde(default)]
    pub strict_parse: bool,
    /// Run the detectors of one request on the rayon pool.
    #[serde(default)]
    pub parallel: bool,
    /// Glob patterns for paths the CLI skips when walking directories.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Categories the analyzers skip.
    #[serde(default)]
    pub disabled_categories: Vec<Category>,
}

fn default_window() -> usize {
    3
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            version: String::new(),
            reentrancy_window: default_window(),
            call_lookback: default_window(),
            strict_parse: false,
            parallel: false,
            exclude: Vec::new(),
            disabled_categories: Vec::new(),
        }
    }
}

impl AuditConfig {
    /// Parse a config from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parse a config from YAML text. An empty document yields the defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AuditConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Check value ranges and glob syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("reentrancy_window", self.reentrancy_window),
            ("call_lookback", self.call_lookback),
        ] {
            if value == 0 || value > MAX_WINDOW {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_WINDOW, value
                )));
            }
        }
        for pattern in &self.exclude {
            globset::Glob::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("exclude pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(())
    }

    /// Whether the analyzers should run detectors for this category.
    pub fn is_enabled(&self, category: Category) -> bool {
        !self.disabled_categories.contains(&category)
    }

    /// Check if a path matches one of the `exclude` globs.
    pub fn is_path_excluded(&self, path: &Path) -> bool {
        if self.exclude.is_empty() {
            return false;
        }

        let path_str = path.to_string_lossy();
        self.exclude.iter().any(|pattern| {
            globset::Glob::new(pattern)
                .map(|g| g.compile_matcher().is_match(&*path_str))
                .unwrap_or(false)
        })
    }
}

/// Look for a default config file in `dir`.
pub fn discover(dir: &Path) -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = AuditConfig::from_yaml_str("").unwrap();
        assert_eq!(config, AuditConfig::default());
        assert_eq!(config.reentrancy_window, 3);
        assert_eq!(config.call_lookback, 3);
        assert!(!config.strict_parse);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AuditConfig::from_yaml_str(
            r#"
version: "1"
reentrancy_window: 5
disabled_categories: [LogicDefect]
"#,
        )
        .unwrap();
        assert_eq!(config.reentrancy_window, 5);
        assert_eq!(config.call_lookback, 3);
        assert!(!config.is_enabled(Category::LogicDefect));
        assert!(config.is_enabled(Category::Overflow));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = AuditConfig {
            call_lookback: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("call_lookback"));
    }

    #[test]
    fn test_validate_rejects_bad_glob() {
        let config = AuditConfig {
            exclude: vec!["[".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_excluded() {
        let config = AuditConfig {
            exclude: vec!["**/node_modules/**".to_string()],
            ..Default::default()
        };
        assert!(config.is_path_excluded(Path::new("a/node_modules/b/c.sol")));
        assert!(!config.is_path_excluded(Path::new("contracts/Vault.sol")));
    }

    #[test]
    fn test_unknown_category_is_an_error() {
        assert!(AuditConfig::from_yaml_str("disabled_categories: [Nope]").is_err());
    }
}
