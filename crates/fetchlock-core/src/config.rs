//! Engine configuration, read from TOML.
//!
//! ```toml
//! min_timeout_ms = 1000
//! max_timeout_ms = 1800000
//! default_engine = "default"
//! engines = ["default", "billing"]
//!
//! [[users]]
//! id = "demo"
//! password = "demo"
//! groups = ["camunda-admin"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::handler::{DEFAULT_MAX_TIMEOUT_MS, DEFAULT_MIN_TIMEOUT_MS, TimeoutBounds};
use crate::impls::UserEntry;

pub const DEFAULT_ENGINE: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchLockConfig {
    pub min_timeout_ms: i64,
    pub max_timeout_ms: i64,
    /// Engine served under `/external-task/...`. When unset, a lone engine is
    /// the default whatever its name; otherwise `"default"` is.
    pub default_engine: Option<String>,
    /// Engines to create; each is also served under `/engine/{name}/...`.
    pub engines: Vec<String>,
    pub users: Vec<UserEntry>,
}

impl Default for FetchLockConfig {
    fn default() -> Self {
        Self {
            min_timeout_ms: DEFAULT_MIN_TIMEOUT_MS,
            max_timeout_ms: DEFAULT_MAX_TIMEOUT_MS,
            default_engine: None,
            engines: vec![DEFAULT_ENGINE.to_string()],
            users: Vec::new(),
        }
    }
}

impl FetchLockConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_timeout_ms <= 0 {
            return Err(ConfigError::Invalid(format!(
                "min_timeout_ms must be positive, got {}",
                self.min_timeout_ms
            )));
        }
        if self.min_timeout_ms > self.max_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "min_timeout_ms ({}) exceeds max_timeout_ms ({})",
                self.min_timeout_ms, self.max_timeout_ms
            )));
        }
        if self.engines.is_empty() {
            return Err(ConfigError::Invalid("at least one engine is required".to_string()));
        }
        let default_engine = self.default_engine_name();
        if !self.engines.iter().any(|name| name == default_engine) {
            return Err(ConfigError::Invalid(format!(
                "default engine '{default_engine}' is not listed in engines"
            )));
        }
        Ok(())
    }

    /// Name of the engine behind the default routes.
    pub fn default_engine_name(&self) -> &str {
        match (&self.default_engine, self.engines.as_slice()) {
            (Some(name), _) => name.as_str(),
            (None, [only]) => only.as_str(),
            (None, _) => DEFAULT_ENGINE,
        }
    }

    pub fn timeout_bounds(&self) -> TimeoutBounds {
        TimeoutBounds {
            min_ms: self.min_timeout_ms,
            max_ms: self.max_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_file_gives_defaults() {
        let config = FetchLockConfig::from_toml_str("").unwrap();
        assert_eq!(config, FetchLockConfig::default());
        assert_eq!(config.timeout_bounds(), TimeoutBounds::default());
    }

    #[test]
    fn reads_engines_and_users() {
        let config = FetchLockConfig::from_toml_str(
            r#"
            min_timeout_ms = 500
            engines = ["default", "billing"]

            [[users]]
            id = "demo"
            password = "demo"
            tenants = ["t1"]
            "#,
        )
        .unwrap();

        assert_eq!(config.min_timeout_ms, 500);
        assert_eq!(config.max_timeout_ms, DEFAULT_MAX_TIMEOUT_MS);
        assert_eq!(config.engines, vec!["default", "billing"]);
        assert_eq!(config.users[0].tenants, vec!["t1"]);
        assert!(config.users[0].groups.is_empty());
    }

    #[rstest]
    #[case::zero_min("min_timeout_ms = 0")]
    #[case::min_above_max("min_timeout_ms = 10\nmax_timeout_ms = 5")]
    #[case::unknown_default("default_engine = \"other\"")]
    #[case::no_engines("engines = []")]
    #[case::several_engines_without_default("engines = [\"a\", \"b\"]")]
    fn rejects_invalid(#[case] toml: &str) {
        assert!(matches!(
            FetchLockConfig::from_toml_str(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[rstest]
    #[case::lone_engine("engines = [\"solo\"]", "solo")]
    #[case::implicit_default("engines = [\"billing\", \"default\"]", "default")]
    #[case::explicit("default_engine = \"billing\"\nengines = [\"billing\", \"default\"]", "billing")]
    fn resolves_default_engine(#[case] toml: &str, #[case] expected: &str) {
        let config = FetchLockConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.default_engine_name(), expected);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            FetchLockConfig::from_toml_str("engines = ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
