//! Engine configuration
//!
//! Every section is optional in YAML; missing keys take their defaults.
//!
//! ```yaml
//! manager:
//!   debounce_ms: 300
//!   max_batch_size: 5
//! policy:
//!   max_affected_fraction: 0.4
//! pool:
//!   workers: 2
//! ```

use crate::manager::ManagerConfig;
use crate::policy::PolicyConfig;
use crate::pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub manager: ManagerConfig,
    pub policy: PolicyConfig,
    pub pool: PoolConfig,
}

impl EngineConfig {
    /// Parse and validate
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        match self.manager.problems().or_else(|| self.policy.problems()) {
            Some(problem) => Err(ConfigError::Invalid(problem)),
            None => Ok(()),
        }
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
