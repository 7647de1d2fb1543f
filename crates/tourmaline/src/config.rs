//! Startup configuration.
//!
//! One TOML file names the master key secret and points at the policy and
//! permission documents. Everything loads once at startup and is immutable
//! afterwards; a bad document is fatal before the gateway serves anything.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tourmaline_policy::{FieldPolicyRegistry, PolicyError, load_policies_from_str};
use tourmaline_rbac::{PermissionTable, RbacError};

/// Configuration loading failures. All fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Permissions(#[from] RbacError),
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Name of the master key secret in the secret store.
    pub master_key_ref: String,
    /// Path to the field policy document, relative to this file.
    pub policy_file: PathBuf,
    /// Path to the permission table document. Absent means the built-in
    /// standard table.
    pub permissions_file: Option<PathBuf>,
}

impl GatewayConfig {
    /// Loads and parses the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read(path)?;
        let mut config: GatewayConfig = toml::from_str(&text)?;

        // Referenced documents resolve relative to the config file.
        if let Some(dir) = path.parent() {
            config.policy_file = dir.join(&config.policy_file);
            config.permissions_file = config.permissions_file.map(|p| dir.join(p));
        }
        Ok(config)
    }

    /// Loads the field policy registry this configuration points at.
    pub fn load_policies(&self) -> Result<FieldPolicyRegistry, ConfigError> {
        let text = read(&self.policy_file)?;
        let registry = load_policies_from_str(&text)?;
        tracing::debug!(
            path = %self.policy_file.display(),
            policies = registry.len(),
            "field policies loaded"
        );
        Ok(registry)
    }

    /// Loads the permission table, falling back to the built-in standard
    /// table when no document is configured.
    pub fn load_permissions(&self) -> Result<PermissionTable, ConfigError> {
        match &self.permissions_file {
            Some(path) => {
                let text = read(path)?;
                Ok(PermissionTable::from_toml_str(&text)?)
            }
            None => Ok(PermissionTable::standard()),
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
