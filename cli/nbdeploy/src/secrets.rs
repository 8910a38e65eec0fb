//! Deployment credentials.
//!
//! The credentials file is a flat TOML table of strings
//! (`FASTLY_KEY = '...'`). Any key can be overridden with an
//! `NBDEPLOY_<KEY>` environment variable. The file is parsed as data only.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::CliError;

pub const FASTLY_KEY: &str = "FASTLY_KEY";
pub const FASTLY_SERVICE_ID: &str = "FASTLY_SERVICE_ID";
pub const OS_USERNAME: &str = "OS_USERNAME";
pub const OS_PASSWORD: &str = "OS_PASSWORD";
pub const LOGENTRIES_TOKEN: &str = "LOGENTRIES_TOKEN";
pub const DOCKER_TRIGGER_TOKEN: &str = "DOCKER_TRIGGER_TOKEN";

/// Every key an override is looked up for.
pub const KNOWN_KEYS: [&str; 6] = [
    FASTLY_KEY,
    FASTLY_SERVICE_ID,
    OS_USERNAME,
    OS_PASSWORD,
    LOGENTRIES_TOKEN,
    DOCKER_TRIGGER_TOKEN,
];

const ENV_PREFIX: &str = "NBDEPLOY_";

/// Named secret strings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    values: BTreeMap<String, String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

impl Secrets {
    /// Load the credentials file (missing is fine) and apply overrides from
    /// the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut secrets = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read credentials from {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse credentials from {}", path.display()))?
        } else {
            Self::default()
        };
        secrets.apply_overrides(|key| std::env::var(key).ok());
        Ok(secrets)
    }

    /// Parse a flat table of strings.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let values: BTreeMap<String, String> =
            toml::from_str(contents).context("credentials must be a flat table of strings")?;
        Ok(Self { values })
    }

    /// Override known keys from `NBDEPLOY_<KEY>` variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in KNOWN_KEYS {
            if let Some(value) = lookup(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.is_empty()) {
                self.values.insert(key.to_string(), value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// A secret that must be present.
    pub fn require(&self, key: &str) -> Result<&str, CliError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CliError::MissingSecret(key.to_string()))
    }
}
