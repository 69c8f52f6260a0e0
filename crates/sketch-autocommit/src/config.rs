//! Run configuration and credentials.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (e.g. `SKETCH_PATH`)
//! 2. Values from an optional TOML file (`--config`)
//! 3. Built-in defaults (the KitMaker firmware repository)
//!
//! Credentials are kept apart from `PipelineConfig` so the config value can be
//! printed, serialised, and built in tests without touching secrets.

use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

const DEFAULT_OWNER: &str = "levy1107";
const DEFAULT_REPO: &str = "kitmaker-firmware";
const DEFAULT_SKETCH_PATH: &str = "sketches/automatic.ino";
const DEFAULT_COMMIT_TAG: &str = "🤖 Auto-update";
const DEFAULT_ORACLE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ORACLE_MODEL: &str = "gpt-4-turbo";
const DEFAULT_STORE_URL: &str = "https://api.github.com";
const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;

const ENV_REPO_OWNER: &str = "SKETCH_REPO_OWNER";
const ENV_REPO_NAME: &str = "SKETCH_REPO_NAME";
const ENV_BRANCH: &str = "SKETCH_BRANCH";
const ENV_SKETCH_PATH: &str = "SKETCH_PATH";
const ENV_COMMIT_TAG: &str = "SKETCH_COMMIT_TAG";
const ENV_ORACLE_URL: &str = "SKETCH_ORACLE_URL";
const ENV_ORACLE_MODEL: &str = "SKETCH_ORACLE_MODEL";
const ENV_STORE_URL: &str = "SKETCH_STORE_URL";

/// Environment variable holding the oracle access token.
pub const ENV_ORACLE_TOKEN: &str = "OPENAI_API_KEY";
/// Environment variable holding the store access token.
pub const ENV_STORE_TOKEN: &str = "GITHUB_TOKEN";

/// The tracked repository and document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub owner: String,
    pub name: String,
    /// Branch to read and commit on; `None` uses the repository default.
    pub branch: Option<String>,
    /// Path of the sketch inside the repository.
    pub sketch_path: String,
    /// Prefix of every commit message.
    pub commit_tag: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            name: DEFAULT_REPO.to_string(),
            branch: None,
            sketch_path: DEFAULT_SKETCH_PATH.to_string(),
            commit_tag: DEFAULT_COMMIT_TAG.to_string(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    pub model: String,
    /// Sampling temperature; `None` leaves the provider default.
    pub temperature: Option<f64>,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ORACLE_URL.to_string(),
            model: DEFAULT_ORACLE_MODEL.to_string(),
            temperature: None,
            timeout_secs: DEFAULT_ORACLE_TIMEOUT_SECS,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Source-hosting API endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_STORE_URL.to_string(),
            timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Everything a pipeline run needs except credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub repository: RepositoryConfig,
    pub oracle: OracleConfig,
    pub store: StoreConfig,
}

impl PipelineConfig {
    /// Parse a TOML document. Missing keys fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Load `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |var| env::var(var).ok())
    }

    /// `load` with overrides read through `lookup` instead of the process
    /// environment.
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.apply_overrides(&lookup);
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let set = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());
        let slots = [
            (ENV_REPO_OWNER, &mut self.repository.owner),
            (ENV_REPO_NAME, &mut self.repository.name),
            (ENV_SKETCH_PATH, &mut self.repository.sketch_path),
            (ENV_COMMIT_TAG, &mut self.repository.commit_tag),
            (ENV_ORACLE_URL, &mut self.oracle.base_url),
            (ENV_ORACLE_MODEL, &mut self.oracle.model),
            (ENV_STORE_URL, &mut self.store.api_url),
        ];
        for (var, slot) in slots {
            if let Some(value) = set(var) {
                *slot = value;
            }
        }
        if let Some(branch) = set(ENV_BRANCH) {
            self.repository.branch = Some(branch);
        }
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("repository.owner", &self.repository.owner),
            ("repository.name", &self.repository.name),
            ("repository.sketch_path", &self.repository.sketch_path),
            ("oracle.base_url", &self.oracle.base_url),
            ("oracle.model", &self.oracle.model),
            ("store.api_url", &self.store.api_url),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be empty")));
            }
        }
        if self.repository.sketch_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "repository.sketch_path must be relative, got {}",
                self.repository.sketch_path
            )));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(ConfigError::Invalid("oracle.timeout_secs must be > 0".into()));
        }
        if self.store.timeout_secs == 0 {
            return Err(ConfigError::Invalid("store.timeout_secs must be > 0".into()));
        }
        if let Some(t) = self.oracle.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::Invalid(format!(
                    "oracle.temperature must be in [0, 2], got {t}"
                )));
            }
        }
        Ok(())
    }
}

/// Access tokens for the two external services.
#[derive(Clone)]
pub struct Credentials {
    pub oracle_token: String,
    pub store_token: String,
}

impl Credentials {
    pub fn new(oracle_token: impl Into<String>, store_token: impl Into<String>) -> Self {
        Self {
            oracle_token: oracle_token.into(),
            store_token: store_token.into(),
        }
    }

    /// Read both tokens from the environment. A missing or blank variable is
    /// a precondition failure.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Read both tokens through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingCredential(var))
        };
        Ok(Self {
            oracle_token: required(ENV_ORACLE_TOKEN)?,
            store_token: required(ENV_STORE_TOKEN)?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("oracle_token", &"<redacted>")
            .field("store_token", &"<redacted>")
            .finish()
    }
}
