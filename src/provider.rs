//! Provider credentials file (`provider-config.toml`).
//!
//! ```toml
//! shodan = ["key-one", "key-two"]
//! fofa = "user@example.com:key"
//! ```
//!
//! Each source maps to one secret or a list of them. Secrets are also read
//! from `UNCOVER_<SOURCE>_KEY` environment variables (comma separated),
//! e.g. `UNCOVER_SHODAN_KEY` or `UNCOVER_BING_SPIDER_KEY`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use uncover_sources::Keys;

use crate::config::config_dir;
use crate::error::{Result, UncoverError};

/// Secrets configured for one source.
///
/// Deserializes from a bare string or a list of strings; blank entries
/// are dropped.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Secrets(Vec<String>);

impl Secrets {
    /// The configured secrets.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    fn push(&mut self, secret: &str) {
        let secret = secret.trim();
        if !secret.is_empty() && !self.0.iter().any(|s| s == secret) {
            self.0.push(secret.to_owned());
        }
    }
}

impl<'de> Deserialize<'de> for Secrets {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SecretsVisitor;

        impl<'de> Visitor<'de> for SecretsVisitor {
            type Value = Secrets;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a secret string or a list of secret strings")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Secrets, E> {
                let mut secrets = Secrets::default();
                secrets.push(value);
                Ok(secrets)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Secrets, A::Error> {
                let mut secrets = Secrets::default();
                while let Some(value) = seq.next_element::<String>()? {
                    secrets.push(&value);
                }
                Ok(secrets)
            }
        }

        deserializer.deserialize_any(SecretsVisitor)
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED; {}]", self.0.len())
    }
}

/// Source name → secrets, as read from the provider file and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderConfig {
    sources: BTreeMap<String, Secrets>,
}

impl ProviderConfig {
    /// Load credentials from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| UncoverError::Config(format!("{}: {e}", path.display())))?;
        config.sources = std::mem::take(&mut config.sources)
            .into_iter()
            .map(|(name, secrets)| (name.to_lowercase(), secrets))
            .collect();
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let default = Self::default_path();
        if default.is_file() {
            tracing::debug!(path = %default.display(), "loading provider config");
            return Self::from_file(&default);
        }
        Ok(Self::default())
    }

    /// Returns the default provider file path: `<config dir>/uncover/provider-config.toml`.
    pub fn default_path() -> PathBuf {
        config_dir().join("provider-config.toml")
    }

    /// Add a secret for `source`.
    pub fn insert(&mut self, source: &str, secret: &str) {
        self.sources
            .entry(source.to_lowercase())
            .or_default()
            .push(secret);
    }

    /// Secrets configured for `source`.
    pub fn secrets(&self, source: &str) -> &[String] {
        self.sources
            .get(source)
            .map(Secrets::as_slice)
            .unwrap_or_default()
    }

    /// Pick up `UNCOVER_<SOURCE>_KEY` for each of `sources`.
    pub fn merge_env<'a>(&mut self, sources: impl IntoIterator<Item = &'a str>) {
        self.merge_env_with(sources, |var| std::env::var(var).ok());
    }

    fn merge_env_with<'a>(
        &mut self,
        sources: impl IntoIterator<Item = &'a str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        for source in sources {
            let Some(value) = lookup(&env_var_name(source)) else {
                continue;
            };
            for secret in value.split(',') {
                self.insert(source, secret);
            }
        }
    }

    /// The credential set handed to the session.
    pub fn to_keys(&self) -> Keys {
        let mut keys = Keys::new();
        for (source, secrets) in &self.sources {
            for secret in secrets.as_slice() {
                keys.insert(source.as_str(), secret.as_str());
            }
        }
        keys
    }
}

/// `shodan` → `UNCOVER_SHODAN_KEY`, `bing-spider` → `UNCOVER_BING_SPIDER_KEY`.
fn env_var_name(source: &str) -> String {
    format!("UNCOVER_{}_KEY", source.to_uppercase().replace('-', "_"))
}
