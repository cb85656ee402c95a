//! Application configuration, loaded from `~/.config/uncover/config.toml`.
//!
//! Every section is optional; missing keys take their defaults. The file
//! only tunes behaviour. Provider credentials live in a separate file, see
//! [`crate::provider`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uncover_sources::config::parse_proxy_auth;
use uncover_sources::{RateLimitPolicy, RateLimits, SessionConfig};

use crate::error::{Result, UncoverError};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncoverConfig {
    /// Results requested from each source per query.
    pub limit: usize,
    /// Sources used when none are given on the command line.
    pub engines: Vec<String>,
    /// HTTP session settings.
    pub session: SessionSection,
    /// Rate-limit table overrides.
    pub rate_limit: RateLimitSection,
    /// Result formatting.
    pub output: OutputSection,
}

impl Default for UncoverConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            engines: vec!["shodan".to_owned()],
            session: SessionSection::default(),
            rate_limit: RateLimitSection::default(),
            output: OutputSection::default(),
        }
    }
}

/// `[session]`: timeouts, retries and proxying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Retries after a transport failure.
    pub retries: u32,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Upstream proxy URL.
    pub proxy: Option<String>,
    /// Proxy credentials as `username:password`.
    pub proxy_auth: Option<String>,
    /// Verify TLS certificates.
    pub verify_tls: bool,
    /// Fixed User-Agent instead of the rotating browser list.
    pub user_agent: Option<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            timeout_seconds: defaults.timeout_seconds,
            retries: defaults.max_retries,
            retry_backoff_ms: defaults.retry_backoff_ms,
            proxy: None,
            proxy_auth: None,
            verify_tls: defaults.verify_tls,
            user_agent: None,
        }
    }
}

/// One rate-limit policy as written in TOML.
///
/// Either `"unlimited"` or `{ max_count = 30, period_secs = 60 }`.
/// A `max_count` of 0 also means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyConfig {
    /// The literal `"unlimited"`.
    Keyword(PolicyKeyword),
    /// At most `max_count` requests per `period_secs` seconds.
    Limited {
        /// Admissions per window.
        max_count: u32,
        /// Window length in seconds.
        period_secs: u64,
    },
}

/// Named policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKeyword {
    /// No rate limiting.
    Unlimited,
}

impl PolicyConfig {
    /// `max_count` requests per minute.
    pub fn per_minute(max_count: u32) -> Self {
        Self::Limited {
            max_count,
            period_secs: 60,
        }
    }

    /// The runtime policy this entry describes.
    pub fn to_policy(self) -> RateLimitPolicy {
        match self {
            Self::Keyword(PolicyKeyword::Unlimited) => RateLimitPolicy::Unlimited,
            Self::Limited {
                max_count,
                period_secs,
            } => RateLimitPolicy::limited(max_count, Duration::from_secs(period_secs)),
        }
    }

    fn validate(self, name: &str) -> Result<()> {
        if let Self::Limited {
            max_count,
            period_secs,
        } = self
        {
            if max_count > 0 && period_secs == 0 {
                return Err(UncoverError::Config(format!(
                    "rate_limit.{name}: period_secs must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

/// `[rate_limit]`: default policy plus per-source overrides.
///
/// Built-in per-source policies apply underneath these overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Policy for sources without a built-in or explicit entry.
    pub default: PolicyConfig,
    /// Explicit per-source policies.
    pub sources: BTreeMap<String, PolicyConfig>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            default: PolicyConfig::per_minute(30),
            sources: BTreeMap::new(),
        }
    }
}

impl RateLimitSection {
    /// Built-in table with this section merged on top.
    pub fn to_rate_limits(&self) -> RateLimits {
        let overrides: HashMap<String, RateLimitPolicy> = self
            .sources
            .iter()
            .map(|(name, policy)| (name.clone(), policy.to_policy()))
            .collect();
        RateLimits::default()
            .with_default(self.default.to_policy())
            .merge(overrides)
    }
}

/// How results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Field template, see [`OutputSection::fields`].
    #[default]
    Template,
    /// One JSON object per line.
    Json,
    /// The provider's original payload.
    Raw,
    /// Comma-separated values with a header row.
    Csv,
}

/// `[output]`: result formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Output format.
    pub format: OutputKind,
    /// Template for [`OutputKind::Template`], e.g. `ip:port` or `host`.
    pub fields: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: OutputKind::Template,
            fields: "ip:port".to_owned(),
        }
    }
}

impl UncoverConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| UncoverError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UncoverError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let default = Self::default_config_path();
        if default.is_file() {
            tracing::debug!(path = %default.display(), "loading default config");
            return Self::from_file(&default);
        }
        Ok(Self::default())
    }

    /// Returns the default config file path: `<config dir>/uncover/config.toml`.
    pub fn default_config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Reject values the session or orchestrator cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(UncoverError::Config("limit must be greater than 0".into()));
        }
        if self.session.timeout_seconds == 0 {
            return Err(UncoverError::Config(
                "session.timeout_seconds must be greater than 0".into(),
            ));
        }
        if let Some(ref auth) = self.session.proxy_auth {
            if parse_proxy_auth(auth).is_none() {
                return Err(UncoverError::Config(
                    "session.proxy_auth must be username:password".into(),
                ));
            }
        }
        self.rate_limit.default.validate("default")?;
        for (name, policy) in &self.rate_limit.sources {
            policy.validate(&format!("sources.{name}"))?;
        }
        if self.output.format == OutputKind::Template && self.output.fields.trim().is_empty() {
            return Err(UncoverError::Config(
                "output.fields must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Session settings for the engine.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timeout_seconds: self.session.timeout_seconds,
            max_retries: self.session.retries,
            retry_backoff_ms: self.session.retry_backoff_ms,
            proxy: self.session.proxy.clone(),
            proxy_auth: self.session.proxy_auth.clone(),
            verify_tls: self.session.verify_tls,
            user_agent: self.session.user_agent.clone(),
            rate_limits: self.rate_limit.to_rate_limits(),
        }
    }
}

/// `<config dir>/uncover`, falling back to the working directory.
pub(crate) fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("uncover")
}
