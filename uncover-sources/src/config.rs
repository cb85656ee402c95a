//! Session configuration with sensible defaults.
//!
//! [`SessionConfig`] controls timeouts, retries, proxying, TLS verification
//! and the rate-limit table. It is fixed once a [`crate::Session`] is built.

use crate::error::SourceError;
use crate::ratelimit::RateLimits;

/// Configuration for the shared execution session.
///
/// Use [`Default::default()`] for sensible defaults, or construct with
/// field overrides for custom behaviour.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Retries after a transport-level failure. Non-2xx responses are never retried.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential retry backoff.
    pub retry_backoff_ms: u64,
    /// Upstream proxy URL (`http://` or `https://`).
    pub proxy: Option<String>,
    /// Proxy basic auth as `username:password`.
    pub proxy_auth: Option<String>,
    /// Verify TLS certificates. Off by default.
    pub verify_tls: bool,
    /// Custom User-Agent. If `None`, rotates through a built-in list of
    /// realistic browser User-Agents per request.
    pub user_agent: Option<String>,
    /// Rate-limit table; built-in policies merged with caller overrides.
    pub rate_limits: RateLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 2,
            retry_backoff_ms: 500,
            proxy: None,
            proxy_auth: None,
            verify_tls: false,
            user_agent: None,
            rate_limits: RateLimits::default(),
        }
    }
}

impl SessionConfig {
    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `timeout_seconds` must be greater than 0
    /// - `proxy` must parse as a URL
    /// - `proxy_auth` must be `username:password` with a non-empty username
    ///   and requires `proxy`
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.timeout_seconds == 0 {
            return Err(SourceError::Config(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        if let Some(ref proxy) = self.proxy {
            url::Url::parse(proxy)
                .map_err(|e| SourceError::Config(format!("invalid proxy URL: {e}")))?;
        }
        if let Some(ref auth) = self.proxy_auth {
            if self.proxy.is_none() {
                return Err(SourceError::Config(
                    "proxy_auth requires a proxy".into(),
                ));
            }
            if parse_proxy_auth(auth).is_none() {
                return Err(SourceError::Config(
                    "proxy_auth must be username:password".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Split `username:password`; the username must be non-empty.
pub fn parse_proxy_auth(auth: &str) -> Option<(&str, &str)> {
    match auth.split_once(':') {
        Some((user, pass)) if !user.is_empty() => Some((user, pass)),
        _ => None,
    }
}
