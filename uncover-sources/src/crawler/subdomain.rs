//! Subdomain extraction and target normalisation.
//!
//! Every crawler path, whether it matches hosts in a results page or in a
//! redirect target, funnels through [`Target::parse`] so discovered names
//! compare equal regardless of scheme, port or letter case.

use std::collections::HashSet;

use regex::Regex;
use url::Url;

use crate::error::SourceError;

/// A normalised `(protocol, host, port)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// `http` or `https`.
    pub scheme: String,
    /// Lowercased host name.
    pub host: String,
    /// Explicit port, or the scheme's default.
    pub port: u16,
}

impl Target {
    /// Normalise `raw`, which may be a bare host, `host:port`, or a URL.
    ///
    /// A missing scheme defaults to `http`; a missing port defaults to 80
    /// for `http` and 443 for `https`. Paths, queries and fragments are
    /// dropped. Returns `None` if no host can be recovered.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let lowered = raw.to_ascii_lowercase();
        let candidate = if lowered.starts_with("http://") || lowered.starts_with("https://") {
            raw.to_owned()
        } else {
            format!("http://{}", raw.trim_start_matches("//"))
        };

        let parsed = Url::parse(&candidate).ok()?;
        let host = parsed.host_str()?.trim_end_matches('.').to_owned();
        if host.is_empty() {
            return None;
        }
        let port = parsed.port_or_known_default().unwrap_or(80);

        Some(Self {
            scheme: parsed.scheme().to_owned(),
            host,
            port,
        })
    }

    /// `protocol://host:port`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Percent-decode a page body, falling back to the raw text when the
/// body is not valid percent-encoded UTF-8.
pub fn decode_body(body: &str) -> String {
    match urlencoding::decode(body) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => body.to_owned(),
    }
}

/// Finds names under one registrable domain in free text.
///
/// The bare domain itself is not matched; at least one label must precede
/// it. An optional `http(s)://` prefix and `:port` suffix are captured so
/// the result can be fed to [`Target::parse`].
#[derive(Debug, Clone)]
pub struct SubdomainMatcher {
    domain: String,
    pattern: Regex,
}

impl SubdomainMatcher {
    /// Build a matcher for `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if `domain` is empty or the pattern
    /// cannot be compiled.
    pub fn new(domain: &str) -> Result<Self, SourceError> {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return Err(SourceError::Config("empty crawl domain".into()));
        }
        let pattern = format!(
            r"(?i)(?:https?://)?(?:[a-z0-9](?:[a-z0-9-]{{0,61}}[a-z0-9])?\.)+{}(?::\d{{1,5}})?\b",
            regex::escape(&domain)
        );
        let pattern = Regex::new(&pattern)
            .map_err(|e| SourceError::Config(format!("invalid subdomain pattern: {e}")))?;
        Ok(Self { domain, pattern })
    }

    /// The domain this matcher was built for, lowercased.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Raw matches (with scheme and port when present), first occurrence order.
    pub fn targets_in(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().to_owned())
            .filter(|m| seen.insert(m.to_ascii_lowercase()))
            .collect()
    }

    /// Normalised host names, first occurrence order, without duplicates.
    pub fn hosts_in(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.targets_in(text)
            .iter()
            .filter_map(|raw| Target::parse(raw))
            .map(|target| target.host)
            .filter(|host| seen.insert(host.clone()))
            .collect()
    }
}
