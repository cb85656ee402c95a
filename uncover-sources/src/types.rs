//! Core types: queries, results and the channel aliases that carry them.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SourceError;

/// Capacity of per-source and merged result channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Receiving half of a result stream.
pub type ResultStream = mpsc::Receiver<ReconResult>;

/// Sending half of a result stream.
pub type ResultSender = mpsc::Sender<ReconResult>;

/// A single query submitted to one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Provider-specific query text (a domain for the scraping sources).
    pub text: String,
    /// Soft cap on the number of results a source should attempt to return.
    pub limit: usize,
}

impl Query {
    /// Build a query.
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
        }
    }
}

/// One discovered asset, or a failure carried in-band.
///
/// A result with [`error`](Self::error) set is not a datum: the orchestrator
/// forwards it untouched and the consumer decides whether to log or skip it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconResult {
    /// Unix timestamp (seconds) stamped when the result entered the merged stream.
    pub timestamp: i64,
    /// Name of the source that produced this result.
    pub source: String,
    /// IP address, when the source reports one.
    pub ip: String,
    /// Port, or 0 when unknown.
    pub port: u16,
    /// Host name.
    pub host: String,
    /// `protocol://host:port` form, when known.
    pub url: String,
    /// The provider's original payload.
    #[serde(skip)]
    pub raw: Vec<u8>,
    /// Carried failure.
    #[serde(skip)]
    pub error: Option<SourceError>,
}

impl ReconResult {
    /// An empty result tagged with `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// A carried failure tagged with `source`.
    pub fn failure(source: impl Into<String>, error: SourceError) -> Self {
        Self {
            source: source.into(),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Whether this item carries a failure rather than a datum.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// `ip:port`, bracketing IPv6 addresses.
    pub fn ip_port(&self) -> String {
        join_host_port(&self.ip, self.port)
    }

    /// `host:port`, bracketing IPv6 addresses.
    pub fn host_port(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// The raw payload as text (lossy).
    pub fn raw_data(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    /// JSON form of the public fields.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Use the JSON form of this result as its raw payload.
    #[must_use]
    pub fn with_self_as_raw(mut self) -> Self {
        self.raw = self.to_json().into_bytes();
        self
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ReconResult {
        ReconResult {
            timestamp: 1_700_000_000,
            source: "shodan".into(),
            ip: "93.184.216.34".into(),
            port: 443,
            host: "example.com".into(),
            url: "https://example.com:443".into(),
            raw: b"{\"ip_str\":\"93.184.216.34\"}".to_vec(),
            error: None,
        }
    }

    #[test]
    fn ip_and_host_port() {
        let result = sample();
        assert_eq!(result.ip_port(), "93.184.216.34:443");
        assert_eq!(result.host_port(), "example.com:443");
    }

    #[test]
    fn ipv6_is_bracketed() {
        let result = ReconResult {
            ip: "2001:db8::1".into(),
            port: 80,
            ..ReconResult::new("fofa")
        };
        assert_eq!(result.ip_port(), "[2001:db8::1]:80");
    }

    #[test]
    fn json_omits_raw_and_error() {
        let json = sample().to_json();
        assert!(json.contains("\"ip\":\"93.184.216.34\""));
        assert!(json.contains("\"source\":\"shodan\""));
        assert!(!json.contains("ip_str"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn failure_is_marked() {
        let result = ReconResult::failure("bing-spider", SourceError::Http("reset".into()));
        assert!(result.is_error());
        assert_eq!(result.source, "bing-spider");
        assert!(!sample().is_error());
    }

    #[test]
    fn raw_data_is_lossy_text() {
        assert_eq!(sample().raw_data(), "{\"ip_str\":\"93.184.216.34\"}");
    }

    #[test]
    fn self_as_raw_round_trips() {
        let result = ReconResult {
            host: "a.example.com".into(),
            ..ReconResult::new("bing-spider")
        }
        .with_self_as_raw();
        let decoded: ReconResult = serde_json::from_slice(&result.raw).expect("deserialize");
        assert_eq!(decoded.host, "a.example.com");
    }
}
