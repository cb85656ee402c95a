//! Shodan host search API.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::agent::{require_key, spawn_producer, Agent};
use crate::crawler::Target;
use crate::error::SourceError;
use crate::session::Session;
use crate::types::{Query, ReconResult, ResultStream};

use super::fetch_json;

pub(crate) const SOURCE: &str = "shodan";
const BASE_URL: &str = "https://api.shodan.io";

/// Shodan `/shodan/host/search`, one page of matches per request.
#[derive(Debug, Clone)]
pub struct ShodanAgent {
    base_url: String,
}

impl Default for ShodanAgent {
    fn default() -> Self {
        Self::with_base_url(BASE_URL)
    }
}

impl ShodanAgent {
    /// Point the agent at a different API root.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: Vec<Value>,
    #[serde(default)]
    total: usize,
}

fn to_result(item: &Value) -> ReconResult {
    let mut result = ReconResult::new(SOURCE);
    if let Some(port) = item.get("port").and_then(Value::as_u64) {
        result.port = u16::try_from(port).unwrap_or_default();
    }
    if let Some(ip) = item.get("ip_str").and_then(Value::as_str) {
        result.ip = ip.to_owned();
    }
    // The last listed hostname wins.
    if let Some(hostnames) = item.get("hostnames").and_then(Value::as_array) {
        if let Some(target) = hostnames
            .iter()
            .filter_map(Value::as_str)
            .filter_map(Target::parse)
            .last()
        {
            result.host = target.host;
        }
    }
    result.raw = serde_json::to_vec(item).unwrap_or_default();
    result
}

impl Agent for ShodanAgent {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn query(&self, session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError> {
        require_key(&session, SOURCE)?;
        let url = format!("{}/shodan/host/search", self.base_url);

        Ok(spawn_producer(SOURCE, move |tx| async move {
            let mut emitted = 0usize;
            let mut total = 0usize;
            let mut page = 1u32;
            loop {
                // Each request picks its own secret.
                let key = match require_key(&session, SOURCE) {
                    Ok(key) => key,
                    Err(err) => {
                        let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                        break;
                    }
                };
                let page_param = page.to_string();
                let request = session.get(&url).query(&[
                    ("key", key.as_str()),
                    ("query", query.text.as_str()),
                    ("page", page_param.as_str()),
                ]);
                let response: SearchResponse = match fetch_json(&session, request, SOURCE).await {
                    Ok(response) => response,
                    Err(err) => {
                        let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                        break;
                    }
                };
                if total == 0 {
                    total = response.total;
                }
                if response.matches.is_empty() {
                    break;
                }
                for item in &response.matches {
                    if tx.send(to_result(item)).await.is_err() {
                        return emitted;
                    }
                    emitted += 1;
                }
                if emitted >= query.limit || emitted >= total {
                    break;
                }
                page += 1;
            }
            emitted
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::agents::test_support::{collect, session};
    use crate::keys::Keys;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn maps_port_ip_and_last_hostname() {
        let item = json!({
            "ip_str": "93.184.216.34",
            "port": 443,
            "hostnames": ["first.example.com", "Second.Example.com"]
        });
        let result = to_result(&item);
        assert_eq!(result.ip, "93.184.216.34");
        assert_eq!(result.port, 443);
        assert_eq!(result.host, "second.example.com");
        assert!(result.raw_data().contains("ip_str"));
    }

    #[test]
    fn missing_key_fails_preflight() {
        let err = ShodanAgent::default()
            .query(session(Keys::new()), Query::new("port:22", 10))
            .unwrap_err();
        assert!(matches!(err, SourceError::Credentials(_)));
    }

    #[tokio::test]
    async fn paginates_until_total_is_reached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shodan/host/search"))
            .and(query_param("key", "secret"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 3,
                "matches": [
                    {"ip_str": "10.0.0.1", "port": 80},
                    {"ip_str": "10.0.0.2", "port": 81}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/shodan/host/search"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 3,
                "matches": [{"ip_str": "10.0.0.3", "port": 82}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let agent = ShodanAgent::with_base_url(server.uri());
        let rx = agent
            .query(session(Keys::new().with("shodan", "secret")), Query::new("nginx", 100))
            .unwrap();
        let results = collect(rx).await;

        let ips: Vec<&str> = results.iter().map(|r| r.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[tokio::test]
    async fn every_page_request_picks_a_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shodan/host/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 40,
                "matches": [{"ip_str": "10.0.0.1", "port": 80}]
            })))
            .expect(40)
            .mount(&server)
            .await;

        let keys = Keys::new().with("shodan", "k1").with("shodan", "k2");
        let agent = ShodanAgent::with_base_url(server.uri());
        let rx = agent.query(session(keys), Query::new("nginx", 100)).unwrap();
        assert_eq!(collect(rx).await.len(), 40);

        let used: std::collections::BTreeSet<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter_map(|request| {
                request
                    .url
                    .query_pairs()
                    .find(|(name, _)| name == "key")
                    .map(|(_, value)| value.into_owned())
            })
            .collect();
        // 40 independent picks between two secrets reach both.
        assert_eq!(used.into_iter().collect::<Vec<_>>(), vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn http_error_is_carried_in_band() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let agent = ShodanAgent::with_base_url(server.uri());
        let rx = agent
            .query(session(Keys::new().with("shodan", "bad")), Query::new("nginx", 100))
            .unwrap();
        let results = collect(rx).await;

        assert_eq!(results.len(), 1);
        let err = results[0].error.as_ref().unwrap();
        assert!(matches!(err, SourceError::Status { status: 401, .. }));
        assert!(!err.to_string().contains("bad"));
    }

    #[tokio::test]
    #[ignore] // Live test: needs UNCOVER_SHODAN_KEY
    async fn live_shodan_search() {
        let Ok(key) = std::env::var("UNCOVER_SHODAN_KEY") else {
            return;
        };
        let rx = ShodanAgent::default()
            .query(session(Keys::new().with("shodan", key)), Query::new("nginx", 5))
            .unwrap();
        let results = collect(rx).await;
        assert!(!results.is_empty());
    }
}
