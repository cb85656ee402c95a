//! RapidDNS subdomain table scraper; one page per query.

use std::sync::Arc;

use reqwest::header::ACCEPT;

use crate::agent::{spawn_producer, Agent};
use crate::crawler::SubdomainMatcher;
use crate::error::SourceError;
use crate::http;
use crate::session::Session;
use crate::types::{Query, ReconResult, ResultStream};

use super::fetch_page;

pub(crate) const SOURCE: &str = "rapiddns-spider";
const BASE_URL: &str = "https://rapiddns.io";

/// Reads the full subdomain table RapidDNS keeps for a domain.
#[derive(Debug, Clone)]
pub struct RapidDnsSpiderAgent {
    base_url: String,
}

impl Default for RapidDnsSpiderAgent {
    fn default() -> Self {
        Self::with_base_url(BASE_URL)
    }
}

impl RapidDnsSpiderAgent {
    /// Point the agent at a different site root.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl Agent for RapidDnsSpiderAgent {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn query(&self, session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError> {
        let matcher = SubdomainMatcher::new(&query.text)?;
        let url = format!(
            "{}/subdomain/{}",
            self.base_url,
            urlencoding::encode(matcher.domain())
        );

        Ok(spawn_producer(SOURCE, move |tx| async move {
            let request = session
                .get(&url)
                .query(&[("full", "1")])
                .header(ACCEPT, http::ACCEPT_HTML);
            let body = match fetch_page(&session, request, SOURCE).await {
                Ok(body) => body,
                Err(err) => {
                    let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                    return 0;
                }
            };

            let mut emitted = 0;
            for host in matcher.hosts_in(&body) {
                let result = ReconResult {
                    host,
                    ..ReconResult::new(SOURCE)
                }
                .with_self_as_raw();
                if tx.send(result).await.is_err() {
                    break;
                }
                emitted += 1;
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
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TABLE: &str = r#"<table id="table"><tbody>
<tr><th>1</th><td>www.example.com</td><td><a href="/sameip/93.184.216.34">93.184.216.34</a></td><td>A</td></tr>
<tr><th>2</th><td>mail.example.com</td><td>mx.example.net</td><td>MX</td></tr>
<tr><th>3</th><td>www.example.com</td><td>2606:2800::1</td><td>AAAA</td></tr>
</tbody></table>"#;

    #[test]
    fn table_hosts_are_unique() {
        let matcher = SubdomainMatcher::new("example.com").unwrap();
        assert_eq!(
            matcher.hosts_in(TABLE),
            vec!["www.example.com", "mail.example.com"]
        );
    }

    #[tokio::test]
    async fn emits_one_result_per_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subdomain/example.com"))
            .and(query_param("full", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TABLE))
            .expect(1)
            .mount(&server)
            .await;

        let rx = RapidDnsSpiderAgent::with_base_url(server.uri())
            .query(session(Keys::new()), Query::new("example.com", 100))
            .unwrap();
        let results = collect(rx).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.port == 0 && !r.raw.is_empty()));
    }

    #[tokio::test]
    async fn server_error_is_carried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let rx = RapidDnsSpiderAgent::with_base_url(server.uri())
            .query(session(Keys::new()), Query::new("example.com", 100))
            .unwrap();
        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0].error,
            Some(SourceError::Status { status: 503, .. })
        ));
    }
}
