//! Yahoo results-page scraper.

use std::future::Future;
use std::sync::Arc;

use reqwest::header::{ACCEPT, COOKIE};

use crate::agent::{spawn_producer, Agent};
use crate::crawler::{decode_body, SearchPages, SiteExclusionCrawler, SubdomainMatcher};
use crate::error::SourceError;
use crate::http;
use crate::session::Session;
use crate::types::{Query, ReconResult, ResultStream};

use super::{bootstrap_cookies, fetch_page};

pub(crate) const SOURCE: &str = "yahoo-spider";
const BASE_URL: &str = "https://search.yahoo.com";
const PAGE_SIZE: usize = 50;
const MAX_CURSOR: usize = 500;
const NEXT_MARKER: &str = "Next<ins></ins></a>";

/// Subdomain discovery through `site:` searches on Yahoo.
#[derive(Debug, Clone)]
pub struct YahooSpiderAgent {
    base_url: String,
}

impl Default for YahooSpiderAgent {
    fn default() -> Self {
        Self::with_base_url(BASE_URL)
    }
}

impl YahooSpiderAgent {
    /// Point the agent at a different site root.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

struct YahooPages {
    session: Arc<Session>,
    base_url: String,
    cookies: Option<String>,
}

/// Yahoo bolds query terms inside result URLs.
fn strip_highlighting(body: &str) -> String {
    body.replace("<b>", "").replace("</b>", "")
}

impl SearchPages for YahooPages {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn max_cursor(&self, _limit: usize) -> usize {
        MAX_CURSOR
    }

    async fn fetch(&self, query: &str, cursor: usize) -> Result<String, SourceError> {
        let b = cursor.to_string();
        let pz = PAGE_SIZE.to_string();
        let mut request = self
            .session
            .get(&format!("{}/search", self.base_url))
            .query(&[("p", query), ("b", b.as_str()), ("pz", pz.as_str())])
            .header(ACCEPT, http::ACCEPT_HTML);
        if let Some(ref cookies) = self.cookies {
            request = request.header(COOKIE, cookies.as_str());
        }
        fetch_page(&self.session, request, SOURCE).await
    }

    fn has_next_page(&self, body: &str, _next_cursor: usize) -> bool {
        body.contains(NEXT_MARKER)
    }

    fn extract(
        &self,
        matcher: &SubdomainMatcher,
        body: &str,
    ) -> impl Future<Output = Vec<String>> + Send {
        let text = strip_highlighting(&decode_body(body));
        std::future::ready(matcher.hosts_in(&text))
    }
}

impl Agent for YahooSpiderAgent {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn query(&self, session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError> {
        let base_url = self.base_url.clone();
        Ok(spawn_producer(SOURCE, move |tx| async move {
            let home = format!("{base_url}/");
            let cookies = match bootstrap_cookies(&session, &home, SOURCE).await {
                Ok(cookies) => cookies,
                Err(err) => {
                    let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                    return 0;
                }
            };
            let pages = YahooPages {
                session,
                base_url,
                cookies,
            };
            SiteExclusionCrawler::new(pages).run(&query, &tx).await.len()
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

    #[tokio::test]
    async fn highlighted_hosts_are_recovered() {
        let pages = YahooPages {
            session: session(Keys::new()),
            base_url: BASE_URL.into(),
            cookies: None,
        };
        let matcher = SubdomainMatcher::new("example.com").unwrap();
        let body = "<span>https://<b>shop</b>.example.com</span> <span>api.<b>example.com</b></span>";
        let hosts = pages.extract(&matcher, body).await;
        assert_eq!(hosts, vec!["shop.example.com", "api.example.com"]);
    }

    #[tokio::test]
    async fn requests_fifty_results_per_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("p", "site:.example.com"))
            .and(query_param("b", "0"))
            .and(query_param("pz", "50"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<a>news.<b>example.com</b></a>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rx = YahooSpiderAgent::with_base_url(server.uri())
            .query(session(Keys::new()), Query::new("example.com", 100))
            .unwrap();
        let results = collect(rx).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].host, "news.example.com");
        assert_eq!(results[0].url, "http://news.example.com:80");
    }
}
