//! Bing results-page scraper.

use std::sync::Arc;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE};

use crate::agent::{spawn_producer, Agent};
use crate::crawler::{SearchPages, SiteExclusionCrawler};
use crate::error::SourceError;
use crate::http;
use crate::session::Session;
use crate::types::{Query, ReconResult, ResultStream};

use super::{bootstrap_cookies, fetch_page};

pub(crate) const SOURCE: &str = "bing-spider";
const BASE_URL: &str = "https://www.bing.com";
const PAGE_SIZE: usize = 10;
/// Bing stops serving new results past this offset.
const MAX_CURSOR: usize = 100;
const NEXT_MARKER: &str = "<div class=\"sw_next\">";

/// Subdomain discovery through `site:` searches on Bing.
#[derive(Debug, Clone)]
pub struct BingSpiderAgent {
    base_url: String,
}

impl Default for BingSpiderAgent {
    fn default() -> Self {
        Self::with_base_url(BASE_URL)
    }
}

impl BingSpiderAgent {
    /// Point the agent at a different site root.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

struct BingPages {
    session: Arc<Session>,
    base_url: String,
    cookies: Option<String>,
}

impl SearchPages for BingPages {
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
        let first = cursor.to_string();
        let mut request = self
            .session
            .get(&format!("{}/search", self.base_url))
            .query(&[("q", query), ("first", first.as_str())])
            .header(ACCEPT, http::ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .header("Upgrade-Insecure-Requests", "1");
        if let Some(ref cookies) = self.cookies {
            request = request.header(COOKIE, cookies.as_str());
        }
        fetch_page(&self.session, request, SOURCE).await
    }

    fn has_next_page(&self, body: &str, _next_cursor: usize) -> bool {
        body.contains(NEXT_MARKER)
    }
}

impl Agent for BingSpiderAgent {
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
            let pages = BingPages {
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
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE_ONE: &str = r#"<html><body><ol id="b_results">
<li class="b_algo"><h2><a href="https://www.example.com/">Example</a></h2>
<cite>https://www.example.com</cite></li>
<li class="b_algo"><h2><a href="https://docs.example.com/start">Docs</a></h2></li>
</ol><nav><div class="sw_next">Next</div></nav></body></html>"#;

    const PAGE_TWO: &str = r#"<html><body><ol id="b_results">
<li class="b_algo"><h2><a href="https://mail.example.com/">Mail</a></h2></li>
</ol></body></html>"#;

    #[test]
    fn next_marker_detection() {
        let session = session(Keys::new());
        let pages = BingPages {
            session,
            base_url: BASE_URL.into(),
            cookies: None,
        };
        assert!(pages.has_next_page(PAGE_ONE, 10));
        assert!(!pages.has_next_page(PAGE_TWO, 20));
    }

    #[tokio::test]
    async fn crawls_with_bootstrap_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "MUID=abc123; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "site:.example.com"))
            .and(query_param("first", "0"))
            .and(header("cookie", "MUID=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_ONE))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "site:.example.com"))
            .and(query_param("first", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_TWO))
            .expect(1)
            .mount(&server)
            .await;
        // Refinement clause " -site:www.example.com -site:docs.example.com"
        // and " -site:mail.example.com" both answer with an empty page.
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let rx = BingSpiderAgent::with_base_url(server.uri())
            .query(session(Keys::new()), Query::new("example.com", 100))
            .unwrap();
        let results = collect(rx).await;

        let hosts: Vec<&str> = results.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(hosts, vec!["www.example.com", "docs.example.com", "mail.example.com"]);
        assert!(results.iter().all(|r| r.source == SOURCE && r.port == 80));
    }

    #[tokio::test]
    async fn unreachable_home_page_is_carried() {
        let rx = BingSpiderAgent::with_base_url("http://127.0.0.1:1")
            .query(session(Keys::new()), Query::new("example.com", 100))
            .unwrap();
        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error());
    }

    #[tokio::test]
    #[ignore] // Live test: run with `cargo test -- --ignored`
    async fn live_bing_spider() {
        let rx = BingSpiderAgent::default()
            .query(session(Keys::new()), Query::new("rust-lang.org", 20))
            .unwrap();
        let results = collect(rx).await;
        assert!(results.iter().any(|r| r.host.ends_with("rust-lang.org")));
    }
}
