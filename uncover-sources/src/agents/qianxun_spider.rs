//! Qianxun (dnsscan.cn) paginated form scraper.
//!
//! Registered as destructive: the site throttles aggressively and the
//! orchestrator never runs it unattended.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

use crate::agent::{spawn_producer, Agent};
use crate::crawler::{SubdomainMatcher, Target};
use crate::error::SourceError;
use crate::session::Session;
use crate::types::{Query, ReconResult, ResultStream};

use super::fetch_page;

pub(crate) const SOURCE: &str = "qianxun-spider";
const BASE_URL: &str = "https://www.dnsscan.cn";
const PAGINATION_MARKER: &str = "<div id=\"page\" class=\"pagelist\">";
const LAST_PAGE_MARKER: &str = "<li class=\"disabled\"><span>&raquo;</span></li>";

/// Walks the dnsscan.cn result pages for a domain.
#[derive(Debug, Clone)]
pub struct QianxunSpiderAgent {
    base_url: String,
}

impl Default for QianxunSpiderAgent {
    fn default() -> Self {
        Self::with_base_url(BASE_URL)
    }
}

impl QianxunSpiderAgent {
    /// Point the agent at a different site root.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

fn form_body(domain: &str) -> String {
    format!(
        "&show=&ecmsfrom=127.0.0.1&um=&classid=0&keywords={}&num=",
        urlencoding::encode(domain)
    )
}

/// Whether the page links to a further page.
fn has_more_pages(body: &str) -> bool {
    body.contains(PAGINATION_MARKER) && !body.contains(LAST_PAGE_MARKER)
}

impl Agent for QianxunSpiderAgent {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn query(&self, session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError> {
        let matcher = SubdomainMatcher::new(&query.text)?;
        let url = format!("{}/dns.html", self.base_url);

        Ok(spawn_producer(SOURCE, move |tx| async move {
            let domain = matcher.domain().to_owned();
            let mut seen: HashSet<String> = HashSet::new();
            let mut page = 1u32;
            loop {
                let page_param = page.to_string();
                let request = session
                    .request(Method::POST, &url)
                    .query(&[("keywords", domain.as_str()), ("page", page_param.as_str())])
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(form_body(&domain));
                let body = match fetch_page(&session, request, SOURCE).await {
                    Ok(body) => body,
                    Err(err) => {
                        let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                        break;
                    }
                };

                let targets: Vec<Target> = matcher
                    .targets_in(&body)
                    .iter()
                    .filter_map(|raw| Target::parse(raw))
                    .collect();
                if targets.is_empty() {
                    break;
                }
                for target in targets {
                    if !seen.insert(target.host.clone()) {
                        continue;
                    }
                    let result = ReconResult {
                        ip: target.host.clone(),
                        host: target.host,
                        port: target.port,
                        ..ReconResult::new(SOURCE)
                    }
                    .with_self_as_raw();
                    if tx.send(result).await.is_err() {
                        return seen.len();
                    }
                }

                if !has_more_pages(&body) || seen.len() > query.limit {
                    break;
                }
                page += 1;
            }
            seen.len()
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::agents::test_support::{collect, session};
    use crate::keys::Keys;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn pagination_markers() {
        let more = format!("{PAGINATION_MARKER}<li><a>&raquo;</a></li></div>");
        let last = format!("{PAGINATION_MARKER}{LAST_PAGE_MARKER}</div>");
        assert!(has_more_pages(&more));
        assert!(!has_more_pages(&last));
        assert!(!has_more_pages("no pager"));
    }

    #[test]
    fn form_body_carries_keyword() {
        assert!(form_body("example.com").contains("keywords=example.com&num="));
    }

    #[tokio::test]
    async fn walks_pages_and_dedups_hosts() {
        let server = MockServer::start().await;
        let page_one = format!(
            "<td>a.example.com</td><td>b.example.com</td>{PAGINATION_MARKER}<a>&raquo;</a></div>"
        );
        let page_two = format!(
            "<td>b.example.com</td><td>c.example.com</td>{PAGINATION_MARKER}{LAST_PAGE_MARKER}</div>"
        );
        Mock::given(method("POST"))
            .and(path("/dns.html"))
            .and(query_param("page", "1"))
            .and(body_string_contains("keywords=example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_one))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dns.html"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_two))
            .expect(1)
            .mount(&server)
            .await;

        let rx = QianxunSpiderAgent::with_base_url(server.uri())
            .query(session(Keys::new()), Query::new("example.com", 100))
            .unwrap();
        let results = collect(rx).await;

        let hosts: Vec<&str> = results.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(hosts, vec!["a.example.com", "b.example.com", "c.example.com"]);
        assert!(results.iter().all(|r| r.ip == r.host && r.port == 80));
    }
}
