//! Baidu results-page scraper.
//!
//! Baidu hides target URLs behind its own redirect links. For long domains
//! the visible text is too truncated to match, so each result link is
//! resolved with a `HEAD` request and the `Location` header is matched
//! instead.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, LOCATION, REFERER};
use reqwest::Method;
use scraper::{Html, Selector};

use crate::agent::{spawn_producer, Agent};
use crate::crawler::{decode_body, SearchPages, SiteExclusionCrawler, SubdomainMatcher, Target};
use crate::error::SourceError;
use crate::http;
use crate::session::Session;
use crate::types::{Query, ReconResult, ResultStream};

use super::{bootstrap_cookies, fetch_page};

pub(crate) const SOURCE: &str = "baidu-spider";
const BASE_URL: &str = "https://www.baidu.com";
const PAGE_SIZE: usize = 50;
/// Domains longer than this are resolved through redirect targets.
const REDIRECT_DOMAIN_LEN: usize = 12;
const REDIRECT_CONCURRENCY: usize = 8;
const RESULT_LINK_SELECTOR: &str = "div.OP_LOG_LINK > a[href]";
/// Cookie Baidu expects on result pages.
const KLECK_COOKIE: &str = "kleck=6408666a6bc3e6a59bfa7b1ffcb4d094";

/// Only these labels are used for `-site:` exclusion on Baidu.
const COMMON_SUBDOMAIN_NAMES: &[&str] = &[
    "i", "w", "m", "en", "us", "zh", "w3", "app", "bbs", "web", "www", "job", "docs", "news",
    "blog", "data", "help", "live", "mall", "blogs", "files", "forum", "store", "mobile",
];

/// Subdomain discovery through `site:` searches on Baidu.
#[derive(Debug, Clone)]
pub struct BaiduSpiderAgent {
    base_url: String,
}

impl Default for BaiduSpiderAgent {
    fn default() -> Self {
        Self::with_base_url(BASE_URL)
    }
}

impl BaiduSpiderAgent {
    /// Point the agent at a different site root.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

struct BaiduPages {
    session: Arc<Session>,
    base_url: String,
    cookies: String,
}

/// `href` of every organic result link.
fn result_links(body: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(RESULT_LINK_SELECTOR) else {
        return Vec::new();
    };
    let document = Html::parse_document(body);
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| !href.is_empty())
        .map(str::to_owned)
        .collect()
}

impl BaiduPages {
    /// Follow one redirect link and match where it points.
    async fn resolve_link(&self, matcher: &SubdomainMatcher, link: String) -> Vec<String> {
        let request = self.session.request(Method::HEAD, &link);
        let response = match self.session.execute(request, SOURCE).await {
            Ok(response) => response,
            Err(err) => {
                tracing::trace!(error = %err, "redirect lookup failed");
                return Vec::new();
            }
        };
        let Some(location) = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Vec::new();
        };
        // A relative Location stays on the link's own host.
        let text = if location.starts_with('/') {
            link.as_str()
        } else {
            location
        };
        matcher
            .targets_in(text)
            .iter()
            .filter_map(|raw| Target::parse(raw))
            .map(|target| target.host)
            .collect()
    }

    async fn redirect_hosts(&self, matcher: &SubdomainMatcher, body: &str) -> Vec<String> {
        let links = result_links(body);
        let resolved: Vec<Vec<String>> = stream::iter(links)
            .map(|link| self.resolve_link(matcher, link))
            .buffered(REDIRECT_CONCURRENCY)
            .collect()
            .await;

        let mut hosts: Vec<String> = Vec::new();
        for host in resolved.into_iter().flatten() {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        hosts
    }
}

impl SearchPages for BaiduPages {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn max_cursor(&self, limit: usize) -> usize {
        limit
    }

    async fn fetch(&self, query: &str, cursor: usize) -> Result<String, SourceError> {
        let pn = cursor.to_string();
        let rn = PAGE_SIZE.to_string();
        let request = self
            .session
            .get(&format!("{}/s", self.base_url))
            .query(&[("wd", query), ("pn", pn.as_str()), ("rn", rn.as_str())])
            .header(ACCEPT, http::ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .header(REFERER, format!("{}/", self.base_url))
            .header(COOKIE, self.cookies.as_str());
        fetch_page(&self.session, request, SOURCE).await
    }

    fn has_next_page(&self, body: &str, next_cursor: usize) -> bool {
        body.contains(&format!("&pn={next_cursor}&"))
    }

    fn extract(
        &self,
        matcher: &SubdomainMatcher,
        body: &str,
    ) -> impl Future<Output = Vec<String>> + Send {
        async move {
            if matcher.domain().len() > REDIRECT_DOMAIN_LEN {
                self.redirect_hosts(matcher, body).await
            } else {
                matcher.hosts_in(&decode_body(body))
            }
        }
    }

    fn exclusion_candidates(&self, domain: &str, discovered: &[String]) -> Vec<String> {
        discovered
            .iter()
            .filter(|sub| {
                sub.strip_suffix(domain)
                    .and_then(|label| label.strip_suffix('.'))
                    .is_some_and(|label| COMMON_SUBDOMAIN_NAMES.contains(&label))
            })
            .cloned()
            .collect()
    }
}

fn with_kleck(cookies: Option<String>) -> String {
    match cookies {
        Some(cookies) => format!("{cookies}; {KLECK_COOKIE}"),
        None => KLECK_COOKIE.to_owned(),
    }
}

impl Agent for BaiduSpiderAgent {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn query(&self, session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError> {
        let base_url = self.base_url.clone();
        Ok(spawn_producer(SOURCE, move |tx| async move {
            let home = format!("{base_url}/");
            let cookies = match bootstrap_cookies(&session, &home, SOURCE).await {
                Ok(cookies) => with_kleck(cookies),
                Err(err) => {
                    let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                    return 0;
                }
            };
            let pages = BaiduPages {
                session,
                base_url,
                cookies,
            };
            SiteExclusionCrawler::new(pages).run(&query, &tx).await.len()
        }))
    }
}
