//! Iterative site-exclusion crawling of search-engine result pages.
//!
//! Several scraping sources share one algorithm, parameterised by a
//! [`SearchPages`] implementation:
//!
//! 1. Query `site:.<domain>` page by page until there is no next page, a
//!    page yields nothing new, or the cursor or discovered count passes
//!    the limit.
//! 2. Build `-site:<a> -site:<b>` exclusion clauses from what was found.
//! 3. Re-run step 1 once per clause so results hidden behind dominant
//!    subdomains surface.
//!
//! Each subdomain is emitted the moment it is first seen and never twice
//! for one crawl.

pub mod subdomain;

use std::collections::HashSet;
use std::future::Future;

use crate::error::SourceError;
use crate::types::{Query, ReconResult, ResultSender};

pub use subdomain::{decode_body, SubdomainMatcher, Target};

/// Maximum number of refinement clauses per crawl.
pub const DEFAULT_MAX_CLAUSES: usize = 25;

/// Minimum number of discovered subdomains before refinement runs.
pub const DEFAULT_REFINEMENT_THRESHOLD: usize = 3;

/// The per-engine half of a crawl: how to fetch a page and read it.
///
/// Implementations are expected to map HTTP 429 to
/// [`SourceError::RateLimited`] in [`fetch`](Self::fetch).
pub trait SearchPages: Send + Sync {
    /// Source name stamped on every emitted result.
    fn source(&self) -> &'static str;

    /// How far the cursor advances per page.
    fn page_size(&self) -> usize;

    /// Largest cursor worth requesting for a query `limit`.
    fn max_cursor(&self, limit: usize) -> usize;

    /// Fetch the results page for `query` starting at `cursor`.
    fn fetch(
        &self,
        query: &str,
        cursor: usize,
    ) -> impl Future<Output = Result<String, SourceError>> + Send;

    /// Whether `body` links to the page starting at `next_cursor`.
    fn has_next_page(&self, body: &str, next_cursor: usize) -> bool;

    /// Subdomains found in a page body, normalised to host names.
    fn extract(
        &self,
        matcher: &SubdomainMatcher,
        body: &str,
    ) -> impl Future<Output = Vec<String>> + Send {
        std::future::ready(matcher.hosts_in(&decode_body(body)))
    }

    /// Subdomains worth excluding in refinement passes, in order.
    fn exclusion_candidates(&self, _domain: &str, discovered: &[String]) -> Vec<String> {
        discovered.to_vec()
    }
}

/// Tuning for a [`SiteExclusionCrawler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOptions {
    /// Maximum number of exclusion clauses to run.
    pub max_clauses: usize,
    /// Refinement only runs once at least this many subdomains are known.
    pub refinement_threshold: usize,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_clauses: DEFAULT_MAX_CLAUSES,
            refinement_threshold: DEFAULT_REFINEMENT_THRESHOLD,
        }
    }
}

/// Pair candidates two at a time into ` -site:a -site:b` clauses.
///
/// An odd trailing candidate gets a clause of its own. At most `max`
/// clauses are returned.
pub fn exclusion_clauses(candidates: &[String], max: usize) -> Vec<String> {
    candidates
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|sub| format!(" -site:{sub}"))
                .collect::<String>()
        })
        .take(max)
        .collect()
}

/// Mutable state of one crawl; owned by the crawling task.
#[derive(Debug)]
struct CrawlState {
    matcher: SubdomainMatcher,
    discovered: Vec<String>,
    seen: HashSet<String>,
    cursor: usize,
}

impl CrawlState {
    fn new(matcher: SubdomainMatcher) -> Self {
        Self {
            matcher,
            discovered: Vec::new(),
            seen: HashSet::new(),
            cursor: 0,
        }
    }

    fn is_known(&self, host: &str) -> bool {
        self.seen.contains(host)
    }

    fn record(&mut self, host: &str) -> bool {
        if self.seen.insert(host.to_owned()) {
            self.discovered.push(host.to_owned());
            true
        } else {
            false
        }
    }
}

/// How a single pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassEnd {
    /// The pass ran out of pages; later clauses may still run.
    Exhausted,
    /// The consumer went away or the session closed; stop the crawl.
    Abort,
}

/// Runs the site-exclusion algorithm over a [`SearchPages`] implementation.
#[derive(Debug)]
pub struct SiteExclusionCrawler<P> {
    pages: P,
    options: CrawlOptions,
}

impl<P: SearchPages> SiteExclusionCrawler<P> {
    /// A crawler with default options.
    pub fn new(pages: P) -> Self {
        Self::with_options(pages, CrawlOptions::default())
    }

    /// A crawler with custom options.
    pub fn with_options(pages: P, options: CrawlOptions) -> Self {
        Self { pages, options }
    }

    /// The page source this crawler drives.
    pub fn pages(&self) -> &P {
        &self.pages
    }

    /// Crawl `query.text` as a domain, sending each new subdomain to `tx`.
    ///
    /// Returns every discovered subdomain in discovery order. Rate-limit
    /// signals are forwarded to `tx` as carried errors; other page
    /// failures only end the current pass.
    pub async fn run(&self, query: &Query, tx: &ResultSender) -> Vec<String> {
        let source = self.pages.source();
        let matcher = match SubdomainMatcher::new(&query.text) {
            Ok(matcher) => matcher,
            Err(err) => {
                let _ = tx.send(ReconResult::failure(source, err)).await;
                return Vec::new();
            }
        };

        let mut state = CrawlState::new(matcher);
        if self.pass(&mut state, "", query.limit, tx).await == PassEnd::Abort {
            return state.discovered;
        }

        if state.discovered.len() < self.options.refinement_threshold {
            tracing::debug!(
                source,
                found = state.discovered.len(),
                "too few subdomains for refinement"
            );
            return state.discovered;
        }

        let candidates = self
            .pages
            .exclusion_candidates(state.matcher.domain(), &state.discovered);
        let clauses = exclusion_clauses(&candidates, self.options.max_clauses);
        tracing::debug!(source, clauses = clauses.len(), "starting refinement passes");

        for clause in clauses {
            if self.pass(&mut state, &clause, query.limit, tx).await == PassEnd::Abort {
                break;
            }
        }

        state.discovered
    }

    async fn pass(
        &self,
        state: &mut CrawlState,
        clause: &str,
        limit: usize,
        tx: &ResultSender,
    ) -> PassEnd {
        let source = self.pages.source();
        let search = format!("site:.{}{clause}", state.matcher.domain());
        let max_cursor = self.pages.max_cursor(limit);
        state.cursor = 0;

        loop {
            if tx.is_closed() {
                return PassEnd::Abort;
            }

            tracing::trace!(source, query = %search, cursor = state.cursor, "fetching page");
            let body = match self.pages.fetch(&search, state.cursor).await {
                Ok(body) => body,
                Err(err @ SourceError::RateLimited(_)) => {
                    tracing::warn!(source, "rate limited, ending pass");
                    if tx.send(ReconResult::failure(source, err)).await.is_err() {
                        return PassEnd::Abort;
                    }
                    return PassEnd::Exhausted;
                }
                Err(SourceError::Limiter(err)) => {
                    tracing::debug!(source, error = %err, "session closed, stopping crawl");
                    return PassEnd::Abort;
                }
                Err(err) => {
                    tracing::debug!(source, error = %err, "page fetch failed, ending pass");
                    return PassEnd::Exhausted;
                }
            };

            let hosts = self.pages.extract(&state.matcher, &body).await;
            if hosts.iter().all(|host| state.is_known(host)) {
                tracing::debug!(source, cursor = state.cursor, "page yielded nothing new");
                return PassEnd::Exhausted;
            }

            for host in &hosts {
                if !state.record(host) {
                    continue;
                }
                let Some(target) = Target::parse(host) else {
                    continue;
                };
                let result = ReconResult {
                    host: target.host.clone(),
                    port: target.port,
                    url: target.url(),
                    ..ReconResult::new(source)
                }
                .with_self_as_raw();
                if tx.send(result).await.is_err() {
                    return PassEnd::Abort;
                }
            }

            state.cursor += self.pages.page_size();
            tracing::debug!(
                source,
                cursor = state.cursor,
                found = state.discovered.len(),
                "page processed"
            );

            if !self.pages.has_next_page(&body, state.cursor) {
                return PassEnd::Exhausted;
            }
            if state.cursor > max_cursor || state.discovered.len() > limit {
                return PassEnd::Exhausted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Serves canned pages keyed by `(query, cursor)` and records calls.
    struct FakePages {
        pages: HashMap<(String, usize), Result<String, SourceError>>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl FakePages {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn page(mut self, query: &str, cursor: usize, body: &str) -> Self {
            self.pages
                .insert((query.to_owned(), cursor), Ok(body.to_owned()));
            self
        }

        fn failing(mut self, query: &str, cursor: usize, err: SourceError) -> Self {
            self.pages.insert((query.to_owned(), cursor), Err(err));
            self
        }

        fn calls(&self) -> Vec<(String, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SearchPages for FakePages {
        fn source(&self) -> &'static str {
            "fake-spider"
        }

        fn page_size(&self) -> usize {
            10
        }

        fn max_cursor(&self, _limit: usize) -> usize {
            100
        }

        async fn fetch(&self, query: &str, cursor: usize) -> Result<String, SourceError> {
            self.calls.lock().unwrap().push((query.to_owned(), cursor));
            self.pages
                .get(&(query.to_owned(), cursor))
                .cloned()
                .unwrap_or_else(|| Ok(String::new()))
        }

        fn has_next_page(&self, body: &str, _next_cursor: usize) -> bool {
            body.contains("NEXT")
        }
    }

    async fn crawl(pages: FakePages, domain: &str, limit: usize) -> (Vec<String>, Vec<ReconResult>, FakePages) {
        let (tx, mut rx) = mpsc::channel(64);
        let crawler = SiteExclusionCrawler::new(pages);
        let found = crawler.run(&Query::new(domain, limit), &tx).await;
        drop(tx);
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        (found, results, crawler.pages)
    }

    #[test]
    fn clauses_pair_candidates() {
        let subs: Vec<String> = ["a.x.com", "b.x.com", "c.x.com"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        assert_eq!(
            exclusion_clauses(&subs, 25),
            vec![" -site:a.x.com -site:b.x.com", " -site:c.x.com"]
        );
        assert_eq!(exclusion_clauses(&subs, 1).len(), 1);
        assert!(exclusion_clauses(&[], 25).is_empty());
    }

    #[tokio::test]
    async fn two_subdomains_no_refinement() {
        let pages = FakePages::new().page(
            "site:.example.com",
            0,
            "<a href=\"https://a.example.com/\">a</a> <cite>b.example.com</cite>",
        );
        let (found, results, pages) = crawl(pages, "example.com", 100).await;

        assert_eq!(found, vec!["a.example.com", "b.example.com"]);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_error()));
        assert_eq!(results[0].url, "http://a.example.com:80");
        assert_eq!(results[1].port, 80);
        assert_eq!(pages.calls(), vec![("site:.example.com".to_owned(), 0)]);
    }

    #[tokio::test]
    async fn repeated_page_ends_the_pass() {
        let body = "a.example.com NEXT";
        let pages = FakePages::new()
            .page("site:.example.com", 0, body)
            .page("site:.example.com", 10, body)
            .page("site:.example.com", 20, "zzz.example.com");
        let (found, _, pages) = crawl(pages, "example.com", 100).await;

        assert_eq!(found, vec!["a.example.com"]);
        let cursors: Vec<usize> = pages.calls().iter().map(|(_, c)| *c).collect();
        assert_eq!(cursors, vec![0, 10]);
    }

    #[tokio::test]
    async fn refinement_runs_one_pass_per_clause() {
        let pages = FakePages::new()
            .page("site:.example.com", 0, "a.example.com b.example.com c.example.com")
            .page(
                "site:.example.com -site:a.example.com -site:b.example.com",
                0,
                "d.example.com",
            );
        let (found, results, pages) = crawl(pages, "example.com", 100).await;

        assert_eq!(
            found,
            vec!["a.example.com", "b.example.com", "c.example.com", "d.example.com"]
        );
        assert_eq!(results.len(), 4);
        let queries: Vec<String> = pages.calls().into_iter().map(|(q, _)| q).collect();
        assert_eq!(
            queries,
            vec![
                "site:.example.com",
                "site:.example.com -site:a.example.com -site:b.example.com",
                "site:.example.com -site:c.example.com",
            ]
        );
    }

    #[tokio::test]
    async fn failed_clause_does_not_stop_other_clauses() {
        let pages = FakePages::new()
            .page(
                "site:.example.com",
                0,
                "a.example.com b.example.com c.example.com",
            )
            .failing(
                "site:.example.com -site:a.example.com -site:b.example.com",
                0,
                SourceError::Http("connection reset".into()),
            )
            .page("site:.example.com -site:c.example.com", 0, "e.example.com");
        let (found, results, _) = crawl(pages, "example.com", 100).await;

        assert!(found.contains(&"e.example.com".to_owned()));
        assert!(results.iter().all(|r| !r.is_error()));
    }

    #[tokio::test]
    async fn rate_limit_is_surfaced_as_an_item() {
        let pages = FakePages::new().failing(
            "site:.example.com",
            0,
            SourceError::RateLimited("fake-spider".into()),
        );
        let (found, results, _) = crawl(pages, "example.com", 100).await;

        assert!(found.is_empty());
        assert_eq!(results.len(), 1);
        assert!(results[0].error.as_ref().unwrap().is_rate_limited());
    }

    #[tokio::test]
    async fn crawl_is_deterministic() {
        let build = || {
            FakePages::new()
                .page(
                    "site:.example.com",
                    0,
                    "z.example.com m.example.com a.example.com NEXT",
                )
                .page("site:.example.com", 10, "q.example.com")
        };
        let (first, _, _) = crawl(build(), "example.com", 100).await;
        let (second, _, _) = crawl(build(), "example.com", 100).await;
        assert_eq!(first, second);
        assert_eq!(first[0], "z.example.com");
    }

    #[tokio::test]
    async fn stops_when_limit_is_exceeded() {
        let pages = FakePages::new()
            .page("site:.example.com", 0, "a.example.com b.example.com NEXT")
            .page("site:.example.com", 10, "c.example.com NEXT");
        let (found, _, pages) = crawl(pages, "example.com", 1).await;

        assert_eq!(found.len(), 2);
        // Two subdomains stay below the refinement threshold; page 2 is skipped.
        assert_eq!(pages.calls().len(), 1);
    }

    #[tokio::test]
    async fn stops_once_cursor_passes_engine_cap() {
        let mut pages = FakePages::new();
        for page in 0..=20 {
            pages = pages.page(
                "site:.example.com",
                page * 10,
                &format!("host{page}.example.com NEXT"),
            );
        }
        let (found, _, pages) = crawl(pages, "example.com", 1_000).await;

        let base_cursors: Vec<usize> = pages
            .calls()
            .into_iter()
            .filter(|(query, _)| query == "site:.example.com")
            .map(|(_, cursor)| cursor)
            .collect();
        assert_eq!(base_cursors, (0..=10).map(|page| page * 10).collect::<Vec<_>>());
        assert_eq!(found.len(), 11);
        assert_eq!(found[10], "host10.example.com");
    }

    #[tokio::test]
    async fn dropped_receiver_aborts_crawl() {
        let pages = FakePages::new().page("site:.example.com", 0, "a.example.com NEXT");
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let crawler = SiteExclusionCrawler::new(pages);
        let found = crawler.run(&Query::new("example.com", 100), &tx).await;
        assert!(found.is_empty());
        assert!(crawler.pages().calls().is_empty());
    }
}
