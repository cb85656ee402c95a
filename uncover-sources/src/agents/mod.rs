//! Built-in source adapters.
//!
//! API sources ([`ShodanAgent`], [`FofaAgent`], [`HunterAgent`]) need a
//! credential and paginate a JSON endpoint. The `*-spider` sources scrape
//! public pages without credentials; most of them drive the shared
//! [`crate::crawler::SiteExclusionCrawler`].

mod baidu_spider;
mod bing_spider;
mod fofa;
mod hunter;
mod qianxun_spider;
mod rapiddns_spider;
mod shodan;
mod yahoo_spider;

pub use baidu_spider::BaiduSpiderAgent;
pub use bing_spider::BingSpiderAgent;
pub use fofa::FofaAgent;
pub use hunter::HunterAgent;
pub use qianxun_spider::QianxunSpiderAgent;
pub use rapiddns_spider::RapidDnsSpiderAgent;
pub use shodan::ShodanAgent;
pub use yahoo_spider::YahooSpiderAgent;

use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

use crate::agent::Agent;
use crate::error::SourceError;
use crate::http;
use crate::registry::{AgentFactory, SourceFlags};
use crate::session::Session;

/// Every built-in source with its flags and factory.
pub fn builtin() -> Vec<(&'static str, SourceFlags, AgentFactory)> {
    fn factory<A: Agent + Default + 'static>() -> AgentFactory {
        Arc::new(|| Arc::new(A::default()) as Arc<dyn Agent>)
    }

    vec![
        (shodan::SOURCE, SourceFlags::KEYED, factory::<ShodanAgent>()),
        (fofa::SOURCE, SourceFlags::KEYED, factory::<FofaAgent>()),
        (hunter::SOURCE, SourceFlags::KEYED, factory::<HunterAgent>()),
        (bing_spider::SOURCE, SourceFlags::ANONYMOUS, factory::<BingSpiderAgent>()),
        (yahoo_spider::SOURCE, SourceFlags::ANONYMOUS, factory::<YahooSpiderAgent>()),
        (baidu_spider::SOURCE, SourceFlags::ANONYMOUS, factory::<BaiduSpiderAgent>()),
        (rapiddns_spider::SOURCE, SourceFlags::ANONYMOUS, factory::<RapidDnsSpiderAgent>()),
        (qianxun_spider::SOURCE, SourceFlags::DESTRUCTIVE, factory::<QianxunSpiderAgent>()),
    ]
}

/// Send a JSON API request and decode a successful response.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    session: &Session,
    request: RequestBuilder,
    source: &'static str,
) -> Result<T, SourceError> {
    let request = request.header(ACCEPT, "application/json");
    let response = http::ensure_success(session.execute(request, source).await?, source)?;
    let body = response
        .bytes()
        .await
        .map_err(|e| SourceError::Http(format!("{source} response read failed: {}", e.without_url())))?;
    serde_json::from_slice(&body)
        .map_err(|e| SourceError::Parse(format!("{source} response: {e}")))
}

/// Send a page request and return its body as text.
pub(crate) async fn fetch_page(
    session: &Session,
    request: RequestBuilder,
    source: &'static str,
) -> Result<String, SourceError> {
    let response = http::ensure_success(session.execute(request, source).await?, source)?;
    http::read_text(response).await
}

/// Visit a search engine's home page and keep the cookies it sets.
pub(crate) async fn bootstrap_cookies(
    session: &Session,
    home: &str,
    source: &'static str,
) -> Result<Option<String>, SourceError> {
    let request = session.get(home).header(ACCEPT, http::ACCEPT_HTML);
    let response = session.execute(request, source).await?;
    Ok(http::cookie_header(&response))
}
