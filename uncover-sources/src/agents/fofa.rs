//! FOFA search API.
//!
//! The credential is `email:key`. Queries are sent base64-encoded and the
//! API reports failures with `error: true` inside a 200 response.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::agent::{require_key, spawn_producer, Agent};
use crate::crawler::Target;
use crate::error::SourceError;
use crate::session::Session;
use crate::types::{Query, ReconResult, ResultStream};

use super::fetch_json;

pub(crate) const SOURCE: &str = "fofa";
const BASE_URL: &str = "https://fofa.info";
const FIELDS: &str = "ip,port,host";
const PAGE_SIZE: usize = 100;
const LARGE_PAGE_SIZE: usize = 500;

/// FOFA `/api/v1/search/all`.
#[derive(Debug, Clone)]
pub struct FofaAgent {
    base_url: String,
}

impl Default for FofaAgent {
    fn default() -> Self {
        Self::with_base_url(BASE_URL)
    }
}

impl FofaAgent {
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
    error: bool,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    size: usize,
    #[serde(default)]
    results: Vec<Vec<String>>,
}

/// Page size: large queries use the API's bigger page.
fn page_size(limit: usize) -> usize {
    if limit > PAGE_SIZE * 5 {
        LARGE_PAGE_SIZE
    } else {
        PAGE_SIZE
    }
}

/// Pick a secret and split it into `(email, key)`.
fn credentials(session: &Session) -> Result<(String, String), SourceError> {
    let secret = require_key(session, SOURCE)?;
    secret
        .split_once(':')
        .map(|(email, key)| (email.to_owned(), key.to_owned()))
        .ok_or_else(|| SourceError::Config("fofa key must be email:key".into()))
}

/// Map one `[ip, port, host]` row.
fn to_result(row: &[String]) -> ReconResult {
    let field = |i: usize| row.get(i).map(String::as_str).unwrap_or_default();
    let mut result = ReconResult::new(SOURCE);
    result.ip = field(0).to_owned();
    result.port = field(1).parse().unwrap_or(0);

    if let Some(target) = Target::parse(field(2)) {
        if result.port == 0 {
            result.port = target.port;
        }
        result.url = format!("{}://{}:{}", target.scheme, target.host, result.port);
        result.host = target.host;
    }
    result.with_self_as_raw()
}

impl Agent for FofaAgent {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn query(&self, session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError> {
        credentials(&session)?;
        let url = format!("{}/api/v1/search/all", self.base_url);

        Ok(spawn_producer(SOURCE, move |tx| async move {
            let qbase64 = STANDARD.encode(query.text.as_bytes());
            let size = page_size(query.limit).to_string();
            let mut emitted = 0usize;
            let mut page = 1u32;
            loop {
                let (email, key) = match credentials(&session) {
                    Ok(pair) => pair,
                    Err(err) => {
                        let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                        break;
                    }
                };
                let page_param = page.to_string();
                let request = session.get(&url).query(&[
                    ("email", email.as_str()),
                    ("key", key.as_str()),
                    ("qbase64", qbase64.as_str()),
                    ("fields", FIELDS),
                    ("page", page_param.as_str()),
                    ("size", size.as_str()),
                ]);
                let response: SearchResponse = match fetch_json(&session, request, SOURCE).await {
                    Ok(response) => response,
                    Err(err) => {
                        let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                        break;
                    }
                };
                if response.error {
                    let err = SourceError::Provider {
                        source_name: SOURCE.into(),
                        message: response.errmsg,
                    };
                    let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                    break;
                }
                if response.size == 0 || response.results.is_empty() {
                    break;
                }
                for row in &response.results {
                    if tx.send(to_result(row)).await.is_err() {
                        return emitted;
                    }
                    emitted += 1;
                }
                if emitted >= query.limit || emitted >= response.size {
                    break;
                }
                page += 1;
            }
            emitted
        }))
    }
}
