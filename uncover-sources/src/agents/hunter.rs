//! Hunter (Qianxin) open API.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::Deserialize;

use crate::agent::{require_key, spawn_producer, Agent};
use crate::crawler::Target;
use crate::error::SourceError;
use crate::session::Session;
use crate::types::{Query, ReconResult, ResultStream};

use super::fetch_json;

pub(crate) const SOURCE: &str = "hunter";
const BASE_URL: &str = "https://hunter.qianxin.com";
const PAGE_SIZE: &str = "100";

/// Hunter `/openApi/search`.
#[derive(Debug, Clone)]
pub struct HunterAgent {
    base_url: String,
}

impl Default for HunterAgent {
    fn default() -> Self {
        Self::with_base_url(BASE_URL)
    }
}

impl HunterAgent {
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
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchData {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    arr: Option<Vec<Asset>>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    domain: String,
}

fn to_result(asset: &Asset) -> ReconResult {
    let mut result = ReconResult::new(SOURCE);
    result.ip.clone_from(&asset.ip);
    result.port = asset.port;
    if let Some(target) = Target::parse(&asset.domain) {
        if result.port == 0 {
            result.port = target.port;
        }
        result.host = target.host;
    }
    result.with_self_as_raw()
}

impl Agent for HunterAgent {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn query(&self, session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError> {
        require_key(&session, SOURCE)?;
        let url = format!("{}/openApi/search", self.base_url);

        Ok(spawn_producer(SOURCE, move |tx| async move {
            let search = URL_SAFE.encode(query.text.as_bytes());
            let mut emitted = 0usize;
            let mut page = 1u32;
            loop {
                let key = match require_key(&session, SOURCE) {
                    Ok(key) => key,
                    Err(err) => {
                        let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                        break;
                    }
                };
                let page_param = page.to_string();
                let request = session.get(&url).query(&[
                    ("api-key", key.as_str()),
                    ("search", search.as_str()),
                    ("page", page_param.as_str()),
                    ("page_size", PAGE_SIZE),
                ]);
                let response: SearchResponse = match fetch_json(&session, request, SOURCE).await {
                    Ok(response) => response,
                    Err(err) => {
                        let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                        break;
                    }
                };
                if response.code != 200 {
                    let err = SourceError::Provider {
                        source_name: SOURCE.into(),
                        message: format!("code {}: {}", response.code, response.message),
                    };
                    let _ = tx.send(ReconResult::failure(SOURCE, err)).await;
                    break;
                }

                let data = response.data.unwrap_or_default();
                let assets = data.arr.unwrap_or_default();
                if data.total == 0 || assets.is_empty() {
                    break;
                }
                for asset in &assets {
                    if tx.send(to_result(asset)).await.is_err() {
                        return emitted;
                    }
                    emitted += 1;
                }
                if emitted >= query.limit || emitted >= data.total {
                    break;
                }
                page += 1;
            }
            emitted
        }))
    }
}
