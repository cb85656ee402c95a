//! HTTP client construction and response helpers shared by every source.
//!
//! Provides a [`reqwest::Client`] configured for one-shot connections,
//! no redirect following, optional proxying and (by default) no TLS
//! verification, plus rotating browser User-Agent strings for the
//! scraping sources.

use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::{Response, StatusCode};

use crate::config::{parse_proxy_auth, SessionConfig};
use crate::error::SourceError;

/// Realistic browser User-Agent strings, rotated per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Accept header sent by the scraping sources.
pub const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Build a [`reqwest::Client`] for the session.
///
/// The client has:
/// - Timeout from config
/// - No idle connection pooling, so every request opens a fresh connection
/// - Redirects disabled (sources inspect `Location` themselves)
/// - TLS verification as configured (off by default)
/// - Optional proxy with basic auth
/// - Brotli and gzip decompression
///
/// # Errors
///
/// Returns [`SourceError::Config`] for an unusable proxy and
/// [`SourceError::Http`] if the client cannot be constructed.
pub fn build_client(config: &SessionConfig) -> Result<reqwest::Client, SourceError> {
    let timeout = Duration::from_secs(config.timeout_seconds);

    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(!config.verify_tls);

    if let Some(ref ua) = config.user_agent {
        builder = builder.user_agent(ua.clone());
    }

    if let Some(ref proxy_url) = config.proxy {
        let mut proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| SourceError::Config(format!("invalid proxy: {e}")))?;
        if let Some(ref auth) = config.proxy_auth {
            let (user, pass) = parse_proxy_auth(auth).ok_or_else(|| {
                SourceError::Config("proxy_auth must be username:password".into())
            })?;
            proxy = proxy.basic_auth(user, pass);
        }
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| SourceError::Http(format!("failed to build HTTP client: {e}")))
}

/// Select a random User-Agent string from the rotation list.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS
        .choose(&mut rng)
        .copied()
        // SAFETY: USER_AGENTS is a non-empty const array, choose only returns None on empty slices
        .unwrap_or(USER_AGENTS[0])
}

/// Map a non-success response to an error.
///
/// HTTP 429 becomes [`SourceError::RateLimited`] so callers can tell
/// "back off" apart from "no more results".
///
/// # Errors
///
/// Returns [`SourceError::RateLimited`] or [`SourceError::Status`].
pub fn ensure_success(response: Response, source: &str) -> Result<Response, SourceError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SourceError::RateLimited(source.to_owned()));
    }
    if !status.is_success() {
        return Err(SourceError::Status {
            source_name: source.to_owned(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

/// Read a response body as text, replacing invalid UTF-8.
///
/// # Errors
///
/// Returns [`SourceError::Http`] if the body cannot be read.
pub async fn read_text(response: Response) -> Result<String, SourceError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| SourceError::Http(format!("response read failed: {}", e.without_url())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Collect `Set-Cookie` values of a response into a `Cookie` header value.
///
/// Returns `None` when the response set no cookies.
pub fn cookie_header(response: &Response) -> Option<String> {
    let pairs: Vec<String> = response
        .cookies()
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
