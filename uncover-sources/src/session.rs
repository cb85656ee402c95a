//! The execution session shared by every source.
//!
//! A [`Session`] owns the HTTP client, the credential set and the rate
//! limiter. Every request goes through [`Session::execute`], which admits
//! it through the limiter under the source's name, retries transport
//! failures with exponential backoff and returns any HTTP response,
//! successful or not, to the caller.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderValue, CONNECTION, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};

use crate::config::SessionConfig;
use crate::error::SourceError;
use crate::http;
use crate::keys::Keys;
use crate::ratelimit::MultiLimiter;

/// Rate-limited HTTP session.
///
/// Configuration and credentials are read-only after construction and
/// safe to share across tasks behind an [`Arc`].
#[derive(Debug)]
pub struct Session {
    client: reqwest::Client,
    keys: Arc<Keys>,
    limiter: MultiLimiter,
    config: SessionConfig,
}

impl Session {
    /// Build a session.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if `config` is invalid, or
    /// [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn new(config: SessionConfig, keys: Keys) -> Result<Self, SourceError> {
        config.validate()?;
        let client = http::build_client(&config)?;
        if !config.verify_tls {
            tracing::debug!("TLS certificate verification disabled for source requests");
        }
        Ok(Self {
            client,
            keys: Arc::new(keys),
            limiter: MultiLimiter::new(config.rate_limits.clone()),
            config,
        })
    }

    /// The credential set.
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// The rate limiter every request is admitted through.
    pub fn limiter(&self) -> &MultiLimiter {
        &self.limiter
    }

    /// The configuration this session was built from.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start building a request; send it with [`execute`](Self::execute).
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Shorthand for a `GET` request builder.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Admit and send a request on behalf of `source`.
    ///
    /// The request is sent with `Connection: close` and, unless one is
    /// already set, a rotating browser User-Agent. Transport failures are
    /// retried up to `max_retries` times; every attempt is admitted through
    /// the limiter. Non-2xx responses are returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Limiter`] if admission fails and
    /// [`SourceError::Http`] if the request cannot be built or every
    /// attempt fails at the transport level.
    pub async fn execute(
        &self,
        request: RequestBuilder,
        source: &str,
    ) -> Result<Response, SourceError> {
        let mut request = request
            .header(CONNECTION, "close")
            .build()
            .map_err(|e| SourceError::Http(format!("invalid request: {}", e.without_url())))?;

        if !request.headers().contains_key(USER_AGENT) && self.config.user_agent.is_none() {
            request.headers_mut().insert(
                USER_AGENT,
                HeaderValue::from_static(http::random_user_agent()),
            );
        }

        let attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            self.limiter.admit(source).await?;

            let retry = if attempt < attempts {
                request.try_clone()
            } else {
                None
            };

            tracing::trace!(
                source,
                method = %request.method(),
                host = request.url().host_str().unwrap_or_default(),
                path = request.url().path(),
                attempt,
                "sending request"
            );

            match self.client.execute(request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let err = err.without_url();
                    let retry = match retry {
                        Some(next) if is_transient(&err) => next,
                        _ => return Err(SourceError::Http(format!("{source} request failed: {err}"))),
                    };
                    let delay = self.backoff(attempt);
                    tracing::debug!(source, attempt, error = %err, ?delay, "transport failure, retrying");
                    tokio::time::sleep(delay).await;
                    request = retry;
                    attempt += 1;
                }
            }
        }
    }

    /// Exponential backoff with jitter, capped at the request timeout.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_ms;
        let exp = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let jitter = if base > 1 {
            rand::thread_rng().gen_range(0..base / 2)
        } else {
            0
        };
        let cap = self.config.timeout_seconds.saturating_mul(1000);
        Duration::from_millis(exp.saturating_add(jitter).min(cap))
    }

    /// Close the limiter; pending and future requests fail fast.
    pub fn close(&self) {
        self.limiter.close();
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
