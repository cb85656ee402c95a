//! The contract every source implements.
//!
//! An [`Agent`] turns one [`Query`] into a private [`ResultStream`]. The
//! producer runs in its own task; per-item failures travel inside the
//! stream and only pre-flight problems (such as absent credentials) are
//! returned from [`Agent::query`] directly.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::session::Session;
use crate::types::{Query, ResultSender, ResultStream, DEFAULT_CHANNEL_CAPACITY};

/// A queryable source.
///
/// Implementations must be `Send + Sync`; the orchestrator shares one
/// instance across every query of a run.
pub trait Agent: Send + Sync {
    /// Globally unique source name: registry key, rate-limit key and
    /// [`crate::ReconResult::source`] tag.
    fn name(&self) -> &'static str;

    /// Start producing results for `query`.
    ///
    /// Must be called from within a Tokio runtime. The returned stream
    /// closes when the producer finishes.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Credentials`] (or another pre-flight error)
    /// when the query cannot be started at all.
    fn query(&self, session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError>;
}

/// Spawn a producer task and hand back the receiving half of its channel.
///
/// `produce` returns how many results it emitted; the count and elapsed
/// time are logged when it finishes.
pub fn spawn_producer<F, Fut>(source: &'static str, produce: F) -> ResultStream
where
    F: FnOnce(ResultSender) -> Fut,
    Fut: Future<Output = usize> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let work = produce(tx);
    tokio::spawn(async move {
        let start = Instant::now();
        let count = work.await;
        tracing::info!(
            source,
            count,
            elapsed_secs = start.elapsed().as_secs(),
            "source finished"
        );
    });
    rx
}

/// Fetch the credential for `source` or fail pre-flight.
///
/// # Errors
///
/// Returns [`SourceError::Credentials`] if no secret is configured.
pub fn require_key(session: &Session, source: &str) -> Result<String, SourceError> {
    session
        .keys()
        .get(source)
        .map(str::to_owned)
        .ok_or_else(|| SourceError::Credentials(source.to_owned()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::SessionConfig;
    use crate::keys::Keys;
    use crate::types::ReconResult;

    /// Emits a fixed number of results.
    struct CountingAgent {
        count: usize,
    }

    impl Agent for CountingAgent {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn query(&self, _session: Arc<Session>, query: Query) -> Result<ResultStream, SourceError> {
            let count = self.count;
            Ok(spawn_producer(self.name(), move |tx| async move {
                for i in 0..count {
                    let result = ReconResult {
                        host: format!("{i}.{}", query.text),
                        ..ReconResult::new("counting")
                    };
                    if tx.send(result).await.is_err() {
                        return i;
                    }
                }
                count
            }))
        }
    }

    #[test]
    fn agent_is_object_safe_and_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn Agent>();
    }

    #[tokio::test]
    async fn producer_stream_closes_when_done() {
        let session = Arc::new(Session::new(SessionConfig::default(), Keys::new()).unwrap());
        let agent: Arc<dyn Agent> = Arc::new(CountingAgent { count: 3 });
        let mut rx = agent.query(session, Query::new("example.com", 10)).unwrap();

        let mut hosts = Vec::new();
        while let Some(result) = rx.recv().await {
            hosts.push(result.host);
        }
        assert_eq!(hosts, vec!["0.example.com", "1.example.com", "2.example.com"]);
    }

    #[test]
    fn require_key_reports_missing_credentials() {
        let session = Session::new(SessionConfig::default(), Keys::new()).unwrap();
        let err = require_key(&session, "shodan").unwrap_err();
        assert_eq!(err.to_string(), "empty shodan keys");

        let session =
            Session::new(SessionConfig::default(), Keys::new().with("shodan", "k")).unwrap();
        assert_eq!(require_key(&session, "shodan").unwrap(), "k");
    }
}
