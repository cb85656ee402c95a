//! Fan-out/fan-in orchestration across sources.
//!
//! [`Orchestrator::run`] validates the selection, starts one producer per
//! (query, source) pair and relays every private stream into one merged
//! stream. Each relay stamps items with the current time and stops on
//! cancellation. A [`TaskTracker`] counts live relays; when the last one
//! exits, a finaliser drops the final sender and the merged stream closes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::SourceError;
use crate::registry::{Registry, ResolvedSource};
use crate::session::Session;
use crate::types::{
    Query, ReconResult, ResultSender, ResultStream, DEFAULT_CHANNEL_CAPACITY,
};

/// Runs queries against registered sources over one shared session.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    session: Arc<Session>,
}

impl Orchestrator {
    /// An orchestrator over `registry`, sending every request through `session`.
    pub fn new(registry: Registry, session: Arc<Session>) -> Self {
        Self {
            registry: Arc::new(registry),
            session,
        }
    }

    /// The source registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The shared session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Resolve and validate a source selection without starting any work.
    ///
    /// # Errors
    ///
    /// - [`SourceError::Config`] if no requested name is registered.
    /// - [`SourceError::MissingKeys`] if no anonymous source was requested
    ///   and no credentials are configured at all.
    /// - [`SourceError::DestructiveOnly`] if every requested source is
    ///   destructive.
    pub fn validate<S: AsRef<str>>(&self, sources: &[S]) -> Result<Vec<ResolvedSource>, SourceError> {
        let resolved = self.registry.resolve(sources);
        if resolved.is_empty() {
            return Err(SourceError::Config("no agent/source specified".into()));
        }

        let names = format!(
            "[{}]",
            resolved
                .iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let any_anonymous = resolved.iter().any(|r| r.flags.anonymous);
        if !any_anonymous && self.session.keys().is_empty() {
            return Err(SourceError::MissingKeys(names));
        }

        if resolved.iter().all(|r| r.flags.destructive) {
            return Err(SourceError::DestructiveOnly(names));
        }

        Ok(resolved)
    }

    /// Run every query against every selected source.
    ///
    /// Validation happens before any network activity. Must be called
    /// from within a Tokio runtime. The returned stream closes once every
    /// relay has finished, including when all sources fail immediately or
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn run<Q, S>(
        &self,
        queries: &[Q],
        sources: &[S],
        limit: usize,
        cancel: CancellationToken,
    ) -> Result<ResultStream, SourceError>
    where
        Q: AsRef<str>,
        S: AsRef<str>,
    {
        let selected = self.validate(sources)?;
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let tracker = TaskTracker::new();

        for text in queries {
            let text = text.as_ref();
            for source in &selected {
                if source.flags.destructive {
                    tracing::warn!(source = %source.name, "destructive source cannot be run, skipping");
                    continue;
                }
                if !source.flags.anonymous && !self.session.keys().has(&source.name) {
                    tracing::warn!(source = %source.name, "source given but keys not found, skipping");
                    continue;
                }

                tracing::trace!(source = %source.name, query = text, "starting source");
                let stream = match source
                    .agent
                    .query(Arc::clone(&self.session), Query::new(text, limit))
                {
                    Ok(stream) => stream,
                    Err(err) => {
                        tracing::warn!(source = %source.name, error = %err, "source failed to start");
                        continue;
                    }
                };
                tracker.spawn(relay(stream, tx.clone(), cancel.clone()));
            }
        }

        tracker.close();
        tokio::spawn(async move {
            tracker.wait().await;
            drop(tx);
        });

        Ok(rx)
    }

    /// [`run`](Self::run), handing every merged item to `callback`.
    ///
    /// Returns when the merged stream closes or `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub async fn run_with_callback<Q, S, F>(
        &self,
        queries: &[Q],
        sources: &[S],
        limit: usize,
        cancel: CancellationToken,
        mut callback: F,
    ) -> Result<(), SourceError>
    where
        Q: AsRef<str>,
        S: AsRef<str>,
        F: FnMut(ReconResult),
    {
        let mut stream = self.run(queries, sources, limit, cancel.clone())?;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                item = stream.recv() => match item {
                    Some(result) => callback(result),
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Forward one private stream into the merged stream.
async fn relay(mut source: ResultStream, merged: ResultSender, cancel: CancellationToken) {
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            item = source.recv() => item,
        };
        let Some(mut result) = item else {
            return;
        };
        result.timestamp = chrono::Utc::now().timestamp();

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = merged.send(result) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
