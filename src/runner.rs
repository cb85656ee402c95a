//! One command-line run: resolve inputs, query sources, write results.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uncover_sources::{Keys, Orchestrator, Registry, Session};

use crate::config::UncoverConfig;
use crate::error::{Result, UncoverError};
use crate::output::{OutputFormat, OutputWriter};
use crate::provider::ProviderConfig;

/// Per-run inputs that override the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Queries, already expanded (see [`collect_queries`]).
    pub queries: Vec<String>,
    /// Sources; comma-separated entries are split. Empty uses the configured default.
    pub engines: Vec<String>,
    /// Results per source per query; `None` uses the configured limit.
    pub limit: Option<usize>,
    /// Output format; `None` uses the configured format.
    pub format: Option<OutputFormat>,
    /// Also write results to this file.
    pub output: Option<PathBuf>,
}

/// What a run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Results written.
    pub written: usize,
    /// Carried errors seen.
    pub errors: usize,
    /// Whether the run was cancelled before the stream closed.
    pub cancelled: bool,
}

/// Run every query against the built-in sources and print the results.
///
/// # Errors
///
/// Returns an error for invalid configuration, a source selection the
/// orchestrator rejects, or an output failure.
pub async fn run(
    config: &UncoverConfig,
    provider: &ProviderConfig,
    options: RunOptions,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let registry = Registry::with_builtin_sources();
    let mut provider = provider.clone();
    provider.merge_env(registry.all_sources());
    let keys = provider.to_keys();
    tracing::debug!(keys = ?keys, "credentials loaded");

    let format = options
        .format
        .clone()
        .unwrap_or_else(|| OutputFormat::from(&config.output));
    let mut writer = OutputWriter::new(format, options.output.as_deref())?;
    run_with(registry, keys, config, options, &mut writer, cancel).await
}

/// [`run`] over an explicit registry, credential set and writer.
///
/// # Errors
///
/// See [`run`].
pub async fn run_with(
    registry: Registry,
    keys: Keys,
    config: &UncoverConfig,
    options: RunOptions,
    writer: &mut OutputWriter,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    config.validate()?;
    if options.queries.is_empty() {
        return Err(UncoverError::Config("no query provided".into()));
    }
    let engines = if options.engines.is_empty() {
        split_engines(&config.engines)
    } else {
        split_engines(&options.engines)
    };
    let limit = options.limit.unwrap_or(config.limit);
    if limit == 0 {
        return Err(UncoverError::Config("limit must be greater than 0".into()));
    }

    let session = Arc::new(Session::new(config.session_config(), keys)?);
    let orchestrator = Orchestrator::new(registry, Arc::clone(&session));
    let mut stream = orchestrator.run(&options.queries, &engines, limit, cancel.clone())?;
    tracing::info!(
        queries = options.queries.len(),
        sources = %engines.join(","),
        limit,
        "starting run"
    );

    let mut summary = RunSummary::default();
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                summary.cancelled = true;
                break;
            }
            item = stream.recv() => item,
        };
        let Some(result) = item else {
            break;
        };
        if result.is_error() {
            summary.errors += 1;
        }
        writer.write(&result)?;
    }

    session.close();
    writer.flush()?;
    summary.written = writer.written();
    tracing::info!(
        written = summary.written,
        errors = summary.errors,
        cancelled = summary.cancelled,
        "run finished"
    );
    Ok(summary)
}

/// Split comma-separated entries, trimming and dropping blanks.
pub fn split_engines<S: AsRef<str>>(engines: &[S]) -> Vec<String> {
    engines
        .iter()
        .flat_map(|entry| entry.as_ref().split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Expand command-line queries and piped input into a query list.
///
/// An argument of the form `@path` is replaced by the lines of that file.
/// Lines from `stdin` are appended when given. Blank lines are skipped.
///
/// # Errors
///
/// Returns an error if a query file or stdin cannot be read.
pub fn collect_queries<R: BufRead>(args: &[String], stdin: Option<R>) -> Result<Vec<String>> {
    let mut queries = Vec::new();
    for arg in args {
        match arg.strip_prefix('@') {
            Some(path) => queries.extend(read_lines(Path::new(path))?),
            None => push_query(&mut queries, arg),
        }
    }
    if let Some(reader) = stdin {
        for line in reader.lines() {
            push_query(&mut queries, &line?);
        }
    }
    Ok(queries)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| UncoverError::Config(format!("{}: {e}", path.display())))?;
    let mut queries = Vec::new();
    for line in content.lines() {
        push_query(&mut queries, line);
    }
    Ok(queries)
}

fn push_query(queries: &mut Vec<String>, raw: &str) {
    let query = raw.trim();
    if !query.is_empty() {
        queries.push(query.to_owned());
    }
}

/// One line per registered source: name, flags and whether keys are present.
pub fn source_listing(registry: &Registry, keys: &Keys) -> Vec<String> {
    registry
        .all_sources()
        .into_iter()
        .map(|name| {
            let flags = registry.flags(name).unwrap_or_default();
            let mut notes = Vec::new();
            if flags.anonymous {
                notes.push("anonymous");
            } else if keys.has(name) {
                notes.push("keys configured");
            } else {
                notes.push("keys missing");
            }
            if flags.destructive {
                notes.push("destructive");
            }
            format!("{name} ({})", notes.join(", "))
        })
        .collect()
}
