//! CLI binary for uncover.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uncover::config::{PolicyConfig, UncoverConfig};
use uncover::output::OutputFormat;
use uncover::provider::ProviderConfig;
use uncover::runner::{self, RunOptions};
use uncover_sources::Registry;

/// uncover: query many internet search sources for exposed hosts.
#[derive(Parser)]
#[command(name = "uncover", version, about)]
struct Cli {
    /// Query to run; `@file` reads one query per line. Repeatable.
    #[arg(short, long)]
    query: Vec<String>,

    /// Sources to query, comma separated or repeated.
    #[arg(short, long)]
    engine: Vec<String>,

    /// Results to request from each source per query.
    #[arg(short, long)]
    limit: Option<usize>,

    /// Path to TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to provider credentials file.
    #[arg(long)]
    provider: Option<PathBuf>,

    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Retries after a transport failure.
    #[arg(long)]
    retry: Option<u32>,

    /// Maximum requests per second for every source (0 = unlimited).
    #[arg(long, conflicts_with = "rate_limit_minute")]
    rate_limit: Option<u32>,

    /// Maximum requests per minute for every source.
    #[arg(long)]
    rate_limit_minute: Option<u32>,

    /// Upstream HTTP proxy URL.
    #[arg(long)]
    proxy: Option<String>,

    /// Proxy credentials as `username:password`.
    #[arg(long)]
    proxy_auth: Option<String>,

    /// Also write results to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Fields to print, e.g. `ip:port` or `host`.
    #[arg(short, long)]
    field: Option<String>,

    /// Print JSON lines.
    #[arg(short, long, conflicts_with_all = ["csv", "raw"])]
    json: bool,

    /// Print CSV with a header row.
    #[arg(long, conflicts_with = "raw")]
    csv: bool,

    /// Print each provider's raw payload.
    #[arg(short, long)]
    raw: bool,

    /// Only print results.
    #[arg(long, conflicts_with = "verbose")]
    silent: bool,

    /// Print debug logs.
    #[arg(short, long)]
    verbose: bool,

    /// List available sources and exit.
    #[arg(long)]
    list_sources: bool,
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        if self.silent {
            "uncover=error,uncover_sources=error"
        } else if self.verbose {
            "uncover=debug,uncover_sources=debug"
        } else {
            "uncover=info,uncover_sources=info"
        }
    }

    fn apply(&self, config: &mut UncoverConfig) {
        if let Some(timeout) = self.timeout {
            config.session.timeout_seconds = timeout;
        }
        if let Some(retry) = self.retry {
            config.session.retries = retry;
        }
        if let Some(per_second) = self.rate_limit {
            config.rate_limit.default = PolicyConfig::Limited {
                max_count: per_second,
                period_secs: 1,
            };
            config.rate_limit.sources.clear();
        }
        if let Some(per_minute) = self.rate_limit_minute {
            config.rate_limit.default = PolicyConfig::per_minute(per_minute);
            config.rate_limit.sources.clear();
        }
        if self.proxy.is_some() {
            config.session.proxy.clone_from(&self.proxy);
        }
        if self.proxy_auth.is_some() {
            config.session.proxy_auth.clone_from(&self.proxy_auth);
        }
    }

    fn format(&self) -> Option<OutputFormat> {
        if self.json {
            Some(OutputFormat::Json)
        } else if self.csv {
            Some(OutputFormat::Csv)
        } else if self.raw {
            Some(OutputFormat::Raw)
        } else {
            self.field.clone().map(OutputFormat::Template)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = UncoverConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    let provider = ProviderConfig::load(cli.provider.as_deref())?;

    if cli.list_sources {
        let registry = Registry::with_builtin_sources();
        let mut provider = provider;
        provider.merge_env(registry.all_sources());
        for line in runner::source_listing(&registry, &provider.to_keys()) {
            println!("{line}");
        }
        return Ok(());
    }

    let stdin = std::io::stdin();
    let piped = (!stdin.is_terminal()).then(|| stdin.lock());
    let queries = runner::collect_queries(&cli.query, piped)?;

    let options = RunOptions {
        queries,
        engines: cli.engine.clone(),
        limit: cli.limit,
        format: cli.format(),
        output: cli.output.clone(),
    };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let started = std::time::Instant::now();
    let summary = runner::run(&config, &provider, options, cancel).await?;
    info!(
        results = summary.written,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "done"
    );
    Ok(())
}
