//! # uncover-sources
//!
//! Query many internet-asset search sources through one interface and
//! merge what they find into a single stream.
//!
//! ## Design
//!
//! - Every source implements [`Agent`]: one [`Query`] in, a private
//!   [`ResultStream`] out, with failures carried inside the stream
//! - All requests go through one [`Session`], which admits them through a
//!   per-source [`MultiLimiter`] and retries transport failures
//! - [`Orchestrator`] validates a selection, fans queries out over the
//!   selected sources and fans their streams back into one
//! - Search-engine scrapers share the [`SiteExclusionCrawler`], which
//!   pages through `site:` results and refines with `-site:` clauses
//!
//! ## Security
//!
//! - Credentials are redacted from `Debug` output and never formatted
//!   into errors
//! - Queries and request paths are logged only at trace level
//! - TLS verification is off by default and can be enabled through
//!   [`SessionConfig::verify_tls`]
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> uncover_sources::Result<()> {
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use uncover_sources::{Keys, Orchestrator, Registry, Session, SessionConfig};
//!
//! let session = Arc::new(Session::new(SessionConfig::default(), Keys::new())?);
//! let orchestrator = Orchestrator::new(Registry::with_builtin_sources(), session);
//! let mut results = orchestrator.run(
//!     &["example.com"],
//!     &["bing-spider", "rapiddns-spider"],
//!     100,
//!     CancellationToken::new(),
//! )?;
//! while let Some(result) = results.recv().await {
//!     if !result.is_error() {
//!         println!("{}", result.host);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agents;
pub mod config;
pub mod crawler;
pub mod error;
pub mod http;
pub mod keys;
pub mod orchestrator;
pub mod ratelimit;
pub mod registry;
pub mod session;
pub mod types;

pub use agent::Agent;
pub use config::SessionConfig;
pub use crawler::{CrawlOptions, SearchPages, SiteExclusionCrawler};
pub use error::{Result, SourceError};
pub use keys::Keys;
pub use orchestrator::Orchestrator;
pub use ratelimit::{MultiLimiter, RateLimitError, RateLimitPolicy, RateLimits};
pub use registry::{Registry, SourceFlags};
pub use session::Session;
pub use types::{Query, ReconResult, ResultStream};
