//! uncover: find exposed hosts and subdomains through many search sources at once.
//!
//! This crate is the command-line layer on top of [`uncover_sources`]:
//! configuration and credential files, result formatting and the run loop.
//!
//! # Architecture
//!
//! - **Config**: `config.toml` tunes the session, rate limits and output
//! - **Provider**: `provider-config.toml` and `UNCOVER_<SOURCE>_KEY` supply secrets
//! - **Runner**: validates the selection, drives the orchestrator and
//!   writes each merged result as it arrives
//! - **Output**: field templates, JSON lines, raw payloads or CSV

pub mod config;
pub mod error;
pub mod output;
pub mod provider;
pub mod runner;

pub use config::UncoverConfig;
pub use error::{Result, UncoverError};
pub use output::{OutputFormat, OutputWriter};
pub use provider::ProviderConfig;
pub use runner::{run, RunOptions, RunSummary};
