//! Error types for the uncover application.

use uncover_sources::SourceError;

/// Top-level error type for the command-line application.
#[derive(Debug, thiserror::Error)]
pub enum UncoverError {
    /// Configuration or provider-file error.
    #[error("config error: {0}")]
    Config(String),

    /// Source selection, session or orchestration error.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Writing results failed.
    #[error("output error: {0}")]
    Output(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UncoverError>;
