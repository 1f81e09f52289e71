//! CLI error types.

use rslurp::{ConfigError, SessionError};
use thiserror::Error;

/// Errors that end the program before or instead of a download report.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Session(#[from] SessionError),

    #[error("failed to set signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
