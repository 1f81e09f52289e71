//! Error types for download sessions.
//!
//! Each concern gets its own error enum so callers can tell a bad
//! configuration (fatal at startup) apart from a single failed file
//! (tallied and skipped).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for output sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type for single-file fetches.
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for directory listing.
pub type ListingResult<T> = Result<T, ListingError>;

/// Errors raised while building a session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Archive output interleaves header and body, so only one writer is allowed.
    #[error("archive output requires exactly one worker, got {workers}")]
    ArchiveRequiresSingleWorker { workers: usize },

    /// A session needs at least one worker.
    #[error("worker count must be at least 1")]
    NoWorkers,

    /// The filename filter is not a valid regular expression.
    #[error("bad matching expression {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The status line cannot be refreshed continuously.
    #[error("UI refresh interval must be greater than zero")]
    ZeroUiInterval,

    /// The root CA bundle could not be read or parsed.
    #[error("failed to load root CA from {}: {reason}", path.display())]
    RootCa { path: PathBuf, reason: String },

    /// The config file could not be read or has a malformed value.
    #[error("invalid config file {}: {reason}", path.display())]
    ConfigFile { path: PathBuf, reason: String },

    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),

    /// The tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// Errors raised by output sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Failed to create the output directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Failed to open a file for writing.
    #[error("failed to open {}: {source}", path.display())]
    OpenFailed { path: PathBuf, source: io::Error },

    /// Failed to stat an existing file.
    #[error("failed to read metadata of {}: {source}", path.display())]
    StatFailed { path: PathBuf, source: io::Error },

    /// The sink cannot continue a partial file.
    #[error("{sink} output does not support resume")]
    ResumeUnsupported { sink: &'static str },

    /// The sink needs the entry size before any data is written.
    #[error("{sink} output requires a known size for {name:?}")]
    SizeRequired { sink: &'static str, name: String },

    /// An earlier entry was left incomplete; further entries would corrupt the archive.
    #[error("archive is unusable after an incomplete entry for {name:?}")]
    Poisoned { name: String },

    /// The entry name cannot be represented in the output.
    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Generic write failure.
    #[error("write to {target} failed: {source}")]
    Io { target: String, source: io::Error },
}

/// Errors that fail a single job.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL has no usable final path segment.
    #[error("cannot derive a file name from {url}")]
    NoFileName { url: String },

    /// Transport-level failure (connect, TLS, read).
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Timed out waiting on the server.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Status other than 200, 206 or 416-on-resume.
    #[error("status not OK for {url}: {status}")]
    Status { url: String, status: u16 },

    /// Partial content without a parseable `Content-Range`.
    #[error("partial content from {url} with bad Content-Range header {header:?}")]
    BadContentRange { url: String, header: Option<String> },

    /// Partial content starting somewhere other than the local file's end.
    #[error("got partial content from {url} with range start {actual}, want {expected}")]
    RangeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// Failure while copying the body into the sink.
    #[error("transfer of {url} failed: {source}")]
    Transfer { url: String, source: io::Error },

    /// Scratch buffer for unsized bodies could not be used.
    #[error("scratch file for {url}: {source}")]
    Scratch { url: String, source: io::Error },

    /// The output sink rejected the write.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The session was interrupted mid-transfer.
    #[error("download of {url} cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    /// Whether this error was caused by session cancellation rather than the file itself.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors raised while listing a directory.
#[derive(Debug, Error)]
pub enum ListingError {
    /// The listing could not be fetched.
    #[error("list dir {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The listing responded with something other than 200.
    #[error("HTTP non-200 listing {url}: {status}")]
    Status { url: String, status: u16 },

    /// The listing body could not be read.
    #[error("reading listing of {url}: {source}")]
    Read { url: String, source: io::Error },
}

/// Errors that abort a whole session before any job runs.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error("failed to open output: {0}")]
    Sink(#[from] SinkError),

    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        source: io::Error,
    },

    #[error("directory listing stopped without a result")]
    ListingAborted,
}
