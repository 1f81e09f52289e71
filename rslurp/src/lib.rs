//! rslurp - bulk downloader for HTTP directory listings
//!
//! This library lists one or more HTTP directory pages, selects the linked
//! files whose names match a pattern, and downloads them with a fixed pool
//! of workers into a directory or a single tar archive. Interrupted plain
//! file downloads resume from where they stopped.

pub mod config;
pub mod download;
pub mod error;
pub mod listing;
pub mod logging;
pub mod sink;

pub use config::{ConfigFile, HttpConfig, SessionConfig, TlsPolicy};
pub use download::{InterruptHandle, Orchestrator, SessionReport, StatusRenderer};
pub use error::{ConfigError, FetchError, ListingError, SessionError, SinkError};
pub use sink::OutputTarget;

/// Crate version, sent in the default `User-Agent`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
