//! Concurrent, resumable download sessions.
//!
//! This module runs the download phase of a session:
//! - Fetching one file, with resume against partial output (`fetcher`)
//! - Blocking HTTP transport behind a trait (`http`)
//! - A fixed pool of worker threads over a closed job queue (`pool`)
//! - Byte counting and status aggregation (`counter`, `progress`)
//! - Session tallies and exit status (`session`)
//! - Start-to-teardown control of a session (`orchestrator`)
//!
//! # Architecture
//!
//! ```text
//! Orchestrator ──plan_jobs──► JobQueue
//!      │                          │
//!      │ control channel          ▼
//!      │ (WorkerFinished,    WorkerPool ── N × worker ── Fetch ──► OutputSink
//!      │  Tick, Interrupted)      │                       │
//!      │                          │ FileCompleted         │ CountingReader
//!      ▼                          ▼                       ▼
//!   Ticker ──BytesSnapshot──► ProgressAggregator ◄── ByteCounter
//!                                 │
//!                                 └── StatusRenderer (terminal)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rslurp::config::SessionConfig;
//! use rslurp::download::Orchestrator;
//!
//! let config = SessionConfig::builder()
//!     .with_workers(4)
//!     .with_pattern(r"\.iso$")
//!     .build()?;
//!
//! let report = Orchestrator::new(config)
//!     .run(&["http://mirror.example/isos/".to_string()], renderer)?;
//! std::process::exit(report.exit_code().into());
//! ```

mod counter;
mod fetcher;
pub(crate) mod http;
mod job;
mod orchestrator;
mod pool;
pub(crate) mod progress;
mod session;

// Public API
pub use counter::{ByteCounter, CountingReader};
pub use fetcher::{DryRunFetcher, Fetch, FetchOutcome, HttpFetcher};
pub use http::{ClientFactory, HttpClient, HttpResponse, ReqwestClient};
pub use job::Job;
pub use orchestrator::{Control, InterruptHandle, Orchestrator};
pub use pool::{JobQueue, WorkerContext, WorkerPool};
pub use progress::{
    format_duration, format_status, humanize, AggregatorConfig, AggregatorHandle,
    AggregatorSummary, ProgressAggregator, ProgressEvent, ProgressSender, StatusRenderer,
};
pub use session::{Session, SessionReport, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS};
