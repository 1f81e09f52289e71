//! Session orchestration.
//!
//! [`Orchestrator::run`] drives one session from listing to teardown:
//! plan the job set on a lister thread, open the output, start the
//! aggregator and the worker pool, then wait on a single control channel for
//! worker exits, ticks and interrupts.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::counter::ByteCounter;
use super::fetcher::{DryRunFetcher, Fetch, HttpFetcher};
use super::http::ClientFactory;
use super::job::Job;
use super::pool::{JobQueue, WorkerContext, WorkerPool};
use super::progress::{AggregatorConfig, ProgressAggregator, ProgressEvent, StatusRenderer};
use super::session::{Session, SessionReport};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::listing::{plan_jobs, DirectoryLister, HttpDirectoryLister};
use crate::logging::LogRouter;
use crate::sink::OutputSink;

/// Messages the controlling loop waits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// A worker thread exited.
    WorkerFinished(usize),
    /// Time to sample the byte counter.
    Tick,
    /// Stop now. Carries the signal name.
    Interrupted(String),
}

/// Lets another thread (a signal handler) interrupt a running session.
#[derive(Clone)]
pub struct InterruptHandle {
    tx: Sender<Control>,
}

impl InterruptHandle {
    /// Ask the session to stop. `reason` is shown as `Killed by signal <reason>`.
    pub fn interrupt(&self, reason: impl Into<String>) {
        // The session may already be over.
        let _ = self.tx.send(Control::Interrupted(reason.into()));
    }
}

/// Runs one download session.
pub struct Orchestrator {
    config: SessionConfig,
    clients: Box<dyn ClientFactory>,
    lister: Option<Box<dyn DirectoryLister>>,
    router: Option<LogRouter>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
}

impl Orchestrator {
    /// Create an orchestrator using real HTTP clients built from the config.
    pub fn new(config: SessionConfig) -> Self {
        let clients = Box::new(config.http().clone());
        let (control_tx, control_rx) = mpsc::channel();
        Self {
            config,
            clients,
            lister: None,
            router: None,
            control_tx,
            control_rx,
        }
    }

    /// Use a different source of HTTP clients.
    pub fn with_client_factory(mut self, clients: impl ClientFactory + 'static) -> Self {
        self.clients = Box::new(clients);
        self
    }

    /// Use a different directory lister.
    pub fn with_lister(mut self, lister: impl DirectoryLister + 'static) -> Self {
        self.lister = Some(Box::new(lister));
        self
    }

    /// Route log output into the status display while the session runs.
    pub fn with_log_router(mut self, router: LogRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Handle for interrupting [`Orchestrator::run`] from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            tx: self.control_tx.clone(),
        }
    }

    /// Run the session for the given directory URLs.
    ///
    /// Listing, configuration and output errors abort before any download.
    /// Per-file failures are tallied in the report.
    pub fn run(
        mut self,
        urls: &[String],
        renderer: Box<dyn StatusRenderer>,
    ) -> Result<SessionReport, SessionError> {
        if urls.is_empty() {
            return Ok(SessionReport::empty());
        }

        let workers = self.config.workers();
        let lister: Box<dyn DirectoryLister> = match self.lister.take() {
            Some(lister) => lister,
            None => Box::new(HttpDirectoryLister::new(self.clients.build()?)),
        };
        let jobs = match self.plan(urls, lister)? {
            Planned::Jobs(jobs) => jobs,
            Planned::Interrupted(reason) => {
                let mut renderer = renderer;
                renderer.message(&format!("Killed by signal {}", reason));
                renderer.finish();
                return Ok(Session::new(0, workers).report(0, true));
            }
        };

        let cancel = CancellationToken::new();
        let (sink, fetchers): (Option<Arc<dyn OutputSink>>, Vec<Box<dyn Fetch>>) =
            if self.config.dry_run() {
                let fetchers = (0..workers)
                    .map(|_| Box::new(DryRunFetcher) as Box<dyn Fetch>)
                    .collect();
                (None, fetchers)
            } else {
                let clients = (0..workers)
                    .map(|_| self.clients.build())
                    .collect::<Result<Vec<_>, _>>()?;
                let sink = self.config.output().open()?;
                let fetchers = clients
                    .into_iter()
                    .map(|client| {
                        Box::new(HttpFetcher::new(client, Arc::clone(&sink), cancel.clone()))
                            as Box<dyn Fetch>
                    })
                    .collect();
                (Some(sink), fetchers)
            };

        let session = Arc::new(Session::new(jobs.len(), workers));
        let counter = Arc::new(ByteCounter::new());

        let (progress, aggregator) = ProgressAggregator::start(
            AggregatorConfig {
                total: session.total(),
                workers,
                verbose: self.config.verbose(),
                started: session.started(),
            },
            renderer,
        )?;
        let route = self.router.as_ref().map(|r| r.attach(progress.clone()));

        info!(
            files = session.total(),
            workers,
            dry_run = self.config.dry_run(),
            "Starting downloads"
        );

        let pool = WorkerPool::spawn(
            Arc::new(JobQueue::new(jobs)),
            fetchers,
            WorkerContext {
                session: Arc::clone(&session),
                counter: Arc::clone(&counter),
                progress: progress.clone(),
                control: self.control_tx.clone(),
                cancel: cancel.clone(),
            },
        )?;
        let mut ticker = Ticker::start(self.config.ui_interval(), self.control_tx.clone())?;

        let mut running = pool.size();
        let mut interrupted = None;
        while running > 0 {
            // `self` holds a sender, so the channel never disconnects.
            let Ok(msg) = self.control_rx.recv() else {
                break;
            };
            match msg {
                Control::WorkerFinished(id) => {
                    running -= 1;
                    debug!(worker = id, remaining = running, "Worker finished");
                }
                Control::Tick => {
                    // No snapshots during the first second.
                    if session.elapsed() > SNAPSHOT_WARMUP {
                        progress.send(ProgressEvent::BytesSnapshot(counter.get()));
                    }
                }
                Control::Interrupted(reason) => {
                    interrupted = Some(reason);
                    break;
                }
            }
        }

        if let Some(reason) = interrupted {
            progress.send(ProgressEvent::StatusLine(format!(
                "Killed by signal {}",
                reason
            )));
            cancel.cancel();
            ticker.stop();
            drop(route);
            aggregator.finish();
            // Workers are left to notice the cancellation on their own.
            drop(pool);
            return Ok(session.report(counter.get(), true));
        }

        progress.send(ProgressEvent::BytesSnapshot(counter.get()));
        ticker.stop();
        pool.join();

        let output_error = sink.and_then(|sink| close_sink(sink.as_ref()));
        drop(route);
        aggregator.finish();

        let mut report = session.report(counter.get(), false);
        report.output_error = output_error;
        debug!(
            completed = report.completed,
            failed = report.failed,
            bytes = report.bytes,
            "Session finished"
        );
        Ok(report)
    }

    /// List every directory on a separate thread so an interrupt is seen
    /// while a slow server is still answering.
    fn plan(
        &self,
        urls: &[String],
        lister: Box<dyn DirectoryLister>,
    ) -> Result<Planned, SessionError> {
        let (result_tx, result_rx) = mpsc::channel();
        let urls = urls.to_vec();
        let pattern = self.config.pattern().clone();
        thread::Builder::new()
            .name("rslurp-lister".to_string())
            .spawn(move || {
                let _ = result_tx.send(plan_jobs(&urls, &*lister, &pattern));
            })
            .map_err(|source| SessionError::Spawn {
                what: "lister",
                source,
            })?;

        loop {
            if let Ok(Control::Interrupted(reason)) = self.control_rx.try_recv() {
                // The lister thread is abandoned; its result is dropped.
                return Ok(Planned::Interrupted(reason));
            }
            match result_rx.recv_timeout(LISTING_POLL) {
                Ok(result) => return Ok(Planned::Jobs(result?)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(SessionError::ListingAborted),
            }
        }
    }
}

const LISTING_POLL: Duration = Duration::from_millis(50);

/// Byte snapshots are held back until the session is this old.
const SNAPSHOT_WARMUP: Duration = Duration::from_secs(1);

enum Planned {
    Jobs(Vec<Job>),
    Interrupted(String),
}

fn close_sink(sink: &dyn OutputSink) -> Option<String> {
    match sink.close() {
        Ok(()) => None,
        Err(e) => {
            error!(output = sink.kind(), error = %e, "Failed to finalize output");
            Some(e.to_string())
        }
    }
}

/// Sends [`Control::Tick`] at a fixed interval until stopped.
struct Ticker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn start(interval: Duration, control: Sender<Control>) -> Result<Self, SessionError> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("rslurp-ticker".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if control.send(Control::Tick).is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            })
            .map_err(|e| SessionError::Spawn {
                what: "ticker",
                source: e,
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the thread.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
