//! Progress aggregation for a download session.
//!
//! Workers, the ticker and the log router all produce [`ProgressEvent`]s.
//! A single aggregator thread consumes them in arrival order, keeps the
//! running totals and redraws one status line through a [`StatusRenderer`]:
//!
//! ```text
//! 3/10 files. 4 workers. 12.345 MB in 5s = 2.5 MBps. Current: 3.1 MBps
//! ```

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::job::Job;
use crate::error::SessionError;

/// Capacity of the event channel.
const CHANNEL_CAPACITY: usize = 100;

/// SI unit prefixes used by [`humanize`].
const UNITS: [&str; 5] = ["", "k", "M", "G", "T"];

/// Something the status display should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Current value of the session byte counter.
    BytesSnapshot(u64),
    /// A line of text to print above the status line.
    StatusLine(String),
    /// The job for this URL finished successfully.
    FileCompleted(String),
}

enum AggregatorMsg {
    Event(ProgressEvent),
    Close,
}

/// Cloneable handle for sending events to the aggregator.
#[derive(Clone)]
pub struct ProgressSender {
    tx: SyncSender<AggregatorMsg>,
}

impl ProgressSender {
    /// Send an event. Returns `false` once the aggregator has shut down.
    pub fn send(&self, event: ProgressEvent) -> bool {
        self.tx.send(AggregatorMsg::Event(event)).is_ok()
    }
}

/// Terminal (or other) output for the aggregator.
///
/// Implementations must not log through `tracing`: while a session is
/// running, log output is routed back into the aggregator.
pub trait StatusRenderer: Send {
    /// Replace the current status line.
    fn status(&mut self, line: &str);

    /// Print a full line of text, leaving the status line below it.
    fn message(&mut self, text: &str);

    /// Finish output once the session is over.
    fn finish(&mut self);
}

/// Static session facts the status line needs.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Number of jobs in the session.
    pub total: usize,
    /// Number of workers.
    pub workers: usize,
    /// Print a line for every completed file.
    pub verbose: bool,
    /// Session start, the origin of the average rate.
    pub started: Instant,
}

/// Totals reported when the aggregator is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorSummary {
    /// Completion events seen.
    pub completed: usize,
    /// Last byte snapshot seen.
    pub bytes: u64,
}

/// Running totals and rate tracking. Lives on the aggregator thread.
struct AggregatorState {
    config: AggregatorConfig,
    completed: usize,
    bytes: u64,
    last_bytes: u64,
    last_time: Instant,
    current_rate: f64,
}

impl AggregatorState {
    fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            completed: 0,
            bytes: 0,
            last_bytes: 0,
            last_time: config.started,
            current_rate: 0.0,
        }
    }

    /// Apply one event and redraw at `now`.
    fn handle(&mut self, event: ProgressEvent, now: Instant, renderer: &mut dyn StatusRenderer) {
        match event {
            ProgressEvent::BytesSnapshot(bytes) => self.sample(bytes, now),
            ProgressEvent::StatusLine(text) => renderer.message(&text),
            ProgressEvent::FileCompleted(url) => {
                if self.config.verbose {
                    renderer.message(&format!("Done: {:?}", display_name(&url)));
                }
                self.completed += 1;
            }
        }
        let line = self.status_line(now);
        renderer.status(&line);
    }

    /// Take a byte snapshot. Only snapshots move the current-rate window.
    fn sample(&mut self, bytes: u64, now: Instant) {
        // The byte counter only grows.
        self.bytes = self.bytes.max(bytes);
        let since_last = now.saturating_duration_since(self.last_time);
        self.current_rate = rate(self.bytes.saturating_sub(self.last_bytes), since_last);
        self.last_bytes = self.bytes;
        self.last_time = now;
    }

    fn status_line(&self, now: Instant) -> String {
        let elapsed = now.saturating_duration_since(self.config.started);
        format_status(
            self.completed,
            self.config.total,
            self.config.workers,
            self.bytes,
            elapsed,
            rate(self.bytes, elapsed),
            self.current_rate,
        )
    }

    fn summary(&self) -> AggregatorSummary {
        AggregatorSummary {
            completed: self.completed,
            bytes: self.bytes,
        }
    }
}

/// The aggregator thread.
///
/// Runs until [`AggregatorHandle::finish`] is called or the handle is dropped.
pub struct ProgressAggregator;

impl ProgressAggregator {
    /// Spawn the aggregator thread.
    pub fn start(
        config: AggregatorConfig,
        mut renderer: Box<dyn StatusRenderer>,
    ) -> Result<(ProgressSender, AggregatorHandle), SessionError> {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);

        let thread = thread::Builder::new()
            .name("rslurp-progress".to_string())
            .spawn(move || run(config, rx, renderer.as_mut()))
            .map_err(|e| SessionError::Spawn {
                what: "progress",
                source: e,
            })?;

        Ok((
            ProgressSender { tx: tx.clone() },
            AggregatorHandle {
                tx,
                thread: Some(thread),
            },
        ))
    }
}

fn run(
    config: AggregatorConfig,
    rx: Receiver<AggregatorMsg>,
    renderer: &mut dyn StatusRenderer,
) -> AggregatorSummary {
    let mut state = AggregatorState::new(config);
    for msg in rx {
        match msg {
            AggregatorMsg::Event(event) => state.handle(event, Instant::now(), renderer),
            AggregatorMsg::Close => break,
        }
    }
    renderer.finish();
    state.summary()
}

/// Owner's handle on the aggregator thread.
pub struct AggregatorHandle {
    tx: SyncSender<AggregatorMsg>,
    thread: Option<JoinHandle<AggregatorSummary>>,
}

impl AggregatorHandle {
    /// Close the event stream and wait for the aggregator to flush.
    ///
    /// Events queued before this call are still rendered. Senders held by
    /// other threads do not keep the aggregator alive.
    pub fn finish(mut self) -> AggregatorSummary {
        self.shutdown()
    }

    fn shutdown(&mut self) -> AggregatorSummary {
        let Some(thread) = self.thread.take() else {
            return AggregatorSummary::default();
        };
        // A send error means the thread is already gone; join reports why.
        let _ = self.tx.send(AggregatorMsg::Close);
        thread.join().unwrap_or_default()
    }
}

impl Drop for AggregatorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Render the status line.
pub fn format_status(
    completed: usize,
    total: usize,
    workers: usize,
    bytes: u64,
    elapsed: Duration,
    average_rate: f64,
    current_rate: f64,
) -> String {
    format!(
        "{}/{} files. {} workers. {}B in {} = {}Bps. Current: {}Bps",
        completed,
        total,
        workers,
        humanize(bytes as f64, 3),
        format_duration(round_seconds(elapsed)),
        humanize(average_rate, 1),
        humanize(current_rate, 1),
    )
}

/// Format `value` with an SI prefix, e.g. `humanize(1500.0, 1)` is `"1.5 k"`.
///
/// Values below 1000 are printed without decimals. Values of 1000 T or more
/// do not fit and render as `"??? "`.
pub fn humanize(value: f64, decimals: usize) -> String {
    let mut v = value;
    let mut n = 0;
    while v >= 1000.0 && n < UNITS.len() {
        v /= 1000.0;
        n += 1;
    }
    if n >= UNITS.len() {
        return "??? ".to_string();
    }
    let decimals = if n == 0 { 0 } else { decimals };
    format!("{:.*} {}", decimals, v, UNITS[n])
}

/// Truncate to whole seconds.
pub fn round_seconds(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

/// Format a duration as hours, minutes and seconds, e.g. `1h2m3s`, `4m0s`, `59s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn rate(bytes: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

fn display_name(url: &str) -> String {
    let job = Job::new(url);
    match job.file_name() {
        Ok(name) => name.to_string(),
        Err(_) => url.to_string(),
    }
}
