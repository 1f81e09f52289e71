//! Worker pool executing fetch jobs in parallel.
//!
//! Each worker is a plain OS thread owning one [`Fetch`] implementation
//! (and therefore its own HTTP client). Workers pull from a shared
//! [`JobQueue`] until it is drained or the session is cancelled, and
//! signal the orchestrator exactly once when they exit.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::counter::ByteCounter;
use super::fetcher::Fetch;
use super::job::Job;
use super::orchestrator::Control;
use super::progress::{ProgressEvent, ProgressSender};
use super::session::Session;
use crate::error::SessionError;

/// Closed, pre-filled queue of jobs shared by all workers.
///
/// Every job is handed out exactly once.
pub struct JobQueue {
    rx: Mutex<Receiver<Job>>,
    len: usize,
}

impl JobQueue {
    /// Enqueue every job up front; the queue is closed once built.
    pub fn new(jobs: Vec<Job>) -> Self {
        let len = jobs.len();
        let (tx, rx) = mpsc::sync_channel(len);
        for job in jobs {
            // Capacity equals the job count, so this never blocks. The
            // receiver is alive for the whole loop.
            let _ = tx.send(job);
        }
        Self {
            rx: Mutex::new(rx),
            len,
        }
    }

    /// Number of jobs the queue was built with.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Take the next job, or `None` once the queue is drained.
    pub fn next(&self) -> Option<Job> {
        self.rx.lock().try_recv().ok()
    }
}

/// What every worker shares.
#[derive(Clone)]
pub struct WorkerContext {
    pub session: Arc<Session>,
    pub counter: Arc<ByteCounter>,
    pub progress: ProgressSender,
    pub control: Sender<Control>,
    pub cancel: CancellationToken,
}

/// Running worker threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start one worker per fetcher.
    ///
    /// If a thread cannot be spawned the session is cancelled so the
    /// workers already running stop after their current job.
    pub fn spawn(
        queue: Arc<JobQueue>,
        fetchers: Vec<Box<dyn Fetch>>,
        ctx: WorkerContext,
    ) -> Result<Self, SessionError> {
        let mut handles = Vec::with_capacity(fetchers.len());

        for (id, fetcher) in fetchers.into_iter().enumerate() {
            let queue = Arc::clone(&queue);
            let worker_ctx = ctx.clone();

            let spawned = thread::Builder::new()
                .name(format!("rslurp-worker-{}", id))
                .spawn(move || work(id, &queue, fetcher.as_ref(), &worker_ctx));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    ctx.cancel.cancel();
                    return Err(SessionError::Spawn {
                        what: "worker",
                        source: e,
                    });
                }
            }
        }

        Ok(Self { handles })
    }

    /// Number of workers started.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker thread to exit.
    pub fn join(self) {
        for handle in self.handles {
            // Panics were already reported by the worker's exit guard.
            let _ = handle.join();
        }
    }
}

/// Sends [`Control::WorkerFinished`] when dropped, including during a panic.
struct ExitGuard {
    id: usize,
    control: Sender<Control>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(worker = self.id, "Worker panicked");
        }
        let _ = self.control.send(Control::WorkerFinished(self.id));
    }
}

fn work(id: usize, queue: &JobQueue, fetcher: &dyn Fetch, ctx: &WorkerContext) {
    let _guard = ExitGuard {
        id,
        control: ctx.control.clone(),
    };

    while !ctx.cancel.is_cancelled() {
        let Some(job) = queue.next() else {
            break;
        };
        let name = job.file_name().unwrap_or(job.url()).to_string();

        debug!(worker = id, file = %name, "Starting download");

        match fetcher.fetch(&job, &ctx.counter) {
            Ok(outcome) => {
                ctx.session.record_success();
                debug!(worker = id, file = %name, ?outcome, "Download finished");
                ctx.progress
                    .send(ProgressEvent::FileCompleted(job.url().to_string()));
            }
            Err(e) if e.is_cancelled() => {
                debug!(worker = id, file = %name, "Download cancelled");
                break;
            }
            Err(e) => {
                ctx.session.record_failure();
                warn!(file = %name, error = %e, "Failed downloading");
            }
        }
    }

    debug!(worker = id, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::fetcher::FetchOutcome;
    use crate::download::progress::tests::RecordingRenderer;
    use crate::download::progress::{AggregatorConfig, AggregatorHandle, ProgressAggregator};
    use crate::error::{FetchError, FetchResult};
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    /// Fails URLs containing "bad", panics on "boom", records everything.
    struct ScriptedFetcher {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Fetch for ScriptedFetcher {
        fn fetch(&self, job: &Job, counter: &ByteCounter) -> FetchResult<FetchOutcome> {
            self.seen.lock().push(job.url().to_string());
            if job.url().contains("boom") {
                panic!("scripted panic");
            }
            if job.url().contains("bad") {
                return Err(FetchError::Status {
                    url: job.url().to_string(),
                    status: 500,
                });
            }
            counter.add(1);
            Ok(FetchOutcome::Downloaded {
                bytes: 1,
                resumed_from: 0,
            })
        }
    }

    struct Harness {
        ctx: WorkerContext,
        control_rx: Receiver<Control>,
        aggregator: AggregatorHandle,
        seen: Arc<Mutex<Vec<String>>>,
    }

    fn harness(total: usize, workers: usize) -> Harness {
        let (progress, aggregator) = ProgressAggregator::start(
            AggregatorConfig {
                total,
                workers,
                verbose: false,
                started: Instant::now(),
            },
            Box::new(RecordingRenderer::new()),
        )
        .unwrap();
        let (control, control_rx) = mpsc::channel();
        Harness {
            ctx: WorkerContext {
                session: Arc::new(Session::new(total, workers)),
                counter: Arc::new(ByteCounter::new()),
                progress,
                control,
                cancel: CancellationToken::new(),
            },
            control_rx,
            aggregator,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn fetchers(h: &Harness, n: usize) -> Vec<Box<dyn Fetch>> {
        (0..n)
            .map(|_| {
                Box::new(ScriptedFetcher {
                    seen: Arc::clone(&h.seen),
                }) as Box<dyn Fetch>
            })
            .collect()
    }

    fn finished_workers(rx: &Receiver<Control>, n: usize) -> HashSet<usize> {
        let mut ids = HashSet::new();
        for _ in 0..n {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                Control::WorkerFinished(id) => {
                    assert!(ids.insert(id), "worker {id} finished twice");
                }
                other => panic!("unexpected control message {other:?}"),
            }
        }
        ids
    }

    #[test]
    fn test_queue_hands_out_each_job_once() {
        let queue = JobQueue::new(vec![Job::new("http://h/a"), Job::new("http://h/b")]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next(), Some(Job::new("http://h/a")));
        assert_eq!(queue.next(), Some(Job::new("http://h/b")));
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn test_empty_queue() {
        let queue = JobQueue::new(Vec::new());
        assert!(queue.is_empty());
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn test_every_job_reaches_a_terminal_state() {
        let urls: Vec<String> = (0..20)
            .map(|i| {
                if i % 5 == 0 {
                    format!("http://h/bad{i}")
                } else {
                    format!("http://h/f{i}")
                }
            })
            .collect();
        let h = harness(urls.len(), 4);
        let queue = Arc::new(JobQueue::new(urls.iter().map(Job::new).collect()));

        let pool = WorkerPool::spawn(queue, fetchers(&h, 4), h.ctx.clone()).unwrap();
        assert_eq!(pool.size(), 4);
        assert_eq!(finished_workers(&h.control_rx, 4).len(), 4);
        pool.join();

        let session = &h.ctx.session;
        assert_eq!(session.completed(), 16);
        assert_eq!(session.failed(), 4);
        assert!(session.is_finished());
        assert_eq!(h.ctx.counter.get(), 16);

        let mut seen = h.seen.lock().clone();
        seen.sort();
        let mut expected = urls.clone();
        expected.sort();
        assert_eq!(seen, expected);

        assert_eq!(h.aggregator.finish().completed, 16);
    }

    #[test]
    fn test_cancelled_session_fetches_nothing() {
        let h = harness(3, 2);
        h.ctx.cancel.cancel();
        let queue = Arc::new(JobQueue::new(vec![
            Job::new("http://h/a"),
            Job::new("http://h/b"),
            Job::new("http://h/c"),
        ]));

        let pool = WorkerPool::spawn(queue, fetchers(&h, 2), h.ctx.clone()).unwrap();
        finished_workers(&h.control_rx, 2);
        pool.join();

        assert!(h.seen.lock().is_empty());
        assert_eq!(h.ctx.session.completed() + h.ctx.session.failed(), 0);
    }

    #[test]
    fn test_panicking_worker_still_signals_finish() {
        let h = harness(1, 1);
        let queue = Arc::new(JobQueue::new(vec![Job::new("http://h/boom")]));

        let pool = WorkerPool::spawn(queue, fetchers(&h, 1), h.ctx.clone()).unwrap();
        assert_eq!(finished_workers(&h.control_rx, 1), HashSet::from([0]));
        pool.join();
    }

    #[test]
    fn test_cancelled_fetch_is_not_tallied() {
        struct CancelledFetcher;
        impl Fetch for CancelledFetcher {
            fn fetch(&self, job: &Job, _counter: &ByteCounter) -> FetchResult<FetchOutcome> {
                Err(FetchError::Cancelled {
                    url: job.url().to_string(),
                })
            }
        }

        let h = harness(2, 1);
        let queue = Arc::new(JobQueue::new(vec![
            Job::new("http://h/a"),
            Job::new("http://h/b"),
        ]));

        let pool = WorkerPool::spawn(
            Arc::clone(&queue),
            vec![Box::new(CancelledFetcher) as Box<dyn Fetch>],
            h.ctx.clone(),
        )
        .unwrap();
        finished_workers(&h.control_rx, 1);
        pool.join();

        assert_eq!(h.ctx.session.completed(), 0);
        assert_eq!(h.ctx.session.failed(), 0);
        // The worker stopped after the first job.
        assert_eq!(queue.next(), Some(Job::new("http://h/b")));
    }
}
