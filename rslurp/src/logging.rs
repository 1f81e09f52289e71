//! Logging setup and routing of log output into the status display.
//!
//! While a session runs, the terminal belongs to the progress aggregator.
//! Log lines written through a [`LogRouter`] are turned into
//! [`ProgressEvent::StatusLine`] events so they appear above the status
//! line instead of tearing through it. With no session attached, lines go
//! to stderr.
//!
//! ```text
//! tracing ─► fmt layer ─► LogRouter ─┬─(attached)──► ProgressSender ─► aggregator
//!                                    └─(detached)──► stderr
//! ```

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::download::{ProgressEvent, ProgressSender};
use crate::error::ConfigError;

/// `MakeWriter` that forwards log lines to the attached session, if any.
#[derive(Clone, Default)]
pub struct LogRouter {
    target: Arc<Mutex<Option<ProgressSender>>>,
}

impl LogRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route log lines to `sender` until the returned guard is dropped.
    pub fn attach(&self, sender: ProgressSender) -> RouteGuard {
        *self.target.lock() = Some(sender);
        RouteGuard {
            target: Arc::clone(&self.target),
        }
    }

    /// Whether a session is currently receiving log lines.
    pub fn is_attached(&self) -> bool {
        self.target.lock().is_some()
    }
}

/// Detaches the router from its session when dropped.
#[must_use = "log lines are only routed while the guard is alive"]
pub struct RouteGuard {
    target: Arc<Mutex<Option<ProgressSender>>>,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        *self.target.lock() = None;
    }
}

impl<'a> MakeWriter<'a> for LogRouter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter {
            target: Arc::clone(&self.target),
            buf: Vec::new(),
        }
    }
}

/// Buffers one formatted event and delivers it on drop.
pub struct RoutedWriter {
    target: Arc<Mutex<Option<ProgressSender>>>,
    buf: Vec<u8>,
}

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RoutedWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        // Clone out of the lock: the send may block on a full channel.
        let sender = self.target.lock().clone();
        if let Some(sender) = sender {
            let line = String::from_utf8_lossy(&self.buf);
            if sender.send(ProgressEvent::StatusLine(line.trim_end().to_string())) {
                return;
            }
        }
        let _ = io::stderr().write_all(&self.buf);
    }
}

/// Keeps the log file writer alive. Drop it last to flush pending lines.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Console output goes through `router`. The level defaults to `info`
/// (`debug` for this crate when `verbose`) and `RUST_LOG` overrides it.
/// With `log_file`, every event is also appended to that file.
pub fn init(
    router: &LogRouter,
    verbose: bool,
    log_file: Option<&Path>,
) -> Result<LoggingGuard, ConfigError> {
    let default_directives = if verbose {
        "info,rslurp=debug,rslurp_cli=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let console = tracing_subscriber::fmt::layer()
        .with_writer(router.clone())
        .with_ansi(false)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), ConfigError> {
    let file_name = path.file_name().ok_or_else(|| {
        ConfigError::Logging(format!("log file {} has no file name", path.display()))
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| {
        ConfigError::Logging(format!("cannot create {}: {}", dir.display(), e))
    })?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::progress::tests::{Rendered, RecordingRenderer};
    use crate::download::{AggregatorConfig, ProgressAggregator};
    use std::time::Instant;

    fn aggregator(
        renderer: &RecordingRenderer,
    ) -> (ProgressSender, crate::download::AggregatorHandle) {
        ProgressAggregator::start(
            AggregatorConfig {
                total: 0,
                workers: 1,
                verbose: false,
                started: Instant::now(),
            },
            Box::new(renderer.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_attached_router_forwards_lines() {
        let renderer = RecordingRenderer::new();
        let (sender, handle) = aggregator(&renderer);
        let router = LogRouter::new();

        {
            let _guard = router.attach(sender);
            assert!(router.is_attached());
            let mut writer = router.make_writer();
            writer.write_all(b"WARN Failed downloading file=\"a.zip\"\n").unwrap();
        }
        assert!(!router.is_attached());
        handle.finish();

        assert!(renderer
            .rendered()
            .contains(&Rendered::Message("WARN Failed downloading file=\"a.zip\"".to_string())));
    }

    #[test]
    fn test_empty_writes_are_dropped() {
        let renderer = RecordingRenderer::new();
        let (sender, handle) = aggregator(&renderer);
        let router = LogRouter::new();

        {
            let _guard = router.attach(sender);
            drop(router.make_writer());
        }
        handle.finish();

        assert!(renderer.messages().is_empty());
    }

    #[test]
    fn test_detached_router_does_not_forward() {
        let renderer = RecordingRenderer::new();
        let (sender, handle) = aggregator(&renderer);
        let router = LogRouter::new();

        drop(router.attach(sender));
        let mut writer = router.make_writer();
        writer.write_all(b"to stderr\n").unwrap();
        drop(writer);
        handle.finish();

        assert!(renderer.messages().is_empty());
    }
}
