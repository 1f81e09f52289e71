//! Output sinks: where downloaded bytes end up.
//!
//! A sink hands out one writable stream per file. Two implementations exist:
//!
//! - [`DirectorySink`] writes plain files and can continue partial ones.
//! - [`ArchiveSink`] writes a single tar stream. Entries need their size up
//!   front and cannot be resumed, and only one stream may be open at a time.
//!
//! ```text
//! Fetcher ──create/append──► OutputSink ──► SinkStream (Write + finish)
//!                                │
//!                                ├── DirectorySink  (<dir>/<name>)
//!                                └── ArchiveSink    (one tar file)
//! ```

mod archive;
mod directory;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

pub use archive::ArchiveSink;
pub use directory::DirectorySink;

use crate::error::SinkResult;

/// A write stream for one output file.
///
/// Dropping a stream releases its handle. Call [`SinkStream::finish`] on the
/// success path to surface flush and size errors.
pub trait SinkStream: Write + Send {
    /// Flush and close the stream, reporting anything that went wrong.
    fn finish(self: Box<Self>) -> SinkResult<()>;
}

/// Durable write target for named, optionally sized streams.
pub trait OutputSink: Send + Sync {
    /// Short name for logs and error messages.
    fn kind(&self) -> &'static str;

    /// Start a new file, replacing any existing one.
    fn create(&self, name: &str, size: Option<u64>) -> SinkResult<Box<dyn SinkStream>>;

    /// Continue an existing partial file.
    fn append(&self, name: &str, size: Option<u64>) -> SinkResult<Box<dyn SinkStream>>;

    /// Whether partial files can be continued with [`OutputSink::append`].
    fn supports_resume(&self) -> bool;

    /// Whether [`OutputSink::create`] needs the exact size.
    fn requires_known_size(&self) -> bool;

    /// Size of an existing partial file, if there is one.
    fn partial_len(&self, _name: &str) -> SinkResult<Option<u64>> {
        Ok(None)
    }

    /// Finalize the output. Called once after the last stream is finished.
    fn close(&self) -> SinkResult<()>;
}

/// Where a session writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Plain files inside a directory.
    Directory(PathBuf),
    /// A single tar archive at this path.
    Archive(PathBuf),
}

impl OutputTarget {
    /// Whether this target only tolerates a single writer.
    pub fn is_single_writer(&self) -> bool {
        matches!(self, Self::Archive(_))
    }

    /// Open the sink for this target.
    pub fn open(&self) -> SinkResult<Arc<dyn OutputSink>> {
        match self {
            Self::Directory(dir) => Ok(Arc::new(DirectorySink::open(dir)?)),
            Self::Archive(path) => Ok(Arc::new(ArchiveSink::open(path)?)),
        }
    }
}

impl Default for OutputTarget {
    fn default() -> Self {
        Self::Directory(PathBuf::from("."))
    }
}
