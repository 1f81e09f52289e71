//! Single tar archive output.
//!
//! Headers (including GNU long-name entries) and the end-of-archive trailer
//! are written by [`tar::Builder`]. Bodies are streamed straight into the
//! underlying file and padded to the next block boundary, so the size must
//! be known before the first body byte is written. The sink is not safe for
//! concurrent writers; sessions writing to an archive are restricted to one
//! worker.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tar::{Builder, EntryType, Header};

use super::{OutputSink, SinkStream};
use crate::error::{SinkError, SinkResult};

/// Tar block size.
const BLOCK_SIZE: u64 = 512;

const KIND: &str = "tar";

/// Writes every download as an entry of one tar file.
pub struct ArchiveSink {
    path: PathBuf,
    state: Arc<Mutex<ArchiveState>>,
}

struct ArchiveState {
    builder: Builder<BufWriter<File>>,
    /// An entry stream is currently open.
    entry_open: bool,
    /// Name of the entry that was left incomplete, if any.
    poisoned: Option<String>,
    closed: bool,
}

impl ArchiveSink {
    /// Create (or truncate) the archive file at `path`.
    pub fn open(path: impl AsRef<Path>) -> SinkResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| SinkError::OpenFailed {
            path: path.clone(),
            source: e,
        })?;
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(ArchiveState {
                builder: Builder::new(BufWriter::new(file)),
                entry_open: false,
                poisoned: None,
                closed: false,
            })),
        })
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SinkError {
        SinkError::Io {
            target: self.path.display().to_string(),
            source,
        }
    }
}

/// Entry names must be plain relative paths.
fn check_name(name: &str) -> SinkResult<()> {
    let path = Path::new(name);
    let plain = !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(SinkError::InvalidName {
            name: name.to_string(),
            reason: "not a plain relative path".to_string(),
        })
    }
}

fn entry_header(size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_entry_type(EntryType::Regular);
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    header.set_mtime(mtime);
    header
}

fn padding_for(size: u64) -> usize {
    ((BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE) as usize
}

impl OutputSink for ArchiveSink {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn create(&self, name: &str, size: Option<u64>) -> SinkResult<Box<dyn SinkStream>> {
        let size = size.ok_or_else(|| SinkError::SizeRequired {
            sink: KIND,
            name: name.to_string(),
        })?;
        check_name(name)?;

        let mut state = self.state.lock();
        if let Some(poisoned) = &state.poisoned {
            return Err(SinkError::Poisoned {
                name: poisoned.clone(),
            });
        }
        if state.entry_open || state.closed {
            return Err(self.io_error(io::Error::other(
                "archive entry requested while another is open or after close",
            )));
        }

        // Header only; the body follows through the entry stream.
        let mut header = entry_header(size);
        state
            .builder
            .append_data(&mut header, name, io::empty())
            .map_err(|e| self.io_error(e))?;
        state.entry_open = true;

        Ok(Box::new(ArchiveEntry {
            state: Arc::clone(&self.state),
            name: name.to_string(),
            size,
            remaining: size,
            finished: false,
        }))
    }

    fn append(&self, _name: &str, _size: Option<u64>) -> SinkResult<Box<dyn SinkStream>> {
        Err(SinkError::ResumeUnsupported { sink: KIND })
    }

    fn supports_resume(&self) -> bool {
        false
    }

    fn requires_known_size(&self) -> bool {
        true
    }

    fn close(&self) -> SinkResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if let Some(poisoned) = &state.poisoned {
            return Err(SinkError::Poisoned {
                name: poisoned.clone(),
            });
        }
        state
            .builder
            .finish()
            .and_then(|_| state.builder.get_mut().flush())
            .map_err(|e| self.io_error(e))?;
        state.closed = true;
        Ok(())
    }
}

/// Stream for one archive entry. Refuses to write past the declared size.
struct ArchiveEntry {
    state: Arc<Mutex<ArchiveState>>,
    name: String,
    size: u64,
    remaining: u64,
    finished: bool,
}

impl ArchiveEntry {
    /// Pad the body to a block boundary and release the archive.
    fn close_entry(&mut self) -> io::Result<()> {
        self.finished = true;
        let mut state = self.state.lock();
        state.entry_open = false;
        if self.remaining > 0 {
            state.poisoned = Some(self.name.clone());
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "entry {:?} is {} bytes short of its declared size {}",
                    self.name, self.remaining, self.size
                ),
            ));
        }
        let padding = [0u8; BLOCK_SIZE as usize];
        let writer = state.builder.get_mut();
        writer.write_all(&padding[..padding_for(self.size)])?;
        writer.flush()
    }
}

impl Write for ArchiveEntry {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() as u64 > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "entry {:?} exceeds its declared size {}",
                    self.name, self.size
                ),
            ));
        }
        let n = self.state.lock().builder.get_mut().write(buf)?;
        self.remaining -= n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().builder.get_mut().flush()
    }
}

impl SinkStream for ArchiveEntry {
    fn finish(mut self: Box<Self>) -> SinkResult<()> {
        self.close_entry().map_err(|e| SinkError::Io {
            target: self.name.clone(),
            source: e,
        })
    }
}

impl Drop for ArchiveEntry {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.close_entry() {
                tracing::debug!(entry = %self.name, error = %e, "Archive entry closed early");
            }
        }
    }
}
