//! Plain-directory output with resume support.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{OutputSink, SinkStream};
use crate::error::{SinkError, SinkResult};

/// Writes each download to `<dir>/<name>`.
///
/// Workers only ever touch their own file name, so the sink is shared
/// between all of them without locking.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Open a directory sink, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> SinkResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SinkError::CreateDirFailed {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    /// Directory files are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn stream(path: PathBuf, file: File) -> Box<dyn SinkStream> {
        Box::new(FileStream {
            writer: BufWriter::new(file),
            path,
        })
    }
}

impl OutputSink for DirectorySink {
    fn kind(&self) -> &'static str {
        "directory"
    }

    fn create(&self, name: &str, _size: Option<u64>) -> SinkResult<Box<dyn SinkStream>> {
        let path = self.path_for(name);
        let file = File::create(&path).map_err(|e| SinkError::OpenFailed {
            path: path.clone(),
            source: e,
        })?;
        Ok(Self::stream(path, file))
    }

    fn append(&self, name: &str, _size: Option<u64>) -> SinkResult<Box<dyn SinkStream>> {
        let path = self.path_for(name);
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::OpenFailed {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self::stream(path, file))
    }

    fn supports_resume(&self) -> bool {
        true
    }

    fn requires_known_size(&self) -> bool {
        false
    }

    fn partial_len(&self, name: &str) -> SinkResult<Option<u64>> {
        let path = self.path_for(name);
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SinkError::StatFailed { path, source: e }),
        }
    }

    fn close(&self) -> SinkResult<()> {
        Ok(())
    }
}

struct FileStream {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl SinkStream for FileStream {
    fn finish(mut self: Box<Self>) -> SinkResult<()> {
        self.writer.flush().map_err(|e| SinkError::Io {
            target: self.path.display().to_string(),
            source: e,
        })
    }
}
