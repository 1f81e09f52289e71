//! Resumable single-file fetch against an output sink.
//!
//! The protocol for one job:
//! - if the sink can resume and a partial file of `S` bytes exists, ask for
//!   `Range: bytes=S-`
//! - `200` writes the file from scratch, `206` appends after checking that
//!   the server's `Content-Range` starts at `S`, and `416` on a ranged
//!   request means the file is already complete
//! - sinks that need the size up front get unsized bodies buffered to an
//!   anonymous temp file first
//!
//! Nothing is retried here. A failed fetch fails its job.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::counter::{ByteCounter, CountingReader};
use super::http::HttpClient;
use super::job::Job;
use crate::error::{FetchError, FetchResult};
use crate::sink::OutputSink;

/// Result of a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body bytes were written. `resumed_from` is the offset the transfer
    /// continued from (0 for a fresh download).
    Downloaded { bytes: u64, resumed_from: u64 },
    /// The server reported the range as unsatisfiable: nothing left to fetch.
    AlreadyComplete,
    /// Dry run; nothing was fetched.
    Skipped,
}

/// Performs one job. Each worker owns one fetcher.
pub trait Fetch: Send {
    fn fetch(&self, job: &Job, counter: &ByteCounter) -> FetchResult<FetchOutcome>;
}

/// Fetcher that downloads over HTTP into an [`OutputSink`].
pub struct HttpFetcher {
    client: Box<dyn HttpClient>,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
}

impl HttpFetcher {
    pub fn new(
        client: Box<dyn HttpClient>,
        sink: Arc<dyn OutputSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            sink,
            cancel,
        }
    }

    /// Copy `reader` into `writer`, telling cancellation apart from I/O failure.
    fn copy<R, W>(&self, url: &str, reader: &mut R, writer: &mut W) -> FetchResult<u64>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        io::copy(reader, writer).map_err(|e| {
            if self.cancel.is_cancelled() {
                FetchError::Cancelled {
                    url: url.to_string(),
                }
            } else {
                FetchError::Transfer {
                    url: url.to_string(),
                    source: e,
                }
            }
        })
    }

    /// Stage an unsized body in a temp file, then write it with its measured length.
    fn write_buffered<R: Read>(&self, url: &str, name: &str, body: &mut R) -> FetchResult<u64> {
        let scratch_err = |e| FetchError::Scratch {
            url: url.to_string(),
            source: e,
        };

        let mut scratch = tempfile::tempfile().map_err(scratch_err)?;
        let len = self.copy(url, body, &mut scratch)?;
        scratch.seek(SeekFrom::Start(0)).map_err(scratch_err)?;

        let mut stream = self.sink.create(name, Some(len))?;
        io::copy(&mut scratch, &mut stream).map_err(|e| FetchError::Transfer {
            url: url.to_string(),
            source: e,
        })?;
        stream.finish()?;
        Ok(len)
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, job: &Job, counter: &ByteCounter) -> FetchResult<FetchOutcome> {
        let url = job.url();
        let name = job.file_name()?;

        let range_start = if self.sink.supports_resume() {
            self.sink.partial_len(name)?
        } else {
            None
        };

        let response = self.client.get(url, range_start)?;

        let resumed_from = match (response.status, range_start) {
            (200, _) => None,
            (206, Some(start)) => {
                check_content_range(url, response.content_range.as_deref(), start)?;
                Some(start)
            }
            (416, Some(_)) => return Ok(FetchOutcome::AlreadyComplete),
            (status, _) => {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                })
            }
        };

        let content_length = response.content_length;
        let mut body = CountingReader::new(response.body, counter, &self.cancel);

        let bytes = if self.sink.requires_known_size() && content_length.is_none() {
            self.write_buffered(url, name, &mut body)?
        } else {
            let mut stream = match resumed_from {
                Some(_) => self.sink.append(name, content_length)?,
                None => self.sink.create(name, content_length)?,
            };
            let n = self.copy(url, &mut body, &mut stream)?;
            stream.finish()?;
            n
        };

        Ok(FetchOutcome::Downloaded {
            bytes,
            resumed_from: resumed_from.unwrap_or(0),
        })
    }
}

/// Fetcher for dry runs: performs no network or file I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunFetcher;

impl Fetch for DryRunFetcher {
    fn fetch(&self, _job: &Job, _counter: &ByteCounter) -> FetchResult<FetchOutcome> {
        Ok(FetchOutcome::Skipped)
    }
}

fn content_range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^bytes (\d+)-(\d+)/(\d+|\*)$").expect("Content-Range pattern is valid")
    })
}

/// Verify a partial response continues exactly where the local file ends.
fn check_content_range(url: &str, header: Option<&str>, expected: u64) -> FetchResult<()> {
    let bad_header = || FetchError::BadContentRange {
        url: url.to_string(),
        header: header.map(str::to_string),
    };

    let captures = header
        .and_then(|h| content_range_pattern().captures(h.trim()))
        .ok_or_else(bad_header)?;
    let actual: u64 = captures[1].parse().map_err(|_| bad_header())?;

    if actual != expected {
        return Err(FetchError::RangeMismatch {
            url: url.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::http::tests::{file_response, response, MockHttpClient};
    use crate::download::http::HttpResponse;
    use crate::sink::{ArchiveSink, DirectorySink};
    use std::fs;
    use std::io::Cursor;

    const URL: &str = "http://host/dir/file.bin";
    const BODY: &[u8] = b"0123456789";

    fn fetcher(client: &MockHttpClient, sink: Arc<dyn OutputSink>) -> HttpFetcher {
        HttpFetcher::new(Box::new(client.clone()), sink, CancellationToken::new())
    }

    fn directory(dir: &tempfile::TempDir) -> Arc<dyn OutputSink> {
        Arc::new(DirectorySink::open(dir.path()).unwrap())
    }

    #[test]
    fn test_fresh_download() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockHttpClient::serving(&[(URL, BODY)]);
        let counter = ByteCounter::new();

        let outcome = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &counter)
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: 10,
                resumed_from: 0
            }
        );
        assert_eq!(fs::read(dir.path().join("file.bin")).unwrap(), BODY);
        assert_eq!(counter.get(), 10);
        assert_eq!(client.requests(), vec![(URL.to_string(), None)]);
    }

    #[test]
    fn test_resume_requests_range_from_partial_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.bin"), &BODY[..4]).unwrap();
        let client = MockHttpClient::serving(&[(URL, BODY)]);
        let counter = ByteCounter::new();

        let outcome = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &counter)
            .unwrap();

        assert_eq!(client.requests(), vec![(URL.to_string(), Some(4))]);
        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: 6,
                resumed_from: 4
            }
        );
        assert_eq!(fs::read(dir.path().join("file.bin")).unwrap(), BODY);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_range_mismatch_leaves_partial_untouched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.bin"), b"0123").unwrap();
        let client = MockHttpClient::with_handler(|_, _| {
            Ok(response(
                206,
                BODY.to_vec(),
                Some("bytes 0-9/10".to_string()),
            ))
        });

        let err = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::RangeMismatch {
                expected: 4,
                actual: 0,
                ..
            }
        ));
        assert_eq!(fs::read(dir.path().join("file.bin")).unwrap(), b"0123");
    }

    #[test]
    fn test_partial_content_without_content_range_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.bin"), b"0123").unwrap();
        let client =
            MockHttpClient::with_handler(|_, _| Ok(response(206, b"456789".to_vec(), None)));

        let err = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap_err();

        assert!(matches!(err, FetchError::BadContentRange { header: None, .. }));
        assert_eq!(fs::read(dir.path().join("file.bin")).unwrap(), b"0123");
    }

    #[test]
    fn test_partial_content_without_range_request_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockHttpClient::with_handler(|_, _| {
            Ok(response(
                206,
                BODY.to_vec(),
                Some("bytes 0-9/10".to_string()),
            ))
        });

        let err = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 206, .. }));
        assert!(!dir.path().join("file.bin").exists());
    }

    #[test]
    fn test_range_not_satisfiable_means_complete() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.bin"), BODY).unwrap();
        let client = MockHttpClient::serving(&[(URL, BODY)]);
        let counter = ByteCounter::new();

        let outcome = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &counter)
            .unwrap();

        assert_eq!(outcome, FetchOutcome::AlreadyComplete);
        assert_eq!(counter.get(), 0);
        assert_eq!(fs::metadata(dir.path().join("file.bin")).unwrap().len(), 10);
    }

    #[test]
    fn test_range_not_satisfiable_without_range_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockHttpClient::with_handler(|_, _| Ok(response(416, Vec::new(), None)));

        let err = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 416, .. }));
    }

    #[test]
    fn test_full_response_to_range_request_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.bin"), b"stale").unwrap();
        let client = MockHttpClient::with_handler(|_, range| {
            assert_eq!(range, Some(5));
            Ok(file_response(BODY, None))
        });

        let outcome = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: 10,
                resumed_from: 0
            }
        );
        assert_eq!(fs::read(dir.path().join("file.bin")).unwrap(), BODY);
    }

    #[test]
    fn test_error_status_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockHttpClient::serving(&[]);

        let err = fetcher(&client, directory(&dir))
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!dir.path().join("file.bin").exists());
    }

    #[test]
    fn test_url_without_file_name_fails_before_request() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockHttpClient::serving(&[]);

        let err = fetcher(&client, directory(&dir))
            .fetch(&Job::new("http://host/dir/"), &ByteCounter::new())
            .unwrap_err();

        assert!(matches!(err, FetchError::NoFileName { .. }));
        assert!(client.requests().is_empty());
    }

    #[test]
    fn test_archive_buffers_unsized_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tar");
        let sink = Arc::new(ArchiveSink::open(&path).unwrap());
        let client = MockHttpClient::with_handler(|_, range| {
            assert_eq!(range, None);
            Ok(HttpResponse {
                status: 200,
                content_length: None,
                content_range: None,
                body: Box::new(Cursor::new(BODY.to_vec())),
            })
        });
        let counter = ByteCounter::new();

        let outcome = fetcher(&client, sink.clone())
            .fetch(&Job::new(URL), &counter)
            .unwrap();
        sink.close().unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: 10,
                resumed_from: 0
            }
        );
        assert_eq!(counter.get(), 10);

        let mut archive = tar::Archive::new(fs::File::open(&path).unwrap());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.header().size().unwrap(), 10);
        let mut body = Vec::new();
        entry.read_to_end(&mut body).unwrap();
        assert_eq!(body, BODY);
    }

    #[test]
    fn test_archive_never_requests_range() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.bin"), b"0123").unwrap();
        let sink = Arc::new(ArchiveSink::open(dir.path().join("out.tar")).unwrap());
        let client = MockHttpClient::serving(&[(URL, BODY)]);

        fetcher(&client, sink)
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap();

        assert_eq!(client.requests(), vec![(URL.to_string(), None)]);
    }

    #[test]
    fn test_cancelled_transfer_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockHttpClient::serving(&[(URL, BODY)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fetcher = HttpFetcher::new(Box::new(client), directory(&dir), cancel);

        let err = fetcher
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[test]
    fn test_dry_run_does_nothing() {
        let outcome = DryRunFetcher
            .fetch(&Job::new(URL), &ByteCounter::new())
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Skipped);
    }

    #[test]
    fn test_check_content_range() {
        assert!(check_content_range(URL, Some("bytes 5-9/10"), 5).is_ok());
        assert!(check_content_range(URL, Some("bytes 5-9/*"), 5).is_ok());
        assert!(matches!(
            check_content_range(URL, Some("bytes 5-9/10"), 4),
            Err(FetchError::RangeMismatch { .. })
        ));
        assert!(matches!(
            check_content_range(URL, Some("items 5-9/10"), 5),
            Err(FetchError::BadContentRange { .. })
        ));
    }
}
