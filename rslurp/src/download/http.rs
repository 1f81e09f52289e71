//! HTTP client abstraction for fetches and listings.
//!
//! The [`HttpClient`] trait keeps the fetch protocol testable: the real
//! implementation wraps a blocking reqwest client, tests substitute an
//! in-memory server.

use std::fs;
use std::io::Read;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_RANGE, RANGE};

use crate::config::{Credentials, HttpConfig, TlsPolicy};
use crate::error::{ConfigError, FetchError, FetchResult};

/// Response to a GET: status, the headers the fetch protocol cares about,
/// and the body as a reader.
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Length`, when the server sent one.
    pub content_length: Option<u64>,
    /// Raw `Content-Range` header value.
    pub content_range: Option<String>,
    /// Response body.
    pub body: Box<dyn Read + Send>,
}

/// Trait for HTTP GET operations.
///
/// This abstraction allows tests to inject a fake server instead of the
/// network.
pub trait HttpClient: Send + Sync {
    /// Issue a GET for `url`, asking for bytes from `range_start` onward if set.
    fn get(&self, url: &str, range_start: Option<u64>) -> FetchResult<HttpResponse>;
}

/// Builds one HTTP client per worker.
pub trait ClientFactory: Send + Sync {
    fn build(&self) -> Result<Box<dyn HttpClient>, ConfigError>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: Client,
    credentials: Option<Credentials>,
}

impl ReqwestClient {
    /// Build a client honouring the session's TLS, auth and timeout policy.
    ///
    /// Transparent decompression stays off so `Content-Length` and range
    /// offsets describe the bytes written to disk.
    pub fn new(config: &HttpConfig) -> Result<Self, ConfigError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .danger_accept_invalid_certs(!config.verify_certs);

        if config.tls_policy == TlsPolicy::Fast {
            builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_3);
        }

        if let Some(path) = &config.root_ca {
            let pem = fs::read(path).map_err(|e| ConfigError::RootCa {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                ConfigError::RootCa {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;
            if certs.is_empty() {
                return Err(ConfigError::RootCa {
                    path: path.clone(),
                    reason: "no certificates found".to_string(),
                });
            }
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::HttpClient(error_chain(&e)))?;

        Ok(Self {
            client,
            credentials: config.credentials.clone(),
        })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, range_start: Option<u64>) -> FetchResult<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(offset) = range_start {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    reason: error_chain(&e),
                }
            }
        })?;

        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(HttpResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            content_range,
            body: Box::new(response),
        })
    }
}

impl ClientFactory for HttpConfig {
    fn build(&self) -> Result<Box<dyn HttpClient>, ConfigError> {
        Ok(Box::new(ReqwestClient::new(self)?))
    }
}

/// Render an error with its source chain, e.g. "error sending request: connection refused".
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Arc;

    use parking_lot::Mutex;

    /// A request seen by the mock: URL and requested range start.
    pub type RecordedRequest = (String, Option<u64>);

    type Handler = dyn Fn(&str, Option<u64>) -> FetchResult<HttpResponse> + Send + Sync;

    /// Mock HTTP client for testing.
    ///
    /// Clones share the request log, so a test can hand one clone to every
    /// worker and inspect all traffic afterwards.
    #[derive(Clone)]
    pub struct MockHttpClient {
        handler: Arc<Handler>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl MockHttpClient {
        /// Answer every request with `handler`.
        pub fn with_handler(
            handler: impl Fn(&str, Option<u64>) -> FetchResult<HttpResponse> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Arc::new(handler),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Behave like a static file server with range support.
        pub fn serving(files: &[(&str, &[u8])]) -> Self {
            let files: HashMap<String, Vec<u8>> = files
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_vec()))
                .collect();
            Self::with_handler(move |url, range_start| {
                Ok(match files.get(url) {
                    Some(body) => file_response(body, range_start),
                    None => response(404, Vec::new(), None),
                })
            })
        }

        /// Every request made so far.
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().clone()
        }
    }

    impl HttpClient for MockHttpClient {
        fn get(&self, url: &str, range_start: Option<u64>) -> FetchResult<HttpResponse> {
            self.requests.lock().push((url.to_string(), range_start));
            (self.handler)(url, range_start)
        }
    }

    impl ClientFactory for MockHttpClient {
        fn build(&self) -> Result<Box<dyn HttpClient>, ConfigError> {
            Ok(Box::new(self.clone()))
        }
    }

    /// Build a response with a known content length.
    pub fn response(status: u16, body: Vec<u8>, content_range: Option<String>) -> HttpResponse {
        HttpResponse {
            status,
            content_length: Some(body.len() as u64),
            content_range,
            body: Box::new(Cursor::new(body)),
        }
    }

    /// Serve `body` the way a range-capable server would.
    pub fn file_response(body: &[u8], range_start: Option<u64>) -> HttpResponse {
        match range_start {
            None => response(200, body.to_vec(), None),
            Some(start) if start >= body.len() as u64 => response(416, Vec::new(), None),
            Some(start) => {
                let total = body.len() as u64;
                let header = format!("bytes {}-{}/{}", start, total - 1, total);
                response(206, body[start as usize..].to_vec(), Some(header))
            }
        }
    }

    #[test]
    fn test_mock_serves_full_file() {
        let mock = MockHttpClient::serving(&[("http://h/a", b"abcdef")]);
        let mut resp = mock.get("http://h/a", None).unwrap();
        let mut body = String::new();
        resp.body.read_to_string(&mut body).unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(body, "abcdef");
        assert_eq!(mock.requests(), vec![("http://h/a".to_string(), None)]);
    }

    #[test]
    fn test_mock_serves_ranges() {
        let mock = MockHttpClient::serving(&[("http://h/a", b"abcdef")]);

        let resp = mock.get("http://h/a", Some(2)).unwrap();
        assert_eq!(resp.status, 206);
        assert_eq!(resp.content_range.as_deref(), Some("bytes 2-5/6"));

        let resp = mock.get("http://h/a", Some(6)).unwrap();
        assert_eq!(resp.status, 416);
    }

    #[test]
    fn test_mock_unknown_url_is_404() {
        let mock = MockHttpClient::serving(&[]);
        assert_eq!(mock.get("http://h/missing", None).unwrap().status, 404);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let inner = std::io::Error::other("connection refused");
        let outer = FetchError::Transfer {
            url: "http://h/a".to_string(),
            source: inner,
        };
        let msg = error_chain(&outer);
        assert!(msg.starts_with("transfer of http://h/a failed"));
        assert!(msg.ends_with("connection refused"));
    }

    #[test]
    fn test_reqwest_client_builds_from_default_config() {
        assert!(ReqwestClient::new(&HttpConfig::default()).is_ok());
    }

    #[test]
    fn test_reqwest_client_rejects_missing_root_ca() {
        let config = HttpConfig::default().with_root_ca("/nonexistent/ca.pem");
        assert!(matches!(
            ReqwestClient::new(&config),
            Err(ConfigError::RootCa { .. })
        ));
    }
}
