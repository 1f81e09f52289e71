//! Session configuration.
//!
//! A [`SessionConfig`] can only be obtained from
//! [`SessionConfigBuilder::build`], which rejects combinations the engine
//! cannot run (no workers, archive output with several workers, a bad
//! filename pattern). Everything downstream can rely on those invariants.

mod file;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

pub use file::ConfigFile;

use crate::error::ConfigError;
use crate::sink::OutputTarget;

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 1;

/// Default time between status line refreshes.
pub const DEFAULT_UI_INTERVAL: Duration = Duration::from_secs(1);

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS negotiation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Library defaults.
    #[default]
    Default,
    /// Only negotiate TLS 1.3, whose cipher suites are all AEAD.
    Fast,
}

/// Basic auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// HTTP client policy shared by every worker and the lister.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Basic auth, sent with every request when set.
    pub credentials: Option<Credentials>,
    /// Verify the server certificate chain.
    pub verify_certs: bool,
    pub tls_policy: TlsPolicy,
    /// PEM bundle replacing the built-in root certificates.
    pub root_ca: Option<PathBuf>,
    /// Per-request timeout. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("rslurp {}", crate::VERSION),
            credentials: None,
            verify_certs: true,
            tls_policy: TlsPolicy::Default,
            root_ca: None,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl HttpConfig {
    /// Use basic auth. An empty username disables authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let username = username.into();
        self.credentials = if username.is_empty() {
            None
        } else {
            Some(Credentials {
                username,
                password: password.into(),
            })
        };
        self
    }

    /// Enable or disable certificate verification.
    pub fn with_verify_certs(mut self, verify: bool) -> Self {
        self.verify_certs = verify;
        self
    }

    pub fn with_tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.tls_policy = policy;
        self
    }

    /// Trust only the certificates in this PEM file.
    pub fn with_root_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_ca = Some(path.into());
        self
    }

    /// Set the per-request timeout. Zero disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}

/// Validated configuration of one download session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    output: OutputTarget,
    workers: usize,
    dry_run: bool,
    pattern: Regex,
    ui_interval: Duration,
    verbose: bool,
    http: HttpConfig,
}

impl SessionConfig {
    /// Start building a configuration from defaults.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    pub fn output(&self) -> &OutputTarget {
        &self.output
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Filename filter. Matches everything by default.
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn ui_interval(&self) -> Duration {
        self.ui_interval
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn http(&self) -> &HttpConfig {
        &self.http
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    output: OutputTarget,
    workers: usize,
    dry_run: bool,
    pattern: String,
    ui_interval: Duration,
    verbose: bool,
    http: HttpConfig,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            output: OutputTarget::default(),
            workers: DEFAULT_WORKERS,
            dry_run: false,
            pattern: String::new(),
            ui_interval: DEFAULT_UI_INTERVAL,
            verbose: false,
            http: HttpConfig::default(),
        }
    }
}

impl SessionConfigBuilder {
    /// Set where files are written.
    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    /// Set the number of parallel workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// List and plan, but fetch and write nothing.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Only download files whose name matches this regex.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Set the time between status line refreshes.
    pub fn with_ui_interval(mut self, interval: Duration) -> Self {
        self.ui_interval = interval;
        self
    }

    /// Print a line for every finished file and debug logs.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Modify the HTTP policy in place.
    pub fn map_http(mut self, f: impl FnOnce(HttpConfig) -> HttpConfig) -> Self {
        self.http = f(self.http);
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.output.is_single_writer() && self.workers != 1 {
            return Err(ConfigError::ArchiveRequiresSingleWorker {
                workers: self.workers,
            });
        }
        if self.ui_interval.is_zero() {
            return Err(ConfigError::ZeroUiInterval);
        }
        let pattern = Regex::new(&self.pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: self.pattern.clone(),
            source: e,
        })?;

        Ok(SessionConfig {
            output: self.output,
            workers: self.workers,
            dry_run: self.dry_run,
            pattern,
            ui_interval: self.ui_interval,
            verbose: self.verbose,
            http: self.http,
        })
    }
}

/// Parse a duration such as `1s`, `250ms`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {:?}", text))?;
    let scale = match unit.trim() {
        "ms" => 0.001,
        "" | "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        other => return Err(format!("unknown duration unit {:?} in {:?}", other, text)),
    };
    Duration::try_from_secs_f64(value * scale)
        .map_err(|e| format!("invalid duration {:?}: {}", text, e))
}
