//! Optional INI configuration file.
//!
//! ```ini
//! [download]
//! workers = 4
//! ui_delay = 500ms
//! timeout = 60s
//! matching = \.iso$
//! out = /srv/mirror
//! tar = false
//!
//! [http]
//! username = alice
//! password = secret
//! verify_cert = true
//! fast_cipher = false
//! root_ca = /etc/ssl/private-ca.pem
//! ```
//!
//! Every key is optional. Values given on the command line take precedence.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, ParseOption, Properties};

use super::{parse_duration, SessionConfigBuilder, TlsPolicy};
use crate::error::ConfigError;

const DOWNLOAD_SECTION: &str = "download";
const HTTP_SECTION: &str = "http";

/// Backslashes are literal so regexes survive unchanged.
fn parse_options() -> ParseOption {
    ParseOption {
        enabled_escape: false,
        ..ParseOption::default()
    }
}

/// Settings read from a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub workers: Option<usize>,
    pub ui_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    pub matching: Option<String>,
    pub out: Option<PathBuf>,
    pub tar: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_cert: Option<bool>,
    pub fast_cipher: Option<bool>,
    pub root_ca: Option<PathBuf>,
}

impl ConfigFile {
    /// `<config dir>/rslurp/config.ini`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rslurp").join("config.ini"))
    }

    /// Load the file at the default location. A missing file yields defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file_opt(path, parse_options()).map_err(|e| {
            ConfigError::ConfigFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        Self::from_ini(&ini, path)
    }

    /// Parse config text. `origin` only labels errors.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str_opt(text, parse_options()).map_err(|e| {
            ConfigError::ConfigFile {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        Self::from_ini(&ini, origin)
    }

    fn from_ini(ini: &Ini, origin: &Path) -> Result<Self, ConfigError> {
        let reader = SectionReader { origin };
        let download = ini.section(Some(DOWNLOAD_SECTION));
        let http = ini.section(Some(HTTP_SECTION));

        Ok(Self {
            workers: reader.parsed(download, "workers")?,
            ui_delay: reader.duration(download, "ui_delay")?,
            timeout: reader.duration(download, "timeout")?,
            matching: reader.string(download, "matching"),
            out: reader.string(download, "out").map(PathBuf::from),
            tar: reader.parsed(download, "tar")?,
            username: reader.string(http, "username"),
            password: reader.string(http, "password"),
            verify_cert: reader.parsed(http, "verify_cert")?,
            fast_cipher: reader.parsed(http, "fast_cipher")?,
            root_ca: reader.string(http, "root_ca").map(PathBuf::from),
        })
    }

    /// Layer these settings over `builder`.
    ///
    /// Output location is left to the caller, since it depends on `tar`.
    pub fn apply(&self, mut builder: SessionConfigBuilder) -> SessionConfigBuilder {
        if let Some(workers) = self.workers {
            builder = builder.with_workers(workers);
        }
        if let Some(delay) = self.ui_delay {
            builder = builder.with_ui_interval(delay);
        }
        if let Some(matching) = &self.matching {
            builder = builder.with_pattern(matching.clone());
        }
        builder.map_http(|mut http| {
            if let Some(timeout) = self.timeout {
                http = http.with_timeout(timeout);
            }
            if let Some(username) = &self.username {
                let password = self.password.clone().unwrap_or_default();
                http = http.with_credentials(username.clone(), password);
            }
            if let Some(verify) = self.verify_cert {
                http = http.with_verify_certs(verify);
            }
            if self.fast_cipher == Some(true) {
                http = http.with_tls_policy(TlsPolicy::Fast);
            }
            if let Some(root_ca) = &self.root_ca {
                http = http.with_root_ca(root_ca.clone());
            }
            http
        })
    }
}

struct SectionReader<'a> {
    origin: &'a Path,
}

impl SectionReader<'_> {
    fn string(&self, section: Option<&Properties>, key: &str) -> Option<String> {
        section
            .and_then(|s| s.get(key))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn parsed<T: FromStr>(
        &self,
        section: Option<&Properties>,
        key: &str,
    ) -> Result<Option<T>, ConfigError> {
        self.string(section, key)
            .map(|value| value.parse().map_err(|_| self.bad_value(key, &value)))
            .transpose()
    }

    fn duration(
        &self,
        section: Option<&Properties>,
        key: &str,
    ) -> Result<Option<Duration>, ConfigError> {
        self.string(section, key)
            .map(|value| parse_duration(&value).map_err(|_| self.bad_value(key, &value)))
            .transpose()
    }

    fn bad_value(&self, key: &str, value: &str) -> ConfigError {
        ConfigError::ConfigFile {
            path: self.origin.to_path_buf(),
            reason: format!("invalid value {:?} for {}", value, key),
        }
    }
}
