//! A single unit of download work.

use crate::error::{FetchError, FetchResult};

/// One file to fetch, identified by its absolute URL.
///
/// Jobs are built up front by the planner and handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job {
    url: String,
}

impl Job {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Local file name: the final path segment of the URL.
    ///
    /// Query string and fragment are ignored. An empty segment, `.` or `..`
    /// cannot name a file and is rejected.
    pub fn file_name(&self) -> FetchResult<&str> {
        let without_fragment = self.url.split('#').next().unwrap_or_default();
        let without_query = without_fragment.split('?').next().unwrap_or_default();

        let path = match without_query.find("://") {
            Some(idx) => {
                let rest = &without_query[idx + 3..];
                rest.find('/').map(|slash| &rest[slash..]).unwrap_or("")
            }
            None => without_query,
        };

        let name = path.rsplit('/').next().unwrap_or_default();
        match name {
            "" | "." | ".." => Err(FetchError::NoFileName {
                url: self.url.clone(),
            }),
            name => Ok(name),
        }
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}
