//! Directory listing and job planning.
//!
//! A listing is any HTML page; every `href="..."` value on it is a
//! candidate. Only bare file names (no `/`) are kept, so parent links,
//! subdirectories and absolute links are ignored. There is no recursion.

use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::download::{HttpClient, Job};
use crate::error::{ListingError, ListingResult};

/// Source of directory listings.
pub trait DirectoryLister: Send + Sync {
    /// Return the distinct links found on the page at `url`, in no particular order.
    fn list(&self, url: &str) -> ListingResult<Vec<String>>;
}

/// Lists directories by fetching their HTML index page.
pub struct HttpDirectoryLister {
    client: Box<dyn HttpClient>,
}

impl HttpDirectoryLister {
    pub fn new(client: Box<dyn HttpClient>) -> Self {
        Self { client }
    }
}

impl DirectoryLister for HttpDirectoryLister {
    fn list(&self, url: &str) -> ListingResult<Vec<String>> {
        let mut response = self.client.get(url, None).map_err(|e| ListingError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if response.status != 200 {
            return Err(ListingError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        let mut body = Vec::new();
        response
            .body
            .read_to_end(&mut body)
            .map_err(|e| ListingError::Read {
                url: url.to_string(),
                source: e,
            })?;

        Ok(extract_links(&String::from_utf8_lossy(&body)))
    }
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"href="([^"]+)""#).expect("link pattern is valid"))
}

/// Every distinct `href` value in `html`, sorted.
pub fn extract_links(html: &str) -> Vec<String> {
    link_pattern()
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Whether a link names a file directly inside the listed directory.
fn is_plain_file(link: &str) -> bool {
    !link.is_empty()
        && !link.contains('/')
        && link != "."
        && link != ".."
        && !link.starts_with('?')
        && !link.starts_with('#')
}

/// Turn the links of the listing at `base` into jobs for files matching `pattern`.
pub fn select_files(base: &str, links: &[String], pattern: &Regex) -> Vec<Job> {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };

    links
        .iter()
        .filter(|link| is_plain_file(link) && pattern.is_match(link))
        .map(|link| Job::new(format!("{}{}", base, link)))
        .collect()
}

/// List every URL and build the complete job set.
///
/// Fails on the first listing error; nothing is downloaded in that case.
pub fn plan_jobs(
    urls: &[String],
    lister: &dyn DirectoryLister,
    pattern: &Regex,
) -> ListingResult<Vec<Job>> {
    let mut jobs = Vec::new();
    let mut names = HashSet::new();
    for url in urls {
        let links = lister.list(url)?;
        let selected = select_files(url, &links, pattern);
        info!(
            url = %url,
            links = links.len(),
            matched = selected.len(),
            "Listed directory"
        );
        for job in selected {
            // Every job writes to the same output; the first directory wins.
            let duplicate = match job.file_name() {
                Ok(name) => !names.insert(name.to_string()),
                Err(_) => false,
            };
            if duplicate {
                warn!(url = %job.url(), "Skipping file with a name already planned");
            } else {
                jobs.push(job);
            }
        }
    }
    Ok(jobs)
}
