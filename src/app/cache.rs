//! Write-once, URL-keyed store of extracted records.
//!
//! Each record lives in `<dir>/<last path segment>.json`. A file that exists
//! is a hit: it is never refreshed and never overwritten. Removing the file
//! is the only way to force a re-fetch.
//!
//! Records are staged as `.fetch-*.tmp` files next to the entries. A run
//! killed mid-write leaves one behind; opening the cache removes those older
//! than [`STALE_TEMP_AGE`].

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::config::ScrapeConfig;
use super::error::{Result, ScrapeError};
use super::extract::extract;
use super::session::PageSession;
use super::types::SecRecord;

const TEMP_PREFIX: &str = ".fetch-";
const TEMP_SUFFIX: &str = ".tmp";

/// Staging files younger than this may belong to a concurrent run.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(10 * 60);

pub struct FetchCache {
    dir: PathBuf,
}

impl FetchCache {
    /// Opens the cache directory, creating it when missing, and clears out
    /// stale staging files.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| ScrapeError::io(&dir, e))?;
        let cache = Self { dir };
        cache.remove_stale_temps();
        Ok(cache)
    }

    fn remove_stale_temps(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(TEMP_PREFIX) || !name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            if !age.is_some_and(|age| age >= STALE_TEMP_AGE) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed stale temp file"),
                Err(err) => warn!(path = %path.display(), "cannot remove stale temp file: {err}"),
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, url: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.json", cache_key(url)?)))
    }

    /// Makes sure a record for `url` is on disk and returns its path.
    ///
    /// On a miss the page is extracted and the record is published
    /// atomically; a failed run leaves no file behind.
    pub async fn ensure_fetched<S: PageSession + ?Sized>(
        &self,
        session: &mut S,
        url: &str,
        config: &ScrapeConfig,
    ) -> Result<PathBuf> {
        let path = self.entry_path(url)?;
        if path.try_exists().map_err(|e| ScrapeError::io(&path, e))? {
            debug!(url, path = %path.display(), "cache hit");
            return Ok(path);
        }

        let rec = extract(session, url, config).await?;
        self.persist(&path, &rec)?;
        info!(url, path = %path.display(), "cached");
        Ok(path)
    }

    fn persist(&self, path: &Path, rec: &SecRecord) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| ScrapeError::io(&self.dir, e))?;

        let mut body = serde_json::to_vec_pretty(rec).map_err(|e| ScrapeError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        body.push(b'\n');
        tmp.write_all(&body)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| ScrapeError::io(tmp.path(), e))?;

        tmp.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                ScrapeError::CacheConflict {
                    path: path.to_path_buf(),
                }
            } else {
                ScrapeError::io(path, e.error)
            }
        })?;
        Ok(())
    }

    /// Fetches if needed, then loads the record, warning when the entry on
    /// disk belongs to a different URL with the same last path segment.
    pub async fn fetch_record<S: PageSession + ?Sized>(
        &self,
        session: &mut S,
        url: &str,
        config: &ScrapeConfig,
    ) -> Result<SecRecord> {
        let path = self.ensure_fetched(session, url, config).await?;
        let rec = load(&path)?;
        if rec.url() != url {
            warn!(
                url,
                cached_url = rec.url(),
                path = %path.display(),
                "cache key collision; using the cached record"
            );
        }
        Ok(rec)
    }
}

pub fn load(path: &Path) -> Result<SecRecord> {
    let file = File::open(path).map_err(|e| ScrapeError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| ScrapeError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Last non-empty path segment of `url`.
///
/// Query string and fragment do not take part, so URLs that differ only
/// there share one entry.
pub fn cache_key(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim()).map_err(|e| ScrapeError::invalid_url(url, e))?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .filter(|segment| *segment != "." && *segment != "..")
        .map(str::to_string)
        .ok_or_else(|| ScrapeError::invalid_url(url, "no path segment to name the cache entry"))
}
