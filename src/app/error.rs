use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("webdriver {command} failed: {error}: {message}")]
    WebDriver {
        command: String,
        error: String,
        message: String,
    },

    #[error("webdriver {command} request failed: {source}")]
    Http {
        command: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timed out after {elapsed:?} waiting for {what} ({xpath})")]
    WaitTimeout {
        what: String,
        xpath: String,
        elapsed: Duration,
    },

    #[error("extraction failed for {url}: {reason}")]
    Extraction { url: String, reason: String },

    #[error("cache entry already exists: {}", .path.display())]
    CacheConflict { path: PathBuf },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: invalid record: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("csv output failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("webdriver unavailable: {0}")]
    Driver(String),

    #[error("{0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

impl ScrapeError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        ScrapeError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn extraction(url: &str, reason: impl Into<String>) -> Self {
        ScrapeError::Extraction {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_url(url: &str, reason: impl ToString) -> Self {
        ScrapeError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The element went away between lookup and use; the page re-rendered.
    pub fn is_stale_element(&self) -> bool {
        matches!(
            self,
            ScrapeError::WebDriver { error, .. }
                if error == "stale element reference" || error == "no such element"
        )
    }
}
