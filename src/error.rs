use std::path::PathBuf;

use thiserror::Error;

use crate::parser::Field;

/// Per-identifier fetch failure. Never affects sibling fetches.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("fetch slot pool closed")]
    Closed,
    #[error("fetch task for {url} aborted: {reason}")]
    Aborted { url: String, reason: String },
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            FetchError::Timeout { url }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url,
                status: status.as_u16(),
            }
        } else if err.is_body() || err.is_decode() {
            FetchError::Body { url, source: err }
        } else {
            FetchError::Transport { url, source: err }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("document could not be parsed")]
    Parse,
    #[error("required field `{0}` missing")]
    RequiredFieldMissing(Field),
    #[error("optional field `{0}` missing")]
    OptionalFieldMissing(Field),
    #[error("field `{field}` has malformed value {value:?}")]
    MalformedField { field: Field, value: String },
}

impl ExtractError {
    /// Field this error is about, if any.
    pub fn field(&self) -> Option<Field> {
        match self {
            ExtractError::Parse => None,
            ExtractError::RequiredFieldMissing(f) | ExtractError::OptionalFieldMissing(f) => {
                Some(*f)
            }
            ExtractError::MalformedField { field, .. } => Some(*field),
        }
    }

    /// True for the failures that discard the whole record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractError::Parse | ExtractError::RequiredFieldMissing(_)
        )
    }
}

/// Side-channel diagnostic for one detail page. Not part of the record.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: {reason}", .name.as_deref().unwrap_or("<unnamed>"))]
pub struct ExtractionFailure {
    pub name: Option<String>,
    /// Field that failed; `None` when the page could not be parsed at all.
    pub field: Option<Field>,
    pub reason: ExtractError,
}

impl ExtractionFailure {
    pub fn new(name: Option<String>, reason: ExtractError) -> Self {
        Self {
            name,
            field: reason.field(),
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no index documents (*.html) found in {}", .0.display())]
    Empty(PathBuf),
    #[error("{source_name}: listing container `div.watchlist-table` not found")]
    MissingContainer { source_name: String },
    #[error("{source_name}: row {row} has no `h3 a[href]` reference")]
    MissingReference { source_name: String, row: usize },
}
