use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the interactive (browser) surface.
///
/// Only `SessionStart` and `Authentication` change the shape of a run (they
/// switch the campaign to the manual report). Everything else is local to a
/// candidate or a search target.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not start browser session: {0}")]
    SessionStart(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("{action} failed: {reason}")]
    Action { action: String, reason: String },

    #[error("element detached from the document")]
    Detached,

    #[error("session already closed")]
    Closed,
}

impl SessionError {
    pub fn navigation(url: &str, reason: impl Into<String>) -> Self {
        SessionError::Navigation {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn action(action: &str, reason: impl Into<String>) -> Self {
        SessionError::Action {
            action: action.to_string(),
            reason: reason.into(),
        }
    }

    pub fn navigation_timeout(url: &str, after: Duration) -> Self {
        Self::navigation(url, format!("timed out after {:?}", after))
    }

    /// The element went away under the action; the page moved on.
    pub fn is_soft(&self) -> bool {
        matches!(self, SessionError::Detached)
    }
}

#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("language model request failed: {0}")]
    Provider(String),

    #[error("malformed model response: {0}")]
    MalformedModelResponse(String),

    #[error("CV content is too short or empty ({0} characters)")]
    InsufficientText(usize),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported document format '{extension}'. Supported formats: PDF, TXT, MD")]
    UnsupportedFormat { extension: String },

    #[error("no text could be extracted from {0}; it may be image-based or corrupted")]
    UnreadableDocument(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("automation unavailable ({reason}) and the manual report could not be written to {path}: {source}")]
    ReportWrite {
        reason: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
