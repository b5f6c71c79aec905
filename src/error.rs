// Error types shared by every storage and install operation

use std::path::PathBuf;

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Bad url: {0}")]
    UrlConstruction(String),

    #[error("Failed to authenticate ({}): {failure}", display_status(.status))]
    Authentication {
        failure: AuthFailure,
        /// Status of the token endpoint response
        status: Option<u16>,
    },

    #[error("Network error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Unexpected response ({}): {message}", display_status(.status))]
    Protocol {
        status: Option<u16>,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{context} ({path:?}): {source}")]
    FileSystem {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not compile Core ML model from source: {0}")]
    Compilation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad image: {0}")]
    ImageEncoding(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

/// Why a token exchange produced no token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The token endpoint answered with a non-2xx status
    Rejected,
    NotAnObject,
    MissingAccessToken,
    InvalidAccessToken,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuthFailure::Rejected => "api key was rejected",
            AuthFailure::NotAnObject => "token response is not a json object",
            AuthFailure::MissingAccessToken => "token response has no access_token",
            AuthFailure::InvalidAccessToken => "access_token is not a non-empty string",
        })
    }
}

fn display_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no status".to_string(),
    }
}

impl SyncError {
    pub(crate) fn fs(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::FileSystem {
            context,
            path: path.into(),
            source,
        }
    }

    /// HTTP status code behind this error, preserved verbatim from the response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SyncError::Protocol { status, .. } => *status,
            SyncError::Authentication { status, .. } => *status,
            SyncError::NotFound(_) => Some(404),
            SyncError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the request never reached the storage service.
    pub fn is_offline(&self) -> bool {
        match self {
            SyncError::Transport(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Stable identifier for the error class, used on the host wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::UrlConstruction(_) => "url_construction",
            SyncError::Authentication { .. } => "authentication",
            SyncError::Transport(_) => "transport",
            SyncError::Protocol { .. } => "protocol",
            SyncError::Parse(_) => "parse",
            SyncError::FileSystem { .. } => "file_system",
            SyncError::Compilation(_) => "compilation",
            SyncError::NotFound(_) => "not_found",
            SyncError::ImageEncoding(_) => "image_encoding",
            SyncError::Settings(_) => "settings",
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest embeds the request url in its errors; the token endpoint url
        // carries the api key, so strip it before the error travels anywhere.
        SyncError::Transport(err.without_url())
    }
}
