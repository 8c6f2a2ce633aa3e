use std::time::Duration;

use thiserror::Error;

/// Why a single wire frame could not be turned into operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    #[error("frame is not valid utf-8: {0}")]
    InvalidUtf8(String),
    #[error("malformed json: {0}")]
    Json(String),
    #[error("frame is not a recognized patch, batch or control message")]
    UnrecognizedFrame,
    #[error("operation must be a json object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` must be a string")]
    NotAString(&'static str),
    #[error("unsupported op `{0}`")]
    UnsupportedOp(String),
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("op `{0}` requires a value")]
    MissingValue(&'static str),
    #[error("the document root cannot be removed")]
    RootRemove,
}

/// A frame that was dropped by the decoder. Carries the raw text for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (frame: {raw})")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub raw: String,
}

impl DecodeError {
    pub(crate) fn new(kind: DecodeErrorKind, raw: &str) -> Self {
        Self {
            kind,
            raw: raw.to_string(),
        }
    }
}

/// An operation whose path could not be resolved against the current document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("parent of `{pointer}` is missing at segment `{segment}`")]
    ParentMissing { pointer: String, segment: String },
    #[error("`{pointer}` traverses a value that is neither an object nor an array")]
    NotAContainer { pointer: String },
    #[error("`{segment}` is not a valid array index in `{pointer}`")]
    InvalidIndex { pointer: String, segment: String },
    #[error("index {index} is out of bounds for array of length {len} in `{pointer}`")]
    IndexOutOfBounds {
        pointer: String,
        index: usize,
        len: usize,
    },
}

/// Transport-level failures. Recovered through reconnects unless retries run out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("connection closed by peer{}", reason_suffix(.reason))]
    Closed { reason: Option<String> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("gave up after {attempts} reconnect attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ConnectionError>,
    },
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) if !reason.is_empty() => format!(": {reason}"),
        _ => String::new(),
    }
}

/// Errors surfaced to consumers through [`crate::SyncView::error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("no snapshot received within {0:?} of the connection opening")]
    SnapshotTimeout(Duration),
}

impl SyncError {
    /// True when the subscription stopped and will not recover on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::SnapshotTimeout(_)
                | SyncError::Connection(ConnectionError::RetriesExhausted { .. })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("path parameter `{0}` has no value")]
    UnresolvedParam(String),
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),
}

impl From<url::ParseError> for EndpointError {
    fn from(err: url::ParseError) -> Self {
        EndpointError::InvalidUrl(err.to_string())
    }
}
