//! Unified error type.

use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::multipart::MultipartError;
use crate::status::Status;

/// The error type returned by sluice's fallible operations.
///
/// Protocol- and cache-layer failures are recovered where they happen and
/// turned into well-formed responses. What reaches the top of the pipeline
/// is either an [`HttpError`] raised on purpose by application code or an
/// infrastructure failure; [`Error::status`] picks the status for both.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("hyper: {0}")]
    Hyper(#[from] hyper::Error),

    #[error(transparent)]
    Http(#[from] HttpError),

    /// Malformed topic envelope, missing target, unknown `$file` reference.
    #[error("protocol decode: {0}")]
    ProtocolDecode(String),

    /// No intent subscriber or router module answers for the target.
    #[error("no responder for target `{0}`")]
    DispatchNotFound(String),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// HTTP status this error maps to when it reaches a response.
    pub fn status(&self) -> u16 {
        match self {
            Self::Http(e) => e.status,
            Self::ProtocolDecode(_) | Self::Multipart(_) | Self::Json(_) => Status::BadRequest.into(),
            Self::DispatchNotFound(_) => Status::NotFound.into(),
            _ => Status::InternalServerError.into(),
        }
    }
}

/// A typed HTTP failure raised by application code.
///
/// ```rust
/// use sluice::{HttpError, Status};
///
/// let err = HttpError::new(Status::Forbidden, "admins only");
/// assert_eq!(err.status, 403);
/// ```
#[derive(Debug, Clone, ThisError)]
#[error("{status}: {message}")]
pub struct HttpError {
    pub status: u16,
    pub message: String,
}

impl HttpError {
    pub fn new(status: impl Into<u16>, message: impl Into<String>) -> Self {
        Self { status: status.into(), message: message.into() }
    }
}

impl From<Status> for HttpError {
    fn from(status: Status) -> Self {
        Self::new(status, status.reason())
    }
}
