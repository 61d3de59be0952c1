//! Error handling for radiom.
//!
//! Every fallible operation in the crate returns [`Result`], whose error
//! pairs a coarse [`ErrorKind`] with the underlying error. The kinds follow
//! the gRPC status codes, which map cleanly onto the HTTP status codes the
//! hosted backend answers with.
//!
//! Failures are meant to be handled where they occur: views turn them into
//! state (a fallback catalog, an inline notice, `playing = false`) rather
//! than letting them reach the top of the program. [`Error::notice`] gives
//! the short text shown to the user in those cases.
//!
//! # Example
//!
//! ```rust
//! use radiom::error::{Error, ErrorKind, Result};
//!
//! fn validate(text: &str) -> Result<&str> {
//!     let text = text.trim();
//!     if text.is_empty() {
//!         return Err(Error::invalid_argument("comment is empty"));
//!     }
//!     Ok(text)
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Short, user-facing description of what went wrong.
    ///
    /// Used for inline notices; the full error goes to the log.
    #[must_use]
    pub fn notice(&self) -> &'static str {
        use ErrorKind::*;
        match self.kind {
            InvalidArgument | OutOfRange => "please check your input",
            Unauthenticated => "please sign in again",
            PermissionDenied => "you are not allowed to do that",
            NotFound => "not found",
            AlreadyExists => "that already exists",
            DeadlineExceeded | Unavailable | Aborted | Cancelled => {
                "network problem, please try again"
            }
            ResourceExhausted => "too many requests, please slow down",
            FailedPrecondition => "request was refused by the service",
            DataLoss | Internal | Unimplemented | Unknown => "something went wrong",
        }
    }
}

/// Standard result type for radiom operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown = 2,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound = 5,

    /// HTTP Mapping: 409 Conflict
    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied = 7,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// HTTP Mapping: 409 Conflict
    #[error("operation aborted")]
    Aborted = 10,

    /// HTTP Mapping: 400 Bad Request
    #[error("out of range")]
    OutOfRange = 11,

    /// HTTP Mapping: 501 Not Implemented
    #[error("not implemented")]
    Unimplemented = 12,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal = 13,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable = 14,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

impl ErrorKind {
    /// Classifies an HTTP status code returned by the backend.
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        use reqwest::StatusCode;
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::InvalidArgument,
            StatusCode::UNAUTHORIZED => Self::Unauthenticated,
            StatusCode::FORBIDDEN => Self::PermissionDenied,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::CONFLICT => Self::AlreadyExists,
            StatusCode::TOO_MANY_REQUESTS => Self::ResourceExhausted,
            StatusCode::NOT_IMPLEMENTED => Self::Unimplemented,
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => Self::Unavailable,
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => Self::DeadlineExceeded,
            status if status.is_server_error() => Self::Internal,
            status if status.is_client_error() => Self::FailedPrecondition,
            _ => Self::Unknown,
        }
    }
}

macro_rules! constructor {
    ($(#[$doc:meta])* $name:ident => $kind:ident) => {
        $(#[$doc])*
        pub fn $name<E>(error: E) -> Self
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            Self::new(ErrorKind::$kind, error)
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructor!(
        /// Operation interrupted mid-way, like a dropped websocket.
        aborted => Aborted
    );
    constructor!(
        /// Creating something that already exists, like a taken username.
        already_exists => AlreadyExists
    );
    constructor!(
        /// Operation cancelled before completion.
        cancelled => Cancelled
    );
    constructor!(
        /// Truncated or corrupt data, like a stream that ended early.
        data_loss => DataLoss
    );
    constructor!(
        /// Time-bound operation exceeded its limit.
        deadline_exceeded => DeadlineExceeded
    );
    constructor!(
        /// Operation refused in the current state, like commenting as a guest.
        failed_precondition => FailedPrecondition
    );
    constructor!(
        /// Unexpected internal error.
        internal => Internal
    );
    constructor!(
        /// Input that fails validation, like an empty comment.
        invalid_argument => InvalidArgument
    );
    constructor!(
        /// Missing resource, like an unknown station id.
        not_found => NotFound
    );
    constructor!(
        /// Value outside its bounds.
        out_of_range => OutOfRange
    );
    constructor!(
        /// Caller lacks the rights for the operation.
        permission_denied => PermissionDenied
    );
    constructor!(
        /// Rate limit or capacity reached.
        resource_exhausted => ResourceExhausted
    );
    constructor!(
        /// Missing, invalid or expired credentials.
        unauthenticated => Unauthenticated
    );
    constructor!(
        /// Service or device temporarily unavailable.
        unavailable => Unavailable
    );
    constructor!(
        /// Operation not supported.
        unimplemented => Unimplemented
    );
    constructor!(
        /// Error that fits no other category.
        unknown => Unknown
    );
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into their logical equivalents.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors based on their nature.
///
/// Status errors are classified by [`ErrorKind::from_status`].
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::new(ErrorKind::from_status(status), err);
        }

        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() {
            return Self::unavailable(err);
        }

        if err.is_redirect() {
            return Self::resource_exhausted(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unknown(err)
    }
}

/// Converts websocket errors of the push channel.
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error::*;
        match err {
            ConnectionClosed => Self::cancelled(err),
            AlreadyClosed => Self::unavailable(err),
            Io(err) => Self::data_loss(err),
            Capacity(err) => Self::out_of_range(err),
            AttackAttempt => Self::permission_denied(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts configuration and state file parse errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts state file serialization errors to `Internal`.
impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts invalid header errors to `Internal`.
impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts mutex poisoning errors to `Internal`.
impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts stream initialization errors to `Unavailable`.
impl<S> From<stream_download::StreamInitializationError<S>> for Error
where
    S: stream_download::source::SourceStream,
{
    fn from(e: stream_download::StreamInitializationError<S>) -> Self {
        Self::unavailable(e.to_string())
    }
}

/// Converts audio stream errors into appropriate error kinds.
impl From<rodio::StreamError> for Error {
    fn from(e: rodio::StreamError) -> Self {
        use rodio::StreamError::*;
        match e {
            PlayStreamError(e) => Self::unavailable(e),
            DefaultStreamConfigError(e) => Self::unavailable(e),
            BuildStreamError(e) => Self::unavailable(e),
            SupportedStreamConfigsError(e) => Self::not_found(e),
            NoDevice => Self::not_found(e),
        }
    }
}

/// Converts playback errors into appropriate error kinds.
impl From<rodio::PlayError> for Error {
    fn from(e: rodio::PlayError) -> Self {
        use rodio::PlayError::*;
        match e {
            DecoderError(e) => Self::data_loss(e),
            NoDevice => Self::not_found(e),
        }
    }
}

/// Converts stream probing errors: unknown formats are `Unimplemented`.
impl From<rodio::decoder::DecoderError> for Error {
    fn from(e: rodio::decoder::DecoderError) -> Self {
        match e {
            rodio::decoder::DecoderError::UnrecognizedFormat => Self::unimplemented(e),
            _ => Self::data_loss(e),
        }
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

/// Converts background task failures to `Internal`.
impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_kind_and_details() {
        let err = Error::not_found("station 42");
        assert_eq!(err.to_string(), "not found: station 42");
    }

    #[test]
    fn classifies_backend_status_codes() {
        use reqwest::StatusCode;
        assert_eq!(
            ErrorKind::from_status(StatusCode::UNAUTHORIZED),
            ErrorKind::Unauthenticated
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::CONFLICT),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorKind::Internal
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::IM_A_TEAPOT),
            ErrorKind::FailedPrecondition
        );
    }

    #[test]
    fn io_errors_keep_their_meaning() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
        assert_eq!(err.notice(), "network problem, please try again");
    }
}
