//! Error types for request execution.
//!
//! Every failure that reaches the caller carries a short machine-readable code
//! (see [`Error::code`]). Timeouts and redirect exhaustion are synthesized
//! locally; transport failures keep the code the transport reported.

use http::StatusCode;
use std::fmt;
use std::time::Duration;

/// Code reported when the deadline passes before the transport connected.
pub const ETIMEDOUT: &str = "ETIMEDOUT";

/// Code reported when the deadline passes while the response is streaming.
pub const ESOCKETTIMEDOUT: &str = "ESOCKETTIMEDOUT";

/// Code reported when the redirect budget is exhausted.
pub const REDIRECT: &str = "REDIRECT";

/// Code reported for usage errors (bad options, missing target).
pub const EINVAL: &str = "EINVAL";

/// The main error type for HTTP calls.
///
/// Usage-class variants ([`Error::Usage`], [`Error::InvalidUrl`],
/// [`Error::ConfigurationError`], [`Error::SerializationFailed`]) are returned
/// synchronously, before anything is sent. All other variants are the single
/// terminal outcome of a call.
///
/// # Examples
///
/// ```no_run
/// use microreq::Error;
///
/// # async fn example() -> Result<(), Error> {
/// match microreq::request("http://localhost:1337/slow", None).await {
///     Ok(response) => println!("status {}", response.status),
///     Err(e) if e.is_timeout() => eprintln!("timed out ({})", e.code()),
///     Err(Error::Redirect { location, .. }) => eprintln!("too many redirects, last hop {location}"),
///     Err(e) => eprintln!("failed with {}: {e}", e.code()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The call was made with unusable arguments (no target, bad option value).
    #[error("Usage error: {0}")]
    Usage(String),

    /// The URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An option could not be turned into a valid request (bad header name or value).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The deadline passed before the transport reported a connection.
    #[error("Connect timed out after {}ms", timeout.as_millis())]
    ConnectTimeout {
        /// The configured timeout
        timeout: Duration,
    },

    /// The deadline passed after connecting, while the response body was streaming.
    #[error("Socket timed out after {}ms", timeout.as_millis())]
    SocketTimeout {
        /// The configured timeout
        timeout: Duration,
    },

    /// The transport failed before a connection was established.
    #[error("Connect error: {0}")]
    Connect(#[source] TransportError),

    /// The transport failed after connecting, before the body completed.
    #[error("Data error: {0}")]
    Data(#[source] TransportError),

    /// A redirect was received but the redirect budget was already spent.
    #[error("Too many redirects ({max_redirects} allowed), next location {location}")]
    Redirect {
        /// The `Location` that would have been followed
        location: String,
        /// The budget the chain started with
        max_redirects: u32,
    },

    /// The body could not be deserialized into the requested type.
    ///
    /// Only produced by [`Response::json`](crate::Response::json); the
    /// `json` response encoding itself never fails.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },
}

impl Error {
    /// Returns the short error code for this error.
    ///
    /// Transport failures report the transport's own code unchanged.
    ///
    /// ```
    /// use microreq::Error;
    /// use std::time::Duration;
    ///
    /// let err = Error::SocketTimeout { timeout: Duration::from_millis(10) };
    /// assert_eq!(err.code(), "ESOCKETTIMEDOUT");
    /// ```
    pub fn code(&self) -> &str {
        match self {
            Error::Usage(_)
            | Error::InvalidUrl(_)
            | Error::ConfigurationError(_)
            | Error::SerializationFailed(_) => EINVAL,
            Error::ConnectTimeout { .. } => ETIMEDOUT,
            Error::SocketTimeout { .. } => ESOCKETTIMEDOUT,
            Error::Connect(e) | Error::Data(e) => e.code(),
            Error::Redirect { .. } => REDIRECT,
            Error::DeserializationFailed { .. } => "EDECODE",
        }
    }

    /// Returns `true` for either timeout phase.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ConnectTimeout { .. } | Error::SocketTimeout { .. })
    }

    /// Returns `true` if the call failed before a connection was established.
    pub fn is_connect(&self) -> bool {
        matches!(self, Error::ConnectTimeout { .. } | Error::Connect(_))
    }

    /// Returns `true` for errors raised before anything was sent.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::Usage(_)
                | Error::InvalidUrl(_)
                | Error::ConfigurationError(_)
                | Error::SerializationFailed(_)
        )
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

/// A failure reported by a [`Transport`](crate::Transport).
///
/// The `code` is passed through to [`Error::code`] unchanged.
#[derive(Debug)]
pub struct TransportError {
    code: String,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Creates a transport error with the given code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The transport's error code, e.g. `ECONNREFUSED`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn hang_up() -> Self {
        Self::new("ECONNRESET", "socket hang up")
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// A specialized `Result` type for HTTP calls.
pub type Result<T> = std::result::Result<T, Error>;
