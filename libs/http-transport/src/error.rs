use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// Boxed error produced by custom parameter encoders and the network stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What went wrong during a call.
///
/// The variants follow the life of a call: building the wire request,
/// moving bytes, validating the response, and the blocking wrapper.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Merged endpoint is not a valid absolute URL
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Malformed URL '{url}': {reason}")]
    MalformedUrl {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// JSON encoding of a parameter basket failed
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding of a parameter basket failed
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// A custom parameter encoder rejected its basket
    #[error("Custom parameter encoding failed: {0}")]
    CustomEncoding(#[source] BoxError),

    /// Single request attempt timed out
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The blocking wrapper stopped waiting; the call itself keeps running
    #[error("Gave up waiting for the response after {0:?}")]
    WaitTimeout(Duration),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error, including pinning mismatches
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Default validation rejected the status code
    #[error("Response status code was unacceptable: {status}")]
    Validation { status: http::StatusCode },

    /// Default validation rejected the response content type
    #[error("Response content type '{actual}' was unacceptable, expected one of: {acceptable}")]
    UnacceptableContentType {
        /// Value of the request `Accept` header
        acceptable: String,
        /// Value of the response `Content-Type` header
        actual: String,
    },

    /// The call was cancelled through its handle
    #[error("Request was cancelled")]
    Cancelled,

    /// Service overloaded (buffer full, fail-fast)
    #[error("Service overloaded: request buffer is full")]
    Overloaded,

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// Blocking send was called from inside an async runtime
    #[error("Blocking send called from an async context")]
    BlockingDisallowed,

    /// The exchange finished with neither a response nor an error
    #[error("No HTTP response received")]
    NoHttpResponse,

    /// No tokio runtime could be found or created
    #[error("Runtime unavailable: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Failure half of [`HttpResult`](crate::HttpResult).
///
/// Wraps the [`HttpError`] kind together with whatever the server told us:
/// status, raw body, decoded body and the error code/message extracted by
/// [`ClarifyErrorInterceptor`](crate::ClarifyErrorInterceptor).
#[derive(Debug)]
pub struct TransportError {
    kind: HttpError,
    status: Option<http::StatusCode>,
    body: Option<Bytes>,
    body_string: Option<String>,
    body_json: Option<serde_json::Value>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl TransportError {
    #[must_use]
    pub fn new(kind: HttpError) -> Self {
        Self {
            kind,
            status: None,
            body: None,
            body_string: None,
            body_json: None,
            error_code: None,
            error_message: None,
        }
    }

    /// Underlying failure kind.
    #[must_use]
    pub fn kind(&self) -> &HttpError {
        &self.kind
    }

    /// Consume the error and return the failure kind.
    #[must_use]
    pub fn into_kind(self) -> HttpError {
        self.kind
    }

    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        self.status
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn body_string(&self) -> Option<&str> {
        self.body_string.as_deref()
    }

    #[must_use]
    pub fn body_json(&self) -> Option<&serde_json::Value> {
        self.body_json.as_ref()
    }

    /// Server-provided error code, if one was found in a JSON body.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    /// Server-provided error message, if one was found in a JSON body.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// True when a single network attempt ran out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, HttpError::Timeout(_))
    }

    /// True when the blocking wrapper stopped waiting for the call.
    #[must_use]
    pub fn is_wait_timeout(&self) -> bool {
        matches!(self.kind, HttpError::WaitTimeout(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, HttpError::Cancelled)
    }

    #[must_use]
    pub fn with_status(mut self, status: http::StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_body_string(mut self, body: impl Into<String>) -> Self {
        self.body_string = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_body_json(mut self, json: serde_json::Value) -> Self {
        self.body_json = Some(json);
        self
    }

    #[must_use]
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error_code, &self.error_message) {
            (Some(code), Some(message)) => write!(f, "{} [{code}: {message}]", self.kind),
            (None, Some(message)) => write!(f, "{} [{message}]", self.kind),
            (Some(code), None) => write!(f, "{} [{code}]", self.kind),
            (None, None) => fmt::Display::fmt(&self.kind, f),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<HttpError> for TransportError {
    fn from(kind: HttpError) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_tls_error_preserves_source() {
        let err = HttpError::Tls(Box::new(TestError("pin mismatch")));

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.unwrap().0, "pin mismatch");
    }

    #[test]
    fn test_transport_error_chain_reaches_root_cause() {
        let err = TransportError::from(HttpError::Transport(Box::new(TestError("root cause"))));

        let mut count = 0;
        let mut current: Option<&(dyn Error + 'static)> = Some(&err);
        while let Some(e) = current {
            count += 1;
            current = e.source();
        }

        assert_eq!(count, 3, "TransportError -> HttpError -> TestError");
    }

    #[test]
    fn test_timeouts_are_distinguished() {
        let network = TransportError::from(HttpError::Timeout(Duration::from_secs(1)));
        let wait = TransportError::from(HttpError::WaitTimeout(Duration::from_secs(4)));

        assert!(network.is_timeout());
        assert!(!network.is_wait_timeout());
        assert!(wait.is_wait_timeout());
        assert!(!wait.is_timeout());
    }

    #[test]
    fn test_display_includes_clarified_details() {
        let err = TransportError::from(HttpError::Validation {
            status: http::StatusCode::BAD_REQUEST,
        })
        .with_error_code("E42")
        .with_error_message("bad input");

        let text = err.to_string();
        assert!(text.contains("400"));
        assert!(text.ends_with("[E42: bad input]"));
    }
}
