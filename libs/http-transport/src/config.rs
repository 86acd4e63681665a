use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("http-transport/", env!("CARGO_PKG_VERSION"));

/// Default wait added on top of the request timeout by blocking sends
pub const DEFAULT_SEMAPHORE_TIMEOUT_GAP: Duration = Duration::from_secs(3);

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
///
/// Controls whether sessions enforce TLS or allow insecure HTTP.
///
/// The default rejects plain `http://` endpoints before any I/O. Opt out
/// with [`TransportSecurity::AllowInsecureHttp`] or
/// `SessionBuilder::allow_insecure_http()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (for testing with mock servers only)
    ///
    /// **WARNING**: pinning only applies to TLS connections. Never use this
    /// in production.
    AllowInsecureHttp,
}

/// Network session configuration
///
/// Describes the connection side of a [`Session`](crate::Session): how
/// connections are opened and pooled and how much is read back. Trust
/// evaluation is configured separately through
/// [`SessionBuilder::security`](crate::SessionBuilder::security).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// User-Agent header value, added when a request has none
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Idle timeout for pooled connections (default: 90 seconds)
    ///
    /// `None` keeps idle connections indefinitely.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,

    /// Only speak HTTP/2 (default: false, ALPN picks the version)
    pub http2_only: bool,

    /// Buffer capacity for concurrent request handling (default: 1024)
    ///
    /// Sends fail fast with `HttpError::Overloaded` when the buffer is full.
    /// Values below 1 are raised to 1.
    pub buffer_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_body_size: 10 * 1024 * 1024,
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            http2_only: false,
            buffer_capacity: 1024,
        }
    }
}

impl SessionConfig {
    /// Small footprint: 1 MB bodies, few pooled connections
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            pool_idle_timeout: Some(Duration::from_secs(30)),
            pool_max_idle_per_host: 4,
            buffer_capacity: 256,
            ..Self::default()
        }
    }

    /// Configuration for tests against local mock servers
    ///
    /// Allows plain HTTP and disables connection pooling so every test
    /// starts from a fresh connection.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            transport: TransportSecurity::AllowInsecureHttp,
            pool_idle_timeout: None,
            pool_max_idle_per_host: 0,
            buffer_capacity: 256,
            ..Self::default()
        }
    }
}

/// Pipeline settings of a [`Transport`](crate::Transport)
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Added to the request timeout to bound blocking waits (default: 3 seconds)
    pub semaphore_timeout_gap: Duration,

    /// Reject non-2xx/3xx statuses and unacceptable content types (default: true)
    pub use_default_validation: bool,

    /// Let blocking sends run on a thread owned by an async runtime (default: false)
    ///
    /// Blocking inside a runtime worker can stall every task scheduled on it;
    /// by default such calls fail with `HttpError::BlockingDisallowed`.
    pub allow_blocking_in_async_context: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            semaphore_timeout_gap: DEFAULT_SEMAPHORE_TIMEOUT_GAP,
            use_default_validation: true,
            allow_blocking_in_async_context: false,
        }
    }
}

impl TransportConfig {
    /// Short wait gap so timeout tests finish quickly
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            semaphore_timeout_gap: Duration::from_millis(200),
            ..Self::default()
        }
    }
}
