use crate::config::{SessionConfig, TlsRootConfig, TransportSecurity};
use crate::error::{BoxError, HttpError};
use crate::layers::DefaultHeadersLayer;
use crate::response::ResponseBody;
use crate::retrier::Retrier;
use crate::security::Security;
use crate::tls;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tower::buffer::Buffer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Type alias for the future type of the session's service
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Type alias for the buffered service
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Type-erased network service below the session's own layers.
type NetworkService = BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, BoxError>;

/// Runtime used when the caller is not inside one and did not supply a handle.
static SHARED_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Pick the runtime for background work: the explicit handle, the current
/// runtime, or a process-wide multi-thread runtime created on first use.
pub fn runtime_handle(explicit: Option<Handle>) -> Result<Handle, HttpError> {
    if let Some(handle) = explicit {
        return Ok(handle);
    }
    if let Ok(handle) = Handle::try_current() {
        return Ok(handle);
    }
    if let Some(runtime) = SHARED_RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("http-transport")
        .build()
        .map_err(HttpError::Runtime)?;
    tracing::debug!("started shared http-transport runtime");
    Ok(SHARED_RUNTIME.get_or_init(|| runtime).handle().clone())
}

/// A configured network session: connection pool, TLS trust policy and
/// optional retrier.
///
/// `Session` is `Clone + Send + Sync`; clones share the same pool and
/// background worker. Requests may carry their own session to bypass the
/// transport's default one.
#[derive(Clone)]
pub struct Session {
    service: BufferedService,
    retrier: Option<Retrier>,
    max_body_size: usize,
    transport_security: TransportSecurity,
}

impl Session {
    /// Session with default configuration and standard trust evaluation
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails or no runtime can be started
    pub fn new() -> Result<Self, HttpError> {
        SessionBuilder::new().build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    #[must_use]
    pub fn retrier(&self) -> Option<&Retrier> {
        self.retrier.as_ref()
    }

    #[must_use]
    pub fn transport_security(&self) -> TransportSecurity {
        self.transport_security
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Send one request through the session's service stack.
    pub(crate) async fn execute(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let mut service = self.service.clone();
        try_acquire_buffer_slot(&mut service).await?;
        service.call(request).await.map_err(map_buffer_error)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("retrier", &self.retrier.is_some())
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Session`]
#[must_use]
pub struct SessionBuilder {
    config: SessionConfig,
    security: Security,
    retrier: Option<Retrier>,
    runtime: Option<Handle>,
    network: Option<NetworkService>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            config,
            security: Security::default(),
            retrier: None,
            runtime: None,
            network: None,
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain HTTP for this session (testing only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature, so release builds cannot turn it on by accident.
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "http_transport::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Trust policy applied during every TLS handshake
    pub fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    pub fn retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = Some(retrier);
        self
    }

    /// Values below 1 are raised to 1.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Runtime hosting the session's background worker
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Replace the hyper client with another service
    ///
    /// The session's own layers (default headers, error mapping, buffering)
    /// still apply. TLS settings and the trust policy are ignored, since the
    /// service owns its connections.
    pub fn network<S, B>(mut self, service: S) -> Self
    where
        S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let service = service
            .map_response(map_response_body)
            .map_err(|e: S::Error| -> BoxError { e.into() });
        self.network = Some(BoxCloneService::new(service));
        self
    }

    /// Build the session
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if the TLS configuration cannot be built,
    /// `HttpError::InvalidHeaderValue` for an invalid user agent, and
    /// `HttpError::Runtime` if no runtime is available and none can be started
    pub fn build(self) -> Result<Session, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let network = match self.network {
            Some(network) => network,
            None => {
                let https = build_https_connector(
                    self.config.tls_roots,
                    self.config.transport,
                    &self.security,
                )?;

                let mut client_builder = Client::builder(TokioExecutor::new());
                // pool_timer is required for pool_idle_timeout to work
                client_builder
                    .pool_timer(TokioTimer::new())
                    .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
                    .http2_only(self.config.http2_only);
                if let Some(idle_timeout) = self.config.pool_idle_timeout {
                    client_builder.pool_idle_timeout(idle_timeout);
                }
                let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

                let service = ServiceBuilder::new()
                    .layer(DecompressionLayer::new())
                    .service(hyper_client)
                    .map_response(map_response_body)
                    .map_err(BoxError::from);
                BoxCloneService::new(service)
            }
        };

        let headers = DefaultHeadersLayer::user_agent(&self.config.user_agent)?;
        let service = ServiceBuilder::new()
            .layer(headers)
            .service(network)
            .map_err(map_network_error)
            .boxed_clone();

        // Buffer spawns its worker on the current runtime
        let handle = runtime_handle(self.runtime)?;
        let _guard = handle.enter();
        let buffer_capacity = self.config.buffer_capacity.max(1);
        let service: BufferedService = Buffer::new(service, buffer_capacity);

        Ok(Session {
            service,
            retrier: self.retrier,
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Map network errors to `HttpError`
///
/// Typed `HttpError`s boxed by inner services pass through; rustls failures
/// anywhere in the source chain become `HttpError::Tls`.
fn map_network_error(err: BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) if tls::is_tls_failure(other.as_ref()) => HttpError::Tls(other),
        Err(other) => HttpError::Transport(other),
    }
}

/// Box the response body of any service into [`ResponseBody`].
fn map_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// HTTPS connector whose certificate checks follow the session's trust policy.
///
/// HTTP/2 is offered through ALPN alongside HTTP/1.1.
fn build_https_connector(
    tls_roots: TlsRootConfig,
    transport: TransportSecurity,
    security: &Security,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let client_config = tls::client_config(tls_roots, security)?;
    let builder = hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(client_config);
    let connector = if transport == TransportSecurity::AllowInsecureHttp {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}

/// Map buffer errors to `HttpError`
///
/// Buffer wraps inner service errors; typed errors are recovered by
/// downcasting. Anything else means the worker is gone.
pub fn map_buffer_error(err: BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Try to acquire a buffer slot with fail-fast semantics.
///
/// If the buffer is full, returns `HttpError::Overloaded` immediately instead
/// of blocking. This prevents request pile-up under load.
///
/// # Errors
/// Returns `HttpError::Overloaded` when full and `HttpError::ServiceClosed`
/// when the worker is gone
pub async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    use std::task::Poll;

    let poll_result = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match poll_result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}
