//! Request pipeline.
//!
//! One call goes through these steps, repeated from the top when the
//! session's retrier asks for another attempt:
//!
//! 1. build the wire request (endpoint, headers, parameter baskets)
//! 2. let the retrier adapt it
//! 3. request interceptors: the request's own, then the transport's
//! 4. network exchange under the request timeout, including the body read
//! 5. default validation (status and content type)
//! 6. on failure, ask the retrier
//!
//! Response interceptors then run exactly once, the request's own first, and
//! the result is composed from what they leave behind.

use crate::HttpResult;
use crate::call::{CallContext, HttpCall, Progress};
use crate::config::TransportConfig;
use crate::error::HttpError;
use crate::interceptor::{
    ClarifyErrorInterceptor, RawResponse, RequestInterceptor, ResponseInterceptor, ResponseMeta,
    intercept_request, intercept_response,
};
use crate::request::{
    DEFAULT_REQUEST_TIMEOUT, FileMultipart, HttpRequest, UploadBody, WireRequest, clone_wire,
};
use crate::response::{self, HttpResponse};
use crate::retrier::RetryDecision;
use crate::session::{Session, SessionBuilder, runtime_handle};
use bytes::Bytes;
use http::Request;
use http::header::CONTENT_LENGTH;
use http_body_util::Full;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::mpsc::{RecvTimeoutError, sync_channel};
use std::time::Duration;
use tokio::runtime::Handle;

/// Sends [`HttpRequest`]s and hands back [`HttpResult`]s.
///
/// Cheap to clone; clones share the session and interceptor chains.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    session: Session,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    config: TransportConfig,
    runtime: Handle,
}

/// One call's fixed inputs, shared by all of its attempts.
struct Exchange<'a> {
    wire: WireRequest,
    session: &'a Session,
    request_interceptors: &'a [Arc<dyn RequestInterceptor>],
    response_interceptors: &'a [Arc<dyn ResponseInterceptor>],
    timeout: Duration,
}

impl Transport {
    /// Transport with a default session and the clarify-error interceptor
    ///
    /// # Errors
    /// Returns an error if the default session cannot be built
    pub fn new() -> Result<Self, HttpError> {
        TransportBuilder::new().build()
    }

    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// Session used by requests that do not carry their own
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Send a request.
    ///
    /// # Errors
    /// Build failures are returned before any network I/O. Everything else is
    /// a [`TransportError`](crate::TransportError) as left by the response
    /// interceptors.
    pub async fn send(&self, request: &HttpRequest) -> HttpResult {
        self.execute(request, None, &CallContext::detached()).await
    }

    /// Send a request and wait for the result on the calling thread.
    ///
    /// The wait is bounded by the request timeout plus the configured
    /// semaphore gap. Past that the caller gets `WaitTimeout` while the
    /// request keeps running in the background.
    ///
    /// # Errors
    /// Same as [`send`](Self::send), plus `HttpError::BlockingDisallowed`
    /// when called from inside a tokio runtime (unless allowed by
    /// configuration) and `HttpError::WaitTimeout` when the wait runs out.
    pub fn send_blocking(&self, request: &HttpRequest) -> HttpResult {
        let transport = self.clone();
        let request = request.clone();
        self.wait_for(request.timeout(), async move { transport.send(&request).await })
    }

    /// Start a request and deliver its result to `completion`.
    ///
    /// `completion` runs exactly once, on the transport's runtime, with
    /// `Cancelled` if [`HttpCall::cancel`] wins the race.
    pub fn send_with_callback(
        &self,
        request: &HttpRequest,
        completion: impl FnOnce(HttpResult) + Send + 'static,
    ) -> HttpCall {
        let transport = self.clone();
        let request = request.clone();
        self.spawn_call(completion, move |context| async move {
            transport.execute(&request, None, &context).await
        })
    }

    /// Send a prebuilt wire request.
    ///
    /// Only the transport-level interceptors run. The default timeout
    /// applies.
    ///
    /// # Errors
    /// Same as [`send`](Self::send)
    pub async fn send_raw(&self, request: WireRequest) -> HttpResult {
        let exchange = Exchange {
            wire: request,
            session: &self.inner.session,
            request_interceptors: &[],
            response_interceptors: &[],
            timeout: DEFAULT_REQUEST_TIMEOUT,
        };
        self.run(exchange, &CallContext::detached()).await
    }

    /// Blocking form of [`send_raw`](Self::send_raw).
    ///
    /// # Errors
    /// Same as [`send_blocking`](Self::send_blocking)
    pub fn send_raw_blocking(&self, request: WireRequest) -> HttpResult {
        let transport = self.clone();
        self.wait_for(DEFAULT_REQUEST_TIMEOUT, async move {
            transport.send_raw(request).await
        })
    }

    /// Send a request whose body is replaced by `body`.
    ///
    /// URL and custom parameter baskets still apply. For file uploads the
    /// string values of the JSON basket become extra form fields.
    ///
    /// # Errors
    /// Same as [`send`](Self::send)
    pub async fn upload(&self, request: &HttpRequest, body: &UploadBody) -> HttpResult {
        self.execute(request, Some(body), &CallContext::detached())
            .await
    }

    /// Upload raw bytes as the request body.
    ///
    /// # Errors
    /// Same as [`send`](Self::send)
    pub async fn upload_data(&self, request: &HttpRequest, data: Bytes) -> HttpResult {
        self.upload(request, &UploadBody::Data(data)).await
    }

    /// Upload one file as `multipart/form-data`.
    ///
    /// # Errors
    /// Same as [`send`](Self::send)
    pub async fn upload_file(&self, request: &HttpRequest, file: FileMultipart) -> HttpResult {
        self.upload(request, &UploadBody::File(file)).await
    }

    /// Blocking form of [`upload`](Self::upload).
    ///
    /// # Errors
    /// Same as [`send_blocking`](Self::send_blocking)
    pub fn upload_blocking(&self, request: &HttpRequest, body: &UploadBody) -> HttpResult {
        let transport = self.clone();
        let request = request.clone();
        let body = body.clone();
        self.wait_for(request.timeout(), async move {
            transport.upload(&request, &body).await
        })
    }

    /// Callback form of [`upload`](Self::upload).
    ///
    /// Upload progress is reported through
    /// [`HttpCall::on_upload_progress`].
    pub fn upload_with_callback(
        &self,
        request: &HttpRequest,
        body: &UploadBody,
        completion: impl FnOnce(HttpResult) + Send + 'static,
    ) -> HttpCall {
        let transport = self.clone();
        let request = request.clone();
        let body = body.clone();
        self.spawn_call(completion, move |context| async move {
            transport.execute(&request, Some(&body), &context).await
        })
    }

    fn spawn_call<F, Fut>(
        &self,
        completion: impl FnOnce(HttpResult) + Send + 'static,
        start: F,
    ) -> HttpCall
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = HttpResult> + Send + 'static,
    {
        let (call, context) = HttpCall::new(self.inner.runtime.clone());
        let cancellation = context.cancellation();
        let exchange = start(context);

        self.inner.runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    tracing::debug!("call cancelled before completion");
                    Err(HttpError::Cancelled.into())
                }
                result = exchange => result,
            };
            completion(result);
        });
        call
    }

    fn wait_for<F>(&self, timeout: Duration, exchange: F) -> HttpResult
    where
        F: Future<Output = HttpResult> + Send + 'static,
    {
        if !self.inner.config.allow_blocking_in_async_context && Handle::try_current().is_ok() {
            return Err(HttpError::BlockingDisallowed.into());
        }

        let wait = timeout.saturating_add(self.inner.config.semaphore_timeout_gap);
        let (tx, rx) = sync_channel(1);
        // Not cancelled on timeout; the exchange finishes unobserved
        self.inner.runtime.spawn(async move {
            if tx.send(exchange.await).is_err() {
                tracing::debug!("blocking caller stopped waiting; result dropped");
            }
        });

        match rx.recv_timeout(wait) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?wait, "gave up waiting for the response");
                Err(HttpError::WaitTimeout(wait).into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(HttpError::ServiceClosed.into()),
        }
    }

    async fn execute(
        &self,
        request: &HttpRequest,
        upload: Option<&UploadBody>,
        context: &CallContext,
    ) -> HttpResult {
        let session = request.session().unwrap_or(&self.inner.session);
        let security = session.transport_security();
        let wire = match upload {
            Some(body) => request.to_upload_wire(security, body),
            None => request.to_wire(security),
        }
        .inspect_err(|e| {
            tracing::debug!(error = %e, endpoint = request.endpoint(), "request could not be built");
        })?;

        let exchange = Exchange {
            wire,
            session,
            request_interceptors: request.request_interceptors(),
            response_interceptors: request.response_interceptors(),
            timeout: request.timeout(),
        };
        self.run(exchange, context).await
    }

    async fn run(&self, exchange: Exchange<'_>, context: &CallContext) -> HttpResult {
        let Exchange {
            wire,
            session,
            request_interceptors,
            response_interceptors,
            timeout,
        } = exchange;
        let method = wire.method().clone();
        let host = wire.uri().host().unwrap_or_default().to_owned();
        let retrier = session.retrier();
        let mut attempt = 0usize;

        loop {
            let mut outgoing = clone_wire(&wire);
            if let Some(retrier) = retrier {
                outgoing = retrier.adapt(outgoing);
            }
            let outgoing = intercept_request(
                request_interceptors
                    .iter()
                    .chain(&self.inner.request_interceptors),
                outgoing,
            );

            tracing::debug!(%method, %host, attempt, "sending request");
            let mut raw = attempt_once(session, outgoing, timeout, context).await;
            if self.inner.config.use_default_validation {
                validate_raw(&mut raw);
            }

            if let (Some(retrier), Some(error)) = (retrier, raw.error.as_ref()) {
                let json = raw
                    .body
                    .as_deref()
                    .and_then(|body| serde_json::from_slice::<Value>(body).ok());
                let decision = retrier
                    .decide(attempt, raw.response.as_ref(), json.as_ref(), error)
                    .await;
                if decision == RetryDecision::Retry {
                    attempt += 1;
                    tracing::debug!(%method, %host, attempt, "retrying request");
                    continue;
                }
            }

            let raw = intercept_response(
                response_interceptors
                    .iter()
                    .chain(&self.inner.response_interceptors),
                raw,
            );
            tracing::debug!(
                %method,
                %host,
                attempt,
                status = ?raw.status(),
                failed = raw.error.is_some(),
                "request finished"
            );
            return compose(raw);
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("session", &self.inner.session)
            .field("request_interceptors", &self.inner.request_interceptors.len())
            .field("response_interceptors", &self.inner.response_interceptors.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// One network attempt: send, then read the body, all under `timeout`.
async fn attempt_once(
    session: &Session,
    request: WireRequest,
    timeout: Duration,
    context: &CallContext,
) -> RawResponse {
    let sent = clone_wire(&request);
    let url = request.uri().clone();
    let upload_total = request.body().len() as u64;
    context.report_upload(Progress {
        completed: 0,
        total: Some(upload_total),
    });

    let (parts, body) = request.into_parts();
    let exchange = async {
        let response = session
            .execute(Request::from_parts(parts, Full::new(body)))
            .await?;
        context.report_upload(Progress {
            completed: upload_total,
            total: Some(upload_total),
        });

        let (parts, body) = response.into_parts();
        let total = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let meta = ResponseMeta {
            status: parts.status,
            headers: parts.headers,
            url,
        };
        let body = response::read_body_limited(body, session.max_body_size(), |completed| {
            context.report_download(Progress { completed, total });
        })
        .await;
        Ok::<_, HttpError>((meta, body))
    };

    let mut raw = RawResponse {
        request: Some(sent),
        ..RawResponse::default()
    };
    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok((meta, Ok(body)))) => {
            raw.response = Some(meta);
            raw.body = Some(body);
        }
        Ok(Ok((meta, Err(e)))) => {
            raw.response = Some(meta);
            raw.error = Some(e.into());
        }
        Ok(Err(e)) => raw.error = Some(e.into()),
        Err(_) => {
            tracing::debug!(?timeout, "request attempt timed out");
            raw.error = Some(HttpError::Timeout(timeout).into());
        }
    }
    raw
}

fn validate_raw(raw: &mut RawResponse) {
    if raw.error.is_some() {
        return;
    }
    let (Some(request), Some(meta)) = (raw.request.as_ref(), raw.response.as_ref()) else {
        return;
    };
    let body = raw.body.as_deref().unwrap_or_default();
    if let Err(e) = response::validate(request, meta, body) {
        raw.error = Some(e.into());
    }
}

fn compose(raw: RawResponse) -> HttpResult {
    match raw {
        RawResponse {
            error: Some(error), ..
        } => Err(error),
        RawResponse {
            request,
            response: Some(meta),
            body,
            error: None,
        } => Ok(HttpResponse::new(meta, body.unwrap_or_default(), request)),
        RawResponse { response: None, .. } => Err(HttpError::NoHttpResponse.into()),
    }
}

/// Builder for [`Transport`]
#[must_use]
pub struct TransportBuilder {
    session: Option<Session>,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    config: TransportConfig,
    runtime: Option<Handle>,
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self {
            session: None,
            request_interceptors: Vec::new(),
            response_interceptors: vec![Arc::new(ClarifyErrorInterceptor::new())],
            config: TransportConfig::default(),
            runtime: None,
        }
    }

    /// Default session; one with default settings is built otherwise
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a transport-level request interceptor
    pub fn request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request_interceptors.push(interceptor);
        self
    }

    /// Append a transport-level response interceptor
    pub fn response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response_interceptors.push(interceptor);
        self
    }

    /// Replace the transport-level response chain, including the default
    /// [`ClarifyErrorInterceptor`]
    pub fn response_interceptors(
        mut self,
        interceptors: impl IntoIterator<Item = Arc<dyn ResponseInterceptor>>,
    ) -> Self {
        self.response_interceptors = interceptors.into_iter().collect();
        self
    }

    pub fn semaphore_timeout_gap(mut self, gap: Duration) -> Self {
        self.config.semaphore_timeout_gap = gap;
        self
    }

    pub fn use_default_validation(mut self, enabled: bool) -> Self {
        self.config.use_default_validation = enabled;
        self
    }

    pub fn allow_blocking_in_async_context(mut self, allowed: bool) -> Self {
        self.config.allow_blocking_in_async_context = allowed;
        self
    }

    /// Runtime running blocking and callback sends
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the transport
    ///
    /// # Errors
    /// Returns an error if no runtime is available or the default session
    /// cannot be built
    pub fn build(self) -> Result<Transport, HttpError> {
        let runtime = runtime_handle(self.runtime)?;
        let session = match self.session {
            Some(session) => session,
            None => SessionBuilder::new().runtime(runtime.clone()).build()?,
        };

        tracing::debug!(
            request_interceptors = self.request_interceptors.len(),
            response_interceptors = self.response_interceptors.len(),
            validation = self.config.use_default_validation,
            "transport built"
        );

        Ok(Transport {
            inner: Arc::new(Inner {
                session,
                request_interceptors: self.request_interceptors,
                response_interceptors: self.response_interceptors,
                config: self.config,
                runtime,
            }),
        })
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
