use crate::error::HttpError;
use http::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use http::{Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that fills in headers a request does not set itself
#[derive(Clone, Debug, Default)]
pub struct DefaultHeadersLayer {
    headers: HeaderMap,
}

impl DefaultHeadersLayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer that only adds a User-Agent header
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the user agent string is not valid
    pub fn user_agent(user_agent: impl AsRef<str>) -> Result<Self, HttpError> {
        Self::new().with(USER_AGENT, user_agent)
    }

    /// Add one default header
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if `value` is not a valid header value
    pub fn with(mut self, name: HeaderName, value: impl AsRef<str>) -> Result<Self, HttpError> {
        let value = HeaderValue::from_str(value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            headers: self.headers.clone(),
        }
    }
}

/// Service that adds default headers to requests
#[derive(Clone, Debug)]
pub struct DefaultHeadersService<S> {
    inner: S,
    headers: HeaderMap,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        for (name, value) in &self.headers {
            if !req.headers().contains_key(name) {
                req.headers_mut().insert(name.clone(), value.clone());
            }
        }
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::Full;
    use tower::ServiceExt;

    /// Echoes the request headers back as response headers.
    #[derive(Clone)]
    struct EchoHeaders;

    impl Service<Request<Full<Bytes>>> for EchoHeaders {
        type Response = Response<Full<Bytes>>;
        type Error = Box<dyn std::error::Error + Send + Sync>;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::new()))
                .unwrap();
            *response.headers_mut() = req.headers().clone();
            std::future::ready(Ok(response))
        }
    }

    fn request(user_agent: Option<&'static str>) -> Request<Full<Bytes>> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri("http://example.com");
        if let Some(ua) = user_agent {
            builder = builder.header(USER_AGENT, ua);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn test_user_agent_added() {
        let layer = DefaultHeadersLayer::user_agent("test-agent/1.0").unwrap();
        let service = layer.layer(EchoHeaders);

        let response = service.oneshot(request(None)).await.unwrap();

        assert_eq!(response.headers()[USER_AGENT], "test-agent/1.0");
    }

    #[tokio::test]
    async fn test_request_header_wins() {
        let layer = DefaultHeadersLayer::user_agent("test-agent/1.0").unwrap();
        let service = layer.layer(EchoHeaders);

        let response = service
            .oneshot(request(Some("custom-agent/2.0")))
            .await
            .unwrap();

        assert_eq!(response.headers()[USER_AGENT], "custom-agent/2.0");
    }

    #[tokio::test]
    async fn test_several_defaults() {
        let layer = DefaultHeadersLayer::new()
            .with(USER_AGENT, "a/1")
            .unwrap()
            .with(http::header::ACCEPT_LANGUAGE, "en")
            .unwrap();
        let service = layer.layer(EchoHeaders);

        let response = service.oneshot(request(None)).await.unwrap();

        assert_eq!(response.headers()[http::header::ACCEPT_LANGUAGE], "en");
        assert_eq!(response.headers()[USER_AGENT], "a/1");
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        // Control characters are invalid in header values
        let result = DefaultHeadersLayer::user_agent("invalid\x00agent");
        assert!(matches!(result, Err(HttpError::InvalidHeaderValue(_))));
    }
}
