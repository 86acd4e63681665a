//! Request and response interceptor chains.
//!
//! An interceptor is a total transform over one value. Chains are plain
//! ordered slices folded left to right: the request's own interceptors
//! first, then the transport-level ones.

mod clarify;
pub mod cookie;
mod log;

pub use clarify::ClarifyErrorInterceptor;
pub use cookie::{AddCookieInterceptor, Cookie, CookieProvider, CookieStorage, ReceivedCookieInterceptor};
pub use log::{
    LogPrinter, LogRequestInterceptor, LogResponseInterceptor, RequestLogLevel, ResponseHeader,
    ResponseLogLevel,
};

use crate::error::TransportError;
use crate::request::WireRequest;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use std::sync::Arc;

/// Transform applied to every outgoing wire request.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: WireRequest) -> WireRequest;

    /// Name used in trace output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> RequestInterceptor for F
where
    F: Fn(WireRequest) -> WireRequest + Send + Sync,
{
    fn intercept(&self, request: WireRequest) -> WireRequest {
        self(request)
    }
}

/// Transform applied to every raw response before the result is composed.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept(&self, response: RawResponse) -> RawResponse;

    /// Name used in trace output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(RawResponse) -> RawResponse + Send + Sync,
{
    fn intercept(&self, response: RawResponse) -> RawResponse {
        self(response)
    }
}

/// Status line and headers of a received response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URL the response was received from
    pub url: Uri,
}

/// Everything known about an exchange once the network part is over.
///
/// Any field may be absent: a connection failure has no `response`, a
/// successful exchange has no `error`. Response interceptors may replace any
/// field; most of them only touch `error`.
#[derive(Debug, Default)]
pub struct RawResponse {
    pub request: Option<WireRequest>,
    pub response: Option<ResponseMeta>,
    pub body: Option<Bytes>,
    pub error: Option<TransportError>,
}

impl RawResponse {
    /// Status code of the response, if one was received.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|meta| meta.status)
    }
}

pub fn intercept_request<'a>(
    chain: impl IntoIterator<Item = &'a Arc<dyn RequestInterceptor>>,
    request: WireRequest,
) -> WireRequest {
    chain.into_iter().fold(request, |request, interceptor| {
        tracing::trace!(interceptor = interceptor.name(), "applying request interceptor");
        interceptor.intercept(request)
    })
}

pub fn intercept_response<'a>(
    chain: impl IntoIterator<Item = &'a Arc<dyn ResponseInterceptor>>,
    response: RawResponse,
) -> RawResponse {
    chain.into_iter().fold(response, |response, interceptor| {
        tracing::trace!(interceptor = interceptor.name(), "applying response interceptor");
        interceptor.intercept(response)
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn appender(tag: &'static str) -> Arc<dyn RequestInterceptor> {
        Arc::new(move |mut request: WireRequest| {
            request
                .headers_mut()
                .append("x-order", HeaderValue::from_static(tag));
            request
        })
    }

    #[test]
    fn test_request_chain_folds_left_to_right() {
        let own = [appender("A"), appender("B")];
        let transport = [appender("C"), appender("D")];
        let request = http::Request::new(Bytes::new());

        let request = intercept_request(own.iter().chain(&transport), request);

        let order: Vec<&str> = request
            .headers()
            .get_all("x-order")
            .iter()
            .map(|value| value.to_str().unwrap())
            .collect();
        assert_eq!(order, ["A", "B", "C", "D"]);
    }

    #[test]
    fn test_response_chain_sees_previous_output() {
        let set_body: Arc<dyn ResponseInterceptor> = Arc::new(|mut raw: RawResponse| {
            raw.body = Some(Bytes::from_static(b"first"));
            raw
        });
        let extend_body: Arc<dyn ResponseInterceptor> = Arc::new(|mut raw: RawResponse| {
            let mut body = raw.body.take().unwrap_or_default().to_vec();
            body.extend_from_slice(b"+second");
            raw.body = Some(Bytes::from(body));
            raw
        });

        let raw = intercept_response([&set_body, &extend_body], RawResponse::default());

        assert_eq!(raw.body.unwrap().as_ref(), b"first+second");
    }

    #[test]
    fn test_closure_interceptor_name_is_reported() {
        let interceptor = appender("A");
        assert!(!interceptor.name().is_empty());
    }
}
