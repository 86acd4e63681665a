//! Request model: verb, endpoint, headers, parameter baskets and per-request
//! pipeline settings, with layered inheritance from a base request.

mod parameters;
mod upload;

pub use parameters::{
    CustomEncoding, ParameterEncoding, ParameterMap, Parameters, merge_parameters,
};
pub use upload::{FileMultipart, UploadBody};

use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::interceptor::cookie::{Cookie, parse_cookie_header, render_cookie_header};
use crate::interceptor::{RequestInterceptor, ResponseInterceptor};
use crate::session::Session;
use bytes::Bytes;
use http::header::{COOKIE, HeaderName, HeaderValue};
use http::{Method, Request};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Request as it goes over the wire: what interceptors and adapters see.
pub type WireRequest = Request<Bytes>;

/// Timeout applied when neither a request nor its base sets one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Description of one logical HTTP call.
///
/// Every `with_*` method consumes the value and returns the updated one, so
/// a request used as a base for others is never touched by them:
///
/// ```ignore
/// let api = HttpRequest::get("https://api.example.com/v2")
///     .with_header("accept", "application/json");
///
/// let users = HttpRequest::get("users")
///     .with_parameter("page", 1, ParameterEncoding::Url)
///     .based_on(&api);
/// // GET https://api.example.com/v2/users?page=1 with the accept header
/// ```
#[derive(Clone)]
#[must_use]
pub struct HttpRequest {
    method: Method,
    endpoint: String,
    headers: BTreeMap<String, String>,
    parameters: Vec<Parameters>,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    session: Option<Session>,
    timeout: Option<Duration>,
    base: Option<Arc<HttpRequest>>,
}

impl HttpRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            headers: BTreeMap::new(),
            parameters: Vec::new(),
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
            session: None,
            timeout: None,
            base: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn head(endpoint: impl Into<String>) -> Self {
        Self::new(Method::HEAD, endpoint)
    }

    /// Inherit from `base`.
    ///
    /// - endpoint: this endpoint is appended to the base one; a `/` is
    ///   inserted unless this endpoint is empty or starts with `/` or `?`
    /// - headers: this request's headers are overlaid onto the base's
    /// - parameters: merged with [`merge_parameters`], this request winning
    /// - interceptors: this request's first, then the base's
    /// - session and timeout: this request's when set, else the base's
    pub fn based_on(self, base: &HttpRequest) -> Self {
        let mut headers = base.headers.clone();
        headers.extend(self.headers);

        let mut request_interceptors = self.request_interceptors;
        request_interceptors.extend(base.request_interceptors.iter().cloned());
        let mut response_interceptors = self.response_interceptors;
        response_interceptors.extend(base.response_interceptors.iter().cloned());

        Self {
            method: self.method,
            endpoint: merge_endpoint(&base.endpoint, &self.endpoint),
            headers,
            parameters: merge_parameters(&base.parameters, &self.parameters),
            request_interceptors,
            response_interceptors,
            session: self.session.or_else(|| base.session.clone()),
            timeout: self.timeout.or(base.timeout),
            base: Some(Arc::new(base.clone())),
        }
    }

    /// Set a header. Names are case-insensitive; the last write wins.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        headers
            .into_iter()
            .fold(self, |request, (name, value)| request.with_header(name, value))
    }

    /// Add a cookie to the `Cookie` header, replacing one with the same name.
    pub fn with_cookie(mut self, cookie: &Cookie) -> Self {
        let key = COOKIE.as_str().to_owned();
        let mut pairs = self
            .headers
            .get(&key)
            .map(String::as_str)
            .map(parse_cookie_header)
            .unwrap_or_default();
        pairs.insert(cookie.name.clone(), cookie.value.clone());
        self.headers.insert(key, render_cookie_header(&pairs));
        self
    }

    pub fn with_cookie_named(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_cookie(&Cookie::new(name, value))
    }

    /// Add one parameter to the basket of the given encoding.
    pub fn with_parameter(
        self,
        key: impl Into<String>,
        value: impl Into<Value>,
        encoding: ParameterEncoding,
    ) -> Self {
        self.with_basket(Parameters::new(encoding).with(key, value))
    }

    pub fn with_parameters(self, parameters: ParameterMap, encoding: ParameterEncoding) -> Self {
        self.with_basket(Parameters::new(encoding).with_map(parameters))
    }

    pub fn with_basket(self, basket: Parameters) -> Self {
        self.with_baskets(&[basket])
    }

    pub fn with_baskets(mut self, baskets: &[Parameters]) -> Self {
        self.parameters = merge_parameters(&self.parameters, baskets);
        self
    }

    /// Append interceptors to this request's own request chain.
    pub fn with_request_interceptors(
        mut self,
        interceptors: impl IntoIterator<Item = Arc<dyn RequestInterceptor>>,
    ) -> Self {
        self.request_interceptors.extend(interceptors);
        self
    }

    /// Append interceptors to this request's own response chain.
    pub fn with_response_interceptors(
        mut self,
        interceptors: impl IntoIterator<Item = Arc<dyn ResponseInterceptor>>,
    ) -> Self {
        self.response_interceptors.extend(interceptors);
        self
    }

    /// Send this request through `session` instead of the transport's default.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameters] {
        &self.parameters
    }

    #[must_use]
    pub fn request_interceptors(&self) -> &[Arc<dyn RequestInterceptor>] {
        &self.request_interceptors
    }

    #[must_use]
    pub fn response_interceptors(&self) -> &[Arc<dyn ResponseInterceptor>] {
        &self.response_interceptors
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Effective timeout for one network attempt.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    /// The request this one was derived from, if any.
    #[must_use]
    pub fn base(&self) -> Option<&HttpRequest> {
        self.base.as_deref()
    }

    /// Build the wire request with every parameter basket encoded in order.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::MalformedUrl` or `HttpError::InvalidScheme` for a
    /// bad endpoint, a header error for invalid header names or values, and
    /// the encoder's error when a basket fails to encode.
    pub fn to_wire(&self, security: TransportSecurity) -> Result<WireRequest, HttpError> {
        let request = self.bare_wire(security)?;
        self.parameters
            .iter()
            .try_fold(request, |request, basket| basket.encode(request))
    }

    /// Build the wire request for an upload.
    ///
    /// URL and custom baskets are encoded as usual, then the body is replaced
    /// by `body`. For a file upload, string values of the JSON basket become
    /// extra form fields; other JSON values and form baskets are not sent.
    ///
    /// # Errors
    ///
    /// Same as [`HttpRequest::to_wire`].
    pub fn to_upload_wire(
        &self,
        security: TransportSecurity,
        body: &UploadBody,
    ) -> Result<WireRequest, HttpError> {
        let mut request = self.bare_wire(security)?;
        for basket in &self.parameters {
            if matches!(
                basket.encoding(),
                ParameterEncoding::Url | ParameterEncoding::Custom(_)
            ) {
                request = basket.encode(request)?;
            }
        }

        let fields = self
            .parameters
            .iter()
            .filter(|basket| matches!(basket.encoding(), ParameterEncoding::Json))
            .flat_map(|basket| basket.parameters().iter())
            .filter_map(|(key, value)| value.as_str().map(|text| (key.as_str(), text)));

        upload::apply(request, body, fields)
    }

    fn bare_wire(&self, security: TransportSecurity) -> Result<WireRequest, HttpError> {
        let uri = validate_url(&self.endpoint, security)?;
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .body(Bytes::new())?;

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())?;
            let value = HeaderValue::from_str(value)?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("headers", &self.headers)
            .field("parameters", &self.parameters)
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .field("session", &self.session.is_some())
            .field("timeout", &self.timeout)
            .field("base", &self.base.as_ref().map(|base| base.endpoint.as_str()))
            .finish()
    }
}

/// Join a base endpoint and a relative one.
#[must_use]
pub fn merge_endpoint(base: &str, relative: &str) -> String {
    if relative.is_empty() || relative.starts_with('/') || relative.starts_with('?') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// Parse an absolute URL and check its scheme against the transport security mode.
pub fn validate_url(url: &str, security: TransportSecurity) -> Result<http::Uri, HttpError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::MalformedUrl {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(HttpError::MalformedUrl {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some("http") => match security {
            TransportSecurity::AllowInsecureHttp => Ok(uri),
            TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
            }),
        },
        Some(scheme) => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(HttpError::MalformedUrl {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}

/// Copy of a wire request without its extensions.
pub fn clone_wire(request: &WireRequest) -> WireRequest {
    let mut copy = Request::new(request.body().clone());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    copy
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::interceptor::RequestInterceptor;
    use http::header::CONTENT_TYPE;
    use serde_json::json;

    struct Tag(&'static str);

    impl RequestInterceptor for Tag {
        fn intercept(&self, request: WireRequest) -> WireRequest {
            request
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    fn tags(names: &[&'static str]) -> Vec<Arc<dyn RequestInterceptor>> {
        names
            .iter()
            .map(|name| Arc::new(Tag(*name)) as Arc<dyn RequestInterceptor>)
            .collect()
    }

    fn names(request: &HttpRequest) -> Vec<&str> {
        request
            .request_interceptors()
            .iter()
            .map(|i| i.name())
            .collect()
    }

    #[test]
    fn test_endpoint_merge() {
        assert_eq!(merge_endpoint("http://x.com/api", "/v1"), "http://x.com/api/v1");
        assert_eq!(merge_endpoint("http://x.com/api", "v1"), "http://x.com/api/v1");
        assert_eq!(merge_endpoint("http://x.com/api", ""), "http://x.com/api");
        assert_eq!(
            merge_endpoint("http://x.com/api", "?page=2"),
            "http://x.com/api?page=2"
        );
    }

    #[test]
    fn test_headers_overlay_base() {
        let base = HttpRequest::get("http://x.com")
            .with_header("accept", "text/plain")
            .with_header("x-base", "1");
        let request = HttpRequest::get("")
            .with_header("Accept", "application/json")
            .with_header("x-own", "2")
            .based_on(&base);

        let expected: BTreeMap<String, String> = [
            ("accept", "application/json"),
            ("x-base", "1"),
            ("x-own", "2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        assert_eq!(request.headers(), &expected);
    }

    #[test]
    fn test_base_is_untouched() {
        let base = HttpRequest::get("http://x.com").with_header("a", "1");
        let _child = HttpRequest::get("v1")
            .based_on(&base)
            .with_header("a", "2")
            .with_parameter("q", 1, ParameterEncoding::Url);

        assert_eq!(base.header("a"), Some("1"));
        assert!(base.parameters().is_empty());
    }

    #[test]
    fn test_parameters_inherit_with_override_winning() {
        let base = HttpRequest::post("http://x.com")
            .with_parameter("a", 1, ParameterEncoding::Json)
            .with_parameter("b", 1, ParameterEncoding::Json);
        let request = HttpRequest::post("items")
            .with_parameter("b", 2, ParameterEncoding::Json)
            .based_on(&base);

        assert_eq!(request.parameters().len(), 1);
        assert_eq!(request.parameters()[0].get("a"), Some(&json!(1)));
        assert_eq!(request.parameters()[0].get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_interceptors_own_first_then_base() {
        let base = HttpRequest::get("http://x.com").with_request_interceptors(tags(&["C", "D"]));
        let request = HttpRequest::get("v1")
            .with_request_interceptors(tags(&["A", "B"]))
            .based_on(&base);

        assert_eq!(names(&request), ["A", "B", "C", "D"]);
    }

    #[test]
    fn test_timeout_falls_back_to_base_then_default() {
        let base = HttpRequest::get("http://x.com").with_timeout(Duration::from_secs(5));
        assert_eq!(HttpRequest::get("a").based_on(&base).timeout(), Duration::from_secs(5));
        assert_eq!(
            HttpRequest::get("a")
                .with_timeout(Duration::from_secs(1))
                .based_on(&base)
                .timeout(),
            Duration::from_secs(1)
        );
        assert_eq!(HttpRequest::get("http://x.com").timeout(), DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_with_cookie_merges_into_header() {
        let request = HttpRequest::get("http://x.com")
            .with_header("cookie", "a=1; b=2")
            .with_cookie_named("b", "9")
            .with_cookie_named("c", "3");

        let pairs = parse_cookie_header(request.header("Cookie").unwrap());
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs["a"], "1");
        assert_eq!(pairs["b"], "9");
        assert_eq!(pairs["c"], "3");
    }

    #[test]
    fn test_to_wire_encodes_everything() {
        let request = HttpRequest::post("http://x.com/api")
            .with_header("x-trace", "t1")
            .with_parameter("page", 2, ParameterEncoding::Url)
            .with_parameter("name", "alice", ParameterEncoding::Json);

        let wire = request.to_wire(TransportSecurity::AllowInsecureHttp).unwrap();

        assert_eq!(wire.method(), Method::POST);
        assert_eq!(wire.uri().to_string(), "http://x.com/api?page=2");
        assert_eq!(wire.headers()["x-trace"], "t1");
        assert_eq!(wire.headers()[CONTENT_TYPE], "application/json");
        let body: Value = serde_json::from_slice(wire.body()).unwrap();
        assert_eq!(body, json!({"name": "alice"}));
    }

    #[test]
    fn test_to_wire_rejects_malformed_url() {
        let err = HttpRequest::get("not a url")
            .to_wire(TransportSecurity::AllowInsecureHttp)
            .unwrap_err();
        assert!(matches!(err, HttpError::MalformedUrl { .. }));

        let err = HttpRequest::get("/relative/only")
            .to_wire(TransportSecurity::AllowInsecureHttp)
            .unwrap_err();
        assert!(matches!(
            err,
            HttpError::MalformedUrl {
                kind: InvalidUriKind::MissingAuthority,
                ..
            }
        ));
    }

    #[test]
    fn test_to_wire_enforces_tls_only() {
        let err = HttpRequest::get("http://x.com")
            .to_wire(TransportSecurity::TlsOnly)
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { .. }));

        assert!(
            HttpRequest::get("https://x.com")
                .to_wire(TransportSecurity::TlsOnly)
                .is_ok()
        );
    }

    #[test]
    fn test_to_wire_rejects_invalid_header() {
        let err = HttpRequest::get("https://x.com")
            .with_header("bad header", "v")
            .to_wire(TransportSecurity::TlsOnly)
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderName(_)));
    }

    #[test]
    fn test_clone_wire_copies_request_parts() {
        let wire = HttpRequest::post("https://x.com/items")
            .with_header("x-trace", "1")
            .with_parameter("a", 1, ParameterEncoding::Json)
            .to_wire(TransportSecurity::TlsOnly)
            .unwrap();

        let copy = clone_wire(&wire);

        assert_eq!(copy.method(), Method::POST);
        assert_eq!(copy.uri(), wire.uri());
        assert_eq!(copy.headers(), wire.headers());
        assert_eq!(copy.body(), wire.body());
    }
}
