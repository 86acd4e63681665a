use super::{RawResponse, RequestInterceptor, ResponseInterceptor};
use crate::request::WireRequest;
use http::header::{COOKIE, HeaderValue, SET_COOKIE};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A name/value cookie with the scope it was received for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

/// Source of cookies attached to outgoing requests.
pub trait CookieProvider: Send + Sync {
    fn stored_cookies(&self) -> Vec<Cookie>;
}

/// Sink for cookies received from servers.
pub trait CookieStorage: Send + Sync {
    fn store(&self, cookies: Vec<Cookie>);
}

/// Adds the provider's cookies to the `Cookie` header of every request.
///
/// Cookies already present in the header are kept unless the provider has
/// one with the same name.
pub struct AddCookieInterceptor {
    provider: Arc<dyn CookieProvider>,
}

impl AddCookieInterceptor {
    #[must_use]
    pub fn new(provider: Arc<dyn CookieProvider>) -> Self {
        Self { provider }
    }
}

impl RequestInterceptor for AddCookieInterceptor {
    fn intercept(&self, mut request: WireRequest) -> WireRequest {
        let existing: Vec<&str> = request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        let mut pairs = parse_cookie_header(&existing.join(";"));

        for cookie in self.provider.stored_cookies() {
            pairs.insert(cookie.name, cookie.value);
        }
        if pairs.is_empty() {
            return request;
        }

        match HeaderValue::from_str(&render_cookie_header(&pairs)) {
            Ok(value) => {
                request.headers_mut().insert(COOKIE, value);
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored cookies do not form a valid header; left unchanged");
            }
        }
        request
    }

    fn name(&self) -> &str {
        "add_cookie"
    }
}

/// Forwards cookies from `Set-Cookie` response headers to a storage.
///
/// The response itself passes through unchanged.
pub struct ReceivedCookieInterceptor {
    storage: Arc<dyn CookieStorage>,
}

impl ReceivedCookieInterceptor {
    #[must_use]
    pub fn new(storage: Arc<dyn CookieStorage>) -> Self {
        Self { storage }
    }
}

impl ResponseInterceptor for ReceivedCookieInterceptor {
    fn intercept(&self, response: RawResponse) -> RawResponse {
        let Some(meta) = &response.response else {
            return response;
        };

        let host = meta.url.host();
        let cookies: Vec<Cookie> = meta
            .headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| parse_set_cookie(value, host))
            .collect();

        if !cookies.is_empty() {
            tracing::debug!(count = cookies.len(), host, "storing received cookies");
            self.storage.store(cookies);
        }
        response
    }

    fn name(&self) -> &str {
        "received_cookie"
    }
}

/// Parse a `Cookie` header into name/value pairs.
///
/// Segments are split on `;` and trimmed; a segment is kept only when it
/// splits on `=` into exactly a name and a value.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .map(str::trim)
        .filter_map(|segment| {
            let mut parts = segment.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(value), None) if !name.is_empty() => {
                    Some((name.to_owned(), value.to_owned()))
                }
                _ => None,
            }
        })
        .collect()
}

pub fn render_cookie_header(pairs: &BTreeMap<String, String>) -> String {
    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse one `Set-Cookie` value; domain defaults to `host`, path to `/`.
fn parse_set_cookie(value: &str, host: Option<&str>) -> Option<Cookie> {
    let mut segments = value.split(';');
    let (name, value) = segments.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie::new(name, value.trim());
    for attribute in segments {
        let Some((key, attr_value)) = attribute.split_once('=') else {
            continue;
        };
        let attr_value = attr_value.trim();
        if key.trim().eq_ignore_ascii_case("domain") {
            cookie.domain = Some(attr_value.trim_start_matches('.').to_ascii_lowercase());
        } else if key.trim().eq_ignore_ascii_case("path") {
            cookie.path = Some(attr_value.to_owned());
        }
    }

    if cookie.domain.is_none() {
        cookie.domain = host.map(str::to_ascii_lowercase);
    }
    if cookie.path.is_none() {
        cookie.path = Some("/".to_owned());
    }
    Some(cookie)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::interceptor::ResponseMeta;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use parking_lot::Mutex;

    struct FixedCookies(Vec<Cookie>);

    impl CookieProvider for FixedCookies {
        fn stored_cookies(&self) -> Vec<Cookie> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingStorage(Mutex<Vec<Cookie>>);

    impl CookieStorage for RecordingStorage {
        fn store(&self, cookies: Vec<Cookie>) {
            self.0.lock().extend(cookies);
        }
    }

    fn request_with_cookie(header: Option<&'static str>) -> WireRequest {
        let mut request = http::Request::new(Bytes::new());
        if let Some(header) = header {
            request
                .headers_mut()
                .insert(COOKIE, HeaderValue::from_static(header));
        }
        request
    }

    #[test]
    fn test_store_overrides_parsed_cookies() {
        let interceptor = AddCookieInterceptor::new(Arc::new(FixedCookies(vec![
            Cookie::new("b", "9"),
            Cookie::new("c", "3"),
        ])));

        let request = interceptor.intercept(request_with_cookie(Some("a=1; b=2")));

        let header = request.headers()[COOKIE].to_str().unwrap();
        let pairs = parse_cookie_header(header);
        let expected: BTreeMap<String, String> = [("a", "1"), ("b", "9"), ("c", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        assert_eq!(pairs, expected);
        assert_eq!(request.headers().get_all(COOKIE).iter().count(), 1);
    }

    #[test]
    fn test_malformed_segments_are_dropped() {
        let pairs = parse_cookie_header(" a=1 ;broken; b=2=3;;c=  ; =x");

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs["a"], "1");
        assert_eq!(pairs["c"], "");
    }

    #[test]
    fn test_no_cookies_leaves_request_alone() {
        let interceptor = AddCookieInterceptor::new(Arc::new(FixedCookies(Vec::new())));

        let request = interceptor.intercept(request_with_cookie(None));

        assert!(request.headers().get(COOKIE).is_none());
    }

    #[test]
    fn test_received_cookies_are_stored() {
        let storage = Arc::new(RecordingStorage::default());
        let interceptor = ReceivedCookieInterceptor::new(storage.clone());

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("session=abc; Path=/app; HttpOnly"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("theme=dark; Domain=.Example.com"),
        );
        let raw = RawResponse {
            response: Some(ResponseMeta {
                status: StatusCode::OK,
                headers,
                url: "https://api.example.com/login".parse().unwrap(),
            }),
            body: Some(Bytes::from_static(b"ok")),
            ..RawResponse::default()
        };

        let raw = interceptor.intercept(raw);

        assert_eq!(raw.body.unwrap().as_ref(), b"ok");
        let stored = storage.0.lock();
        assert_eq!(
            *stored,
            vec![
                Cookie {
                    name: "session".to_owned(),
                    value: "abc".to_owned(),
                    domain: Some("api.example.com".to_owned()),
                    path: Some("/app".to_owned()),
                },
                Cookie {
                    name: "theme".to_owned(),
                    value: "dark".to_owned(),
                    domain: Some("example.com".to_owned()),
                    path: Some("/".to_owned()),
                },
            ]
        );
    }

    #[test]
    fn test_response_without_set_cookie_stores_nothing() {
        let storage = Arc::new(RecordingStorage::default());
        let interceptor = ReceivedCookieInterceptor::new(storage.clone());
        let raw = RawResponse {
            response: Some(ResponseMeta {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                url: "https://example.com".parse().unwrap(),
            }),
            ..RawResponse::default()
        };

        interceptor.intercept(raw);

        assert!(storage.0.lock().is_empty());
    }
}
