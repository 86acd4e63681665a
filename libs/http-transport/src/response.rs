use crate::error::{BoxError, HttpError};
use crate::interceptor::ResponseMeta;
use crate::request::WireRequest;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Type alias for the boxed response body that supports decompression.
///
/// Holds either a raw body or a decompressed one (gzip/br/deflate), or the
/// body of an injected network service.
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Success half of [`HttpResult`](crate::HttpResult).
///
/// The body has been read completely, so the accessors are synchronous.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    request: Option<WireRequest>,
}

impl HttpResponse {
    pub(crate) fn new(meta: ResponseMeta, body: Bytes, request: Option<WireRequest>) -> Self {
        Self {
            status: meta.status,
            headers: meta.headers,
            body,
            request,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// The wire request that produced this response, as the interceptors left it.
    #[must_use]
    pub fn request(&self) -> Option<&WireRequest> {
        self.request.as_ref()
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if the body is not valid JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parse the body as an untyped JSON value.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if the body is not valid JSON
    pub fn json_value(&self) -> Result<Value, HttpError> {
        self.json()
    }

    /// Parse the body as a JSON object.
    ///
    /// Any other JSON value is wrapped as `{"data": value}`.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if the body is not valid JSON
    pub fn json_dictionary(&self) -> Result<Map<String, Value>, HttpError> {
        Ok(match self.json_value()? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_owned(), other);
                map
            }
        })
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Read a response body up to `limit` bytes.
///
/// `on_chunk` receives the running byte count after every data frame.
///
/// # Errors
/// Returns `HttpError::BodyTooLarge` past the limit and `HttpError::Transport`
/// when the body stream fails.
pub async fn read_body_limited(
    body: ResponseBody,
    limit: usize,
    mut on_chunk: impl FnMut(u64),
) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
            on_chunk(collected.len() as u64);
        }
    }

    Ok(Bytes::from(collected))
}

/// Default response validation.
///
/// The status must be 2xx or 3xx. When the request carried an `Accept` header
/// and the body is not empty, the response `Content-Type` must match one of
/// the accepted media ranges.
///
/// # Errors
/// Returns `HttpError::Validation` or `HttpError::UnacceptableContentType`
pub fn validate(
    request: &WireRequest,
    meta: &ResponseMeta,
    body: &[u8],
) -> Result<(), HttpError> {
    if !(meta.status.is_success() || meta.status.is_redirection()) {
        return Err(HttpError::Validation {
            status: meta.status,
        });
    }

    let Some(accept) = request.headers().get(ACCEPT).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    if body.is_empty() {
        return Ok(());
    }

    let acceptable: Vec<mime::Mime> = accept
        .split(',')
        .filter_map(|range| range.trim().parse().ok())
        .collect();
    if acceptable.is_empty() {
        return Ok(());
    }

    let actual = meta
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let accepted = match actual.parse::<mime::Mime>() {
        Ok(actual) => acceptable.iter().any(|range| media_range_matches(range, &actual)),
        Err(_) => acceptable.iter().any(|range| range.type_() == mime::STAR),
    };

    if accepted {
        Ok(())
    } else {
        Err(HttpError::UnacceptableContentType {
            acceptable: accept.to_owned(),
            actual: actual.to_owned(),
        })
    }
}

fn media_range_matches(range: &mime::Mime, actual: &mime::Mime) -> bool {
    if range.type_() == mime::STAR {
        return true;
    }
    range.type_() == actual.type_()
        && (range.subtype() == mime::STAR || range.subtype() == actual.subtype())
}
