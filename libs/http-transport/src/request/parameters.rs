//! Parameter baskets and the merge rules between them.
//!
//! A basket groups parameters that share one encoding. Baskets with a fixed
//! encoding ([`ParameterEncoding::Json`], [`ParameterEncoding::Url`],
//! [`ParameterEncoding::Form`]) merge by key; custom baskets are carried
//! through untouched in the order they were added.

use crate::error::{BoxError, HttpError};
use crate::request::WireRequest;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::uri::PathAndQuery;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Key/value map carried by a basket.
pub type ParameterMap = serde_json::Map<String, Value>;

type EncodeFn = dyn Fn(WireRequest, &ParameterMap) -> Result<WireRequest, BoxError> + Send + Sync;

/// User-supplied encoder applied to a wire request.
///
/// Receives the request as encoded so far together with the basket's own
/// parameters and returns the rewritten request.
#[derive(Clone)]
pub struct CustomEncoding(Arc<EncodeFn>);

impl CustomEncoding {
    pub fn new<F>(encode: F) -> Self
    where
        F: Fn(WireRequest, &ParameterMap) -> Result<WireRequest, BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(encode))
    }
}

impl fmt::Debug for CustomEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomEncoding(..)")
    }
}

/// How a basket is written into the wire request.
#[derive(Clone, Debug)]
pub enum ParameterEncoding {
    /// JSON object in the request body
    Json,
    /// Query string appended to the URL
    Url,
    /// `application/x-www-form-urlencoded` request body
    Form,
    /// Opaque encoder, never merged with other baskets
    Custom(CustomEncoding),
}

impl ParameterEncoding {
    pub fn custom<F>(encode: F) -> Self
    where
        F: Fn(WireRequest, &ParameterMap) -> Result<WireRequest, BoxError> + Send + Sync + 'static,
    {
        Self::Custom(CustomEncoding::new(encode))
    }
}

/// A group of parameters sharing one encoding.
#[derive(Clone, Debug)]
pub struct Parameters {
    encoding: ParameterEncoding,
    parameters: ParameterMap,
}

impl Parameters {
    #[must_use]
    pub fn new(encoding: ParameterEncoding) -> Self {
        Self {
            encoding,
            parameters: ParameterMap::new(),
        }
    }

    #[must_use]
    pub fn json() -> Self {
        Self::new(ParameterEncoding::Json)
    }

    #[must_use]
    pub fn url() -> Self {
        Self::new(ParameterEncoding::Url)
    }

    #[must_use]
    pub fn form() -> Self {
        Self::new(ParameterEncoding::Form)
    }

    /// Basket encoded by `encode` instead of a built-in encoding.
    pub fn custom<F>(encode: F) -> Self
    where
        F: Fn(WireRequest, &ParameterMap) -> Result<WireRequest, BoxError> + Send + Sync + 'static,
    {
        Self::new(ParameterEncoding::custom(encode))
    }

    /// Add or replace a single parameter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Add or replace every parameter in `parameters`.
    #[must_use]
    pub fn with_map(mut self, parameters: ParameterMap) -> Self {
        self.parameters.extend(parameters);
        self
    }

    #[must_use]
    pub fn encoding(&self) -> &ParameterEncoding {
        &self.encoding
    }

    #[must_use]
    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Write this basket into `request`.
    pub(crate) fn encode(&self, request: WireRequest) -> Result<WireRequest, HttpError> {
        match &self.encoding {
            ParameterEncoding::Json => encode_json(request, &self.parameters),
            ParameterEncoding::Url => encode_query(request, &self.parameters),
            ParameterEncoding::Form => encode_form(request, &self.parameters),
            ParameterEncoding::Custom(custom) => {
                (custom.0)(request, &self.parameters).map_err(HttpError::CustomEncoding)
            }
        }
    }
}

/// Merge two ordered basket lists, `overrides` winning over `base`.
///
/// Every basket of `base`, then every basket of `overrides`, is folded into
/// one accumulator per fixed encoding; a later key replaces an earlier one.
/// The result lists the JSON basket, the URL basket and the form basket
/// (each only when non-empty), followed by all custom baskets in the order
/// they were encountered. Encoders may be stateful, so this order is stable.
#[must_use]
pub fn merge_parameters(base: &[Parameters], overrides: &[Parameters]) -> Vec<Parameters> {
    let mut json = ParameterMap::new();
    let mut url = ParameterMap::new();
    let mut form = ParameterMap::new();
    let mut custom = Vec::new();

    for basket in base.iter().chain(overrides) {
        let target = match basket.encoding {
            ParameterEncoding::Json => &mut json,
            ParameterEncoding::Url => &mut url,
            ParameterEncoding::Form => &mut form,
            ParameterEncoding::Custom(_) => {
                custom.push(basket.clone());
                continue;
            }
        };
        target.extend(
            basket
                .parameters
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
    }

    let fixed = [
        (ParameterEncoding::Json, json),
        (ParameterEncoding::Url, url),
        (ParameterEncoding::Form, form),
    ];

    let mut merged: Vec<Parameters> = fixed
        .into_iter()
        .filter(|(_, parameters)| !parameters.is_empty())
        .map(|(encoding, parameters)| Parameters {
            encoding,
            parameters,
        })
        .collect();
    merged.extend(custom);
    merged
}

fn encode_json(mut request: WireRequest, parameters: &ParameterMap) -> Result<WireRequest, HttpError> {
    let body = serde_json::to_vec(parameters)?;
    set_default_content_type(&mut request, "application/json");
    *request.body_mut() = Bytes::from(body);
    Ok(request)
}

fn encode_form(mut request: WireRequest, parameters: &ParameterMap) -> Result<WireRequest, HttpError> {
    let body = serde_urlencoded::to_string(query_pairs(parameters))?;
    set_default_content_type(&mut request, "application/x-www-form-urlencoded; charset=utf-8");
    *request.body_mut() = Bytes::from(body);
    Ok(request)
}

fn encode_query(mut request: WireRequest, parameters: &ParameterMap) -> Result<WireRequest, HttpError> {
    let encoded = serde_urlencoded::to_string(query_pairs(parameters))?;
    if encoded.is_empty() {
        return Ok(request);
    }

    let path_and_query = match request.uri().path_and_query() {
        Some(current) => match current.query() {
            Some(query) if !query.is_empty() => {
                format!("{}?{query}&{encoded}", current.path())
            }
            _ => format!("{}?{encoded}", current.path()),
        },
        None => format!("/?{encoded}"),
    };

    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query).map_err(|e| HttpError::RequestBuild(e.into()))?,
    );
    *request.uri_mut() = http::Uri::from_parts(parts).map_err(|e| HttpError::RequestBuild(e.into()))?;
    Ok(request)
}

fn set_default_content_type(request: &mut WireRequest, content_type: &'static str) {
    if !request.headers().contains_key(CONTENT_TYPE) {
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

/// Flatten parameters into `key=value` pairs, keys sorted.
///
/// Arrays expand to `key[]`, objects to `key[sub]`, `null` to an empty value.
pub fn query_pairs(parameters: &ParameterMap) -> Vec<(String, String)> {
    let mut keys: Vec<&String> = parameters.keys().collect();
    keys.sort();

    let mut pairs = Vec::new();
    for key in keys {
        if let Some(value) = parameters.get(key) {
            push_components(key.clone(), value, &mut pairs);
        }
    }
    pairs
}

fn push_components(key: String, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            let mut nested: Vec<(&String, &Value)> = map.iter().collect();
            nested.sort_by(|a, b| a.0.cmp(b.0));
            for (nested_key, nested_value) in nested {
                push_components(format!("{key}[{nested_key}]"), nested_value, pairs);
            }
        }
        Value::Array(items) => {
            for item in items {
                push_components(format!("{key}[]"), item, pairs);
            }
        }
        Value::String(text) => pairs.push((key, text.clone())),
        Value::Null => pairs.push((key, String::new())),
        Value::Bool(_) | Value::Number(_) => pairs.push((key, value.to_string())),
    }
}
