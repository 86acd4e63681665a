use super::{RawResponse, ResponseInterceptor};
use serde_json::{Map, Value};

/// Enriches a failed exchange with what the server said about it.
///
/// Only acts when the raw response already carries an error. The new error
/// gets the status code, the raw body, its UTF-8 text and parsed JSON, and an
/// error code and message taken from the first matching candidate key. Keys
/// are probed at the JSON root and then inside a nested `"error"` object,
/// whose values win.
#[derive(Debug, Clone)]
pub struct ClarifyErrorInterceptor {
    code_keys: Vec<String>,
    message_keys: Vec<String>,
}

impl ClarifyErrorInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_keys(["code", "error_code"], ["message", "error_message"])
    }

    /// Probe custom candidate keys, in order.
    #[must_use]
    pub fn with_keys<C, M>(code_keys: C, message_keys: M) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            code_keys: code_keys.into_iter().map(Into::into).collect(),
            message_keys: message_keys.into_iter().map(Into::into).collect(),
        }
    }

    fn lookup(&self, object: &Map<String, Value>) -> (Option<String>, Option<String>) {
        (
            first_string(object, &self.code_keys),
            first_string(object, &self.message_keys),
        )
    }
}

impl Default for ClarifyErrorInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseInterceptor for ClarifyErrorInterceptor {
    fn intercept(&self, mut response: RawResponse) -> RawResponse {
        let Some(mut error) = response.error.take() else {
            return response;
        };

        if let Some(status) = response.status() {
            error = error.with_status(status);
        }

        if let Some(body) = &response.body {
            error = error.with_body(body.clone());
            if let Ok(text) = std::str::from_utf8(body) {
                error = error.with_body_string(text);
            }

            if let Ok(json) = serde_json::from_slice::<Value>(body) {
                if let Value::Object(root) = &json {
                    let (mut code, mut message) = self.lookup(root);
                    if let Some(Value::Object(nested)) = root.get("error") {
                        let (nested_code, nested_message) = self.lookup(nested);
                        code = nested_code.or(code);
                        message = nested_message.or(message);
                    }
                    if let Some(code) = code {
                        error = error.with_error_code(code);
                    }
                    if let Some(message) = message {
                        error = error.with_error_message(message);
                    }
                }
                error = error.with_body_json(json);
            }
        }

        response.error = Some(error);
        response
    }

    fn name(&self) -> &str {
        "clarify_error"
    }
}

fn first_string(object: &Map<String, Value>, keys: &[String]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(key))
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}
