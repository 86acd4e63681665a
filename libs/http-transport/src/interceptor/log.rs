use super::{RawResponse, RequestInterceptor, ResponseInterceptor};
use crate::request::WireRequest;
use crate::text::truncated_default;
use http::header::COOKIE;
use std::fmt;
use std::sync::Arc;

/// Sink for rendered log messages.
pub type LogPrinter = Arc<dyn Fn(&str) + Send + Sync>;

fn tracing_printer() -> LogPrinter {
    Arc::new(|message: &str| tracing::info!(target: "http_transport::log", "{message}"))
}

/// How much of a request is logged. Each level includes the previous ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestLogLevel {
    Nothing,
    /// Method and URL
    #[default]
    Url,
    /// Plus an equivalent `curl` command
    Curl,
    Headers,
    /// Plus the body, truncated
    Everything,
}

/// How much of a response is logged. Each level includes the previous ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponseLogLevel {
    Nothing,
    /// Status line and origin URL
    #[default]
    Status,
    Headers,
    /// Plus the body, truncated
    Everything,
}

/// Response headers that can be selected for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeader {
    CacheControl,
    ContentEncoding,
    ContentLanguage,
    ContentLength,
    ContentMd5,
    ContentType,
    LastModified,
    Server,
    SetCookie,
    Upgrade,
}

impl ResponseHeader {
    /// Lowercase header name as stored in a `HeaderMap`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheControl => "cache-control",
            Self::ContentEncoding => "content-encoding",
            Self::ContentLanguage => "content-language",
            Self::ContentLength => "content-length",
            Self::ContentMd5 => "content-md5",
            Self::ContentType => "content-type",
            Self::LastModified => "last-modified",
            Self::Server => "server",
            Self::SetCookie => "set-cookie",
            Self::Upgrade => "upgrade",
        }
    }
}

/// Logs outgoing requests at the configured level.
pub struct LogRequestInterceptor {
    level: RequestLogLevel,
    printer: LogPrinter,
}

impl LogRequestInterceptor {
    #[must_use]
    pub fn new(level: RequestLogLevel) -> Self {
        Self {
            level,
            printer: tracing_printer(),
        }
    }

    /// Send rendered messages to `printer` instead of `tracing`.
    #[must_use]
    pub fn with_printer(mut self, printer: LogPrinter) -> Self {
        self.printer = printer;
        self
    }

    #[must_use]
    pub fn level(&self) -> RequestLogLevel {
        self.level
    }

    fn render(&self, request: &WireRequest) -> String {
        let mut lines = vec![format!("[REQUEST] {} {}", request.method(), request.uri())];
        if self.level >= RequestLogLevel::Curl {
            lines.push(curl_command(request));
        }
        if self.level >= RequestLogLevel::Headers {
            lines.push("Headers:".to_owned());
            for (name, value) in request.headers() {
                lines.push(format!("{name}: {}", String::from_utf8_lossy(value.as_bytes())));
            }
        }
        if self.level >= RequestLogLevel::Everything && !request.body().is_empty() {
            lines.push("Body:".to_owned());
            lines.push(render_body(request.body()));
        }
        lines.join("\n")
    }
}

impl Default for LogRequestInterceptor {
    fn default() -> Self {
        Self::new(RequestLogLevel::default())
    }
}

impl fmt::Debug for LogRequestInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRequestInterceptor")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl RequestInterceptor for LogRequestInterceptor {
    fn intercept(&self, request: WireRequest) -> WireRequest {
        if self.level > RequestLogLevel::Nothing {
            (self.printer)(&self.render(&request));
        }
        request
    }

    fn name(&self) -> &str {
        "log_request"
    }
}

/// Logs raw responses at the configured level.
pub struct LogResponseInterceptor {
    level: ResponseLogLevel,
    header_filter: Option<Vec<ResponseHeader>>,
    printer: LogPrinter,
}

impl LogResponseInterceptor {
    /// Headers kept by the default filter.
    pub const DEFAULT_HEADER_FILTER: [ResponseHeader; 3] = [
        ResponseHeader::ContentType,
        ResponseHeader::LastModified,
        ResponseHeader::SetCookie,
    ];

    #[must_use]
    pub fn new(level: ResponseLogLevel) -> Self {
        Self {
            level,
            header_filter: Some(Self::DEFAULT_HEADER_FILTER.to_vec()),
            printer: tracing_printer(),
        }
    }

    /// Only log the listed headers.
    #[must_use]
    pub fn with_header_filter(mut self, headers: Vec<ResponseHeader>) -> Self {
        self.header_filter = Some(headers);
        self
    }

    /// Log every header.
    #[must_use]
    pub fn without_header_filter(mut self) -> Self {
        self.header_filter = None;
        self
    }

    #[must_use]
    pub fn with_printer(mut self, printer: LogPrinter) -> Self {
        self.printer = printer;
        self
    }

    #[must_use]
    pub fn is_filtering_headers(&self) -> bool {
        self.header_filter.is_some()
    }

    fn keeps(&self, name: &str) -> bool {
        self.header_filter
            .as_ref()
            .is_none_or(|filter| filter.iter().any(|header| header.as_str() == name))
    }

    fn render(&self, response: &RawResponse) -> Option<String> {
        let Some(meta) = &response.response else {
            return response
                .error
                .as_ref()
                .map(|error| format!("[RESPONSE] failed: {error}"));
        };

        let mut lines = vec![
            format!("[RESPONSE] {}", meta.status),
            format!("From: {}", meta.url),
        ];
        if self.level >= ResponseLogLevel::Headers {
            lines.push("Headers:".to_owned());
            for (name, value) in &meta.headers {
                if self.keeps(name.as_str()) {
                    lines.push(format!("{name}: {}", String::from_utf8_lossy(value.as_bytes())));
                }
            }
        }
        if self.level >= ResponseLogLevel::Everything
            && let Some(body) = response.body.as_ref().filter(|body| !body.is_empty())
        {
            lines.push("Body:".to_owned());
            lines.push(render_body(body));
        }
        Some(lines.join("\n"))
    }
}

impl Default for LogResponseInterceptor {
    fn default() -> Self {
        Self::new(ResponseLogLevel::default())
    }
}

impl fmt::Debug for LogResponseInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogResponseInterceptor")
            .field("level", &self.level)
            .field("header_filter", &self.header_filter)
            .finish_non_exhaustive()
    }
}

impl ResponseInterceptor for LogResponseInterceptor {
    fn intercept(&self, response: RawResponse) -> RawResponse {
        if self.level > ResponseLogLevel::Nothing
            && let Some(message) = self.render(&response)
        {
            (self.printer)(&message);
        }
        response
    }

    fn name(&self) -> &str {
        "log_response"
    }
}

/// Pretty JSON when the body parses, lossy UTF-8 otherwise; truncated.
fn render_body(body: &[u8]) -> String {
    let text = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    truncated_default(&text)
}

/// Equivalent `curl` invocation. Cookies go through `-b`, not `-H`.
fn curl_command(request: &WireRequest) -> String {
    let mut base = format!("curl '{}'", request.uri());
    if request.method() == http::Method::HEAD {
        base.push_str(" --head");
    }

    let mut parts = vec![base];
    if request.method() != http::Method::GET && request.method() != http::Method::HEAD {
        parts.push(format!("-X {}", request.method()));
    }
    for (name, value) in request.headers() {
        let value = String::from_utf8_lossy(value.as_bytes());
        if name == COOKIE {
            parts.push(format!("-b '{value}'"));
        } else {
            parts.push(format!("-H '{name}: {value}'"));
        }
    }
    if !request.body().is_empty() {
        let body = truncated_default(&String::from_utf8_lossy(request.body()));
        parts.push(format!("-d '{body}'"));
    }
    parts.join(" \\\n\t")
}
