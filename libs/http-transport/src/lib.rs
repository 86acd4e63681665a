#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport with interceptor chains
//!
//! This crate sends declaratively built requests through a hyper-based
//! session and hands back a single [`HttpResult`]:
//! - Requests inherit endpoint, headers, parameters and interceptors from a
//!   base request
//! - Parameters live in baskets per encoding (JSON body, query string, form
//!   body, custom encoders)
//! - Request and response interceptor chains (cookies, logging, error
//!   clarification, or any closure)
//! - Default validation of status code and content type
//! - A session-level retrier that coalesces credential refreshes
//! - Certificate pinning evaluated during every TLS handshake
//! - Async, blocking and callback-with-cancellation entry points
//!
//! # Example
//!
//! ```ignore
//! use http_transport::{HttpRequest, ParameterEncoding, Transport};
//!
//! let transport = Transport::new()?;
//!
//! let api = HttpRequest::get("https://api.example.com/v2")
//!     .with_header("accept", "application/json");
//! let users = HttpRequest::get("users")
//!     .with_parameter("page", 1, ParameterEncoding::Url)
//!     .based_on(&api);
//!
//! let page: UsersPage = transport.send(&users).await?.json()?;
//! ```

mod call;
mod config;
mod error;
mod interceptor;
mod layers;
mod request;
mod response;
mod retrier;
pub mod security;
mod session;
pub mod text;
mod tls;
mod transport;

pub use call::{HttpCall, Progress};
pub use config::{
    DEFAULT_SEMAPHORE_TIMEOUT_GAP, DEFAULT_USER_AGENT, SessionConfig, TlsRootConfig,
    TransportConfig, TransportSecurity,
};
pub use error::{BoxError, HttpError, InvalidUriKind, TransportError};
pub use interceptor::{
    AddCookieInterceptor, ClarifyErrorInterceptor, Cookie, CookieProvider, CookieStorage,
    LogPrinter, LogRequestInterceptor, LogResponseInterceptor, RawResponse,
    ReceivedCookieInterceptor, RequestInterceptor, RequestLogLevel, ResponseHeader,
    ResponseInterceptor, ResponseLogLevel, ResponseMeta,
};
pub use layers::{DefaultHeadersLayer, DefaultHeadersService};
pub use request::{
    CustomEncoding, DEFAULT_REQUEST_TIMEOUT, FileMultipart, HttpRequest, ParameterEncoding,
    ParameterMap, Parameters, UploadBody, WireRequest, merge_endpoint, merge_parameters,
};
pub use response::{HttpResponse, ResponseBody};
pub use retrier::{RefreshCompletion, Retrier, RetrierDelegate, RetryDecision};
pub use session::{Session, SessionBuilder};
pub use transport::{Transport, TransportBuilder};

/// Outcome of one call: a response, or an error enriched by the response
/// interceptors.
pub type HttpResult = Result<HttpResponse, TransportError>;
