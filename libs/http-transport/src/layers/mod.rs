//! Tower middleware applied by every [`Session`](crate::Session).

mod default_headers;

pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
