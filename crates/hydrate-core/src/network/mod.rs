//! Network access for cache misses and installs.
//!
//! The manager only sees the `Network` trait; `HttpNetwork` is the
//! reqwest-backed implementation used by the binary.

pub mod http;

use async_trait::async_trait;

use crate::cache::{FetchRequest, Response};
use crate::error::Result;

pub use http::HttpNetwork;

#[async_trait]
pub trait Network: Send + Sync {
    /// Issue `request` and buffer the whole response.
    ///
    /// `Err` means the request never produced a response (offline, DNS,
    /// timeout). HTTP error statuses come back as `Ok`.
    async fn fetch(&self, request: &FetchRequest) -> Result<Response>;
}
