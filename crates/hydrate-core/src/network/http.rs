//! HTTP client for fetching application assets from the origin.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, Method, Url};
use tracing::debug;

use super::Network;
use crate::cache::{FetchRequest, Response, ResponseKind};
use crate::error::{OfflineError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP network bound to one application origin.
/// Clones share one connection pool.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Url,
}

impl HttpNetwork {
    pub fn new(origin: Url) -> Result<Self> {
        Self::with_timeout(origin, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(origin: Url, timeout: Duration) -> Result<Self> {
        // Redirects are surfaced as opaque responses, never followed.
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn classify(&self, url: &Url, status: u16) -> ResponseKind {
        if (300..400).contains(&status) {
            ResponseKind::OpaqueRedirect
        } else if url.origin() == self.origin.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| OfflineError::Network(format!("bad method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        // The body is read exactly once; callers clone the buffered value.
        let body = response.bytes().await?.to_vec();
        let kind = self.classify(&final_url, status);

        debug!(url = %final_url, status, kind = ?kind, bytes = body.len(), "Fetched from network");

        Ok(Response {
            url: final_url.to_string(),
            status,
            kind,
            headers,
            body,
        })
    }
}
