use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{OfflineError, Result};

/// Identity a cache entry is stored under: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A request routed to the manager by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: Url,
    /// Header names are stored lowercase.
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// Build a GET for a root-relative path (or absolute URL) against `origin`.
    pub fn for_path(origin: &Url, path: &str) -> Result<Self> {
        let url = origin
            .join(path)
            .map_err(|e| OfflineError::InvalidUrl(format!("{}: {}", path, e)))?;
        Ok(Self::get(url))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    pub fn key(&self) -> RequestKey {
        let mut url = self.url.clone();
        url.set_fragment(None);
        RequestKey {
            method: self.method.clone(),
            url: url.to_string(),
        }
    }
}
