use serde::{Deserialize, Serialize};

use super::{FetchRequest, RequestKey, Response};

/// A stored response plus the request headers its `Vary` header names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestKey,
    /// Lowercase name, value if the request carried it.
    pub vary_headers: Vec<(String, Option<String>)>,
    pub response: Response,
}

impl CacheEntry {
    pub fn new(request: &FetchRequest, response: Response) -> Self {
        let vary_headers = response
            .vary()
            .unwrap_or_default()
            .into_iter()
            .map(|name| {
                let value = request.header(&name).map(str::to_string);
                (name, value)
            })
            .collect();

        Self {
            key: request.key(),
            vary_headers,
            response,
        }
    }

    /// Whether this entry answers `request`, honouring `Vary`.
    pub fn matches(&self, request: &FetchRequest) -> bool {
        if self.key != request.key() {
            return false;
        }
        if self.vary_headers.iter().any(|(name, _)| name == "*") {
            return false;
        }
        self.vary_headers
            .iter()
            .all(|(name, value)| request.header(name) == value.as_deref())
    }
}
