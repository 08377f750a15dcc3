use serde::{Deserialize, Serialize};

/// How the network classified a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response with readable status and headers.
    Basic,
    /// Cross-origin response the origin explicitly shared.
    Cors,
    /// Cross-origin response with hidden status and body.
    Opaque,
    /// Redirect that was not followed.
    OpaqueRedirect,
    Error,
}

/// A fully buffered response snapshot.
///
/// The body is read off the wire exactly once into an owned buffer, so a
/// `clone()` yields an independent copy that can be stored while the
/// original is handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub kind: ResponseKind,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16, kind: ResponseKind, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            status,
            kind,
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Status in the 200-299 range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Eligible for opportunistic population: exactly 200 and same-origin.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseKind::Basic
    }

    /// Header names listed in `Vary`, lowercased. `None` when absent.
    pub fn vary(&self) -> Option<Vec<String>> {
        self.header("vary").map(|v| {
            v.split(',')
                .map(|name| name.trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty())
                .collect()
        })
    }
}
