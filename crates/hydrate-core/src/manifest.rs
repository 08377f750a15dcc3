//! Asset manifest: the literal request list an install must populate.
//!
//! Build output names often carry content hashes (`main.3f2a1c.js`), so the
//! configured manifest may contain `*` in the final path segment. Those
//! patterns are expanded against the build directory by
//! [`AssetManifest::resolve_patterns`] before the manager ever sees them;
//! [`AssetManifest::new`] accepts literal entries only.

use std::collections::HashSet;
use std::path::Path;

use reqwest::Url;
use tracing::debug;

use crate::cache::FetchRequest;
use crate::error::{OfflineError, Result};

/// Assets the shell needs to boot offline.
pub const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "/favicon.ico",
    "/static/js/bundle.js",
    "/static/js/main.*.js",
    "/static/css/main.*.css",
];

const WILDCARD: char = '*';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    entries: Vec<String>,
}

impl AssetManifest {
    /// Validate a list of literal request identities.
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<String> = entries.into_iter().map(Into::into).collect();
        if entries.is_empty() {
            return Err(OfflineError::Manifest("manifest is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.contains(WILDCARD) {
                return Err(OfflineError::Manifest(format!(
                    "unresolved wildcard entry {}",
                    entry
                )));
            }
            if !entry.starts_with('/') && Url::parse(entry).is_err() {
                return Err(OfflineError::Manifest(format!(
                    "entry must be root-relative or an absolute URL: {}",
                    entry
                )));
            }
            if !seen.insert(entry.as_str()) {
                return Err(OfflineError::Manifest(format!("duplicate entry {}", entry)));
            }
        }

        Ok(Self { entries })
    }

    /// Expand wildcard entries against the files in `build_dir`.
    ///
    /// Literal entries pass through untouched. A pattern must match at least
    /// one file; matches are added in sorted order.
    pub fn resolve_patterns<S: AsRef<str>>(patterns: &[S], build_dir: &Path) -> Result<Self> {
        let mut resolved = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if !pattern.contains(WILDCARD) {
                resolved.push(pattern.to_string());
                continue;
            }

            let matches = expand_pattern(pattern, build_dir)?;
            if matches.is_empty() {
                return Err(OfflineError::Manifest(format!(
                    "{} matched nothing in {}",
                    pattern,
                    build_dir.display()
                )));
            }
            debug!(pattern, count = matches.len(), "Resolved manifest pattern");
            resolved.extend(matches);
        }
        Self::new(resolved)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// GET requests for every entry, resolved against `origin`.
    pub fn requests(&self, origin: &Url) -> Result<Vec<FetchRequest>> {
        self.entries
            .iter()
            .map(|entry| FetchRequest::for_path(origin, entry))
            .collect()
    }
}

fn expand_pattern(pattern: &str, build_dir: &Path) -> Result<Vec<String>> {
    let (dir, file_pattern) = match pattern.rfind('/') {
        Some(idx) => (&pattern[..idx], &pattern[idx + 1..]),
        None => ("", pattern),
    };
    if dir.contains(WILDCARD) {
        return Err(OfflineError::Manifest(format!(
            "wildcards are only supported in the file name: {}",
            pattern
        )));
    }

    let search_dir = build_dir.join(dir.trim_start_matches('/'));
    if !search_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(&search_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if glob_match(file_pattern, name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    Ok(names
        .into_iter()
        .map(|name| format!("{}/{}", dir, name))
        .collect())
}

/// `*` matches any run of characters (possibly empty); everything else is literal.
fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split(WILDCARD).collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return name.is_empty(),
    };
    let Some(mut remaining) = name.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}
