// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request preparation helpers
//!
//! Everything that shapes the outgoing request *before* the `proxyReq`
//! hooks see it lives here: which paths are proxied at all, how the path is
//! rewritten, and which headers travel upstream.


use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use reqwest::header::{CONNECTION, HOST, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, scalar};
use crate::core::ResolvedTarget;
use crate::server::HostRequest;
use crate::{debug_fmt, trace_fmt};

/// Headers that only make sense on a single connection.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including those named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP_HEADERS.iter().copied().chain(listed.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

/// Copy of `headers` without hop-by-hop headers.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut copy = headers.clone();
    strip_hop_by_hop(&mut copy);
    copy
}

/// Point the `Host` header at the target.
pub fn change_origin(headers: &mut HeaderMap, target: &ResolvedTarget) {
    match HeaderValue::from_str(&target.host_header()) {
        Ok(value) => {
            headers.insert(HOST, value);
        }
        Err(e) => debug_fmt!("ChangeOrigin", "cannot use '{}' as host header: {}", target.host_header(), e),
    }
}

/// Add `x-forwarded-{for,port,proto,host}`.  `x-forwarded-for` is appended
/// to, the others are only set when the client did not send them.
pub fn append_forwarded_headers(headers: &mut HeaderMap, req: &HostRequest) {
    let proto = req.uri.scheme_str().unwrap_or("http");
    let host = req.host().map(str::to_string);
    let port = host
        .as_deref()
        .and_then(|h| h.rsplit_once(':'))
        .and_then(|(_, p)| p.parse::<u16>().ok())
        .unwrap_or(if proto == "https" { 443 } else { 80 });

    if let Some(ip) = req.context.client_ip.as_deref() {
        let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        insert_header(headers, "x-forwarded-for", &value);
    }

    if !headers.contains_key("x-forwarded-port") {
        insert_header(headers, "x-forwarded-port", &port.to_string());
    }
    if !headers.contains_key("x-forwarded-proto") {
        insert_header(headers, "x-forwarded-proto", proto);
    }
    if let Some(host) = host {
        if !headers.contains_key("x-forwarded-host") {
            insert_header(headers, "x-forwarded-host", &host);
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Decides which request paths the middleware proxies.
///
/// * `"/api"` – prefix match
/// * `"/api/**/*.json"` – glob (`*` does not cross `/`)
/// * `"!/api/private/**"` – exclusion, prefix or glob
///
/// An empty filter proxies everything.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    prefixes: Vec<String>,
    globs: Option<GlobSet>,
    excluded_prefixes: Vec<String>,
    excluded_globs: Option<GlobSet>,
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn build_globset(patterns: &[&str]) -> Result<Option<GlobSet>, ConfigError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ConfigError::ParseError(format!("invalid path filter '{pattern}': {e}")))?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| ConfigError::ParseError(format!("invalid path filter: {e}")))
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let mut prefixes = Vec::new();
        let mut globs = Vec::new();
        let mut excluded_prefixes = Vec::new();
        let mut excluded_globs = Vec::new();

        for pattern in patterns.iter().map(AsRef::as_ref) {
            let (negated, pattern) = match pattern.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, pattern),
            };
            if pattern.is_empty() {
                return Err(ConfigError::ParseError("empty path filter pattern".to_string()));
            }

            match (negated, is_glob(pattern)) {
                (false, false) => prefixes.push(pattern.to_string()),
                (false, true) => globs.push(pattern),
                (true, false) => excluded_prefixes.push(pattern.to_string()),
                (true, true) => excluded_globs.push(pattern),
            }
        }

        Ok(Self {
            prefixes,
            globs: build_globset(&globs)?,
            excluded_prefixes,
            excluded_globs: build_globset(&excluded_globs)?,
        })
    }

    /// Whether a request for `path` should be proxied.
    pub fn matches(&self, path: &str) -> bool {
        let excluded = self.excluded_prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.excluded_globs.as_ref().is_some_and(|g| g.is_match(path));
        if excluded {
            return false;
        }

        let has_includes = !self.prefixes.is_empty() || self.globs.is_some();
        !has_includes
            || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.globs.as_ref().is_some_and(|g| g.is_match(path))
    }
}

/// One path rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRewriteRule {
    /// The pattern to match (regex)
    #[serde(deserialize_with = "scalar::string")]
    pub pattern: String,
    /// The replacement, may use `$1`-style captures
    #[serde(deserialize_with = "scalar::string")]
    pub replacement: String,
}

impl PathRewriteRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

/// Rewrites the forwarded path.  The first rule whose pattern matches wins.
#[derive(Debug, Clone, Default)]
pub struct PathRewriter {
    rules: Vec<(Regex, String)>,
}

impl PathRewriter {
    pub fn new(rules: &[PathRewriteRule]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| (regex, rule.replacement.clone()))
                    .map_err(|e| {
                        ConfigError::ParseError(format!("invalid path rewrite pattern '{}': {e}", rule.pattern))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the first matching rule to `path`.
    pub fn rewrite(&self, path: &str) -> String {
        for (regex, replacement) in &self.rules {
            if regex.is_match(path) {
                let rewritten = regex.replace(path, replacement.as_str()).into_owned();
                debug_fmt!("PathRewriter", "Rewriting path from {} to {}", path, rewritten);
                return rewritten;
            }
        }

        trace_fmt!("PathRewriter", "No rewrite rule matched {}", path);
        path.to_string()
    }
}
