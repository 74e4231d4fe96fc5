// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Target resolution.
//!
//! [`resolve`] decides which upstream receives a request.  A configured
//! [`TargetRouter`] is asked first; when it has no answer the static
//! `target` is used.
//!
//! ### Router strategies
//! | type          | configuration                     | example                                 |
//! |---------------|-----------------------------------|-----------------------------------------|
//! | `StaticTarget`| `target`                          | `"http://localhost:3000"`               |
//! | `FnRouter`    | code only                         | `\|req\| Some("http://a:1".into())`     |
//! | `TableRouter` | `router` (list of `match`/`target`)| `{"match": "api.local/v2", "target": …}`|


use std::fmt;

use hyper::http::{HeaderMap, Method};

use crate::config::ProxyConfig;
use crate::core::{BoxError, ProxyError, ResolvedTarget};
use crate::server::HostRequest;
use crate::{trace_fmt, warn_fmt};

/// The parts of a request a router may look at.
#[derive(Debug, Clone, Copy)]
pub struct RequestDescriptor<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    /// `Host` header or URI authority
    pub host: Option<&'a str>,
}

impl<'a> RequestDescriptor<'a> {
    pub fn from_request(req: &'a HostRequest) -> Self {
        Self {
            method: &req.method,
            path: req.path(),
            query: req.query(),
            headers: &req.headers,
            host: req.host(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host without a port.
    pub fn hostname(&self) -> Option<&'a str> {
        let host = self.host?;
        if host.starts_with('[') {
            return host.split_once(']').map(|(h, _)| &h[1..]);
        }
        Some(host.rsplit_once(':').map_or(host, |(h, _)| h))
    }
}

/// Picks a target per request.
///
/// `Ok(None)` means "no opinion"; resolution then falls back to the static
/// target.  Errors are treated the same way.
pub trait TargetRouter: fmt::Debug + Send + Sync {
    fn route(&self, req: &RequestDescriptor<'_>) -> Result<Option<String>, BoxError>;
}

/// Always answers with the same target.
#[derive(Debug, Clone)]
pub struct StaticTarget {
    target: String,
}

impl StaticTarget {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }
}

impl TargetRouter for StaticTarget {
    fn route(&self, _req: &RequestDescriptor<'_>) -> Result<Option<String>, BoxError> {
        Ok(Some(self.target.clone()))
    }
}

/// Routes with a closure.
pub struct FnRouter<F> {
    f: F,
}

impl<F> FnRouter<F>
where
    F: Fn(&RequestDescriptor<'_>) -> Result<Option<String>, BoxError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnRouter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnRouter")
    }
}

impl<F> TargetRouter for FnRouter<F>
where
    F: Fn(&RequestDescriptor<'_>) -> Result<Option<String>, BoxError> + Send + Sync,
{
    fn route(&self, req: &RequestDescriptor<'_>) -> Result<Option<String>, BoxError> {
        (self.f)(req)
    }
}

/// One proxy table rule.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TableRule {
    host: Option<String>,
    path: Option<String>,
    target: String,
}

impl TableRule {
    fn parse(key: &str, target: &str) -> Self {
        let (host, path) = match key.find('/') {
            Some(0) => (None, Some(key)),
            Some(idx) => (Some(&key[..idx]), Some(&key[idx..])),
            None => (Some(key), None),
        };

        Self {
            host: host.filter(|h| !h.is_empty()).map(str::to_ascii_lowercase),
            path: path.map(str::to_string),
            target: target.to_string(),
        }
    }

    fn matches(&self, req: &RequestDescriptor<'_>) -> bool {
        let host_ok = match &self.host {
            Some(host) => {
                req.host.is_some_and(|h| h.eq_ignore_ascii_case(host))
                    || req.hostname().is_some_and(|h| h.eq_ignore_ascii_case(host))
            }
            None => true,
        };
        let path_ok = self
            .path
            .as_deref()
            .is_none_or(|prefix| req.path.starts_with(prefix));

        host_ok && path_ok
    }
}

/// Proxy table router.
///
/// Keys are `"/path"` (path prefix), `"host"` (with or without port) or
/// `"host/path"`.  Hosts compare case-insensitively, paths as prefixes.
/// The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct TableRouter {
    rules: Vec<TableRule>,
}

impl TableRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.
    pub fn with_rule(mut self, key: &str, target: &str) -> Self {
        self.rules.push(TableRule::parse(key, target));
        self
    }

    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        entries
            .into_iter()
            .fold(Self::new(), |table, (key, target)| table.with_rule(key, target))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl TargetRouter for TableRouter {
    fn route(&self, req: &RequestDescriptor<'_>) -> Result<Option<String>, BoxError> {
        Ok(self
            .rules
            .iter()
            .find(|rule| rule.matches(req))
            .map(|rule| rule.target.clone()))
    }
}

/// Determine the upstream for `req`.
///
/// Router first, then the static target.  Anything that is not a usable
/// `http`/`https` origin fails with the resolution error.
pub fn resolve(config: &ProxyConfig, req: &HostRequest) -> Result<ResolvedTarget, ProxyError> {
    let routed = config.router.as_ref().and_then(|router| {
        let descriptor = RequestDescriptor::from_request(req);
        match router.route(&descriptor) {
            Ok(target) => target,
            Err(e) => {
                warn_fmt!(
                    "Resolver",
                    "[{}] router failed for {} {}: {}",
                    req.context.request_id,
                    req.method,
                    req.path(),
                    e
                );
                None
            }
        }
    });

    let candidate = routed.as_deref().or(config.target.as_deref());
    trace_fmt!(
        "Resolver",
        "[{}] candidate target for {}: {:?}",
        req.context.request_id,
        req.path(),
        candidate
    );

    match candidate {
        Some(raw) => ResolvedTarget::parse(raw),
        None => Err(ProxyError::no_target()),
    }
}
