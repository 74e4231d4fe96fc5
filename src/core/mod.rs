// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – errors, targets, outgoing requests & upstream responses.
//!
//! Everything that physically moves through the proxy pipeline is defined
//! in this module.  No protocol-level logic lives here; that sits in
//! `transport` (IO) and `middleware` (behaviour).


use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Method, StatusCode, Url};
use thiserror::Error;

use crate::hooks::LifecycleEvent;

/// The error type the host framework's error channel carries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Message of every target resolution failure.
pub const NO_TARGET_MESSAGE: &str = "Must provide a proper URL as target";

/// What went wrong while talking to the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The connection to the upstream could not be established
    Connect,
    /// The upstream did not answer in time
    Timeout,
    /// The request could not be sent or the response head was invalid
    Request,
    /// The body could not be streamed
    Body,
}

/// Classifies a [`ProxyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No usable target could be determined for the request
    Resolution,
    /// The upstream could not be reached or read from
    Transport(TransportFailure),
    /// A lifecycle hook registered for the given event failed
    Hook(LifecycleEvent),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Resolution => write!(f, "resolution"),
            ErrorKind::Transport(failure) => write!(f, "transport ({failure:?})"),
            ErrorKind::Hook(event) => write!(f, "hook ({event})"),
        }
    }
}

/// The single error value produced while proxying a request.
///
/// Its `Display` output is the bare message, never prefixed, so that error
/// handlers further down the host pipeline see exactly the text produced by
/// the resolver, the transport or the failing hook.  One request produces
/// at most one value, which is moved into the host error channel.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ProxyError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ProxyError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// No target could be determined for the request.
    pub fn no_target() -> Self {
        Self::new(ErrorKind::Resolution, NO_TARGET_MESSAGE)
    }

    /// The upstream did not answer within `after`.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Transport(TransportFailure::Timeout),
            format!("request timed out after {after:?}"),
        )
    }

    /// A hook failed; the hook's own message is kept verbatim.
    pub fn hook(event: LifecycleEvent, source: BoxError) -> Self {
        Self {
            kind: ErrorKind::Hook(event),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The message, identical to the `Display` output.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_resolution(&self) -> bool {
        self.kind == ErrorKind::Resolution
    }

    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport(_))
    }

    pub fn is_hook(&self) -> bool {
        matches!(self.kind, ErrorKind::Hook(_))
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        let failure = if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_connect() {
            TransportFailure::Connect
        } else if err.is_body() || err.is_decode() {
            TransportFailure::Body
        } else {
            TransportFailure::Request
        };

        Self::new(ErrorKind::Transport(failure), err.to_string()).with_source(err)
    }
}

/// The upstream origin chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    url: Url,
}

impl ResolvedTarget {
    /// Parse a target such as `http://localhost:3000` or `https://api.example.com/v1`.
    ///
    /// Anything that is not an absolute `http`/`https` URL with a host fails
    /// with the resolution error.
    pub fn parse(raw: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(raw.trim()).map_err(|e| ProxyError::no_target().with_source(e))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::no_target()
                    .with_source(format!("unsupported target scheme '{other}' in '{raw}'")));
            }
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(ProxyError::no_target().with_source(format!("target '{raw}' has no host")));
        }

        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The port, falling back to the scheme's default.
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// `scheme://host[:port]`, the port only when it is not the default one.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// Value for the `Host` header when the origin is changed.
    pub fn host_header(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    /// Path component of the target, prepended to every forwarded path.
    pub fn base_path(&self) -> &str {
        self.url.path()
    }

    /// Build the upstream URL for a request path (which may carry a query).
    pub fn url_for(&self, path_and_query: &str) -> Url {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let base = self.url.path().trim_end_matches('/');
        let joined = match (base.is_empty(), path.is_empty()) {
            (true, true) => "/".to_string(),
            (false, true) => base.to_string(),
            (_, false) if path.starts_with('/') => format!("{base}{path}"),
            (_, false) => format!("{base}/{path}"),
        };

        let mut url = self.url.clone();
        url.set_path(&joined);
        url.set_query(query.filter(|q| !q.is_empty()));
        url
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url.as_str().trim_end_matches('/'))
    }
}

fn set_header_value(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), BoxError> {
    let name = HeaderName::from_bytes(name.as_bytes())?;
    let value = HeaderValue::from_str(value)?;
    headers.insert(name, value);
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The request about to be sent upstream.
///
/// `proxyReq` hooks receive it mutably; whatever they leave behind is what
/// the transport sends.
#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    /// Path plus optional `?query`, relative to the target's base path
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    target: ResolvedTarget,
}

impl OutgoingRequest {
    /// Create a request without headers or body.
    pub fn new(method: Method, path: impl Into<String>, target: ResolvedTarget) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            target,
        }
    }

    /// The target this request is sent to.
    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    /// The full upstream URL.
    pub fn url(&self) -> Url {
        self.target.url_for(&self.path)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    /// Set (replace) a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), BoxError> {
        set_header_value(&mut self.headers, name, value)
    }

    pub fn remove_header(&mut self, name: &str) -> Option<HeaderValue> {
        self.headers.remove(name)
    }

    /// Replace the body.  `content-length` follows the new body when its size
    /// is known and is dropped otherwise.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let body = body.into();
        match body.as_bytes().map(<[u8]>::len) {
            Some(len) => {
                self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
            None => {
                self.headers.remove(CONTENT_LENGTH);
            }
        }
        self.body = Some(body);
    }
}

/// The response received from the upstream, before it is written back.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    /// The upstream URL that produced this response
    pub url: Url,
}

impl ProxyResponse {
    /// Create an empty response.
    pub fn new(status: StatusCode, url: Url) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::from(""),
            url,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    /// Set (replace) a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), BoxError> {
        set_header_value(&mut self.headers, name, value)
    }

    pub fn remove_header(&mut self, name: &str) -> Option<HeaderValue> {
        self.headers.remove(name)
    }

    /// Replace the body written back to the client.  `content-length`
    /// follows the new body when its size is known and is dropped otherwise.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let body = body.into();
        match body.as_bytes().map(<[u8]>::len) {
            Some(len) => {
                self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
            None => {
                self.headers.remove(CONTENT_LENGTH);
            }
        }
        self.body = body;
    }
}

/// Context data attached to a host request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique id used to correlate log lines
    pub request_id: String,
    /// The original client's IP address
    pub client_ip: Option<String>,
    /// The start time of the request
    pub start_time: Instant,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            client_ip: None,
            start_time: Instant::now(),
        }
    }
}
