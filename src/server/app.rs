// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The host side: request/response objects, the middleware chain and the
//! error-middleware chain.
//!
//! A request walks the middleware chain in order.  Each middleware either
//! passes control on ([`Flow::Next`]), finishes the request
//! ([`Flow::Done`]) or fails with an error.  A failure skips the remaining
//! middleware and enters the error chain, where every [`ErrorHandler`] may
//! handle the error or pass it on.  Whatever nobody handles ends in a plain
//! `500`, a request nobody answers ends in a `404`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::http::request::Parts;
use hyper::http::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};
use reqwest::Body;
use reqwest::header::{HOST, HeaderName, HeaderValue};

use crate::core::{BoxError, RequestContext};
use crate::{debug_fmt, error_fmt};

/// The inbound request as the host framework sees it.
#[derive(Debug)]
pub struct HostRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub context: RequestContext,
    body: Option<Body>,
}

impl HostRequest {
    /// Create a request without headers or body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            context: RequestContext::default(),
            body: None,
        }
    }

    /// Build a request from already split parts.  An empty body is stored
    /// as no body at all.
    pub fn from_parts(parts: Parts, body: Option<Body>) -> Self {
        let body = body.filter(|b| b.as_bytes().is_none_or(|bytes| !bytes.is_empty()));
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            context: RequestContext::default(),
            body,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Path with the query string, as the client sent it.
    pub fn path_and_query(&self) -> &str {
        self.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Host` header, or the URI authority when the header is missing.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Take the body out of the request.  Later calls return `None`.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Set a header, builder style.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, BoxError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    /// Set the body, builder style.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl From<Request<Body>> for HostRequest {
    fn from(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        Self::from_parts(parts, Some(body))
    }
}

/// The response the host framework will write back to the client.
#[derive(Debug)]
pub struct HostResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Body>,
    finished: bool,
}

impl Default for HostResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            finished: false,
        }
    }
}

impl HostResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set (replace) a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self, BoxError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    /// Write the body and finish the response.
    pub fn send(&mut self, body: impl Into<Body>) {
        self.body = Some(body.into());
        self.finished = true;
    }

    /// Finish the response without a body.
    pub fn end(&mut self) {
        self.finished = true;
    }

    /// Whether somebody already answered the request.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Turn into a wire response.
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(self.body.unwrap_or_else(|| Body::from("")));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// What a middleware wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Hand the request to the next middleware
    Next,
    /// The request is handled
    Done,
}

/// A stage of the host's request pipeline.
///
/// Returning `Err` is the equivalent of calling `next(error)`: the error
/// skips the remaining middleware and enters the error chain.
#[async_trait]
pub trait Middleware: fmt::Debug + Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "middleware"
    }

    async fn handle(&self, req: &mut HostRequest, res: &mut HostResponse) -> Result<Flow, BoxError>;
}

/// A stage of the host's error pipeline.
///
/// `Ok(())` means the error is handled.  `Err` passes an error (usually the
/// same one) to the next handler.
#[async_trait]
pub trait ErrorHandler: fmt::Debug + Send + Sync {
    async fn handle_error(
        &self,
        error: BoxError,
        req: &mut HostRequest,
        res: &mut HostResponse,
    ) -> Result<(), BoxError>;
}

/// Middleware from a synchronous closure.
pub struct MiddlewareFn<F> {
    name: String,
    f: F,
}

impl<F> fmt::Debug for MiddlewareFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareFn").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: Fn(&mut HostRequest, &mut HostResponse) -> Result<Flow, BoxError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, req: &mut HostRequest, res: &mut HostResponse) -> Result<Flow, BoxError> {
        (self.f)(req, res)
    }
}

/// Error handler from a synchronous closure.
pub struct ErrorHandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for ErrorHandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorHandlerFn")
    }
}

#[async_trait]
impl<F> ErrorHandler for ErrorHandlerFn<F>
where
    F: Fn(BoxError, &HostRequest, &mut HostResponse) -> Result<(), BoxError> + Send + Sync,
{
    async fn handle_error(
        &self,
        error: BoxError,
        req: &mut HostRequest,
        res: &mut HostResponse,
    ) -> Result<(), BoxError> {
        (self.f)(error, req, res)
    }
}

/// An ordered middleware chain plus an ordered error chain.
#[derive(Debug, Clone, Default)]
pub struct App {
    middleware: Vec<Arc<dyn Middleware>>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware.
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append a closure middleware.
    pub fn with_middleware_fn<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&mut HostRequest, &mut HostResponse) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        self.with_middleware(MiddlewareFn {
            name: name.to_string(),
            f,
        })
    }

    /// Append an error handler.
    pub fn with_error_handler<H: ErrorHandler + 'static>(mut self, handler: H) -> Self {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Append a closure error handler.
    pub fn with_error_handler_fn<F>(self, f: F) -> Self
    where
        F: Fn(BoxError, &HostRequest, &mut HostResponse) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.with_error_handler(ErrorHandlerFn { f })
    }

    /// Run a request through both chains.
    pub async fn dispatch(&self, req: &mut HostRequest) -> HostResponse {
        let mut res = HostResponse::new();

        for middleware in &self.middleware {
            match middleware.handle(req, &mut res).await {
                Ok(Flow::Next) => continue,
                Ok(Flow::Done) => return res,
                Err(error) => {
                    debug_fmt!(
                        "App",
                        "[{}] {} failed {} {}: {}",
                        req.context.request_id,
                        middleware.name(),
                        req.method,
                        req.path(),
                        error
                    );
                    self.handle_error(error, req, &mut res).await;
                    return res;
                }
            }
        }

        if !res.is_finished() {
            let body = format!("Cannot {} {}", req.method, req.path());
            res.set_status(StatusCode::NOT_FOUND).send(body);
        }
        res
    }

    /// Convenience wrapper around [`App::dispatch`] for wire requests.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let mut req = HostRequest::from(request);
        self.dispatch(&mut req).await.into_response()
    }

    async fn handle_error(&self, mut error: BoxError, req: &mut HostRequest, res: &mut HostResponse) {
        for handler in &self.error_handlers {
            match handler.handle_error(error, req, res).await {
                Ok(()) => return,
                Err(next) => error = next,
            }
        }

        error_fmt!(
            "App",
            "[{}] Unhandled error for {} {}: {}",
            req.context.request_id,
            req.method,
            req.path(),
            error
        );

        if !res.is_finished() {
            res.headers_mut().clear();
            res.set_status(StatusCode::INTERNAL_SERVER_ERROR)
                .send("Internal Server Error");
        }
    }
}
