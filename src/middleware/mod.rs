// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The proxy middleware.
//!
//! One request moves through these stages:
//!
//! 1. **Resolving** – [`resolve`] picks the target.
//! 2. **Forwarding** – the outgoing request is prepared, `proxyReq` hooks
//!    run, the [`Transport`] sends it, `proxyRes` hooks run and the upstream
//!    response is written back.
//! 3. **Failed** – `error` hooks run; unless one of them answered the
//!    request, the error is handed to the host's error chain through
//!    [`adapter::adapt`].
//!
//! Requests outside the configured `path_filter` are passed on untouched.

pub mod adapter;

#[cfg(test)]
mod tests;

pub use adapter::{ProxyErrorExt, adapt};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProxyConfig;
use crate::core::{BoxError, OutgoingRequest, ProxyError, ProxyResponse, ResolvedTarget};
use crate::filters::{append_forwarded_headers, change_origin, forwardable_headers, strip_hop_by_hop};
use crate::logging::is_structured;
use crate::logging::structured::with_request_context;
use crate::router::resolve;
use crate::server::{Flow, HostRequest, HostResponse, Middleware};
use crate::transport::{ReqwestTransport, Transport};
use crate::{debug_fmt, trace_fmt, warn_fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Resolving,
    Forwarding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Resolving => f.write_str("resolving"),
            Stage::Forwarding => f.write_str("forwarding"),
        }
    }
}

/// A failed request: where it failed, why, and the target if there was one.
struct Failure {
    stage: Stage,
    error: ProxyError,
    target: Option<ResolvedTarget>,
}

/// Reverse-proxy middleware for the host [`App`](crate::server::App).
#[derive(Debug, Clone)]
pub struct ProxyMiddleware {
    config: Arc<ProxyConfig>,
    transport: Arc<dyn Transport>,
}

/// Create the middleware with the default transport.
pub fn create_proxy_middleware(config: ProxyConfig) -> Result<ProxyMiddleware, ProxyError> {
    ProxyMiddleware::new(config)
}

impl ProxyMiddleware {
    /// Middleware using [`ReqwestTransport`] with the configured timeout.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let transport = ReqwestTransport::new(config.proxy_timeout)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Middleware using a custom transport.
    pub fn with_transport<T: Transport + 'static>(config: ProxyConfig, transport: T) -> Self {
        Self::from_parts(Arc::new(config), Arc::new(transport))
    }

    pub fn from_parts(config: Arc<ProxyConfig>, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Build the request sent upstream.  Runs before the `proxyReq` hooks.
    fn prepare(&self, req: &mut HostRequest, target: &ResolvedTarget) -> OutgoingRequest {
        let path = self.config.path_rewrite.rewrite(req.path_and_query());
        let mut proxy_req = OutgoingRequest::new(req.method.clone(), path, target.clone());

        proxy_req.headers = forwardable_headers(&req.headers);
        for (name, value) in &self.config.headers {
            proxy_req.headers.insert(name.clone(), value.clone());
        }
        if self.config.xfwd {
            append_forwarded_headers(&mut proxy_req.headers, req);
        }
        if self.config.change_origin {
            change_origin(&mut proxy_req.headers, target);
        }

        proxy_req.body = req.take_body();
        proxy_req
    }

    async fn proxy(&self, req: &mut HostRequest, res: &mut HostResponse) -> Result<(), Failure> {
        let target = resolve(&self.config, req).map_err(|error| Failure {
            stage: Stage::Resolving,
            error,
            target: None,
        })?;

        let forwarding = |error| Failure {
            stage: Stage::Forwarding,
            error,
            target: Some(target.clone()),
        };

        let mut proxy_req = self.prepare(req, &target);
        self.config
            .hooks
            .invoke_proxy_req(&mut proxy_req, req, res)
            .map_err(forwarding)?;

        if res.is_finished() {
            debug_fmt!(
                "ProxyMiddleware",
                "[{}] response finished by a proxyReq hook, not forwarding",
                req.context.request_id
            );
            return Ok(());
        }

        debug_fmt!(
            "ProxyMiddleware",
            "[{}] {} {} -> {}",
            req.context.request_id,
            req.method,
            req.path_and_query(),
            proxy_req.url()
        );

        let mut proxy_res = self
            .transport
            .forward(proxy_req, &target)
            .await
            .map_err(forwarding)?;

        self.config
            .hooks
            .invoke_proxy_res(&mut proxy_res, req, res)
            .map_err(forwarding)?;

        if !res.is_finished() {
            write_response(proxy_res, res);
        }
        Ok(())
    }

    fn fail(&self, failure: Failure, req: &HostRequest, res: &mut HostResponse) -> Result<Flow, BoxError> {
        debug_fmt!(
            "ProxyMiddleware",
            "[{}] failed while {} {} {}: {}",
            req.context.request_id,
            failure.stage,
            req.method,
            req.path(),
            failure.error
        );

        if let Err(hook_error) =
            self.config
                .hooks
                .invoke_error(&failure.error, req, res, failure.target.as_ref())
        {
            warn_fmt!(
                "ProxyMiddleware",
                "[{}] error hook failed: {}",
                req.context.request_id,
                hook_error
            );
        }

        if res.is_finished() {
            return Ok(Flow::Done);
        }
        Err(adapt(failure.error))
    }
}

/// One record per proxied request, once its outcome is known.
fn log_completion(req: &HostRequest, res: &HostResponse, outcome: &str) {
    let elapsed_ms = req.context.start_time.elapsed().as_millis() as u64;
    if is_structured() {
        let logger = with_request_context(
            &slog_scope::logger(),
            &req.context,
            req.method.as_str(),
            req.path(),
        );
        slog::info!(logger, "Response completed";
            "outcome" => outcome,
            "status" => res.status().as_u16(),
            "elapsed_ms" => elapsed_ms
        );
    } else {
        debug_fmt!(
            "ProxyMiddleware",
            "[{}] {} {} {} -> {} in {}ms",
            req.context.request_id,
            outcome,
            req.method,
            req.path(),
            res.status().as_u16(),
            elapsed_ms
        );
    }
}

/// Copy the upstream response into the host response.
fn write_response(proxy_res: ProxyResponse, res: &mut HostResponse) {
    let ProxyResponse {
        status,
        mut headers,
        body,
        ..
    } = proxy_res;

    strip_hop_by_hop(&mut headers);
    res.set_status(status);
    for (name, value) in headers.iter() {
        res.headers_mut().append(name.clone(), value.clone());
    }
    res.send(body);
}

#[async_trait]
impl Middleware for ProxyMiddleware {
    fn name(&self) -> &str {
        "proxy"
    }

    async fn handle(&self, req: &mut HostRequest, res: &mut HostResponse) -> Result<Flow, BoxError> {
        if !self.config.path_filter.matches(req.path()) {
            trace_fmt!(
                "ProxyMiddleware",
                "[{}] {} not matched by path filter",
                req.context.request_id,
                req.path()
            );
            return Ok(Flow::Next);
        }

        match self.proxy(req, res).await {
            Ok(()) => {
                log_completion(req, res, "proxied");
                Ok(Flow::Done)
            }
            Err(failure) => {
                let flow = self.fail(failure, req, res);
                if flow.is_ok() {
                    log_completion(req, res, "answered by error hook");
                }
                flow
            }
        }
    }
}
