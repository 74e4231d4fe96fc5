// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Upstream transport.
//!
//! The middleware hands a fully prepared [`OutgoingRequest`] to a
//! [`Transport`] and gets the upstream's response (or a transport error)
//! back.  [`ReqwestTransport`] is the default; tests and embedders can
//! plug in their own.


use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Body;
use reqwest::redirect::Policy;
use tokio::time::timeout;

use crate::core::{ErrorKind, OutgoingRequest, ProxyError, ProxyResponse, ResolvedTarget, TransportFailure};
use crate::{debug_fmt, trace_fmt};

/// Sends one request to one upstream.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    async fn forward(&self, request: OutgoingRequest, target: &ResolvedTarget) -> Result<ProxyResponse, ProxyError>;
}

/// `reqwest` based transport.
///
/// Redirects are passed back to the client instead of being followed, and
/// bodies are streamed in both directions.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// New transport; `timeout` bounds the wait for the upstream's response head.
    pub fn new(timeout: Option<Duration>) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| {
                ProxyError::new(ErrorKind::Transport(TransportFailure::Request), e.to_string()).with_source(e)
            })?;

        Ok(Self { client, timeout })
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn forward(&self, request: OutgoingRequest, target: &ResolvedTarget) -> Result<ProxyResponse, ProxyError> {
        let url = target.url_for(&request.path);
        debug_fmt!("Transport", "Forwarding {} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let resp = match self.timeout {
            Some(limit) => timeout(limit, builder.send())
                .await
                .map_err(|_| ProxyError::timeout(limit))??,
            None => builder.send().await?,
        };

        trace_fmt!(
            "Transport",
            "{} answered {} after {:?}",
            resp.url(),
            resp.status(),
            started.elapsed()
        );

        let mut response = ProxyResponse::new(resp.status(), resp.url().clone());
        response.headers = resp.headers().clone();
        response.body = Body::wrap_stream(resp.bytes_stream());
        Ok(response)
    }
}
