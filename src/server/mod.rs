// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host framework for the proxy middleware.
//!
//! The middleware itself only needs the [`Middleware`] contract from its
//! host.  This module provides a small host that honours it: an [`App`]
//! with a middleware chain and an error chain, and an [`AppServer`] that is
//! a *thin* wrapper around **hyper-util** serving that app.
//!
//! **Protocol support**
//! Uses `hyper_util::server::conn::auto::Builder`, so the same
//! connection transparently handles both HTTP/1.1 *and* HTTP/2.
//!
//! ## Body streaming
//! Inbound bodies are **streamed** into the app (and from there into the
//! upstream connection); responses are streamed back the same way.

mod app;

pub use app::{
    App, ErrorHandler, ErrorHandlerFn, Flow, HostRequest, HostResponse, Middleware, MiddlewareFn,
};

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::BodyExt;
use hyper::body::{Body as _, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::{debug_fmt, error_fmt, info_fmt, warn_fmt};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Configuration for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to wait for open connections on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Serves an [`App`] over HTTP.
#[derive(Debug, Clone)]
pub struct AppServer {
    config: ServerConfig,
    app: Arc<App>,
}

impl AppServer {
    pub fn new(config: ServerConfig, app: App) -> Self {
        Self {
            config,
            app: Arc::new(app),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM.
    pub async fn start(&self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port)
            .parse::<SocketAddr>()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let listener = TcpListener::bind(addr).await?;

        #[cfg(unix)]
        let mut term_stream = signal(SignalKind::terminate())?;

        let shutdown = async move {
            #[cfg(unix)]
            let sigterm = term_stream.recv();
            #[cfg(not(unix))]
            let sigterm = std::future::pending::<Option<()>>();

            tokio::select! {
                _ = tokio::signal::ctrl_c() => info_fmt!("AppServer", "Received Ctrl-C; initiating graceful shutdown"),
                _ = sigterm => info_fmt!("AppServer", "Received SIGTERM; initiating graceful shutdown"),
            }
        };

        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` completes, then
    /// drain open connections.
    pub async fn serve<S>(&self, listener: TcpListener, shutdown: S) -> std::io::Result<()>
    where
        S: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info_fmt!("AppServer", "Listening on http://{}", addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut join_set = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accept = listener.accept() => {
                    let (stream, remote_addr) = match accept {
                        Ok(conn) => conn,
                        Err(e) => {
                            error_fmt!("AppServer", "Accept error: {}", e);
                            continue;
                        }
                    };

                    let app = self.app.clone();
                    let client_ip = remote_addr.ip().to_string();
                    let mut shutdown_rx = shutdown_rx.clone();

                    join_set.spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            handle_request(req, app.clone(), client_ip.clone())
                        });

                        let builder = AutoBuilder::new(TokioExecutor::new());
                        let connection = builder.serve_connection(TokioIo::new(stream), service);
                        let mut conn = std::pin::pin!(connection);

                        tokio::select! {
                            res = conn.as_mut() => log_connection_end(res),
                            _ = shutdown_rx.changed() => {
                                debug_fmt!("AppServer", "Connection received shutdown signal, waiting for graceful close");
                                conn.as_mut().graceful_shutdown();
                                log_connection_end(conn.await);
                            }
                        }
                    });
                }
            }
        }

        info_fmt!("AppServer", "Shutting down; waiting for {} connection(s)", join_set.len());
        let _ = shutdown_tx.send(true);

        let drain = async { while join_set.join_next().await.is_some() {} };
        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn_fmt!(
                "AppServer",
                "Shutdown timed out after {} seconds, some connections may be forcefully closed",
                timeout.as_secs()
            );
            join_set.shutdown().await;
        }

        info_fmt!("AppServer", "Shutdown complete");
        Ok(())
    }
}

fn log_connection_end<E: std::fmt::Display>(res: Result<(), E>) {
    match res {
        Ok(()) => debug_fmt!("AppServer", "Connection closed normally"),
        Err(e) => {
            let err_str = e.to_string();
            if !err_str.contains("connection closed") && !err_str.contains("connection reset") {
                error_fmt!("AppServer", "Connection error: {}", e);
            }
        }
    }
}

/// Convert a hyper request into a host request.
fn convert_hyper_request(req: Request<Incoming>, client_ip: String) -> HostRequest {
    let (parts, incoming) = req.into_parts();

    let body = if incoming.is_end_stream() {
        None
    } else {
        let stream = incoming.into_data_stream().map_ok(Bytes::from);
        Some(Body::wrap_stream(stream))
    };

    let mut request = HostRequest::from_parts(parts, body);
    request.context.client_ip = Some(client_ip);
    request
}

async fn handle_request(
    req: Request<Incoming>,
    app: Arc<App>,
    client_ip: String,
) -> Result<Response<Body>, Infallible> {
    let mut request = convert_hyper_request(req, client_ip);

    debug_fmt!(
        "AppServer",
        "[{}] Received request: {} {}",
        request.context.request_id,
        request.method,
        request.path()
    );

    let response = app.dispatch(&mut request).await;

    debug_fmt!(
        "AppServer",
        "[{}] Responding {} to {} {} after {:?}",
        request.context.request_id,
        response.status(),
        request.method,
        request.path(),
        request.context.start_time.elapsed()
    );

    Ok(response.into_response())
}
