// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Foxy Middleware - reverse-proxy middleware for a middleware-chain host
//!
//! The middleware forwards matching requests to an upstream origin chosen
//! per request, lets user code observe and modify the exchange through
//! hooks, and turns every failure into an error the host's error chain
//! can handle.
//!
//! # Target resolution
//!
//! A request is sent to the origin returned by the configured router, or
//! to the static `target` when the router has no answer.  Without either,
//! the request fails with `"Must provide a proper URL as target"`.
//!
//! # Hooks
//!
//! | event      | runs                                   | may               |
//! |------------|----------------------------------------|-------------------|
//! | `proxyReq` | after the outgoing request is prepared | edit it, answer   |
//! | `proxyRes` | after the upstream answered            | edit it, answer   |
//! | `error`    | after any failure                      | answer the client |
//!
//! Hooks registered in code run before hooks contributed by plugins.
//!
//! # Example
//!
//! ```rust,no_run
//! use foxy_middleware::{App, ProxyConfig, create_proxy_middleware};
//!
//! # fn build() -> Result<App, Box<dyn std::error::Error + Send + Sync>> {
//! let config = ProxyConfig::builder()
//!     .router_fn(|req| req.path.starts_with("/api").then(|| "http://localhost:3000".to_string()))
//!     .on_proxy_req(|proxy_req, req, _res| {
//!         if let Some(session) = req.header("appsession") {
//!             proxy_req.set_header("cookie", &format!("appSession={session}"))?;
//!         }
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let app = App::new()
//!     .with_middleware(create_proxy_middleware(config)?)
//!     .with_error_handler_fn(|_err, _req, res| {
//!         res.set_status(foxy_middleware::StatusCode::GATEWAY_TIMEOUT);
//!         res.send("Something broke!");
//!         Ok(())
//!     });
//! # Ok(app)
//! # }
//! ```

#[macro_use]
pub mod logging;

pub mod config;
pub mod core;
pub mod filters;
pub mod hooks;
pub mod loader;
pub mod middleware;
pub mod plugins;
pub mod router;
pub mod server;
pub mod transport;

pub use config::{Config, ConfigError, ConfigProvider, ProxyConfig, ProxyConfigBuilder, ProxyOptions};
pub use core::{
    BoxError, ErrorKind, NO_TARGET_MESSAGE, OutgoingRequest, ProxyError, ProxyResponse,
    RequestContext, ResolvedTarget, TransportFailure,
};
pub use hooks::{Hook, HookResult, Hooks, LifecycleEvent};
pub use loader::{LoadedProxy, LoaderError, ProxyLoader};
pub use middleware::{ProxyErrorExt, ProxyMiddleware, adapt, create_proxy_middleware};
pub use plugins::{Plugin, register_plugin};
pub use reqwest::StatusCode;
pub use router::{FnRouter, RequestDescriptor, StaticTarget, TableRouter, TargetRouter};
pub use server::{App, AppServer, ErrorHandler, Flow, HostRequest, HostResponse, Middleware, ServerConfig};
pub use transport::{ReqwestTransport, Transport};
