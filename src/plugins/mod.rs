// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plugins – reusable bundles of lifecycle hooks.
//!
//! A plugin registers hooks on a [`Hooks`] registry when the configuration
//! is built.  Plugins named in the `plugins` option are looked up in a
//! global registry; `logger` and `error-response` are built in.
//!
//! ```rust
//! use foxy_middleware::hooks::Hooks;
//! use foxy_middleware::plugins::{Plugin, register_plugin};
//!
//! #[derive(Debug)]
//! struct StampPlugin;
//!
//! impl Plugin for StampPlugin {
//!     fn name(&self) -> &str { "stamp" }
//!     fn apply(&self, hooks: &mut Hooks) {
//!         hooks.on_proxy_req(|proxy_req, _req, _res| proxy_req.set_header("x-stamp", "1"));
//!     }
//! }
//!
//! register_plugin("stamp", || std::sync::Arc::new(StampPlugin) as std::sync::Arc<dyn Plugin>);
//! ```

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use hyper::http::StatusCode;
use once_cell::sync::Lazy;

use crate::config::ConfigError;
use crate::core::{ErrorKind, TransportFailure};
use crate::hooks::Hooks;
use crate::{error_fmt, info_fmt};

/// A bundle of hooks.
pub trait Plugin: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Register this plugin's hooks.
    fn apply(&self, hooks: &mut Hooks);
}

/// Constructor stored in the registry.
pub type PluginConstructor = fn() -> Arc<dyn Plugin>;

static PLUGIN_REGISTRY: Lazy<RwLock<HashMap<String, PluginConstructor>>> = Lazy::new(|| {
    let mut builtin: HashMap<String, PluginConstructor> = HashMap::new();
    builtin.insert("logger".to_string(), || Arc::new(LoggerPlugin) as Arc<dyn Plugin>);
    builtin.insert("error-response".to_string(), || Arc::new(ErrorResponsePlugin) as Arc<dyn Plugin>);
    RwLock::new(builtin)
});

/// Make a plugin available under `name`.  Replaces an existing entry.
pub fn register_plugin(name: &str, ctor: PluginConstructor) {
    PLUGIN_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_string(), ctor);
}

/// Instantiate the plugin registered under `name`.
pub fn create_plugin(name: &str) -> Result<Arc<dyn Plugin>, ConfigError> {
    let ctor = PLUGIN_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .copied();

    ctor.map(|ctor| ctor())
        .ok_or_else(|| ConfigError::UnknownPlugin(name.to_string()))
}

/// Logs every proxied response and every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerPlugin;

impl Plugin for LoggerPlugin {
    fn name(&self) -> &str {
        "logger"
    }

    fn apply(&self, hooks: &mut Hooks) {
        hooks
            .on_proxy_res(|proxy_res, req, _res| {
                info_fmt!(
                    "Proxy",
                    "[{}] {} {} -> {} [{}]",
                    req.context.request_id,
                    req.method,
                    req.path_and_query(),
                    proxy_res.url,
                    proxy_res.status.as_u16()
                );
                Ok(())
            })
            .on_error(|err, req, _res, target| {
                let target = target.map_or_else(|| "<unresolved>".to_string(), ToString::to_string);
                error_fmt!(
                    "Proxy",
                    "[{}] Error occurred while proxying request {}{} to {} [{}]: {}",
                    req.context.request_id,
                    req.host().unwrap_or_default(),
                    req.path_and_query(),
                    target,
                    err.kind(),
                    err
                );
                Ok(())
            });
    }
}

/// Answers failed requests itself instead of leaving them to the host's
/// error middleware.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorResponsePlugin;

impl ErrorResponsePlugin {
    /// Status code written for an error of `kind`.
    pub fn status_for(kind: ErrorKind) -> StatusCode {
        match kind {
            ErrorKind::Transport(TransportFailure::Connect | TransportFailure::Timeout) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ErrorKind::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Plugin for ErrorResponsePlugin {
    fn name(&self) -> &str {
        "error-response"
    }

    fn apply(&self, hooks: &mut Hooks) {
        hooks.on_error(|err, req, res, _target| {
            if res.is_finished() {
                return Ok(());
            }

            let body = format!(
                "Error occurred while trying to proxy: {}{}",
                req.host().unwrap_or_default(),
                req.path_and_query()
            );
            res.headers_mut().clear();
            res.set_status(Self::status_for(err.kind())).send(body);
            Ok(())
        });
    }
}
