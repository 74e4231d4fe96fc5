// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Proxy middleware configuration.
//!
//! [`ProxyOptions`] is the serializable part, read from the `proxy` key.
//! [`ProxyConfigBuilder`] combines it with what only code can provide
//! (router closures, hooks, plugin instances) and produces the immutable
//! [`ProxyConfig`] the middleware runs with.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::core::{BoxError, OutgoingRequest, ProxyError, ProxyResponse, ResolvedTarget};
use crate::filters::{PathFilter, PathRewriteRule, PathRewriter};
use crate::hooks::{HookResult, Hooks};
use crate::logging::config::LoggingConfig;
use crate::plugins::{Plugin, create_plugin};
use crate::router::{FnRouter, RequestDescriptor, TableRouter, TargetRouter};
use crate::server::{HostRequest, HostResponse};

use super::{ConfigError, scalar};

/// One proxy table rule: requests matching `match` go to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTableEntry {
    /// `"/path"`, `"host"` or `"host/path"`
    #[serde(rename = "match", deserialize_with = "scalar::string")]
    pub match_: String,
    #[serde(deserialize_with = "scalar::string")]
    pub target: String,
}

/// Serializable middleware options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// Static upstream origin
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub target: Option<String>,

    /// Rewrite the outgoing `Host` header to the target
    #[serde(default)]
    pub change_origin: bool,

    /// Add `x-forwarded-*` headers
    #[serde(default)]
    pub xfwd: bool,

    /// Headers added to every outgoing request
    #[serde(default, deserialize_with = "scalar::string_map")]
    pub headers: BTreeMap<String, String>,

    /// Which request paths are proxied; empty means all
    #[serde(default, deserialize_with = "scalar::string_list")]
    pub path_filter: Vec<String>,

    /// Path rewrites, first match wins
    #[serde(default)]
    pub path_rewrite: Vec<PathRewriteRule>,

    /// Proxy table, first match wins
    #[serde(default)]
    pub router: Vec<ProxyTableEntry>,

    /// Upstream timeout in milliseconds
    #[serde(default)]
    pub proxy_timeout_ms: Option<u64>,

    /// Plugins applied to the hook pipeline
    #[serde(default = "default_plugins", deserialize_with = "scalar::string_list")]
    pub plugins: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_plugins() -> Vec<String> {
    vec!["logger".to_string()]
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            target: None,
            change_origin: false,
            xfwd: false,
            headers: BTreeMap::new(),
            path_filter: Vec::new(),
            path_rewrite: Vec::new(),
            router: Vec::new(),
            proxy_timeout_ms: None,
            plugins: default_plugins(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Immutable configuration of one proxy middleware instance.
///
/// Either `target` or `router` should yield a target; that is checked per
/// request, a request without one fails with the resolution error.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub target: Option<String>,
    pub change_origin: bool,
    pub xfwd: bool,
    pub headers: HeaderMap,
    pub router: Option<Arc<dyn TargetRouter>>,
    pub hooks: Hooks,
    pub path_filter: PathFilter,
    pub path_rewrite: PathRewriter,
    pub proxy_timeout: Option<Duration>,
}

impl ProxyConfig {
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::new()
    }

    /// Configuration from options alone.
    pub fn from_options(options: ProxyOptions) -> Result<Self, ConfigError> {
        ProxyConfigBuilder::from_options(options).build()
    }
}

#[derive(Debug, Default)]
pub struct ProxyConfigBuilder {
    options: ProxyOptions,
    router: Option<Arc<dyn TargetRouter>>,
    hooks: Hooks,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ProxyConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from deserialized options.
    pub fn from_options(options: ProxyOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.options.target = Some(target.into());
        self
    }

    pub fn change_origin(mut self, enabled: bool) -> Self {
        self.options.change_origin = enabled;
        self
    }

    pub fn xfwd(mut self, enabled: bool) -> Self {
        self.options.xfwd = enabled;
        self
    }

    /// Add a static header to every outgoing request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    /// Add a path filter pattern.
    pub fn path_filter(mut self, pattern: impl Into<String>) -> Self {
        self.options.path_filter.push(pattern.into());
        self
    }

    /// Add a path rewrite rule.
    pub fn path_rewrite(mut self, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.options
            .path_rewrite
            .push(PathRewriteRule::new(pattern, replacement));
        self
    }

    pub fn proxy_timeout(mut self, timeout: Duration) -> Self {
        self.options.proxy_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    /// Route with a [`TargetRouter`].  Replaces the proxy table.
    pub fn router<R: TargetRouter + 'static>(mut self, router: R) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Route with an already shared router.
    pub fn shared_router(mut self, router: Arc<dyn TargetRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Route with a closure.
    pub fn router_fn<F>(self, f: F) -> Self
    where
        F: Fn(&RequestDescriptor<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.router(FnRouter::new(move |req: &RequestDescriptor<'_>| {
            Ok::<_, BoxError>(f(req))
        }))
    }

    /// Add a proxy table rule.
    pub fn route(mut self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.options.router.push(ProxyTableEntry {
            match_: key.into(),
            target: target.into(),
        });
        self
    }

    /// Append all callbacks of `hooks`.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks.extend(hooks);
        self
    }

    pub fn on_proxy_req<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut OutgoingRequest, &HostRequest, &mut HostResponse) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.on_proxy_req(f);
        self
    }

    pub fn on_proxy_res<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ProxyResponse, &HostRequest, &mut HostResponse) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.on_proxy_res(f);
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ProxyError, &HostRequest, &mut HostResponse, Option<&ResolvedTarget>) -> HookResult
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on_error(f);
        self
    }

    /// Enable a registered plugin by name.
    pub fn plugin(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.options.plugins.contains(&name) {
            self.options.plugins.push(name);
        }
        self
    }

    /// Enable a plugin instance.
    pub fn with_plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn shared_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Drop every plugin enabled by name so far, including the default ones.
    pub fn without_plugins(mut self) -> Self {
        self.options.plugins.clear();
        self
    }

    /// Validate and freeze.  User hooks run before plugin hooks.
    pub fn build(self) -> Result<ProxyConfig, ConfigError> {
        let options = self.options;

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::invalid_value(format!("headers.{name}"), e))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::invalid_value(format!("headers.{name}"), e))?;
            headers.insert(header_name, header_value);
        }

        let proxy_timeout = match options.proxy_timeout_ms {
            Some(0) => {
                return Err(ConfigError::invalid_value(
                    "proxy_timeout_ms",
                    "must be greater than zero",
                ));
            }
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };

        let router = match self.router {
            Some(router) => Some(router),
            None if !options.router.is_empty() => {
                let table = TableRouter::from_entries(
                    options
                        .router
                        .iter()
                        .map(|entry| (entry.match_.as_str(), entry.target.as_str())),
                );
                Some(Arc::new(table) as Arc<dyn TargetRouter>)
            }
            None => None,
        };

        let mut hooks = self.hooks;
        for name in &options.plugins {
            create_plugin(name)?.apply(&mut hooks);
        }
        for plugin in &self.plugins {
            plugin.apply(&mut hooks);
        }

        Ok(ProxyConfig {
            target: options.target,
            change_origin: options.change_origin,
            xfwd: options.xfwd,
            headers,
            router,
            hooks,
            path_filter: PathFilter::new(&options.path_filter)?,
            path_rewrite: PathRewriter::new(&options.path_rewrite)?,
            proxy_timeout,
        })
    }
}
