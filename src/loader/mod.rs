// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry-point – configuration in, running proxy out.
//!
//! [`ProxyLoader`] reads the layered configuration, initializes logging,
//! combines the `proxy` options with whatever only code can provide
//! (router closures, hooks, plugins, a transport) and returns a
//! [`LoadedProxy`] that can be mounted into an [`App`] or served directly.
//!
//! ```no_run
//! use foxy_middleware::loader::ProxyLoader;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy = ProxyLoader::new()
//!     .with_config_file("proxy.toml")
//!     .with_env_vars()
//!     .build()?;
//! proxy.start().await?;
//! # Ok(())
//! # }
//! ```


use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{
    Config, ConfigError, ConfigProvider, DEFAULT_ENV_PREFIX, EnvConfigProvider, FileConfigProvider,
    ProxyConfigBuilder, ProxyOptions,
};
use crate::core::{BoxError, ProxyError};
use crate::hooks::Hooks;
use crate::logging;
use crate::middleware::ProxyMiddleware;
use crate::plugins::Plugin;
use crate::router::{FnRouter, RequestDescriptor, TargetRouter};
use crate::server::{App, AppServer, ServerConfig};
use crate::transport::{ReqwestTransport, Transport};
use crate::{debug_fmt, info_fmt};

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("proxy error: {0}")]
    ProxyError(#[from] ProxyError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Builder for a [`LoadedProxy`].
#[derive(Debug, Default)]
pub struct ProxyLoader {
    config: Option<Config>,
    providers: Vec<Arc<dyn ConfigProvider>>,
    config_file: Option<PathBuf>,
    env_prefix: Option<String>,
    router: Option<Arc<dyn TargetRouter>>,
    hooks: Hooks,
    plugins: Vec<Arc<dyn Plugin>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ProxyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a ready configuration instead of files and environment.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load this file (JSON, TOML or YAML).
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Let `FOXY_MW__*` variables override the file.
    pub fn with_env_vars(self) -> Self {
        self.with_env_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Let `<prefix>__*` variables override the file.
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self
    }

    /// Add a provider; it overrides file and environment.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Route with a [`TargetRouter`] instead of the configured table.
    pub fn with_router<R: TargetRouter + 'static>(mut self, router: R) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Route with a closure instead of the configured table.
    pub fn with_router_fn<F>(self, f: F) -> Self
    where
        F: Fn(&RequestDescriptor<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.with_router(FnRouter::new(move |req: &RequestDescriptor<'_>| {
            Ok::<_, BoxError>(f(req))
        }))
    }

    /// Register hooks; they run before plugin hooks.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks.extend(hooks);
        self
    }

    /// Apply a plugin instance after the plugins named in the configuration.
    pub fn with_plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Forward with a custom transport.
    pub fn with_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    fn load_config(&mut self) -> Result<Config, LoaderError> {
        if let Some(config) = self.config.take() {
            return Ok(config);
        }

        let mut builder = Config::builder();
        if let Some(path) = self.config_file.take() {
            builder = builder.with_provider(FileConfigProvider::new(path)?);
        }
        if let Some(prefix) = self.env_prefix.take() {
            builder = builder.with_provider(EnvConfigProvider::new(&prefix));
        }
        for provider in self.providers.drain(..) {
            builder = builder.with_shared_provider(provider);
        }
        Ok(builder.build())
    }

    pub fn build(mut self) -> Result<LoadedProxy, LoaderError> {
        let config = self.load_config()?;

        let options: ProxyOptions = config.get_or_default("proxy", ProxyOptions::default())?;
        logging::init_with_config(options.logging.level_filter(), &options.logging);

        let server: ServerConfig = config.get_or_default("server", ServerConfig::default())?;

        let mut builder = ProxyConfigBuilder::from_options(options).hooks(self.hooks);
        if let Some(router) = self.router {
            builder = builder.shared_router(router);
        }
        for plugin in self.plugins {
            builder = builder.shared_plugin(plugin);
        }
        let proxy_config = builder.build()?;

        debug_fmt!(
            "ProxyLoader",
            "target={:?} router={} hooks={:?} timeout={:?}",
            proxy_config.target,
            proxy_config.router.is_some(),
            proxy_config.hooks,
            proxy_config.proxy_timeout
        );

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(proxy_config.proxy_timeout)?),
        };

        info_fmt!("ProxyLoader", "Proxy middleware ready");

        Ok(LoadedProxy {
            config: Arc::new(config),
            middleware: ProxyMiddleware::from_parts(Arc::new(proxy_config), transport),
            server,
        })
    }
}

/// A configured proxy middleware plus the settings of its host server.
#[derive(Debug, Clone)]
pub struct LoadedProxy {
    config: Arc<Config>,
    middleware: ProxyMiddleware,
    server: ServerConfig,
}

impl LoadedProxy {
    pub fn loader() -> ProxyLoader {
        ProxyLoader::new()
    }

    /// The layered configuration it was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn middleware(&self) -> &ProxyMiddleware {
        &self.middleware
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.server
    }

    /// An app whose only middleware is the proxy.
    pub fn app(&self) -> App {
        App::new().with_middleware(self.middleware.clone())
    }

    /// Serve [`Self::app`] on the configured address until Ctrl-C or SIGTERM.
    pub async fn start(&self) -> Result<(), LoaderError> {
        let server = AppServer::new(self.server.clone(), self.app());
        server.start().await?;
        Ok(())
    }
}
