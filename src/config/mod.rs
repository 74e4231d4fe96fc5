// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration subsystem
//!
//! A [`Config`] is an ordered list of [`ConfigProvider`]s; later providers
//! override earlier ones.  Objects are merged key by key, so an environment
//! variable can override a single option of a section loaded from a file.
//!
//! 1. `FileConfigProvider` – `proxy.{toml,json,yaml}`
//! 2. `EnvConfigProvider`  – `FOXY_MW__PROXY__TARGET=http://…`
//! 3. *your* provider implementing [`ConfigProvider`]
//!
//! | key | type | description |
//! |-----|------|-------------|
//! | `proxy`         | [`ProxyOptions`] | middleware options |
//! | `proxy.logging` | [`LoggingConfig`](crate::logging::config::LoggingConfig) | logging setup |
//! | `server`        | [`ServerConfig`](crate::server::ServerConfig) | listener for the bundled host |

mod env;
pub mod error;
mod file;
pub mod proxy;
pub(crate) mod scalar;


pub use env::{DEFAULT_ENV_PREFIX, ENV_SEPARATOR, EnvConfigProvider};
pub use error::ConfigError;
pub use file::{FileConfigProvider, FileFormat};
pub use proxy::{ProxyConfig, ProxyConfigBuilder, ProxyOptions, ProxyTableEntry};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// A source of configuration values.
pub trait ConfigProvider: Debug + Send + Sync {
    /// Whether the provider has a value for `key`.
    fn has(&self, key: &str) -> bool;

    /// Name used in error messages.
    fn provider_name(&self) -> &str;

    /// The raw value for a dot-separated `key`.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider.  It overrides the providers added before it.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn with_shared_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

/// Layered configuration.
#[derive(Debug, Clone)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

/// Merge `overlay` into `base`.  Objects merge recursively, anything else
/// is replaced.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// The merged value of `key` across all providers.
    pub fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        let mut merged: Option<Value> = None;
        for provider in &self.providers {
            if !provider.has(key) {
                continue;
            }
            if let Some(value) = provider.get_raw(key)? {
                match merged.as_mut() {
                    Some(existing) => merge_values(existing, value),
                    None => merged = Some(value),
                }
            }
        }
        Ok(merged)
    }

    /// Deserialize the merged value of `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ConfigError::ParseError(format!("failed to deserialize '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }

    pub fn get_or_default<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// A configuration backed by a single file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let provider = FileConfigProvider::new(path)?;
        Ok(Self::builder().with_provider(provider).build())
    }
}
