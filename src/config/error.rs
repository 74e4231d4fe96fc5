// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors raised while loading or validating configuration.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value could not be parsed or deserialized.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A configuration provider failed.
    #[error("provider error: {provider}: {message}")]
    ProviderError { provider: String, message: String },

    /// An option was well-formed but not usable.
    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// A plugin name that is not registered.
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
}

impl ConfigError {
    pub fn provider_error<P: fmt::Display, M: fmt::Display>(provider: P, message: M) -> Self {
        Self::ProviderError {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_value<K: fmt::Display, M: fmt::Display>(key: K, message: M) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}
