// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging options, read from `proxy.logging`.

use crate::config::scalar;
use crate::logging::structured::{LogFormat, LoggerConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Route the `log` facade into slog
    #[serde(default)]
    pub structured: bool,

    /// `terminal` or `json`, structured logging only
    #[serde(default = "default_format")]
    pub format: String,

    /// `trace`, `debug`, `info`, `warn` or `error`
    #[serde(default = "default_level")]
    pub level: String,

    /// Fields added to every structured record
    #[serde(default, deserialize_with = "scalar::string_map")]
    pub static_fields: BTreeMap<String, String>,
}

fn default_format() -> String {
    "terminal".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            structured: false,
            format: default_format(),
            level: default_level(),
            static_fields: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// The configured level for the `log` facade.  Unknown names mean `info`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "warn" | "warning" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    pub fn to_logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            format: match self.format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Terminal,
            },
            level: match self.level_filter() {
                LevelFilter::Trace => slog::Level::Trace,
                LevelFilter::Debug => slog::Level::Debug,
                LevelFilter::Warn => slog::Level::Warning,
                LevelFilter::Error | LevelFilter::Off => slog::Level::Error,
                LevelFilter::Info => slog::Level::Info,
            },
            static_fields: self
                .static_fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}
