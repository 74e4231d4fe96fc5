// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured logging with slog.
//!
//! The root logger is installed globally through `slog-scope`; the `log`
//! facade is bridged into it by `slog-stdlog`, so every `*_fmt!` line in
//! the crate ends up as a structured record.

use slog::{Drain, Logger, o};
use slog_async::Async;
use slog_json::Json;
use slog_term::{FullFormat, TermDecorator};
use std::io;

use crate::core::RequestContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable terminal output
    Terminal,
    /// One JSON object per line on stdout
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LogFormat,
    pub level: slog::Level,
    /// Key-value pairs attached to every record
    pub static_fields: Vec<(String, String)>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            level: slog::Level::Info,
            static_fields: Vec::new(),
        }
    }
}

fn finish<D>(drain: D, config: &LoggerConfig) -> Logger
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    let drain = drain.filter_level(config.level).fuse();
    let drain = Async::new(drain).build().fuse();

    let mut logger = Logger::root(drain, o!());
    for (key, value) in &config.static_fields {
        // slog keys are 'static; the set is small and fixed for the process.
        let key: &'static str = Box::leak(key.clone().into_boxed_str());
        logger = logger.new(o!(key => value.clone()));
    }
    logger
}

/// Build a root logger.
pub fn create_logger(config: &LoggerConfig) -> Logger {
    match config.format {
        LogFormat::Terminal => {
            let decorator = TermDecorator::new().build();
            finish(FullFormat::new(decorator).build().fuse(), config)
        }
        LogFormat::Json => {
            let drain = Json::new(io::stdout()).add_default_keys().build().fuse();
            finish(drain, config)
        }
    }
}

/// Child logger carrying the request's id, method and path.
pub fn with_request_context(logger: &Logger, context: &RequestContext, method: &str, path: &str) -> Logger {
    logger.new(o!(
        "request_id" => context.request_id.clone(),
        "client_ip" => context.client_ip.clone().unwrap_or_default(),
        "method" => method.to_string(),
        "path" => path.to_string(),
    ))
}

/// Keeps the global logger installed while alive.
pub struct LoggerGuard {
    _guard: slog_scope::GlobalLoggerGuard,
}

/// Install `config` as the global structured logger.
pub fn init_global_logger(config: &LoggerConfig) -> LoggerGuard {
    let logger = create_logger(config);
    LoggerGuard {
        _guard: slog_scope::set_global_logger(logger),
    }
}

impl LoggerGuard {
    /// Keep the logger installed for the rest of the process.
    pub fn persist(self) {
        self._guard.cancel_reset();
    }
}
