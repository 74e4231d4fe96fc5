// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging setup.
//!
//! Library code only talks to the `log` facade through the `*_fmt!` macros.
//! Applications pick the backend once: `env_logger` by default, slog when
//! `structured` is enabled.  Installing a logger is idempotent; whoever
//! comes first (including a logger installed by the host application) wins.

pub mod config;
pub mod structured;
#[macro_use]
pub mod wrapper;


use log::LevelFilter;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use config::LoggingConfig;

static INIT: Once = Once::new();
static USING_STRUCTURED: AtomicBool = AtomicBool::new(false);

/// Install `env_logger` at `level` (`RUST_LOG` wins when set).
pub fn init(level: Option<LevelFilter>) {
    init_with_config(level.unwrap_or(LevelFilter::Info), &LoggingConfig::default());
}

/// Install the backend described by `config`.
pub fn init_with_config(level: LevelFilter, config: &LoggingConfig) {
    INIT.call_once(|| {
        if config.structured {
            structured::init_global_logger(&config.to_logger_config()).persist();
            match slog_stdlog::init_with_level(level.to_level().unwrap_or(log::Level::Error)) {
                Ok(()) => {
                    log::set_max_level(level);
                    USING_STRUCTURED.store(true, Ordering::SeqCst);
                }
                Err(e) => eprintln!("structured logging not installed: {e}"),
            }
        } else {
            let env = env_logger::Env::default().filter_or("RUST_LOG", level.as_str().to_lowercase());
            // A logger installed by the host application stays in place.
            let _ = env_logger::Builder::from_env(env)
                .format_timestamp_millis()
                .format_target(true)
                .try_init();
        }

        info_fmt!("Logging", "initialized at level {}", log::max_level());
    });
}

/// Whether the slog backend is active.
pub fn is_structured() -> bool {
    USING_STRUCTURED.load(Ordering::SeqCst)
}
