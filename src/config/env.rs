// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment variable configuration provider.
//!
//! `FOXY_MW__PROXY__CHANGE_ORIGIN=true` becomes the key
//! `proxy.change_origin`.  Asking for a parent key (`proxy`) assembles an
//! object from every variable below it, so a whole section can be
//! deserialized straight from the environment.

use std::collections::BTreeMap;
use std::env;

use serde_json::{Map, Value};

use super::{ConfigError, ConfigProvider};

/// Separator between key segments in variable names.
pub const ENV_SEPARATOR: &str = "__";

/// Default variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "FOXY_MW";

#[derive(Debug)]
pub struct EnvConfigProvider {
    prefix: String,
    /// Dotted key -> raw value, for every variable carrying the prefix.
    cache: BTreeMap<String, String>,
}

impl EnvConfigProvider {
    /// Read all variables named `<prefix>__...`.
    pub fn new(prefix: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.trim_end_matches('_').to_string(),
            cache: BTreeMap::new(),
        };
        provider.refresh_cache();
        provider
    }

    /// Re-read the process environment.
    pub fn refresh_cache(&mut self) {
        let cache = env::vars()
            .filter_map(|(name, value)| self.key_for(&name).map(|key| (key, value)))
            .collect();
        self.cache = cache;
    }

    fn key_for(&self, name: &str) -> Option<String> {
        let rest = name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(ENV_SEPARATOR)?;
        if rest.is_empty() {
            return None;
        }

        Some(
            rest.split(ENV_SEPARATOR)
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join("."),
        )
    }

    /// JSON when the value parses as JSON, a string otherwise.
    fn parse_value(value: &str) -> Value {
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
    }

    fn insert_nested(root: &mut Map<String, Value>, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };

        let mut current = root;
        for part in parents {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            current = next;
        }
        current.insert(last.to_string(), value);
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn has(&self, key: &str) -> bool {
        let nested = format!("{key}.");
        self.cache.contains_key(key) || self.cache.keys().any(|k| k.starts_with(&nested))
    }

    fn provider_name(&self) -> &str {
        "env"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(Self::parse_value(value)));
        }

        let nested = format!("{key}.");
        let mut root = Map::new();
        for (full_key, value) in self.cache.range(nested.clone()..) {
            let Some(rest) = full_key.strip_prefix(&nested) else {
                break;
            };
            let path: Vec<&str> = rest.split('.').collect();
            Self::insert_nested(&mut root, &path, Self::parse_value(value));
        }

        Ok((!root.is_empty()).then_some(Value::Object(root)))
    }
}
