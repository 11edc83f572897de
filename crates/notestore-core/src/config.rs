//! Configuration for opening and migrating the notes store.
//!
//! Values come from the process environment; CLI flags override them.

use std::env;
use std::path::PathBuf;

use crate::notes_model::MODEL_NAME;
use crate::paths;

pub const DEFAULT_STORE_EXTENSION: &str = "notestore";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding the store file.
    pub data_dir: PathBuf,
    /// Model name; doubles as the store file stem.
    pub model_name: String,
    pub store_extension: String,
    /// When false, an outdated store is rejected instead of migrated.
    pub migrations_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: paths::data_dir(),
            model_name: MODEL_NAME.to_string(),
            store_extension: DEFAULT_STORE_EXTENSION.to_string(),
            migrations_enabled: true,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// - `NOTESTORE_DATA_DIR`
    /// - `NOTESTORE_MODEL_NAME`
    /// - `NOTESTORE_STORE_EXTENSION`
    /// - `NOTESTORE_MIGRATIONS_ENABLED`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(env_value)
    }

    /// Same as [`StoreConfig::from_env`] with an explicit variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup("NOTESTORE_DATA_DIR").filter(|s| !s.trim().is_empty()) {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("NOTESTORE_MODEL_NAME").filter(|s| !s.trim().is_empty()) {
            config.model_name = v.trim().to_string();
        }
        if let Some(v) = lookup("NOTESTORE_STORE_EXTENSION") {
            let ext = v.trim().trim_start_matches('.');
            if !ext.is_empty() {
                config.store_extension = ext.to_string();
            }
        }
        config.migrations_enabled = lookup("NOTESTORE_MIGRATIONS_ENABLED")
            .map_or(config.migrations_enabled, |v| {
                parse_bool(&v, config.migrations_enabled)
            });
        config
    }

    /// Full path of the store file.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        paths::store_path(&self.data_dir, &self.model_name, &self.store_extension)
    }
}

/// Read a value from the real environment.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => default,
    }
}
