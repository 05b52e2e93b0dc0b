use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::constants::{
    ALLOW_THREADS_KEY, BLACKLIST_KEY, DEFAULT_LOG_LEVEL, DEFAULT_LOOP_TIMEOUT_MILLIS,
    DEFAULT_UNLOAD_TIMEOUT_SECS, ENV_PREFIX, LOG_LEVEL_KEY, LOG_THREAD_ID_KEY, LOOP_TIMEOUT_KEY,
    MANAGER_PATH_KEY, PLATFORM_KEY, PLUGINS_DIR, PLUGIN_PATH_KEY, STOP_ON_CYCLE_ERROR_KEY,
    UNLOAD_TIMEOUT_KEY, WHITELIST_KEY,
};
use crate::plugin_system::dependency::normalize_os;
use crate::plugin_system::logger::level_filter;
use crate::storage::error::StorageSystemError;

/// Separator of list values given as plain strings ("a;b;c")
pub const LIST_SEPARATOR: char = ';';

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

/// Conversion applied by [`ConfigStore::conf`] to a raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    /// `true`, `"1"` and `"true"` are true, anything else false
    Bool,
    /// JSON array, or a semicolon separated string
    List,
    /// Same accepted input as `List`
    Tuple,
    Int,
    Str,
}

/// Process scoped key/value configuration.
///
/// Values come from a config file and from `COLONY_*` environment variables;
/// the environment wins when both define a key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigStore {
    #[serde(flatten)]
    values: HashMap<String, Value>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn from_hashmap(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Every variable starting with `COLONY_` in the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a store from `(name, value)` pairs, keeping only `COLONY_*` names.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Self { values }
    }

    /// Load a config file; the format follows the file extension.
    pub fn load_file(path: &Path) -> Result<Self, StorageSystemError> {
        if !path.exists() {
            return Err(StorageSystemError::FileNotFound(path.to_path_buf()));
        }
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| StorageSystemError::UnsupportedConfigFormat(path.display().to_string()))?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| StorageSystemError::io(e, "read_config", path.to_path_buf()))?;
        Self::deserialize(&content, format)
    }

    /// File values overlaid with the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, StorageSystemError> {
        let mut store = match config_file {
            Some(path) => Self::load_file(path)?,
            None => Self::new(),
        };
        store.merge(&Self::from_env());
        Ok(store)
    }

    /// Get a configuration value
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Get a configuration value with default
    pub fn get_or<T: for<'de> Deserialize<'de>>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Set a configuration value
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), StorageSystemError> {
        let json_value = serde_json::to_value(value).map_err(|e| StorageSystemError::SerializationError {
            format: "json".to_string(),
            source: Box::new(e),
        })?;
        self.values.insert(key.to_string(), json_value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    /// Merge with another store, overriding existing values
    pub fn merge(&mut self, other: &ConfigStore) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// The `conf(name, default, cast)` lookup.
    ///
    /// Returns `default` when the key is missing or the value cannot be cast.
    pub fn conf(&self, name: &str, default: Value, cast: Option<Cast>) -> Value {
        let Some(raw) = self.values.get(name) else {
            return default;
        };
        let Some(cast) = cast else {
            return raw.clone();
        };
        match cast_value(raw, cast) {
            Some(value) => value,
            None => {
                log::warn!("Configuration value '{}' cannot be cast to {:?}, using default", name, cast);
                default
            }
        }
    }

    pub fn conf_bool(&self, name: &str, default: bool) -> bool {
        self.conf(name, Value::Bool(default), Some(Cast::Bool))
            .as_bool()
            .unwrap_or(default)
    }

    pub fn conf_list(&self, name: &str, default: &[&str]) -> Vec<String> {
        match self.conf(name, Value::Null, Some(Cast::List)) {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn conf_str(&self, name: &str, default: &str) -> String {
        match self.conf(name, Value::Null, Some(Cast::Str)) {
            Value::String(s) => s,
            _ => default.to_string(),
        }
    }

    pub fn conf_u64(&self, name: &str, default: u64) -> u64 {
        self.conf(name, Value::Null, Some(Cast::Int))
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(default)
    }

    /// Serialize to string based on format
    pub fn serialize(&self, format: ConfigFormat) -> Result<String, StorageSystemError> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(&self).map_err(|e| StorageSystemError::SerializationError {
                format: "json".to_string(),
                source: Box::new(e),
            }),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(&self).map_err(|e| StorageSystemError::SerializationError {
                format: "yaml".to_string(),
                source: Box::new(e),
            }),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(&self).map_err(|e| StorageSystemError::SerializationError {
                format: "toml".to_string(),
                source: Box::new(e),
            }),
        }
    }

    /// Deserialize from string based on format
    pub fn deserialize(data: &str, format: ConfigFormat) -> Result<Self, StorageSystemError> {
        match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| StorageSystemError::DeserializationError {
                format: "json".to_string(),
                source: Box::new(e),
            }),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| StorageSystemError::DeserializationError {
                format: "yaml".to_string(),
                source: Box::new(e),
            }),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| StorageSystemError::DeserializationError {
                format: "toml".to_string(),
                source: Box::new(e),
            }),
        }
    }
}

fn split_list(value: &str) -> Value {
    Value::Array(
        value
            .split(LIST_SEPARATOR)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect(),
    )
}

fn cast_value(value: &Value, cast: Cast) -> Option<Value> {
    match cast {
        Cast::Bool => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) => Some(Value::Bool(s == "1" || s.eq_ignore_ascii_case("true"))),
            Value::Number(n) => Some(Value::Bool(n.as_i64() == Some(1))),
            _ => None,
        },
        Cast::List | Cast::Tuple => match value {
            Value::Array(_) => Some(value.clone()),
            Value::String(s) => Some(split_list(s)),
            _ => None,
        },
        Cast::Int => match value {
            Value::Number(n) => n.as_i64().map(Value::from),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        Cast::Str => match value {
            Value::String(_) => Some(value.clone()),
            Value::Null => None,
            other => Some(Value::String(other.to_string())),
        },
    }
}

/// Typed view of the manager settings, owned by one manager instance.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub manager_path: PathBuf,
    pub plugin_paths: Vec<PathBuf>,
    pub blacklist: Vec<String>,
    /// Empty means every plugin is allowed
    pub whitelist: Vec<String>,
    /// Strict mode: hook failures and dependency cycles abort instead of logging
    pub stop_on_cycle_error: bool,
    pub allow_threads: bool,
    pub unload_timeout: Duration,
    pub loop_timeout: Duration,
    pub log_level: String,
    pub log_thread_id: bool,
    pub platform: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::for_path(PathBuf::from("."))
    }
}

impl ManagerConfig {
    /// Defaults rooted at `manager_path`.
    pub fn for_path(manager_path: PathBuf) -> Self {
        Self {
            plugin_paths: vec![manager_path.join(PLUGINS_DIR)],
            manager_path,
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            stop_on_cycle_error: false,
            allow_threads: true,
            unload_timeout: Duration::from_secs(DEFAULT_UNLOAD_TIMEOUT_SECS),
            loop_timeout: Duration::from_millis(DEFAULT_LOOP_TIMEOUT_MILLIS),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_thread_id: false,
            platform: normalize_os().to_string(),
        }
    }

    pub fn from_store(store: &ConfigStore) -> Result<Self, StorageSystemError> {
        let manager_path = match store.get::<String>(MANAGER_PATH_KEY) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()
                .map_err(|e| StorageSystemError::io(e, "current_dir", PathBuf::from(".")))?,
        };
        let defaults = Self::for_path(manager_path);

        let plugin_paths = match store.conf_list(PLUGIN_PATH_KEY, &[]) {
            paths if paths.is_empty() => defaults.plugin_paths.clone(),
            paths => paths
                .into_iter()
                .map(|p| resolve_relative(&defaults.manager_path, &p))
                .collect(),
        };

        let log_level = store.conf_str(LOG_LEVEL_KEY, &defaults.log_level).to_lowercase();
        if level_filter(&log_level).is_none() {
            return Err(StorageSystemError::invalid_value(
                LOG_LEVEL_KEY,
                format!("unknown log level '{}'", log_level),
            ));
        }

        Ok(Self {
            plugin_paths,
            blacklist: store.conf_list(BLACKLIST_KEY, &[]),
            whitelist: store.conf_list(WHITELIST_KEY, &[]),
            stop_on_cycle_error: store.conf_bool(STOP_ON_CYCLE_ERROR_KEY, defaults.stop_on_cycle_error),
            allow_threads: store.conf_bool(ALLOW_THREADS_KEY, defaults.allow_threads),
            unload_timeout: Duration::from_secs(store.conf_u64(UNLOAD_TIMEOUT_KEY, DEFAULT_UNLOAD_TIMEOUT_SECS)),
            loop_timeout: Duration::from_millis(store.conf_u64(LOOP_TIMEOUT_KEY, DEFAULT_LOOP_TIMEOUT_MILLIS)),
            log_level,
            log_thread_id: store.conf_bool(LOG_THREAD_ID_KEY, defaults.log_thread_id),
            platform: store.conf_str(PLATFORM_KEY, &defaults.platform),
            manager_path: defaults.manager_path,
        })
    }

    pub fn is_blacklisted(&self, plugin_id: &str) -> bool {
        self.blacklist.iter().any(|id| id == plugin_id)
    }

    /// True when the whitelist is empty or names the plugin.
    pub fn is_whitelisted(&self, plugin_id: &str) -> bool {
        self.whitelist.is_empty() || self.whitelist.iter().any(|id| id == plugin_id)
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        level_filter(&self.log_level).unwrap_or(log::LevelFilter::Info)
    }
}

fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    }
}
