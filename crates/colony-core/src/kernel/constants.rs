/// Application name
pub const APP_NAME: &str = "Colony";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of every environment variable read into the configuration store
pub const ENV_PREFIX: &str = "COLONY_";

// Configuration keys

pub const MANAGER_PATH_KEY: &str = "COLONY_MANAGER_PATH";
pub const PLUGIN_PATH_KEY: &str = "COLONY_PLUGIN_PATH";
pub const BLACKLIST_KEY: &str = "COLONY_BLACKLIST";
pub const WHITELIST_KEY: &str = "COLONY_WHITELIST";
pub const STOP_ON_CYCLE_ERROR_KEY: &str = "COLONY_STOP_ON_CYCLE_ERROR";
pub const ALLOW_THREADS_KEY: &str = "COLONY_ALLOW_THREADS";
pub const UNLOAD_TIMEOUT_KEY: &str = "COLONY_UNLOAD_TIMEOUT";
pub const LOOP_TIMEOUT_KEY: &str = "COLONY_LOOP_TIMEOUT";
pub const LOG_LEVEL_KEY: &str = "COLONY_LOG_LEVEL";
pub const LOG_THREAD_ID_KEY: &str = "COLONY_LOG_THREAD_ID";
pub const PLATFORM_KEY: &str = "COLONY_PLATFORM";

/// Seconds `unload_system` may take before the process is killed
pub const DEFAULT_UNLOAD_TIMEOUT_SECS: u64 = 30;

/// Upper bound of a single main loop wait, in milliseconds
pub const DEFAULT_LOOP_TIMEOUT_MILLIS: u64 = 1000;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Exit code used when shutdown has to be forced
pub const KILL_EXIT_CODE: i32 = 2;

// Manager layout

pub const PLUGINS_DIR: &str = "plugins";
pub const META_DIR: &str = "meta";
pub const LIBRARIES_DIR: &str = "libraries";
pub const LOG_DIR: &str = "log";
pub const TEMP_DIR: &str = "tmp";
pub const VAR_DIR: &str = "var";
pub const CONFIG_DIR: &str = "config";

/// Marker file of a personal manager instance
pub const MARKER_FILE: &str = "colony.json";

/// Directory that, next to `plugins/`, identifies a master (development) tree
pub const MASTER_SOURCE_DIR: &str = "colony";

/// Per plugin manifest file name
pub const MANIFEST_FILE: &str = "manifest.json";
