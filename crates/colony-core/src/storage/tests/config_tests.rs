use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::tempdir;

use crate::storage::config::{Cast, ConfigFormat, ConfigStore, ManagerConfig};
use crate::storage::error::StorageSystemError;

fn store(pairs: &[(&str, Value)]) -> ConfigStore {
    ConfigStore::from_hashmap(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

#[test]
fn test_conf_returns_default_for_missing_key() {
    let store = ConfigStore::new();
    assert_eq!(store.conf("COLONY_MISSING", json!("fallback"), None), json!("fallback"));
    assert!(store.conf_bool("COLONY_MISSING", true));
    assert_eq!(store.conf_list("COLONY_MISSING", &["a"]), vec!["a".to_string()]);
}

#[test]
fn test_bool_cast() {
    let store = store(&[
        ("ONE", json!("1")),
        ("TRUE", json!("True")),
        ("NO", json!("no")),
        ("NATIVE", json!(true)),
    ]);
    assert_eq!(store.conf("ONE", json!(false), Some(Cast::Bool)), json!(true));
    assert!(store.conf_bool("TRUE", false));
    assert!(!store.conf_bool("NO", true));
    assert!(store.conf_bool("NATIVE", false));
}

#[test]
fn test_list_and_tuple_casts_split_strings() {
    let store = store(&[("LIST", json!("a; b;;c")), ("ARRAY", json!(["x", "y"]))]);
    assert_eq!(store.conf_list("LIST", &[]), vec!["a", "b", "c"]);
    assert_eq!(store.conf("LIST", Value::Null, Some(Cast::Tuple)), json!(["a", "b", "c"]));
    assert_eq!(store.conf_list("ARRAY", &[]), vec!["x", "y"]);
}

#[test]
fn test_int_and_str_casts() {
    let store = store(&[("N", json!("42")), ("BAD", json!("forty")), ("NUM", json!(7))]);
    assert_eq!(store.conf_u64("N", 1), 42);
    assert_eq!(store.conf_u64("BAD", 1), 1);
    assert_eq!(store.conf_str("NUM", "x"), "7");
    assert_eq!(store.conf("BAD", json!(0), Some(Cast::Int)), json!(0));
}

#[test]
fn test_from_vars_keeps_prefixed_names() {
    let store = ConfigStore::from_vars(vec![
        ("COLONY_LOG_LEVEL", "debug"),
        ("HOME", "/root"),
    ]);
    assert!(store.contains_key("COLONY_LOG_LEVEL"));
    assert!(!store.contains_key("HOME"));
}

#[test]
fn test_merge_overrides() {
    let mut base = store(&[("A", json!(1)), ("B", json!(2))]);
    base.merge(&store(&[("B", json!(3))]));
    assert_eq!(base.get::<i64>("A"), Some(1));
    assert_eq!(base.get::<i64>("B"), Some(3));
    assert_eq!(base.get_or::<i64>("C", 9), 9);
}

#[test]
fn test_set_and_remove() {
    let mut store = ConfigStore::new();
    store.set("COLONY_BLACKLIST", vec!["a", "b"]).unwrap();
    assert_eq!(store.conf_list("COLONY_BLACKLIST", &[]), vec!["a", "b"]);
    assert_eq!(store.remove("COLONY_BLACKLIST"), Some(json!(["a", "b"])));
    assert!(store.keys().is_empty());
}

#[test]
fn test_load_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("colony.json");
    std::fs::write(&path, r#"{"COLONY_ALLOW_THREADS": "0", "COLONY_UNLOAD_TIMEOUT": 5}"#).unwrap();

    let store = ConfigStore::load_file(&path).unwrap();
    assert!(!store.conf_bool("COLONY_ALLOW_THREADS", true));
    assert_eq!(store.conf_u64("COLONY_UNLOAD_TIMEOUT", 30), 5);
}

#[test]
fn test_load_missing_and_unsupported_files() {
    let dir = tempdir().unwrap();
    let missing = ConfigStore::load_file(&dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(missing, StorageSystemError::FileNotFound(_)));

    let ini = dir.path().join("colony.ini");
    std::fs::write(&ini, "x=1").unwrap();
    let unsupported = ConfigStore::load_file(&ini).unwrap_err();
    assert!(matches!(unsupported, StorageSystemError::UnsupportedConfigFormat(_)));
}

#[test]
fn test_json_serialize_deserialize() {
    let original = store(&[("COLONY_WHITELIST", json!(["a"]))]);
    let text = original.serialize(ConfigFormat::Json).unwrap();
    let parsed = ConfigStore::deserialize(&text, ConfigFormat::Json).unwrap();
    assert_eq!(parsed, original);
}

#[cfg(feature = "toml-config")]
#[test]
fn test_toml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("colony.toml");
    std::fs::write(&path, "COLONY_LOG_LEVEL = \"debug\"\nCOLONY_LOOP_TIMEOUT = 50\n").unwrap();
    let store = ConfigStore::load_file(&path).unwrap();
    assert_eq!(store.conf_str("COLONY_LOG_LEVEL", "info"), "debug");
    assert_eq!(store.conf_u64("COLONY_LOOP_TIMEOUT", 0), 50);
}

#[test]
fn test_manager_config_defaults() {
    let config = ManagerConfig::for_path(PathBuf::from("/srv/colony"));
    assert_eq!(config.plugin_paths, vec![PathBuf::from("/srv/colony/plugins")]);
    assert!(config.allow_threads);
    assert!(!config.stop_on_cycle_error);
    assert_eq!(config.unload_timeout, Duration::from_secs(30));
    assert_eq!(config.loop_timeout, Duration::from_millis(1000));
    assert_eq!(config.log_filter(), log::LevelFilter::Info);
    assert!(config.is_whitelisted("anything"));
}

#[test]
fn test_manager_config_from_store() {
    let store = store(&[
        ("COLONY_MANAGER_PATH", json!("/srv/colony")),
        ("COLONY_PLUGIN_PATH", json!("extra;/opt/plugins")),
        ("COLONY_BLACKLIST", json!("bad")),
        ("COLONY_WHITELIST", json!(["good", "bad"])),
        ("COLONY_STOP_ON_CYCLE_ERROR", json!("true")),
        ("COLONY_ALLOW_THREADS", json!("0")),
        ("COLONY_UNLOAD_TIMEOUT", json!("3")),
        ("COLONY_LOG_LEVEL", json!("WARNING")),
        ("COLONY_PLATFORM", json!("mac")),
    ]);
    let config = ManagerConfig::from_store(&store).unwrap();
    assert_eq!(
        config.plugin_paths,
        vec![PathBuf::from("/srv/colony/extra"), PathBuf::from("/opt/plugins")]
    );
    assert!(config.is_blacklisted("bad"));
    assert!(config.is_whitelisted("good"));
    assert!(!config.is_whitelisted("other"));
    assert!(config.stop_on_cycle_error);
    assert!(!config.allow_threads);
    assert_eq!(config.unload_timeout, Duration::from_secs(3));
    assert_eq!(config.log_level, "warning");
    assert_eq!(config.log_filter(), log::LevelFilter::Warn);
    assert_eq!(config.platform, "mac");
}

#[test]
fn test_manager_config_rejects_unknown_level() {
    let store = store(&[
        ("COLONY_MANAGER_PATH", json!("/srv/colony")),
        ("COLONY_LOG_LEVEL", json!("loud")),
    ]);
    let err = ManagerConfig::from_store(&store).unwrap_err();
    assert!(matches!(err, StorageSystemError::InvalidValue { ref key, .. } if key == "COLONY_LOG_LEVEL"));
}
