use super::support::{count, manager, position, recorder, start, timeline, RecorderSpec};
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::descriptor::{DiffusionPolicy, LoadingType, PluginDescriptor};
use crate::plugin_system::error::PluginSystemError;

fn provider(id: &str, capability: &str) -> PluginDescriptor {
    PluginDescriptor::builder(id, "1.0.0").capability(capability).build()
}

fn consumer(id: &str, allowed: &str) -> PluginDescriptor {
    PluginDescriptor::builder(id, "1.0.0").capability_allowed(allowed).build()
}

fn depending_with(id: &str, dependency: &str, policy: DiffusionPolicy) -> PluginDescriptor {
    PluginDescriptor::builder(id, "1.0.0")
        .dependency(PluginDependency::new(dependency, "1.0.0").with_policy(policy))
        .build()
}

#[test]
fn test_loaded_provider_is_injected_into_consumer() {
    let manager = manager();
    let timeline = timeline();
    start(&manager, recorder(provider("mysql", "storage.sql.mysql"), &timeline));
    let app = start(&manager, recorder(consumer("app", "storage"), &timeline));
    manager.load_plugin("mysql").unwrap();

    assert!(manager.load_plugin("app").unwrap());
    let injected = app.allowed_plugins("storage");
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].id(), "mysql");
    assert!(position(&timeline, "load_plugin:app") < position(&timeline, "load_allowed:app:mysql:storage"));
    assert!(position(&timeline, "load_allowed:app:mysql:storage") < position(&timeline, "end_load_plugin:app"));
    assert_eq!(manager.plugin_status("app").unwrap().allowed, vec![("mysql".to_string(), "storage".to_string())]);
}

#[test]
fn test_provider_loaded_later_is_wired_retroactively() {
    let manager = manager();
    let timeline = timeline();
    let mysql = start(&manager, recorder(provider("mysql", "storage.sql"), &timeline));
    let app = start(&manager, recorder(consumer("app", "storage"), &timeline));

    assert!(manager.load_plugin("app").unwrap());
    // Eager providers are not loaded on behalf of a consumer.
    assert!(!mysql.is_loaded());
    assert!(app.allowed_plugins("storage").is_empty());
    assert_eq!(app.allowed_capabilities(), vec!["storage"]);

    assert!(manager.load_plugin("mysql").unwrap());
    assert_eq!(app.allowed_plugins("storage").len(), 1);
    assert_eq!(count(&timeline, "load_allowed:app:mysql:storage"), 1);
}

#[test]
fn test_lazy_provider_is_loaded_for_consumer() {
    let manager = manager();
    let timeline = timeline();
    let cache = start(
        &manager,
        recorder(
            PluginDescriptor::builder("cache", "1.0.0")
                .capability("cache.memory")
                .loading_type(LoadingType::Lazy)
                .build(),
            &timeline,
        ),
    );
    let app = start(&manager, recorder(consumer("app", "cache"), &timeline));

    assert!(manager.load_plugin("app").unwrap());
    assert!(cache.is_loaded());
    assert_eq!(app.allowed_plugins("cache").len(), 1);
    assert_eq!(count(&timeline, "load_allowed:app:cache:cache"), 1);
}

#[test]
fn test_unloading_provider_notifies_consumers_first() {
    let manager = manager();
    let timeline = timeline();
    start(&manager, recorder(provider("mysql", "storage.sql"), &timeline));
    let app = start(&manager, recorder(consumer("app", "storage"), &timeline));
    manager.load_plugin("mysql").unwrap();
    manager.load_plugin("app").unwrap();

    assert!(manager.unload_plugin("mysql").unwrap());
    assert!(position(&timeline, "unload_allowed:app:mysql:storage") < position(&timeline, "unload_plugin:mysql"));
    assert!(app.is_loaded());
    assert!(app.allowed_plugins("storage").is_empty());
    assert!(app.allowed_loaded_capability().is_empty());

    // Loading the provider again wires it back in.
    manager.load_plugin("mysql").unwrap();
    assert_eq!(app.allowed_plugins("storage").len(), 1);
}

#[test]
fn test_unloading_consumer_releases_pairs() {
    let manager = manager();
    let timeline = timeline();
    let mysql = start(&manager, recorder(provider("mysql", "storage"), &timeline));
    let app = start(&manager, recorder(consumer("app", "storage"), &timeline));
    manager.load_plugin("mysql").unwrap();
    manager.load_plugin("app").unwrap();

    manager.unload_plugin("app").unwrap();
    assert!(mysql.is_loaded());
    assert!(!manager.registry().is_referenced(mysql.instance_id()));

    manager.load_plugin("app").unwrap();
    assert_eq!(app.allowed_plugins("storage").len(), 1);
    assert_eq!(count(&timeline, "load_allowed:app:mysql:storage"), 2);
}

#[test]
fn test_duplicate_and_missing_allowed_pairs() {
    let manager = manager();
    let timeline = timeline();
    let mysql = start(&manager, recorder(provider("mysql", "storage"), &timeline));
    let app = start(&manager, recorder(consumer("app", "storage"), &timeline));

    assert!(manager.load_allowed(&app, &mysql, "storage").unwrap());
    assert!(matches!(
        manager.load_allowed(&app, &mysql, "storage"),
        Err(PluginSystemError::DuplicateAllowed { .. })
    ));
    assert_eq!(app.allowed_plugins("storage").len(), 1);

    assert!(manager.unload_allowed(&app, &mysql, "storage").unwrap());
    assert!(matches!(
        manager.unload_allowed(&app, &mysql, "storage"),
        Err(PluginSystemError::AllowedNotFound { .. })
    ));
    assert_eq!(count(&timeline, "unload_allowed:app:mysql:storage"), 1);
}

#[test]
fn test_failing_load_allowed_during_consumer_load() {
    let manager = manager();
    let timeline = timeline();
    let mysql = start(&manager, recorder(provider("mysql", "storage"), &timeline));
    let app = start(&manager, RecorderSpec::new(&timeline).fail("load_allowed").class(consumer("app", "storage")));
    manager.load_plugin("mysql").unwrap();

    assert!(!manager.load_plugin("app").unwrap());
    assert!(app.is_error());
    assert!(!app.is_loaded());
    assert!(mysql.is_loaded());
}

#[test]
fn test_failing_load_allowed_during_retroactive_wiring() {
    let manager = manager();
    let timeline = timeline();
    let mysql = start(&manager, recorder(provider("mysql", "storage"), &timeline));
    let app = start(&manager, RecorderSpec::new(&timeline).fail("load_allowed").class(consumer("app", "storage")));
    manager.load_plugin("app").unwrap();

    // The consumer is blamed; the provider load goes on.
    assert!(manager.load_plugin("mysql").unwrap());
    assert!(mysql.is_loaded());
    assert!(app.is_error());
}

#[test]
fn test_singleton_dependency_is_shared() {
    let manager = manager();
    let timeline = timeline();
    let session = start(&manager, recorder(provider("session", "session"), &timeline));
    let first = start(&manager, recorder(depending_with("first", "session", DiffusionPolicy::Singleton), &timeline));
    let second = start(&manager, recorder(depending_with("second", "session", DiffusionPolicy::Singleton), &timeline));
    manager.load_plugin("first").unwrap();
    manager.load_plugin("second").unwrap();

    for consumer in [&first, &second] {
        assert_eq!(consumer.dependency("session").unwrap().instance_id(), session.instance_id());
    }
    assert_eq!(count(&timeline, "load_plugin:session"), 1);
}

#[test]
fn test_same_scope_replicas_are_isolated_per_consumer() {
    let manager = manager();
    let timeline = timeline();
    let session = start(&manager, recorder(provider("session", "session"), &timeline));
    let first = start(&manager, recorder(depending_with("first", "session", DiffusionPolicy::SameDiffusionScope), &timeline));
    let second = start(&manager, recorder(depending_with("second", "session", DiffusionPolicy::SameDiffusionScope), &timeline));
    manager.load_plugin("first").unwrap();
    manager.load_plugin("second").unwrap();

    let a = first.dependency("session").unwrap();
    let b = second.dependency("session").unwrap();
    assert!(a.is_replica() && b.is_replica());
    assert_ne!(a.instance_id(), b.instance_id());
    assert_ne!(a.scope(), b.scope());
    assert!(a.is_loaded() && b.is_loaded());
    // The global instance is untouched.
    assert!(!session.is_loaded());
    assert_eq!(manager.get_plugin_instance("session", a.scope()).unwrap().instance_id(), a.instance_id());
}

#[test]
fn test_same_scope_is_shared_down_the_dependency_chain() {
    let manager = manager();
    let timeline = timeline();
    start(&manager, recorder(PluginDescriptor::builder("session", "1.0.0").build(), &timeline));
    start(&manager, recorder(depending_with("store", "session", DiffusionPolicy::SameDiffusionScope), &timeline));
    let app = start(
        &manager,
        recorder(
            PluginDescriptor::builder("app", "1.0.0")
                .dependency(PluginDependency::new("session", "1.0.0").with_policy(DiffusionPolicy::SameDiffusionScope))
                .dependency(PluginDependency::new("store", "1.0.0").with_policy(DiffusionPolicy::SameDiffusionScope))
                .build(),
            &timeline,
        ),
    );
    assert!(manager.load_plugin("app").unwrap());

    let session = app.dependency("session").unwrap();
    let store = app.dependency("store").unwrap();
    assert_eq!(store.scope(), session.scope());
    assert_eq!(store.dependency("session").unwrap().instance_id(), session.instance_id());
}

#[test]
fn test_new_scope_creates_fresh_replicas() {
    let manager = manager();
    let timeline = timeline();
    start(&manager, recorder(PluginDescriptor::builder("session", "1.0.0").build(), &timeline));
    let first = start(&manager, recorder(depending_with("first", "session", DiffusionPolicy::NewDiffusionScope), &timeline));
    let second = start(&manager, recorder(depending_with("second", "session", DiffusionPolicy::NewDiffusionScope), &timeline));
    manager.load_plugin("first").unwrap();
    manager.load_plugin("second").unwrap();

    let a = first.dependency("session").unwrap();
    let b = second.dependency("session").unwrap();
    assert_ne!(a.scope(), b.scope());
    assert!(b.replica_id().unwrap() > a.replica_id().unwrap());
    assert!(b.instance_id() > a.instance_id());
}

#[test]
fn test_replicas_are_released_with_their_consumer() {
    let manager = manager();
    let timeline = timeline();
    start(&manager, recorder(PluginDescriptor::builder("session", "1.0.0").build(), &timeline));
    start(&manager, recorder(depending_with("app", "session", DiffusionPolicy::SameDiffusionScope), &timeline));
    manager.load_plugin("app").unwrap();
    let replica = manager.global_instance("app").unwrap().dependency("session").unwrap();

    manager.unload_plugin("app").unwrap();
    assert!(position(&timeline, "unload_plugin:app") < position(&timeline, "unload_plugin:session"));
    assert!(!replica.is_active());
    assert!(manager.get_plugin_instance("session", replica.scope()).is_none());
    assert!(manager.global_instance("session").is_some());
}

#[test]
fn test_allowed_replica_with_same_scope_policy() {
    let manager = manager();
    let timeline = timeline();
    let redis = start(&manager, recorder(provider("redis", "cache.kv"), &timeline));
    let app = start(
        &manager,
        recorder(
            PluginDescriptor::builder("app", "1.0.0")
                .capability_allowed_with("cache", DiffusionPolicy::SameDiffusionScope)
                .build(),
            &timeline,
        ),
    );

    assert!(manager.load_plugin("app").unwrap());
    let injected = app.allowed_plugins("cache");
    assert_eq!(injected.len(), 1);
    assert!(injected[0].is_replica());
    assert!(injected[0].is_loaded());
    assert!(!redis.is_loaded());

    let scope = injected[0].scope();
    manager.unload_plugin("app").unwrap();
    assert!(manager.get_plugin_instance("redis", scope).is_none());
}

#[test]
fn test_retroactive_wiring_keeps_existing_new_scope_replica() {
    let manager = manager();
    let timeline = timeline();
    start(&manager, recorder(provider("db", "db"), &timeline));
    let app = start(
        &manager,
        recorder(
            PluginDescriptor::builder("app", "1.0.0")
                .capability_allowed_with("db", DiffusionPolicy::NewDiffusionScope)
                .build(),
            &timeline,
        ),
    );
    assert!(manager.load_plugin("app").unwrap());
    assert_eq!(app.allowed_plugins("db").len(), 1);

    for _ in 0..3 {
        assert!(manager.load_plugin("db").unwrap());
        assert!(manager.unload_plugin("db").unwrap());
    }
    let injected = app.allowed_plugins("db");
    assert_eq!(injected.len(), 1);
    assert!(injected[0].is_replica());
    // The global instance plus the one replica held by app.
    assert_eq!(manager.registry().instances_of("db").len(), 2);
}

#[test]
fn test_failed_replica_loads_do_not_leak_instances() {
    let manager = manager();
    let timeline = timeline();
    start(
        &manager,
        RecorderSpec::new(&timeline)
            .fail("load_plugin")
            .class(PluginDescriptor::builder("session", "1.0.0").build()),
    );
    start(&manager, recorder(depending_with("app", "session", DiffusionPolicy::NewDiffusionScope), &timeline));

    for _ in 0..5 {
        assert!(!manager.load_plugin("app").unwrap());
    }
    assert!(count(&timeline, "load_plugin:session") >= 1);
    let sessions = manager.registry().instances_of("session");
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].is_replica());
}

#[test]
fn test_incompatible_replica_is_discarded() {
    let manager = manager();
    let timeline = timeline();
    start(&manager, recorder(PluginDescriptor::builder("session", "1.0.0").build(), &timeline));
    start(
        &manager,
        recorder(
            PluginDescriptor::builder("app", "1.0.0")
                .dependency(
                    PluginDependency::new("session", "2.0.0").with_policy(DiffusionPolicy::NewDiffusionScope),
                )
                .build(),
            &timeline,
        ),
    );

    assert!(!manager.load_plugin("app").unwrap());
    assert!(!manager.load_plugin("app").unwrap());
    assert_eq!(count(&timeline, "load_plugin:session"), 0);
    assert_eq!(manager.registry().instances_of("session").len(), 1);
}

#[test]
fn test_released_replica_ids_are_never_reused() {
    let manager = manager();
    let timeline = timeline();
    start(&manager, recorder(PluginDescriptor::builder("session", "1.0.0").build(), &timeline));
    let app = start(&manager, recorder(depending_with("app", "session", DiffusionPolicy::NewDiffusionScope), &timeline));

    let mut replica_ids = Vec::new();
    let mut instance_ids = Vec::new();
    for _ in 0..3 {
        assert!(manager.load_plugin("app").unwrap());
        let replica = app.dependency("session").unwrap();
        replica_ids.push(replica.replica_id().unwrap());
        instance_ids.push(replica.instance_id());

        assert!(manager.unload_plugin("app").unwrap());
        assert!(manager.get_plugin_instance("session", replica.scope()).is_none());
    }
    assert!(replica_ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(instance_ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(instance_ids.iter().all(|id| *id > app.instance_id()));
}
