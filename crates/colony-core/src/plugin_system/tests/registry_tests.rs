use std::sync::Arc;

use super::support::{recorder, timeline};
use crate::event::EventChannel;
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::instance::{InstanceId, PluginHandle, PluginInstance, ScopeId};
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::traits::PluginClass;

fn class(descriptor: PluginDescriptor) -> PluginClass {
    recorder(descriptor, &timeline())
}

fn instance(registry: &mut PluginRegistry, id: &str, scope: ScopeId) -> PluginHandle {
    let class = registry.class(id).cloned().unwrap();
    let instance_id = registry.next_instance_id();
    let replica_id = (!scope.is_global()).then(|| registry.next_replica_id());
    let handle = Arc::new(PluginInstance::new(
        instance_id,
        scope,
        replica_id,
        Arc::clone(class.descriptor()),
        class.create(),
    ));
    registry.insert_instance(Arc::clone(&handle)).unwrap();
    registry.register_plugin_capabilities(&handle);
    handle
}

#[test]
fn test_class_registration() {
    let mut registry = PluginRegistry::new();
    registry.register_class(class(PluginDescriptor::builder("b", "1.0.0").build())).unwrap();
    registry.register_class(class(PluginDescriptor::builder("a", "1.0.0").build())).unwrap();
    assert_eq!(registry.class_ids(), vec!["b", "a"]);

    let duplicate = registry.register_class(class(PluginDescriptor::builder("a", "2.0.0").build()));
    assert!(matches!(duplicate, Err(PluginSystemError::ClassAlreadyRegistered { plugin_id }) if plugin_id == "a"));

    assert!(registry.unregister_class("b").is_some());
    assert_eq!(registry.class_ids(), vec!["a"]);
    assert!(!registry.has_class("b"));
}

#[test]
fn test_counters_are_monotonic() {
    let mut registry = PluginRegistry::new();
    let ids: Vec<InstanceId> = (0..3).map(|_| registry.next_instance_id()).collect();
    assert_eq!(ids, vec![InstanceId(1), InstanceId(2), InstanceId(3)]);
    assert_eq!(registry.next_replica_id(), 1);
    assert_eq!(registry.next_replica_id(), 2);
    assert_eq!(registry.next_scope_id(), ScopeId(1));
    assert_eq!(registry.next_scope_id(), ScopeId(2));
}

#[test]
fn test_one_instance_per_scope() {
    let mut registry = PluginRegistry::new();
    registry.register_class(class(PluginDescriptor::builder("db", "1.0.0").build())).unwrap();
    let global = instance(&mut registry, "db", ScopeId::GLOBAL);
    let replica = instance(&mut registry, "db", ScopeId(7));

    assert_eq!(registry.global("db").unwrap().instance_id(), global.instance_id());
    assert_eq!(registry.instance_in_scope("db", ScopeId(7)).unwrap().instance_id(), replica.instance_id());
    assert_eq!(replica.replica_id(), Some(1));
    assert_eq!(registry.instances_of("db").len(), 2);

    let class = registry.class("db").cloned().unwrap();
    let clash = Arc::new(PluginInstance::new(
        registry.next_instance_id(),
        ScopeId::GLOBAL,
        None,
        Arc::clone(class.descriptor()),
        class.create(),
    ));
    assert!(matches!(
        registry.insert_instance(clash),
        Err(PluginSystemError::AlreadyStarted { scope: 0, .. })
    ));
}

#[test]
fn test_capability_index_covers_ancestors() {
    let mut registry = PluginRegistry::new();
    registry
        .register_class(class(PluginDescriptor::builder("mysql", "1.0.0").capability("storage.sql.mysql").build()))
        .unwrap();
    registry
        .register_class(class(PluginDescriptor::builder("redis", "1.0.0").capability("storage.kv").build()))
        .unwrap();
    instance(&mut registry, "mysql", ScopeId::GLOBAL);
    instance(&mut registry, "redis", ScopeId::GLOBAL);
    // Replicas are not indexed as providers.
    instance(&mut registry, "redis", ScopeId(3));

    let ids = |capability: &str| -> Vec<String> {
        registry.providers_of(capability).iter().map(|h| h.id().to_string()).collect()
    };
    assert_eq!(ids("storage"), vec!["mysql", "redis"]);
    assert_eq!(ids("storage.sql"), vec!["mysql"]);
    assert_eq!(ids("storage.sql.mysql"), vec!["mysql"]);
    assert!(ids("storage.sql.mysql.v8").is_empty());
    assert!(ids("store").is_empty());
}

#[test]
fn test_consumers_allowing_matches_ancestors() {
    let mut registry = PluginRegistry::new();
    registry
        .register_class(class(PluginDescriptor::builder("ui", "1.0.0").capability_allowed("widgets").build()))
        .unwrap();
    let consumer = instance(&mut registry, "ui", ScopeId::GLOBAL);
    registry.register_allowed(&consumer);

    let found = registry.consumers_allowing(&["widgets.button".to_string(), "widgets".to_string()]);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0.id(), "ui");
    assert_eq!(found[0].1, "widgets");
    assert!(registry.consumers_allowing(&["gadgets".to_string()]).is_empty());

    registry.unregister_allowed(consumer.instance_id());
    assert!(registry.consumers_allowing(&["widgets".to_string()]).is_empty());
}

#[test]
fn test_relationship_indexes_and_references() {
    let mut registry = PluginRegistry::new();
    for id in ["db", "api", "ui"] {
        registry.register_class(class(PluginDescriptor::builder(id, "1.0.0").build())).unwrap();
    }
    let db = instance(&mut registry, "db", ScopeId::GLOBAL);
    let api = instance(&mut registry, "api", ScopeId::GLOBAL);
    let ui = instance(&mut registry, "ui", ScopeId::GLOBAL);

    registry.add_dependent(db.instance_id(), api.instance_id());
    registry.add_dependent(db.instance_id(), api.instance_id());
    registry.add_allowed_into(api.instance_id(), ui.instance_id(), "api");
    assert_eq!(registry.dependents_of(db.instance_id()).len(), 1);
    assert_eq!(registry.allowed_into(api.instance_id())[0].1, "api");
    assert!(registry.is_referenced(db.instance_id()));
    assert!(registry.is_referenced(api.instance_id()));
    assert!(!registry.is_referenced(ui.instance_id()));

    registry.remove_dependent(db.instance_id(), api.instance_id());
    registry.remove_allowed_into(api.instance_id(), ui.instance_id(), "api");
    assert!(!registry.is_referenced(db.instance_id()));
    assert!(!registry.is_referenced(api.instance_id()));
}

#[test]
fn test_remove_instance_purges_indexes() {
    let mut registry = PluginRegistry::new();
    registry
        .register_class(class(
            PluginDescriptor::builder("db", "1.0.0")
                .capability("storage")
                .capability_allowed("cache")
                .build(),
        ))
        .unwrap();
    registry.register_class(class(PluginDescriptor::builder("api", "1.0.0").build())).unwrap();
    let db = instance(&mut registry, "db", ScopeId::GLOBAL);
    let api = instance(&mut registry, "api", ScopeId::GLOBAL);
    registry.register_allowed(&db);
    registry.add_dependent(api.instance_id(), db.instance_id());
    registry
        .events_mut()
        .subscribe(EventChannel::Plugin, "db.ready", db.instance_id(), None)
        .unwrap();

    let removed = registry.remove_instance(db.instance_id()).unwrap();
    assert_eq!(removed.id(), "db");
    assert!(registry.global("db").is_none());
    assert!(registry.providers_of("storage").is_empty());
    assert!(registry.consumers_allowing(&["cache".to_string()]).is_empty());
    assert!(registry.dependents_of(api.instance_id()).is_empty());
    assert!(registry.events().is_empty());
    assert!(registry.remove_instance(db.instance_id()).is_none());
    // The class survives its instances.
    assert!(registry.has_class("db"));
}

#[test]
fn test_group_scope_is_stable_per_consumer() {
    let mut registry = PluginRegistry::new();
    let first = registry.group_scope(InstanceId(1));
    let second = registry.group_scope(InstanceId(2));
    assert_ne!(first, second);
    assert_eq!(registry.group_scope(InstanceId(1)), first);
    assert!(!first.is_global());
}
