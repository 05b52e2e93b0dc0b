
#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::event::{EventSource, PluginEvent, LOAD_PLUGIN_EVENT, MANAGER_EVENT_ROOT};
    use crate::plugin_system::capability::is_event_handled;

    #[test]
    fn test_lifecycle_events_live_under_manager_root() {
        assert!(is_event_handled(MANAGER_EVENT_ROOT, LOAD_PLUGIN_EVENT));
        assert!(is_event_handled("plugin_manager.plugin", LOAD_PLUGIN_EVENT));
        assert!(!is_event_handled(LOAD_PLUGIN_EVENT, MANAGER_EVENT_ROOT));
    }

    #[test]
    fn test_event_accessors() {
        let event = PluginEvent::from_plugin("db", "db.ready", vec![json!("main"), json!(3)]);
        assert_eq!(event.source, EventSource::Plugin("db".to_string()));
        assert_eq!(event.arg_str(0), Some("main"));
        assert_eq!(event.arg(1), Some(&json!(3)));
        assert_eq!(event.arg_str(1), None);
        assert_eq!(event.arg(2), None);
    }

    #[test]
    fn test_padded_for_adds_single_null() {
        let event = PluginEvent::from_manager("plugin_manager.x", vec![json!("a")]);
        assert_eq!(event.padded_for(Some(2)).args, vec![json!("a"), json!(null)]);
        assert_eq!(event.padded_for(Some(1)).args, vec![json!("a")]);
        assert_eq!(event.padded_for(Some(3)).args, vec![json!("a")]);
        assert_eq!(event.padded_for(None).args, vec![json!("a")]);
    }

    #[test]
    fn test_event_source_display() {
        assert_eq!(EventSource::Manager.to_string(), "plugin_manager");
        assert_eq!(EventSource::Plugin("db".into()).to_string(), "db");
    }
}
