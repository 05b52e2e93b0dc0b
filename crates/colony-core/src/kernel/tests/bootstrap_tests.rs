use std::any::Any;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::{tempdir, TempDir};

use crate::kernel::bootstrap::Application;
use crate::kernel::constants::{LOG_LEVEL_KEY, LOOP_TIMEOUT_KEY, MANAGER_PATH_KEY, STOP_ON_CYCLE_ERROR_KEY};
use crate::kernel::error::{Error, KernelLifecyclePhase};
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::traits::{HookResult, Plugin, PluginClass, PluginContext, PluginError};
use crate::storage::config::ConfigStore;
use crate::storage::layout::LayoutMode;

/// Plugin flipping a shared flag on load and unload.
struct Switch {
    on: Arc<AtomicBool>,
    fail_unload: bool,
}

impl Plugin for Switch {
    fn load_plugin(&self, _ctx: &PluginContext) -> HookResult {
        self.on.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unload_plugin(&self, _ctx: &PluginContext) -> HookResult {
        self.on.store(false, Ordering::SeqCst);
        if self.fail_unload {
            return Err(PluginError::ExecutionError("refusing to unload".to_string()));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn switch_class(id: &str, on: &Arc<AtomicBool>, fail_unload: bool) -> PluginClass {
    let on = Arc::clone(on);
    PluginClass::new(PluginDescriptor::builder(id, "1.0.0").build(), move || {
        Box::new(Switch {
            on: Arc::clone(&on),
            fail_unload,
        })
    })
}

fn store_for(dir: &Path) -> ConfigStore {
    let mut store = ConfigStore::new();
    store.set(MANAGER_PATH_KEY, dir.display().to_string()).unwrap();
    store.set(LOOP_TIMEOUT_KEY, 20).unwrap();
    store
}

fn application() -> (TempDir, Application) {
    let dir = tempdir().unwrap();
    let app = Application::new(store_for(dir.path())).unwrap();
    (dir, app)
}

#[test]
fn test_new_prepares_personal_layout() {
    let (dir, app) = application();
    let layout = app.layout();
    assert_eq!(layout.root(), dir.path());
    assert_eq!(layout.mode(), LayoutMode::Personal);
    assert!(layout.plugins_dir().is_dir());
    assert!(layout.libraries_dir().is_dir());
    assert!(layout.marker_file().is_file());
    assert_eq!(app.manager().config().manager_path, dir.path());
    assert_eq!(app.manager().config().plugin_paths, vec![layout.plugins_dir()]);
}

#[test]
fn test_new_rejects_invalid_configuration() {
    let dir = tempdir().unwrap();
    let mut store = store_for(dir.path());
    store.set(LOG_LEVEL_KEY, "chatty").unwrap();
    match Application::new(store) {
        Err(Error::KernelLifecycleError { phase, .. }) => assert_eq!(phase, KernelLifecyclePhase::Bootstrap),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("invalid log level accepted"),
    }
}

#[tokio::test]
async fn test_scan_registers_manifests_with_factories() {
    let (dir, mut app) = application();
    let on = Arc::new(AtomicBool::new(false));
    for (id, entry_point) in [("greeter", "greeter"), ("orphan", "missing")] {
        let plugin_dir = dir.path().join("plugins").join(id);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(
            plugin_dir.join("manifest.json"),
            format!(r#"{{"id": "{}", "version": "1.0.0", "entry_point": "{}"}}"#, id, entry_point),
        )
        .unwrap();
    }
    let flag = Arc::clone(&on);
    app.register_factory("greeter", move || {
        Box::new(Switch {
            on: Arc::clone(&flag),
            fail_unload: false,
        })
    });

    assert_eq!(app.scan_plugins().await.unwrap(), 1);
    assert!(app.manager().has_plugin_class("greeter"));
    assert!(!app.manager().has_plugin_class("orphan"));

    app.manager().load_system().unwrap();
    assert!(on.load(Ordering::SeqCst));
    app.shutdown().unwrap();
    assert!(!on.load(Ordering::SeqCst));
}

#[test]
fn test_run_until_shutdown_is_requested() {
    let (_dir, app) = application();
    let on = Arc::new(AtomicBool::new(false));
    app.register_class(switch_class("switch", &on, false)).unwrap();
    let handle = app.shutdown_handle();

    let result = thread::scope(|scope| {
        let running = scope.spawn(|| app.run());
        handle.request();
        running.join().unwrap()
    });
    assert!(result.is_ok());
    assert!(!on.load(Ordering::SeqCst));
    assert!(app.manager().loaded_plugins().is_empty());
    assert!(!app.manager().is_running());
}

#[test]
fn test_run_reports_unclean_shutdown() {
    let dir = tempdir().unwrap();
    let mut store = store_for(dir.path());
    store.set(STOP_ON_CYCLE_ERROR_KEY, true).unwrap();
    let app = Application::new(store).unwrap();
    let on = Arc::new(AtomicBool::new(false));
    app.register_class(switch_class("stubborn", &on, true)).unwrap();

    app.shutdown_handle().request();
    match app.run() {
        Err(Error::KernelLifecycleError { phase, .. }) => assert_eq!(phase, KernelLifecyclePhase::Shutdown),
        other => panic!("expected a shutdown failure, got {:?}", other),
    }
}

#[test]
fn test_shutdown_makes_main_loop_return() {
    let (_dir, app) = application();
    let on = Arc::new(AtomicBool::new(false));
    app.register_class(switch_class("switch", &on, false)).unwrap();
    app.manager().load_system().unwrap();

    app.shutdown().unwrap();
    assert!(!on.load(Ordering::SeqCst));
    app.manager().main_loop();
    assert!(!app.manager().is_running());
}
