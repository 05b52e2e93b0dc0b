use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::plugin_system::loader::{ManifestLoader, PluginCatalog};
use crate::plugin_system::manager::{PluginManager, PluginManagerBuilder};
use crate::plugin_system::traits::{Plugin, PluginClass};
use crate::storage::config::{ConfigStore, ManagerConfig};
use crate::storage::layout::ManagerLayout;

/// Main application struct: configuration, layout, manifest discovery and the plugin manager.
pub struct Application {
    store: ConfigStore,
    layout: ManagerLayout,
    manager: PluginManager,
    loader: ManifestLoader,
    catalog: PluginCatalog,
    shutdown_failed: Arc<AtomicBool>,
}

impl Application {
    /// Creates an application from a populated configuration store.
    pub fn new(store: ConfigStore) -> Result<Self> {
        Self::with_manager(store, |builder| builder)
    }

    /// Like [`new`](Self::new), letting the caller adjust the manager builder.
    pub fn with_manager<F>(store: ConfigStore, customize: F) -> Result<Self>
    where
        F: FnOnce(PluginManagerBuilder) -> PluginManagerBuilder,
    {
        log::info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        let config = ManagerConfig::from_store(&store).map_err(|e| {
            Error::lifecycle(KernelLifecyclePhase::Bootstrap, "invalid configuration", Some(e.into()))
        })?;

        let layout = ManagerLayout::new(&config.manager_path);
        layout.ensure().map_err(|e| {
            Error::lifecycle(
                KernelLifecyclePhase::Bootstrap,
                format!("cannot prepare manager path {}", layout.root().display()),
                Some(e.into()),
            )
        })?;
        log::info!("Using manager path {} ({:?} layout)", layout.root().display(), layout.mode());

        let loader = ManifestLoader::with_dirs(config.plugin_paths.clone());
        let manager = customize(PluginManager::builder(config)).build();
        Ok(Self {
            store,
            layout,
            manager,
            loader,
            catalog: PluginCatalog::new(),
            shutdown_failed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Loads `config_file` (if any) overlaid with `COLONY_*` environment variables.
    pub fn from_config_file(config_file: Option<&Path>) -> Result<Self> {
        let store = ConfigStore::load(config_file)?;
        Self::new(store)
    }

    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    pub fn layout(&self) -> &ManagerLayout {
        &self.layout
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Make `factory` available to manifests naming `entry_point`.
    pub fn register_factory<F>(&mut self, entry_point: &str, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.catalog.register(entry_point, factory);
    }

    /// Register a class directly, without a manifest.
    pub fn register_class(&self, class: PluginClass) -> Result<()> {
        self.manager.register_plugin_class(class)?;
        Ok(())
    }

    /// Scan the plugin paths and register every manifest bound to a known factory.
    pub async fn scan_plugins(&mut self) -> Result<usize> {
        let manifests = self.loader.scan_for_manifests().await.map_err(|e| {
            Error::lifecycle(KernelLifecyclePhase::Discovery, "manifest scan failed", Some(e.into()))
        })?;
        log::info!("Found {} plugin manifests", manifests.len());
        Ok(self.manager.discover(manifests, &self.catalog))
    }

    /// Load the plugin system and process main loop events until exit.
    pub fn run(&self) -> Result<()> {
        self.manager
            .load_system()
            .map_err(|e| Error::lifecycle(KernelLifecyclePhase::Run, "loading plugin system failed", Some(e.into())))?;
        self.manager.main_loop();
        if self.shutdown_failed.load(Ordering::SeqCst) {
            return Err(Error::lifecycle(
                KernelLifecyclePhase::Shutdown,
                "plugin system did not unload cleanly",
                None,
            ));
        }
        Ok(())
    }

    /// Unload the plugin system and ask the main loop to return.
    pub fn shutdown(&self) -> Result<()> {
        let unloaded = self.manager.unload_system();
        self.manager.exit();
        unloaded.map_err(|e| Error::lifecycle(KernelLifecyclePhase::Shutdown, "unloading plugin system failed", Some(e.into())))
    }

    /// Handle usable from another thread (or a signal task) while [`run`](Self::run) blocks.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            manager: self.manager.clone(),
            failed: Arc::clone(&self.shutdown_failed),
        }
    }
}

/// Requests an orderly shutdown from outside the main loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    manager: PluginManager,
    failed: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Queue unload of the plugin system followed by exit on the main loop thread.
    pub fn request(&self) {
        let failed = Arc::clone(&self.failed);
        self.manager.execute(move |manager| {
            if let Err(e) = manager.unload_system() {
                log::error!("Problem unloading plugin system: {}", e);
                failed.store(true, Ordering::SeqCst);
            }
            manager.exit();
        });
    }
}
