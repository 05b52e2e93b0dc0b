use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::fs;

use crate::kernel::constants::MANIFEST_FILE;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::traits::{Plugin, PluginClass, PluginFactory};

fn manifest_io_error(path: &Path, operation: &str, error: std::io::Error) -> PluginSystemError {
    PluginSystemError::ManifestError {
        path: path.to_path_buf(),
        message: format!("{} failed: {}", operation, error),
        source: Some(Box::new(error)),
    }
}

/// Finds `manifest.json` files under the plugin paths.
#[derive(Debug, Default)]
pub struct ManifestLoader {
    plugin_dirs: Vec<PathBuf>,
    manifests: HashMap<String, PluginManifest>,
}

impl ManifestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dirs<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            plugin_dirs: dirs.into_iter().map(Into::into).collect(),
            manifests: HashMap::new(),
        }
    }

    pub fn add_plugin_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.plugin_dirs.push(dir.as_ref().to_path_buf());
    }

    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }

    /// Scan every plugin path recursively.
    ///
    /// Missing plugin paths are skipped; invalid manifests are logged and
    /// skipped, as are manifests reusing an id found earlier. Results are in
    /// plugin path order, then path order within each directory.
    pub async fn scan_for_manifests(&mut self) -> PluginResult<Vec<PluginManifest>> {
        let mut found = Vec::new();
        for dir in &self.plugin_dirs {
            match fs::metadata(dir).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    log::warn!("Plugin path {} is not a directory", dir.display());
                    continue;
                }
                Err(_) => {
                    log::debug!("Plugin path {} does not exist", dir.display());
                    continue;
                }
            }
            self.scan_directory_boxed(dir.clone(), &mut found).await?;
        }

        let mut manifests = Vec::with_capacity(found.len());
        for manifest in found {
            if self.manifests.contains_key(&manifest.id) {
                log::warn!(
                    "Skipping manifest {}: plugin id '{}' already found",
                    manifest.plugin_base_dir.display(),
                    manifest.id
                );
                continue;
            }
            self.manifests.insert(manifest.id.clone(), manifest.clone());
            manifests.push(manifest);
        }
        Ok(manifests)
    }

    fn scan_directory_boxed<'a>(
        &'a self,
        dir: PathBuf,
        manifests: &'a mut Vec<PluginManifest>,
    ) -> Pin<Box<dyn Future<Output = PluginResult<()>> + Send + 'a>> {
        Box::pin(self.scan_directory_inner(dir, manifests))
    }

    async fn scan_directory_inner(&self, dir: PathBuf, manifests: &mut Vec<PluginManifest>) -> PluginResult<()> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if fs::metadata(&manifest_path).await.is_ok_and(|m| m.is_file()) {
            match Self::load_manifest(&manifest_path).await {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => log::error!("Error loading manifest from {}: {}", manifest_path.display(), e),
            }
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| manifest_io_error(&dir, "read_dir", e))?;
        let mut subdirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| manifest_io_error(&dir, "read_dir", e))?
        {
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => subdirs.push(entry.path()),
                Ok(_) => {}
                Err(e) => log::warn!("Failed to get file type of {}: {}", entry.path().display(), e),
            }
        }
        subdirs.sort();

        for subdir in subdirs {
            if let Err(e) = self.scan_directory_boxed(subdir.clone(), manifests).await {
                log::error!("Error scanning subdirectory {}: {}", subdir.display(), e);
            }
        }
        Ok(())
    }

    /// Read and parse one manifest file.
    pub async fn load_manifest<P: AsRef<Path>>(path: P) -> PluginResult<PluginManifest> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| manifest_io_error(path, "read_manifest", e))?;
        PluginManifest::from_json(&content, path)
    }

    pub fn get_manifest(&self, id: &str) -> Option<&PluginManifest> {
        self.manifests.get(id)
    }

    /// Every manifest found so far, sorted by id.
    pub fn manifests(&self) -> Vec<&PluginManifest> {
        let mut manifests: Vec<&PluginManifest> = self.manifests.values().collect();
        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        manifests
    }
}

/// Factories by manifest entry point.
///
/// Plugins are compiled in, so a manifest only becomes a class once the
/// binary registered a factory under its entry point.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("entry_points", &self.entry_points())
            .finish()
    }
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `entry_point`, replacing any previous one.
    pub fn register<F>(&mut self, entry_point: &str, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(entry_point.to_string(), Arc::new(factory))
            .is_some()
        {
            log::warn!("Replaced plugin factory for entry point '{}'", entry_point);
        }
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories.contains_key(entry_point)
    }

    pub fn entry_points(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Pair a manifest with the factory of its entry point.
    pub fn bind(&self, manifest: &PluginManifest) -> PluginResult<PluginClass> {
        let factory = self
            .factories
            .get(manifest.entry_point())
            .ok_or_else(|| PluginSystemError::ManifestError {
                path: manifest.plugin_base_dir.join(MANIFEST_FILE),
                message: format!(
                    "No factory registered for entry point '{}' of plugin '{}'",
                    manifest.entry_point(),
                    manifest.id
                ),
                source: None,
            })?;
        Ok(PluginClass::from_factory(manifest.to_descriptor(), Arc::clone(factory)))
    }
}
