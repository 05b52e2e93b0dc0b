use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plugin_system::dependency::{OperativeSystemCondition, PackageDependency, PluginDependency};
use crate::plugin_system::descriptor::{AllowedCapability, DiffusionPolicy, LoadingType, PluginDescriptor};
use crate::plugin_system::error::{PluginResult, PluginSystemError};

fn default_true() -> bool {
    true
}

/// A plugin dependency as written in `manifest.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPluginDependency {
    pub id: String,
    #[serde(default = "ManifestPluginDependency::any_version")]
    pub version: String,
    #[serde(default)]
    pub diffusion_policy: DiffusionPolicy,
    #[serde(default = "default_true")]
    pub mandatory: bool,
    /// Only applies on this operating system (`windows`, `mac`, `unix`)
    #[serde(default)]
    pub os: Option<String>,
}

impl ManifestPluginDependency {
    fn any_version() -> String {
        "*".to_string()
    }
}

/// A package dependency as written in `manifest.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPackageDependency {
    pub name: String,
    #[serde(default)]
    pub import_names: Vec<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub mandatory: bool,
    #[serde(default)]
    pub os: Option<String>,
}

/// Allowed capability entry: either a bare capability path (singleton) or a
/// `{ "capability", "policy" }` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestAllowedCapability {
    Path(String),
    WithPolicy(AllowedCapability),
}

impl ManifestAllowedCapability {
    fn into_allowed(self) -> AllowedCapability {
        match self {
            ManifestAllowedCapability::Path(capability) => AllowedCapability::new(&capability),
            ManifestAllowedCapability::WithPolicy(allowed) => allowed,
        }
    }
}

/// Represents the `manifest.json` describing one plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique identifier for the plugin
    pub id: String,

    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub short_name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Name of the factory in the plugin catalog (defaults to the id)
    #[serde(default)]
    pub entry_point: Option<String>,

    #[serde(default)]
    pub loading_type: LoadingType,

    #[serde(default)]
    pub platforms: Vec<String>,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub capabilities_allowed: Vec<ManifestAllowedCapability>,

    #[serde(default)]
    pub dependencies: Vec<ManifestPluginDependency>,

    #[serde(default)]
    pub package_dependencies: Vec<ManifestPackageDependency>,

    #[serde(default)]
    pub events_fired: Vec<String>,

    #[serde(default)]
    pub events_handled: Vec<String>,

    /// Handler arity per handled event pattern
    #[serde(default)]
    pub event_arities: BTreeMap<String, usize>,

    #[serde(default)]
    pub main_modules: Vec<String>,

    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Directory holding the manifest, set by the loader
    #[serde(skip)]
    pub plugin_base_dir: PathBuf,
}

impl PluginManifest {
    /// Parse a manifest; `path` is only used for error reporting and the base dir.
    pub fn from_json(content: &str, path: &Path) -> PluginResult<Self> {
        let mut manifest: PluginManifest =
            serde_json::from_str(content).map_err(|e| PluginSystemError::ManifestError {
                path: path.to_path_buf(),
                message: format!("Failed to parse manifest JSON: {}", e),
                source: Some(Box::new(e)),
            })?;
        manifest.validate(path)?;
        manifest.plugin_base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> PluginResult<()> {
        let invalid = |message: &str| PluginSystemError::ManifestError {
            path: path.to_path_buf(),
            message: message.to_string(),
            source: None,
        };
        if self.id.trim().is_empty() {
            return Err(invalid("plugin id must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("plugin version must not be empty"));
        }
        if self.capabilities.iter().any(|c| c.is_empty()) {
            return Err(invalid("capability paths must not be empty"));
        }
        Ok(())
    }

    pub fn entry_point(&self) -> &str {
        self.entry_point.as_deref().unwrap_or(&self.id)
    }

    /// Build the immutable descriptor of this plugin.
    pub fn to_descriptor(&self) -> PluginDescriptor {
        let mut builder = PluginDescriptor::builder(&self.id, &self.version)
            .description(&self.description)
            .author(&self.author)
            .loading_type(self.loading_type);
        if let Some(name) = &self.name {
            builder = builder.name(name);
        }
        if let Some(short_name) = &self.short_name {
            builder = builder.short_name(short_name);
        }
        for platform in &self.platforms {
            builder = builder.platform(platform);
        }
        for capability in &self.capabilities {
            builder = builder.capability(capability);
        }
        for allowed in self.capabilities_allowed.iter().cloned() {
            let allowed = allowed.into_allowed();
            builder = builder.capability_allowed_with(&allowed.capability, allowed.policy);
        }
        for dep in &self.dependencies {
            let mut dependency = if dep.mandatory {
                PluginDependency::new(&dep.id, &dep.version)
            } else {
                PluginDependency::optional(&dep.id, &dep.version)
            }
            .with_policy(dep.diffusion_policy);
            if let Some(os) = &dep.os {
                dependency = dependency.with_condition(OperativeSystemCondition::new(os));
            }
            builder = builder.dependency(dependency);
        }
        for dep in &self.package_dependencies {
            let import_names: Vec<&str> = if dep.import_names.is_empty() {
                vec![dep.name.as_str()]
            } else {
                dep.import_names.iter().map(String::as_str).collect()
            };
            let mut dependency = PackageDependency::new(&dep.name, &import_names, &dep.version);
            if let Some(url) = &dep.url {
                dependency = dependency.with_url(url);
            }
            if !dep.mandatory {
                dependency = dependency.optional();
            }
            if let Some(os) = &dep.os {
                dependency = dependency.with_condition(OperativeSystemCondition::new(os));
            }
            builder = builder.dependency(dependency);
        }
        for event in &self.events_fired {
            builder = builder.event_fired(event);
        }
        for event in &self.events_handled {
            builder = match self.event_arities.get(event) {
                Some(arity) => builder.event_handled_with_arity(event, *arity),
                None => builder.event_handled(event),
            };
        }
        for module in &self.main_modules {
            builder = builder.main_module(module);
        }
        for (key, value) in &self.attributes {
            builder = builder.attribute(key, value.clone());
        }
        builder.build()
    }
}
