use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::plugin_system::descriptor::DiffusionPolicy;
use crate::plugin_system::manager::PluginManager;

/// Error that can occur when resolving dependencies
#[derive(Debug, Error)]
pub enum DependencyError {
    /// The required plugin was not found
    #[error("Required plugin not found: {0}")]
    MissingPlugin(String),

    /// The plugin was found, but the version is incompatible
    #[error("Plugin version mismatch: '{plugin_id}' requires version '{required}' but found '{actual_version}'")]
    IncompatibleVersion {
        plugin_id: String,
        required: String,
        actual_version: String,
    },

    /// Dependency cycle detected
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

// --- Conditions ---

/// Gate deciding whether a dependency applies at all.
///
/// A dependency whose condition fails is not applicable and never blocks loading.
pub trait Condition: fmt::Debug + Send + Sync {
    fn test_condition(&self) -> bool;
}

/// Normalized tag of the host operating system: `windows`, `mac`, `unix` or `other`.
pub fn normalize_os() -> &'static str {
    normalize_os_name(std::env::consts::OS)
}

pub fn normalize_os_name(os: &str) -> &'static str {
    match os {
        "windows" => "windows",
        "macos" | "ios" => "mac",
        "linux" | "android" | "freebsd" | "netbsd" | "openbsd" | "dragonfly" | "solaris"
        | "illumos" => "unix",
        _ => "other",
    }
}

/// Succeeds iff the normalized host OS equals the configured tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperativeSystemCondition {
    pub operative_system: String,
}

impl OperativeSystemCondition {
    pub fn new(operative_system: &str) -> Self {
        Self {
            operative_system: operative_system.to_string(),
        }
    }
}

impl Condition for OperativeSystemCondition {
    fn test_condition(&self) -> bool {
        normalize_os() == self.operative_system
    }
}

fn conditions_apply(conditions: &[Arc<dyn Condition>]) -> bool {
    conditions.iter().all(|condition| condition.test_condition())
}

// --- Plugin dependency ---

/// Represents a dependency on another plugin
#[derive(Debug, Clone)]
pub struct PluginDependency {
    /// The id of the required plugin
    pub id: String,

    /// Expected version: exact, wildcard ("1.x.x") or a semver requirement
    pub version: String,

    /// How the dependency instance is shared
    pub diffusion_policy: DiffusionPolicy,

    /// Whether this is a hard requirement or optional dependency
    pub mandatory: bool,

    /// Applicability gates
    pub conditions: Vec<Arc<dyn Condition>>,
}

impl PluginDependency {
    /// Create a new mandatory singleton dependency
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
            diffusion_policy: DiffusionPolicy::Singleton,
            mandatory: true,
            conditions: Vec::new(),
        }
    }

    /// Create a new optional dependency
    pub fn optional(id: &str, version: &str) -> Self {
        Self {
            mandatory: false,
            ..Self::new(id, version)
        }
    }

    pub fn with_policy(mut self, policy: DiffusionPolicy) -> Self {
        self.diffusion_policy = policy;
        self
    }

    pub fn with_condition(mut self, condition: impl Condition + 'static) -> Self {
        self.conditions.push(Arc::new(condition));
        self
    }

    /// Whether the attached conditions make this dependency relevant on this host.
    pub fn is_applicable(&self) -> bool {
        conditions_apply(&self.conditions)
    }

    /// Side-effect free feasibility check against the manager state.
    pub fn test_dependency(&self, manager: &PluginManager) -> bool {
        self.test_dependency_visited(manager, &mut HashSet::new())
    }

    pub(crate) fn test_dependency_visited(&self, manager: &PluginManager, visited: &mut HashSet<String>) -> bool {
        if !self.is_applicable() {
            return true;
        }
        match self.check(manager) {
            Ok(()) => manager.test_class_load(&self.id, visited),
            Err(e) => {
                log::debug!("{}", e);
                false
            }
        }
    }

    /// Registry and version part of the check, reported as a typed error.
    pub fn check(&self, manager: &PluginManager) -> Result<(), DependencyError> {
        let actual_version = manager
            .class_version(&self.id)
            .ok_or_else(|| DependencyError::MissingPlugin(self.id.clone()))?;
        if crate::plugin_system::version::is_version_compatible(&actual_version, &self.version) {
            Ok(())
        } else {
            Err(DependencyError::IncompatibleVersion {
                plugin_id: self.id.clone(),
                required: self.version.clone(),
                actual_version,
            })
        }
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirement_type = if self.mandatory { "Requires" } else { "Optional" };
        write!(f, "{} plugin: {} (version: {})", requirement_type, self.id, self.version)
    }
}

// --- Package dependency ---

/// Answers whether an importable package is present on the host.
pub trait PackageResolver: fmt::Debug + Send + Sync {
    fn resolve(&self, import_name: &str) -> bool;
}

/// Resolves packages against library directories and, optionally, the `PATH`.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentPackageResolver {
    library_paths: Vec<PathBuf>,
    search_path_env: bool,
}

impl EnvironmentPackageResolver {
    pub fn new(library_paths: Vec<PathBuf>) -> Self {
        Self {
            library_paths,
            search_path_env: true,
        }
    }

    pub fn without_path_env(mut self) -> Self {
        self.search_path_env = false;
        self
    }

    fn candidate_names(import_name: &str) -> Vec<String> {
        vec![
            import_name.to_string(),
            format!("lib{}.so", import_name),
            format!("lib{}.dylib", import_name),
            format!("lib{}.a", import_name),
            format!("lib{}.rlib", import_name),
            format!("{}.dll", import_name),
            format!("{}.exe", import_name),
        ]
    }

    fn present_in(dir: &Path, import_name: &str) -> bool {
        Self::candidate_names(import_name)
            .iter()
            .any(|candidate| dir.join(candidate).exists())
    }
}

impl PackageResolver for EnvironmentPackageResolver {
    fn resolve(&self, import_name: &str) -> bool {
        if import_name.is_empty() {
            return false;
        }
        if self.library_paths.iter().any(|dir| Self::present_in(dir, import_name)) {
            return true;
        }
        if self.search_path_env {
            if let Some(path_var) = std::env::var_os("PATH") {
                return std::env::split_paths(&path_var).any(|dir| Self::present_in(&dir, import_name));
            }
        }
        false
    }
}

/// Resolver backed by a fixed set of known package names.
#[derive(Debug, Clone, Default)]
pub struct StaticPackageResolver {
    available: HashSet<String>,
}

impl StaticPackageResolver {
    pub fn new<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: available.into_iter().map(Into::into).collect(),
        }
    }
}

impl PackageResolver for StaticPackageResolver {
    fn resolve(&self, import_name: &str) -> bool {
        self.available.contains(import_name)
    }
}

/// Represents a dependency on an external package
#[derive(Debug, Clone)]
pub struct PackageDependency {
    /// Human readable package name
    pub name: String,
    /// Alternative import names, any one of them satisfies the dependency
    pub import_names: Vec<String>,
    pub version: String,
    /// Where the package can be downloaded
    pub url: Option<String>,
    pub mandatory: bool,
    pub conditions: Vec<Arc<dyn Condition>>,
}

impl PackageDependency {
    pub fn new(name: &str, import_names: &[&str], version: &str) -> Self {
        Self {
            name: name.to_string(),
            import_names: import_names.iter().map(|s| s.to_string()).collect(),
            version: version.to_string(),
            url: None,
            mandatory: true,
            conditions: Vec::new(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_condition(mut self, condition: impl Condition + 'static) -> Self {
        self.conditions.push(Arc::new(condition));
        self
    }

    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn is_applicable(&self) -> bool {
        conditions_apply(&self.conditions)
    }

    pub fn test_dependency(&self, manager: &PluginManager) -> bool {
        if !self.is_applicable() {
            return true;
        }
        let resolver = manager.package_resolver();
        if self.import_names.iter().any(|name| resolver.resolve(name)) {
            return true;
        }
        let logger = manager.logger();
        match &self.url {
            Some(url) => logger.info(&format!(
                "Package '{}' v{} is missing, download it from {}",
                self.name, self.version, url
            )),
            None => logger.info(&format!("Package '{}' v{} is missing", self.name, self.version)),
        }
        false
    }
}

impl fmt::Display for PackageDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirement_type = if self.mandatory { "Requires" } else { "Optional" };
        write!(f, "{} package: {} (version: {})", requirement_type, self.name, self.version)
    }
}

// --- Dependency ---

/// Any declared dependency of a plugin.
#[derive(Debug, Clone)]
pub enum Dependency {
    Plugin(PluginDependency),
    Package(PackageDependency),
}

impl Dependency {
    pub fn is_mandatory(&self) -> bool {
        match self {
            Dependency::Plugin(dep) => dep.mandatory,
            Dependency::Package(dep) => dep.mandatory,
        }
    }

    pub fn test_dependency(&self, manager: &PluginManager) -> bool {
        self.test_dependency_visited(manager, &mut HashSet::new())
    }

    pub(crate) fn test_dependency_visited(&self, manager: &PluginManager, visited: &mut HashSet<String>) -> bool {
        match self {
            Dependency::Plugin(dep) => dep.test_dependency_visited(manager, visited),
            Dependency::Package(dep) => dep.test_dependency(manager),
        }
    }
}

impl From<PluginDependency> for Dependency {
    fn from(value: PluginDependency) -> Self {
        Dependency::Plugin(value)
    }
}

impl From<PackageDependency> for Dependency {
    fn from(value: PackageDependency) -> Self {
        Dependency::Package(value)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Plugin(dep) => dep.fmt(f),
            Dependency::Package(dep) => dep.fmt(f),
        }
    }
}
