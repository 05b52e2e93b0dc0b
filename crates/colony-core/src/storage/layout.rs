//! Filesystem layout of a manager installation.
use std::fs;
use std::path::{Path, PathBuf};

use crate::kernel::constants::{
    CONFIG_DIR, LIBRARIES_DIR, LOG_DIR, MARKER_FILE, MASTER_SOURCE_DIR, META_DIR, PLUGINS_DIR,
    TEMP_DIR, VAR_DIR,
};
use crate::storage::error::StorageSystemError;

/// Kind of tree a manager path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// Development tree holding both `colony/` and `plugins/`
    Master,
    /// Installed instance identified by its `colony.json` marker
    Personal,
}

/// True iff `path` directly contains both a `colony` and a `plugins` directory.
pub fn is_master(path: &Path) -> bool {
    path.join(MASTER_SOURCE_DIR).is_dir() && path.join(PLUGINS_DIR).is_dir()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerLayout {
    root: PathBuf,
}

impl ManagerLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join(PLUGINS_DIR)
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join(LIBRARIES_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn var_dir(&self) -> PathBuf {
        self.root.join(VAR_DIR)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    pub fn marker_file(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    fn directories(&self) -> [PathBuf; 7] {
        [
            self.plugins_dir(),
            self.meta_dir(),
            self.libraries_dir(),
            self.log_dir(),
            self.tmp_dir(),
            self.var_dir(),
            self.config_dir(),
        ]
    }

    pub fn mode(&self) -> LayoutMode {
        if is_master(&self.root) {
            LayoutMode::Master
        } else {
            LayoutMode::Personal
        }
    }

    /// Create the missing directories, and the marker file for personal instances.
    pub fn ensure(&self) -> Result<(), StorageSystemError> {
        for dir in self.directories() {
            if !dir.is_dir() {
                fs::create_dir_all(&dir).map_err(|e| StorageSystemError::io(e, "create_dir_all", dir.clone()))?;
                log::debug!("Created manager directory {}", dir.display());
            }
        }
        let marker = self.marker_file();
        if self.mode() == LayoutMode::Personal && !marker.exists() {
            fs::write(&marker, "{}\n").map_err(|e| StorageSystemError::io(e, "write_marker", marker.clone()))?;
        }
        Ok(())
    }

    /// `config/colony.json` first, then the root `colony.json`.
    pub fn config_file(&self) -> Option<PathBuf> {
        [self.config_dir().join(MARKER_FILE), self.marker_file()]
            .into_iter()
            .find(|candidate| candidate.is_file())
    }
}
