use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding per-project metadata. Never included in a snapshot.
pub const METADATA_DIR: &str = ".gpack";
pub const CONFIG_FILE: &str = "config.json";
pub const IGNORE_FILE: &str = ".gpackignore";

const DEFAULT_IGNORE: &str = "node_modules
.git
.gpack
dist
coverage
.env
";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Slash-separated destination path inside the remote store.
    #[serde(default)]
    pub backup_folder: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// A local project directory being snapshotted.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn current() -> Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final component of the project root, used in snapshot names.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(METADATA_DIR).join(CONFIG_FILE)
    }

    pub fn ignore_path(&self) -> PathBuf {
        self.root.join(IGNORE_FILE)
    }

    pub fn default_backup_folder(&self) -> String {
        format!("GPACK/{}", self.name())
    }

    pub fn is_initialized(&self) -> bool {
        self.config_path().exists()
    }

    /// Returns `Error::NotInitialized` when the project has no config file.
    pub fn load_config(&self) -> Result<ProjectConfig> {
        let path = self.config_path();
        debug!(path = %path.display(), "Reading project config.");
        if !path.exists() {
            return Err(Error::NotInitialized);
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_config(&self, config: &ProjectConfig) -> Result<()> {
        let path = self.config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "Writing project config.");
        fs::write(path, serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    /// Writes the default ignore file unless one already exists. Returns whether it was created.
    pub fn create_default_ignore(&self) -> Result<bool> {
        let path = self.ignore_path();
        if path.exists() {
            return Ok(false);
        }
        fs::write(path, DEFAULT_IGNORE)?;
        Ok(true)
    }

    /// The configured destination folder, falling back to `GPACK/<name>`.
    pub fn backup_folder(&self, config: &ProjectConfig) -> String {
        if config.backup_folder.trim().is_empty() {
            self.default_backup_folder()
        } else {
            config.backup_folder.clone()
        }
    }
}
