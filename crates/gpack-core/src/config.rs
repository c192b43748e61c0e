use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-wide settings, shared by every project on this machine.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Local port the OAuth redirect listener binds to.
    pub callback_port: u16,

    /// How long `gpack login` waits for the browser redirect.
    pub callback_timeout_secs: u64,

    /// OAuth authorization endpoint the user is sent to.
    pub auth_endpoint: String,

    /// OAuth token endpoint used for code exchange and refresh.
    pub token_endpoint: String,

    /// Base URL of the Drive metadata API.
    pub api_base: String,

    /// Base URL of the Drive upload API.
    pub upload_base: String,

    /// Snapshots kept by `trim --auto` when no count is given.
    pub default_keep: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            callback_port: 3000,
            callback_timeout_secs: 300,
            auth_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            default_keep: 5,
        }
    }
}

impl Settings {
    const APP_NAME: &'static str = "gpack";

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("", "", Self::APP_NAME).ok_or(Error::NoConfigDir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("settings.toml"))
    }

    /// Loads defaults, then `settings.toml` from the user config dir, then `GPACK_*` env vars.
    pub fn new() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(Some(&path))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        let built = builder
            .add_source(config::Environment::with_prefix("GPACK").try_parsing(true))
            .build()?;
        built.try_deserialize().map_err(Error::Config)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

/// Location of the persisted credential file.
///
/// `GPACK_CREDENTIALS` overrides the platform config directory.
pub fn credentials_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("GPACK_CREDENTIALS") {
        return Ok(PathBuf::from(path));
    }
    let dirs = ProjectDirs::from("", "", "gpack-cli").ok_or(Error::NoConfigDir)?;
    Ok(dirs.config_dir().join("credentials.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(settings.callback_port, 3000);
        assert_eq!(settings.default_keep, 5);
        assert_eq!(settings.callback_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "callback_port = 4123\ncallback_timeout_secs = 10\n").unwrap();

        let settings = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(settings.callback_port, 4123);
        assert_eq!(settings.callback_timeout(), Duration::from_secs(10));
        assert_eq!(settings.default_keep, 5);
    }

    #[test]
    fn corrupt_file_is_a_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "callback_port = 'not a number'").unwrap();

        let result = Settings::load_from(Some(&path));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
