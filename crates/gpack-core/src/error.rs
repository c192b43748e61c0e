use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Project not initialized. Run `gpack init` first.")]
    NotInitialized,

    #[error("Not logged in. Run `gpack login` first.")]
    NotAuthenticated,

    #[error("Remote API error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid ignore pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Timed out waiting for the authorization callback")]
    CallbackTimeout,

    #[error("Authorization callback failed: {0}")]
    Callback(String),

    #[error("Could not determine a configuration directory")]
    NoConfigDir,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, Error::NotAuthenticated)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
