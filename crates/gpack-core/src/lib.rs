pub mod archive;
pub mod auth;
pub mod backup;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ignore;
pub mod models;
pub mod project;
pub mod remote;
pub mod resolver;
pub mod trim;

// Publicly re-export the main types for a clean external API.
pub use archive::{ArchiveBuilder, ArchiveSummary};
pub use auth::{AuthorizationFlow, GoogleOAuth, LoginOutcome, LoginPrompt};
pub use backup::{snapshot_name, BackupOrchestrator, BackupReport, BackupStage};
pub use config::Settings;
pub use credentials::{ClientCredentials, CredentialField, CredentialStore};
pub use error::{Error, Result};
pub use ignore::IgnoreRuleSet;
pub use models::{format_bytes, RemoteFile, RemoteFolder};
pub use project::{Project, ProjectConfig};
pub use remote::{DriveClient, RemoteStore};
pub use resolver::RemotePathResolver;
pub use trim::{RetentionTrimmer, TrimMode, TrimOutcome, TrimPrompt};

use tracing::{debug, info, instrument};

/// Snapshots found in a project's backup folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotListing {
    pub folder_path: String,
    pub snapshots: Vec<RemoteFile>,
}

impl SnapshotListing {
    pub fn total_bytes(&self) -> u64 {
        self.snapshots.iter().map(RemoteFile::size_bytes).sum()
    }
}

/// Entry point wiring settings, credentials and the current project to Google Drive.
#[derive(Debug)]
pub struct Gpack {
    settings: Settings,
    credentials: CredentialStore,
    project: Project,
}

impl Gpack {
    pub fn new(settings: Settings, credentials: CredentialStore, project: Project) -> Self {
        Self {
            settings,
            credentials,
            project,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    fn oauth(&self) -> Result<GoogleOAuth> {
        GoogleOAuth::new(&self.settings)
    }

    /// A Drive client for the stored session, refreshing the token if it expired.
    pub fn remote(&self) -> Result<DriveClient> {
        let session = auth::authenticated_session(&self.credentials, &self.oauth()?)?;
        DriveClient::new(&self.settings, session.access_token)
    }

    fn folder_path(&self) -> Result<String> {
        let config = self.project.load_config()?;
        Ok(self.project.backup_folder(&config))
    }

    #[instrument(skip_all)]
    pub fn backup(&self, on_stage: &mut dyn FnMut(BackupStage)) -> Result<BackupReport> {
        let folder_path = self.folder_path()?;
        on_stage(BackupStage::Authenticating);
        let store = self.remote()?;
        BackupOrchestrator::new(&store).run(&self.project, &folder_path, on_stage)
    }

    /// `None` when the backup folder has not been created yet.
    #[instrument(skip_all)]
    pub fn list(&self) -> Result<Option<SnapshotListing>> {
        let folder_path = self.folder_path()?;
        let store = self.remote()?;
        let Some(folder_id) = RemotePathResolver::new(&store).find(&folder_path)? else {
            return Ok(None);
        };
        let snapshots = remote::list_snapshots(&store, &folder_id)?;
        debug!(count = snapshots.len(), "Fetched snapshot listing.");
        Ok(Some(SnapshotListing {
            folder_path,
            snapshots,
        }))
    }

    #[instrument(skip_all)]
    pub fn trim(&self, mode: TrimMode, prompt: &mut dyn TrimPrompt) -> Result<TrimOutcome> {
        let folder_path = self.folder_path()?;
        let store = self.remote()?;
        RetentionTrimmer::new(&store).run(&folder_path, mode, prompt)
    }

    pub fn login(&self, prompt: &mut dyn LoginPrompt) -> Result<LoginOutcome> {
        let oauth = self.oauth()?;
        AuthorizationFlow::new(&self.credentials, &oauth, &self.settings).run(prompt)
    }

    pub fn logout(&self) -> Result<()> {
        self.credentials.clear()?;
        info!("Credentials removed.");
        Ok(())
    }
}
