use crate::archive::{ArchiveBuilder, ArchiveStream, ArchiveSummary};
use crate::error::{Error, Result};
use crate::ignore::IgnoreRuleSet;
use crate::models::RemoteFile;
use crate::project::Project;
use crate::remote::{RemoteStore, ZIP_MIME};
use crate::resolver::RemotePathResolver;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::ErrorKind;
use tracing::{info, instrument, warn};
use zip::result::ZipError;

/// Progress points reported while a backup runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStage {
    Authenticating,
    ResolvingFolder,
    Uploading { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub folder_id: String,
    pub file: RemoteFile,
    pub archive: ArchiveSummary,
}

/// `{project}_{timestamp}.zip`, with `:` and `.` in the timestamp turned into `-`.
pub fn snapshot_name(project_name: &str, at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}_{}.zip", project_name, stamp)
}

pub struct BackupOrchestrator<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RemoteStore + ?Sized> BackupOrchestrator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Creates the destination folder if needed, then streams a fresh snapshot into it.
    #[instrument(skip(self, project, on_stage), fields(project = %project.name()))]
    pub fn run(
        &self,
        project: &Project,
        folder_path: &str,
        on_stage: &mut dyn FnMut(BackupStage),
    ) -> Result<BackupReport> {
        on_stage(BackupStage::ResolvingFolder);
        let folder_id = RemotePathResolver::new(self.store).ensure(folder_path)?;
        info!(%folder_id, "Backup folder ready.");

        let rules = IgnoreRuleSet::load(&project.ignore_path())?;
        // Surface bad patterns before any upload session is opened.
        rules.compile()?;
        let name = snapshot_name(&project.name(), Utc::now());

        on_stage(BackupStage::Uploading { name: name.clone() });
        let ArchiveStream { reader, producer } = ArchiveBuilder::new(project.root(), rules).stream();
        let uploaded = self
            .store
            .upload(&folder_id, &name, ZIP_MIME, Box::new(reader));
        let built = producer.wait();

        let (file, archive) = match (uploaded, built) {
            (Ok(file), Ok(summary)) => (file, summary),
            (Err(upload_err), Err(build_err)) if consumer_gone(&build_err) => return Err(upload_err),
            (_, Err(build_err)) => {
                warn!(error = %build_err, "Archive build failed, snapshot not uploaded.");
                return Err(build_err);
            }
            (Err(upload_err), Ok(_)) => return Err(upload_err),
        };
        info!(name = %file.name, entries = archive.entries, "Snapshot uploaded.");
        Ok(BackupReport {
            folder_id,
            file,
            archive,
        })
    }
}

/// The producer stopped only because the upload dropped the reader.
fn consumer_gone(err: &Error) -> bool {
    match err {
        Error::Io(e) | Error::Zip(ZipError::Io(e)) => e.kind() == ErrorKind::BrokenPipe,
        _ => false,
    }
}
