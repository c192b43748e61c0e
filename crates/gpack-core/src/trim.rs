//! Retention policy for remote snapshots.
//!
//! Snapshots are always handled newest first. Automatic mode keeps the first
//! `keep` records and deletes the rest; interactive mode deletes what the user
//! picks, after an explicit confirmation. Deletes run one at a time and are
//! not rolled back if a later one fails.

use crate::error::Result;
use crate::models::RemoteFile;
use crate::remote::{list_snapshots, RemoteStore};
use crate::resolver::RemotePathResolver;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimMode {
    Auto { keep: usize },
    Interactive,
}

/// User interaction for interactive trimming.
pub trait TrimPrompt {
    /// Returns the ids the user chose to delete.
    fn select(&mut self, snapshots: &[RemoteFile]) -> Result<Vec<String>>;

    fn confirm(&mut self, count: usize) -> Result<bool>;

    /// Called after each successful delete.
    fn deleted(&mut self, _snapshot: &RemoteFile) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimOutcome {
    /// The backup folder does not exist or is empty.
    NoBackups,
    WithinLimit { total: usize, keep: usize },
    NothingSelected,
    Declined,
    Deleted(Vec<RemoteFile>),
}

/// Snapshots past the first `keep` in newest-first order.
pub fn select_for_deletion(snapshots: &[RemoteFile], keep: usize) -> &[RemoteFile] {
    if snapshots.len() <= keep {
        &[]
    } else {
        &snapshots[keep..]
    }
}

pub struct RetentionTrimmer<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RemoteStore + ?Sized> RetentionTrimmer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Resolves `folder_path` without creating it, lists its snapshots and trims them.
    #[instrument(skip(self, prompt))]
    pub fn run(&self, folder_path: &str, mode: TrimMode, prompt: &mut dyn TrimPrompt) -> Result<TrimOutcome> {
        let Some(folder_id) = RemotePathResolver::new(self.store).find(folder_path)? else {
            info!("Backup folder does not exist yet.");
            return Ok(TrimOutcome::NoBackups);
        };
        let snapshots = list_snapshots(self.store, &folder_id)?;
        self.trim(snapshots, mode, prompt)
    }

    /// Trims an already listed, newest-first set of snapshots.
    pub fn trim(
        &self,
        snapshots: Vec<RemoteFile>,
        mode: TrimMode,
        prompt: &mut dyn TrimPrompt,
    ) -> Result<TrimOutcome> {
        if snapshots.is_empty() {
            return Ok(TrimOutcome::NoBackups);
        }
        match mode {
            TrimMode::Auto { keep } => {
                let doomed = select_for_deletion(&snapshots, keep);
                if doomed.is_empty() {
                    info!(total = snapshots.len(), keep, "Within retention limit.");
                    return Ok(TrimOutcome::WithinLimit {
                        total: snapshots.len(),
                        keep,
                    });
                }
                info!(keep, deleting = doomed.len(), "Auto-trimming snapshots.");
                self.delete_all(doomed.to_vec(), prompt)
            }
            TrimMode::Interactive => {
                let chosen = prompt.select(&snapshots)?;
                let selected: Vec<RemoteFile> = snapshots
                    .into_iter()
                    .filter(|s| chosen.contains(&s.id))
                    .collect();
                if selected.is_empty() {
                    return Ok(TrimOutcome::NothingSelected);
                }
                if !prompt.confirm(selected.len())? {
                    debug!(count = selected.len(), "Deletion declined.");
                    return Ok(TrimOutcome::Declined);
                }
                self.delete_all(selected, prompt)
            }
        }
    }

    fn delete_all(&self, doomed: Vec<RemoteFile>, prompt: &mut dyn TrimPrompt) -> Result<TrimOutcome> {
        for snapshot in &doomed {
            self.store.delete(&snapshot.id)?;
            info!(name = %snapshot.name, "Deleted snapshot.");
            prompt.deleted(snapshot);
        }
        Ok(TrimOutcome::Deleted(doomed))
    }
}
