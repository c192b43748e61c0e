//! The remote object store as seen by the backup pipeline.
//!
//! Only flat primitives are assumed: list the children of one parent,
//! create a child, upload a file, delete by id. [`drive::DriveClient`] maps
//! them onto the Google Drive v3 API.

pub mod drive;

use crate::error::Result;
use crate::models::{RemoteFile, RemoteFolder};
use std::io::Read;

pub use drive::DriveClient;

/// Identifier of the top of the user's store.
pub const ROOT_ID: &str = "root";
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const ZIP_MIME: &str = "application/zip";

/// Filter for [`RemoteStore::list_children`]. Trashed items are never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery<'a> {
    pub parent: &'a str,
    /// Exact, case-sensitive name match.
    pub name: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    /// Sort by creation time, newest first.
    pub newest_first: bool,
}

impl<'a> ListQuery<'a> {
    pub fn children(parent: &'a str) -> Self {
        Self {
            parent,
            name: None,
            mime_type: None,
            newest_first: false,
        }
    }

    pub fn folder_named(parent: &'a str, name: &'a str) -> Self {
        Self {
            name: Some(name),
            mime_type: Some(FOLDER_MIME),
            ..Self::children(parent)
        }
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }
}

pub trait RemoteStore {
    fn list_children(&self, query: &ListQuery<'_>) -> Result<Vec<RemoteFile>>;

    fn create_folder(&self, parent: &str, name: &str) -> Result<RemoteFolder>;

    /// Uploads `content` as a new file under `parent`, consuming the reader to EOF.
    fn upload(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
        content: Box<dyn Read + Send>,
    ) -> Result<RemoteFile>;

    fn delete(&self, id: &str) -> Result<()>;
}

/// Every snapshot in `folder_id`, newest first.
pub fn list_snapshots<S: RemoteStore + ?Sized>(store: &S, folder_id: &str) -> Result<Vec<RemoteFile>> {
    store.list_children(&ListQuery::children(folder_id).newest_first())
}
