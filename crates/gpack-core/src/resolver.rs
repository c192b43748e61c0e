use crate::error::{Error, Result};
use crate::remote::{ListQuery, RemoteStore, ROOT_ID};
use tracing::{debug, instrument};

/// Splits a logical path on `/`, dropping empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.trim().is_empty()).collect()
}

/// Maps a slash-separated path to a remote folder id, one list call per segment.
///
/// Stateless: nothing is cached between calls. When several folders share a
/// name under one parent, the first one the store lists wins.
pub struct RemotePathResolver<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RemoteStore + ?Sized> RemotePathResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Returns `None` when a segment is missing and `create_if_missing` is false.
    /// With `create_if_missing`, missing segments are created on the way down.
    #[instrument(skip(self))]
    pub fn resolve(&self, path: &str, create_if_missing: bool) -> Result<Option<String>> {
        let mut parent = ROOT_ID.to_string();
        for segment in segments(path) {
            let found = self
                .store
                .list_children(&ListQuery::folder_named(&parent, segment))?;
            parent = match found.into_iter().next() {
                Some(folder) => folder.id,
                None if create_if_missing => {
                    let created = self.store.create_folder(&parent, segment)?;
                    debug!(name = segment, id = %created.id, "Created remote folder.");
                    created.id
                }
                None => {
                    debug!(name = segment, "Remote folder not found.");
                    return Ok(None);
                }
            };
        }
        Ok(Some(parent))
    }

    pub fn find(&self, path: &str) -> Result<Option<String>> {
        self.resolve(path, false)
    }

    pub fn ensure(&self, path: &str) -> Result<String> {
        self.resolve(path, true)?
            .ok_or_else(|| Error::Custom(format!("Could not create remote folder '{}'", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_drop_empty_parts() {
        assert_eq!(segments("/GPACK//myapp/"), vec!["GPACK", "myapp"]);
        assert!(segments("").is_empty());
        assert!(segments("///").is_empty());
    }
}
