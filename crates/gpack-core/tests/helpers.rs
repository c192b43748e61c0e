#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use gpack_core::remote::{ListQuery, RemoteStore, FOLDER_MIME, ROOT_ID};
use gpack_core::{Error, RemoteFile, RemoteFolder, Result};
use std::cell::RefCell;
use std::io::Read;

/// Helper function to initialize the tracing subscriber for tests.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub parent: String,
    pub name: String,
    pub mime_type: String,
    pub created: DateTime<Utc>,
    pub content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    nodes: Vec<Node>,
    next_id: usize,
    lists: usize,
    creates: usize,
    deletes: Vec<String>,
    uploads: usize,
    fail_delete_of: Option<String>,
    fail_upload: bool,
}

/// In-memory remote store that counts every call.
#[derive(Default)]
pub struct MockStore {
    state: RefCell<State>,
    mid_upload: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// Incompressible bytes, so a file of `len` bytes yields roughly `len` bytes of zip output.
pub fn noise(len: usize) -> Vec<u8> {
    let mut x: u64 = 0x9E37_79B9_7F4A_7C15;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 24) as u8
        })
        .collect()
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, parent: &str, name: &str, mime_type: &str, created: DateTime<Utc>, content: Vec<u8>) -> String {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = format!("id-{}", state.next_id);
        state.nodes.push(Node {
            id: id.clone(),
            parent: parent.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            created,
            content,
        });
        id
    }

    /// Seeds a folder without counting it as a create call.
    pub fn add_folder(&self, parent: &str, name: &str) -> String {
        self.insert(parent, name, FOLDER_MIME, base_time(), Vec::new())
    }

    /// Seeds a folder chain under root, returning the leaf id.
    pub fn add_path(&self, path: &str) -> String {
        let mut parent = ROOT_ID.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            parent = self.add_folder(&parent, segment);
        }
        parent
    }

    /// Seeds a snapshot created `hours` after a fixed base time.
    pub fn add_snapshot(&self, parent: &str, name: &str, hours: i64) -> String {
        self.insert(parent, name, "application/zip", base_time() + Duration::hours(hours), vec![0; 10])
    }

    pub fn fail_delete_of(&self, id: &str) {
        self.state.borrow_mut().fail_delete_of = Some(id.to_string());
    }

    /// Runs `hook` once, after the first bytes of the next upload have arrived.
    pub fn during_upload(&self, hook: impl FnOnce() + 'static) {
        *self.mid_upload.borrow_mut() = Some(Box::new(hook));
    }

    pub fn fail_uploads(&self) {
        self.state.borrow_mut().fail_upload = true;
    }

    pub fn lists(&self) -> usize {
        self.state.borrow().lists
    }

    pub fn creates(&self) -> usize {
        self.state.borrow().creates
    }

    pub fn uploads(&self) -> usize {
        self.state.borrow().uploads
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.borrow().deletes.clone()
    }

    pub fn reset_counters(&self) {
        let mut state = self.state.borrow_mut();
        state.lists = 0;
        state.creates = 0;
        state.uploads = 0;
        state.deletes.clear();
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.state.borrow().nodes.iter().find(|n| n.id == id).cloned()
    }

    pub fn children(&self, parent: &str) -> Vec<Node> {
        self.state
            .borrow()
            .nodes
            .iter()
            .filter(|n| n.parent == parent)
            .cloned()
            .collect()
    }
}

fn to_file(node: &Node) -> RemoteFile {
    RemoteFile {
        id: node.id.clone(),
        name: node.name.clone(),
        size: Some(node.content.len() as u64),
        created_time: Some(node.created),
    }
}

impl RemoteStore for MockStore {
    fn list_children(&self, query: &ListQuery<'_>) -> Result<Vec<RemoteFile>> {
        let mut state = self.state.borrow_mut();
        state.lists += 1;
        let mut matches: Vec<&Node> = state
            .nodes
            .iter()
            .filter(|n| n.parent == query.parent)
            .filter(|n| query.name.map_or(true, |name| n.name == name))
            .filter(|n| query.mime_type.map_or(true, |mime| n.mime_type == mime))
            .collect();
        if query.newest_first {
            matches.sort_by(|a, b| b.created.cmp(&a.created));
        }
        Ok(matches.into_iter().map(to_file).collect())
    }

    fn create_folder(&self, parent: &str, name: &str) -> Result<RemoteFolder> {
        self.state.borrow_mut().creates += 1;
        let id = self.add_folder(parent, name);
        Ok(RemoteFolder {
            id,
            parent_id: parent.to_string(),
            name: name.to_string(),
        })
    }

    fn upload(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
        mut content: Box<dyn Read + Send>,
    ) -> Result<RemoteFile> {
        self.state.borrow_mut().uploads += 1;
        if self.state.borrow().fail_upload {
            return Err(Error::Remote {
                status: 503,
                message: "upload rejected".to_string(),
            });
        }
        let mut bytes = Vec::new();
        let mut first = [0u8; 8192];
        let n = content.read(&mut first)?;
        bytes.extend_from_slice(&first[..n]);
        let hook = self.mid_upload.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
        content.read_to_end(&mut bytes)?;
        let id = self.insert(parent, name, mime_type, Utc::now(), bytes);
        Ok(to_file(&self.node(&id).unwrap()))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_delete_of.as_deref() == Some(id) {
            return Err(Error::Remote {
                status: 500,
                message: format!("cannot delete {}", id),
            });
        }
        state.nodes.retain(|n| n.id != id);
        state.deletes.push(id.to_string());
        Ok(())
    }
}
