//! Streaming zip snapshots of a project tree.
//!
//! [`ArchiveBuilder::stream`] runs the directory walk and compression on a
//! producer thread and hands back a reader fed through a bounded channel, so
//! the uploader consumes the archive while it is being built.

use crate::error::{Error, Result};
use crate::ignore::IgnoreRuleSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, instrument, trace};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 16;
const MAX_COMPRESSION: i64 = 9;

/// A filesystem entry selected for the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    /// Path inside the archive, relative to the source root.
    pub relative: PathBuf,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl ArchiveEntry {
    /// Entry name inside the zip: `/`-separated, directories end with `/`.
    pub fn archive_name(&self) -> String {
        let name = self
            .relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        match self.kind {
            EntryKind::Dir => format!("{}/", name),
            _ => name,
        }
    }
}

/// What a finished archive contained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub compressed_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    source: PathBuf,
    rules: IgnoreRuleSet,
}

impl ArchiveBuilder {
    pub fn new(source: impl Into<PathBuf>, rules: IgnoreRuleSet) -> Self {
        Self {
            source: source.into(),
            rules,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Every entry the archive will contain, in walk order.
    pub fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        let matcher = self.rules.compile()?;
        let source = self.source.as_path();
        let mut entries = Vec::new();

        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let relative = e.path().strip_prefix(source).unwrap_or(e.path());
                let ignored = matcher.is_ignored(relative);
                if ignored {
                    trace!(path = %relative.display(), "Ignoring entry.");
                }
                !ignored
            });

        for entry_result in walker {
            let entry = entry_result?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|_| Error::Custom(format!("'{}' escaped the source root", entry.path().display())))?
                .to_path_buf();
            let file_type = entry.file_type();
            let kind = if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };
            entries.push(ArchiveEntry {
                path: entry.into_path(),
                relative,
                kind,
            });
        }
        Ok(entries)
    }

    /// Writes the whole archive to `writer`. Any unreadable entry aborts the write.
    #[instrument(skip(self, writer), fields(source = %self.source.display()))]
    pub fn write_to<W: Write>(&self, writer: W) -> Result<usize> {
        let entries = self.entries()?;
        debug!(count = entries.len(), "Collected archive entries.");

        let mut zip = ZipWriter::new_stream(writer);
        for entry in &entries {
            let name = entry.archive_name();
            match entry.kind {
                EntryKind::Dir => {
                    zip.add_directory(name, file_options(0))?;
                }
                EntryKind::Symlink => {
                    let target = std::fs::read_link(&entry.path)?;
                    zip.add_symlink(name, target.to_string_lossy().into_owned(), file_options(0))?;
                }
                EntryKind::File => {
                    let mut file = File::open(&entry.path)?;
                    let size = file.metadata()?.len();
                    zip.start_file(name, file_options(size))?;
                    io::copy(&mut file, &mut zip)?;
                }
            }
        }
        zip.finish()?;
        Ok(entries.len())
    }

    /// Starts building the archive on a background thread.
    pub fn stream(self) -> ArchiveStream {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let handle = thread::spawn(move || -> Result<ArchiveSummary> {
            let mut writer = ChannelWriter::new(tx);
            let entries = self.write_to(&mut writer)?;
            writer.finish()?;
            let summary = ArchiveSummary {
                entries,
                compressed_bytes: writer.written,
            };
            info!(entries, bytes = summary.compressed_bytes, "Archive complete.");
            Ok(summary)
        });
        ArchiveStream {
            reader: ArchiveReader::new(rx),
            producer: ArchiveProducer { handle },
        }
    }
}

fn file_options(size: u64) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(MAX_COMPRESSION))
        .large_file(size >= u64::from(u32::MAX))
}

/// A running archive build: the byte stream plus the producer to join afterwards.
pub struct ArchiveStream {
    pub reader: ArchiveReader,
    pub producer: ArchiveProducer,
}

pub struct ArchiveProducer {
    handle: JoinHandle<Result<ArchiveSummary>>,
}

impl ArchiveProducer {
    /// Waits for the producer thread and returns its outcome.
    pub fn wait(self) -> Result<ArchiveSummary> {
        self.handle
            .join()
            .map_err(|_| Error::Custom("Archive producer panicked".to_string()))?
    }
}

enum Chunk {
    Data(Vec<u8>),
    Done,
}

struct ChannelWriter {
    tx: SyncSender<Chunk>,
    buf: Vec<u8>,
    written: u64,
}

impl ChannelWriter {
    fn new(tx: SyncSender<Chunk>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
            written: 0,
        }
    }

    fn send(&mut self, chunk: Chunk) -> io::Result<()> {
        self.tx
            .send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))
    }

    /// Flushes pending bytes and marks the stream complete.
    fn finish(&mut self) -> io::Result<()> {
        self.flush()?;
        self.send(Chunk::Done)
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        self.written += data.len() as u64;
        if self.buf.len() >= CHUNK_SIZE {
            self.flush()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.send(Chunk::Data(chunk))
    }
}

/// Consumer side of the archive pipe.
///
/// Reaches EOF only after the producer marked the archive complete; if the
/// producer stops early the reader fails instead, so a truncated archive is
/// never uploaded as if it were whole.
pub struct ArchiveReader {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
    done: bool,
}

impl ArchiveReader {
    fn new(rx: Receiver<Chunk>) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl Read for ArchiveReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            if self.done {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Chunk::Data(data)) => {
                    self.current = data;
                    self.pos = 0;
                }
                Ok(Chunk::Done) => self.done = true,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "archive build aborted",
                    ))
                }
            }
        }
        let n = out.len().min(self.current.len() - self.pos);
        out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
