use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::format;
use crate::node::{EntryInfo, NodeRecord, NodeRef, StreamRef};
use crate::traits::{Container, StorageEngine};
use crate::tree::StorageTree;

/// Flush strategy applied when a container is committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` the new container file before it replaces the old one.
    EveryCommit,
    /// Rely on OS page-cache buffering (fastest, least durable).
    OsDefault,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::OsDefault
    }
}

/// Configuration for [`CompoundFileEngine`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundConfig {
    /// zstd level for the container body (default: 3).
    pub compression_level: i32,
    /// Flush strategy on commit.
    pub sync_mode: SyncMode,
}

impl Default for CompoundConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
            sync_mode: SyncMode::default(),
        }
    }
}

/// Engine for single-file compound containers on the local file system.
#[derive(Clone, Debug, Default)]
pub struct CompoundFileEngine {
    config: CompoundConfig,
}

impl CompoundFileEngine {
    pub fn new(config: CompoundConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompoundConfig {
        &self.config
    }
}

impl StorageEngine for CompoundFileEngine {
    type Container = CompoundContainer;

    fn open_or_create(&self, path: &Path) -> StoreResult<CompoundContainer> {
        if path.is_dir() {
            return Err(StoreError::NotAFile(path.to_path_buf()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let root = if len == 0 {
            // Fresh file: it must decode as an empty container from now on.
            let empty = NodeRecord::default();
            file.write_all(&format::encode(&empty, self.config.compression_level)?)?;
            file.flush()?;
            if self.config.sync_mode == SyncMode::EveryCommit {
                file.sync_all()?;
            }
            debug!(package = %path.display(), "created container");
            empty
        } else {
            let mut data = Vec::with_capacity(len as usize);
            file.read_to_end(&mut data)?;
            let root = format::decode(&data, path)?;
            debug!(
                package = %path.display(),
                bytes = len,
                streams = root.stream_count(),
                "opened container"
            );
            root
        };

        Ok(CompoundContainer {
            path: path.to_path_buf(),
            tree: StorageTree::new(root),
            file: Some(file),
            config: self.config.clone(),
        })
    }
}

/// An open compound container.
///
/// Holds an OS handle on the package file for as long as it lives; the
/// handle is released on [`close`](Container::close) or drop.
#[derive(Debug)]
pub struct CompoundContainer {
    path: PathBuf,
    tree: StorageTree,
    file: Option<File>,
    config: CompoundConfig,
}

impl CompoundContainer {
    /// Whether there are uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.tree.is_dirty()
    }

    /// Write the tree to a sibling temp file, then rename it over the
    /// package. Readers never see a half-written container.
    fn persist(&mut self) -> StoreResult<()> {
        let bytes = format::encode(self.tree.root_record(), self.config.compression_level)?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(&bytes)?;
        staged.flush()?;
        if self.config.sync_mode == SyncMode::EveryCommit {
            staged.as_file().sync_all()?;
        }

        // The temp file is created 0600; carry the package's mode over.
        match fs::metadata(&self.path) {
            Ok(meta) => staged.as_file().set_permissions(meta.permissions())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Drop our handle on the old inode before the rename replaces it.
        self.file = None;
        staged.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        self.file = Some(OpenOptions::new().read(true).write(true).open(&self.path)?);

        debug!(package = %self.path.display(), bytes = bytes.len(), "committed container");
        Ok(())
    }
}

impl Container for CompoundContainer {
    fn child(&self, node: &NodeRef, name: &str) -> StoreResult<Option<NodeRef>> {
        self.tree.child(node, name)
    }

    fn add_child(&mut self, node: &NodeRef, name: &str) -> StoreResult<NodeRef> {
        self.tree.add_child(node, name)
    }

    fn stream(&self, node: &NodeRef, name: &str) -> StoreResult<Option<StreamRef>> {
        self.tree.stream(node, name)
    }

    fn add_stream(&mut self, node: &NodeRef, name: &str) -> StoreResult<StreamRef> {
        self.tree.add_stream(node, name)
    }

    fn write_all(&mut self, stream: &StreamRef, data: &[u8]) -> StoreResult<()> {
        self.tree.write_all(stream, data)
    }

    fn read_all(&self, stream: &StreamRef) -> StoreResult<Vec<u8>> {
        self.tree.read_all(stream)
    }

    fn stream_len(&self, stream: &StreamRef) -> StoreResult<u64> {
        self.tree.stream_len(stream)
    }

    fn delete_entry(&mut self, node: &NodeRef, name: &str) -> StoreResult<bool> {
        self.tree.delete_entry(node, name)
    }

    fn visit_entries(
        &self,
        node: &NodeRef,
        recursive: bool,
        visitor: &mut dyn FnMut(&EntryInfo),
    ) -> StoreResult<()> {
        self.tree.visit_entries(node, recursive, visitor)
    }

    fn commit(&mut self) -> StoreResult<()> {
        if !self.tree.is_dirty() {
            return Ok(());
        }
        self.persist()?;
        self.tree.mark_clean();
        Ok(())
    }

    fn close(mut self) -> StoreResult<()> {
        if self.tree.is_dirty() {
            warn!(package = %self.path.display(), "closing container with uncommitted changes");
        }
        drop(self.file.take());
        debug!(package = %self.path.display(), "closed container");
        Ok(())
    }
}
