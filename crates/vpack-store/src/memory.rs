use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::node::{EntryInfo, NodeRecord, NodeRef, StreamRef};
use crate::traits::{Container, StorageEngine};
use crate::tree::StorageTree;

#[derive(Default)]
struct EngineState {
    /// Committed tree per package.
    packages: HashMap<PathBuf, NodeRecord>,
    /// Number of `open_or_create` calls per package.
    opens: HashMap<PathBuf, usize>,
}

#[derive(Default)]
struct Shared {
    state: RwLock<EngineState>,
    live: AtomicUsize,
    fail_commits: AtomicBool,
    fail_closes: AtomicBool,
}

/// In-memory, HashMap-based storage engine.
///
/// Intended for tests and embedding. Cloning shares the same packages, so a
/// test can keep a handle while a manager owns another. Containers work on
/// a private copy of the package tree and publish it on commit.
#[derive(Clone, Default)]
pub struct InMemoryEngine {
    shared: Arc<Shared>,
}

impl InMemoryEngine {
    /// Create a new engine with no packages.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `open_or_create` ran for `path`.
    pub fn open_count(&self, path: &Path) -> usize {
        self.shared
            .state
            .read()
            .expect("lock poisoned")
            .opens
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Containers opened and not yet closed or dropped.
    pub fn live_containers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Whether a package exists at `path`.
    pub fn contains_package(&self, path: &Path) -> bool {
        self.shared
            .state
            .read()
            .expect("lock poisoned")
            .packages
            .contains_key(path)
    }

    /// Snapshot of the committed tree of a package.
    pub fn committed(&self, path: &Path) -> Option<NodeRecord> {
        self.shared
            .state
            .read()
            .expect("lock poisoned")
            .packages
            .get(path)
            .cloned()
    }

    /// Make every subsequent commit fail with an I/O error.
    pub fn set_fail_commits(&self, fail: bool) {
        self.shared.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent close fail with an I/O error. The container is
    /// still released.
    pub fn set_fail_closes(&self, fail: bool) {
        self.shared.fail_closes.store(fail, Ordering::SeqCst);
    }
}

impl StorageEngine for InMemoryEngine {
    type Container = InMemoryContainer;

    fn open_or_create(&self, path: &Path) -> StoreResult<InMemoryContainer> {
        let root = {
            let mut state = self.shared.state.write().expect("lock poisoned");
            *state.opens.entry(path.to_path_buf()).or_default() += 1;
            state.packages.entry(path.to_path_buf()).or_default().clone()
        };
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryContainer {
            path: path.to_path_buf(),
            tree: StorageTree::new(root),
            shared: Arc::clone(&self.shared),
        })
    }
}

impl std::fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let packages = self
            .shared
            .state
            .read()
            .map(|s| s.packages.len())
            .unwrap_or(0);
        f.debug_struct("InMemoryEngine")
            .field("package_count", &packages)
            .field("live_containers", &self.live_containers())
            .finish()
    }
}

/// An open in-memory container.
pub struct InMemoryContainer {
    path: PathBuf,
    tree: StorageTree,
    shared: Arc<Shared>,
}

impl Container for InMemoryContainer {
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
        if self.shared.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "injected commit failure for {}",
                self.path.display()
            ))));
        }
        let mut state = self.shared.state.write().expect("lock poisoned");
        state
            .packages
            .insert(self.path.clone(), self.tree.root_record().clone());
        self.tree.mark_clean();
        Ok(())
    }

    fn close(self) -> StoreResult<()> {
        if self.shared.fail_closes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "injected close failure for {}",
                self.path.display()
            ))));
        }
        Ok(())
    }
}

impl Drop for InMemoryContainer {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}
