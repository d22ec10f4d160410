use std::path::Path;

use crate::error::StoreResult;
use crate::node::{EntryInfo, NodeRef, StreamRef};

/// Opens containers for package paths.
///
/// All implementations must satisfy these invariants:
/// - `open_or_create` on a missing path initializes an empty, valid
///   container that a later `open_or_create` reads back unchanged.
/// - A path that exists as a directory is rejected, never overwritten.
/// - All I/O errors are propagated, never silently ignored.
pub trait StorageEngine: Send + Sync + 'static {
    /// The open-container type this engine hands out.
    type Container: Container;

    /// Open the container at `path` read-write, creating it if absent.
    fn open_or_create(&self, path: &Path) -> StoreResult<Self::Container>;
}

/// An open, hierarchical container of storages and streams.
///
/// Mutations are visible through the same container immediately and become
/// durable on [`commit`](Container::commit). Names are unique within a
/// storage across both kinds of entry.
pub trait Container: Send {
    /// The root storage. Always present.
    fn root(&self) -> NodeRef {
        NodeRef::root()
    }

    /// Look up a child storage.
    fn child(&self, node: &NodeRef, name: &str) -> StoreResult<Option<NodeRef>>;

    /// Get or create a child storage.
    fn add_child(&mut self, node: &NodeRef, name: &str) -> StoreResult<NodeRef>;

    /// Look up a stream.
    fn stream(&self, node: &NodeRef, name: &str) -> StoreResult<Option<StreamRef>>;

    /// Get or create an (initially empty) stream.
    fn add_stream(&mut self, node: &NodeRef, name: &str) -> StoreResult<StreamRef>;

    /// Replace the full content of a stream.
    fn write_all(&mut self, stream: &StreamRef, data: &[u8]) -> StoreResult<()>;

    /// Copy out the full content of a stream.
    fn read_all(&self, stream: &StreamRef) -> StoreResult<Vec<u8>>;

    /// Length of a stream in bytes.
    fn stream_len(&self, stream: &StreamRef) -> StoreResult<u64>;

    /// Delete a stream or a storage (with everything below it).
    ///
    /// Returns `true` if an entry was removed.
    fn delete_entry(&mut self, node: &NodeRef, name: &str) -> StoreResult<bool>;

    /// Call `visitor` for every entry under `node`, descending into child
    /// storages when `recursive` is set.
    ///
    /// Takes `&self`: entries cannot be deleted while the walk is live.
    /// Collect names first, then delete.
    fn visit_entries(
        &self,
        node: &NodeRef,
        recursive: bool,
        visitor: &mut dyn FnMut(&EntryInfo),
    ) -> StoreResult<()>;

    /// Make all mutations so far durable.
    fn commit(&mut self) -> StoreResult<()>;

    /// Release the container. Uncommitted changes are discarded.
    fn close(self) -> StoreResult<()>
    where
        Self: Sized;

    /// Collect the entries under `node` into a vector.
    fn entries(&self, node: &NodeRef, recursive: bool) -> StoreResult<Vec<EntryInfo>> {
        let mut entries = Vec::new();
        self.visit_entries(node, recursive, &mut |entry| entries.push(entry.clone()))?;
        Ok(entries)
    }
}
