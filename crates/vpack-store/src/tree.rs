//! In-memory storage tree shared by both container implementations.
//!
//! Containers load the whole tree on open, mutate it in place, and hand the
//! root [`NodeRecord`] back to their engine on commit.

use crate::error::{StoreError, StoreResult};
use crate::node::{EntryInfo, EntryKind, NodeRecord, NodeRef, StreamRef, SEPARATOR};

/// A container's mutable node hierarchy.
#[derive(Clone, Debug, Default)]
pub(crate) struct StorageTree {
    root: NodeRecord,
    dirty: bool,
}

impl StorageTree {
    pub(crate) fn new(root: NodeRecord) -> Self {
        Self { root, dirty: false }
    }

    pub(crate) fn root_record(&self) -> &NodeRecord {
        &self.root
    }

    /// Whether anything changed since the last [`mark_clean`](Self::mark_clean).
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn node(&self, node: &NodeRef) -> StoreResult<&NodeRecord> {
        let mut current = &self.root;
        for segment in node.segments() {
            current = current
                .children
                .get(segment)
                .ok_or_else(|| StoreError::NodeMissing(node.to_string()))?;
        }
        Ok(current)
    }

    fn node_mut(&mut self, node: &NodeRef) -> StoreResult<&mut NodeRecord> {
        let mut current = &mut self.root;
        for segment in node.segments() {
            current = current
                .children
                .get_mut(segment)
                .ok_or_else(|| StoreError::NodeMissing(node.to_string()))?;
        }
        Ok(current)
    }

    pub(crate) fn child(&self, node: &NodeRef, name: &str) -> StoreResult<Option<NodeRef>> {
        let record = self.node(node)?;
        Ok(record.children.contains_key(name).then(|| node.join(name)))
    }

    pub(crate) fn add_child(&mut self, node: &NodeRef, name: &str) -> StoreResult<NodeRef> {
        validate_name(name)?;
        let record = self.node_mut(node)?;
        if record.streams.contains_key(name) {
            return Err(StoreError::EntryKindConflict {
                name: name.to_string(),
                existing: EntryKind::Stream.to_string(),
            });
        }
        if !record.children.contains_key(name) {
            record.children.insert(name.to_string(), NodeRecord::default());
            self.dirty = true;
        }
        Ok(node.join(name))
    }

    pub(crate) fn stream(&self, node: &NodeRef, name: &str) -> StoreResult<Option<StreamRef>> {
        let record = self.node(node)?;
        Ok(record
            .streams
            .contains_key(name)
            .then(|| StreamRef::new(node.clone(), name)))
    }

    pub(crate) fn add_stream(&mut self, node: &NodeRef, name: &str) -> StoreResult<StreamRef> {
        validate_name(name)?;
        let record = self.node_mut(node)?;
        if record.children.contains_key(name) {
            return Err(StoreError::EntryKindConflict {
                name: name.to_string(),
                existing: EntryKind::Storage.to_string(),
            });
        }
        if !record.streams.contains_key(name) {
            record.streams.insert(name.to_string(), Vec::new());
            self.dirty = true;
        }
        Ok(StreamRef::new(node.clone(), name))
    }

    fn stream_data(&self, stream: &StreamRef) -> StoreResult<&Vec<u8>> {
        self.node(stream.node())?
            .streams
            .get(stream.name())
            .ok_or_else(|| StoreError::StreamMissing(stream.to_string()))
    }

    pub(crate) fn write_all(&mut self, stream: &StreamRef, data: &[u8]) -> StoreResult<()> {
        let record = self.node_mut(stream.node())?;
        let slot = record
            .streams
            .get_mut(stream.name())
            .ok_or_else(|| StoreError::StreamMissing(stream.to_string()))?;
        slot.clear();
        slot.extend_from_slice(data);
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn read_all(&self, stream: &StreamRef) -> StoreResult<Vec<u8>> {
        self.stream_data(stream).cloned()
    }

    pub(crate) fn stream_len(&self, stream: &StreamRef) -> StoreResult<u64> {
        self.stream_data(stream).map(|data| data.len() as u64)
    }

    /// Remove a stream or a whole storage subtree. Returns `true` if
    /// something was removed.
    pub(crate) fn delete_entry(&mut self, node: &NodeRef, name: &str) -> StoreResult<bool> {
        let record = self.node_mut(node)?;
        let removed =
            record.streams.remove(name).is_some() || record.children.remove(name).is_some();
        if removed {
            self.dirty = true;
        }
        Ok(removed)
    }

    pub(crate) fn visit_entries(
        &self,
        node: &NodeRef,
        recursive: bool,
        visitor: &mut dyn FnMut(&EntryInfo),
    ) -> StoreResult<()> {
        let record = self.node(node)?;
        let mut parents = Vec::new();
        visit_record(record, recursive, &mut parents, visitor);
        Ok(())
    }
}

/// Depth-first walk: a node's streams first, then each child storage
/// followed by its contents when `recursive` is set.
fn visit_record(
    record: &NodeRecord,
    recursive: bool,
    parents: &mut Vec<String>,
    visitor: &mut dyn FnMut(&EntryInfo),
) {
    for (name, data) in &record.streams {
        visitor(&EntryInfo {
            parents: parents.clone(),
            name: name.clone(),
            kind: EntryKind::Stream,
            size: data.len() as u64,
        });
    }
    for (name, child) in &record.children {
        visitor(&EntryInfo {
            parents: parents.clone(),
            name: name.clone(),
            kind: EntryKind::Storage,
            size: 0,
        });
        if recursive {
            parents.push(name.clone());
            visit_record(child, recursive, parents, visitor);
            parents.pop();
        }
    }
}

/// Entry names must be non-empty and free of the path separator.
pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
