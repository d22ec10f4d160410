use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Separator used when rendering node and stream locations.
pub const SEPARATOR: char = '/';

/// Location of a storage node inside a container.
///
/// A `NodeRef` is an owned value and does not borrow the container. If the
/// storage it names is deleted, later calls through it fail with
/// [`StoreError::NodeMissing`](crate::StoreError::NodeMissing).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeRef {
    segments: Vec<String>,
}

impl NodeRef {
    /// The root storage. It has no name and always exists.
    pub fn root() -> Self {
        Self::default()
    }

    /// Reference to the child storage `name` below this one.
    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Storage names from the root down to this node.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Name of this storage, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SEPARATOR}{}", self.segments.join("/"))
    }
}

/// Location of a named stream under a storage node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StreamRef {
    node: NodeRef,
    name: String,
}

impl StreamRef {
    pub(crate) fn new(node: NodeRef, name: &str) -> Self {
        Self {
            node,
            name: name.to_string(),
        }
    }

    /// The storage that holds this stream.
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// Stream name, unique within its storage.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for StreamRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.node.is_root() {
            write!(f, "{SEPARATOR}{}", self.name)
        } else {
            write!(f, "{}{SEPARATOR}{}", self.node, self.name)
        }
    }
}

/// The two kinds of entry a storage node can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// A nested storage node (directory-like).
    Storage,
    /// A named byte stream.
    Stream,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// An entry reported by [`Container::visit_entries`](crate::Container::visit_entries).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    /// Storage names between the visited node and this entry's parent.
    /// Empty for direct children of the visited node.
    pub parents: Vec<String>,
    /// Entry name within its parent.
    pub name: String,
    /// Storage or stream.
    pub kind: EntryKind,
    /// Stream length in bytes; zero for storages.
    pub size: u64,
}

impl EntryInfo {
    pub fn is_stream(&self) -> bool {
        self.kind == EntryKind::Stream
    }
}

/// Serialized form of a storage node and everything below it.
///
/// Both engines keep the whole tree of a container in this shape; the
/// compound engine persists the root record as the container body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Child storages keyed by name.
    pub children: BTreeMap<String, NodeRecord>,
    /// Streams keyed by name.
    pub streams: BTreeMap<String, Vec<u8>>,
}

impl NodeRecord {
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.streams.is_empty()
    }

    /// Total number of streams in this node and all descendants.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
            + self
                .children
                .values()
                .map(NodeRecord::stream_count)
                .sum::<usize>()
    }
}
