//! Virtual path parsing and storage-node resolution.
//!
//! A virtual path is slash-delimited: every segment but the last names a
//! storage (created on demand by writers), the last names the stream.
//!
//! - One leading `/` is ignored.
//! - Empty paths, trailing `/`, and empty segments (`a//b`) are rejected.
//! - A bare name lives directly under the root storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vpack_store::{Container, NodeRef, StoreResult, SEPARATOR};

use crate::error::PathError;

/// A directory prefix inside a package. Empty means the root storage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirPath {
    segments: Vec<String>,
}

impl DirPath {
    /// The root storage.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a directory prefix. `""` and `"/"` both denote the root; a
    /// single trailing `/` is accepted.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let trimmed = strip_leading(input);
        let trimmed = trimmed.strip_suffix(SEPARATOR).unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self {
            segments: split_segments(input, trimmed)?,
        })
    }

    /// Build from storage names reported by the engine, which already
    /// guarantees they are non-empty and separator-free.
    pub(crate) fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The virtual path of entry `leaf` inside this directory.
    pub fn join(&self, leaf: impl Into<String>) -> VirtualPath {
        VirtualPath {
            dir: self.clone(),
            leaf: leaf.into(),
        }
    }
}

impl fmt::Display for DirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "{SEPARATOR}");
        }
        write!(f, "{}", self.segments.join("/"))
    }
}

impl FromStr for DirPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Address of a stream entry: directory segments plus a leaf name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct VirtualPath {
    dir: DirPath,
    leaf: String,
}

impl VirtualPath {
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let trimmed = strip_leading(input);
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        if trimmed.ends_with(SEPARATOR) {
            return Err(PathError::MissingLeaf(input.to_string()));
        }
        let mut segments = split_segments(input, trimmed)?;
        // Non-empty input always yields at least one segment.
        let leaf = segments.pop().ok_or(PathError::Empty)?;
        Ok(Self {
            dir: DirPath { segments },
            leaf,
        })
    }

    /// Directory segments, outermost first. Empty for top-level entries.
    pub fn directories(&self) -> &[String] {
        self.dir.segments()
    }

    /// The containing directory.
    pub fn dir(&self) -> &DirPath {
        &self.dir
    }

    /// Stream entry name.
    pub fn leaf(&self) -> &str {
        &self.leaf
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.dir.segments() {
            write!(f, "{segment}{SEPARATOR}")?;
        }
        write!(f, "{}", self.leaf)
    }
}

impl FromStr for VirtualPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<VirtualPath> for String {
    fn from(path: VirtualPath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

fn strip_leading(input: &str) -> &str {
    input.strip_prefix(SEPARATOR).unwrap_or(input)
}

fn split_segments(original: &str, trimmed: &str) -> Result<Vec<String>, PathError> {
    trimmed
        .split(SEPARATOR)
        .map(|segment| {
            if segment.is_empty() {
                Err(PathError::EmptySegment(original.to_string()))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

/// Walk `dir` from the root without creating anything.
///
/// Returns `None` as soon as a segment is missing.
pub fn resolve<C: Container>(container: &C, dir: &DirPath) -> StoreResult<Option<NodeRef>> {
    let mut node = container.root();
    for segment in dir.segments() {
        match container.child(&node, segment)? {
            Some(child) => node = child,
            None => return Ok(None),
        }
    }
    Ok(Some(node))
}

/// Walk `dir` from the root, creating missing storages along the way.
pub fn resolve_or_create<C: Container>(container: &mut C, dir: &DirPath) -> StoreResult<NodeRef> {
    let mut node = container.root();
    for segment in dir.segments() {
        node = container.add_child(&node, segment)?;
    }
    Ok(node)
}
