//! Hierarchical container engines for vpack packages.
//!
//! A package is a single file holding a tree of *storages* (directory-like
//! nodes) and *streams* (named byte blobs). This crate supplies the engine
//! contract the package manager is written against, plus two engines.
//!
//! # Storage Engines
//!
//! All engines implement the [`StorageEngine`] and [`Container`] traits:
//!
//! - [`CompoundFileEngine`] -- one checksummed, zstd-compressed file per
//!   package, committed by atomic rename
//! - [`InMemoryEngine`] -- `HashMap`-based engine for tests and embedding
//!
//! # Design Rules
//!
//! 1. Names are unique within a storage across streams and child storages.
//! 2. Writing a stream replaces its content; it never appends.
//! 3. Mutations become durable only on commit; close discards the rest.
//! 4. Enumeration borrows the container immutably, so nothing can be
//!    deleted while a walk is live.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod compound;
pub mod error;
pub mod format;
pub mod memory;
pub mod node;
pub mod traits;

mod tree;

// Re-export primary types at crate root for ergonomic imports.
pub use compound::{CompoundConfig, CompoundContainer, CompoundFileEngine, SyncMode};
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryContainer, InMemoryEngine};
pub use node::{EntryInfo, EntryKind, NodeRecord, NodeRef, StreamRef, SEPARATOR};
pub use traits::{Container, StorageEngine};
