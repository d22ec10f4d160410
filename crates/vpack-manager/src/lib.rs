//! Concurrent, path-addressable access to vpack packages.
//!
//! A package is a single file holding a tree of storages and streams (see
//! `vpack-store`). [`PackageManager`] addresses streams with slash-separated
//! virtual paths such as `docs/2024/report.pdf` and serializes access per
//! package file.
//!
//! # Concurrency
//!
//! - Each package path has one exclusive async lock ([`PackageLocks`]).
//! - Every public operation holds that lock from open through commit.
//! - Distinct packages never wait on each other.
//!
//! # Handle Lifetime
//!
//! Containers are opened lazily. By default a handle stays open until
//! [`PackageManager::close_package`] or [`PackageManager::dispose`]; with
//! `auto_flush` it is closed after every operation, so the file is free
//! for other processes between calls.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod locks;
pub mod manager;
pub mod path;

pub use config::ManagerConfig;
pub use error::{DisposalFailure, ManagerError, ManagerResult, PathError};
pub use lifecycle::{Lifecycle, PackageSlot};
pub use locks::PackageLocks;
pub use manager::{ItemInfo, PackageManager};
pub use path::{DirPath, VirtualPath};

// Re-export the engine types callers need to construct a manager.
pub use vpack_store::{CompoundConfig, CompoundFileEngine, InMemoryEngine, StorageEngine, SyncMode};
