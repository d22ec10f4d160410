use std::path::PathBuf;

use thiserror::Error;
use vpack_store::StoreError;

use crate::path::VirtualPath;

/// A virtual path that cannot address an entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("virtual path is empty")]
    Empty,

    #[error("virtual path {0:?} has no entry name")]
    MissingLeaf(String),

    #[error("virtual path {0:?} contains an empty segment")]
    EmptySegment(String),
}

/// One package whose handle failed to close during disposal.
#[derive(Debug)]
pub struct DisposalFailure {
    pub package: PathBuf,
    pub error: StoreError,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no entry at {path} in package {}", package.display())]
    NotFound { package: PathBuf, path: VirtualPath },

    #[error("invalid virtual path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to close {} package handle(s)", failures.len())]
    Disposal { failures: Vec<DisposalFailure> },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ManagerError {
    /// True for the entry-missing condition, as opposed to a hard failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
