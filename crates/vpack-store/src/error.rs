use std::path::PathBuf;

/// Errors from storage engine operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compressing or decompressing the container body failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// The file does not start with the container magic.
    #[error("invalid container magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    /// The container was written by a newer format version.
    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u32),

    /// Trailing BLAKE3 checksum or body CRC did not match.
    #[error("container checksum mismatch in {0}")]
    ChecksumMismatch(PathBuf),

    /// The container layout is malformed.
    #[error("corrupt container: {0}")]
    Corrupt(String),

    /// The package path exists but is not a regular file.
    #[error("package path is not a regular file: {0}")]
    NotAFile(PathBuf),

    /// An entry name is empty or contains the path separator.
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),

    /// A stream was requested where a storage node lives, or the reverse.
    #[error("entry {name:?} already exists as a {existing}")]
    EntryKindConflict { name: String, existing: String },

    /// A node reference points at a storage that no longer exists.
    #[error("storage node not found: {0}")]
    NodeMissing(String),

    /// A stream reference points at a stream that no longer exists.
    #[error("stream not found: {0}")]
    StreamMissing(String),
}

/// Result alias for storage engine operations.
pub type StoreResult<T> = Result<T, StoreError>;
