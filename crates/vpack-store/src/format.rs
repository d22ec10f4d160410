//! On-disk layout of a compound container file.
//!
//! ```text
//! [4 bytes:  magic "VPAK"]
//! [4 bytes:  format version (big-endian u32)]
//! [8 bytes:  body length (big-endian u64)]
//! [4 bytes:  CRC32 of body (big-endian u32)]
//! [N bytes:  body = zstd(bincode(NodeRecord))]
//! [32 bytes: BLAKE3 of everything above]
//! ```

use std::path::Path;

use crate::error::{StoreError, StoreResult};
use crate::node::NodeRecord;

pub const MAGIC: &[u8; 4] = b"VPAK";
pub const VERSION: u32 = 1;

/// Magic + version + body length + body CRC.
pub const HEADER_SIZE: usize = 20;
/// BLAKE3 trailer.
pub const TRAILER_SIZE: usize = 32;

/// Serialize a container tree into the on-disk layout.
pub fn encode(root: &NodeRecord, compression_level: i32) -> StoreResult<Vec<u8>> {
    let raw = bincode::serialize(root).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let body = zstd::encode_all(raw.as_slice(), compression_level)
        .map_err(|e| StoreError::Compression(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + TRAILER_SIZE);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
    out.extend_from_slice(&body);

    let checksum = *blake3::hash(&out).as_bytes();
    out.extend_from_slice(&checksum);
    Ok(out)
}

/// Parse and verify a container file's bytes. `path` is only used in errors.
pub fn decode(data: &[u8], path: &Path) -> StoreResult<NodeRecord> {
    if data.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(StoreError::Corrupt(format!(
            "{}: {} bytes is shorter than the container framing",
            path.display(),
            data.len()
        )));
    }

    let (magic, rest) = data.split_at(4);
    if magic != MAGIC {
        return Err(StoreError::InvalidMagic {
            expected: String::from_utf8_lossy(MAGIC).into(),
            actual: String::from_utf8_lossy(magic).into(),
        });
    }
    let (version, rest) = rest.split_at(4);
    let version = u32::from_be_bytes(to_array(version)?);
    if version != VERSION {
        return Err(StoreError::UnsupportedVersion(version));
    }

    let (content, trailer) = data.split_at(data.len() - TRAILER_SIZE);
    if blake3::hash(content).as_bytes() != trailer {
        return Err(StoreError::ChecksumMismatch(path.to_path_buf()));
    }

    let (body_len, rest) = rest.split_at(8);
    let body_len = u64::from_be_bytes(to_array(body_len)?);
    let (expected_crc, rest) = rest.split_at(4);
    let expected_crc = u32::from_be_bytes(to_array(expected_crc)?);

    let body = rest
        .get(..rest.len() - TRAILER_SIZE)
        .ok_or_else(|| StoreError::Corrupt("truncated body".into()))?;
    if body.len() as u64 != body_len {
        return Err(StoreError::Corrupt(format!(
            "{}: body length mismatch: header says {body_len}, found {}",
            path.display(),
            body.len()
        )));
    }
    if crc32fast::hash(body) != expected_crc {
        return Err(StoreError::ChecksumMismatch(path.to_path_buf()));
    }

    let raw = zstd::decode_all(body).map_err(|e| StoreError::Compression(e.to_string()))?;
    bincode::deserialize(&raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_array<const N: usize>(bytes: &[u8]) -> StoreResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected {N} header bytes")))
}
