//! Content hash for the DATA and FIELD hash tables.
//!
//! The digest only selects a bucket. Equal hashes never prove equal content;
//! the hash index always compares the full payload.

use crate::types::Id128;

/// 64-bit digest of `content`.
///
/// Files created with `KEYED_HASH` pass their file id as `key`, so bucket
/// placement differs from file to file.
pub fn hash_content(content: &[u8], key: Option<&Id128>) -> u64 {
    let digest = match key {
        Some(id) => {
            let mut k = [0u8; 32];
            k[..16].copy_from_slice(id.as_bytes());
            k[16..].copy_from_slice(id.as_bytes());
            blake3::keyed_hash(&k, content)
        }
        None => blake3::hash(content),
    };
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(out)
}
