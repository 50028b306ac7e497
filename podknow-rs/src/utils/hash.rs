//! Content hashing and deterministic identifiers.

use md5::{Digest, Md5};
use uuid::Uuid;

/// Namespace for every UUIDv5 minted by this crate.
const PODKNOW_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c4e_8a3b_4f5d_9e07_b1c2_d3e4_f5a6);

/// Hex MD5 digest over `parts`, each followed by a unit separator so that
/// `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn content_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut h = Md5::new();
    for part in parts {
        h.update(part.as_ref().as_bytes());
        h.update([0x1f]);
    }
    format!("{:x}", h.finalize())
}

/// Deterministic UUIDv5 derived from an ordered list of name parts.
pub fn stable_id(parts: &[&str]) -> Uuid {
    Uuid::new_v5(&PODKNOW_NAMESPACE, parts.join("\u{1f}").as_bytes())
}
