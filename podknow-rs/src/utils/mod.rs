//! Shared utilities.
//!
//! - Text normalization (whitespace collapse, char-safe truncation, JSON
//!   extraction from model responses, relationship-type casing)
//! - String similarity for entity matching
//! - Content hashing and deterministic identifiers

pub mod hash;
pub mod similarity;
pub mod text;

pub use hash::{content_hash, stable_id};
pub use similarity::string_similarity;
pub use text::{
    extract_json_from_response, normalize_key, normalize_whitespace, to_upper_snake,
    truncate_with_ellipsis,
};
