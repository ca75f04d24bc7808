//! Content addressing for pages and records
//!
//! Both the identity of a location (`url_hash`) and the identity of the
//! content served there (`content_hash`) are SHA-256 digests rendered as
//! lowercase hex. Equality of `content_hash` across runs is the only signal
//! used to skip re-extraction; no fuzzy diffing happens here.

use sha2::{Digest, Sha256};

/// Hashes raw bytes into a hex-encoded SHA-256 digest
///
/// # Examples
///
/// ```
/// use harvester::dedup::hash_bytes;
///
/// let digest = hash_bytes(b"hello");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, hash_bytes(b"hello"));
/// ```
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Identity of a URL within a site
///
/// The URL is hashed byte-for-byte; callers strip fragments before hashing.
pub fn url_hash(url: &str) -> String {
    hash_bytes(url.as_bytes())
}

/// Identity of the HTML fetched from a URL
pub fn content_hash(html: &str) -> String {
    hash_bytes(html.as_bytes())
}

/// Returns true if freshly fetched content differs from what was stored
///
/// A page that has never been hashed always counts as changed.
pub fn has_changed(previous: Option<&str>, current: &str) -> bool {
    previous != Some(current)
}

/// Derives a stable product id for extractors that do not supply one
///
/// The id depends only on the site and the page identity, so re-extracting the
/// same page always upserts the same product.
pub fn derive_product_id(site_id: i64, url_hash: &str) -> String {
    let digest = hash_bytes(format!("{}:{}", site_id, url_hash).as_bytes());
    format!("p-{}", &digest[..32])
}
