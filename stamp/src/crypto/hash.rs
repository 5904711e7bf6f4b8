//! # Hashing Utilities
//!
//! SHA-256 is the only hash in the stamping core. The authority specifies it
//! for RSA-OAEP and RSA-PSS, and reusing it for fingerprints and content
//! references keeps the list of primitives an auditor has to check short.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data as a fixed-size array.
///
/// # Example
///
/// ```
/// use firs_stamp::crypto::sha256;
///
/// let hash = sha256(b"INV001-94ND90NR-20240611");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 as lowercase hex. This is the form used for fingerprints,
/// invoice references and payload hashes in headers.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash several fields joined by `|`.
///
/// Used for content references where the inputs are short identifiers.
/// The separator keeps `("AB", "C")` and `("A", "BC")` apart.
pub fn sha256_fields(fields: &[&str]) -> String {
    sha256_hex(fields.join("|").as_bytes())
}
