//! # Cryptographic Primitives
//!
//! Everything the stamping core signs, hashes or encrypts goes through this
//! module. None of it is novel:
//!
//! - **RSA-PSS / RSA PKCS#1 v1.5** over SHA-256 for CSID signatures, plus
//!   **Ed25519** for issuers with modern keys.
//! - **RSA-OAEP (SHA-256)** to wrap envelope keys for the authority.
//! - **AES-256-GCM** for the envelope body.
//! - **SHA-256** for digests, fingerprints and content references.
//! - **X.509** parsing and dev-only self-signed provisioning.
//!
//! Each of these is a thin, typed wrapper over an audited implementation.

pub mod certificate;
pub mod encryption;
pub mod hash;
pub mod keys;

pub use certificate::{
    create_self_signed_certificate, validate_certificate, validate_certificate_at,
    CertificateReport, SelfSignedCertificate,
};
pub use hash::{sha256, sha256_fields, sha256_hex};
pub use keys::{
    generate_key_pair, load_private_key, load_public_key, KeyAlgorithm, KeyMaterialError,
    KeyPairPem, PublicKey, SignatureAlgorithm, Signer, SigningKeyPair,
};
