//! # Key Management
//!
//! Key generation, loading and the sign/verify primitives behind CSIDs.
//!
//! Two algorithm families are supported:
//!
//! - **RSA** (2048 bits and up) with PSS or PKCS#1 v1.5 padding over
//!   SHA-256. RSA-PSS is what the authority expects by default.
//! - **Ed25519**, for issuers that provision modern keys.
//!
//! The issuer's private key is only ever reached through the [`Signer`]
//! trait. Anything that needs to sign (the CSID generator, the batch signer,
//! the stamping service) takes a `&dyn Signer` or an `Arc<dyn Signer>`, so a
//! hardware-backed signer can replace [`SigningKeyPair`] without touching the
//! callers. The authority's public key used for envelope encryption is a
//! separate trust boundary and lives in [`crate::envelope`].
//!
//! ## Security considerations
//!
//! - Key generation uses `OsRng`.
//! - `Debug` output shows the algorithm and the public fingerprint only.
//!   Key bytes are never logged.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey as _, DecodeRsaPublicKey as _};
// Same pkcs8 traits serve the ed25519-dalek keys; both crates build on pkcs8 0.10.
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use super::hash::{sha256, sha256_hex};
use crate::config::MIN_RSA_KEY_BITS;

/// Errors about key material: loading, parsing, provisioning and signing.
///
/// Crypto-bundle and certificate problems are reported through this type
/// as well, since they are all "the key material is not usable" failures.
#[derive(Debug, Error)]
pub enum KeyMaterialError {
    #[error("failed to read key material from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("crypto bundle is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` is not valid base64")]
    InvalidBase64(&'static str),

    #[error("{0} does not contain a PEM header")]
    MissingPemHeader(&'static str),

    #[error("malformed crypto bundle: {0}")]
    MalformedBundle(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("RSA key too small: {bits} bits (minimum {MIN_RSA_KEY_BITS})")]
    KeyTooSmall { bits: usize },

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("key cannot produce or check {0} signatures")]
    AlgorithmMismatch(SignatureAlgorithm),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
}

// ---------------------------------------------------------------------------
// Algorithms
// ---------------------------------------------------------------------------

/// Key types [`generate_key_pair`] can provision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Rsa2048,
    Rsa3072,
    Rsa4096,
    Ed25519,
}

impl KeyAlgorithm {
    /// Modulus size for RSA variants.
    pub fn rsa_bits(self) -> Option<usize> {
        match self {
            KeyAlgorithm::Rsa2048 => Some(2048),
            KeyAlgorithm::Rsa3072 => Some(3072),
            KeyAlgorithm::Rsa4096 => Some(4096),
            KeyAlgorithm::Ed25519 => None,
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = KeyMaterialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "rsa" | "rsa2048" => Ok(KeyAlgorithm::Rsa2048),
            "rsa3072" => Ok(KeyAlgorithm::Rsa3072),
            "rsa4096" => Ok(KeyAlgorithm::Rsa4096),
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            _ => Err(KeyMaterialError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Signature schemes a CSID can declare.
///
/// The wire tag ([`tag`](Self::tag)) is part of every signing input, so
/// the same bytes signed under two schemes never produce interchangeable
/// signatures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[default]
    #[serde(rename = "RSA-PSS-SHA256")]
    RsaPssSha256,
    #[serde(rename = "RSA-PKCS1V15-SHA256")]
    RsaPkcs1v15Sha256,
    #[serde(rename = "ED25519")]
    Ed25519,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 3] = [
        SignatureAlgorithm::RsaPssSha256,
        SignatureAlgorithm::RsaPkcs1v15Sha256,
        SignatureAlgorithm::Ed25519,
    ];

    /// Stable wire identifier.
    pub const fn tag(self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaPssSha256 => "RSA-PSS-SHA256",
            SignatureAlgorithm::RsaPkcs1v15Sha256 => "RSA-PKCS1V15-SHA256",
            SignatureAlgorithm::Ed25519 => "ED25519",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.tag() == tag)
    }

    pub fn is_rsa(self) -> bool {
        !matches!(self, SignatureAlgorithm::Ed25519)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = KeyMaterialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(&s.to_ascii_uppercase().replace('_', "-"))
            .ok_or_else(|| KeyMaterialError::UnsupportedAlgorithm(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Signer capability
// ---------------------------------------------------------------------------

/// Signing capability keyed by the issuer's own private key.
///
/// `Send + Sync` because batch signing shares one signer across a worker
/// pool. Implementations must not mutate shared state while signing.
pub trait Signer: Send + Sync {
    /// Sign `message` under `algorithm`.
    fn sign(&self, algorithm: SignatureAlgorithm, message: &[u8])
        -> Result<Vec<u8>, KeyMaterialError>;

    /// The public half, used for fingerprints and verification.
    fn public_key(&self) -> PublicKey;

    /// SHA-256 fingerprint of the public key (lowercase hex over SPKI DER).
    fn key_fingerprint(&self) -> Result<String, KeyMaterialError> {
        self.public_key().fingerprint()
    }
}

// ---------------------------------------------------------------------------
// SigningKeyPair
// ---------------------------------------------------------------------------

/// An issuer signing key held in process memory.
///
/// Deliberately not `Serialize`. Exporting a private key should be an
/// explicit call to [`to_pkcs8_pem`](Self::to_pkcs8_pem).
#[derive(Clone)]
pub enum SigningKeyPair {
    Rsa(RsaPrivateKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl SigningKeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self, KeyMaterialError> {
        match algorithm.rsa_bits() {
            Some(bits) => {
                let key = RsaPrivateKey::new(&mut OsRng, bits)
                    .map_err(|e| KeyMaterialError::KeyGeneration(e.to_string()))?;
                Ok(SigningKeyPair::Rsa(key))
            }
            None => Ok(SigningKeyPair::Ed25519(ed25519_dalek::SigningKey::generate(
                &mut OsRng,
            ))),
        }
    }

    /// Parse a PEM private key: PKCS#8 (RSA or Ed25519) or PKCS#1 (RSA).
    pub fn from_pem(pem: &str) -> Result<Self, KeyMaterialError> {
        let pem = pem.trim();
        if !pem.starts_with("-----BEGIN") {
            return Err(KeyMaterialError::MissingPemHeader("private key"));
        }

        if pem.contains("BEGIN RSA PRIVATE KEY") {
            let key = RsaPrivateKey::from_pkcs1_pem(pem)
                .map_err(|e| KeyMaterialError::InvalidKey(e.to_string()))?;
            return Self::checked_rsa(key);
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Self::checked_rsa(key);
        }
        if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
            return Ok(SigningKeyPair::Ed25519(key));
        }
        Err(KeyMaterialError::InvalidKey(
            "unrecognized private key format (expected PKCS#8 or PKCS#1 PEM)".to_string(),
        ))
    }

    fn checked_rsa(key: RsaPrivateKey) -> Result<Self, KeyMaterialError> {
        check_rsa_size(key.size())?;
        Ok(SigningKeyPair::Rsa(key))
    }

    /// Export as PKCS#8 PEM. Handle the result like the secret it is.
    pub fn to_pkcs8_pem(&self) -> Result<String, KeyMaterialError> {
        let pem = match self {
            SigningKeyPair::Rsa(key) => key.to_pkcs8_pem(LineEnding::LF),
            SigningKeyPair::Ed25519(key) => key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| KeyMaterialError::InvalidKey(e.to_string()))?;
        Ok(pem.to_string())
    }

    /// The scheme used when the caller does not ask for one.
    pub fn default_algorithm(&self) -> SignatureAlgorithm {
        match self {
            SigningKeyPair::Rsa(_) => SignatureAlgorithm::RsaPssSha256,
            SigningKeyPair::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    pub fn supports(&self, algorithm: SignatureAlgorithm) -> bool {
        match self {
            SigningKeyPair::Rsa(_) => algorithm.is_rsa(),
            SigningKeyPair::Ed25519(_) => !algorithm.is_rsa(),
        }
    }
}

impl Signer for SigningKeyPair {
    fn sign(
        &self,
        algorithm: SignatureAlgorithm,
        message: &[u8],
    ) -> Result<Vec<u8>, KeyMaterialError> {
        match (self, algorithm) {
            (SigningKeyPair::Rsa(key), SignatureAlgorithm::RsaPssSha256) => {
                let digest = sha256(message);
                key.sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), &digest)
                    .map_err(|e| KeyMaterialError::SigningFailed(e.to_string()))
            }
            (SigningKeyPair::Rsa(key), SignatureAlgorithm::RsaPkcs1v15Sha256) => {
                let digest = sha256(message);
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| KeyMaterialError::SigningFailed(e.to_string()))
            }
            (SigningKeyPair::Ed25519(key), SignatureAlgorithm::Ed25519) => {
                Ok(key.sign(message).to_bytes().to_vec())
            }
            _ => Err(KeyMaterialError::AlgorithmMismatch(algorithm)),
        }
    }

    fn public_key(&self) -> PublicKey {
        match self {
            SigningKeyPair::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            SigningKeyPair::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            SigningKeyPair::Rsa(_) => "Rsa",
            SigningKeyPair::Ed25519(_) => "Ed25519",
        };
        let fingerprint = self
            .key_fingerprint()
            .unwrap_or_else(|_| "<unavailable>".to_string());
        f.debug_struct("SigningKeyPair")
            .field("kind", &kind)
            .field("fingerprint", &fingerprint)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A verification key. Safe to share, log and embed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// Parse a PEM public key: SPKI (`PUBLIC KEY`) or PKCS#1
    /// (`RSA PUBLIC KEY`).
    pub fn from_pem(pem: &str) -> Result<Self, KeyMaterialError> {
        let pem = pem.trim();
        if !pem.starts_with("-----BEGIN") {
            return Err(KeyMaterialError::MissingPemHeader("public key"));
        }

        if pem.contains("BEGIN RSA PUBLIC KEY") {
            let key = RsaPublicKey::from_pkcs1_pem(pem)
                .map_err(|e| KeyMaterialError::InvalidKey(e.to_string()))?;
            check_rsa_size(key.size())?;
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            check_rsa_size(key.size())?;
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Ed25519(key));
        }
        Err(KeyMaterialError::InvalidKey(
            "unrecognized public key format (expected SPKI or PKCS#1 PEM)".to_string(),
        ))
    }

    /// Export as SPKI PEM.
    pub fn to_pem(&self) -> Result<String, KeyMaterialError> {
        match self {
            PublicKey::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::Ed25519(key) => key.to_public_key_pem(LineEnding::LF),
        }
        .map_err(|e| KeyMaterialError::InvalidKey(e.to_string()))
    }

    /// SHA-256 over the SPKI DER encoding, lowercase hex.
    pub fn fingerprint(&self) -> Result<String, KeyMaterialError> {
        let der = match self {
            PublicKey::Rsa(key) => key.to_public_key_der(),
            PublicKey::Ed25519(key) => key.to_public_key_der(),
        }
        .map_err(|e| KeyMaterialError::InvalidKey(e.to_string()))?;
        Ok(sha256_hex(der.as_bytes()))
    }

    pub fn supports(&self, algorithm: SignatureAlgorithm) -> bool {
        match self {
            PublicKey::Rsa(_) => algorithm.is_rsa(),
            PublicKey::Ed25519(_) => !algorithm.is_rsa(),
        }
    }

    /// Check `signature` over `message`. Any failure, including a scheme
    /// this key cannot check, is just `false`.
    pub fn verify(&self, algorithm: SignatureAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        match (self, algorithm) {
            (PublicKey::Rsa(key), SignatureAlgorithm::RsaPssSha256) => key
                .verify(Pss::new::<Sha256>(), &sha256(message), signature)
                .is_ok(),
            (PublicKey::Rsa(key), SignatureAlgorithm::RsaPkcs1v15Sha256) => key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &sha256(message), signature)
                .is_ok(),
            (PublicKey::Ed25519(key), SignatureAlgorithm::Ed25519) => {
                match ed25519_dalek::Signature::from_slice(signature) {
                    Ok(sig) => key.verify(message, &sig).is_ok(),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }
}

fn check_rsa_size(modulus_bytes: usize) -> Result<(), KeyMaterialError> {
    let bits = modulus_bytes * 8;
    if bits < MIN_RSA_KEY_BITS {
        return Err(KeyMaterialError::KeyTooSmall { bits });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Provisioning & loading
// ---------------------------------------------------------------------------

/// A freshly generated key pair in PEM form.
#[derive(Clone)]
pub struct KeyPairPem {
    pub private_key_pem: String,
    pub public_key_pem: String,
}

impl fmt::Debug for KeyPairPem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairPem")
            .field("private_key_pem", &"<redacted>")
            .field("public_key_pem", &self.public_key_pem)
            .finish()
    }
}

/// Generate a key pair and return both halves as PEM text.
pub fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPairPem, KeyMaterialError> {
    let pair = SigningKeyPair::generate(algorithm)?;
    let out = KeyPairPem {
        private_key_pem: pair.to_pkcs8_pem()?,
        public_key_pem: pair.public_key().to_pem()?,
    };
    tracing::debug!(?algorithm, fingerprint = %pair.key_fingerprint()?, "generated key pair");
    Ok(out)
}

/// Load a PEM private key from a file.
pub fn load_private_key(path: impl AsRef<Path>) -> Result<SigningKeyPair, KeyMaterialError> {
    let pem = read_to_string(path.as_ref())?;
    SigningKeyPair::from_pem(&pem)
}

/// Load a PEM public key from a file.
pub fn load_public_key(path: impl AsRef<Path>) -> Result<PublicKey, KeyMaterialError> {
    let pem = read_to_string(path.as_ref())?;
    PublicKey::from_pem(&pem)
}

pub(crate) fn read_to_string(path: &Path) -> Result<String, KeyMaterialError> {
    std::fs::read_to_string(path).map_err(|source| KeyMaterialError::Io {
        path: path.display().to_string(),
        source,
    })
}
