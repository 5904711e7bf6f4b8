//! # FIRS Secure Payload Encryption
//!
//! Seals payloads for the tax authority. This is a different trust boundary
//! from stamping: the key here is the **authority's public key**, loaded
//! from a provisioned [`CryptoBundle`], never the issuer's signing key.
//!
//! ## Hybrid envelope
//!
//! ```text
//! header        {algorithm, envelope_id, timestamp, version, sender_info}
//! encrypted_key RSA-OAEP-SHA256(authority_pk, K)           base64
//! iv            128-bit random nonce                        base64
//! ciphertext    AES-256-GCM(K, iv, canonical(payload),
//!                           aad = canonical(header))        base64
//! tag           GCM authentication tag                      base64
//! ```
//!
//! `K` is a fresh 256-bit key per envelope. Binding the header as
//! associated data means the authority rejects an envelope whose header was
//! edited in transit.
//!
//! Small payloads can instead be sealed with RSA-OAEP alone
//! ([`Encryptor::encrypt_direct`]), which is what the authority's QR flow
//! expects for `{irn, certificate}` submissions.
//!
//! There is no decrypt operation here. Only the authority opens envelopes.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::canonical::{canonical_bytes, canonical_json};
use crate::config::{EncryptorConfig, DIRECT_ALGORITHM, ENVELOPE_ALGORITHM, HASH_OUTPUT_LENGTH};
use crate::crypto::encryption::{self, CipherError};
use crate::crypto::keys::read_to_string;
use crate::crypto::{sha256_hex, KeyMaterialError, PublicKey};
use crate::irn::{self, FormatError};

/// Failures while sealing a payload.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("refusing to encrypt an empty payload")]
    EmptyPayload,

    #[error("authority public key is not loaded")]
    RecipientKeyUnavailable,

    #[error("payload of {size} bytes exceeds the RSA-OAEP limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("key wrapping failed: {0}")]
    KeyWrap(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Crypto bundle
// ---------------------------------------------------------------------------

/// The provisioned `{public_key, certificate}` bundle.
///
/// Validation happens at load time: a bundle that loads has a usable RSA
/// public key and a non-empty certificate.
#[derive(Clone, Debug)]
pub struct CryptoBundle {
    public_key: RsaPublicKey,
    public_key_pem: String,
    certificate: Vec<u8>,
    certificate_b64: String,
}

impl CryptoBundle {
    /// Read and validate a bundle file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyMaterialError> {
        let path = path.as_ref();
        let raw = read_to_string(path)?;
        let bundle = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), "loaded crypto bundle");
        Ok(bundle)
    }

    /// Parse and validate bundle JSON.
    pub fn from_json(raw: &str) -> Result<Self, KeyMaterialError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| KeyMaterialError::MalformedBundle(e.to_string()))?;
        let obj = value.as_object().ok_or_else(|| {
            KeyMaterialError::MalformedBundle("expected a JSON object".to_string())
        })?;

        let field = |name: &'static str| -> Result<String, KeyMaterialError> {
            match obj.get(name) {
                None | Some(Value::Null) => Err(KeyMaterialError::MissingField(name)),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    Err(KeyMaterialError::MissingField(name))
                }
                Some(Value::String(s)) => Ok(s.trim().to_string()),
                Some(_) => Err(KeyMaterialError::MalformedBundle(format!(
                    "field `{name}` must be a base64 string"
                ))),
            }
        };
        let public_key_b64 = field("public_key")?;
        let certificate_b64 = field("certificate")?;

        let pem_bytes = BASE64
            .decode(&public_key_b64)
            .map_err(|_| KeyMaterialError::InvalidBase64("public_key"))?;
        let public_key_pem = String::from_utf8(pem_bytes)
            .map_err(|_| KeyMaterialError::MissingPemHeader("public_key"))?;
        if !public_key_pem.contains("-----BEGIN") {
            return Err(KeyMaterialError::MissingPemHeader("public_key"));
        }
        let public_key = match PublicKey::from_pem(&public_key_pem)? {
            PublicKey::Rsa(key) => key,
            PublicKey::Ed25519(_) => {
                return Err(KeyMaterialError::InvalidKey(
                    "authority public key must be RSA".to_string(),
                ))
            }
        };

        let certificate = BASE64
            .decode(&certificate_b64)
            .map_err(|_| KeyMaterialError::InvalidBase64("certificate"))?;

        Ok(Self {
            public_key,
            public_key_pem,
            certificate,
            certificate_b64,
        })
    }

    /// Build a bundle JSON document from PEM and certificate bytes.
    pub fn to_json(public_key_pem: &str, certificate: &[u8]) -> String {
        json!({
            "public_key": BASE64.encode(public_key_pem.as_bytes()),
            "certificate": BASE64.encode(certificate),
        })
        .to_string()
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Decoded certificate bytes.
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// The certificate exactly as it appeared in the bundle.
    pub fn certificate_b64(&self) -> &str {
        &self.certificate_b64
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub algorithm: String,
    pub envelope_id: String,
    pub timestamp: String,
    pub version: String,
    pub sender_info: SenderInfo,
}

/// The sealed envelope handed to the transmission channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub header: EnvelopeHeader,
    pub encrypted_key: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

/// Summary of a sealing operation, safe to log and persist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub envelope_id: String,
    pub algorithm: String,
    pub timestamp: String,
    /// SHA-256 of the canonical plaintext, hex.
    pub payload_hash: String,
    pub payload_size: usize,
    pub ciphertext_size: usize,
    pub sender_id: String,
}

/// Transport header, usable without an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureHeader {
    pub message_id: String,
    pub timestamp: String,
    pub protocol_version: String,
    pub payload_hash: String,
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
}

/// Output of [`Encryptor::encrypt_direct`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectCiphertext {
    pub ciphertext: Vec<u8>,
    pub metadata: EnvelopeMetadata,
}

impl DirectCiphertext {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.ciphertext)
    }
}

// ---------------------------------------------------------------------------
// Encryptor
// ---------------------------------------------------------------------------

/// Encryption capability keyed by the recipient's public key.
pub trait Encryptor: Send + Sync {
    /// Seal `payload` in a hybrid envelope. Returns the envelope JSON and
    /// its metadata.
    fn encrypt_firs_payload(&self, payload: &Value)
        -> Result<(String, EnvelopeMetadata), EncryptionError>;

    /// Seal a small payload with RSA-OAEP alone.
    fn encrypt_direct(&self, payload: &Value) -> Result<DirectCiphertext, EncryptionError>;
}

/// [`Encryptor`] for the FIRS authority.
#[derive(Clone, Debug)]
pub struct FirsEncryptor {
    recipient: Option<RsaPublicKey>,
    config: EncryptorConfig,
}

impl FirsEncryptor {
    /// An encryptor with no authority key yet. Every seal fails with
    /// [`EncryptionError::RecipientKeyUnavailable`] until one is set.
    pub fn new(config: EncryptorConfig) -> Self {
        Self {
            recipient: None,
            config,
        }
    }

    pub fn from_bundle(bundle: &CryptoBundle, config: EncryptorConfig) -> Self {
        Self::new(config).with_recipient_key(bundle.public_key().clone())
    }

    pub fn with_recipient_key(mut self, key: RsaPublicKey) -> Self {
        self.recipient = Some(key);
        self
    }

    pub fn config(&self) -> &EncryptorConfig {
        &self.config
    }

    /// Largest plaintext [`Encryptor::encrypt_direct`] accepts, or `None`
    /// without a key.
    pub fn direct_capacity(&self) -> Option<usize> {
        self.recipient.as_ref().map(|key| oaep_capacity(key.size()))
    }

    /// Standalone transport header.
    pub fn create_secure_header(&self, payload_hash: &str, certificate_id: Option<&str>) -> SecureHeader {
        SecureHeader {
            message_id: Uuid::new_v4().to_string(),
            timestamp: now_rfc3339(),
            protocol_version: self.config.protocol_version.clone(),
            payload_hash: payload_hash.to_string(),
            algorithm: ENVELOPE_ALGORITHM.to_string(),
            certificate_id: certificate_id.map(str::to_string),
        }
    }

    fn recipient(&self) -> Result<&RsaPublicKey, EncryptionError> {
        self.recipient
            .as_ref()
            .ok_or(EncryptionError::RecipientKeyUnavailable)
    }

    fn header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            algorithm: ENVELOPE_ALGORITHM.to_string(),
            envelope_id: Uuid::new_v4().to_string(),
            timestamp: now_rfc3339(),
            version: self.config.protocol_version.clone(),
            sender_info: SenderInfo {
                id: self.config.sender_id.clone(),
                name: self.config.sender_name.clone(),
            },
        }
    }

    fn wrap(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
            .map_err(|e| EncryptionError::KeyWrap(e.to_string()))
    }
}

impl Encryptor for FirsEncryptor {
    fn encrypt_firs_payload(
        &self,
        payload: &Value,
    ) -> Result<(String, EnvelopeMetadata), EncryptionError> {
        if is_empty_payload(payload) {
            return Err(EncryptionError::EmptyPayload);
        }
        let recipient = self.recipient()?;

        let plaintext = canonical_json(payload).into_bytes();
        let header = self.header();
        let aad = canonical_bytes(&header)?;

        let key = encryption::generate_key();
        let sealed = encryption::seal(&key, &plaintext, &aad)?;
        let encrypted_key = Self::wrap(recipient, &key)?;

        let metadata = EnvelopeMetadata {
            envelope_id: header.envelope_id.clone(),
            algorithm: header.algorithm.clone(),
            timestamp: header.timestamp.clone(),
            payload_hash: sha256_hex(&plaintext),
            payload_size: plaintext.len(),
            ciphertext_size: sealed.ciphertext.len(),
            sender_id: header.sender_info.id.clone(),
        };
        let envelope = EncryptedEnvelope {
            header,
            encrypted_key: BASE64.encode(encrypted_key),
            iv: BASE64.encode(sealed.nonce),
            ciphertext: BASE64.encode(&sealed.ciphertext),
            tag: BASE64.encode(sealed.tag),
        };

        let json = serde_json::to_string(&envelope)?;
        tracing::info!(
            envelope_id = %metadata.envelope_id,
            payload_size = metadata.payload_size,
            "sealed FIRS payload"
        );
        Ok((json, metadata))
    }

    fn encrypt_direct(&self, payload: &Value) -> Result<DirectCiphertext, EncryptionError> {
        if is_empty_payload(payload) {
            return Err(EncryptionError::EmptyPayload);
        }
        let recipient = self.recipient()?;

        let plaintext = canonical_json(payload).into_bytes();
        let max = oaep_capacity(recipient.size());
        if plaintext.len() > max {
            return Err(EncryptionError::PayloadTooLarge {
                size: plaintext.len(),
                max,
            });
        }
        let ciphertext = Self::wrap(recipient, &plaintext)?;

        let metadata = EnvelopeMetadata {
            envelope_id: Uuid::new_v4().to_string(),
            algorithm: DIRECT_ALGORITHM.to_string(),
            timestamp: now_rfc3339(),
            payload_hash: sha256_hex(&plaintext),
            payload_size: plaintext.len(),
            ciphertext_size: ciphertext.len(),
            sender_id: self.config.sender_id.clone(),
        };
        tracing::info!(
            envelope_id = %metadata.envelope_id,
            payload_size = metadata.payload_size,
            "sealed FIRS payload with RSA-OAEP"
        );
        Ok(DirectCiphertext {
            ciphertext,
            metadata,
        })
    }
}

/// The `{irn, certificate}` payload submitted to the authority.
///
/// `irn` must be a valid IRN, normally the timestamped form from
/// [`irn::generate_with_timestamp`].
pub fn firs_submission_payload(irn: &str, certificate_b64: &str) -> Result<Value, FormatError> {
    let irn = irn::parse(irn)?;
    Ok(json!({
        "irn": irn.to_string(),
        "certificate": certificate_b64,
    }))
}

/// RSA-OAEP plaintext limit: `k - 2*hLen - 2`.
fn oaep_capacity(modulus_bytes: usize) -> usize {
    modulus_bytes.saturating_sub(2 * HASH_OUTPUT_LENGTH + 2)
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
