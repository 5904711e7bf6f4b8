//! # Cryptographic Stamp IDs
//!
//! A CSID is a signed attestation binding invoice content to the issuer's
//! key at a point in time. On the wire it is a base64 string wrapping a
//! small JSON envelope:
//!
//! ```text
//! V1  {"algorithm", "csid", "timestamp"}
//! V2  V1 + {"version", "signature_id", "key_info", "invoice_ref"}
//! ```
//!
//! `csid` inside the envelope is the base64 signature over
//!
//! ```text
//! canonical_json(core fields) | algorithm tag | timestamp
//! ```
//!
//! so every bound field, the algorithm and the issuance time are all covered.
//! V2 adds a fresh correlation id per call, the signing key's fingerprint
//! (for key rotation) and a content reference (SHA-256 of invoice number,
//! issue date and supplier TIN) that can be checked without the key.
//!
//! ## Verification
//!
//! [`verify_csid_at`] fails closed and checks, in order:
//!
//! 1. structure: the envelope decodes and has every field its version needs
//! 2. signature: against the declared algorithm and the supplied key
//! 3. expiry: against the [`StampPolicy`] validity window and clock skew
//! 4. (V2) the content reference and key fingerprint match
//!
//! The first failing check decides the [`FailureReason`]. A V2 signature
//! failure where `key_info` names the verifying key is reported as
//! `tampered`: the key is the right one, so the signed content has changed.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::StampPolicy;
use crate::crypto::{KeyMaterialError, PublicKey, SignatureAlgorithm, Signer};
use crate::invoice::InvoiceCoreFields;

/// Errors while issuing a CSID. Verification never errors; it returns a
/// [`VerificationOutcome`].
#[derive(Debug, Error)]
pub enum CsidError {
    #[error(transparent)]
    Key(#[from] KeyMaterialError),

    #[error("failed to encode CSID envelope: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("malformed CSID: {0}")]
    Malformed(String),
}

/// CSID envelope layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsidVersion {
    #[serde(rename = "v1")]
    V1,
    #[default]
    #[serde(rename = "v2")]
    V2,
}

impl CsidVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            CsidVersion::V1 => "v1",
            CsidVersion::V2 => "v2",
        }
    }
}

impl fmt::Display for CsidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decoded CSID envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsidEnvelope {
    /// Base64 signature.
    pub csid: String,
    /// RFC 3339 issuance time, exactly as signed.
    pub timestamp: String,
    pub algorithm: SignatureAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<CsidVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_ref: Option<String>,
}

impl CsidEnvelope {
    /// Envelopes without a `version` field are V1.
    pub fn version(&self) -> CsidVersion {
        self.version.unwrap_or(CsidVersion::V1)
    }

    /// Base64 of the compact JSON encoding; the CSID string.
    pub fn encode(&self) -> Result<String, CsidError> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }
}

/// Output of [`generate_csid`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedCsid {
    pub csid: String,
    pub timestamp: String,
    pub envelope: CsidEnvelope,
}

/// Why a CSID did not verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Malformed,
    SignatureMismatch,
    Expired,
    Tampered,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Malformed => "malformed",
            FailureReason::SignatureMismatch => "signature_mismatch",
            FailureReason::Expired => "expired",
            FailureReason::Tampered => "tampered",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of verifying a CSID or stamp. An invalid stamp is an expected
/// business outcome, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub is_valid: bool,
    pub reason: Option<FailureReason>,
}

impl VerificationOutcome {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: FailureReason) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Sign `invoice` and wrap the signature in a versioned envelope.
pub fn generate_csid(
    signer: &dyn Signer,
    invoice: &InvoiceCoreFields,
    algorithm: SignatureAlgorithm,
    version: CsidVersion,
) -> Result<GeneratedCsid, CsidError> {
    generate_csid_at(signer, invoice, algorithm, version, Utc::now())
}

/// [`generate_csid`] with an explicit issuance time.
pub fn generate_csid_at(
    signer: &dyn Signer,
    invoice: &InvoiceCoreFields,
    algorithm: SignatureAlgorithm,
    version: CsidVersion,
    issued_at: DateTime<Utc>,
) -> Result<GeneratedCsid, CsidError> {
    let timestamp = issued_at.to_rfc3339_opts(SecondsFormat::Micros, true);
    let signature = signer.sign(algorithm, &signing_input(invoice, algorithm, &timestamp))?;

    let mut envelope = CsidEnvelope {
        csid: BASE64.encode(&signature),
        timestamp: timestamp.clone(),
        algorithm,
        version: None,
        signature_id: None,
        key_info: None,
        invoice_ref: None,
    };
    if version == CsidVersion::V2 {
        envelope.version = Some(CsidVersion::V2);
        envelope.signature_id = Some(Uuid::new_v4().to_string());
        envelope.key_info = Some(signer.key_fingerprint()?);
        envelope.invoice_ref = Some(invoice.invoice_ref());
    }

    let csid = envelope.encode()?;
    tracing::debug!(
        invoice_number = %invoice.invoice_number,
        %algorithm,
        %version,
        "generated CSID"
    );

    Ok(GeneratedCsid {
        csid,
        timestamp,
        envelope,
    })
}

fn signing_input(invoice: &InvoiceCoreFields, algorithm: SignatureAlgorithm, timestamp: &str) -> Vec<u8> {
    format!("{}|{}|{}", invoice.canonical_json(), algorithm.tag(), timestamp).into_bytes()
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Decode and structurally check a CSID string.
pub fn decode_envelope(csid: &str) -> Result<CsidEnvelope, CsidError> {
    let malformed = |msg: String| CsidError::Malformed(msg);

    let raw = BASE64
        .decode(csid.trim())
        .map_err(|e| malformed(format!("not base64: {e}")))?;
    let envelope: CsidEnvelope =
        serde_json::from_slice(&raw).map_err(|e| malformed(format!("bad envelope: {e}")))?;

    match BASE64.decode(&envelope.csid) {
        Ok(sig) if !sig.is_empty() => {}
        _ => return Err(malformed("signature is empty or not base64".to_string())),
    }
    DateTime::parse_from_rfc3339(&envelope.timestamp)
        .map_err(|e| malformed(format!("bad timestamp: {e}")))?;

    let v2_fields = [
        envelope.signature_id.is_some(),
        envelope.key_info.is_some(),
        envelope.invoice_ref.is_some(),
    ];
    match envelope.version() {
        CsidVersion::V1 if v2_fields.iter().any(|present| *present) => {
            return Err(malformed("V1 envelope carries V2 fields".to_string()))
        }
        CsidVersion::V2 if !v2_fields.iter().all(|present| *present) => {
            return Err(malformed("V2 envelope is missing fields".to_string()))
        }
        _ => {}
    }
    if let Some(id) = &envelope.signature_id {
        Uuid::parse_str(id).map_err(|e| malformed(format!("bad signature_id: {e}")))?;
    }

    Ok(envelope)
}

/// Verify a CSID against invoice data with the default policy and the
/// system clock.
pub fn verify_csid(
    invoice: &InvoiceCoreFields,
    csid: &str,
    public_key: &PublicKey,
) -> VerificationOutcome {
    verify_csid_at(invoice, csid, public_key, &StampPolicy::default(), Utc::now())
}

/// Verify a CSID with an explicit policy and clock.
pub fn verify_csid_at(
    invoice: &InvoiceCoreFields,
    csid: &str,
    public_key: &PublicKey,
    policy: &StampPolicy,
    now: DateTime<Utc>,
) -> VerificationOutcome {
    let outcome = check(invoice, csid, public_key, policy, now);
    match outcome.reason {
        None => tracing::debug!(invoice_number = %invoice.invoice_number, "CSID verified"),
        Some(reason) => tracing::warn!(
            invoice_number = %invoice.invoice_number,
            %reason,
            "CSID verification failed"
        ),
    }
    outcome
}

fn check(
    invoice: &InvoiceCoreFields,
    csid: &str,
    public_key: &PublicKey,
    policy: &StampPolicy,
    now: DateTime<Utc>,
) -> VerificationOutcome {
    let envelope = match decode_envelope(csid) {
        Ok(envelope) => envelope,
        Err(_) => return VerificationOutcome::invalid(FailureReason::Malformed),
    };
    // decode_envelope already proved both of these parse.
    let (Ok(signature), Ok(issued_at)) = (
        BASE64.decode(&envelope.csid),
        DateTime::parse_from_rfc3339(&envelope.timestamp),
    ) else {
        return VerificationOutcome::invalid(FailureReason::Malformed);
    };

    let fingerprint = public_key.fingerprint().ok();
    let key_matches = envelope.key_info.is_some() && envelope.key_info == fingerprint;

    let input = signing_input(invoice, envelope.algorithm, &envelope.timestamp);
    if !public_key.verify(envelope.algorithm, &input, &signature) {
        let reason = if envelope.version() == CsidVersion::V2 && key_matches {
            FailureReason::Tampered
        } else {
            FailureReason::SignatureMismatch
        };
        return VerificationOutcome::invalid(reason);
    }

    if is_expired(issued_at.with_timezone(&Utc), now, policy) {
        return VerificationOutcome::invalid(FailureReason::Expired);
    }

    if envelope.version() == CsidVersion::V2 {
        let ref_matches = envelope.invoice_ref.as_deref() == Some(invoice.invoice_ref().as_str());
        if !ref_matches || !key_matches {
            return VerificationOutcome::invalid(FailureReason::Tampered);
        }
    }

    VerificationOutcome::valid()
}

fn is_expired(issued_at: DateTime<Utc>, now: DateTime<Utc>, policy: &StampPolicy) -> bool {
    match (now - issued_at).to_std() {
        Ok(age) => age > policy.validity_window,
        // Issued "in the future": only tolerated within the clock skew.
        Err(_) => (issued_at - now)
            .to_std()
            .map_or(true, |ahead| ahead > policy.max_clock_skew),
    }
}
