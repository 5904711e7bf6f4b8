//! # Stamping Service
//!
//! The single entry point the rest of the platform uses: take invoice JSON,
//! return it with a `cryptographic_stamp` attached; take invoice JSON and a
//! stamp, say whether they still belong together.
//!
//! ```text
//! invoice JSON ──► InvoiceCoreFields ──► CSID ──► QR ──► stamped invoice
//!                  (validate, derive IRN)
//! ```
//!
//! Input is validated before any cryptographic work starts, so a bad
//! invoice never costs a signature.
//!
//! Stamping is not idempotent in output (every call gets a new timestamp
//! and V2 signature id) but it is idempotent in correctness: every stamp
//! issued for unmodified data verifies.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{StampPolicy, STAMP_FIELD};
use crate::crypto::{PublicKey, SignatureAlgorithm, Signer};
use crate::csid::{
    self, CsidEnvelope, CsidError, CsidVersion, FailureReason, GeneratedCsid, VerificationOutcome,
};
use crate::invoice::{InvoiceCoreFields, ValidationError};
use crate::qr::{self, QrError};

/// Anything that can stop an invoice from being stamped.
#[derive(Debug, Error)]
pub enum StampError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Csid(#[from] CsidError),

    #[error(transparent)]
    Qr(#[from] QrError),

    #[error("failed to encode stamp: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// The stamp embedded under `cryptographic_stamp`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptographicStamp {
    pub csid: String,
    pub timestamp: String,
    pub algorithm: SignatureAlgorithm,
    pub version: CsidVersion,
    #[serde(default)]
    pub signature_id: Option<String>,
    #[serde(default)]
    pub key_info: Option<String>,
    /// Base64 PNG of a QR code encoding `csid`.
    pub qr_code: String,
}

impl CryptographicStamp {
    fn new(generated: GeneratedCsid, qr_code: String) -> Self {
        let GeneratedCsid {
            csid,
            timestamp,
            envelope,
        } = generated;
        Self {
            csid,
            timestamp,
            algorithm: envelope.algorithm,
            version: envelope.version(),
            signature_id: envelope.signature_id,
            key_info: envelope.key_info,
            qr_code,
        }
    }

    /// Read the stamp out of a stamped invoice.
    pub fn from_invoice(invoice: &Value) -> Option<Self> {
        invoice
            .get(STAMP_FIELD)
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
    }

    /// `true` when the readable metadata agrees with the signed envelope.
    fn matches(&self, envelope: &CsidEnvelope) -> bool {
        self.timestamp == envelope.timestamp
            && self.algorithm == envelope.algorithm
            && self.version == envelope.version()
            && self.signature_id == envelope.signature_id
            && self.key_info == envelope.key_info
    }
}

/// Issues and verifies stamps with one issuer key.
#[derive(Clone)]
pub struct StampingService {
    signer: Arc<dyn Signer>,
    verifying_key: PublicKey,
    algorithm: SignatureAlgorithm,
    version: CsidVersion,
    policy: StampPolicy,
}

impl StampingService {
    /// A service issuing V2 stamps with the key's natural algorithm
    /// (RSA-PSS for RSA keys) and the default [`StampPolicy`].
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        let verifying_key = signer.public_key();
        let algorithm = if verifying_key.supports(SignatureAlgorithm::RsaPssSha256) {
            SignatureAlgorithm::RsaPssSha256
        } else {
            SignatureAlgorithm::Ed25519
        };
        Self {
            signer,
            verifying_key,
            algorithm,
            version: CsidVersion::default(),
            policy: StampPolicy::default(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_version(mut self, version: CsidVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_policy(mut self, policy: StampPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn version(&self) -> CsidVersion {
        self.version
    }

    pub fn policy(&self) -> &StampPolicy {
        &self.policy
    }

    pub fn verifying_key(&self) -> &PublicKey {
        &self.verifying_key
    }

    /// Stamp an invoice. The returned JSON is the input plus the derived
    /// `irn` (when it was absent) and the `cryptographic_stamp` object.
    pub fn stamp_invoice(&self, invoice: &Value) -> Result<Value, StampError> {
        let fields = InvoiceCoreFields::from_value(invoice)?;
        let stamp = self.issue(&fields)?;

        let mut stamped = invoice.clone();
        // from_value only accepts objects.
        if let Some(map) = stamped.as_object_mut() {
            map.entry("irn")
                .or_insert_with(|| Value::String(fields.irn.clone()));
            map.insert(STAMP_FIELD.to_string(), serde_json::to_value(&stamp)?);
        }

        tracing::info!(
            irn = %fields.irn,
            algorithm = %stamp.algorithm,
            version = %stamp.version,
            "invoice stamped"
        );
        Ok(stamped)
    }

    /// Produce a stamp for already-validated fields.
    pub fn issue(&self, fields: &InvoiceCoreFields) -> Result<CryptographicStamp, StampError> {
        let generated = csid::generate_csid(self.signer.as_ref(), fields, self.algorithm, self.version)?;
        let qr_code = qr::generate_qr_base64(&generated.csid)?;
        Ok(CryptographicStamp::new(generated, qr_code))
    }

    /// Verify `stamp` against `invoice` with this service's key and policy.
    pub fn verify_stamp(&self, invoice: &Value, stamp: &CryptographicStamp) -> VerificationOutcome {
        verify_stamp_at(invoice, stamp, &self.verifying_key, &self.policy, Utc::now())
    }

    /// Verify the stamp embedded in a stamped invoice.
    pub fn verify_stamped_invoice(&self, invoice: &Value) -> VerificationOutcome {
        match CryptographicStamp::from_invoice(invoice) {
            Some(stamp) => self.verify_stamp(invoice, &stamp),
            None => {
                tracing::warn!("invoice carries no readable cryptographic stamp");
                VerificationOutcome::invalid(FailureReason::Malformed)
            }
        }
    }
}

impl std::fmt::Debug for StampingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampingService")
            .field("algorithm", &self.algorithm)
            .field("version", &self.version)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Verify a stamp with an explicit key, policy and clock.
///
/// Invoice data that no longer passes validation counts as `tampered`: it
/// was valid when stamped, so it has been changed since. So does a stamp
/// whose metadata or QR code disagrees with its CSID.
pub fn verify_stamp_at(
    invoice: &Value,
    stamp: &CryptographicStamp,
    public_key: &PublicKey,
    policy: &StampPolicy,
    now: DateTime<Utc>,
) -> VerificationOutcome {
    let fields = match InvoiceCoreFields::from_value(invoice) {
        Ok(fields) => fields,
        Err(err) => {
            tracing::warn!(error = %err, "stamped invoice no longer validates");
            return VerificationOutcome::invalid(FailureReason::Tampered);
        }
    };

    let outcome = csid::verify_csid_at(&fields, &stamp.csid, public_key, policy, now);
    if !outcome.is_valid {
        return outcome;
    }

    // The CSID checked out, so the envelope decodes.
    let metadata_matches = matches!(
        csid::decode_envelope(&stamp.csid),
        Ok(envelope) if stamp.matches(&envelope)
    );
    if !metadata_matches {
        tracing::warn!(irn = %fields.irn, "stamp metadata disagrees with its CSID");
        return VerificationOutcome::invalid(FailureReason::Tampered);
    }

    // The printed QR must encode this CSID and nothing else.
    match qr::generate_qr_base64(&stamp.csid) {
        Ok(expected) if expected == stamp.qr_code => outcome,
        _ => {
            tracing::warn!(irn = %fields.irn, "stamp QR code does not encode its CSID");
            VerificationOutcome::invalid(FailureReason::Tampered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::test_keys;
    use crate::crypto::SigningKeyPair;
    use serde_json::json;

    fn service() -> StampingService {
        StampingService::new(Arc::new(test_keys::rsa().clone()))
    }

    fn invoice() -> Value {
        json!({
            "invoice_number": "INV001",
            "issue_date": "2024-06-11",
            "supplier_tin": "12345678-0001",
            "total_amount": 250000,
            "currency": "NGN",
            "service_id": "94ND90NR",
            "customer": {"name": "Dangote Retail"},
        })
    }

    #[test]
    fn test_stamp_then_verify() {
        let svc = service();
        let stamped = svc.stamp_invoice(&invoice()).unwrap();
        assert_eq!(stamped["irn"], "INV001-94ND90NR-20240611");
        assert_eq!(stamped["customer"]["name"], "Dangote Retail");

        let stamp = CryptographicStamp::from_invoice(&stamped).unwrap();
        assert_eq!(stamp.version, CsidVersion::V2);
        assert_eq!(stamp.algorithm, SignatureAlgorithm::RsaPssSha256);
        assert!(stamp.signature_id.is_some());
        assert!(stamp.key_info.is_some());
        assert!(!stamp.qr_code.is_empty());

        assert_eq!(svc.verify_stamp(&stamped, &stamp), VerificationOutcome::valid());
        assert_eq!(svc.verify_stamped_invoice(&stamped), VerificationOutcome::valid());
        // The original, un-stamped invoice verifies too; the IRN is re-derived.
        assert!(svc.verify_stamp(&invoice(), &stamp).is_valid);
    }

    #[test]
    fn test_changed_amount_is_tampered() {
        let svc = service();
        let stamped = svc.stamp_invoice(&invoice()).unwrap();
        let stamp = CryptographicStamp::from_invoice(&stamped).unwrap();

        let mut mutated = stamped.clone();
        mutated["total_amount"] = json!(999);
        assert_eq!(
            svc.verify_stamp(&mutated, &stamp),
            VerificationOutcome::invalid(FailureReason::Tampered)
        );
    }

    #[test]
    fn test_removed_field_is_tampered() {
        let svc = service();
        let stamped = svc.stamp_invoice(&invoice()).unwrap();
        let mut mutated = stamped.clone();
        mutated.as_object_mut().unwrap().remove("currency");
        assert_eq!(
            svc.verify_stamped_invoice(&mutated).reason,
            Some(FailureReason::Tampered)
        );
    }

    #[test]
    fn test_edited_stamp_metadata_is_tampered() {
        let svc = service();
        let stamped = svc.stamp_invoice(&invoice()).unwrap();
        let mut stamp = CryptographicStamp::from_invoice(&stamped).unwrap();
        stamp.signature_id = Some(uuid::Uuid::new_v4().to_string());
        assert_eq!(
            svc.verify_stamp(&stamped, &stamp).reason,
            Some(FailureReason::Tampered)
        );
    }

    #[test]
    fn test_swapped_qr_code_is_tampered() {
        let svc = service();
        let stamped = svc.stamp_invoice(&invoice()).unwrap();
        let mut stamp = CryptographicStamp::from_invoice(&stamped).unwrap();
        stamp.qr_code = qr::generate_qr_base64("https://evil.example/forged").unwrap();
        assert_eq!(
            svc.verify_stamp(&stamped, &stamp),
            VerificationOutcome::invalid(FailureReason::Tampered)
        );

        stamp.qr_code.clear();
        assert_eq!(
            svc.verify_stamp(&stamped, &stamp).reason,
            Some(FailureReason::Tampered)
        );
    }

    #[test]
    fn test_missing_stamp_is_malformed() {
        let svc = service();
        assert_eq!(
            svc.verify_stamped_invoice(&invoice()).reason,
            Some(FailureReason::Malformed)
        );
    }

    #[test]
    fn test_validation_runs_before_crypto() {
        let svc = service();
        assert!(matches!(
            svc.stamp_invoice(&Value::Null),
            Err(StampError::Validation(ValidationError::EmptyInvoice))
        ));
        let mut incomplete = invoice();
        incomplete.as_object_mut().unwrap().remove("supplier_tin");
        assert!(matches!(
            svc.stamp_invoice(&incomplete),
            Err(StampError::Validation(ValidationError::MissingField("supplier_tin")))
        ));
    }

    #[test]
    fn test_v1_ed25519_service() {
        let svc = StampingService::new(Arc::new(test_keys::ed25519())).with_version(CsidVersion::V1);
        assert_eq!(svc.algorithm(), SignatureAlgorithm::Ed25519);
        let stamped = svc.stamp_invoice(&invoice()).unwrap();
        let stamp = CryptographicStamp::from_invoice(&stamped).unwrap();
        assert_eq!(stamp.version, CsidVersion::V1);
        assert_eq!(stamp.signature_id, None);
        assert!(svc.verify_stamp(&stamped, &stamp).is_valid);
    }

    #[test]
    fn test_other_issuer_cannot_verify() {
        let stamped = service().stamp_invoice(&invoice()).unwrap();
        let other = StampingService::new(Arc::new(SigningKeyPair::clone(test_keys::other_rsa())));
        assert_eq!(
            other.verify_stamped_invoice(&stamped).reason,
            Some(FailureReason::SignatureMismatch)
        );
    }

    #[test]
    fn test_restamping_replaces_stamp() {
        let svc = service();
        let first = svc.stamp_invoice(&invoice()).unwrap();
        let second = svc.stamp_invoice(&first).unwrap();
        assert_ne!(first[STAMP_FIELD]["csid"], second[STAMP_FIELD]["csid"]);
        assert!(svc.verify_stamped_invoice(&second).is_valid);
    }
}
