//! End-to-end tests for the stamping core.
//!
//! These walk the same paths an e-invoicing platform does: build an IRN,
//! stamp an invoice, verify it (and catch tampering), stamp a batch, and
//! seal an IRN + certificate submission for the authority from a
//! provisioned crypto bundle.
//!
//! Each test stands alone. RSA keys are shared through a `OnceLock` only
//! because generating them is slow.

use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use firs_stamp::batch::BatchSigner;
use firs_stamp::config::{EncryptorConfig, ENVELOPE_ALGORITHM, STAMP_FIELD};
use firs_stamp::crypto::{
    create_self_signed_certificate, KeyAlgorithm, KeyMaterialError, Signer, SigningKeyPair,
};
use firs_stamp::csid::{generate_csid, verify_csid, CsidVersion};
use firs_stamp::envelope::{firs_submission_payload, EncryptionError};
use firs_stamp::{
    irn, CryptoBundle, CryptographicStamp, Encryptor, FailureReason, FirsEncryptor,
    InvoiceCoreFields, StampError, StampingService, ValidationError, VerificationOutcome,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn issuer_key() -> &'static SigningKeyPair {
    static KEY: OnceLock<SigningKeyPair> = OnceLock::new();
    KEY.get_or_init(|| SigningKeyPair::generate(KeyAlgorithm::Rsa2048).expect("issuer key"))
}

fn authority_bundle_json() -> &'static str {
    static BUNDLE: OnceLock<String> = OnceLock::new();
    BUNDLE.get_or_init(|| {
        let cert = create_self_signed_certificate("FIRS Sandbox", "FIRS", "NG", 30)
            .expect("certificate");
        let key = SigningKeyPair::from_pem(&cert.private_key_pem).expect("authority key");
        let pem = key.public_key().to_pem().expect("public pem");
        CryptoBundle::to_json(&pem, b"FIRS-CERT-0001")
    })
}

fn service() -> StampingService {
    StampingService::new(Arc::new(issuer_key().clone()))
}

fn invoice() -> Value {
    json!({
        "invoice_number": "INV001",
        "issue_date": "2024-06-11",
        "supplier_tin": "12345678-0001",
        "total_amount": "250000.00",
        "currency": "NGN",
        "service_id": "94ND90NR",
        "buyer": {"name": "Dangote Retail", "tin": "87654321-0001"},
        "line_items": [{"description": "Cement 50kg", "quantity": 100, "unit_price": "2500.00"}],
    })
}

// ---------------------------------------------------------------------------
// IRN
// ---------------------------------------------------------------------------

#[test]
fn test_irn_scenario() {
    let generated = irn::generate("INV001", "94ND90NR", Some("2024-06-11")).unwrap();
    assert_eq!(generated, "INV001-94ND90NR-20240611");

    let parsed = irn::parse(&generated).unwrap();
    assert_eq!(
        parsed.components(),
        ("INV001".to_string(), "94ND90NR".to_string(), "20240611".to_string())
    );
    assert!(irn::validate(&generated));
}

#[test]
fn test_irn_rejections() {
    assert!(irn::generate("INV001", "94ND90N", Some("2024-06-11")).is_err());
    assert!(irn::generate("INV-001", "94ND90NR", Some("2024-06-11")).is_err());
    assert!(irn::generate("INV001", "94ND90NR", Some("2023-02-29")).is_err());
    assert!(!irn::validate("INV001-94ND90NR-20230229"));
    assert!(!irn::validate("INV001/94ND90NR/20240611"));
}

// ---------------------------------------------------------------------------
// Stamping
// ---------------------------------------------------------------------------

#[test]
fn test_stamp_and_verify_scenario() {
    let svc = service();
    let stamped = svc.stamp_invoice(&invoice()).unwrap();
    let stamp = CryptographicStamp::from_invoice(&stamped).unwrap();

    assert_eq!(svc.verify_stamp(&stamped, &stamp), VerificationOutcome::valid());

    let mut tampered = stamped.clone();
    tampered["total_amount"] = json!("260000.00");
    assert_eq!(
        svc.verify_stamp(&tampered, &stamp),
        VerificationOutcome::invalid(FailureReason::Tampered)
    );
}

#[test]
fn test_stamp_is_embedded_with_all_fields() {
    let stamped = service().stamp_invoice(&invoice()).unwrap();
    let stamp = stamped[STAMP_FIELD].as_object().unwrap();
    for field in ["csid", "timestamp", "algorithm", "version", "signature_id", "key_info", "qr_code"] {
        assert!(stamp.contains_key(field), "{field} missing");
    }
    assert_eq!(stamp["algorithm"], "RSA-PSS-SHA256");
    let png = BASE64.decode(stamp["qr_code"].as_str().unwrap()).unwrap();
    assert!(png.starts_with(b"\x89PNG"));
    // Non-stamp content passes through untouched.
    assert_eq!(stamped["line_items"], invoice()["line_items"]);
}

#[test]
fn test_every_bound_field_is_covered() {
    let svc = service();
    let stamped = svc.stamp_invoice(&invoice()).unwrap();
    let stamp = CryptographicStamp::from_invoice(&stamped).unwrap();

    let mutations = [
        ("invoice_number", json!("INV002")),
        ("issue_date", json!("2024-06-12")),
        ("supplier_tin", json!("12345678-0002")),
        ("total_amount", json!("250000.01")),
        ("currency", json!("USD")),
        ("service_id", json!("94ND90NS")),
    ];
    for (field, value) in mutations {
        let mut mutated = invoice();
        mutated[field] = value;
        let outcome = svc.verify_stamp(&mutated, &stamp);
        assert!(!outcome.is_valid, "{field} change went unnoticed");
        assert!(
            matches!(
                outcome.reason,
                Some(FailureReason::Tampered | FailureReason::SignatureMismatch)
            ),
            "{field}: {outcome:?}"
        );
    }

    // Fields outside the signature are free to change.
    let mut annotated = stamped.clone();
    annotated["buyer"]["name"] = json!("Dangote Retail Ltd");
    assert!(svc.verify_stamp(&annotated, &stamp).is_valid);
}

#[test]
fn test_repeated_generation_all_verify() {
    let fields = InvoiceCoreFields::from_value(&invoice()).unwrap();
    let key = issuer_key();
    let a = generate_csid(key, &fields, Default::default(), CsidVersion::V2).unwrap();
    let b = generate_csid(key, &fields, Default::default(), CsidVersion::V2).unwrap();

    assert_ne!(a.envelope.signature_id, b.envelope.signature_id);
    assert!(verify_csid(&fields, &a.csid, &key.public_key()).is_valid);
    assert!(verify_csid(&fields, &b.csid, &key.public_key()).is_valid);
}

#[test]
fn test_empty_invoice_rejected_before_signing() {
    assert!(matches!(
        service().stamp_invoice(&json!({})),
        Err(StampError::Validation(ValidationError::EmptyInvoice))
    ));
}

#[test]
fn test_batch_stamps_verify_in_order() {
    let svc = service();
    let signer = BatchSigner::with_workers(svc.clone(), 4).unwrap();
    let invoices: Vec<Value> = (1..=8)
        .map(|n| {
            let mut inv = invoice();
            inv["invoice_number"] = json!(format!("INV{n:03}"));
            inv
        })
        .collect();

    let report = signer.sign_batch(&invoices);
    assert_eq!(report.metrics.succeeded, 8);
    for (n, result) in (1..=8).zip(report.results) {
        let stamped = result.unwrap();
        assert_eq!(stamped["irn"], format!("INV{n:03}-94ND90NR-20240611"));
        assert!(svc.verify_stamped_invoice(&stamped).is_valid);
    }
}

// ---------------------------------------------------------------------------
// FIRS submission
// ---------------------------------------------------------------------------

#[test]
fn test_submission_envelope_from_bundle() {
    let bundle = CryptoBundle::from_json(authority_bundle_json()).unwrap();
    let encryptor = FirsEncryptor::from_bundle(&bundle, EncryptorConfig::new("94ND90NR"));

    let (irn, ts) =
        irn::generate_with_timestamp("INV001", "94ND90NR", "2024-06-11", Some(1718064000)).unwrap();
    assert_eq!(ts, 1718064000);
    let payload = firs_submission_payload(&irn, bundle.certificate_b64()).unwrap();

    let (envelope_json, metadata) = encryptor.encrypt_firs_payload(&payload).unwrap();
    let envelope: Value = serde_json::from_str(&envelope_json).unwrap();
    for field in ["encrypted_key", "iv", "ciphertext", "tag"] {
        assert!(BASE64.decode(envelope[field].as_str().unwrap()).is_ok(), "{field}");
    }
    for field in ["algorithm", "envelope_id", "timestamp", "version", "sender_info"] {
        assert!(envelope["header"].get(field).is_some(), "{field}");
    }
    assert_eq!(envelope["header"]["algorithm"], ENVELOPE_ALGORITHM);
    assert_eq!(metadata.envelope_id, envelope["header"]["envelope_id"]);

    // The plaintext never appears in the output.
    assert!(!envelope_json.contains("INV001-94ND90NR"));

    let direct = encryptor.encrypt_direct(&payload).unwrap();
    assert_eq!(direct.ciphertext.len(), 256);
}

#[test]
fn test_empty_submission_rejected() {
    let bundle = CryptoBundle::from_json(authority_bundle_json()).unwrap();
    let encryptor = FirsEncryptor::from_bundle(&bundle, EncryptorConfig::new("94ND90NR"));
    assert!(matches!(
        encryptor.encrypt_firs_payload(&json!({})),
        Err(EncryptionError::EmptyPayload)
    ));
}

#[test]
fn test_bundle_missing_certificate_scenario() {
    let full: Value = serde_json::from_str(authority_bundle_json()).unwrap();
    let partial = json!({"public_key": full["public_key"]}).to_string();
    let err = CryptoBundle::from_json(&partial).unwrap_err();
    assert!(matches!(err, KeyMaterialError::MissingField("certificate")));
    assert!(err.to_string().contains("certificate"));
}
