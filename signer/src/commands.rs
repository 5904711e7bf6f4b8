//! Subcommand implementations.
//!
//! Each command takes its parsed arguments and returns a plain value, so
//! the file-writing flows can be exercised in tests without spawning the
//! binary. Printing happens in `main`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;

use firs_stamp::canonical::canonical_json;
use firs_stamp::config::{EncryptorConfig, StampPolicy};
use firs_stamp::crypto::{
    create_self_signed_certificate, generate_key_pair, load_private_key, load_public_key,
    validate_certificate, Signer, SigningKeyPair,
};
use firs_stamp::csid::VerificationOutcome;
use firs_stamp::envelope::{firs_submission_payload, EnvelopeMetadata};
use firs_stamp::stamping::verify_stamp_at;
use firs_stamp::{irn, qr, CryptoBundle, CryptographicStamp, Encryptor, FirsEncryptor, StampingService};

use crate::cli::{IrnAction, KeygenArgs, SignArgs, StampArgs, VerifyArgs};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Written to `metadata.json` by `sign`.
#[derive(Debug, Serialize)]
pub struct SignSummary {
    pub irn: String,
    pub unix_timestamp: i64,
    pub mode: &'static str,
    pub envelope: EnvelopeMetadata,
    pub files: Vec<String>,
}

/// `sign`: seal `{irn, certificate}` for the authority and write the
/// artefacts to `out_dir`.
pub fn sign(args: &SignArgs) -> Result<SignSummary> {
    let (irn, unix_timestamp) = irn::generate_with_timestamp(
        &args.invoice_number,
        &args.service_id,
        &args.issue_date,
        args.timestamp,
    )
    .context("invalid IRN components")?;

    let bundle_raw = fs::read_to_string(&args.bundle)
        .with_context(|| format!("failed to read crypto bundle {}", args.bundle.display()))?;
    let bundle = CryptoBundle::from_json(&bundle_raw)
        .with_context(|| format!("invalid crypto bundle {}", args.bundle.display()))?;

    let payload = firs_submission_payload(&irn, bundle.certificate_b64())?;

    let mut config = EncryptorConfig::new(
        args.sender_id
            .clone()
            .unwrap_or_else(|| args.service_id.clone()),
    );
    config.sender_name = args.sender_name.clone();
    let encryptor = FirsEncryptor::from_bundle(&bundle, config);

    let (mode, encrypted, envelope) = if args.direct {
        let sealed = encryptor
            .encrypt_direct(&payload)
            .context("RSA-OAEP encryption failed")?;
        ("direct", sealed.ciphertext, sealed.metadata)
    } else {
        let (json, metadata) = encryptor
            .encrypt_firs_payload(&payload)
            .context("envelope encryption failed")?;
        ("hybrid", json.into_bytes(), metadata)
    };
    let encrypted_b64 = BASE64.encode(&encrypted);
    // Rendered before anything touches the disk so a failure leaves no
    // partial output.
    let qr_png = if args.qr {
        Some(qr::generate_qr_png(&encrypted_b64).context("failed to render QR code")?)
    } else {
        None
    };

    let out = &args.out_dir;
    fs::create_dir_all(out)
        .with_context(|| format!("failed to create output directory {}", out.display()))?;

    let mut files = Vec::new();
    let mut write = |name: &str, contents: &[u8]| -> Result<()> {
        write_file(&out.join(name), contents)?;
        files.push(name.to_string());
        Ok(())
    };
    write("crypto_keys.json", bundle_raw.as_bytes())?;
    write("public_key.pem", bundle.public_key_pem().as_bytes())?;
    write("certificate.bin", bundle.certificate())?;
    write("payload.json", canonical_json(&payload).as_bytes())?;
    write("encrypted.bin", &encrypted)?;
    write("encrypted.b64", encrypted_b64.as_bytes())?;
    if let Some(png) = &qr_png {
        write("qr.png", png)?;
    }
    files.push("metadata.json".to_string());

    let summary = SignSummary {
        irn,
        unix_timestamp,
        mode,
        envelope,
        files,
    };
    write_file(
        &out.join("metadata.json"),
        serde_json::to_string_pretty(&summary)?.as_bytes(),
    )?;

    tracing::info!(irn = %summary.irn, mode, out_dir = %out.display(), "submission sealed");
    Ok(summary)
}

/// `irn`: generate or validate. Returns what to print.
pub fn irn_action(action: &IrnAction) -> Result<String> {
    match action {
        IrnAction::Generate {
            invoice_number,
            service_id,
            date,
            timestamp: None,
        } => Ok(irn::generate(invoice_number, service_id, date.as_deref())?),
        IrnAction::Generate {
            invoice_number,
            service_id,
            date,
            timestamp: Some(ts),
        } => {
            let date = match date {
                Some(d) => d.clone(),
                None => chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            };
            let (irn, _) =
                irn::generate_with_timestamp(invoice_number, service_id, &date, Some(*ts))?;
            Ok(irn)
        }
        IrnAction::Validate { irn } => {
            let parsed = irn::parse(irn)?;
            let (invoice_number, service_id, date) = parsed.components();
            Ok(serde_json::json!({
                "invoice_number": invoice_number,
                "service_id": service_id,
                "date": date,
                "unix_timestamp": parsed.unix_timestamp(),
            })
            .to_string())
        }
    }
}

/// `keygen`: issuer key pair, a dev authority certificate and a bundle.
pub fn keygen(args: &KeygenArgs) -> Result<Vec<PathBuf>> {
    let out = &args.out_dir;
    fs::create_dir_all(out)
        .with_context(|| format!("failed to create output directory {}", out.display()))?;

    let signing = generate_key_pair(args.algorithm).context("failed to generate signing key")?;
    let authority = create_self_signed_certificate(
        &args.common_name,
        &args.organization,
        &args.country,
        args.validity_days,
    )
    .context("failed to create certificate")?;
    let report = validate_certificate(authority.certificate_pem.as_bytes())?;

    // The bundle carries the authority's public key, taken from the
    // certificate's own key pair.
    let authority_public = load_public_key_from_private_pem(&authority.private_key_pem)?;
    let bundle = CryptoBundle::to_json(&authority_public, authority.certificate_pem.as_bytes());

    let files = [
        ("signing_key.pem", signing.private_key_pem.as_str(), true),
        ("signing_public_key.pem", signing.public_key_pem.as_str(), false),
        ("authority_key.pem", authority.private_key_pem.as_str(), true),
        ("certificate.pem", authority.certificate_pem.as_str(), false),
        ("crypto_keys.json", bundle.as_str(), false),
    ];
    let mut written = Vec::new();
    for (name, contents, secret) in files {
        let path = out.join(name);
        write_file(&path, contents.as_bytes())?;
        if secret {
            restrict_permissions(&path)?;
        }
        written.push(path);
    }

    tracing::info!(
        algorithm = ?args.algorithm,
        subject = %report.subject,
        valid_until = %report.valid_until,
        "development key material written"
    );
    Ok(written)
}

/// `stamp`: returns the stamped invoice JSON.
pub fn stamp(args: &StampArgs) -> Result<Value> {
    let key = load_private_key(&args.key)
        .with_context(|| format!("failed to load signing key {}", args.key.display()))?;
    let invoice = read_json(&args.invoice)?;

    let mut service = StampingService::new(Arc::new(key)).with_version(args.csid_version);
    if let Some(algorithm) = args.signature_algorithm {
        service = service.with_algorithm(algorithm);
    }
    let stamped = service
        .stamp_invoice(&invoice)
        .with_context(|| format!("failed to stamp {}", args.invoice.display()))?;

    if let Some(out) = &args.out {
        write_file(out, serde_json::to_string_pretty(&stamped)?.as_bytes())?;
    }
    Ok(stamped)
}

/// `verify`: the outcome for the stamp embedded in the invoice file.
pub fn verify(args: &VerifyArgs) -> Result<VerificationOutcome> {
    let Some(window) = args.validity_days.checked_mul(SECONDS_PER_DAY) else {
        bail!("--validity-days {} is too large", args.validity_days);
    };
    let policy = StampPolicy::with_validity(Duration::from_secs(window));

    let public_key = load_public_key(&args.public_key)
        .with_context(|| format!("failed to load public key {}", args.public_key.display()))?;
    let invoice = read_json(&args.invoice)?;

    let Some(stamp) = CryptographicStamp::from_invoice(&invoice) else {
        bail!("{} has no readable cryptographic_stamp", args.invoice.display());
    };
    Ok(verify_stamp_at(
        &invoice,
        &stamp,
        &public_key,
        &policy,
        chrono::Utc::now(),
    ))
}

fn load_public_key_from_private_pem(pem: &str) -> Result<String> {
    let key = SigningKeyPair::from_pem(pem)?;
    Ok(key.public_key().to_pem()?)
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use firs_stamp::crypto::KeyAlgorithm;
    use firs_stamp::FailureReason;
    use serde_json::json;

    fn keygen_into(dir: &Path) {
        keygen(&KeygenArgs {
            out_dir: dir.to_path_buf(),
            algorithm: KeyAlgorithm::Rsa2048,
            common_name: "FIRS Test".to_string(),
            organization: "Test Org".to_string(),
            country: "NG".to_string(),
            validity_days: 30,
        })
        .unwrap();
    }

    fn sign_args(dir: &Path, direct: bool) -> SignArgs {
        SignArgs {
            bundle: dir.join("keys/crypto_keys.json"),
            invoice_number: "INV001".to_string(),
            service_id: "94ND90NR".to_string(),
            issue_date: "2024-06-11".to_string(),
            timestamp: Some(1718064000),
            out_dir: dir.join("out"),
            // QR capacity only suits the single-block ciphertext.
            qr: direct,
            direct,
            sender_id: None,
            sender_name: Some("Acme Ltd".to_string()),
        }
    }

    #[test]
    fn test_keygen_then_sign_writes_every_artefact() {
        let dir = tempfile::tempdir().unwrap();
        keygen_into(&dir.path().join("keys"));

        let summary = sign(&sign_args(dir.path(), false)).unwrap();
        assert_eq!(summary.irn, "INV001-94ND90NR-20240611.1718064000");
        assert_eq!(summary.mode, "hybrid");

        let out = dir.path().join("out");
        for name in [
            "crypto_keys.json",
            "public_key.pem",
            "certificate.bin",
            "payload.json",
            "encrypted.bin",
            "encrypted.b64",
            "metadata.json",
        ] {
            assert!(out.join(name).is_file(), "{name} missing");
        }
        assert!(!out.join("qr.png").exists());

        let payload: Value =
            serde_json::from_str(&fs::read_to_string(out.join("payload.json")).unwrap()).unwrap();
        assert_eq!(payload["irn"], "INV001-94ND90NR-20240611.1718064000");

        let envelope: Value =
            serde_json::from_slice(&fs::read(out.join("encrypted.bin")).unwrap()).unwrap();
        assert_eq!(envelope["header"]["sender_info"]["id"], "94ND90NR");
        assert_eq!(envelope["header"]["sender_info"]["name"], "Acme Ltd");

        let b64 = fs::read_to_string(out.join("encrypted.b64")).unwrap();
        assert_eq!(BASE64.decode(b64).unwrap(), fs::read(out.join("encrypted.bin")).unwrap());

        let metadata: Value =
            serde_json::from_str(&fs::read_to_string(out.join("metadata.json")).unwrap()).unwrap();
        assert_eq!(metadata["unix_timestamp"], 1718064000);
        assert_eq!(metadata["envelope"]["envelope_id"], envelope["header"]["envelope_id"]);
    }

    #[test]
    fn test_direct_mode_is_a_single_rsa_block() {
        let dir = tempfile::tempdir().unwrap();
        keygen_into(&dir.path().join("keys"));

        // The generated bundle's certificate is a full PEM, far too large for
        // a single RSA-OAEP block.
        let err = sign(&sign_args(dir.path(), true)).unwrap_err();
        assert!(format!("{err:#}").contains("exceeds the RSA-OAEP limit"));

        // A short authority certificate token fits.
        let raw: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("keys/crypto_keys.json")).unwrap(),
        )
        .unwrap();
        let small = json!({"public_key": raw["public_key"], "certificate": BASE64.encode("cert-123")});
        fs::write(dir.path().join("keys/crypto_keys.json"), small.to_string()).unwrap();

        let summary = sign(&sign_args(dir.path(), true)).unwrap();
        assert_eq!(summary.mode, "direct");
        assert_eq!(fs::read(dir.path().join("out/encrypted.bin")).unwrap().len(), 256);
        assert!(summary.files.iter().any(|f| f == "qr.png"));
        assert!(dir.path().join("out/qr.png").is_file());
    }

    #[test]
    fn test_bundle_without_certificate_fails() {
        let dir = tempfile::tempdir().unwrap();
        keygen_into(&dir.path().join("keys"));
        let path = dir.path().join("keys/crypto_keys.json");
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        fs::write(&path, json!({"public_key": raw["public_key"]}).to_string()).unwrap();

        let err = sign(&sign_args(dir.path(), false)).unwrap_err();
        let line = format!("{err:#}");
        assert!(line.contains("certificate"), "{line}");
        assert!(!line.contains('\n'));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_bad_service_id_fails_before_reading_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = sign_args(dir.path(), false);
        args.service_id = "SHORT".to_string();
        let err = sign(&args).unwrap_err();
        assert!(format!("{err:#}").contains("service id"));
    }

    #[test]
    fn test_stamp_and_verify_files() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys");
        keygen_into(&keys);

        let invoice_path = dir.path().join("invoice.json");
        fs::write(
            &invoice_path,
            json!({
                "invoice_number": "INV001",
                "issue_date": "2024-06-11",
                "supplier_tin": "12345678-0001",
                "total_amount": "250000.00",
                "currency": "NGN",
                "service_id": "94ND90NR",
            })
            .to_string(),
        )
        .unwrap();

        let stamped_path = dir.path().join("stamped.json");
        stamp(&StampArgs {
            key: keys.join("signing_key.pem"),
            invoice: invoice_path,
            out: Some(stamped_path.clone()),
            csid_version: firs_stamp::csid::CsidVersion::V2,
            signature_algorithm: None,
        })
        .unwrap();

        let verify_args = VerifyArgs {
            public_key: keys.join("signing_public_key.pem"),
            invoice: stamped_path.clone(),
            validity_days: 365,
        };
        assert_eq!(verify(&verify_args).unwrap(), VerificationOutcome::valid());

        let mut stamped: Value =
            serde_json::from_str(&fs::read_to_string(&stamped_path).unwrap()).unwrap();
        stamped["total_amount"] = json!("1.00");
        fs::write(&stamped_path, stamped.to_string()).unwrap();
        assert_eq!(
            verify(&verify_args).unwrap(),
            VerificationOutcome::invalid(FailureReason::Tampered)
        );
    }

    #[test]
    fn test_oversized_validity_window_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify(&VerifyArgs {
            public_key: dir.path().join("signing_public_key.pem"),
            invoice: dir.path().join("stamped.json"),
            validity_days: u64::MAX / 1000,
        })
        .unwrap_err();
        assert!(err.to_string().contains("too large"), "{err:#}");
    }

    #[test]
    fn test_irn_commands() {
        let irn_str = irn_action(&IrnAction::Generate {
            invoice_number: "INV001".to_string(),
            service_id: "94ND90NR".to_string(),
            date: Some("2024-06-11".to_string()),
            timestamp: None,
        })
        .unwrap();
        assert_eq!(irn_str, "INV001-94ND90NR-20240611");

        let parsed: Value = serde_json::from_str(
            &irn_action(&IrnAction::Validate {
                irn: "INV001-94ND90NR-20240611.1718064000".to_string(),
            })
            .unwrap(),
        )
        .unwrap();
        assert_eq!(parsed["date"], "20240611");
        assert_eq!(parsed["unix_timestamp"], 1718064000);

        assert!(irn_action(&IrnAction::Validate {
            irn: "INV001_94ND90NR_20240611".to_string()
        })
        .is_err());
    }
}
