//! # Certificates
//!
//! Two narrow jobs:
//!
//! - [`validate_certificate`] parses an X.509 certificate (PEM or DER) and
//!   checks that the current time falls inside its validity window. It does
//!   **not** walk a CA chain; trust decisions belong to the external PKI
//!   service.
//! - [`create_self_signed_certificate`] provisions a throwaway RSA
//!   certificate for development and tests. Production certificates come
//!   from the authority's issuance process.

use chrono::{DateTime, Datelike, Days, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, PKCS_RSA_SHA256};
use serde::{Deserialize, Serialize};
use x509_parser::certificate::X509Certificate;

use super::keys::{KeyAlgorithm, KeyMaterialError, SigningKeyPair};

/// Outcome of [`validate_certificate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateReport {
    /// `true` when the certificate parsed and `now` is inside its window.
    pub is_valid: bool,
    pub subject: String,
    pub issuer: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// A generated certificate and the private key that signed it, both PEM.
#[derive(Clone)]
pub struct SelfSignedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

impl std::fmt::Debug for SelfSignedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfSignedCertificate")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Parse a certificate and check its validity window against the clock.
///
/// Unparseable input is an error; an expired or not-yet-valid certificate
/// is a report with `is_valid == false`.
pub fn validate_certificate(data: &[u8]) -> Result<CertificateReport, KeyMaterialError> {
    validate_certificate_at(data, Utc::now())
}

/// [`validate_certificate`] against an explicit point in time.
pub fn validate_certificate_at(
    data: &[u8],
    now: DateTime<Utc>,
) -> Result<CertificateReport, KeyMaterialError> {
    let (subject, issuer, not_before, not_after) = with_parsed(data, |cert| {
        let validity = cert.validity();
        (
            cert.subject().to_string(),
            cert.issuer().to_string(),
            validity.not_before.timestamp(),
            validity.not_after.timestamp(),
        )
    })?;

    let valid_from = timestamp_to_utc(not_before)?;
    let valid_until = timestamp_to_utc(not_after)?;
    let is_valid = valid_from <= now && now <= valid_until;

    if !is_valid {
        tracing::warn!(%subject, %valid_from, %valid_until, "certificate outside its validity window");
    }

    Ok(CertificateReport {
        is_valid,
        subject,
        issuer,
        valid_from,
        valid_until,
    })
}

fn with_parsed<T>(
    data: &[u8],
    f: impl FnOnce(&X509Certificate<'_>) -> T,
) -> Result<T, KeyMaterialError> {
    let invalid = |e: String| KeyMaterialError::InvalidCertificate(e);

    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let trimmed = &data[start..];

    if trimmed.starts_with(b"-----BEGIN") {
        let (_, pem) = x509_parser::pem::parse_x509_pem(trimmed)
            .map_err(|e| invalid(e.to_string()))?;
        let cert = pem.parse_x509().map_err(|e| invalid(e.to_string()))?;
        Ok(f(&cert))
    } else {
        let (_, cert) =
            x509_parser::parse_x509_certificate(data).map_err(|e| invalid(e.to_string()))?;
        Ok(f(&cert))
    }
}

fn timestamp_to_utc(ts: i64) -> Result<DateTime<Utc>, KeyMaterialError> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| {
        KeyMaterialError::InvalidCertificate(format!("validity timestamp {ts} out of range"))
    })
}

/// Provision a self-signed RSA-2048 certificate for development and tests.
///
/// The certificate is valid from the start of today (UTC) for
/// `validity_days` days and is signed with SHA-256/RSA.
pub fn create_self_signed_certificate(
    common_name: &str,
    organization: &str,
    country: &str,
    validity_days: u32,
) -> Result<SelfSignedCertificate, KeyMaterialError> {
    if common_name.trim().is_empty() {
        return Err(KeyMaterialError::InvalidCertificate(
            "common name must not be empty".to_string(),
        ));
    }
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(KeyMaterialError::InvalidCertificate(format!(
            "country `{country}` must be a two-letter ISO 3166 code"
        )));
    }
    if validity_days == 0 {
        return Err(KeyMaterialError::InvalidCertificate(
            "validity must be at least one day".to_string(),
        ));
    }

    let signing_key = SigningKeyPair::generate(KeyAlgorithm::Rsa2048)?;
    let private_key_pem = signing_key.to_pkcs8_pem()?;
    let cert_err = |e: rcgen::Error| KeyMaterialError::InvalidCertificate(e.to_string());
    let key_pair = KeyPair::from_pem_and_sign_algo(&private_key_pem, &PKCS_RSA_SHA256)
        .map_err(cert_err)?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(DnType::OrganizationName, DnValue::Utf8String(organization.to_string()));
    dn.push(DnType::CountryName, DnValue::Utf8String(country.to_ascii_uppercase()));

    let today = Utc::now().date_naive();
    let until = today
        .checked_add_days(Days::new(u64::from(validity_days)))
        .ok_or_else(|| {
            KeyMaterialError::InvalidCertificate(format!("validity of {validity_days} days overflows"))
        })?;

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
    params.not_after = rcgen::date_time_ymd(until.year(), until.month() as u8, until.day() as u8);

    let cert = params.self_signed(&key_pair).map_err(cert_err)?;
    tracing::info!(%common_name, %organization, validity_days, "issued self-signed certificate");

    Ok(SelfSignedCertificate {
        certificate_pem: cert.pem(),
        private_key_pem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn pem_to_der(pem: &str) -> Vec<u8> {
        let body: String = pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .unwrap()
    }

    #[test]
    fn test_self_signed_certificate_validates() {
        let cert = create_self_signed_certificate("Acme Supplies", "Acme Ltd", "NG", 30).unwrap();
        assert!(cert.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(cert.private_key_pem.contains("BEGIN PRIVATE KEY"));

        let report = validate_certificate(cert.certificate_pem.as_bytes()).unwrap();
        assert!(report.is_valid);
        assert!(report.subject.contains("Acme Supplies"));
        assert!(report.subject.contains("Acme Ltd"));
        // Self-signed: issuer and subject are the same name.
        assert_eq!(report.subject, report.issuer);
        assert_eq!(
            (report.valid_until - report.valid_from).num_days(),
            30,
            "window should span exactly the requested days"
        );

        // The returned key is the one that signed the certificate.
        assert!(SigningKeyPair::from_pem(&cert.private_key_pem).is_ok());
    }

    #[test]
    fn test_expiry_window_is_enforced() {
        let cert = create_self_signed_certificate("Acme", "Acme Ltd", "NG", 1).unwrap();
        let later = Utc::now() + chrono::Duration::days(10);
        let report = validate_certificate_at(cert.certificate_pem.as_bytes(), later).unwrap();
        assert!(!report.is_valid);

        let earlier = Utc::now() - chrono::Duration::days(10);
        let report = validate_certificate_at(cert.certificate_pem.as_bytes(), earlier).unwrap();
        assert!(!report.is_valid);
    }

    #[test]
    fn test_der_input_is_accepted() {
        let cert = create_self_signed_certificate("Acme", "Acme Ltd", "NG", 5).unwrap();
        let der = pem_to_der(&cert.certificate_pem);
        let report = validate_certificate(&der).unwrap();
        assert!(report.is_valid);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(
            validate_certificate(b"definitely not a certificate"),
            Err(KeyMaterialError::InvalidCertificate(_))
        ));
        assert!(validate_certificate(
            b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n"
        )
        .is_err());
    }

    #[test]
    fn test_bad_parameters_rejected() {
        assert!(create_self_signed_certificate("", "Org", "NG", 1).is_err());
        assert!(create_self_signed_certificate("CN", "Org", "NGA", 1).is_err());
        assert!(create_self_signed_certificate("CN", "Org", "NG", 0).is_err());
    }
}
