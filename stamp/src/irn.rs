//! # Invoice Reference Numbers
//!
//! The IRN is the canonical identifier the authority uses to bind an invoice
//! to the issuer's service id and issue date:
//!
//! ```text
//! INV001-94ND90NR-20240611            plain form (printed on invoices)
//! INV001-94ND90NR-20240611.1718064000 timestamped form (FIRS submissions)
//! ```
//!
//! The timestamped form is only produced on the submission path. The suffix
//! records when the payload was sealed, so the authority can police replay
//! windows without relying on the invoice's own issue date.
//!
//! Every component is validated on the way in and on the way out: invoice
//! numbers are alphanumeric, service ids are exactly eight alphanumeric
//! characters and dates must exist on the calendar (no 30th of February).

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::{IRN_DATE_FORMAT, IRN_SEPARATOR, IRN_TIMESTAMP_SEPARATOR, SERVICE_ID_LENGTH};

/// Errors raised while building or parsing an IRN.
///
/// `Shape` means the string is not laid out like an IRN at all; the other
/// variants name the component whose value is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("malformed IRN `{irn}`: {reason}")]
    Shape { irn: String, reason: String },

    #[error("invalid invoice number `{0}`: must be non-empty and alphanumeric")]
    InvalidInvoiceNumber(String),

    #[error("invalid service id `{0}`: must be exactly {SERVICE_ID_LENGTH} alphanumeric characters")]
    InvalidServiceId(String),

    #[error("invalid date `{0}`: expected a calendar date as YYYYMMDD or YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid timestamp `{0}`: expected a positive UNIX timestamp")]
    InvalidTimestamp(String),
}

impl FormatError {
    /// Name of the offending component, `"shape"` for layout errors.
    pub fn component(&self) -> &'static str {
        match self {
            FormatError::Shape { .. } => "shape",
            FormatError::InvalidInvoiceNumber(_) => "invoice_number",
            FormatError::InvalidServiceId(_) => "service_id",
            FormatError::InvalidDate(_) => "date",
            FormatError::InvalidTimestamp(_) => "timestamp",
        }
    }
}

// ---------------------------------------------------------------------------
// Irn
// ---------------------------------------------------------------------------

/// A validated invoice reference number.
///
/// Construction goes through [`generate_for_date`], [`parse`] or `FromStr`,
/// so an `Irn` value is always well-formed.
///
/// # Examples
///
/// ```
/// use firs_stamp::irn::Irn;
///
/// let irn: Irn = "INV001-94ND90NR-20240611".parse().unwrap();
/// assert_eq!(irn.service_id(), "94ND90NR");
/// assert_eq!(irn.date_compact(), "20240611");
/// assert_eq!(irn.to_string(), "INV001-94ND90NR-20240611");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Irn {
    invoice_number: String,
    service_id: String,
    date: NaiveDate,
    unix_timestamp: Option<i64>,
}

impl Irn {
    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// The date as it appears inside the IRN (`YYYYMMDD`).
    pub fn date_compact(&self) -> String {
        self.date.format(IRN_DATE_FORMAT).to_string()
    }

    /// The submission timestamp suffix, if this is a timestamped IRN.
    pub fn unix_timestamp(&self) -> Option<i64> {
        self.unix_timestamp
    }

    /// The plain form of this IRN, without any timestamp suffix.
    pub fn without_timestamp(&self) -> Irn {
        Irn {
            unix_timestamp: None,
            ..self.clone()
        }
    }

    /// Attach a submission timestamp.
    pub fn with_timestamp(&self, unix_timestamp: i64) -> Result<Irn, FormatError> {
        if unix_timestamp <= 0 {
            return Err(FormatError::InvalidTimestamp(unix_timestamp.to_string()));
        }
        Ok(Irn {
            unix_timestamp: Some(unix_timestamp),
            ..self.clone()
        })
    }

    /// The `(invoice_number, service_id, date)` triple, date as `YYYYMMDD`.
    pub fn components(&self) -> (String, String, String) {
        (
            self.invoice_number.clone(),
            self.service_id.clone(),
            self.date_compact(),
        )
    }
}

impl fmt::Display for Irn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.invoice_number,
            self.service_id,
            self.date_compact(),
            sep = IRN_SEPARATOR,
        )?;
        if let Some(ts) = self.unix_timestamp {
            write!(f, "{}{}", IRN_TIMESTAMP_SEPARATOR, ts)?;
        }
        Ok(())
    }
}

impl FromStr for Irn {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl Serialize for Irn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Irn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Generation & Parsing
// ---------------------------------------------------------------------------

/// Build an IRN string.
///
/// `date` accepts `YYYY-MM-DD` or `YYYYMMDD`; `None` means today (UTC).
/// Components are checked in order and the first bad one is reported.
///
/// ```
/// use firs_stamp::irn::generate;
///
/// let irn = generate("INV001", "94ND90NR", Some("2024-06-11")).unwrap();
/// assert_eq!(irn, "INV001-94ND90NR-20240611");
/// ```
pub fn generate(
    invoice_number: &str,
    service_id: &str,
    date: Option<&str>,
) -> Result<String, FormatError> {
    check_invoice_number(invoice_number)?;
    check_service_id(service_id)?;
    let date = match date {
        Some(raw) => parse_date(raw)?,
        None => Utc::now().date_naive(),
    };
    Ok(generate_for_date(invoice_number, service_id, date)?.to_string())
}

/// Typed variant of [`generate`] for callers that already hold a date.
pub fn generate_for_date(
    invoice_number: &str,
    service_id: &str,
    date: NaiveDate,
) -> Result<Irn, FormatError> {
    check_invoice_number(invoice_number)?;
    check_service_id(service_id)?;
    // The IRN date field is four digits wide; anything else cannot round-trip.
    if !(0..=9999).contains(&date.year()) {
        return Err(FormatError::InvalidDate(date.to_string()));
    }
    Ok(Irn {
        invoice_number: invoice_number.to_string(),
        service_id: service_id.to_string(),
        date,
        unix_timestamp: None,
    })
}

/// Build the timestamped IRN used when sealing a payload for the authority.
///
/// Returns the IRN string together with the timestamp that was used, which
/// is `unix_timestamp` when given and the current time otherwise.
pub fn generate_with_timestamp(
    invoice_number: &str,
    service_id: &str,
    issue_date: &str,
    unix_timestamp: Option<i64>,
) -> Result<(String, i64), FormatError> {
    check_invoice_number(invoice_number)?;
    check_service_id(service_id)?;
    let date = parse_date(issue_date)?;
    let ts = unix_timestamp.unwrap_or_else(|| Utc::now().timestamp());
    let irn = generate_for_date(invoice_number, service_id, date)?.with_timestamp(ts)?;
    tracing::debug!(irn = %irn, "generated timestamped IRN");
    Ok((irn.to_string(), ts))
}

/// Parse an IRN, with or without a timestamp suffix.
pub fn parse(irn: &str) -> Result<Irn, FormatError> {
    let shape = |reason: &str| FormatError::Shape {
        irn: irn.to_string(),
        reason: reason.to_string(),
    };

    if irn.is_empty() {
        return Err(shape("empty string"));
    }

    let (base, suffix) = match irn.split_once(IRN_TIMESTAMP_SEPARATOR) {
        Some((base, ts)) => (base, Some(ts)),
        None => (irn, None),
    };

    let parts: Vec<&str> = base.split(IRN_SEPARATOR).collect();
    if parts.len() != 3 {
        return Err(shape(&format!(
            "expected invoice_number{sep}service_id{sep}YYYYMMDD, found {} component(s)",
            parts.len(),
            sep = IRN_SEPARATOR,
        )));
    }

    check_invoice_number(parts[0])?;
    check_service_id(parts[1])?;
    let date = parse_compact_date(parts[2])?;

    let unix_timestamp = match suffix {
        Some(raw) => Some(parse_timestamp(raw)?),
        None => None,
    };

    Ok(Irn {
        invoice_number: parts[0].to_string(),
        service_id: parts[1].to_string(),
        date,
        unix_timestamp,
    })
}

/// `true` when `irn` parses.
pub fn validate(irn: &str) -> bool {
    parse(irn).is_ok()
}

// ---------------------------------------------------------------------------
// Component checks
// ---------------------------------------------------------------------------

fn is_alphanumeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn check_invoice_number(value: &str) -> Result<(), FormatError> {
    if is_alphanumeric(value) {
        Ok(())
    } else {
        Err(FormatError::InvalidInvoiceNumber(value.to_string()))
    }
}

fn check_service_id(value: &str) -> Result<(), FormatError> {
    if value.len() == SERVICE_ID_LENGTH && is_alphanumeric(value) {
        Ok(())
    } else {
        Err(FormatError::InvalidServiceId(value.to_string()))
    }
}

// Digits only, no leading zero: the suffix must print back exactly as read.
fn parse_timestamp(raw: &str) -> Result<i64, FormatError> {
    let canonical = !raw.starts_with('0') && raw.chars().all(|c| c.is_ascii_digit());
    match raw.parse::<i64>() {
        Ok(ts) if ts > 0 && canonical => Ok(ts),
        _ => Err(FormatError::InvalidTimestamp(raw.to_string())),
    }
}

/// Accepts `YYYY-MM-DD` or `YYYYMMDD`.
pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, FormatError> {
    if raw.len() == 10 && raw.is_ascii() {
        let bytes = raw.as_bytes();
        if bytes[4] == b'-' && bytes[7] == b'-' {
            let compact = format!("{}{}{}", &raw[0..4], &raw[5..7], &raw[8..10]);
            return parse_compact_date(&compact)
                .map_err(|_| FormatError::InvalidDate(raw.to_string()));
        }
    }
    parse_compact_date(raw)
}

fn parse_compact_date(raw: &str) -> Result<NaiveDate, FormatError> {
    let invalid = || FormatError::InvalidDate(raw.to_string());
    if raw.len() != 8 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let year: i32 = raw[0..4].parse().map_err(|_| invalid())?;
    let month: u32 = raw[4..6].parse().map_err(|_| invalid())?;
    let day: u32 = raw[6..8].parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}
