//! Invoice core fields.
//!
//! Only a handful of invoice fields are bound into a stamp. They are pulled
//! out of the caller's JSON here, validated, normalized, and from then on
//! travel as an [`InvoiceCoreFields`] value. Everything else in the invoice
//! (line items, addresses, notes) is outside the signature.
//!
//! Normalization is deliberately small so that a verifier re-reading the
//! same invoice reproduces the same canonical bytes:
//!
//! - `issue_date` accepts `YYYY-MM-DD` or `YYYYMMDD` and is bound as
//!   `YYYY-MM-DD`
//! - `total_amount` accepts a JSON number or a decimal string and is bound
//!   as its textual form
//! - string fields are trimmed and `currency` is upper-cased
//! - `irn` is derived from the other fields when absent, and must agree
//!   with them when present
//!
//! Edits that only change surrounding whitespace, the case of `currency`,
//! the date spelling (`2024-06-11` vs `20240611`) or an amount's JSON type
//! (`250000` vs `"250000"`) are not changes: the stamp still verifies.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::canonical::canonical_json;
use crate::config::SERVICE_ID_LENGTH;
use crate::crypto::sha256_fields;
use crate::irn::{self, FormatError, Irn};

/// Invoice fields every stamp binds, in the order they are checked.
pub const CORE_FIELDS: [&str; 6] = [
    "invoice_number",
    "issue_date",
    "supplier_tin",
    "total_amount",
    "currency",
    "service_id",
];

/// Problems with the invoice data handed to the stamping core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invoice data is empty")]
    EmptyInvoice,

    #[error("invoice data must be a JSON object")]
    NotAnObject,

    #[error("invoice is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invoice field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// The validated, normalized subset of an invoice that signatures cover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCoreFields {
    pub invoice_number: String,
    pub issue_date: String,
    pub supplier_tin: String,
    pub total_amount: String,
    pub currency: String,
    pub service_id: String,
    pub irn: String,
}

impl InvoiceCoreFields {
    /// Extract and validate the core fields from invoice JSON.
    ///
    /// Fields are checked in [`CORE_FIELDS`] order and the first problem is
    /// reported. Unknown fields are ignored.
    pub fn from_value(invoice: &Value) -> Result<Self, ValidationError> {
        let map = match invoice {
            Value::Null => return Err(ValidationError::EmptyInvoice),
            Value::Object(map) if map.is_empty() => return Err(ValidationError::EmptyInvoice),
            Value::Object(map) => map,
            _ => return Err(ValidationError::NotAnObject),
        };

        let invoice_number = required_string(map, "invoice_number")?;
        let issue_date = required_string(map, "issue_date")?;
        let date = irn::parse_date(&issue_date)
            .map_err(|e| ValidationError::invalid("issue_date", e.to_string()))?;
        let supplier_tin = required_string(map, "supplier_tin")?;
        let total_amount = required_amount(map)?;
        let currency = required_string(map, "currency")?;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid(
                "currency",
                format!("`{currency}` is not a three-letter ISO 4217 code"),
            ));
        }
        let service_id = required_string(map, "service_id")?;
        if service_id.len() != SERVICE_ID_LENGTH {
            return Err(ValidationError::invalid(
                "service_id",
                format!("must be exactly {SERVICE_ID_LENGTH} characters"),
            ));
        }

        let irn = bind_irn(map.get("irn"), &invoice_number, &service_id, date)?;

        Ok(Self {
            invoice_number,
            issue_date: date.format("%Y-%m-%d").to_string(),
            supplier_tin,
            total_amount,
            currency: currency.to_ascii_uppercase(),
            service_id,
            irn: irn.to_string(),
        })
    }

    /// The bound fields as canonical JSON, the first part of every signing
    /// input.
    pub fn canonical_json(&self) -> String {
        // Every field is a plain string, so building the value cannot fail.
        let mut map = Map::new();
        map.insert("currency".into(), Value::String(self.currency.clone()));
        map.insert("invoice_number".into(), Value::String(self.invoice_number.clone()));
        map.insert("irn".into(), Value::String(self.irn.clone()));
        map.insert("issue_date".into(), Value::String(self.issue_date.clone()));
        map.insert("service_id".into(), Value::String(self.service_id.clone()));
        map.insert("supplier_tin".into(), Value::String(self.supplier_tin.clone()));
        map.insert("total_amount".into(), Value::String(self.total_amount.clone()));
        canonical_json(&Value::Object(map))
    }

    /// Content reference carried by V2 CSIDs: SHA-256 over invoice number,
    /// issue date and supplier TIN.
    pub fn invoice_ref(&self) -> String {
        sha256_fields(&[&self.invoice_number, &self.issue_date, &self.supplier_tin])
    }
}

fn required_string(map: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(ValidationError::invalid(
            field,
            format!("expected a string, found {}", json_kind(other)),
        )),
    }
}

fn required_amount(map: &Map<String, Value>) -> Result<String, ValidationError> {
    const FIELD: &str = "total_amount";
    let raw = match map.get(FIELD) {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(FIELD)),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(ValidationError::MissingField(FIELD))
        }
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => {
            return Err(ValidationError::invalid(
                FIELD,
                format!("expected a number or decimal string, found {}", json_kind(other)),
            ))
        }
    };

    if !is_decimal(&raw) {
        return Err(ValidationError::invalid(FIELD, format!("`{raw}` is not a decimal amount")));
    }
    Ok(raw)
}

/// `-?digits(.digits)?`; exponents are rejected so one amount has one
/// spelling.
fn is_decimal(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let digits = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    digits(int) && frac.map_or(true, digits)
}

fn bind_irn(
    raw: Option<&Value>,
    invoice_number: &str,
    service_id: &str,
    date: NaiveDate,
) -> Result<Irn, ValidationError> {
    let from_format = |e: FormatError| {
        let field = match e.component() {
            "invoice_number" => "invoice_number",
            "service_id" => "service_id",
            "date" => "issue_date",
            _ => "irn",
        };
        ValidationError::invalid(field, e.to_string())
    };

    let derived = irn::generate_for_date(invoice_number, service_id, date).map_err(from_format)?;

    let given = match raw {
        None | Some(Value::Null) => return Ok(derived),
        Some(Value::String(s)) => irn::parse(s.trim())
            .map_err(|e| ValidationError::invalid("irn", e.to_string()))?,
        Some(other) => {
            return Err(ValidationError::invalid(
                "irn",
                format!("expected a string, found {}", json_kind(other)),
            ))
        }
    };

    if given.without_timestamp() != derived {
        return Err(ValidationError::invalid(
            "irn",
            format!("`{given}` does not match the invoice (expected `{derived}`)"),
        ));
    }
    Ok(given)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "invoice_number": "INV001",
            "issue_date": "2024-06-11",
            "supplier_tin": "12345678-0001",
            "total_amount": 150000.5,
            "currency": "ngn",
            "service_id": "94ND90NR",
            "line_items": [{"description": "Cement", "qty": 10}],
        })
    }

    #[test]
    fn test_extracts_and_normalizes() {
        let fields = InvoiceCoreFields::from_value(&sample()).unwrap();
        assert_eq!(fields.issue_date, "2024-06-11");
        assert_eq!(fields.total_amount, "150000.5");
        assert_eq!(fields.currency, "NGN");
        assert_eq!(fields.irn, "INV001-94ND90NR-20240611");
    }

    #[test]
    fn test_compact_date_binds_the_same() {
        let mut invoice = sample();
        invoice["issue_date"] = json!("20240611");
        let a = InvoiceCoreFields::from_value(&invoice).unwrap();
        let b = InvoiceCoreFields::from_value(&sample()).unwrap();
        assert_eq!(a.canonical_json(), b.canonical_json());
    }

    #[test]
    fn test_canonical_json_is_sorted_and_ignores_extras() {
        let fields = InvoiceCoreFields::from_value(&sample()).unwrap();
        let canonical = fields.canonical_json();
        assert!(canonical.starts_with(r#"{"currency":"NGN","invoice_number":"INV001","irn":"#));
        assert!(!canonical.contains("line_items"));
    }

    #[test]
    fn test_empty_and_non_object_inputs() {
        assert_eq!(
            InvoiceCoreFields::from_value(&Value::Null),
            Err(ValidationError::EmptyInvoice)
        );
        assert_eq!(
            InvoiceCoreFields::from_value(&json!({})),
            Err(ValidationError::EmptyInvoice)
        );
        assert_eq!(
            InvoiceCoreFields::from_value(&json!(["INV001"])),
            Err(ValidationError::NotAnObject)
        );
    }

    #[test]
    fn test_each_missing_field_is_named() {
        for field in CORE_FIELDS {
            let mut invoice = sample();
            invoice.as_object_mut().unwrap().remove(field);
            assert_eq!(
                InvoiceCoreFields::from_value(&invoice),
                Err(ValidationError::MissingField(field)),
                "removing {field}"
            );
        }
    }

    #[test]
    fn test_blank_string_counts_as_missing() {
        let mut invoice = sample();
        invoice["supplier_tin"] = json!("   ");
        assert_eq!(
            InvoiceCoreFields::from_value(&invoice),
            Err(ValidationError::MissingField("supplier_tin"))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            ("issue_date", json!("2024-02-30")),
            ("total_amount", json!("12,000")),
            ("total_amount", json!(true)),
            ("currency", json!("NAIRA")),
            ("service_id", json!("SHORT")),
            ("invoice_number", json!("INV/001")),
        ];
        for (field, value) in cases {
            let mut invoice = sample();
            invoice[field] = value.clone();
            match InvoiceCoreFields::from_value(&invoice) {
                Err(ValidationError::InvalidField { field: f, .. }) => assert_eq!(f, field),
                other => panic!("{field}={value}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_existing_irn_must_agree() {
        let mut invoice = sample();
        invoice["irn"] = json!("INV001-94ND90NR-20240611");
        assert!(InvoiceCoreFields::from_value(&invoice).is_ok());

        invoice["irn"] = json!("INV001-94ND90NR-20240611.1718064000");
        let fields = InvoiceCoreFields::from_value(&invoice).unwrap();
        assert_eq!(fields.irn, "INV001-94ND90NR-20240611.1718064000");

        invoice["irn"] = json!("INV002-94ND90NR-20240611");
        assert!(matches!(
            InvoiceCoreFields::from_value(&invoice),
            Err(ValidationError::InvalidField { field: "irn", .. })
        ));
    }

    #[test]
    fn test_normalizing_edits_bind_the_same_bytes() {
        let base = InvoiceCoreFields::from_value(&sample()).unwrap();
        let mut edited = sample();
        edited["invoice_number"] = json!(" INV001 ");
        edited["currency"] = json!("NGN");
        edited["issue_date"] = json!("20240611");
        edited["total_amount"] = json!("150000.5");
        let edited = InvoiceCoreFields::from_value(&edited).unwrap();
        assert_eq!(edited.canonical_json(), base.canonical_json());
    }

    #[test]
    fn test_zero_padded_irn_timestamp_rejected() {
        let mut invoice = sample();
        invoice["irn"] = json!("INV001-94ND90NR-20240611.0001718064000");
        assert!(matches!(
            InvoiceCoreFields::from_value(&invoice),
            Err(ValidationError::InvalidField { field: "irn", .. })
        ));
    }

    #[test]
    fn test_invoice_ref_covers_three_fields() {
        let a = InvoiceCoreFields::from_value(&sample()).unwrap();
        let mut invoice = sample();
        invoice["total_amount"] = json!(1);
        let b = InvoiceCoreFields::from_value(&invoice).unwrap();
        // Amount is not part of the reference.
        assert_eq!(a.invoice_ref(), b.invoice_ref());

        invoice["supplier_tin"] = json!("99999999-0001");
        let c = InvoiceCoreFields::from_value(&invoice).unwrap();
        assert_ne!(a.invoice_ref(), c.invoice_ref());
    }

    #[test]
    fn test_decimal_shape() {
        assert!(is_decimal("100"));
        assert!(is_decimal("-0.50"));
        assert!(!is_decimal("1e5"));
        assert!(!is_decimal("1."));
        assert!(!is_decimal(".5"));
    }
}
