// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # FIRS Stamp: Core Library
//!
//! Tamper-evident invoice stamps and sealed submissions for the Federal
//! Inland Revenue Service e-invoicing regime.
//!
//! Three pieces do the real work, and they are the only places in an
//! e-invoicing platform with hard correctness obligations:
//!
//! 1. **IRNs**: the canonical `INV-SERVICEID-YYYYMMDD` reference binding an
//!    invoice to its issuer and date.
//! 2. **CSIDs**: signatures over a canonical form of the invoice's core
//!    fields. Change any bound field and verification fails.
//! 3. **Envelopes**: RSA-OAEP + AES-256-GCM sealing of `{irn, certificate}`
//!    payloads for the authority, plus QR rendering.
//!
//! ## Architecture
//!
//! - **irn**: IRN generation, parsing and validation.
//! - **invoice**: extraction and validation of the fields a stamp binds.
//! - **crypto**: keys, signatures, certificates, AEAD and hashing.
//! - **csid**: CSID envelopes (V1/V2), generation and verification.
//! - **stamping**: the `stamp_invoice` / `verify_stamp` orchestrator.
//! - **batch**: parallel stamping with per-worker metrics.
//! - **envelope**: crypto bundles and the FIRS payload encryptor.
//! - **qr**: PNG QR rendering.
//! - **config**: constants and policies.
//!
//! Two trust boundaries stay separate throughout: the issuer's private key
//! sits behind [`crypto::Signer`], the authority's public key behind
//! [`envelope::Encryptor`].
//!
//! ## Design Philosophy
//!
//! 1. An invalid stamp is an answer, not an error. Verification returns a
//!    [`csid::VerificationOutcome`] and never fails.
//! 2. Input is validated before any key is touched.
//! 3. No hidden state. Keys are read-only once loaded and batch metrics are
//!    explicit values.
//! 4. Key material never reaches a log line.

pub mod batch;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod csid;
pub mod envelope;
pub mod invoice;
pub mod irn;
pub mod qr;
pub mod stamping;

pub use csid::{FailureReason, VerificationOutcome};
pub use envelope::{CryptoBundle, Encryptor, FirsEncryptor};
pub use invoice::{InvoiceCoreFields, ValidationError};
pub use irn::{FormatError, Irn};
pub use stamping::{CryptographicStamp, StampError, StampingService};
