//! # CLI Interface
//!
//! Command-line structure for `firs-signer`, built with `clap` derive.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use firs_stamp::crypto::{KeyAlgorithm, SignatureAlgorithm};
use firs_stamp::csid::CsidVersion;

/// FIRS e-invoice signing utility.
///
/// Generates IRNs, stamps and verifies invoices, and seals IRN + certificate
/// payloads for submission to the authority.
#[derive(Parser, Debug)]
#[command(
    name = "firs-signer",
    about = "FIRS e-invoice signing utility",
    version,
    propagate_version = true
)]
pub struct FirsSignerCli {
    /// Log output format: "pretty" or "json".
    #[arg(long, global = true, env = "FIRS_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log filter when RUST_LOG is not set.
    #[arg(long, global = true, env = "FIRS_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seal an IRN + certificate payload for the authority.
    Sign(SignArgs),
    /// Generate or validate an IRN.
    Irn(IrnArgs),
    /// Provision development keys, a self-signed certificate and a bundle.
    Keygen(KeygenArgs),
    /// Attach a cryptographic stamp to an invoice JSON file.
    Stamp(StampArgs),
    /// Verify the stamp embedded in an invoice JSON file.
    Verify(VerifyArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `sign` subcommand.
#[derive(Args, Debug, Clone)]
pub struct SignArgs {
    /// Crypto bundle JSON with base64 `public_key` and `certificate`.
    #[arg(long, env = "FIRS_CRYPTO_BUNDLE")]
    pub bundle: PathBuf,

    #[arg(long)]
    pub invoice_number: String,

    /// Authority-assigned 8-character service id.
    #[arg(long, env = "FIRS_SERVICE_ID")]
    pub service_id: String,

    /// Issue date, YYYY-MM-DD or YYYYMMDD.
    #[arg(long)]
    pub issue_date: String,

    /// Explicit UNIX timestamp for the IRN suffix. Defaults to now.
    #[arg(long)]
    pub timestamp: Option<i64>,

    /// Directory the output files are written to. Created if missing.
    #[arg(long, short = 'o')]
    pub out_dir: PathBuf,

    /// Also render the base64 ciphertext as qr.png.
    #[arg(long)]
    pub qr: bool,

    /// Seal with RSA-OAEP alone instead of the hybrid envelope.
    #[arg(long)]
    pub direct: bool,

    /// Sender id for the envelope header. Defaults to the service id.
    #[arg(long, env = "FIRS_SENDER_ID")]
    pub sender_id: Option<String>,

    #[arg(long, env = "FIRS_SENDER_NAME")]
    pub sender_name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct IrnArgs {
    #[command(subcommand)]
    pub action: IrnAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IrnAction {
    /// Build an IRN and print it.
    Generate {
        #[arg(long)]
        invoice_number: String,
        #[arg(long, env = "FIRS_SERVICE_ID")]
        service_id: String,
        /// YYYY-MM-DD or YYYYMMDD. Defaults to today (UTC).
        #[arg(long)]
        date: Option<String>,
        /// Append a UNIX timestamp suffix (submission form).
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// Parse an IRN and print its components as JSON.
    Validate {
        irn: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct KeygenArgs {
    #[arg(long, short = 'o')]
    pub out_dir: PathBuf,

    /// Issuer signing key type: rsa2048, rsa3072, rsa4096 or ed25519.
    #[arg(long, default_value = "rsa2048", value_parser = parse_key_algorithm)]
    pub algorithm: KeyAlgorithm,

    #[arg(long, default_value = "FIRS Development")]
    pub common_name: String,

    #[arg(long, default_value = "Development Org")]
    pub organization: String,

    /// Two-letter country code.
    #[arg(long, default_value = "NG")]
    pub country: String,

    #[arg(long, default_value_t = 365)]
    pub validity_days: u32,
}

#[derive(Args, Debug, Clone)]
pub struct StampArgs {
    /// Issuer private key (PEM).
    #[arg(long, env = "FIRS_SIGNING_KEY")]
    pub key: PathBuf,

    /// Invoice JSON file.
    #[arg(long)]
    pub invoice: PathBuf,

    /// Where to write the stamped invoice. Defaults to stdout.
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,

    /// CSID version: v1 or v2.
    #[arg(long, default_value = "v2", value_parser = parse_csid_version)]
    pub csid_version: CsidVersion,

    /// Signature algorithm. Defaults to the key's natural scheme.
    #[arg(long, value_parser = parse_signature_algorithm)]
    pub signature_algorithm: Option<SignatureAlgorithm>,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Issuer public key (PEM).
    #[arg(long, env = "FIRS_VERIFYING_KEY")]
    pub public_key: PathBuf,

    /// Stamped invoice JSON file.
    #[arg(long)]
    pub invoice: PathBuf,

    /// Stamp validity window in days.
    #[arg(long, env = "FIRS_STAMP_VALIDITY_DAYS", default_value_t = 365)]
    pub validity_days: u64,
}

fn parse_key_algorithm(s: &str) -> Result<KeyAlgorithm, String> {
    s.parse().map_err(|e: firs_stamp::crypto::KeyMaterialError| e.to_string())
}

fn parse_signature_algorithm(s: &str) -> Result<SignatureAlgorithm, String> {
    s.parse().map_err(|e: firs_stamp::crypto::KeyMaterialError| e.to_string())
}

fn parse_csid_version(s: &str) -> Result<CsidVersion, String> {
    match s.to_ascii_lowercase().as_str() {
        "v1" | "1" => Ok(CsidVersion::V1),
        "v2" | "2" => Ok(CsidVersion::V2),
        other => Err(format!("unknown CSID version `{other}` (expected v1 or v2)")),
    }
}
