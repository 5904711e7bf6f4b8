//! # Stamping Configuration & Constants
//!
//! Every magic number in the stamping core lives here. If a length, a
//! version string or a validity window is hardcoded somewhere else, it
//! belongs in this file instead.
//!
//! Two kinds of things live here:
//!
//! - **Constants** that define wire formats (IRN shape, AES sizes, algorithm
//!   suite identifiers). Changing these breaks every stamp and envelope
//!   already issued, so they are not configurable at runtime.
//! - **Policies** ([`StampPolicy`], [`EncryptorConfig`]) that deployments are
//!   expected to tune. They carry explicit defaults and deserialize from
//!   JSON so an outer service can feed them from its own config layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Version of the FIRS envelope protocol written into every header.
pub const PROTOCOL_VERSION: &str = "1.0";

/// The crate version, surfaced by the CLI's `version` subcommand.
pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// IRN Format
// ---------------------------------------------------------------------------

/// Separator between the three IRN components.
pub const IRN_SEPARATOR: char = '-';

/// Separator between an IRN and its optional UNIX timestamp suffix.
pub const IRN_TIMESTAMP_SEPARATOR: char = '.';

/// Service ids are assigned by the authority and are always 8 characters.
pub const SERVICE_ID_LENGTH: usize = 8;

/// Compact date format used inside the IRN.
pub const IRN_DATE_FORMAT: &str = "%Y%m%d";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// Nonce length for the FIRS envelope. The authority expects a 128-bit IV,
/// not the 96-bit GCM default.
pub const AES_NONCE_LENGTH: usize = 16;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Smallest RSA modulus we accept, in bits.
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// SHA-256 digest length; RSA-OAEP overhead is computed from it.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Algorithm suite identifier written into envelope headers.
pub const ENVELOPE_ALGORITHM: &str = "RSA-OAEP-SHA256+AES-256-GCM";

/// Algorithm identifier for payloads sealed with RSA-OAEP alone.
pub const DIRECT_ALGORITHM: &str = "RSA-OAEP-SHA256";

// ---------------------------------------------------------------------------
// Stamps
// ---------------------------------------------------------------------------

/// Key under which the stamp is embedded in invoice JSON.
pub const STAMP_FIELD: &str = "cryptographic_stamp";

/// How long a stamp stays valid after it was issued. One year covers the
/// normal lifetime of an invoice dispute; deployments with a different
/// retention rule override it through [`StampPolicy`].
pub const DEFAULT_STAMP_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Tolerated clock drift between the issuing host and the verifier.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// QR Rendering
// ---------------------------------------------------------------------------

/// Minimum rendered QR image edge, in pixels.
pub const QR_MIN_DIMENSION: u32 = 256;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Verification policy for cryptographic stamps.
///
/// A stamp whose timestamp is older than `validity_window` (or further in
/// the future than `max_clock_skew`) verifies as expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampPolicy {
    /// Maximum age of a stamp.
    #[serde(with = "duration_secs")]
    pub validity_window: Duration,
    /// Allowed drift for stamps that appear to come from the future.
    #[serde(with = "duration_secs")]
    pub max_clock_skew: Duration,
}

impl Default for StampPolicy {
    fn default() -> Self {
        Self {
            validity_window: DEFAULT_STAMP_VALIDITY,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
        }
    }
}

impl StampPolicy {
    /// Policy with a custom validity window and the default skew.
    pub fn with_validity(validity_window: Duration) -> Self {
        Self {
            validity_window,
            ..Self::default()
        }
    }
}

/// Identity and protocol settings for the FIRS payload encryptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptorConfig {
    /// Sender identifier placed in `sender_info` (usually the service id).
    pub sender_id: String,
    /// Optional human-readable sender name.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Protocol version written into headers.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl EncryptorConfig {
    pub fn new(sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_name: None,
            protocol_version: default_protocol_version(),
        }
    }
}

/// Serde helper: durations travel as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
