//! Identifier and value types shared by the ownership ledger and the
//! certificate registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Logical time unit supplied by the host (e.g. block height).
pub type BlockHeight = u64;

/// 1-based position of an ownership record within an item's chain.
pub type Sequence = u64;

/// Largest id, sequence or height any backend can persist (SQLite integers
/// are signed 64-bit).
pub const MAX_STORABLE: u64 = i64::MAX as u64;

/// Reject `value` with `Validation` if it lies beyond [`MAX_STORABLE`].
pub fn ensure_storable(value: u64, what: &str) -> Result<u64> {
    if value > MAX_STORABLE {
        return Err(LedgerError::Validation(format!(
            "{what} {value} exceeds the storable maximum {MAX_STORABLE}"
        )));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Item / certificate identifiers
// ---------------------------------------------------------------------------

/// Opaque handle issued by the external item registry.  The ledger never
/// creates or validates these; it only uses them as lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique certificate id, allocated from 1 upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(pub u64);

impl CertificateId {
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// Starts with an alphanumeric, then up to 127 more alphanumeric / hyphen /
/// dot / underscore characters.  Covers standard and contract principals.
static PRINCIPAL_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-_.]{0,127}$").expect("static regex")
});

/// Caller identity as supplied by the execution environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !PRINCIPAL_RE.is_match(&s) {
            return Err(LedgerError::Validation(format!(
                "invalid principal '{s}': 1-128 chars, alphanumeric/hyphen/dot/underscore"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Principal {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Principal {
    type Error = LedgerError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<Principal> for String {
    fn from(p: Principal) -> Self {
        p.0
    }
}

// ---------------------------------------------------------------------------
// Certificate hash
// ---------------------------------------------------------------------------

/// Caller-supplied 32-byte digest.  Stored and compared, never computed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CertificateHash([u8; 32]);

impl CertificateHash {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            LedgerError::Validation(format!(
                "certificate hash must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for CertificateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertificateHash({})", self.to_hex())
    }
}

impl fmt::Display for CertificateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for CertificateHash {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| LedgerError::Validation(format!("invalid certificate hash hex: {e}")))?;
        Self::from_slice(&bytes)
    }
}

impl TryFrom<String> for CertificateHash {
    type Error = LedgerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CertificateHash> for String {
    fn from(h: CertificateHash) -> Self {
        h.to_hex()
    }
}
