//! Timestamps, path validation, and build information.

use std::path::Path;

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{LedgerError, Result};

/// Wall-clock time for file metadata only.  Ledger logic uses [`crate::clock`].
pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Reject database paths SQLite cannot open: empty, NUL-bearing, or a directory.
pub fn validate_path(p: &Path, label: &str) -> Result<()> {
    let problem = if p.as_os_str().is_empty() {
        Some("is empty")
    } else if p.to_string_lossy().contains('\0') {
        Some("contains a NUL byte")
    } else if p.is_dir() {
        Some("is a directory")
    } else {
        None
    };
    match problem {
        Some(why) => Err(LedgerError::Validation(format!("{label} path {why}"))),
        None => Ok(()),
    }
}

// Injected by build.rs.

pub const GIT_HASH: &str = env!("PROVLEDGER_GIT_HASH");
pub const BUILD_TS: &str = env!("PROVLEDGER_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("provledger v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_timestamp_shape() {
        let ts = now_utc_rfc3339();
        assert!(ts.contains('T'));
        assert!(OffsetDateTime::parse(&ts, &Rfc3339).is_ok());
    }

    #[test]
    fn path_validation() {
        assert!(validate_path(Path::new("ledger.db"), "db").is_ok());
        assert!(validate_path(Path::new(""), "db").is_err());
        let dir = std::env::temp_dir();
        let err = validate_path(&dir, "db").unwrap_err();
        assert!(err.to_string().contains("directory"));
    }

    #[test]
    fn version_string_non_empty() {
        assert!(version_string().contains("provledger"));
    }
}
