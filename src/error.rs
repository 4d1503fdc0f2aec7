//! Structured error types for the provenance ledger.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! domain-specific [`LedgerError`].  Callers that need a stable numeric tag
//! (the CLI, or a host embedding the ledger) convert via [`ErrorCode`].

use thiserror::Error;

use crate::types::Principal;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the provenance ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The caller is not the current owner (transfers) or the administrator
    /// (certificate operations).
    #[error("unauthorized: {caller} may not {action}")]
    Unauthorized { caller: Principal, action: &'static str },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error("report: {0}")]
    Report(String),

    /// Direct database errors (auto-converted via `?` in the SQLite store).
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }

    /// True for the failures a caller can provoke through the public call
    /// surface, as opposed to storage or environment faults.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::NotFound(_) | Self::AlreadyExists(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Stable error codes
// ---------------------------------------------------------------------------

/// Numeric tags reported to callers outside the library.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Validation = 400,
    Unauthorized = 403,
    NotFound = 404,
    AlreadyExists = 409,
    Internal = 500,
}

impl From<&LedgerError> for ErrorCode {
    fn from(e: &LedgerError) -> Self {
        match e {
            LedgerError::Unauthorized { .. } => Self::Unauthorized,
            LedgerError::NotFound(_) => Self::NotFound,
            LedgerError::AlreadyExists(_) => Self::AlreadyExists,
            LedgerError::Validation(_) => Self::Validation,
            LedgerError::Store(_)
            | LedgerError::Config(_)
            | LedgerError::Report(_)
            | LedgerError::Database(_) => Self::Internal,
        }
    }
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds domain-specific context to any `Result<T, E>`.
///
/// ```ignore
/// std::fs::read(path).ctx_store("read backup file")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_store(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_report(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_store(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Store(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Config(format!("{msg}: {e}")))
    }
    fn ctx_report(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Report(format!("{msg}: {e}")))
    }
}

/// Same as [`ResultExt`] but for `Option<T>` (converts `None` into an error).
pub trait OptionExt<T> {
    fn required_config(self, msg: &str) -> Result<T>;
    fn required_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required_config(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| LedgerError::Config(msg.to_string()))
    }
    fn required_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| LedgerError::NotFound(msg.to_string()))
    }
}
