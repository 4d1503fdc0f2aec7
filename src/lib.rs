//! Provenance and authenticity ledger for uniquely identified items.
//!
//! This crate provides:
//! - An append-only chain-of-custody log per item with single-owner transfers
//! - Administrator-issued authenticity certificates with revocation and
//!   time-bounded validity evaluated against an injected clock
//! - In-memory and SQLite storage backends behind one pair of store traits
//! - Per-item provenance reports and JSON backup/restore
//!
//! The CLI wrapper lives in `src/main.rs`.

#![forbid(unsafe_code)]

pub mod error;
pub mod config;

pub mod auth;
pub mod backup;
pub mod certificate;
pub mod clock;
pub mod ownership;
pub mod report;
pub mod store;
pub mod types;
pub mod util;

pub use auth::CallContext;
pub use certificate::{Certificate, CertificatePolicy, CertificateRegistry, CertificateStatus};
pub use clock::{Clock, FixedClock, ManualClock};
pub use error::{ErrorCode, LedgerError, Result};
pub use ownership::{CurrentOwnership, OwnershipLedger, OwnershipRecord};
pub use store::{CertificateStore, MemoryStore, OwnershipStore, SqliteStore};
pub use types::{BlockHeight, CertificateHash, CertificateId, ItemId, Principal, Sequence, MAX_STORABLE};
