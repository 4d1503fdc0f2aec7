//! Storage abstraction for the ledger's keyed tables.
//!
//! Each component owns its state through one of two traits, so the same
//! logic runs over the in-memory backend (tests, simulation) and the SQLite
//! backend (the CLI).  Every mutating method writes a complete record set or
//! nothing at all.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreMeta};

use crate::certificate::Certificate;
use crate::error::Result;
use crate::ownership::{CurrentOwnership, OwnershipRecord};
use crate::types::{CertificateId, ItemId, Sequence};

/// Ownership history keyed by `(item, sequence)` plus the current-owner
/// pointer keyed by item.
pub trait OwnershipStore {
    fn current_ownership(&self, item_id: ItemId) -> Result<Option<CurrentOwnership>>;

    fn ownership_record(&self, item_id: ItemId, sequence: Sequence) -> Result<Option<OwnershipRecord>>;

    /// All records for `item_id` in ascending sequence order.
    fn ownership_history(&self, item_id: ItemId) -> Result<Vec<OwnershipRecord>>;

    /// Every item that has at least one ownership record, ascending.
    fn items(&self) -> Result<Vec<ItemId>>;

    /// Store `record` and point the item's current ownership at it.
    /// Fails if a record already exists at that `(item, sequence)`.
    fn append_ownership(&mut self, record: &OwnershipRecord) -> Result<()>;
}

/// Certificates keyed by id plus the item -> latest-certificate pointer.
pub trait CertificateStore {
    /// Highest id allocated so far (`CertificateId(0)` when empty).
    fn last_certificate_id(&self) -> Result<CertificateId>;

    fn certificate(&self, certificate_id: CertificateId) -> Result<Option<Certificate>>;

    fn item_certificate(&self, item_id: ItemId) -> Result<Option<CertificateId>>;

    /// Every certificate issued for `item_id`, superseded ones included, by id.
    fn certificates_for_item(&self, item_id: ItemId) -> Result<Vec<Certificate>>;

    fn all_certificates(&self) -> Result<Vec<Certificate>>;

    /// Store `cert` and overwrite the item's certificate pointer with its id.
    /// Fails if the id is already taken.
    fn insert_certificate(&mut self, cert: &Certificate) -> Result<()>;

    /// Set the revoked flag.  Returns `false` if the id does not exist.
    fn mark_revoked(&mut self, certificate_id: CertificateId) -> Result<bool>;
}
