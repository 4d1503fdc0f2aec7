//! Persistent SQLite backend.
//!
//! Four logical tables (ownership history, current owner, certificates,
//! item -> certificate pointer) plus a `meta` key/value table holding the
//! deployment constants and the last observed clock height.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension as _, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::certificate::{Certificate, CertificatePolicy};
use crate::error::{LedgerError, Result, ResultExt as _};
use crate::ownership::{CurrentOwnership, OwnershipRecord};
use crate::types::{ensure_storable, BlockHeight, CertificateHash, CertificateId, ItemId, Principal, Sequence};
use crate::util;

use super::{CertificateStore, OwnershipStore};

pub const STORE_SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=FULL;
    PRAGMA foreign_keys=ON;

    CREATE TABLE IF NOT EXISTS meta(
      k TEXT PRIMARY KEY,
      v TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS ownership_records(
      item_id INTEGER NOT NULL,
      sequence INTEGER NOT NULL CHECK (sequence >= 1),
      owner TEXT NOT NULL,
      acquired_from TEXT NOT NULL,
      transaction_time INTEGER NOT NULL,
      transaction_type TEXT NOT NULL,
      transaction_notes TEXT NOT NULL,
      PRIMARY KEY (item_id, sequence)
    );

    CREATE TABLE IF NOT EXISTS current_ownership(
      item_id INTEGER PRIMARY KEY,
      owner TEXT NOT NULL,
      sequence INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS certificates(
      certificate_id INTEGER PRIMARY KEY,
      item_id INTEGER NOT NULL,
      issuer TEXT NOT NULL,
      issue_time INTEGER NOT NULL,
      expiration_time INTEGER NOT NULL,
      revoked INTEGER NOT NULL DEFAULT 0,
      certificate_hash BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_certificates_item ON certificates(item_id);

    CREATE TABLE IF NOT EXISTS item_certificates(
      item_id INTEGER PRIMARY KEY,
      certificate_id INTEGER NOT NULL REFERENCES certificates(certificate_id)
    );
"#;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub store_id: Uuid,
    pub created_at_utc: String,
    pub schema_version: i64,
    pub administrator: Principal,
    pub validity_period: u64,
}

impl StoreMeta {
    /// The certificate policy fixed when this store was created.
    pub fn policy(&self) -> CertificatePolicy {
        CertificatePolicy {
            administrator: self.administrator.clone(),
            validity_period: self.validity_period,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    conn: Connection,
    meta: StoreMeta,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Create a new database at `db_path`, fixing `policy` as the deployment
    /// constants.  Refuses to touch an existing file.
    pub fn create_new(db_path: &Path, policy: &CertificatePolicy) -> Result<Self> {
        if db_path.exists() {
            return Err(LedgerError::AlreadyExists(format!(
                "database {} already exists",
                db_path.display()
            )));
        }
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .ctx_store(&format!("create db parent dir {}", parent.display()))?;
        }
        let conn = Connection::open(db_path).ctx_store(&format!("open db {}", db_path.display()))?;
        let store = Self::initialize(conn, policy)?;
        info!(store_id = %store.meta.store_id, path = %db_path.display(), "store created");
        Ok(store)
    }

    /// A fresh database that lives only as long as the returned value.
    pub fn create_in_memory(policy: &CertificatePolicy) -> Result<Self> {
        let conn = Connection::open_in_memory().ctx_store("open in-memory db")?;
        Self::initialize(conn, policy)
    }

    fn initialize(conn: Connection, policy: &CertificatePolicy) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL).ctx_store("create tables")?;

        let meta = StoreMeta {
            store_id: Uuid::new_v4(),
            created_at_utc: util::now_utc_rfc3339(),
            schema_version: STORE_SCHEMA_VERSION,
            administrator: policy.administrator.clone(),
            validity_period: policy.validity_period,
        };
        let rows: [(&str, String); 6] = [
            ("store_id", meta.store_id.to_string()),
            ("created_at_utc", meta.created_at_utc.clone()),
            ("schema_version", meta.schema_version.to_string()),
            ("administrator", meta.administrator.to_string()),
            ("validity_period", meta.validity_period.to_string()),
            ("last_height", "0".to_string()),
        ];
        for (k, v) in rows {
            conn.execute("INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)", params![k, v])
                .ctx_store(&format!("write meta {k}"))?;
        }

        Ok(Self { conn, meta })
    }

    pub fn open_existing(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(LedgerError::NotFound(format!(
                "database {} (run `init` first)",
                db_path.display()
            )));
        }
        let conn = Connection::open(db_path).ctx_store(&format!("open db {}", db_path.display()))?;

        let schema_version: i64 = read_meta(&conn, "schema_version")?
            .parse()
            .ctx_store("parse schema_version")?;
        if schema_version != STORE_SCHEMA_VERSION {
            return Err(LedgerError::Store(format!(
                "unsupported schema_version {schema_version} (expected {STORE_SCHEMA_VERSION})"
            )));
        }

        let meta = StoreMeta {
            store_id: Uuid::parse_str(&read_meta(&conn, "store_id")?)
                .ctx_store("parse store_id uuid")?,
            created_at_utc: read_meta(&conn, "created_at_utc")?,
            schema_version,
            administrator: Principal::new(read_meta(&conn, "administrator")?)?,
            validity_period: read_meta(&conn, "validity_period")?
                .parse()
                .ctx_store("parse validity_period")?,
        };
        debug!(store_id = %meta.store_id, "store opened");
        Ok(Self { conn, meta })
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Carry over the identity of the store a backup was taken from.
    pub(crate) fn restore_identity(&mut self, from: &StoreMeta) -> Result<()> {
        for (k, v) in [
            ("store_id", from.store_id.to_string()),
            ("created_at_utc", from.created_at_utc.clone()),
        ] {
            self.conn
                .execute("INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)", params![k, v])
                .ctx_store(&format!("write meta {k}"))?;
        }
        self.meta.store_id = from.store_id;
        self.meta.created_at_utc = from.created_at_utc.clone();
        Ok(())
    }

    pub fn last_height(&self) -> Result<BlockHeight> {
        read_meta(&self.conn, "last_height")?
            .parse()
            .ctx_store("parse last_height")
    }

    /// The height a read-only query should evaluate at: `requested` if given
    /// and not behind the last observed height, else the last height.
    /// Nothing is written.
    pub fn height_at(&self, requested: Option<BlockHeight>) -> Result<BlockHeight> {
        resolve_height(self.last_height()?, requested)
    }

    /// Record that the host clock reads `requested` (or, if `None`, re-use the
    /// last observed height).  A height lower than one already observed is
    /// rejected so persisted time never runs backwards.
    pub fn observe_height(&mut self, requested: Option<BlockHeight>) -> Result<BlockHeight> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .ctx_store("begin tx")?;
        let last: BlockHeight = read_meta(&tx, "last_height")?
            .parse()
            .ctx_store("parse last_height")?;
        let height = resolve_height(last, requested)?;
        tx.execute(
            "UPDATE meta SET v=?1 WHERE k='last_height'",
            params![height.to_string()],
        )
        .ctx_store("write last_height")?;
        tx.commit().ctx_store("commit tx")?;
        Ok(height)
    }

    /// Move the persisted clock forward by `blocks`.
    pub fn advance(&mut self, blocks: u64) -> Result<BlockHeight> {
        let last = self.last_height()?;
        let next = last.checked_add(blocks).ok_or_else(|| {
            LedgerError::Validation(format!("advancing {blocks} blocks from {last} overflows"))
        })?;
        self.observe_height(Some(next))
    }
}

// ---------------------------------------------------------------------------
// OwnershipStore
// ---------------------------------------------------------------------------

const OWNERSHIP_COLUMNS: &str = "item_id, sequence, owner, acquired_from, transaction_time, \
                                 transaction_type, transaction_notes";

impl OwnershipStore for SqliteStore {
    fn current_ownership(&self, item_id: ItemId) -> Result<Option<CurrentOwnership>> {
        let Some(item) = lookup_key(item_id.0) else {
            return Ok(None);
        };
        let cur = self
            .conn
            .query_row(
                "SELECT owner, sequence FROM current_ownership WHERE item_id=?1",
                params![item],
                |row| {
                    Ok(CurrentOwnership {
                        owner: principal_col(row, 0)?,
                        sequence: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(cur)
    }

    fn ownership_record(&self, item_id: ItemId, sequence: Sequence) -> Result<Option<OwnershipRecord>> {
        let (Some(item), Some(sequence)) = (lookup_key(item_id.0), lookup_key(sequence)) else {
            return Ok(None);
        };
        let rec = self
            .conn
            .query_row(
                &format!(
                    "SELECT {OWNERSHIP_COLUMNS} FROM ownership_records WHERE item_id=?1 AND sequence=?2"
                ),
                params![item, sequence],
                ownership_row,
            )
            .optional()?;
        Ok(rec)
    }

    fn ownership_history(&self, item_id: ItemId) -> Result<Vec<OwnershipRecord>> {
        let Some(item) = lookup_key(item_id.0) else {
            return Ok(Vec::new());
        };
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {OWNERSHIP_COLUMNS} FROM ownership_records WHERE item_id=?1 ORDER BY sequence ASC"
            ))
            .ctx_store("prepare select ownership history")?;
        let rows = stmt.query_map(params![item], ownership_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn items(&self) -> Result<Vec<ItemId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT item_id FROM current_ownership ORDER BY item_id ASC")
            .ctx_store("prepare select items")?;
        let rows = stmt.query_map([], |row| row.get::<_, u64>(0).map(ItemId))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn append_ownership(&mut self, record: &OwnershipRecord) -> Result<()> {
        let item = ensure_storable(record.item_id.0, "item id")?;
        let sequence = ensure_storable(record.sequence, "sequence")?;
        let time = ensure_storable(record.transaction_time, "transaction time")?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .ctx_store("begin tx")?;
        tx.execute(
            &format!(
                "INSERT INTO ownership_records({OWNERSHIP_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7)"
            ),
            params![
                item,
                sequence,
                record.owner.as_str(),
                record.acquired_from.as_str(),
                time,
                record.transaction_type,
                record.transaction_notes,
            ],
        )
        .ctx_store("insert ownership record")?;
        tx.execute(
            "INSERT OR REPLACE INTO current_ownership(item_id, owner, sequence) VALUES (?1,?2,?3)",
            params![item, record.owner.as_str(), sequence],
        )
        .ctx_store("update current ownership")?;
        tx.commit().ctx_store("commit tx")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CertificateStore
// ---------------------------------------------------------------------------

const CERTIFICATE_COLUMNS: &str = "certificate_id, item_id, issuer, issue_time, expiration_time, \
                                   revoked, certificate_hash";

impl CertificateStore for SqliteStore {
    fn last_certificate_id(&self) -> Result<CertificateId> {
        self.conn
            .query_row("SELECT COALESCE(MAX(certificate_id),0) FROM certificates", [], |row| {
                row.get::<_, u64>(0).map(CertificateId)
            })
            .ctx_store("last certificate id")
    }

    fn certificate(&self, certificate_id: CertificateId) -> Result<Option<Certificate>> {
        let Some(id) = lookup_key(certificate_id.0) else {
            return Ok(None);
        };
        let cert = self
            .conn
            .query_row(
                &format!("SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE certificate_id=?1"),
                params![id],
                certificate_row,
            )
            .optional()?;
        Ok(cert)
    }

    fn item_certificate(&self, item_id: ItemId) -> Result<Option<CertificateId>> {
        let Some(item) = lookup_key(item_id.0) else {
            return Ok(None);
        };
        let id = self
            .conn
            .query_row(
                "SELECT certificate_id FROM item_certificates WHERE item_id=?1",
                params![item],
                |row| row.get::<_, u64>(0).map(CertificateId),
            )
            .optional()?;
        Ok(id)
    }

    fn certificates_for_item(&self, item_id: ItemId) -> Result<Vec<Certificate>> {
        let Some(item) = lookup_key(item_id.0) else {
            return Ok(Vec::new());
        };
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE item_id=?1 ORDER BY certificate_id ASC"
            ))
            .ctx_store("prepare select item certificates")?;
        let rows = stmt.query_map(params![item], certificate_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn all_certificates(&self) -> Result<Vec<Certificate>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CERTIFICATE_COLUMNS} FROM certificates ORDER BY certificate_id ASC"
            ))
            .ctx_store("prepare select certificates")?;
        let rows = stmt.query_map([], certificate_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn insert_certificate(&mut self, cert: &Certificate) -> Result<()> {
        let id = ensure_storable(cert.certificate_id.0, "certificate id")?;
        let item = ensure_storable(cert.item_id.0, "item id")?;
        let issued = ensure_storable(cert.issue_time, "issue time")?;
        let expires = ensure_storable(cert.expiration_time, "expiration time")?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .ctx_store("begin tx")?;
        tx.execute(
            &format!("INSERT INTO certificates({CERTIFICATE_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7)"),
            params![
                id,
                item,
                cert.issuer.as_str(),
                issued,
                expires,
                cert.revoked,
                cert.certificate_hash.as_bytes().to_vec(),
            ],
        )
        .ctx_store("insert certificate")?;
        tx.execute(
            "INSERT OR REPLACE INTO item_certificates(item_id, certificate_id) VALUES (?1,?2)",
            params![item, id],
        )
        .ctx_store("update item certificate pointer")?;
        tx.commit().ctx_store("commit tx")?;
        Ok(())
    }

    fn mark_revoked(&mut self, certificate_id: CertificateId) -> Result<bool> {
        let Some(id) = lookup_key(certificate_id.0) else {
            return Ok(false);
        };
        let changed = self
            .conn
            .execute(
                "UPDATE certificates SET revoked=1 WHERE certificate_id=?1",
                params![id],
            )
            .ctx_store("revoke certificate")?;
        Ok(changed > 0)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Keys past the signed range cannot have been written, so a lookup on one
/// is simply absent.
fn lookup_key(value: u64) -> Option<i64> {
    i64::try_from(value).ok()
}

fn resolve_height(last: BlockHeight, requested: Option<BlockHeight>) -> Result<BlockHeight> {
    match requested {
        None => Ok(last),
        Some(h) if h < last => Err(LedgerError::Validation(format!(
            "clock height {h} is behind last observed height {last}"
        ))),
        Some(h) => ensure_storable(h, "clock height"),
    }
}

fn read_meta(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row("SELECT v FROM meta WHERE k=?1", params![key], |row| row.get(0))
        .ctx_store(&format!("read meta {key}"))
}

fn principal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Principal> {
    let s: String = row.get(idx)?;
    Principal::new(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn hash_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<CertificateHash> {
    let bytes: Vec<u8> = row.get(idx)?;
    CertificateHash::from_slice(&bytes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

fn ownership_row(row: &Row<'_>) -> rusqlite::Result<OwnershipRecord> {
    Ok(OwnershipRecord {
        item_id: ItemId(row.get(0)?),
        sequence: row.get(1)?,
        owner: principal_col(row, 2)?,
        acquired_from: principal_col(row, 3)?,
        transaction_time: row.get(4)?,
        transaction_type: row.get(5)?,
        transaction_notes: row.get(6)?,
    })
}

fn certificate_row(row: &Row<'_>) -> rusqlite::Result<Certificate> {
    Ok(Certificate {
        certificate_id: CertificateId(row.get(0)?),
        item_id: ItemId(row.get(1)?),
        issuer: principal_col(row, 2)?,
        issue_time: row.get(3)?,
        expiration_time: row.get(4)?,
        revoked: row.get(5)?,
        certificate_hash: hash_col(row, 6)?,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn policy() -> CertificatePolicy {
        CertificatePolicy {
            administrator: Principal::new("ST1ADMIN").unwrap(),
            validity_period: 52_560,
        }
    }

    #[test]
    fn create_and_open_store() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        let store = SqliteStore::create_new(&db, &policy()).unwrap();
        let meta = store.meta().clone();
        drop(store);

        let store2 = SqliteStore::open_existing(&db).unwrap();
        assert_eq!(store2.meta(), &meta);
        assert_eq!(store2.meta().policy(), policy());
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        SqliteStore::create_new(&db, &policy()).unwrap();
        let err = SqliteStore::create_new(&db, &policy()).unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists(_)));
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = SqliteStore::open_existing(&dir.path().join("missing.db")).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn observed_height_never_decreases() {
        let mut store = SqliteStore::create_in_memory(&policy()).unwrap();
        assert_eq!(store.observe_height(None).unwrap(), 0);
        assert_eq!(store.observe_height(Some(100)).unwrap(), 100);
        assert_eq!(store.observe_height(None).unwrap(), 100);
        assert!(store.observe_height(Some(99)).is_err());
        assert_eq!(store.advance(5).unwrap(), 105);
        assert_eq!(store.last_height().unwrap(), 105);
    }

    #[test]
    fn query_height_is_not_persisted() {
        let mut store = SqliteStore::create_in_memory(&policy()).unwrap();
        store.observe_height(Some(100)).unwrap();
        assert_eq!(store.height_at(None).unwrap(), 100);
        assert_eq!(store.height_at(Some(5_000)).unwrap(), 5_000);
        assert_eq!(store.last_height().unwrap(), 100);
        assert!(store.height_at(Some(99)).is_err());
    }

    #[test]
    fn out_of_range_heights_and_keys() {
        let mut store = SqliteStore::create_in_memory(&policy()).unwrap();
        let err = store.observe_height(Some(u64::MAX)).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(store.last_height().unwrap(), 0);

        assert!(store.current_ownership(ItemId(u64::MAX)).unwrap().is_none());
        assert!(store.ownership_history(ItemId(u64::MAX)).unwrap().is_empty());
        assert!(store.certificate(CertificateId(u64::MAX)).unwrap().is_none());
        assert!(!store.mark_revoked(CertificateId(u64::MAX)).unwrap());

        let err = store
            .append_ownership(&OwnershipRecord {
                item_id: ItemId(u64::MAX),
                sequence: 1,
                owner: Principal::new("ST1A").unwrap(),
                acquired_from: Principal::new("ST1A").unwrap(),
                transaction_time: 0,
                transaction_type: "initial".into(),
                transaction_notes: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(store.items().unwrap().is_empty());
    }

    #[test]
    fn revoke_is_counted_even_when_already_revoked() {
        let mut store = SqliteStore::create_in_memory(&policy()).unwrap();
        store
            .insert_certificate(&Certificate {
                certificate_id: CertificateId(1),
                item_id: ItemId(1),
                issuer: Principal::new("ST1ADMIN").unwrap(),
                issue_time: 100,
                expiration_time: 52_660,
                revoked: false,
                certificate_hash: CertificateHash::new([1; 32]),
            })
            .unwrap();
        assert!(store.mark_revoked(CertificateId(1)).unwrap());
        assert!(store.mark_revoked(CertificateId(1)).unwrap());
        assert!(!store.mark_revoked(CertificateId(2)).unwrap());
    }
}
