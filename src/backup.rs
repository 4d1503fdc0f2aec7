//! JSON backup and restore of a persisted ledger.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::certificate::Certificate;
use crate::error::{LedgerError, Result, ResultExt as _};
use crate::ownership::{OwnershipLedger, OwnershipRecord};
use crate::store::{CertificateStore, OwnershipStore, SqliteStore, StoreMeta};
use crate::types::{BlockHeight, CertificateId};

pub const BACKUP_FORMAT: &str = "provledger-backup-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBackup {
    pub format: String,
    pub exported_at_utc: String,
    pub meta: StoreMeta,
    pub last_height: BlockHeight,
    pub ownership_records: Vec<OwnershipRecord>,
    pub certificates: Vec<Certificate>,
}

pub fn snapshot(store: &SqliteStore) -> Result<LedgerBackup> {
    let mut ownership_records = Vec::new();
    for item_id in store.items()? {
        ownership_records.extend(store.ownership_history(item_id)?);
    }
    Ok(LedgerBackup {
        format: BACKUP_FORMAT.to_string(),
        exported_at_utc: crate::util::now_utc_rfc3339(),
        meta: store.meta().clone(),
        last_height: store.last_height()?,
        ownership_records,
        certificates: store.all_certificates()?,
    })
}

/// Export every table (plus metadata) to a JSON file.
pub fn export_json(store: &SqliteStore, out_path: &Path) -> Result<()> {
    let backup = snapshot(store)?;
    let json = serde_json::to_vec_pretty(&backup).ctx_store("serialize ledger export")?;
    std::fs::write(out_path, json).ctx_store(&format!("write export {}", out_path.display()))?;
    info!(
        path = %out_path.display(),
        ownership_records = backup.ownership_records.len(),
        certificates = backup.certificates.len(),
        "ledger exported"
    );
    Ok(())
}

/// Restore a JSON backup into a new database at `db_path`.
///
/// Rows are replayed in key order and then re-verified; a backup that fails
/// verification leaves no database behind.
pub fn import_json(json_path: &Path, db_path: &Path) -> Result<SqliteStore> {
    let bytes = std::fs::read(json_path).ctx_store(&format!("read import {}", json_path.display()))?;
    let backup: LedgerBackup = serde_json::from_slice(&bytes).ctx_store("parse ledger backup")?;
    if backup.format != BACKUP_FORMAT {
        return Err(LedgerError::Validation(format!(
            "unsupported backup format '{}' (expected {BACKUP_FORMAT})",
            backup.format
        )));
    }

    let store = SqliteStore::create_new(db_path, &backup.meta.policy())?;
    match replay(store, &backup) {
        Ok(store) => {
            info!(
                store_id = %store.meta().store_id,
                ownership_records = backup.ownership_records.len(),
                certificates = backup.certificates.len(),
                "ledger imported and verified"
            );
            Ok(store)
        }
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(db_path) {
                warn!(path = %db_path.display(), error = %rm, "could not remove rejected import");
            }
            Err(e)
        }
    }
}

fn replay(mut store: SqliteStore, backup: &LedgerBackup) -> Result<SqliteStore> {
    store.restore_identity(&backup.meta)?;
    store.observe_height(Some(backup.last_height))?;

    let mut records = backup.ownership_records.clone();
    records.sort_by_key(|r| (r.item_id, r.sequence));
    for rec in &records {
        store.append_ownership(rec)?;
    }

    let mut certificates = backup.certificates.clone();
    certificates.sort_by_key(|c| c.certificate_id);
    for (idx, cert) in certificates.iter().enumerate() {
        let expected = CertificateId(idx as u64 + 1);
        if cert.certificate_id != expected {
            return Err(LedgerError::Validation(format!(
                "certificate ids not contiguous: expected {expected}, found {}",
                cert.certificate_id
            )));
        }
        if cert.issue_time.checked_add(backup.meta.validity_period) != Some(cert.expiration_time) {
            return Err(LedgerError::Validation(format!(
                "certificate {} expiration does not equal issue time plus validity period",
                cert.certificate_id
            )));
        }
        store.insert_certificate(cert)?;
    }

    let ledger = OwnershipLedger::new(store);
    ledger.verify_all()?;
    Ok(ledger.into_store())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CallContext;
    use crate::certificate::{CertificatePolicy, CertificateRegistry};
    use crate::types::{CertificateHash, ItemId, Principal};
    use tempfile::tempdir;

    #[test]
    fn rejects_unknown_format() {
        let dir = tempdir().unwrap();
        let json = dir.path().join("backup.json");
        std::fs::write(&json, r#"{"format":"other"}"#).unwrap();
        let err = import_json(&json, &dir.path().join("new.db")).unwrap_err();
        assert!(err.to_string().contains("parse ledger backup") || err.to_string().contains("format"));
        assert!(!dir.path().join("new.db").exists());
    }

    #[test]
    fn tampered_backup_leaves_no_database() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("src.db");
        let admin = Principal::new("ST1ADMIN").unwrap();
        let policy = CertificatePolicy::new(admin.clone());
        let store = SqliteStore::create_new(&db, &policy).unwrap();

        let mut registry = CertificateRegistry::new(store, policy);
        registry
            .issue_certificate(ItemId(1), CertificateHash::new([3; 32]), &CallContext::at(&admin, 10))
            .unwrap();
        let store = registry.into_store();

        let mut backup = snapshot(&store).unwrap();
        backup.certificates[0].expiration_time += 1;
        let json = dir.path().join("backup.json");
        std::fs::write(&json, serde_json::to_vec(&backup).unwrap()).unwrap();

        let target = dir.path().join("restored.db");
        let err = import_json(&json, &target).unwrap_err();
        assert!(err.to_string().contains("expiration"));
        assert!(!target.exists());
    }
}
