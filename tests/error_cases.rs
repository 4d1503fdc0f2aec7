use anyhow::Result;
use tempfile::tempdir;

use provledger_core::{
    CallContext, CertificateHash, CertificatePolicy, ErrorCode, ItemId, LedgerError, MemoryStore,
    OwnershipLedger, Principal, SqliteStore,
};

fn policy() -> CertificatePolicy {
    CertificatePolicy::new(Principal::new("ST1ADMIN").unwrap())
}

#[test]
fn corrupt_db_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("corrupt.db");
    std::fs::write(&db_path, b"not-a-sqlite-db")?;

    let err = SqliteStore::open_existing(&db_path).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    Ok(())
}

#[test]
fn unsupported_schema_version_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("ledger.db");
    drop(SqliteStore::create_new(&db_path, &policy())?);

    let conn = rusqlite::Connection::open(&db_path)?;
    conn.execute("UPDATE meta SET v='99' WHERE k='schema_version'", [])?;
    drop(conn);

    let err = SqliteStore::open_existing(&db_path).unwrap_err();
    assert!(err.to_string().contains("unsupported schema_version 99"));
    Ok(())
}

#[test]
fn repeat_initial_ownership_rejected() -> Result<()> {
    let mut ledger = OwnershipLedger::new(MemoryStore::new());
    let a = Principal::new("ST1A")?;
    let b = Principal::new("ST1B")?;

    ledger.record_initial_ownership(ItemId(1), "first claim", &CallContext::at(&a, 1))?;
    ledger.transfer_ownership(ItemId(1), &b, "sale", "", &CallContext::at(&a, 2))?;

    for claimant in [&a, &b] {
        let err = ledger
            .record_initial_ownership(ItemId(1), "second claim", &CallContext::at(claimant, 3))
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists(_)));
        assert_eq!(err.code().as_u16(), 409);
    }

    let history = ledger.ownership_history(ItemId(1))?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].transaction_notes, "first claim");
    assert_eq!(ledger.get_current_owner(ItemId(1))?.expect("owner").owner, b);
    Ok(())
}

#[test]
fn rejected_calls_leave_sqlite_state_unchanged() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("ledger.db");
    let store = SqliteStore::create_new(&db_path, &policy())?;
    let a = Principal::new("ST1A")?;
    let b = Principal::new("ST1B")?;

    let mut ledger = OwnershipLedger::new(store);
    ledger.record_initial_ownership(ItemId(1), "", &CallContext::at(&a, 1))?;
    assert!(ledger
        .transfer_ownership(ItemId(1), &a, "sale", "", &CallContext::at(&b, 2))
        .is_err());
    assert!(ledger.record_initial_ownership(ItemId(1), "", &CallContext::at(&b, 2)).is_err());
    drop(ledger);

    let reopened = OwnershipLedger::new(SqliteStore::open_existing(&db_path)?);
    assert_eq!(reopened.ownership_history(ItemId(1))?.len(), 1);
    let current = reopened.get_current_owner(ItemId(1))?.expect("owner");
    assert_eq!((current.owner, current.sequence), (a, 1));
    Ok(())
}

#[test]
fn malformed_certificate_hash_rejected() {
    let err = "0102".parse::<CertificateHash>().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
    assert!(err.to_string().contains("32 bytes"));
}

#[test]
fn stored_principal_corruption_surfaces_as_database_error() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("ledger.db");
    let mut ledger = OwnershipLedger::new(SqliteStore::create_new(&db_path, &policy())?);
    let a = Principal::new("ST1A")?;
    ledger.record_initial_ownership(ItemId(1), "", &CallContext::at(&a, 1))?;
    drop(ledger);

    let conn = rusqlite::Connection::open(&db_path)?;
    conn.execute("UPDATE current_ownership SET owner='not a principal' WHERE item_id=1", [])?;
    drop(conn);

    let ledger = OwnershipLedger::new(SqliteStore::open_existing(&db_path)?);
    let err = ledger.get_current_owner(ItemId(1)).unwrap_err();
    assert!(matches!(err, LedgerError::Database(_)));
    Ok(())
}
