//! Chain-of-custody ledger.
//!
//! Each item's custody is an append-only sequence of [`OwnershipRecord`]s,
//! numbered from 1 without gaps, plus a pointer to the latest one.  Only the
//! current owner may extend the chain.
//!
//! Chain invariants re-checked by [`OwnershipLedger::verify_chain`]:
//! - sequences are exactly `1..=N` and the current pointer sits at `N`;
//! - record 1 is of type `"initial"` and self-sourced;
//! - every later record was acquired from the previous record's owner.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{require_caller, CallContext};
use crate::error::{LedgerError, OptionExt as _, Result};
use crate::store::OwnershipStore;
use crate::types::{ensure_storable, BlockHeight, ItemId, Principal, Sequence, MAX_STORABLE};

/// Transaction type of the first record in every chain.
pub const INITIAL_TRANSACTION_TYPE: &str = "initial";

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One immutable link in an item's chain of custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub item_id: ItemId,
    pub sequence: Sequence,
    pub owner: Principal,
    pub acquired_from: Principal,
    pub transaction_time: BlockHeight,
    /// Caller-supplied, uninterpreted ("sale", "gift", "inheritance", ...).
    pub transaction_type: String,
    pub transaction_notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentOwnership {
    pub owner: Principal,
    pub sequence: Sequence,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OwnershipLedger<S> {
    store: S,
}

impl<S: OwnershipStore> OwnershipLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Start the chain for `item_id` with the caller as origin owner.
    ///
    /// The first caller to claim an item wins; a second claim for the same
    /// item fails with `AlreadyExists` and changes nothing.
    pub fn record_initial_ownership(
        &mut self,
        item_id: ItemId,
        transaction_notes: &str,
        ctx: &CallContext<'_>,
    ) -> Result<Sequence> {
        ensure_storable(item_id.0, "item id")?;
        ensure_storable(ctx.now, "transaction time")?;
        if let Some(cur) = self.store.current_ownership(item_id)? {
            return Err(LedgerError::AlreadyExists(format!(
                "ownership chain for item {item_id} (owner {}, sequence {})",
                cur.owner, cur.sequence
            )));
        }

        let record = OwnershipRecord {
            item_id,
            sequence: 1,
            owner: ctx.caller.clone(),
            acquired_from: ctx.caller.clone(),
            transaction_time: ctx.now,
            transaction_type: INITIAL_TRANSACTION_TYPE.to_string(),
            transaction_notes: transaction_notes.to_string(),
        };
        self.store.append_ownership(&record)?;

        info!(item_id = %item_id, owner = %ctx.caller, height = ctx.now, "initial ownership recorded");
        Ok(record.sequence)
    }

    /// Hand `item_id` from the caller (who must be its current owner) to
    /// `new_owner`.  Returns the sequence of the new record.
    pub fn transfer_ownership(
        &mut self,
        item_id: ItemId,
        new_owner: &Principal,
        transaction_type: &str,
        transaction_notes: &str,
        ctx: &CallContext<'_>,
    ) -> Result<Sequence> {
        let current = self
            .store
            .current_ownership(item_id)?
            .required_found(&format!("current ownership of item {item_id}"))?;
        require_caller(ctx, &current.owner, "transfer an item it does not own")?;
        ensure_storable(ctx.now, "transaction time")?;

        let sequence = current.sequence.checked_add(1).filter(|s| *s <= MAX_STORABLE).ok_or_else(|| {
            LedgerError::Store(format!("sequence overflow for item {item_id}"))
        })?;
        let record = OwnershipRecord {
            item_id,
            sequence,
            owner: new_owner.clone(),
            acquired_from: ctx.caller.clone(),
            transaction_time: ctx.now,
            transaction_type: transaction_type.to_string(),
            transaction_notes: transaction_notes.to_string(),
        };
        self.store.append_ownership(&record)?;

        info!(
            item_id = %item_id,
            sequence,
            from = %ctx.caller,
            to = %new_owner,
            transaction_type,
            "ownership transferred"
        );
        Ok(sequence)
    }

    pub fn get_current_owner(&self, item_id: ItemId) -> Result<Option<CurrentOwnership>> {
        self.store.current_ownership(item_id)
    }

    pub fn get_ownership_record(&self, item_id: ItemId, sequence: Sequence) -> Result<Option<OwnershipRecord>> {
        self.store.ownership_record(item_id, sequence)
    }

    /// The full chain of custody, oldest first.  Empty if the item is unknown.
    pub fn ownership_history(&self, item_id: ItemId) -> Result<Vec<OwnershipRecord>> {
        self.store.ownership_history(item_id)
    }

    /// Re-check the stored chain for `item_id` against the chain invariants.
    pub fn verify_chain(&self, item_id: ItemId) -> Result<()> {
        let history = self.store.ownership_history(item_id)?;
        let current = self.store.current_ownership(item_id)?;

        let current = match (history.is_empty(), current) {
            (true, None) => return Ok(()),
            (true, Some(_)) => {
                return Err(chain_err(item_id, "current pointer set but no records stored"));
            }
            (false, None) => return Err(chain_err(item_id, "records stored but no current pointer")),
            (false, Some(c)) => c,
        };

        let mut prev: Option<&OwnershipRecord> = None;
        for (idx, rec) in history.iter().enumerate() {
            let expected = idx as Sequence + 1;
            if rec.sequence != expected {
                return Err(chain_err(
                    item_id,
                    &format!("sequence gap: expected {expected}, found {}", rec.sequence),
                ));
            }
            match prev {
                None => {
                    if rec.transaction_type != INITIAL_TRANSACTION_TYPE {
                        return Err(chain_err(item_id, "first record is not of type \"initial\""));
                    }
                    if rec.acquired_from != rec.owner {
                        return Err(chain_err(item_id, "first record is not self-sourced"));
                    }
                }
                Some(p) => {
                    if rec.acquired_from != p.owner {
                        return Err(chain_err(
                            item_id,
                            &format!(
                                "sequence {} acquired from {} but previous owner is {}",
                                rec.sequence, rec.acquired_from, p.owner
                            ),
                        ));
                    }
                }
            }
            prev = Some(rec);
        }

        // `history` is non-empty here.
        if let Some(last) = prev {
            if current.sequence != last.sequence || current.owner != last.owner {
                return Err(chain_err(
                    item_id,
                    &format!(
                        "current pointer ({}, {}) does not match last record ({}, {})",
                        current.owner, current.sequence, last.owner, last.sequence
                    ),
                ));
            }
        }
        Ok(())
    }

    /// [`verify_chain`](Self::verify_chain) for every item in the store.
    /// Returns the number of chains checked.
    pub fn verify_all(&self) -> Result<usize> {
        let items = self.store.items()?;
        for item_id in &items {
            self.verify_chain(*item_id)?;
        }
        Ok(items.len())
    }
}

fn chain_err(item_id: ItemId, msg: &str) -> LedgerError {
    LedgerError::Store(format!("chain of item {item_id} broken: {msg}"))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
