//! In-memory storage backend.
//!
//! Ordered maps, so history and listing come back sorted without extra work.
//! Data is lost when the store is dropped.

use std::collections::BTreeMap;

use crate::certificate::Certificate;
use crate::error::{LedgerError, Result};
use crate::ownership::{CurrentOwnership, OwnershipRecord};
use crate::types::{CertificateId, ItemId, Sequence};

use super::{CertificateStore, OwnershipStore};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    ownership_history: BTreeMap<(ItemId, Sequence), OwnershipRecord>,
    current_ownership: BTreeMap<ItemId, CurrentOwnership>,
    certificates: BTreeMap<CertificateId, Certificate>,
    item_certificates: BTreeMap<ItemId, CertificateId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OwnershipStore for MemoryStore {
    fn current_ownership(&self, item_id: ItemId) -> Result<Option<CurrentOwnership>> {
        Ok(self.current_ownership.get(&item_id).cloned())
    }

    fn ownership_record(&self, item_id: ItemId, sequence: Sequence) -> Result<Option<OwnershipRecord>> {
        Ok(self.ownership_history.get(&(item_id, sequence)).cloned())
    }

    fn ownership_history(&self, item_id: ItemId) -> Result<Vec<OwnershipRecord>> {
        Ok(self
            .ownership_history
            .range((item_id, Sequence::MIN)..=(item_id, Sequence::MAX))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn items(&self) -> Result<Vec<ItemId>> {
        Ok(self.current_ownership.keys().copied().collect())
    }

    fn append_ownership(&mut self, record: &OwnershipRecord) -> Result<()> {
        let key = (record.item_id, record.sequence);
        if self.ownership_history.contains_key(&key) {
            return Err(LedgerError::Store(format!(
                "ownership record ({}, {}) already stored",
                record.item_id, record.sequence
            )));
        }
        self.ownership_history.insert(key, record.clone());
        self.current_ownership.insert(
            record.item_id,
            CurrentOwnership {
                owner: record.owner.clone(),
                sequence: record.sequence,
            },
        );
        Ok(())
    }
}

impl CertificateStore for MemoryStore {
    fn last_certificate_id(&self) -> Result<CertificateId> {
        Ok(self
            .certificates
            .keys()
            .next_back()
            .copied()
            .unwrap_or(CertificateId(0)))
    }

    fn certificate(&self, certificate_id: CertificateId) -> Result<Option<Certificate>> {
        Ok(self.certificates.get(&certificate_id).cloned())
    }

    fn item_certificate(&self, item_id: ItemId) -> Result<Option<CertificateId>> {
        Ok(self.item_certificates.get(&item_id).copied())
    }

    fn certificates_for_item(&self, item_id: ItemId) -> Result<Vec<Certificate>> {
        Ok(self
            .certificates
            .values()
            .filter(|c| c.item_id == item_id)
            .cloned()
            .collect())
    }

    fn all_certificates(&self) -> Result<Vec<Certificate>> {
        Ok(self.certificates.values().cloned().collect())
    }

    fn insert_certificate(&mut self, cert: &Certificate) -> Result<()> {
        if self.certificates.contains_key(&cert.certificate_id) {
            return Err(LedgerError::Store(format!(
                "certificate {} already stored",
                cert.certificate_id
            )));
        }
        self.certificates.insert(cert.certificate_id, cert.clone());
        self.item_certificates.insert(cert.item_id, cert.certificate_id);
        Ok(())
    }

    fn mark_revoked(&mut self, certificate_id: CertificateId) -> Result<bool> {
        match self.certificates.get_mut(&certificate_id) {
            Some(cert) => {
                cert.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
