//! Authenticity certificates: issue, revoke, expire.
//!
//! Certificates are issued and revoked only by the administrator fixed at
//! deployment.  Expiry is never written back to the store; validity is
//! recomputed against the host clock on every read.
//!
//! ## Lifecycle
//! 1. `issue_certificate` allocates the next id and points the item at it,
//!    superseding any earlier certificate for that item.
//! 2. `revoke_certificate` sets the revoked flag (idempotent, terminal).
//! 3. Once the clock passes `expiration_time` the certificate reads as
//!    [`CertificateStatus::Expired`].

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{require_caller, CallContext};
use crate::clock::Clock;
use crate::error::{LedgerError, Result};
use crate::store::CertificateStore;
use crate::types::{ensure_storable, BlockHeight, CertificateHash, CertificateId, ItemId, Principal, MAX_STORABLE};

/// Roughly one year of ten-minute blocks.
pub const DEFAULT_VALIDITY_PERIOD: u64 = 52_560;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate_id: CertificateId,
    pub item_id: ItemId,
    pub issuer: Principal,
    pub issue_time: BlockHeight,
    /// Always `issue_time + validity_period`, fixed at issuance.
    pub expiration_time: BlockHeight,
    pub revoked: bool,
    pub certificate_hash: CertificateHash,
}

impl Certificate {
    pub fn status_at(&self, now: BlockHeight) -> CertificateStatus {
        if self.revoked {
            CertificateStatus::Revoked
        } else if now > self.expiration_time {
            CertificateStatus::Expired
        } else {
            CertificateStatus::Valid
        }
    }
}

/// Deployment constants of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePolicy {
    pub administrator: Principal,
    pub validity_period: u64,
}

impl CertificatePolicy {
    pub fn new(administrator: Principal) -> Self {
        Self {
            administrator,
            validity_period: DEFAULT_VALIDITY_PERIOD,
        }
    }
}

/// Read-time classification of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Valid,
    Revoked,
    Expired,
    Missing,
}

impl CertificateStatus {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Revoked => write!(f, "revoked"),
            Self::Expired => write!(f, "expired"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CertificateRegistry<S> {
    store: S,
    policy: CertificatePolicy,
}

impl<S: CertificateStore> CertificateRegistry<S> {
    pub fn new(store: S, policy: CertificatePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CertificatePolicy {
        &self.policy
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Issue a certificate for `item_id`.  No check is made that the item is
    /// registered or already certified; re-issuance supersedes the pointer.
    pub fn issue_certificate(
        &mut self,
        item_id: ItemId,
        certificate_hash: CertificateHash,
        ctx: &CallContext<'_>,
    ) -> Result<CertificateId> {
        require_caller(ctx, &self.policy.administrator, "issue certificates")?;
        ensure_storable(item_id.0, "item id")?;
        let expiration_time = ctx
            .now
            .checked_add(self.policy.validity_period)
            .filter(|t| *t <= MAX_STORABLE)
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "expiration out of range: height {} + validity period {}",
                    ctx.now, self.policy.validity_period
                ))
            })?;

        let certificate_id = self
            .store
            .last_certificate_id()?
            .next()
            .filter(|id| id.0 <= MAX_STORABLE)
            .ok_or_else(|| LedgerError::Store("certificate id space exhausted".into()))?;

        let cert = Certificate {
            certificate_id,
            item_id,
            issuer: ctx.caller.clone(),
            issue_time: ctx.now,
            expiration_time,
            revoked: false,
            certificate_hash,
        };
        self.store.insert_certificate(&cert)?;

        info!(
            certificate_id = %certificate_id,
            item_id = %item_id,
            expiration_time,
            "certificate issued"
        );
        Ok(certificate_id)
    }

    /// Mark a certificate revoked.  Revoking twice succeeds both times.
    pub fn revoke_certificate(&mut self, certificate_id: CertificateId, ctx: &CallContext<'_>) -> Result<bool> {
        if self.store.certificate(certificate_id)?.is_none() {
            return Err(LedgerError::NotFound(format!("certificate {certificate_id}")));
        }
        require_caller(ctx, &self.policy.administrator, "revoke certificates")?;

        if !self.store.mark_revoked(certificate_id)? {
            return Err(LedgerError::NotFound(format!("certificate {certificate_id}")));
        }
        info!(certificate_id = %certificate_id, "certificate revoked");
        Ok(true)
    }

    pub fn get_certificate(&self, certificate_id: CertificateId) -> Result<Option<Certificate>> {
        self.store.certificate(certificate_id)
    }

    /// Id of the most recently issued certificate for `item_id`.
    pub fn get_item_certificate(&self, item_id: ItemId) -> Result<Option<CertificateId>> {
        self.store.item_certificate(item_id)
    }

    pub fn certificates_for_item(&self, item_id: ItemId) -> Result<Vec<Certificate>> {
        self.store.certificates_for_item(item_id)
    }

    pub fn certificate_status(&self, certificate_id: CertificateId, clock: &dyn Clock) -> Result<CertificateStatus> {
        Ok(match self.store.certificate(certificate_id)? {
            Some(cert) => cert.status_at(clock.now()),
            None => CertificateStatus::Missing,
        })
    }

    /// `false` for unknown ids; otherwise not revoked and not past expiry.
    pub fn is_certificate_valid(&self, certificate_id: CertificateId, clock: &dyn Clock) -> Result<bool> {
        Ok(self.certificate_status(certificate_id, clock)?.is_valid())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, ManualClock};
    use crate::store::MemoryStore;

    fn admin() -> Principal {
        Principal::new("ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM").unwrap()
    }

    fn registry() -> CertificateRegistry<MemoryStore> {
        CertificateRegistry::new(MemoryStore::new(), CertificatePolicy::new(admin()))
    }

    #[test]
    fn expiration_is_issue_time_plus_period() {
        let mut reg = registry();
        let admin = admin();
        let id = reg
            .issue_certificate(ItemId(1), CertificateHash::new([1; 32]), &CallContext::at(&admin, 100))
            .unwrap();
        let cert = reg.get_certificate(id).unwrap().unwrap();
        assert_eq!(cert.issue_time, 100);
        assert_eq!(cert.expiration_time, 100 + DEFAULT_VALIDITY_PERIOD);
    }

    #[test]
    fn valid_through_expiration_height_inclusive() {
        let mut reg = registry();
        let admin = admin();
        let clock = ManualClock::new(100);
        let id = reg
            .issue_certificate(ItemId(1), CertificateHash::new([1; 32]), &CallContext::new(&admin, &clock))
            .unwrap();

        clock.advance(DEFAULT_VALIDITY_PERIOD);
        assert!(reg.is_certificate_valid(id, &clock).unwrap());
        clock.advance(1);
        assert!(!reg.is_certificate_valid(id, &clock).unwrap());
        assert_eq!(reg.certificate_status(id, &clock).unwrap(), CertificateStatus::Expired);
    }

    #[test]
    fn revoked_outranks_expired() {
        let cert = Certificate {
            certificate_id: CertificateId(1),
            item_id: ItemId(1),
            issuer: admin(),
            issue_time: 0,
            expiration_time: 10,
            revoked: true,
            certificate_hash: CertificateHash::new([0; 32]),
        };
        assert_eq!(cert.status_at(5), CertificateStatus::Revoked);
        assert_eq!(cert.status_at(50), CertificateStatus::Revoked);
    }

    #[test]
    fn unknown_certificate_is_missing_and_invalid() {
        let reg = registry();
        let clock = FixedClock(0);
        assert_eq!(reg.certificate_status(CertificateId(9), &clock).unwrap(), CertificateStatus::Missing);
        assert!(!reg.is_certificate_valid(CertificateId(9), &clock).unwrap());
    }

    #[test]
    fn expiration_overflow_is_rejected_without_writes() {
        let mut reg = registry();
        let admin = admin();
        let err = reg
            .issue_certificate(ItemId(1), CertificateHash::new([1; 32]), &CallContext::at(&admin, u64::MAX))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(reg.get_item_certificate(ItemId(1)).unwrap().is_none());
    }

    #[test]
    fn status_display() {
        assert_eq!(CertificateStatus::Valid.to_string(), "valid");
        assert_eq!(CertificateStatus::Expired.to_string(), "expired");
    }
}
