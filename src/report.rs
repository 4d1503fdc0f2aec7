//! Per-item provenance report: chain of custody plus certificate standing.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::certificate::{Certificate, CertificateRegistry, CertificateStatus};
use crate::clock::Clock;
use crate::error::{Result, ResultExt as _};
use crate::ownership::{CurrentOwnership, OwnershipLedger, OwnershipRecord};
use crate::store::{CertificateStore, OwnershipStore};
use crate::types::{BlockHeight, ItemId};

pub const REPORT_FORMAT: &str = "provledger-item-report-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub format: String,
    pub generated_at_utc: String,
    /// Clock height the certificate status was evaluated at.
    pub evaluated_at: BlockHeight,
    pub item_id: ItemId,
    pub current_owner: Option<CurrentOwnership>,
    pub chain: Vec<OwnershipRecord>,
    pub chain_verified: bool,
    /// Set when `chain_verified` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_error: Option<String>,
    pub certificate: Option<CertificateStanding>,
    /// Earlier certificates replaced by re-issuance.
    pub superseded_certificates: Vec<Certificate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateStanding {
    pub certificate: Certificate,
    pub status: CertificateStatus,
}

pub fn build_item_report<O, C>(
    ledger: &OwnershipLedger<O>,
    registry: &CertificateRegistry<C>,
    item_id: ItemId,
    clock: &dyn Clock,
) -> Result<ItemReport>
where
    O: OwnershipStore,
    C: CertificateStore,
{
    let evaluated_at = clock.now();
    let chain = ledger.ownership_history(item_id)?;
    let current_owner = ledger.get_current_owner(item_id)?;
    let chain_error = ledger.verify_chain(item_id).err().map(|e| e.to_string());

    let active_id = registry.get_item_certificate(item_id)?;
    let mut superseded = Vec::new();
    let mut certificate = None;
    for cert in registry.certificates_for_item(item_id)? {
        if Some(cert.certificate_id) == active_id {
            certificate = Some(CertificateStanding {
                status: cert.status_at(evaluated_at),
                certificate: cert,
            });
        } else {
            superseded.push(cert);
        }
    }

    Ok(ItemReport {
        format: REPORT_FORMAT.to_string(),
        generated_at_utc: crate::util::now_utc_rfc3339(),
        evaluated_at,
        item_id,
        current_owner,
        chain,
        chain_verified: chain_error.is_none(),
        chain_error,
        certificate,
        superseded_certificates: superseded,
    })
}

pub fn write_item_report(out_path: &Path, report: &ItemReport) -> Result<()> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .ctx_report(&format!("create out dir {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(report).ctx_report("serialize item report")?;
    std::fs::write(out_path, json).ctx_report(&format!("write {}", out_path.display()))?;
    Ok(())
}

/// Plain-text rendering for terminals.
pub fn render_text(report: &ItemReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Item {} (evaluated at height {})", report.item_id, report.evaluated_at);
    match &report.current_owner {
        Some(cur) => {
            let _ = writeln!(out, "Current owner: {} (sequence {})", cur.owner, cur.sequence);
        }
        None => {
            let _ = writeln!(out, "Current owner: none recorded");
        }
    }
    let _ = writeln!(out, "Chain of custody:");
    for r in &report.chain {
        let _ = writeln!(
            out,
            "  #{:<4} h={:<10} {:<12} {} -> {}  {}",
            r.sequence, r.transaction_time, r.transaction_type, r.acquired_from, r.owner, r.transaction_notes
        );
    }
    if let Some(err) = &report.chain_error {
        let _ = writeln!(out, "Chain verification FAILED: {err}");
    }
    match &report.certificate {
        Some(s) => {
            let _ = writeln!(
                out,
                "Certificate {}: {} (issued {}, expires {})",
                s.certificate.certificate_id, s.status, s.certificate.issue_time, s.certificate.expiration_time
            );
        }
        None => {
            let _ = writeln!(out, "Certificate: none issued");
        }
    }
    if !report.superseded_certificates.is_empty() {
        let ids: Vec<String> = report
            .superseded_certificates
            .iter()
            .map(|c| c.certificate_id.to_string())
            .collect();
        let _ = writeln!(out, "Superseded certificates: {}", ids.join(", "));
    }
    out
}
