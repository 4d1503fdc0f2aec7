use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use provledger_core::{
    backup,
    config::{LoggingConfig, ProvledgerConfig},
    report, util, CallContext, CertificateHash, CertificateId, CertificateRegistry, FixedClock,
    ItemId, LedgerError, OwnershipLedger, Principal, SqliteStore,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "provledger",
    version = util::VERSION,
    about = "Chain-of-custody and authenticity certificate ledger"
)]
struct Cli {
    /// Path to the ledger database (SQLite).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Principal the call is made as.
    #[arg(long = "as", global = true, env = "PROVLEDGER_CALLER")]
    caller: Option<String>,

    /// Current clock height.  Defaults to the last height the store observed;
    /// a height below that is rejected.
    #[arg(long, global = true)]
    height: Option<u64>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new, empty ledger database and fix its certificate policy.
    Init {
        /// Administrator principal (overrides config).
        #[arg(long)]
        administrator: Option<String>,
        /// Certificate validity in clock units (overrides config).
        #[arg(long)]
        validity_period: Option<u64>,
    },

    /// Move the persisted clock forward.
    Advance {
        #[arg(long)]
        blocks: u64,
    },

    /// Claim an item as its origin owner.
    RecordInitial {
        #[arg(long)]
        item: u64,
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Transfer an item you currently own.
    Transfer {
        #[arg(long)]
        item: u64,
        #[arg(long)]
        to: String,
        #[arg(long = "type", default_value = "sale")]
        transaction_type: String,
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Print an item's current owner.
    Owner {
        #[arg(long)]
        item: u64,
    },

    /// Print one ownership record.
    Record {
        #[arg(long)]
        item: u64,
        #[arg(long)]
        sequence: u64,
    },

    /// Print an item's full chain of custody.
    History {
        #[arg(long)]
        item: u64,
    },

    /// Re-check chain invariants for one item, or all items.
    Verify {
        #[arg(long)]
        item: Option<u64>,
    },

    /// Issue an authenticity certificate (administrator only).
    Issue {
        #[arg(long)]
        item: u64,
        /// 32-byte certificate hash, hex encoded.
        #[arg(long)]
        hash: String,
    },

    /// Revoke a certificate (administrator only).
    Revoke {
        #[arg(long)]
        certificate: u64,
    },

    /// Print a certificate.
    Certificate {
        #[arg(long)]
        certificate: u64,
    },

    /// Print the id of an item's most recent certificate.
    ItemCertificate {
        #[arg(long)]
        item: u64,
    },

    /// Evaluate a certificate's validity at the current height.
    Check {
        #[arg(long)]
        certificate: u64,
    },

    /// Build a provenance report for an item.
    Report {
        #[arg(long)]
        item: u64,
        /// Write JSON here instead of printing.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print a plain-text summary instead of JSON.
        #[arg(long)]
        text: bool,
    },

    /// Export the ledger to a JSON backup file.
    Export {
        #[arg(long)]
        out: PathBuf,
    },

    /// Import a ledger from a JSON backup into a new database.
    Import {
        #[arg(long)]
        json: PathBuf,
        /// Path for the new database (must not already exist).
        #[arg(long)]
        target_db: PathBuf,
    },

    /// Print version information.
    Version,
}

#[derive(Debug, Serialize)]
struct Rejection<'a> {
    error: u16,
    message: &'a str,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = ProvledgerConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env().context("apply env overrides")?;

    init_logging(&cfg.logging)?;

    let err = match run(cli, &cfg) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    // Rejections print as a tagged result with exit status 1.
    if let Some(le) = err.downcast_ref::<LedgerError>().filter(|le| le.is_rejection()) {
        let msg = le.to_string();
        print_json(&Rejection {
            error: le.code().as_u16(),
            message: &msg,
        })?;
        std::process::exit(1);
    }
    Err(err)
}

fn run(cli: Cli, cfg: &ProvledgerConfig) -> Result<()> {
    let db_path = cli.db.clone().unwrap_or_else(|| cfg.paths.db.clone());
    util::validate_path(&db_path, "db")?;

    match cli.cmd {
        Commands::Init {
            administrator,
            validity_period,
        } => {
            let mut cfg = cfg.clone();
            if administrator.is_some() {
                cfg.certificates.administrator = administrator;
            }
            if let Some(v) = validity_period {
                cfg.certificates.validity_period = v;
            }
            let policy = cfg.certificate_policy()?;
            let mut store = SqliteStore::create_new(&db_path, &policy).context("create store")?;
            if cli.height.is_some() {
                store.observe_height(cli.height)?;
            }
            info!(
                store_id = %store.meta().store_id,
                administrator = %policy.administrator,
                validity_period = policy.validity_period,
                "ledger initialized"
            );
            print_json(store.meta())?;
        }

        Commands::Advance { blocks } => {
            let mut store = open_store(&db_path, cfg)?;
            store.observe_height(cli.height)?;
            let height = store.advance(blocks)?;
            print_json(&serde_json::json!({ "height": height }))?;
        }

        Commands::RecordInitial { item, notes } => {
            let caller = caller(cli.caller.as_deref())?;
            let (store, now) = open_at_height(&db_path, cfg, cli.height)?;
            let mut ledger = OwnershipLedger::new(store);
            let seq = ledger.record_initial_ownership(ItemId(item), &notes, &CallContext::at(&caller, now))?;
            print_json(&serde_json::json!({ "sequence": seq }))?;
        }

        Commands::Transfer {
            item,
            to,
            transaction_type,
            notes,
        } => {
            let caller = caller(cli.caller.as_deref())?;
            let new_owner = Principal::new(to)?;
            let (store, now) = open_at_height(&db_path, cfg, cli.height)?;
            let mut ledger = OwnershipLedger::new(store);
            let seq = ledger.transfer_ownership(
                ItemId(item),
                &new_owner,
                &transaction_type,
                &notes,
                &CallContext::at(&caller, now),
            )?;
            print_json(&serde_json::json!({ "sequence": seq }))?;
        }

        Commands::Owner { item } => {
            let ledger = OwnershipLedger::new(open_store(&db_path, cfg)?);
            print_json(&ledger.get_current_owner(ItemId(item))?)?;
        }

        Commands::Record { item, sequence } => {
            let ledger = OwnershipLedger::new(open_store(&db_path, cfg)?);
            print_json(&ledger.get_ownership_record(ItemId(item), sequence)?)?;
        }

        Commands::History { item } => {
            let ledger = OwnershipLedger::new(open_store(&db_path, cfg)?);
            print_json(&ledger.ownership_history(ItemId(item))?)?;
        }

        Commands::Verify { item } => {
            let ledger = OwnershipLedger::new(open_store(&db_path, cfg)?);
            let checked = match item {
                Some(i) => {
                    ledger.verify_chain(ItemId(i)).context("verify chain")?;
                    1
                }
                None => ledger.verify_all().context("verify chains")?,
            };
            info!(chains = checked, "chain verification passed");
            print_json(&serde_json::json!({ "verified": checked }))?;
        }

        Commands::Issue { item, hash } => {
            let caller = caller(cli.caller.as_deref())?;
            let hash: CertificateHash = hash.parse()?;
            let (store, now) = open_at_height(&db_path, cfg, cli.height)?;
            let policy = store.meta().policy();
            let mut registry = CertificateRegistry::new(store, policy);
            let id = registry.issue_certificate(ItemId(item), hash, &CallContext::at(&caller, now))?;
            print_json(&serde_json::json!({ "certificate_id": id }))?;
        }

        Commands::Revoke { certificate } => {
            let caller = caller(cli.caller.as_deref())?;
            let (store, now) = open_at_height(&db_path, cfg, cli.height)?;
            let policy = store.meta().policy();
            let mut registry = CertificateRegistry::new(store, policy);
            let revoked = registry.revoke_certificate(CertificateId(certificate), &CallContext::at(&caller, now))?;
            print_json(&serde_json::json!({ "revoked": revoked }))?;
        }

        Commands::Certificate { certificate } => {
            let store = open_store(&db_path, cfg)?;
            let policy = store.meta().policy();
            let registry = CertificateRegistry::new(store, policy);
            print_json(&registry.get_certificate(CertificateId(certificate))?)?;
        }

        Commands::ItemCertificate { item } => {
            let store = open_store(&db_path, cfg)?;
            let policy = store.meta().policy();
            let registry = CertificateRegistry::new(store, policy);
            let id = registry.get_item_certificate(ItemId(item))?;
            print_json(&id.map(|certificate_id| serde_json::json!({ "certificate_id": certificate_id })))?;
        }

        Commands::Check { certificate } => {
            let (store, now) = open_for_query(&db_path, cfg, cli.height)?;
            let policy = store.meta().policy();
            let registry = CertificateRegistry::new(store, policy);
            let clock = FixedClock(now);
            let status = registry.certificate_status(CertificateId(certificate), &clock)?;
            print_json(&serde_json::json!({
                "certificate_id": certificate,
                "height": now,
                "status": status,
                "valid": status.is_valid(),
            }))?;
        }

        Commands::Report { item, out, text } => {
            let (certs, now) = open_for_query(&db_path, cfg, cli.height)?;
            let policy = certs.meta().policy();
            let registry = CertificateRegistry::new(certs, policy);
            let ledger = OwnershipLedger::new(open_store(&db_path, cfg)?);
            let rep = report::build_item_report(&ledger, &registry, ItemId(item), &FixedClock(now))?;
            match out {
                Some(path) => {
                    report::write_item_report(&path, &rep).context("write report")?;
                    info!(out = %path.display(), "item report written");
                }
                None if text => print!("{}", report::render_text(&rep)),
                None => print_json(&rep)?,
            }
        }

        Commands::Export { out } => {
            let store = open_store(&db_path, cfg)?;
            backup::export_json(&store, &out).context("export ledger")?;
        }

        Commands::Import { json, target_db } => {
            anyhow::ensure!(
                !target_db.exists(),
                "target database {} already exists -- will not overwrite",
                target_db.display()
            );
            let imported = backup::import_json(&json, &target_db).context("import ledger")?;
            info!(
                store_id = %imported.meta().store_id,
                "ledger imported to {}",
                target_db.display()
            );
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn caller(arg: Option<&str>) -> Result<Principal> {
    let raw = arg.context("no caller identity: pass --as or set PROVLEDGER_CALLER")?;
    Ok(Principal::new(raw)?)
}

fn open_store(db_path: &Path, cfg: &ProvledgerConfig) -> Result<SqliteStore> {
    let store = SqliteStore::open_existing(db_path)?;
    let meta = store.meta();
    if let Some(admin) = cfg.certificates.administrator.as_deref() {
        if admin != meta.administrator.as_str() {
            warn!(
                configured = admin,
                deployed = %meta.administrator,
                "configured administrator differs from the store's; using the store's"
            );
        }
    }
    if cfg.certificates.validity_period != meta.validity_period {
        warn!(
            configured = cfg.certificates.validity_period,
            deployed = meta.validity_period,
            "configured validity period differs from the store's; using the store's"
        );
    }
    Ok(store)
}

fn open_at_height(db_path: &Path, cfg: &ProvledgerConfig, height: Option<u64>) -> Result<(SqliteStore, u64)> {
    let mut store = open_store(db_path, cfg)?;
    let now = store.observe_height(height)?;
    Ok((store, now))
}

/// Like [`open_at_height`] but leaves the persisted clock untouched.
fn open_for_query(db_path: &Path, cfg: &ProvledgerConfig, height: Option<u64>) -> Result<(SqliteStore, u64)> {
    let store = open_store(db_path, cfg)?;
    let now = store.height_at(height)?;
    Ok((store, now))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    Ok(())
}

fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command results only.
    if cfg.json_console {
        let json_layer = tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr);
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .with_context(|| format!("open json log file {}", cfg.json_log_file))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}
