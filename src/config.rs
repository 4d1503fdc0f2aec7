//! Runtime configuration read from TOML.
//!
//! Search order:
//! 1. An explicit `--config` path
//! 2. `provledger.toml` next to the executable
//! 3. `$HOME/.config/provledger/config.toml` (`%LOCALAPPDATA%\provledger\config.toml` on Windows)
//! 4. Built-in defaults
//!
//! Environment variables override file values; CLI arguments override both.
//! The certificate section only seeds `init`: once a store exists, its
//! administrator and validity period are read from the store itself.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::certificate::{CertificatePolicy, DEFAULT_VALIDITY_PERIOD};
use crate::error::{LedgerError, OptionExt as _, Result, ResultExt as _};
use crate::types::Principal;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvledgerConfig {
    pub paths: PathsConfig,
    pub certificates: CertificatesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CertificatesConfig {
    pub administrator: Option<String>,
    /// Clock units a certificate stays valid after issuance.
    pub validity_period: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// JSON-lines log file; empty disables it.
    pub json_log_file: String,
    /// Emit JSON log lines on stderr instead of text.
    pub json_console: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("provledger.db"),
        }
    }
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            administrator: None,
            validity_period: DEFAULT_VALIDITY_PERIOD,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json_log_file: String::new(),
            json_console: false,
        }
    }
}

const FILE_NAME: &str = "provledger.toml";

impl ProvledgerConfig {
    /// Parse `path`, falling back to defaults when it is absent.
    /// A file that exists but fails to parse is a `Config` error.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).ctx_config(&format!("parse {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(LedgerError::Config(format!("read {}: {e}", path.display()))),
        }
    }

    /// Load from the explicit path if given, otherwise from the first
    /// candidate location that exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }
        match search_paths().into_iter().find(|c| c.is_file()) {
            Some(found) => Self::load_from(&found),
            None => Ok(Self::default()),
        }
    }

    /// Overlay `PROVLEDGER_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(db) = var("PROVLEDGER_DB") {
            self.paths.db = db.into();
        }
        if let Some(admin) = var("PROVLEDGER_ADMINISTRATOR") {
            self.certificates.administrator = Some(admin);
        }
        if let Some(period) = var("PROVLEDGER_VALIDITY_PERIOD") {
            self.certificates.validity_period = period
                .parse()
                .ctx_config("PROVLEDGER_VALIDITY_PERIOD is not an unsigned integer")?;
        }
        if let Some(level) = var("PROVLEDGER_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// The policy a new store is created with.
    pub fn certificate_policy(&self) -> Result<CertificatePolicy> {
        let admin = self
            .certificates
            .administrator
            .as_deref()
            .required_config("certificates.administrator is not set")?;
        Ok(CertificatePolicy {
            administrator: Principal::new(admin)?,
            validity_period: self.certificates.validity_period,
        })
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        out.push(exe.with_file_name(FILE_NAME));
    }
    let user_dir = if cfg!(windows) {
        std::env::var_os("LOCALAPPDATA").map(|d| PathBuf::from(d).join("provledger"))
    } else {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config").join("provledger"))
    };
    if let Some(dir) = user_dir {
        out.push(dir.join("config.toml"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = ProvledgerConfig::default();
        assert_eq!(cfg.certificates.validity_period, 52_560);
        assert_eq!(cfg.paths.db, PathBuf::from("provledger.db"));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.certificate_policy().is_err());
    }

    #[test]
    fn load_missing_file_returns_default() {
        let cfg = ProvledgerConfig::load_from(Path::new("nonexistent_file_xyz.toml")).unwrap();
        assert_eq!(cfg.certificates.validity_period, DEFAULT_VALIDITY_PERIOD);
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[certificates]
administrator = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM"
validity_period = 144
"#;
        let cfg: ProvledgerConfig = toml::from_str(toml_str).unwrap();
        let policy = cfg.certificate_policy().unwrap();
        assert_eq!(policy.validity_period, 144);
        assert_eq!(policy.administrator.as_str(), "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM");
        assert_eq!(cfg.paths.db, PathBuf::from("provledger.db"));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[certificates\nvalidity_period = ").unwrap();
        let err = ProvledgerConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().starts_with("config:"));
    }

    #[test]
    fn invalid_administrator_rejected() {
        let cfg: ProvledgerConfig = toml::from_str(
            r#"
[certificates]
administrator = "not a principal"
"#,
        )
        .unwrap();
        assert!(cfg.certificate_policy().is_err());
    }
}
