//! DBA account ledger
//!
//! The ledger is the persisted list of managed administrator accounts and
//! their role grants, one YAML file per environment. It tracks who is
//! managed, independent of actually applying grants inside any database.
//!
//! Write discipline:
//! 1. take the advisory lock (a second concurrent writer fails fast)
//! 2. copy the previous file to a timestamped backup and verify the copy
//! 3. atomically replace the ledger (temp file + rename)
//!
//! Deletion policy: soft delete. The entry is marked `inactive` and kept
//! as history; the account's secret artifact is removed by the caller.

use crate::paths;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Roles a managed account may hold. Fixed allow-list; anything else is
/// rejected before any mutation happens.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Dba,
    Sysdba,
    Monitor,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dba => "DBA",
            Role::Sysdba => "SYSDBA",
            Role::Monitor => "MONITOR",
            Role::Operator => "OPERATOR",
        }
    }

    pub const ALL: &'static [Role] = &[Role::Dba, Role::Sysdba, Role::Monitor, Role::Operator];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DBA" => Ok(Role::Dba),
            "SYSDBA" => Ok(Role::Sysdba),
            "MONITOR" => Ok(Role::Monitor),
            "OPERATOR" => Ok(Role::Operator),
            other => Err(LedgerError::InvalidRole(other.to_string())),
        }
    }
}

/// Parse a comma-separated role list into a sorted, deduplicated set.
/// One invalid token aborts the whole parse.
pub fn parse_roles(csv: &str) -> Result<Vec<Role>, LedgerError> {
    let mut roles = Vec::new();
    for token in csv.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        roles.push(token.parse::<Role>()?);
    }
    if roles.is_empty() {
        return Err(LedgerError::NoRoles);
    }
    roles.sort();
    roles.dedup();
    Ok(roles)
}

/// Account status. Deleted accounts stay in the ledger as `inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
}

/// One managed administrator account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbaAccount {
    /// Unique account name, e.g. DBA_101
    pub username: String,
    /// Sorted role grants
    pub roles: Vec<Role>,
    /// Name of the variable the provisioning side reads the password from
    pub password_var: String,
    /// Active or soft-deleted
    pub status: AccountStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid role: {0} (valid: DBA, SYSDBA, MONITOR, OPERATOR)")]
    InvalidRole(String),

    #[error("at least one role is required")]
    NoRoles,

    #[error("invalid account id: {0} (letters, digits and underscore only)")]
    InvalidAccountId(String),

    #[error("account not found: {0}")]
    NotFound(String),

    #[error(
        "ledger is locked by another run ({holder}); if that run is gone, remove {}",
        .path.display()
    )]
    Locked { path: PathBuf, holder: String },

    #[error("backup verification failed for {}", .0.display())]
    BackupMismatch(PathBuf),

    #[error("ledger format error: {0}")]
    Format(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of `add_or_update`, so a true no-op is reported distinctly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Outcome of `delete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deactivated,
    AlreadyInactive,
}

/// On-disk shape of the ledger file
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    dba_accounts: Vec<DbaAccount>,
}

/// Advisory lock guard next to the ledger file. Created with O_EXCL;
/// a second writer gets `LedgerError::Locked` instead of corrupting
/// state. The file records pid and timestamp so a lock left behind by
/// a killed run can be identified and removed by hand.
#[derive(Debug)]
struct LedgerLock {
    path: PathBuf,
}

impl LedgerLock {
    fn acquire(ledger_path: &Path) -> Result<Self, LedgerError> {
        let path = ledger_path.with_extension("lock");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(
                    file,
                    "pid {} at {}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                Ok(Self { path })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown holder".to_string());
                Err(LedgerError::Locked { path, holder })
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to remove ledger lock");
        }
    }
}

/// The account ledger, loaded into memory for one run
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    accounts: Vec<DbaAccount>,
}

impl Ledger {
    /// Load the ledger; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let accounts = if path.exists() {
            let content = fs::read_to_string(path)?;
            let file: LedgerFile = serde_yaml::from_str(&content)?;
            file.dba_accounts
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            accounts,
        })
    }

    pub fn accounts(&self) -> &[DbaAccount] {
        &self.accounts
    }

    pub fn find(&self, username: &str) -> Option<&DbaAccount> {
        self.accounts.iter().find(|a| a.username == username)
    }

    /// Add a new account or update an existing one. Roles are assumed
    /// normalized (sorted, deduplicated; see `parse_roles`). Returns
    /// `Unchanged` without touching the file when the entry already
    /// matches, so callers can tell a real update from a no-op.
    pub fn add_or_update(
        &mut self,
        username: &str,
        roles: Vec<Role>,
    ) -> Result<UpsertOutcome, LedgerError> {
        if roles.is_empty() {
            return Err(LedgerError::NoRoles);
        }

        let outcome = match self.accounts.iter_mut().find(|a| a.username == username) {
            Some(existing) => {
                if existing.roles == roles && existing.status == AccountStatus::Active {
                    info!(username, "account already up to date");
                    return Ok(UpsertOutcome::Unchanged);
                }
                existing.roles = roles;
                existing.status = AccountStatus::Active;
                UpsertOutcome::Updated
            }
            None => {
                self.accounts.push(DbaAccount {
                    username: username.to_string(),
                    roles,
                    password_var: "dba_password".to_string(),
                    status: AccountStatus::Active,
                });
                UpsertOutcome::Created
            }
        };

        self.persist()?;
        info!(username, ?outcome, "ledger updated");
        Ok(outcome)
    }

    /// Soft-delete an account: mark it inactive, keep the row as history.
    /// The caller removes the matching secret artifact.
    pub fn delete(&mut self, username: &str) -> Result<DeleteOutcome, LedgerError> {
        let account = self
            .accounts
            .iter_mut()
            .find(|a| a.username == username)
            .ok_or_else(|| LedgerError::NotFound(username.to_string()))?;

        if account.status == AccountStatus::Inactive {
            return Ok(DeleteOutcome::AlreadyInactive);
        }

        account.status = AccountStatus::Inactive;
        self.persist()?;
        info!(username, "account deactivated");
        Ok(DeleteOutcome::Deactivated)
    }

    /// Backup-then-atomic-replace under the advisory lock.
    fn persist(&self) -> Result<(), LedgerError> {
        let _lock = LedgerLock::acquire(&self.path)?;

        if self.path.exists() {
            backup_file(&self.path)?;
        }

        let file = LedgerFile {
            dba_accounts: self.accounts.clone(),
        };
        let yaml = serde_yaml::to_string(&file)?;
        paths::atomic_write_str(&self.path, &yaml)?;
        Ok(())
    }
}

/// Copy the ledger to `<name>.bak.YYYYmmdd_HHMMSS` and verify the copy
/// by SHA-256 before the original is touched.
fn backup_file(path: &Path) -> Result<PathBuf, LedgerError> {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger".to_string());
    let backup = path.with_file_name(format!("{file_name}.bak.{timestamp}"));

    fs::copy(path, &backup)?;

    if sha256_file(path)? != sha256_file(&backup)? {
        return Err(LedgerError::BackupMismatch(backup));
    }
    info!(backup = %backup.display(), "ledger backed up");
    Ok(backup)
}

fn sha256_file(path: &Path) -> Result<String, LedgerError> {
    let data = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

/// Build the canonical account name from an operator-supplied id.
pub fn account_username(id: &str) -> Result<String, LedgerError> {
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(LedgerError::InvalidAccountId(id.to_string()));
    }
    if id.to_uppercase().starts_with("DBA_") {
        Ok(id.to_uppercase())
    } else {
        Ok(format!("DBA_{}", id.to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ledger_in(dir: &Path) -> Ledger {
        Ledger::load(&dir.join("dba_accounts.yml")).unwrap()
    }

    fn backups_in(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bak."))
            .count()
    }

    #[test]
    fn test_parse_roles_case_insensitive_sorted() {
        let roles = parse_roles("sysdba, dba").unwrap();
        assert_eq!(roles, vec![Role::Dba, Role::Sysdba]);
        // Reordered, different case: same normalized set
        assert_eq!(parse_roles("DBA,SYSDBA").unwrap(), roles);
    }

    #[test]
    fn test_parse_roles_rejects_unknown_token() {
        let err = parse_roles("dba,superuser").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRole(ref r) if r == "SUPERUSER"));
    }

    #[test]
    fn test_parse_roles_empty_is_error() {
        assert!(matches!(parse_roles(" , "), Err(LedgerError::NoRoles)));
    }

    #[test]
    fn test_add_new_account_grows_ledger_by_one() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());

        let outcome = ledger
            .add_or_update("DBA_101", parse_roles("sysdba,dba").unwrap())
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(ledger.accounts().len(), 1);
        assert_eq!(ledger.accounts()[0].status, AccountStatus::Active);
    }

    #[test]
    fn test_add_same_roles_again_is_noop() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());

        ledger
            .add_or_update("DBA_101", parse_roles("sysdba,dba").unwrap())
            .unwrap();
        let backups_before = backups_in(dir.path());

        // Case-insensitive, reordered input normalizes to the same set
        let outcome = ledger
            .add_or_update("DBA_101", parse_roles("DBA,SYSDBA").unwrap())
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(ledger.accounts().len(), 1);
        // No-op means no write and no new backup
        assert_eq!(backups_in(dir.path()), backups_before);
    }

    #[test]
    fn test_update_changes_roles() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());

        ledger
            .add_or_update("DBA_101", vec![Role::Monitor])
            .unwrap();
        let outcome = ledger
            .add_or_update("DBA_101", vec![Role::Dba, Role::Monitor])
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(ledger.accounts()[0].roles, vec![Role::Dba, Role::Monitor]);
    }

    #[test]
    fn test_delete_marks_inactive_and_keeps_row() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());

        ledger.add_or_update("DBA_101", vec![Role::Dba]).unwrap();
        let outcome = ledger.delete("DBA_101").unwrap();
        assert_eq!(outcome, DeleteOutcome::Deactivated);
        assert_eq!(ledger.accounts().len(), 1);
        assert_eq!(ledger.accounts()[0].status, AccountStatus::Inactive);
    }

    #[test]
    fn test_delete_missing_account_is_not_found() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());

        let err = ledger.delete("DBA_999").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        // Ledger untouched: no file, no backups
        assert!(!dir.path().join("dba_accounts.yml").exists());
        assert_eq!(backups_in(dir.path()), 0);
    }

    #[test]
    fn test_mutation_writes_timestamped_backup() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());

        // First write creates the file, no backup yet
        ledger.add_or_update("DBA_101", vec![Role::Dba]).unwrap();
        assert_eq!(backups_in(dir.path()), 0);

        // Second mutation backs up the previous version first
        ledger
            .add_or_update("DBA_102", vec![Role::Operator])
            .unwrap();
        assert_eq!(backups_in(dir.path()), 1);
    }

    #[test]
    fn test_ledger_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dba_accounts.yml");

        let mut ledger = Ledger::load(&path).unwrap();
        ledger
            .add_or_update("DBA_101", vec![Role::Dba, Role::Sysdba])
            .unwrap();
        ledger.delete("DBA_101").unwrap();

        let reloaded = Ledger::load(&path).unwrap();
        let account = reloaded.find("DBA_101").unwrap();
        assert_eq!(account.status, AccountStatus::Inactive);
        assert_eq!(account.roles, vec![Role::Dba, Role::Sysdba]);
    }

    #[test]
    fn test_lock_blocks_second_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dba_accounts.yml");
        let _held = LedgerLock::acquire(&path).unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        let err = ledger
            .add_or_update("DBA_101", vec![Role::Dba])
            .unwrap_err();
        assert!(matches!(err, LedgerError::Locked { .. }));
    }

    #[test]
    fn test_locked_error_names_holder_and_recovery_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dba_accounts.yml");
        let _held = LedgerLock::acquire(&path).unwrap();

        // The lock file identifies its holder for manual cleanup
        let lock_path = path.with_extension("lock");
        let contents = fs::read_to_string(&lock_path).unwrap();
        assert!(contents.contains(&format!("pid {}", std::process::id())));

        let err = LedgerLock::acquire(&path).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("pid"));
        assert!(message.contains(&lock_path.display().to_string()));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dba_accounts.yml");
        drop(LedgerLock::acquire(&path).unwrap());
        assert!(LedgerLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_account_username_normalization() {
        assert_eq!(account_username("101").unwrap(), "DBA_101");
        assert_eq!(account_username("dba_101").unwrap(), "DBA_101");
        assert!(account_username("bad id!").is_err());
        assert!(account_username("").is_err());
    }
}
