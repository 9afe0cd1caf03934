//! Path layout and atomic file operations
//!
//! All persistent state lives under a single data directory:
//! - snapshots/   configuration snapshots (JSON)
//! - accounts/    DBA account ledger (YAML) plus timestamped backups
//! - vault/       one encrypted secret artifact per account
//!
//! Writes go through `atomic_write` (temp file + rename) so a crash can
//! never leave a half-written ledger or snapshot behind.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Default data directory
pub const DATA_DIR: &str = "/var/lib/dbops";

/// Environment override for the data directory
pub const DATA_DIR_ENV: &str = "DBOPS_DATA_DIR";

/// Resolve the data directory, honoring the environment override.
pub fn data_dir() -> PathBuf {
    match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DATA_DIR),
    }
}

/// Directory holding configuration snapshots
pub fn snapshot_dir() -> PathBuf {
    data_dir().join("snapshots")
}

/// Directory holding the account ledger and its backups
pub fn accounts_dir() -> PathBuf {
    data_dir().join("accounts")
}

/// Default ledger file path
pub fn ledger_file() -> PathBuf {
    accounts_dir().join("dba_accounts.yml")
}

/// Directory holding encrypted per-account secrets
pub fn vault_dir() -> PathBuf {
    data_dir().join("vault")
}

/// Write data to a file atomically using temp file + rename.
/// The file is never observable in a partial state.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Temp file in the same directory so the rename stays on one filesystem
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Write string data atomically
pub fn atomic_write_str(path: &Path, data: &str) -> io::Result<()> {
    atomic_write(path, data.as_bytes())
}

/// Safely delete a file (no error if it doesn't exist)
pub fn safe_delete(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/state.json");
        atomic_write_str(&path, "{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write_str(&path, "old").unwrap();
        atomic_write_str(&path, "new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        // No temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_safe_delete_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        assert!(safe_delete(&dir.path().join("missing")).is_ok());
    }
}
