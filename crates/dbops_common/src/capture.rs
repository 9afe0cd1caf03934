//! Configuration snapshot capture
//!
//! Captures a fixed set of named parameters from a running database into a
//! normalized, human-readable JSON snapshot: initialization parameters,
//! tablespace layout and the user/role listing. Snapshots are what the
//! drift comparator diffs against a stored baseline.
//!
//! A failed capture is always a `CaptureError`, never an empty snapshot:
//! the comparator must be able to tell "could not look" from "no drift".

use crate::exec::{self, ExecStatus};
use crate::paths;
use crate::target::{DbTarget, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Oracle initialization parameters worth watching for drift
const ORACLE_PARAMS: &[&str] = &[
    "open_cursors",
    "processes",
    "sessions",
    "db_block_size",
    "sga_target",
    "pga_aggregate_target",
    "memory_target",
    "undo_retention",
    "compatible",
];

/// PostgreSQL settings worth watching for drift
const PG_PARAMS: &[&str] = &[
    "max_connections",
    "shared_buffers",
    "work_mem",
    "maintenance_work_mem",
    "wal_level",
    "max_wal_size",
    "checkpoint_timeout",
    "effective_cache_size",
];

/// Capture failure, distinct from any drift result
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("{tool} not available: {detail}")]
    ToolUnavailable { tool: String, detail: String },

    #[error("{tool} failed (exit {exit_code}): {detail}")]
    QueryFailed {
        tool: String,
        exit_code: i32,
        detail: String,
    },

    #[error("could not parse capture output: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Point-in-time capture of a target's configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Host the capture ran on
    pub host: String,
    /// Target name from the config
    pub target: String,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
    /// Parameter name -> value, unordered semantics (BTreeMap for stable output)
    pub params: BTreeMap<String, String>,
}

impl Snapshot {
    /// Save as pretty JSON via an atomic write
    pub fn save(&self, path: &Path) -> Result<(), CaptureError> {
        let json = serde_json::to_string_pretty(self)?;
        paths::atomic_write_str(path, &json)?;
        info!(path = %path.display(), params = self.params.len(), "snapshot saved");
        Ok(())
    }

    /// Load a previously stored snapshot
    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Capture the current configuration of a target.
pub fn capture_snapshot(target: &DbTarget) -> Result<Snapshot, CaptureError> {
    let raw = match target.engine {
        Engine::Oracle => oracle_query(target, &oracle_capture_sql())?,
        Engine::Postgres => psql_query(target, &postgres_capture_sql())?,
    };

    let params = parse_kv_lines(&raw)?;
    Ok(Snapshot {
        host: target.host.clone(),
        target: target.name.clone(),
        captured_at: Utc::now(),
        params,
    })
}

fn oracle_capture_sql() -> String {
    let param_list = ORACLE_PARAMS
        .iter()
        .map(|p| format!("'{}'", p))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT name || '|' || value FROM v$parameter WHERE name IN ({param_list});\n\
         SELECT 'tablespace.' || tablespace_name || '|' || status FROM dba_tablespaces;\n\
         SELECT 'user.' || username || '|' || account_status FROM dba_users;\n"
    )
}

fn postgres_capture_sql() -> String {
    let param_list = PG_PARAMS
        .iter()
        .map(|p| format!("'{}'", p))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT name || '|' || setting FROM pg_settings WHERE name IN ({param_list});\n\
         SELECT 'tablespace.' || spcname || '|present' FROM pg_tablespace;\n\
         SELECT 'role.' || rolname || '|' || CASE WHEN rolsuper THEN 'SUPERUSER' ELSE 'NORMAL' END FROM pg_roles;\n"
    )
}

/// Run a SQL batch through `sqlplus -S "/ as sysdba"`.
///
/// The batch goes into a scratch script (removed when the tempfile drops)
/// with the usual quiet-output preamble; WHENEVER SQLERROR makes SQL-level
/// failures surface as a non-zero exit instead of ORA- lines in stdout.
pub fn oracle_query(target: &DbTarget, sql: &str) -> Result<String, CaptureError> {
    let mut script = tempfile::Builder::new()
        .prefix("dbops_")
        .suffix(".sql")
        .tempfile()?;
    writeln!(script, "SET PAGESIZE 0")?;
    writeln!(script, "SET FEEDBACK OFF")?;
    writeln!(script, "SET HEADING OFF")?;
    writeln!(script, "SET VERIFY OFF")?;
    writeln!(script, "SET LINESIZE 1000")?;
    writeln!(script, "WHENEVER SQLERROR EXIT SQL.SQLCODE")?;
    writeln!(script, "{}", sql)?;
    writeln!(script, "EXIT;")?;
    script.flush()?;

    let script_arg = format!("@{}", script.path().display());
    let sqlplus = target.oracle_bin("sqlplus");
    let out = exec::run(
        &sqlplus,
        &["-S", "/ as sysdba", &script_arg],
        &target.command_env(),
        None,
    );

    match out.status {
        ExecStatus::Success => Ok(out.stdout),
        ExecStatus::CommandNotFound | ExecStatus::PermissionDenied => {
            Err(CaptureError::ToolUnavailable {
                tool: sqlplus,
                detail: out.stderr,
            })
        }
        _ => Err(CaptureError::QueryFailed {
            tool: sqlplus,
            exit_code: out.exit_code,
            detail: if out.stderr.trim().is_empty() {
                out.stdout
            } else {
                out.stderr
            },
        }),
    }
}

/// Run a SQL batch through `psql -Atq`.
pub fn psql_query(target: &DbTarget, sql: &str) -> Result<String, CaptureError> {
    let mut args: Vec<String> = vec![
        "-Atq".to_string(),
        "-v".to_string(),
        "ON_ERROR_STOP=1".to_string(),
    ];
    if let Some(port) = target.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    if let Some(user) = &target.user {
        args.push("-U".to_string());
        args.push(user.clone());
    }
    if let Some(database) = &target.database {
        args.push("-d".to_string());
        args.push(database.clone());
    }
    args.push("-c".to_string());
    args.push(sql.to_string());

    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let out = exec::run("psql", &arg_refs, &target.command_env(), None);

    match out.status {
        ExecStatus::Success => Ok(out.stdout),
        ExecStatus::CommandNotFound | ExecStatus::PermissionDenied => {
            Err(CaptureError::ToolUnavailable {
                tool: "psql".to_string(),
                detail: out.stderr,
            })
        }
        _ => Err(CaptureError::QueryFailed {
            tool: "psql".to_string(),
            exit_code: out.exit_code,
            detail: out.stderr,
        }),
    }
}

/// Parse `name|value` capture rows. Blank lines are skipped; a row without
/// a separator is a parse error (a wrong tool banner, not data).
fn parse_kv_lines(raw: &str) -> Result<BTreeMap<String, String>, CaptureError> {
    let mut params = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('|') {
            Some((name, value)) => {
                params.insert(name.trim().to_string(), value.trim().to_string());
            }
            None => {
                return Err(CaptureError::Parse(format!(
                    "unexpected capture row: {line:?}"
                )))
            }
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_kv_lines() {
        let raw = "open_cursors|300\ndb_block_size|8192\n\ntablespace.SYSTEM|ONLINE\n";
        let params = parse_kv_lines(raw).unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params["open_cursors"], "300");
        assert_eq!(params["tablespace.SYSTEM"], "ONLINE");
    }

    #[test]
    fn test_parse_rejects_garbage_rows() {
        let raw = "open_cursors|300\nORA-01017: invalid username/password\n";
        assert!(matches!(
            parse_kv_lines(raw),
            Err(CaptureError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let params = parse_kv_lines("  sessions | 472  \n").unwrap();
        assert_eq!(params["sessions"], "472");
    }

    #[test]
    fn test_snapshot_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("baseline.json");

        let mut params = BTreeMap::new();
        params.insert("open_cursors".to_string(), "300".to_string());
        let snapshot = Snapshot {
            host: "db01".to_string(),
            target: "prod01".to_string(),
            captured_at: Utc::now(),
            params,
        };

        snapshot.save(&path).unwrap();
        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded.target, "prod01");
        assert_eq!(loaded.params["open_cursors"], "300");
    }

    #[test]
    fn test_load_missing_snapshot_is_io_error() {
        let dir = tempdir().unwrap();
        let err = Snapshot::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CaptureError::Io(_)));
    }
}
