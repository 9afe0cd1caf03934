//! Database and listener health checks
//!
//! Sequential, per-host checks over the same command layer the capture
//! path uses: database role/open mode and standby apply lag via sqlplus,
//! PostgreSQL recovery state via psql, listener state via lsnrctl, plus
//! the oratab and listener.ora discovery heuristics.

use crate::capture::{self, CaptureError};
use crate::exec::{self, ExecStatus};
use crate::notify::{Notification, Severity};
use crate::target::{DbTarget, Engine};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Default oratab location
pub const ORATAB_PATH: &str = "/etc/oratab";

/// Up/down status of one checked component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

/// One /etc/oratab entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OratabEntry {
    pub sid: String,
    pub oracle_home: String,
    pub autostart: bool,
}

/// Parse oratab content: `SID:ORACLE_HOME:[Y|N]`, comments and blank
/// lines skipped.
pub fn parse_oratab(content: &str) -> Vec<OratabEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(3, ':');
        let (Some(sid), Some(home)) = (fields.next(), fields.next()) else {
            continue;
        };
        if sid.is_empty() || home.is_empty() {
            continue;
        }
        entries.push(OratabEntry {
            sid: sid.to_string(),
            oracle_home: home.to_string(),
            autostart: fields.next().map(|f| f.starts_with('Y')).unwrap_or(false),
        });
    }
    entries
}

/// Read and parse /etc/oratab (or an override path)
pub fn read_oratab(path: &Path) -> std::io::Result<Vec<OratabEntry>> {
    Ok(parse_oratab(&std::fs::read_to_string(path)?))
}

/// Extract listener names from listener.ora content. Top-level
/// `NAME = (` sections name listeners; SID_LIST_* blocks are their
/// companion sections, not listeners.
pub fn parse_listener_names(content: &str) -> Vec<String> {
    let re = Regex::new(r"(?m)^\s*([A-Za-z0-9_]+)\s*=\s*\(").unwrap();
    re.captures_iter(content)
        .map(|c| c[1].to_string())
        .filter(|name| !name.to_uppercase().starts_with("SID_LIST"))
        .collect()
}

/// Discover listener names under an Oracle home
pub fn discover_listeners(oracle_home: &str) -> Vec<String> {
    let path = Path::new(oracle_home)
        .join("network")
        .join("admin")
        .join("listener.ora");
    match std::fs::read_to_string(&path) {
        Ok(content) => parse_listener_names(&content),
        Err(err) => {
            warn!(path = %path.display(), %err, "could not read listener.ora");
            Vec::new()
        }
    }
}

/// Health of one listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerHealth {
    pub name: String,
    pub status: HealthStatus,
    pub services: Vec<String>,
    pub error: Option<String>,
}

/// Parse the Services Summary section of `lsnrctl status` output
pub fn parse_listener_services(stdout: &str) -> Vec<String> {
    let section = Regex::new(r"(?s)Services Summary.*?The command completed successfully")
        .unwrap();
    let Some(matched) = section.find(stdout) else {
        return Vec::new();
    };
    let quoted = Regex::new(r#""([^"]+)""#).unwrap();
    quoted
        .captures_iter(matched.as_str())
        .map(|c| c[1].to_string())
        .collect()
}

/// Check one listener with `lsnrctl status`
pub fn check_listener(target: &DbTarget, listener_name: &str) -> ListenerHealth {
    let lsnrctl = target.oracle_bin("lsnrctl");
    let out = exec::run(
        &lsnrctl,
        &["status", listener_name],
        &target.command_env(),
        None,
    );

    if out.status != ExecStatus::Success {
        return ListenerHealth {
            name: listener_name.to_string(),
            status: HealthStatus::Down,
            services: Vec::new(),
            error: Some(if out.stderr.trim().is_empty() {
                "listener is down".to_string()
            } else {
                out.stderr.trim().to_string()
            }),
        };
    }

    ListenerHealth {
        name: listener_name.to_string(),
        status: HealthStatus::Up,
        services: parse_listener_services(&out.stdout),
        error: None,
    }
}

/// Health of one database target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbHealth {
    pub target: String,
    pub engine: Engine,
    pub status: HealthStatus,
    /// PRIMARY / PHYSICAL STANDBY (oracle) or primary / standby (postgres)
    pub role: Option<String>,
    pub open_mode: Option<String>,
    pub active_sessions: Option<u64>,
    /// Standby apply lag; -1 when no applied log was found
    pub apply_lag_minutes: Option<f64>,
    pub error: Option<String>,
}

impl DbHealth {
    fn down(target: &DbTarget, error: String) -> Self {
        Self {
            target: target.name.clone(),
            engine: target.engine,
            status: HealthStatus::Down,
            role: None,
            open_mode: None,
            active_sessions: None,
            apply_lag_minutes: None,
            error: Some(error),
        }
    }
}

const ORACLE_HEALTH_SQL: &str = "\
SELECT 'role|' || database_role FROM v$database;\n\
SELECT 'open_mode|' || open_mode FROM v$database;\n\
SELECT 'sessions|' || COUNT(*) FROM v$session WHERE type = 'USER';\n";

const ORACLE_LAG_SQL: &str = "\
SELECT 'lag_minutes|' || NVL(ROUND((SYSDATE - MAX(completion_time)) * 24 * 60, 2), -1)\n\
FROM v$archived_log WHERE applied = 'YES' AND completion_time IS NOT NULL;\n";

const PG_HEALTH_SQL: &str = "\
SELECT 'version|' || current_setting('server_version');\n\
SELECT 'in_recovery|' || pg_is_in_recovery();\n\
SELECT 'sessions|' || COUNT(*) FROM pg_stat_activity WHERE backend_type = 'client backend';\n";

/// Check one database target
pub fn check_database(target: &DbTarget) -> DbHealth {
    let result = match target.engine {
        Engine::Oracle => check_oracle(target),
        Engine::Postgres => check_postgres(target),
    };
    match result {
        Ok(health) => {
            info!(target = %target.name, status = ?health.status, "database checked");
            health
        }
        Err(err) => {
            warn!(target = %target.name, %err, "database check failed");
            DbHealth::down(target, err.to_string())
        }
    }
}

fn field<'a>(rows: &'a [(String, String)], key: &str) -> Option<&'a str> {
    rows.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn parse_rows(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.split_once('|')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn check_oracle(target: &DbTarget) -> Result<DbHealth, CaptureError> {
    let raw = capture::oracle_query(target, ORACLE_HEALTH_SQL)?;
    let rows = parse_rows(&raw);

    let role = field(&rows, "role").map(|s| s.to_string());
    let open_mode = field(&rows, "open_mode").map(|s| s.to_string());
    let active_sessions = field(&rows, "sessions").and_then(|s| s.parse().ok());

    // Standby databases additionally report apply lag
    let apply_lag_minutes = if role.as_deref() == Some("PHYSICAL STANDBY") {
        let raw = capture::oracle_query(target, ORACLE_LAG_SQL)?;
        field(&parse_rows(&raw), "lag_minutes").and_then(|s| s.parse().ok())
    } else {
        None
    };

    Ok(DbHealth {
        target: target.name.clone(),
        engine: target.engine,
        status: HealthStatus::Up,
        role,
        open_mode,
        active_sessions,
        apply_lag_minutes,
        error: None,
    })
}

fn check_postgres(target: &DbTarget) -> Result<DbHealth, CaptureError> {
    let raw = capture::psql_query(target, PG_HEALTH_SQL)?;
    let rows = parse_rows(&raw);

    let in_recovery = field(&rows, "in_recovery")
        .map(|v| v == "t" || v == "true")
        .unwrap_or(false);

    Ok(DbHealth {
        target: target.name.clone(),
        engine: target.engine,
        status: HealthStatus::Up,
        role: Some(if in_recovery { "STANDBY" } else { "PRIMARY" }.to_string()),
        open_mode: field(&rows, "version").map(|v| format!("v{v}")),
        active_sessions: field(&rows, "sessions").and_then(|s| s.parse().ok()),
        apply_lag_minutes: None,
        error: None,
    })
}

/// Best-effort check whether a service is running: systemctl first,
/// pgrep as the fallback on hosts without systemd units for the tool.
pub fn service_running(name: &str) -> bool {
    let out = exec::run("systemctl", &["is-active", "--quiet", name], &[], None);
    match out.status {
        ExecStatus::Success => true,
        ExecStatus::NonZeroExit => false,
        // systemctl itself unavailable: fall back to process table
        _ => exec::run("pgrep", &["-x", name], &[], None).ok(),
    }
}

/// Aggregated health check result for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub host: String,
    pub databases: Vec<DbHealth>,
    pub listeners: Vec<ListenerHealth>,
}

impl HealthReport {
    pub fn databases_up(&self) -> usize {
        self.databases
            .iter()
            .filter(|d| d.status == HealthStatus::Up)
            .count()
    }

    pub fn listeners_up(&self) -> usize {
        self.listeners
            .iter()
            .filter(|l| l.status == HealthStatus::Up)
            .count()
    }

    pub fn all_healthy(&self) -> bool {
        self.databases_up() == self.databases.len()
            && self.listeners_up() == self.listeners.len()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Database Health Check Summary\nHost: {}\n", self.host));
        out.push_str(&format!(
            "Databases: {} of {} OK\n",
            self.databases_up(),
            self.databases.len()
        ));
        if !self.listeners.is_empty() {
            out.push_str(&format!(
                "Listeners: {} of {} OK\n",
                self.listeners_up(),
                self.listeners.len()
            ));
        }
        out.push('\n');

        for db in &self.databases {
            match db.status {
                HealthStatus::Up => {
                    out.push_str(&format!(
                        "  [UP]   {} ({}) role={} open_mode={}",
                        db.target,
                        db.engine,
                        db.role.as_deref().unwrap_or("-"),
                        db.open_mode.as_deref().unwrap_or("-")
                    ));
                    if let Some(sessions) = db.active_sessions {
                        out.push_str(&format!(" sessions={sessions}"));
                    }
                    if let Some(lag) = db.apply_lag_minutes {
                        out.push_str(&format!(" apply_lag_min={lag}"));
                    }
                    out.push('\n');
                }
                HealthStatus::Down => out.push_str(&format!(
                    "  [DOWN] {} ({}): {}\n",
                    db.target,
                    db.engine,
                    db.error.as_deref().unwrap_or("unknown error")
                )),
            }
        }
        for listener in &self.listeners {
            match listener.status {
                HealthStatus::Up => out.push_str(&format!(
                    "  [UP]   listener {} services: {}\n",
                    listener.name,
                    listener.services.join(", ")
                )),
                HealthStatus::Down => out.push_str(&format!(
                    "  [DOWN] listener {}: {}\n",
                    listener.name,
                    listener.error.as_deref().unwrap_or("unknown error")
                )),
            }
        }
        out
    }

    pub fn to_notification(&self) -> Notification {
        let severity = if self.all_healthy() {
            Severity::Info
        } else {
            Severity::Critical
        };
        Notification {
            title: format!(
                "Health check {}: {}/{} databases OK",
                self.host,
                self.databases_up(),
                self.databases.len()
            ),
            severity,
            body: self.render_text(),
        }
    }
}
