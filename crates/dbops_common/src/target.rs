//! Connection targets
//!
//! A `DbTarget` is an explicit connection descriptor passed into every
//! capture and health operation. Nothing in this crate mutates the
//! process environment; Oracle's `ORACLE_HOME`/`ORACLE_SID` are set on
//! the child command only.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database engine flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Oracle,
    Postgres,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Oracle => "oracle",
            Engine::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection descriptor for one managed database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbTarget {
    /// Short name used in reports and snapshot filenames
    pub name: String,

    /// Engine flavor
    pub engine: Engine,

    /// Host the database runs on (identity only; capture runs locally)
    #[serde(default = "default_host")]
    pub host: String,

    /// Oracle SID (oracle targets)
    #[serde(default)]
    pub sid: Option<String>,

    /// Oracle software home (oracle targets)
    #[serde(default)]
    pub oracle_home: Option<String>,

    /// Server port (postgres targets)
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name (postgres targets)
    #[serde(default)]
    pub database: Option<String>,

    /// Connect user (postgres targets; oracle uses OS authentication)
    #[serde(default)]
    pub user: Option<String>,

    /// Name of the environment variable holding the connect password
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_host() -> String {
    hostname()
}

/// Best-effort local hostname
pub fn hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl DbTarget {
    /// Environment variables for a child command talking to this target
    pub fn command_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        match self.engine {
            Engine::Oracle => {
                if let Some(home) = &self.oracle_home {
                    env.push(("ORACLE_HOME".to_string(), home.clone()));
                    env.push(("LD_LIBRARY_PATH".to_string(), format!("{}/lib", home)));
                }
                if let Some(sid) = &self.sid {
                    env.push(("ORACLE_SID".to_string(), sid.clone()));
                }
            }
            Engine::Postgres => {
                if let Some(var) = &self.password_env {
                    if let Ok(password) = std::env::var(var) {
                        env.push(("PGPASSWORD".to_string(), password));
                    }
                }
            }
        }
        env
    }

    /// Path to a binary under ORACLE_HOME/bin, falling back to PATH lookup
    pub fn oracle_bin(&self, tool: &str) -> String {
        match &self.oracle_home {
            Some(home) => format!("{}/bin/{}", home, tool),
            None => tool.to_string(),
        }
    }
}
