//! Configuration loader (TOML)
//!
//! Configuration lives in /etc/dbops/config.toml, overridable with the
//! DBOPS_CONFIG environment variable. It declares the managed targets,
//! ledger and vault locations and the notification channels. A missing
//! file yields the defaults so read-only commands still work.

use crate::paths;
use crate::target::DbTarget;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// System configuration file
pub const CONFIG_FILE: &str = "/etc/dbops/config.toml";

/// Environment override for the config path
pub const CONFIG_ENV: &str = "DBOPS_CONFIG";

/// Environment variable holding the vault passphrase
pub const VAULT_PASS_ENV: &str = "DBOPS_VAULT_PASS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamsConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub to: Vec<String>,
    #[serde(default = "default_email_from")]
    pub from: String,
    #[serde(default = "default_sendmail")]
    pub sendmail: String,
}

fn default_email_from() -> String {
    format!("dbops@{}", crate::target::hostname())
}

fn default_sendmail() -> String {
    "/usr/sbin/sendmail".to_string()
}

/// Notification channels; absent sections mean the channel is off
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub teams: Option<TeamsConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

fn default_ledger_path() -> PathBuf {
    paths::ledger_file()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_vault_dir")]
    pub dir: PathBuf,
    /// Environment variable the vault passphrase is read from
    #[serde(default = "default_vault_pass_env")]
    pub passphrase_env: String,
}

fn default_vault_dir() -> PathBuf {
    paths::vault_dir()
}

fn default_vault_pass_env() -> String {
    VAULT_PASS_ENV.to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            dir: default_vault_dir(),
            passphrase_env: default_vault_pass_env(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Managed database targets
    #[serde(default, rename = "target")]
    pub targets: Vec<DbTarget>,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    /// Resolve the config path, honoring the environment override
    pub fn default_path() -> PathBuf {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => PathBuf::from(CONFIG_FILE),
        }
    }

    /// Load from the default location; a missing file yields defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), targets = config.targets.len(), "config loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "target.name must not be empty".to_string(),
                ));
            }
            match target.engine {
                crate::target::Engine::Oracle => {
                    if target.sid.as_deref().unwrap_or("").trim().is_empty() {
                        return Err(ConfigError::Validation(format!(
                            "oracle target '{}' needs a sid",
                            target.name
                        )));
                    }
                }
                crate::target::Engine::Postgres => {}
            }
        }

        let mut names: Vec<&str> = self.targets.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.targets.len() {
            return Err(ConfigError::Validation(
                "duplicate target names".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a target by name
    pub fn target(&self, name: &str) -> Result<&DbTarget, ConfigError> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Engine;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[[target]]
name = "prod01"
engine = "oracle"
host = "db01.example.com"
sid = "ORCL"
oracle_home = "/u01/app/oracle/product/19.0.0/dbhome_1"

[[target]]
name = "pg01"
engine = "postgres"
host = "db02.example.com"
port = 5432
database = "postgres"
user = "postgres"
password_env = "PGPASSWORD_PG01"

[ledger]
path = "/srv/dbops/dba_accounts.yml"

[notify.slack]
webhook_url = "https://hooks.slack.com/services/T000/B000/XXXX"

[notify.email]
to = ["dba-team@example.com"]
from = "dbops@db01"
"#;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample_config() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].engine, Engine::Oracle);
        assert_eq!(config.targets[1].port, Some(5432));
        assert_eq!(
            config.ledger.path,
            PathBuf::from("/srv/dbops/dba_accounts.yml")
        );
        assert!(config.notify.slack.is_some());
        assert!(config.notify.teams.is_none());
        assert_eq!(config.notify.email.as_ref().unwrap().sendmail, "/usr/sbin/sendmail");
    }

    #[test]
    fn test_target_lookup() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();
        assert!(config.target("prod01").is_ok());
        assert!(matches!(
            config.target("nope"),
            Err(ConfigError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_oracle_target_without_sid_rejected() {
        let file = write_config(
            "[[target]]\nname = \"bad\"\nengine = \"oracle\"\nhost = \"h\"\n",
        );
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_target_names_rejected() {
        let file = write_config(
            "[[target]]\nname = \"a\"\nengine = \"postgres\"\n\n[[target]]\nname = \"a\"\nengine = \"postgres\"\n",
        );
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_config("");
        let config = Config::load(file.path()).unwrap();
        assert!(config.targets.is_empty());
        assert_eq!(config.vault.passphrase_env, VAULT_PASS_ENV);
    }
}
