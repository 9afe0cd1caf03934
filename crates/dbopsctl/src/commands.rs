//! Command handlers for dbopsctl.
//!
//! Each handler returns the process exit code: 0 success / no findings,
//! 1 is reserved for errors (mapped in main), 2 drift detected or an
//! unhealthy component.

use anyhow::{bail, Context, Result};
use dbops_common::capture::{capture_snapshot, CaptureError, Snapshot};
use dbops_common::config::Config;
use dbops_common::drift;
use dbops_common::health::{self, HealthReport};
use dbops_common::ledger::{
    account_username, parse_roles, AccountStatus, DeleteOutcome, Ledger, UpsertOutcome,
};
use dbops_common::notify::{self, DeliveryOutcome, Notification, Severity};
use dbops_common::target::{DbTarget, Engine};
use dbops_common::vault::{
    generate_password, read_confirmed_secret, remove_artifact, TerminalSecretSource, Vault,
    GENERATED_PASSWORD_LEN,
};
use dbops_common::paths;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

fn load_config() -> Result<Config> {
    Config::load_default().context("loading configuration")
}

fn open_vault(config: &Config) -> Result<Vault> {
    let passphrase = std::env::var(&config.vault.passphrase_env).with_context(|| {
        format!(
            "vault passphrase not set (export {})",
            config.vault.passphrase_env
        )
    })?;
    Ok(Vault::new(config.vault.dir.clone(), passphrase))
}

fn print_outcomes(outcomes: &[DeliveryOutcome]) {
    for outcome in outcomes {
        if outcome.ok {
            println!("  {} {}", "sent".green(), outcome.channel);
        } else {
            println!(
                "  {} {} ({})",
                "failed".red(),
                outcome.channel,
                outcome.detail.as_deref().unwrap_or("-")
            );
        }
    }
}

// ============================================================================
// snapshot / drift
// ============================================================================

pub fn snapshot(target_name: &str, out: Option<PathBuf>) -> Result<i32> {
    let config = load_config()?;
    let target = config.target(target_name)?;

    let snapshot = capture_snapshot(target).context("capture failed")?;
    let path = match out {
        Some(path) => path,
        None => paths::snapshot_dir().join(format!(
            "{}_{}.json",
            target.name,
            snapshot.captured_at.format("%Y%m%d_%H%M%S")
        )),
    };
    snapshot.save(&path)?;

    println!(
        "{} {} parameters from {} -> {}",
        "captured".green(),
        snapshot.params.len(),
        target.name,
        path.display()
    );
    Ok(0)
}

pub fn drift(
    target_name: &str,
    baseline_path: &Path,
    update_baseline: bool,
    send: bool,
) -> Result<i32> {
    let config = load_config()?;
    let target = config.target(target_name)?;

    let baseline = Snapshot::load(baseline_path)
        .with_context(|| format!("loading baseline {}", baseline_path.display()))?;

    // A capture failure must surface as its own status, never as "no drift"
    let current = match capture_snapshot(target) {
        Ok(snapshot) => snapshot,
        Err(err @ CaptureError::ToolUnavailable { .. })
        | Err(err @ CaptureError::QueryFailed { .. }) => {
            bail!("capture error (not a drift result): {err}");
        }
        Err(err) => return Err(err).context("capture failed"),
    };

    let report = drift::compare(&baseline, &current);
    if report.is_clean() {
        println!("{}", report.render_text().green());
    } else {
        print!("{}", report.render_text());
    }

    if send {
        print_outcomes(&notify::dispatch(&config.notify, &report.to_notification()));
    }

    if update_baseline {
        current.save(baseline_path)?;
        println!("baseline updated: {}", baseline_path.display());
    }

    Ok(if report.is_clean() { 0 } else { 2 })
}

// ============================================================================
// account ledger
// ============================================================================

pub fn account_add(id: &str, roles_csv: &str, generate: bool) -> Result<i32> {
    let config = load_config()?;

    // Validate everything before any prompt or mutation
    let username = account_username(id)?;
    let roles = parse_roles(roles_csv)?;

    let mut ledger = Ledger::load(&config.ledger.path)?;

    // True no-op: same role set, still active. Reported distinctly, no
    // secret rotation, no backup, no write.
    if let Some(existing) = ledger.find(&username) {
        if existing.roles == roles && existing.status == AccountStatus::Active {
            println!("{} {} already up to date", "unchanged".yellow(), username);
            return Ok(0);
        }
    }

    let vault = open_vault(&config)?;
    let (secret, generated) = if generate {
        (generate_password(GENERATED_PASSWORD_LEN), true)
    } else {
        let mut source = TerminalSecretSource::new();
        (read_confirmed_secret(&mut source)?, false)
    };

    // Secret first, ledger second: an orphaned secret artifact is
    // harmless, a ledger entry without a secret is not.
    vault.store(&username, &secret)?;
    let outcome = ledger.add_or_update(&username, roles)?;

    match outcome {
        UpsertOutcome::Created => println!("{} {}", "created".green(), username),
        UpsertOutcome::Updated => println!("{} {}", "updated".green(), username),
        UpsertOutcome::Unchanged => println!("{} {}", "unchanged".yellow(), username),
    }
    if generated {
        println!("generated password: {secret}");
    }
    Ok(0)
}

pub fn account_delete(id: &str) -> Result<i32> {
    let config = load_config()?;
    let username = account_username(id)?;

    let mut ledger = Ledger::load(&config.ledger.path)?;
    match ledger.delete(&username)? {
        DeleteOutcome::Deactivated => {
            // Artifact removal is a plain file delete; no vault
            // passphrase is involved, so deactivation and secret
            // removal succeed or fail together
            remove_artifact(&config.vault.dir, &username)?;
            println!("{} {} (entry kept as history)", "deactivated".green(), username);
        }
        DeleteOutcome::AlreadyInactive => {
            println!("{} {} already inactive", "unchanged".yellow(), username);
        }
    }
    Ok(0)
}

pub fn account_list() -> Result<i32> {
    let config = load_config()?;
    let ledger = Ledger::load(&config.ledger.path)?;

    if ledger.accounts().is_empty() {
        println!("no managed accounts in {}", config.ledger.path.display());
        return Ok(0);
    }

    for account in ledger.accounts() {
        let roles = account
            .roles
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(",");
        match account.status {
            AccountStatus::Active => {
                println!("  {} {:<12} {}", "active".green(), account.username, roles)
            }
            AccountStatus::Inactive => {
                println!("  {} {:<12} {}", "inactive".red(), account.username, roles)
            }
        }
    }
    Ok(0)
}

// ============================================================================
// health / notifications
// ============================================================================

pub fn health(target_name: Option<&str>, discover: bool, send: bool) -> Result<i32> {
    let config = load_config()?;

    let mut targets: Vec<DbTarget> = match target_name {
        Some(name) => vec![config.target(name)?.clone()],
        None => config.targets.clone(),
    };

    // Instances in oratab but not in the config are checked with OS
    // authentication against the local host.
    if discover {
        let oratab = health::read_oratab(Path::new(health::ORATAB_PATH))
            .context("reading /etc/oratab")?;
        for entry in oratab {
            if targets.iter().any(|t| t.sid.as_deref() == Some(entry.sid.as_str())) {
                continue;
            }
            targets.push(DbTarget {
                name: entry.sid.clone(),
                engine: Engine::Oracle,
                host: dbops_common::target::hostname(),
                sid: Some(entry.sid),
                oracle_home: Some(entry.oracle_home),
                port: None,
                database: None,
                user: None,
                password_env: None,
            });
        }
    }

    if targets.is_empty() {
        bail!("no targets configured (and --discover not given)");
    }

    let mut databases = Vec::new();
    let mut listeners = Vec::new();
    for target in &targets {
        databases.push(health::check_database(target));

        if target.engine == Engine::Oracle {
            if let Some(home) = &target.oracle_home {
                for name in health::discover_listeners(home) {
                    if listeners.iter().any(|l: &health::ListenerHealth| l.name == name) {
                        continue;
                    }
                    listeners.push(health::check_listener(target, &name));
                }
            }
        }
    }

    let report = HealthReport {
        host: dbops_common::target::hostname(),
        databases,
        listeners,
    };
    print!("{}", report.render_text());

    if send {
        print_outcomes(&notify::dispatch(&config.notify, &report.to_notification()));
    }

    Ok(if report.all_healthy() { 0 } else { 2 })
}

pub fn notify_test(message: Option<&str>) -> Result<i32> {
    let config = load_config()?;

    let notification = Notification {
        title: format!("dbops test notification from {}", dbops_common::target::hostname()),
        severity: Severity::Info,
        body: message.unwrap_or("Notification channels are working.").to_string(),
    };

    let outcomes = notify::dispatch(&config.notify, &notification);
    if outcomes.is_empty() {
        println!("no notification channels configured");
        return Ok(0);
    }
    print_outcomes(&outcomes);

    Ok(if outcomes.iter().all(|o| o.ok) { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbops_common::ledger::Role;
    use dbops_common::vault;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_account_delete_without_vault_passphrase() {
        let dir = tempdir().unwrap();
        let ledger_path = dir.path().join("dba_accounts.yml");
        let vault_dir = dir.path().join("vault");

        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            format!(
                "[ledger]\npath = \"{}\"\n\n[vault]\ndir = \"{}\"\n",
                ledger_path.display(),
                vault_dir.display()
            ),
        )
        .unwrap();

        let mut ledger = Ledger::load(&ledger_path).unwrap();
        ledger.add_or_update("DBA_101", vec![Role::Dba]).unwrap();
        fs::create_dir_all(&vault_dir).unwrap();
        let artifact = vault::artifact_path(&vault_dir, "DBA_101");
        fs::write(&artifact, "{}").unwrap();

        // Deletion must work with no passphrase in the environment and
        // must not leave the row inactive with the artifact still there
        std::env::set_var("DBOPS_CONFIG", &config_path);
        std::env::remove_var("DBOPS_VAULT_PASS");
        let code = account_delete("101").unwrap();
        std::env::remove_var("DBOPS_CONFIG");

        assert_eq!(code, 0);
        assert!(!artifact.exists());
        let reloaded = Ledger::load(&ledger_path).unwrap();
        assert_eq!(
            reloaded.find("DBA_101").unwrap().status,
            AccountStatus::Inactive
        );
    }
}
