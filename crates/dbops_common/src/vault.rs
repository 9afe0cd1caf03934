//! Secret vault
//!
//! One encrypted artifact per managed account, sealed with a key derived
//! from the operator's vault passphrase (Argon2id) and ChaCha20-Poly1305.
//! Plaintext never touches disk; sealing happens in memory and the file
//! holds only salt, nonce and ciphertext.
//!
//! Interactive entry goes through the `SecretSource` seam so the
//! provisioning logic is testable without a terminal.

use crate::paths;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Characters used for generated passwords (mirrors operator habit:
/// letters, digits and a small punctuation set accepted by both engines)
const PASSWORD_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()";

/// Default generated password length
pub const GENERATED_PASSWORD_LEN: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("password entries did not match")]
    ConfirmationMismatch,

    #[error("empty secret rejected")]
    EmptySecret,

    #[error("no secret stored for {0}")]
    NotFound(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("seal/open failed: wrong passphrase or corrupted artifact")]
    Crypto,

    #[error("artifact format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("malformed artifact field: {0}")]
    Encoding(#[from] hex::FromHexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where an interactive secret comes from. The terminal implementation
/// hides input; tests supply a scripted source.
pub trait SecretSource {
    fn read_secret(&mut self, prompt: &str) -> Result<String, VaultError>;
}

/// Reads hidden input from the controlling terminal
pub struct TerminalSecretSource {
    term: console::Term,
}

impl TerminalSecretSource {
    pub fn new() -> Self {
        Self {
            term: console::Term::stderr(),
        }
    }
}

impl Default for TerminalSecretSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretSource for TerminalSecretSource {
    fn read_secret(&mut self, prompt: &str) -> Result<String, VaultError> {
        self.term.write_str(prompt)?;
        let line = self.term.read_secure_line()?;
        Ok(line)
    }
}

/// Prompt twice and require both entries to match. Mismatch is a hard
/// validation failure; nothing is written.
pub fn read_confirmed_secret(source: &mut dyn SecretSource) -> Result<String, VaultError> {
    let first = source.read_secret("New password: ")?;
    if first.is_empty() {
        return Err(VaultError::EmptySecret);
    }
    let second = source.read_secret("Confirm password: ")?;
    if first != second {
        return Err(VaultError::ConfirmationMismatch);
    }
    Ok(first)
}

/// Generate a random password from the fixed charset, uniformly
pub fn generate_password(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_CHARSET.len());
            PASSWORD_CHARSET[idx] as char
        })
        .collect()
}

/// On-disk shape of one sealed secret
#[derive(Debug, Serialize, Deserialize)]
struct SealedSecret {
    salt: String,
    nonce: String,
    ciphertext: String,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], VaultError> {
    let mut key = [0u8; KEY_LEN];
    argon2::Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

fn seal(passphrase: &str, plaintext: &str) -> Result<SealedSecret, VaultError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| VaultError::Crypto)?;

    Ok(SealedSecret {
        salt: hex::encode(salt),
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
    })
}

fn open(passphrase: &str, sealed: &SealedSecret) -> Result<String, VaultError> {
    let salt = hex::decode(&sealed.salt)?;
    let nonce = hex::decode(&sealed.nonce)?;
    let ciphertext = hex::decode(&sealed.ciphertext)?;

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| VaultError::Crypto)?;

    String::from_utf8(plaintext).map_err(|_| VaultError::Crypto)
}

/// Path of one account's sealed artifact under a vault directory
pub fn artifact_path(dir: &std::path::Path, username: &str) -> PathBuf {
    dir.join(format!("{username}.sec"))
}

/// Remove an account's artifact; true if one existed. Deletion needs no
/// passphrase — only sealing and opening do.
pub fn remove_artifact(dir: &std::path::Path, username: &str) -> Result<bool, VaultError> {
    let path = artifact_path(dir, username);
    let existed = path.exists();
    paths::safe_delete(&path)?;
    if existed {
        info!(username, "secret removed");
    }
    Ok(existed)
}

/// Per-account secret store
pub struct Vault {
    dir: PathBuf,
    passphrase: String,
}

impl Vault {
    pub fn new(dir: PathBuf, passphrase: String) -> Self {
        Self { dir, passphrase }
    }

    fn artifact_path(&self, username: &str) -> PathBuf {
        artifact_path(&self.dir, username)
    }

    /// Seal and store the secret for one account (atomic write)
    pub fn store(&self, username: &str, secret: &str) -> Result<PathBuf, VaultError> {
        if secret.is_empty() {
            return Err(VaultError::EmptySecret);
        }
        let sealed = seal(&self.passphrase, secret)?;
        let json = serde_json::to_string_pretty(&sealed)?;
        let path = self.artifact_path(username);
        paths::atomic_write_str(&path, &json)?;
        info!(username, path = %path.display(), "secret sealed");
        Ok(path)
    }

    /// Decrypt the stored secret for one account
    pub fn retrieve(&self, username: &str) -> Result<String, VaultError> {
        let path = self.artifact_path(username);
        if !path.exists() {
            return Err(VaultError::NotFound(username.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        let sealed: SealedSecret = serde_json::from_str(&content)?;
        open(&self.passphrase, &sealed)
    }

    /// Remove the artifact; true if one existed
    pub fn remove(&self, username: &str) -> Result<bool, VaultError> {
        remove_artifact(&self.dir, username)
    }

    pub fn exists(&self, username: &str) -> bool {
        self.artifact_path(username).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Scripted secret source for tests
    struct ScriptedSource {
        entries: Vec<String>,
    }

    impl SecretSource for ScriptedSource {
        fn read_secret(&mut self, _prompt: &str) -> Result<String, VaultError> {
            if self.entries.is_empty() {
                return Err(VaultError::EmptySecret);
            }
            Ok(self.entries.remove(0))
        }
    }

    fn scripted(entries: &[&str]) -> ScriptedSource {
        ScriptedSource {
            entries: entries.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_seal_and_open_round_trip() {
        let sealed = seal("vault-pass", "s3cr3t").unwrap();
        assert_eq!(open("vault-pass", &sealed).unwrap(), "s3cr3t");
    }

    #[test]
    fn test_open_with_wrong_passphrase_fails() {
        let sealed = seal("vault-pass", "s3cr3t").unwrap();
        assert!(matches!(
            open("wrong", &sealed),
            Err(VaultError::Crypto)
        ));
    }

    #[test]
    fn test_sealed_artifact_never_contains_plaintext() {
        let sealed = seal("vault-pass", "visible-secret").unwrap();
        let json = serde_json::to_string(&sealed).unwrap();
        assert!(!json.contains("visible-secret"));
    }

    #[test]
    fn test_store_retrieve_remove() {
        let dir = tempdir().unwrap();
        let vault = Vault::new(dir.path().to_path_buf(), "vault-pass".to_string());

        vault.store("DBA_101", "s3cr3t").unwrap();
        assert!(vault.exists("DBA_101"));
        assert_eq!(vault.retrieve("DBA_101").unwrap(), "s3cr3t");

        assert!(vault.remove("DBA_101").unwrap());
        assert!(!vault.exists("DBA_101"));
        assert!(!vault.remove("DBA_101").unwrap());
    }

    #[test]
    fn test_retrieve_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let vault = Vault::new(dir.path().to_path_buf(), "vault-pass".to_string());
        assert!(matches!(
            vault.retrieve("DBA_999"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_confirmation_mismatch_is_hard_failure() {
        let mut source = scripted(&["first", "second"]);
        assert!(matches!(
            read_confirmed_secret(&mut source),
            Err(VaultError::ConfirmationMismatch)
        ));
    }

    #[test]
    fn test_confirmed_secret_accepted() {
        let mut source = scripted(&["hunter2hunter2", "hunter2hunter2"]);
        assert_eq!(read_confirmed_secret(&mut source).unwrap(), "hunter2hunter2");
    }

    #[test]
    fn test_empty_secret_rejected_before_confirmation() {
        let mut source = scripted(&["", "anything"]);
        assert!(matches!(
            read_confirmed_secret(&mut source),
            Err(VaultError::EmptySecret)
        ));
    }

    #[test]
    fn test_remove_artifact_without_passphrase() {
        let dir = tempdir().unwrap();
        let vault = Vault::new(dir.path().to_path_buf(), "vault-pass".to_string());
        vault.store("DBA_101", "s3cr3t").unwrap();

        // Deletion is a pure filesystem operation, no passphrase in sight
        assert!(remove_artifact(dir.path(), "DBA_101").unwrap());
        assert!(!vault.exists("DBA_101"));
        assert!(!remove_artifact(dir.path(), "DBA_101").unwrap());
    }

    #[test]
    fn test_generated_password_length_and_charset() {
        let password = generate_password(GENERATED_PASSWORD_LEN);
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
        assert!(password
            .bytes()
            .all(|b| PASSWORD_CHARSET.contains(&b)));
    }

    #[test]
    fn test_generated_passwords_use_the_whole_charset() {
        // 1000 uniform draws over 72 symbols should touch most of them;
        // a skewed generator concentrates on a narrow band instead
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10 {
            seen.extend(generate_password(100).bytes());
        }
        assert!(seen.len() > 50, "only {} distinct symbols drawn", seen.len());
    }
}
