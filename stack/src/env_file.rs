//! Reader for the flat `KEY=value` environment file shared with Compose.
//!
//! Files holding secrets may be Ansible Vault encrypted; those are
//! decrypted with the password named by `ANSIBLE_VAULT_PASSWORD_FILE`.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const VAULT_HEADER: &str = "$ANSIBLE_VAULT;";
pub const VAULT_PASSWORD_FILE_VAR: &str = "ANSIBLE_VAULT_PASSWORD_FILE";

#[derive(Error, Debug)]
pub enum EnvFileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is vault encrypted but ANSIBLE_VAULT_PASSWORD_FILE is not set")]
    VaultPasswordRequired { path: String },

    #[error("Failed to read vault password file {path}: {source}")]
    VaultPassword {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decrypt {path}: {reason}")]
    Decrypt { path: String, reason: String },
}

pub type EnvFileResult<T> = Result<T, EnvFileError>;

/// Parsed environment file. Entries keep file order; when a key repeats the
/// last occurrence wins, matching how Compose reads the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    /// Parse file content. Never fails: lines that are not assignments are
    /// ignored.
    pub fn parse(content: &str) -> Self {
        let entries = content.lines().filter_map(parse_line).collect();
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Load a file that may be vault encrypted, taking the password file
    /// from `ANSIBLE_VAULT_PASSWORD_FILE`
    pub fn load_secrets(path: impl AsRef<Path>) -> EnvFileResult<Self> {
        let password_file = std::env::var_os(VAULT_PASSWORD_FILE_VAR).map(PathBuf::from);
        Self::load_with_password_file(path, password_file.as_deref())
    }

    /// Plain files parse as-is. A file starting with the vault header is
    /// decrypted with the password in `password_file` (surrounding
    /// whitespace stripped).
    pub fn load_with_password_file(
        path: impl AsRef<Path>,
        password_file: Option<&Path>,
    ) -> EnvFileResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| EnvFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if !is_vault(&content) {
            return Ok(Self::parse(&content));
        }

        let password_file = password_file.ok_or_else(|| EnvFileError::VaultPasswordRequired {
            path: path.display().to_string(),
        })?;
        let password = std::fs::read_to_string(password_file).map_err(|source| {
            EnvFileError::VaultPassword {
                path: password_file.display().to_string(),
                source,
            }
        })?;

        let plain = ansible_vault::decrypt_vault(content.as_bytes(), password.trim()).map_err(
            |e| EnvFileError::Decrypt {
                path: path.display().to_string(),
                reason: e.to_string(),
            },
        )?;
        debug!(path = %path.display(), "Decrypted vault env file");
        Ok(Self::parse(&String::from_utf8_lossy(&plain)))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn is_vault(content: &str) -> bool {
    content.trim_start().starts_with(VAULT_HEADER)
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if !is_valid_key(key) {
        return None;
    }

    Some((key.to_string(), unquote(value.trim())))
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> String {
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }

    // unquoted values may carry a trailing comment
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}
