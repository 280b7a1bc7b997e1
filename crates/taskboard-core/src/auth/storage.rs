//! Durable persistence for the current token pair.
//!
//! Every backend stores exactly two values under fixed names,
//! [`ACCESS_TOKEN_KEY`] and [`REFRESH_TOKEN_KEY`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};

use super::TokenPair;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name
const SERVICE_NAME: &str = "taskboard";

/// Synchronous key/value persistence of the token pair.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<Option<TokenPair>>;
    fn save(&self, tokens: &TokenPair) -> Result<()>;
    /// Remove everything. Clearing an empty storage is not an error.
    fn clear(&self) -> Result<()>;
}

/// Assemble a pair from the two keyed values; a half-written pair is useless.
fn pair_from_parts(access: Option<String>, refresh: Option<String>) -> Option<TokenPair> {
    match (access, refresh) {
        (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
            Some(TokenPair::new(access, refresh))
        }
        _ => None,
    }
}

// ============================================================================
// File
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(rename = "accessToken", default)]
    access_token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

/// JSON file in the cache directory.
pub struct FileStorage {
    cache_dir: PathBuf,
}

impl FileStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Result<Option<TokenPair>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let file: SessionFile =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(pair_from_parts(file.access_token, file.refresh_token))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let file = SessionFile {
            access_token: Some(tokens.access_token.clone()),
            refresh_token: Some(tokens.refresh_token.clone()),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        std::fs::write(&path, contents).context("Failed to write session file")?;
        restrict_permissions(&path);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!(error = %e, "Failed to restrict session file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) {}

// ============================================================================
// Keyring
// ============================================================================

/// OS keychain entries, one per key.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for KeyringStorage {
    fn load(&self) -> Result<Option<TokenPair>> {
        Ok(pair_from_parts(
            self.read(ACCESS_TOKEN_KEY)?,
            self.read(REFRESH_TOKEN_KEY)?,
        ))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        self.entry(ACCESS_TOKEN_KEY)?
            .set_password(&tokens.access_token)
            .context("Failed to store access token in keychain")?;
        self.entry(REFRESH_TOKEN_KEY)?
            .set_password(&tokens.refresh_token)
            .context("Failed to store refresh token in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.remove(ACCESS_TOKEN_KEY)?;
        self.remove(REFRESH_TOKEN_KEY)
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<&'static str, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<Option<TokenPair>> {
        Ok(pair_from_parts(
            self.get(ACCESS_TOKEN_KEY),
            self.get(REFRESH_TOKEN_KEY),
        ))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(ACCESS_TOKEN_KEY, tokens.access_token.clone());
        values.insert(REFRESH_TOKEN_KEY, tokens.refresh_token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}
