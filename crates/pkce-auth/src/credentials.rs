//! Credential storage for OAuth tokens and the pending PKCE verifier
//!
//! A small key-value store over four named slots, backed by a JSON file. All
//! writes use atomic temp-file + rename so a crash never leaves a torn file,
//! and a batch of slot changes is persisted as one write: either every change
//! lands or none does. Reads and writes are synchronous, so a write is visible
//! to the next read as soon as the call returns.
//!
//! The file is what carries the verifier from `begin_login` to the callback,
//! which may run in a fresh process.
//!
//! This is not a security boundary. The file is scoped to one user profile and
//! protected only by its 0600 permissions; anyone who can read it can use the
//! tokens in it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Named storage slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    AccessToken,
    RefreshToken,
    ExpiresAt,
    PendingVerifier,
}

impl Slot {
    pub const ALL: [Slot; 4] = [
        Slot::AccessToken,
        Slot::RefreshToken,
        Slot::ExpiresAt,
        Slot::PendingVerifier,
    ];

    /// Key used in the credential file.
    pub fn key(self) -> &'static str {
        match self {
            Slot::AccessToken => "access_token",
            Slot::RefreshToken => "refresh_token",
            Slot::ExpiresAt => "expires_at",
            Slot::PendingVerifier => "pending_verifier",
        }
    }
}

/// The persisted part of a token set.
///
/// `expires` is a unix timestamp in milliseconds (absolute, not a delta),
/// computed locally from `expires_in` when the token was issued or refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access: String,
    pub refresh: String,
    pub expires: u64,
}

type SlotMap = BTreeMap<String, String>;

/// Thread-safe slot store.
///
/// `path` is `None` for a store that lives only in memory.
#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: Mutex<SlotMap>,
}

impl CredentialStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (never logged in).
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Storage(format!("reading credential file: {e}")))?;
            let slots: SlotMap = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), slots = slots.len(), "loaded credentials");
            slots
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            let slots = SlotMap::new();
            write_atomic(&path, &slots)?;
            slots
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(SlotMap::new()),
        }
    }

    pub fn get(&self, slot: Slot) -> Option<String> {
        self.lock().get(slot.key()).cloned()
    }

    pub fn set(&self, slot: Slot, value: &str) -> Result<()> {
        self.apply(&[(slot, Some(value))])
    }

    pub fn delete(&self, slot: Slot) -> Result<()> {
        self.apply(&[(slot, None)])
    }

    /// Apply a batch of slot changes (`None` deletes) as one unit.
    ///
    /// The new state is persisted before it replaces the in-memory state, so a
    /// failed write leaves every slot as it was. Nothing is written when the
    /// batch changes nothing.
    pub fn apply(&self, changes: &[(Slot, Option<&str>)]) -> Result<()> {
        let mut state = self.lock();
        self.commit(&mut state, changes)
    }

    /// Build, persist, then swap in the next state. Caller holds the lock.
    fn commit(&self, state: &mut SlotMap, changes: &[(Slot, Option<&str>)]) -> Result<()> {
        let mut next = state.clone();
        for (slot, value) in changes {
            match value {
                Some(v) => {
                    next.insert(slot.key().to_string(), v.to_string());
                }
                None => {
                    next.remove(slot.key());
                }
            }
        }
        if next == *state {
            return Ok(());
        }
        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
        }
        *state = next;
        Ok(())
    }

    /// Read the stored token triple.
    ///
    /// Returns `None` when there is no access token. A missing or unreadable
    /// expiry is treated as already expired so the token gets refreshed.
    pub fn load_credential(&self) -> Option<Credential> {
        let state = self.lock();
        let access = state.get(Slot::AccessToken.key())?.clone();
        let refresh = state
            .get(Slot::RefreshToken.key())
            .cloned()
            .unwrap_or_default();
        let expires = state
            .get(Slot::ExpiresAt.key())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        Some(Credential {
            access,
            refresh,
            expires,
        })
    }

    /// Write access token, refresh token and expiry together.
    pub fn save_credential(&self, credential: &Credential) -> Result<()> {
        let mut state = self.lock();
        self.commit_credential(&mut state, credential)
    }

    /// Save `credential` only if the stored session still uses
    /// `expected_refresh`. Check and write happen under one lock.
    ///
    /// Returns `false`, writing nothing, when the session was ended or
    /// replaced in the meantime.
    pub fn save_credential_if_refresh(
        &self,
        expected_refresh: &str,
        credential: &Credential,
    ) -> Result<bool> {
        let mut state = self.lock();
        let current = state.contains_key(Slot::AccessToken.key())
            && state
                .get(Slot::RefreshToken.key())
                .map_or("", String::as_str)
                == expected_refresh;
        if !current {
            return Ok(false);
        }
        self.commit_credential(&mut state, credential)?;
        Ok(true)
    }

    fn commit_credential(&self, state: &mut SlotMap, credential: &Credential) -> Result<()> {
        let expires = credential.expires.to_string();
        self.commit(
            state,
            &[
                (Slot::AccessToken, Some(credential.access.as_str())),
                (Slot::RefreshToken, Some(credential.refresh.as_str())),
                (Slot::ExpiresAt, Some(expires.as_str())),
            ],
        )?;
        debug!("updated stored credential");
        Ok(())
    }

    /// Remove every slot.
    ///
    /// Memory is cleared even when persisting fails, so this process stops
    /// handing out the tokens; the error reports that the file may still
    /// hold them.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        if state.is_empty() {
            return Ok(());
        }
        state.clear();
        match &self.path {
            Some(path) => write_atomic(path, &state),
            None => Ok(()),
        }
    }

    /// Whether no slot holds a value.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, SlotMap> {
        // A panic while holding the lock cannot leave a half-applied batch:
        // `apply` only assigns a fully built map.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Write slots to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains OAuth tokens.
fn write_atomic(path: &Path, data: &SlotMap) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Storage(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)
            .map_err(|e| Error::Storage(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Storage(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
