//! Access gate: the local convenience lock in front of the dashboard.
//!
//! The secret is compared in the clear against an embedded constant and
//! the "authenticated" marker is a plain persisted flag. It keeps casual
//! eyes off the dashboard on a shared device. It is not an access control.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::atomic_write_str;
use crate::error::GateError;

/// Key of the persisted "authenticated" marker.
pub const AUTH_FLAG_KEY: &str = "noile_auth";
/// Only this exact value counts as unlocked.
pub const AUTH_FLAG_VALUE: &str = "true";
/// Reference secret for [`AccessGate::attempt`].
pub const ACCESS_SECRET: &str = "noile2025";

/// Small persisted key/value store, the local-storage equivalent.
pub trait FlagStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
}

/// Flags kept as a JSON object in one file, written atomically.
pub struct FileFlagStore {
    path: PathBuf,
}

impl FileFlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at ~/.noilexel/flags.json.
    pub fn default_location() -> Result<Self, crate::error::ConfigError> {
        Ok(Self::new(crate::config::state_dir()?.join("flags.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HashMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Gate: ignoring unreadable flag file {}: {}", self.path.display(), e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    fn save(&self, flags: &HashMap<String, String>) -> Result<(), String> {
        let content =
            serde_json::to_string_pretty(flags).map_err(|e| format!("Serialize error: {}", e))?;
        atomic_write_str(&self.path, &content).map_err(|e| format!("Write error: {}", e))
    }
}

impl FlagStore for FileFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut flags = self.load();
        flags.insert(key.to_string(), value.to_string());
        self.save(&flags)
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut flags = self.load();
        if flags.remove(key).is_some() {
            self.save(&flags)?;
        }
        Ok(())
    }
}

impl<T: FlagStore + ?Sized> FlagStore for Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        (**self).remove(key)
    }
}

#[derive(Default)]
pub struct MemoryFlagStore {
    flags: Mutex<HashMap<String, String>>,
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.flags.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.flags.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        self.flags.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Locked,
    Unlocked,
}

pub struct AccessGate {
    state: GateState,
    store: Box<dyn FlagStore>,
}

impl AccessGate {
    /// Start unlocked only if the persisted marker is exactly `"true"`.
    pub fn open(store: Box<dyn FlagStore>) -> Self {
        let state = match store.get(AUTH_FLAG_KEY).as_deref() {
            Some(AUTH_FLAG_VALUE) => GateState::Unlocked,
            _ => GateState::Locked,
        };
        log::debug!("Gate: starting {:?}", state);
        Self { state, store }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == GateState::Locked
    }

    /// Unlock on an exact match with [`ACCESS_SECRET`].
    ///
    /// A wrong secret leaves the state untouched. If the marker cannot be
    /// written the gate still unlocks for this session and the store error
    /// is returned.
    pub fn attempt(&mut self, secret: &str) -> Result<(), GateError> {
        if secret != ACCESS_SECRET {
            log::warn!("Gate: rejected unlock attempt");
            return Err(GateError::Rejected);
        }
        self.state = GateState::Unlocked;
        log::info!("Gate: unlocked");
        self.store
            .set(AUTH_FLAG_KEY, AUTH_FLAG_VALUE)
            .map_err(GateError::Store)
    }

    /// Clear the marker and lock. Callers should then rebuild the dashboard.
    pub fn logout(&mut self) -> Result<(), GateError> {
        self.state = GateState::Locked;
        log::info!("Gate: locked");
        self.store.remove(AUTH_FLAG_KEY).map_err(GateError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> (AccessGate, Arc<MemoryFlagStore>) {
        let store = Arc::new(MemoryFlagStore::default());
        (AccessGate::open(Box::new(store.clone())), store)
    }

    #[test]
    fn starts_locked_without_marker() {
        let (gate, _) = gate();
        assert!(gate.is_locked());
    }

    #[test]
    fn only_exact_true_marker_unlocks() {
        let store = MemoryFlagStore::default();
        store.set(AUTH_FLAG_KEY, "TRUE").unwrap();
        assert!(AccessGate::open(Box::new(store)).is_locked());

        let store = MemoryFlagStore::default();
        store.set(AUTH_FLAG_KEY, "true").unwrap();
        assert_eq!(AccessGate::open(Box::new(store)).state(), GateState::Unlocked);
    }

    #[test]
    fn wrong_secret_never_unlocks() {
        let (mut gate, store) = gate();
        for guess in ["", "noile", "NOILE2025", "noile2025 "] {
            assert!(matches!(gate.attempt(guess), Err(GateError::Rejected)));
            assert!(gate.is_locked());
        }
        assert_eq!(store.get(AUTH_FLAG_KEY), None);
    }

    #[test]
    fn right_secret_unlocks_and_persists() {
        let (mut gate, store) = gate();
        gate.attempt(ACCESS_SECRET).unwrap();
        assert_eq!(gate.state(), GateState::Unlocked);
        assert_eq!(store.get(AUTH_FLAG_KEY).as_deref(), Some("true"));
    }

    #[test]
    fn logout_locks_and_clears_marker() {
        let (mut gate, store) = gate();
        gate.attempt(ACCESS_SECRET).unwrap();
        gate.logout().unwrap();
        assert!(gate.is_locked());
        assert_eq!(store.get(AUTH_FLAG_KEY), None);

        // Locked is re-enterable.
        gate.logout().unwrap();
        assert!(gate.is_locked());
    }

    #[test]
    fn wrong_secret_while_unlocked_keeps_unlocked() {
        let (mut gate, _) = gate();
        gate.attempt(ACCESS_SECRET).unwrap();
        assert!(gate.attempt("nope").is_err());
        assert_eq!(gate.state(), GateState::Unlocked);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");

        let mut gate = AccessGate::open(Box::new(FileFlagStore::new(&path)));
        gate.attempt(ACCESS_SECRET).unwrap();
        let reopened = AccessGate::open(Box::new(FileFlagStore::new(&path)));
        assert_eq!(reopened.state(), GateState::Unlocked);

        let mut reopened = reopened;
        reopened.logout().unwrap();
        assert!(AccessGate::open(Box::new(FileFlagStore::new(&path))).is_locked());
    }
}
