//! Settings store: TOML config file with partial-update saves.
//!
//! A missing config file is an empty config, not an error; a malformed one
//! is logged and treated as empty so a bad edit never takes the tool down.
//! Passwords in persisted host records go to the platform secret store when
//! one is available, and are kept in clear text otherwise — a stated
//! caveat, not hidden behavior.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DevhostError, DevhostResult};
use devhost_protocol::{AuthMethod, HostConfig};

/// Service name under which passwords are held in the platform secret store.
const SECRET_SERVICE: &str = "devhost";

/// Persisted settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Known remote hosts.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// Default timeout for remote commands, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_timeout_ms: Option<u64>,
}

/// Partial update; `None` fields leave the current value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub hosts: Option<Vec<HostConfig>>,
    #[serde(default)]
    pub exec_timeout_ms: Option<u64>,
}

/// Settings store bound to one config file.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store at the default location (`<config dir>/devhost/config.toml`).
    pub fn new() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: base.join("devhost").join("config.toml"),
        }
    }

    /// Store bound to an explicit path (tests, alternate profiles).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current settings. Missing file → defaults; malformed file →
    /// defaults with a warning.
    pub fn load(&self) -> Settings {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Settings::default(),
        };
        match toml::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("malformed config at {:?}: {e}", self.path);
                Settings::default()
            }
        }
    }

    /// Merge a partial update over the current settings and persist.
    pub fn save(&self, update: SettingsUpdate) -> DevhostResult<()> {
        let mut settings = self.load();
        if let Some(hosts) = update.hosts {
            settings.hosts = hosts;
        }
        if let Some(timeout) = update.exec_timeout_ms {
            settings.exec_timeout_ms = Some(timeout);
        }
        self.write(&settings)
    }

    /// Insert or replace a host record, moving its password into the
    /// platform secret store when one is available.
    pub fn store_host(&self, mut host: HostConfig) -> DevhostResult<()> {
        if let AuthMethod::Password { password } = &host.auth
            && !host.password_encrypted
        {
            match keyring::Entry::new(SECRET_SERVICE, &host.id)
                .and_then(|entry| entry.set_password(password))
            {
                Ok(()) => {
                    host.auth = AuthMethod::Password {
                        password: String::new(),
                    };
                    host.password_encrypted = true;
                }
                Err(e) => {
                    warn!(
                        "secret store unavailable for host '{}', persisting password in clear text: {e}",
                        host.id
                    );
                }
            }
        }

        let mut settings = self.load();
        settings.hosts.retain(|existing| existing.id != host.id);
        settings.hosts.push(host);
        self.write(&settings)
    }

    /// Remove a host record and its secret-store entry, if any.
    pub fn remove_host(&self, id: &str) -> DevhostResult<()> {
        if let Ok(entry) = keyring::Entry::new(SECRET_SERVICE, id) {
            let _ = entry.delete_credential();
        }
        let mut settings = self.load();
        settings.hosts.retain(|existing| existing.id != id);
        self.write(&settings)
    }

    fn write(&self, settings: &Settings) -> DevhostResult<()> {
        let rendered = toml::to_string_pretty(settings)
            .map_err(|e| DevhostError::InvalidInput(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, rendered)?;
        info!("settings written to {:?}", self.path);
        Ok(())
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::with_path(dir.path().join("config.toml"));
        let settings = store.load();
        assert!(settings.hosts.is_empty());
        assert!(settings.exec_timeout_ms.is_none());
    }

    #[test]
    fn test_partial_save_preserves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::with_path(dir.path().join("config.toml"));

        store
            .save(SettingsUpdate {
                exec_timeout_ms: Some(15_000),
                ..Default::default()
            })
            .unwrap();
        store
            .save(SettingsUpdate {
                hosts: Some(vec![HostConfig::with_key_file(
                    "vps",
                    "example.org",
                    "deploy",
                    "~/.ssh/id_ed25519",
                )]),
                ..Default::default()
            })
            .unwrap();

        let settings = store.load();
        assert_eq!(settings.exec_timeout_ms, Some(15_000));
        assert_eq!(settings.hosts.len(), 1);
        assert_eq!(settings.hosts[0].id, "vps");
    }

    #[test]
    fn test_malformed_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "hosts = not toml [").unwrap();
        let store = SettingsStore::with_path(&path);
        assert!(store.load().hosts.is_empty());
    }
}
