//! Host configuration for the word ledger tracker.
//!
//! This file lives on the local machine, outside the synced folder.  The
//! synced folder itself carries only the shared document and device logs;
//! anything machine-specific (paths, timing) stays here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Synced folder holding the shared document and device logs.
    pub shared_dir: PathBuf,
    /// Local, unsynced file that pins this device's identity.
    pub local_state_path: PathBuf,
    /// Quiet time after the last edit before the device log is flushed.
    pub flush_debounce_ms: u64,
    /// Quiet time before change subscribers are notified.
    pub view_debounce_ms: u64,
    /// How often the other devices' logs are re-read.
    pub refresh_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from("."),
            local_state_path: PathBuf::from(".wordledger/device.toml"),
            flush_debounce_ms: 2_000,
            view_debounce_ms: 250,
            refresh_interval_secs: 30,
        }
    }
}

impl TrackerConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Clamp the timing knobs into ranges the tracker can run with: both
    /// debounces at least 100ms, and the refresh interval longer than the
    /// flush debounce.
    pub fn validated(mut self) -> Self {
        self.flush_debounce_ms = self.flush_debounce_ms.max(100);
        self.view_debounce_ms = self.view_debounce_ms.max(100);
        self.refresh_interval_secs = self
            .refresh_interval_secs
            .max(self.flush_debounce_ms / 1000 + 1);
        self
    }
}
