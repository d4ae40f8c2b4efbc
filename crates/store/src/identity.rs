//! Who this device is: a random id minted once per install, an optional
//! display name, and the device-local file both live in.  That file must sit
//! outside the synced folder; two devices sharing it would collapse into
//! one identity and overwrite each other's logs.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Stable identity of this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// 32 hex characters, unique across the user's devices.
    pub id: String,
    /// User-facing display name, if one was ever set.
    pub name: Option<String>,
}

impl DeviceIdentity {
    /// Stem of this device's log file: the slugified display name, or the
    /// raw id when no usable name is set.
    pub fn file_stem(&self) -> String {
        match self.name.as_deref().map(slugify) {
            Some(slug) if !slug.is_empty() => slug,
            _ => self.id.clone(),
        }
    }
}

/// Lowercase `name`, collapse every run of non-alphanumeric characters to a
/// single `-`, and drop leading/trailing dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut gap = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if gap && !slug.is_empty() {
                slug.push('-');
            }
            gap = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            gap = true;
        }
    }
    slug
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LocalDeviceState {
    device_id: String,
    device_name: Option<String>,
}

/// Tiny TOML store for the identity, on device-local (never synced) disk.
///
/// Reads degrade: a missing or unreadable file starts fresh with a newly
/// minted id.  The old device log, if any, keeps merging like any other
/// device's, so no words are lost when an id has to be re-minted.
#[derive(Debug, Clone)]
pub struct LocalDeviceStore {
    path: PathBuf,
}

impl LocalDeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the stored identity, minting and persisting a fresh id when
    /// none exists yet.  A failed persist is logged and the id stays
    /// session-scoped.
    pub fn resolve(&self) -> DeviceIdentity {
        let (state, minted) = self.load_or_mint();
        if minted {
            self.persist(&state);
        }
        DeviceIdentity {
            id: state.device_id,
            name: state.device_name,
        }
    }

    /// Store a new display name.  `None` or a blank string clears it.
    pub fn set_name(&self, name: Option<&str>) -> DeviceIdentity {
        let (mut state, _) = self.load_or_mint();
        state.device_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        self.persist(&state);
        DeviceIdentity {
            id: state.device_id,
            name: state.device_name,
        }
    }

    fn load_or_mint(&self) -> (LocalDeviceState, bool) {
        let mut state = match fs::read_to_string(&self.path) {
            Ok(raw) => match toml::from_str::<LocalDeviceState>(&raw) {
                Ok(state) => state,
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "device state unreadable, minting a fresh identity"
                    );
                    LocalDeviceState::default()
                }
            },
            Err(_) => LocalDeviceState::default(),
        };

        if state.device_id.is_empty() {
            state.device_id = Uuid::new_v4().simple().to_string();
            info!(device_id = %state.device_id, "minted new device id");
            return (state, true);
        }
        (state, false)
    }

    fn persist(&self, state: &LocalDeviceState) {
        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let rendered = toml::to_string_pretty(state)?;
            fs::write(&self.path, rendered)?;
            Ok(())
        })();
        if let Err(err) = result {
            warn!(
                path = %self.path.display(),
                error = %err,
                "device state not persisted, identity is session-scoped"
            );
        }
    }
}
