//! The single shared document: settings, compacted daily summaries, and the
//! migration markers every device agrees on.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use wordledger_core::types::SharedState;

use crate::paths::SHARED_STATE_FILE;
use crate::storage::Storage;

pub struct SharedStateStore {
    storage: Arc<dyn Storage>,
}

impl SharedStateStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Load the shared document, falling back to defaults when the file is
    /// missing or unreadable.  A missing file is the normal first run; an
    /// unreadable one is logged and treated the same.
    pub async fn load(&self) -> SharedState {
        let bytes = match self.storage.read(SHARED_STATE_FILE).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                debug!("no shared state file, starting from defaults");
                return SharedState::default();
            }
            Err(err) => {
                warn!(error = %err, "shared state unreadable, starting from defaults");
                return SharedState::default();
            }
        };
        let mut state = match serde_json::from_slice::<SharedState>(&bytes) {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "shared state malformed, starting from defaults");
                return SharedState::default();
            }
        };

        // Map keys are authoritative for dates; nets derive from the counts.
        for (date, summary) in state.compacted.iter_mut() {
            summary.date = date.clone();
            summary.recompute_net();
        }
        // A window of zero would make the routine cutoff "today" and compact
        // the current day out from under the editor.
        if state.settings.compact_after_days == 0 {
            state.settings.compact_after_days = 1;
        }
        state
    }

    /// Persist the shared document as pretty-printed JSON.
    pub async fn save(&self, state: &SharedState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.storage
            .write(SHARED_STATE_FILE, &bytes)
            .await
            .context("saving shared state")?;
        debug!(days = state.compacted.len(), "shared state saved");
        Ok(())
    }
}
