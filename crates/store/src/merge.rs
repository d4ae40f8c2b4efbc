//! Read-side merge of every device log in the synced folder.
//!
//! Logs are only ever written by their owning device, so merging is a pure
//! read: collect all increments, drop timestamp duplicates (a file observed
//! both under a stale and a healed name, or a sync client briefly showing
//! two copies), and hand the rest to the aggregation layer.

use std::collections::HashSet;

use tracing::{debug, warn};

use wordledger_core::types::{DeviceLog, Increment};

use crate::paths;
use crate::storage::Storage;

/// Read and combine all device logs. Unreadable or malformed files are
/// skipped with a warning; a device that cannot be read simply contributes
/// nothing until its log syncs in a readable state.
pub async fn merge_increments(storage: &dyn Storage) -> Vec<Increment> {
    let names = match storage.list("").await {
        Ok(names) => names,
        Err(err) => {
            warn!(error = %err, "folder listing failed, merge sees no devices");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    let mut devices = 0usize;

    for name in names.iter().filter(|n| paths::is_device_log_file(n)) {
        let bytes = match storage.read(name).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => continue,
            Err(err) => {
                warn!(file = %name, error = %err, "skipping unreadable device log");
                continue;
            }
        };
        let doc = match serde_json::from_slice::<DeviceLog>(&bytes) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(file = %name, error = %err, "skipping malformed device log");
                continue;
            }
        };

        devices += 1;
        for increment in doc.increments {
            if seen.insert(increment.timestamp) {
                merged.push(increment);
            }
        }
    }

    debug!(devices, increments = merged.len(), "merged device logs");
    merged
}
