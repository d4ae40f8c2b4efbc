//! File naming inside the synced folder.

/// The shared document: settings, compacted summaries, migration markers.
pub const SHARED_STATE_FILE: &str = "wordledger.json";

const DEVICE_PREFIX: &str = "device-";
const DEVICE_SUFFIX: &str = ".json";

/// File name for a device log, e.g. `device-blue-laptop.json`.
pub fn device_log_file(stem: &str) -> String {
    format!("{DEVICE_PREFIX}{stem}{DEVICE_SUFFIX}")
}

pub fn is_device_log_file(name: &str) -> bool {
    name.starts_with(DEVICE_PREFIX)
        && name.ends_with(DEVICE_SUFFIX)
        && name.len() > DEVICE_PREFIX.len() + DEVICE_SUFFIX.len()
}
