use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One captured burst of typing on one device.
///
/// | Field           | Meaning                                               |
/// |-----------------|-------------------------------------------------------|
/// | `timestamp`     | Capture time in epoch milliseconds                    |
/// | `date`          | Local calendar day (`YYYY-MM-DD`) at capture time     |
/// | `words_added`   | Words typed during the burst                          |
/// | `words_deleted` | Words removed during the burst                        |
///
/// The timestamp doubles as the increment's identity when logs from several
/// devices are merged: two increments carrying the same timestamp are treated
/// as the same event and counted once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Increment {
    pub timestamp: i64,
    pub date: String,
    #[serde(default)]
    pub words_added: u64,
    #[serde(default)]
    pub words_deleted: u64,
}

/// Per-day totals, either compacted from aged increments or computed on the
/// fly by the aggregate views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub words_added: u64,
    #[serde(default)]
    pub words_deleted: u64,
    #[serde(default)]
    pub net_words: i64,
}

impl DailySummary {
    pub fn empty(date: &str) -> Self {
        Self {
            date: date.to_string(),
            words_added: 0,
            words_deleted: 0,
            net_words: 0,
        }
    }

    /// Derive `net_words` from the counters.  Persisted net values are
    /// advisory only: every load and every fold recomputes them.
    pub fn recompute_net(&mut self) {
        self.net_words = self.words_added as i64 - self.words_deleted as i64;
    }
}

/// User-facing settings shared by every device through the synced document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Net words per day to aim for.  `0` disables goal tracking.
    pub daily_goal: u32,
    /// Days of raw increments kept before compaction folds them into
    /// daily summaries.
    pub compact_after_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daily_goal: 500,
            compact_after_days: 30,
        }
    }
}

/// The one shared document: settings, compacted summaries, and migration
/// markers.
///
/// The `dailyRecords` map and the `increments` array are the two older
/// on-disk generations.  They deserialize so the migrator can fold them
/// forward, and serialize as absent once stripped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SharedState {
    pub settings: Settings,
    pub compacted: BTreeMap<String, DailySummary>,
    pub migrated_to_per_device: bool,
    pub schema_version: u32,
    #[serde(rename = "dailyRecords", skip_serializing_if = "Option::is_none")]
    pub legacy_daily_records: Option<BTreeMap<String, DailySummary>>,
    #[serde(rename = "increments", skip_serializing_if = "Option::is_none")]
    pub legacy_increments: Option<Vec<Increment>>,
}

/// One device's slice of the ledger, persisted as a single JSON document in
/// the synced folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceLog {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub increments: Vec<Increment>,
}
