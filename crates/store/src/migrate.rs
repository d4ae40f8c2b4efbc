//! Steps that bring older shared documents forward to the current schema.
//!
//! | Version | Shape                                                        |
//! |---------|--------------------------------------------------------------|
//! | 0       | single `dailyRecords` map in the shared document             |
//! | 1       | shared `increments` array alongside `compacted` summaries    |
//! | 2       | per-device log files; the shared document keeps summaries    |
//!
//! Every step is idempotent and also re-runs on a document whose recorded
//! version claims it is current but which still carries older fields, which
//! happens when a device on an old build writes after a newer device has
//! already migrated.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::info;

use wordledger_core::types::SharedState;

use crate::device_log::DeviceLogStore;

/// Schema generation this build reads and writes.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub folded_daily_records: usize,
    pub adopted_increments: usize,
    pub discarded_increments: usize,
    /// Whether the shared document needs saving.
    pub changed: bool,
}

/// Run every pending migration step against the in-memory state.  The
/// caller saves the shared document afterwards when `changed` is set; the
/// device log is flushed here as soon as it adopts anything, so legacy
/// increments are never only in memory while the shared residue is gone.
pub async fn run_migrations(
    shared: &mut SharedState,
    log: &mut DeviceLogStore,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    // v0 -> v1: fold the legacy dailyRecords map into compacted summaries.
    // Days already compacted win; a record for such a day was itself
    // produced from the same history by an earlier fold.
    if let Some(records) = shared.legacy_daily_records.take() {
        for (date, mut summary) in records {
            if shared.compacted.contains_key(&date) {
                continue;
            }
            summary.date = date.clone();
            summary.recompute_net();
            shared.compacted.insert(date, summary);
            report.folded_daily_records += 1;
        }
        report.changed = true;
        info!(
            folded = report.folded_daily_records,
            "migrated legacy daily records into compacted summaries"
        );
    }

    // v1 -> v2: move the shared increments array into this device's log.
    // Exactly one device adopts; everyone after it finds the flag set and
    // strips whatever residue an old build wrote back.
    if let Some(increments) = shared.legacy_increments.take() {
        if shared.migrated_to_per_device {
            report.discarded_increments = increments.len();
            info!(
                discarded = report.discarded_increments,
                "stripped legacy shared increments, already adopted by a device"
            );
        } else {
            let known: HashSet<i64> = log.increments().iter().map(|inc| inc.timestamp).collect();
            for increment in increments {
                if known.contains(&increment.timestamp) {
                    continue;
                }
                log.append(increment);
                report.adopted_increments += 1;
            }
            if report.adopted_increments > 0 {
                log.flush()
                    .await
                    .context("persisting adopted legacy increments")?;
            }
            info!(
                adopted = report.adopted_increments,
                "adopted legacy shared increments into this device's log"
            );
        }
        report.changed = true;
    }
    if !shared.migrated_to_per_device {
        shared.migrated_to_per_device = true;
        report.changed = true;
    }

    if shared.schema_version < SCHEMA_VERSION {
        shared.schema_version = SCHEMA_VERSION;
        report.changed = true;
    }

    Ok(report)
}
