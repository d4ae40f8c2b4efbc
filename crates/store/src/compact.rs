//! Folding old increments out of a device log and into the shared daily
//! summaries.  Compaction never changes totals, it only moves where a day's
//! words are stored.

use anyhow::{Context, Result};
use tracing::info;

use wordledger_core::aggregate::fold_increment;
use wordledger_core::types::SharedState;

use crate::device_log::DeviceLogStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactOutcome {
    /// Increments folded into the shared summaries.
    pub folded: usize,
}

/// Fold every increment dated strictly before `cutoff` into the shared
/// summaries and drop it from the log.
///
/// The pruned log is written to disk before the shared summaries change.  In
/// the other order a crash between the two writes would leave the folded
/// counts both in the shared document and in the on-disk log, and the next
/// run would fold them again; this way a failed write puts the drained
/// increments back and leaves both files exactly as they were.  The caller
/// saves the shared document afterwards — until that save lands the folded
/// counts live only in memory, so the caller retries the save on its later
/// write paths.
pub async fn compact(
    log: &mut DeviceLogStore,
    shared: &mut SharedState,
    cutoff: &str,
) -> Result<CompactOutcome> {
    let eligible = log.remove_before(cutoff);
    if eligible.is_empty() {
        return Ok(CompactOutcome::default());
    }

    if let Err(err) = log.flush().await {
        log.restore(eligible);
        return Err(err).context("flushing pruned device log");
    }

    for increment in &eligible {
        fold_increment(&mut shared.compacted, increment);
    }

    let outcome = CompactOutcome {
        folded: eligible.len(),
    };
    info!(folded = outcome.folded, cutoff, device = %log.identity().id, "compacted device log");
    Ok(outcome)
}
