//! One tracking session.  [`Tracker`] wires the stores together, debounces
//! the write and notification paths, and re-reads the synced folder on an
//! interval so other devices' words show up without any server in between.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wordledger_config::TrackerConfig;
use wordledger_core::{
    DailySummary, EditDelta, Increment, IncrementClock, Settings, SharedState, aggregate, dates,
};
use wordledger_store::{
    DeviceIdentity, DeviceLogStore, FsStorage, LocalDeviceStore, SharedStateStore, Storage,
    compact, merge_increments, run_migrations,
};

use crate::pending::PendingDeltas;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything that has to be read and written consistently: the shared
/// document, this device's log, the merged view of every log, and the
/// timestamp clock.
struct Engine {
    storage: Arc<dyn Storage>,
    shared_store: SharedStateStore,
    shared: SharedState,
    shared_dirty: bool,
    log: DeviceLogStore,
    merged: Vec<Increment>,
    clock: IncrementClock,
}

impl Engine {
    /// Persist the shared document.  A failure leaves the dirty flag set so
    /// a later write path retries instead of forgetting the change.
    async fn save_shared(&mut self) -> Result<()> {
        self.shared_dirty = true;
        self.shared_store.save(&self.shared).await?;
        self.shared_dirty = false;
        Ok(())
    }
}

struct TrackerInner {
    config: TrackerConfig,
    local_store: LocalDeviceStore,
    engine: tokio::sync::Mutex<Engine>,
    pending: Mutex<PendingDeltas>,
    flush_timer: Mutex<Option<oneshot::Sender<()>>>,
    view_timer: Mutex<Option<oneshot::Sender<()>>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    changes: watch::Sender<u64>,
}

impl TrackerInner {
    /// Drain the pending counters into increments and flush the device log.
    /// Draining happens under the engine lock so a concurrent totals query
    /// never sees the words missing from both places.
    ///
    /// This is also the retry point for earlier failed writes: increments
    /// appended by a flush that then lost its disk write keep the log dirty,
    /// and an unsaved shared document keeps its own flag, so both are pushed
    /// out here even when no new counters are pending.
    async fn flush_pending(&self) -> Result<()> {
        let mut engine = self.engine.lock().await;
        for (date, delta) in lock(&self.pending).take_all() {
            let timestamp = engine.clock.next();
            engine.log.append(Increment {
                timestamp,
                date,
                words_added: delta.words_added,
                words_deleted: delta.words_deleted,
            });
        }

        if engine.shared_dirty {
            if let Err(err) = engine.save_shared().await {
                warn!(error = %err, "shared state save still failing");
            }
        }
        if !engine.log.is_dirty() {
            return Ok(());
        }
        engine.log.flush().await.context("flushing word deltas")
    }

    /// Re-read the shared document and every device log.  Subscribers are
    /// notified only when something actually changed.
    async fn refresh(&self) {
        let mut engine = self.engine.lock().await;
        let shared = engine.shared_store.load().await;
        let merged = merge_increments(engine.storage.as_ref()).await;

        let mut changed = false;
        // While a save is outstanding the in-memory document is ahead of
        // disk; adopting the disk copy would roll our changes back.
        if !engine.shared_dirty && shared != engine.shared {
            engine.shared = shared;
            changed = true;
        }
        if merged != engine.merged {
            engine.merged = merged;
            changed = true;
        }
        drop(engine);

        if changed {
            debug!("refresh picked up changes from the synced folder");
            self.notify();
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

/// Handle for one tracking session.  Cheap to clone; all clones drive the
/// same session.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    /// Open a session against the folder and local state file named by
    /// `config`.
    pub async fn start(config: TrackerConfig) -> Result<Tracker> {
        let local_store = LocalDeviceStore::new(&config.local_state_path);
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(&config.shared_dir));
        Self::start_with(config, local_store, storage).await
    }

    /// Open a session with an explicit identity store and storage backend.
    pub async fn start_with(
        config: TrackerConfig,
        local_store: LocalDeviceStore,
        storage: Arc<dyn Storage>,
    ) -> Result<Tracker> {
        let config = config.validated();
        let identity = local_store.resolve();
        info!(device = %identity.id, name = ?identity.name, "starting tracker session");

        let shared_store = SharedStateStore::new(Arc::clone(&storage));
        let mut shared = shared_store.load().await;

        let mut log = DeviceLogStore::new(identity, Arc::clone(&storage));
        log.load().await;

        let report = run_migrations(&mut shared, &mut log).await?;
        if report.changed {
            shared_store.save(&shared).await?;
        }

        let mut clock = IncrementClock::new();
        for increment in log.increments() {
            clock.observe(increment.timestamp);
        }

        // Routine compaction of anything older than the configured window.
        // A failed compaction backs itself out; a failed shared save after a
        // successful one is retried from the flush path.
        let cutoff = dates::days_ago_local(shared.settings.compact_after_days);
        let mut shared_dirty = false;
        match compact(&mut log, &mut shared, &cutoff).await {
            Ok(outcome) if outcome.folded > 0 => {
                if let Err(err) = shared_store.save(&shared).await {
                    warn!(error = %err, "compacted summaries not saved yet, will retry");
                    shared_dirty = true;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "routine compaction backed out, log unchanged");
            }
        }

        let merged = merge_increments(storage.as_ref()).await;

        let (shutdown, _) = watch::channel(false);
        let (changes, _) = watch::channel(0u64);
        let tracker = Tracker {
            inner: Arc::new(TrackerInner {
                config,
                local_store,
                engine: tokio::sync::Mutex::new(Engine {
                    storage,
                    shared_store,
                    shared,
                    shared_dirty,
                    log,
                    merged,
                    clock,
                }),
                pending: Mutex::new(PendingDeltas::default()),
                flush_timer: Mutex::new(None),
                view_timer: Mutex::new(None),
                refresh_task: Mutex::new(None),
                shutdown,
                changes,
            }),
        };
        tracker.spawn_refresh_task();
        Ok(tracker)
    }

    fn spawn_refresh_task(&self) {
        let inner = Arc::clone(&self.inner);
        let mut rx = self.inner.shutdown.subscribe();
        let interval = Duration::from_secs(self.inner.config.refresh_interval_secs);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        inner.refresh().await;
                    }
                    changed = rx.changed() => {
                        if changed.is_ok() && *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *lock(&self.inner.refresh_task) = Some(handle);
    }

    // ── Recording ───────────────────────────────────────────────────────────

    /// Record one editor change.  Counting happens synchronously; the disk
    /// write and the subscriber notification are debounced.
    pub fn record_edit(&self, removed: &str, inserted: &str) {
        self.record_delta(EditDelta::from_change(removed, inserted));
    }

    pub fn record_delta(&self, delta: EditDelta) {
        if delta.is_empty() {
            return;
        }
        let today = dates::today_local();
        lock(&self.inner.pending).add(&today, delta);
        self.schedule_flush();
        self.schedule_view_update();
    }

    /// Timers are cancelled by dropping the sender, which only works while
    /// the task is still in its quiet period.  Once the sleep elapses the
    /// flush runs to completion; rescheduling or shutdown cannot cut off a
    /// write that has started.
    fn schedule_flush(&self) {
        let inner = Arc::clone(&self.inner);
        let delay = Duration::from_millis(self.inner.config.flush_debounce_ms);
        let (cancel, cancelled) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled => return,
            }
            if let Err(err) = inner.flush_pending().await {
                warn!(error = %err, "debounced flush failed, keeping the words for the next flush");
            }
        });
        lock(&self.inner.flush_timer).replace(cancel);
    }

    fn schedule_view_update(&self) {
        let inner = Arc::clone(&self.inner);
        let delay = Duration::from_millis(self.inner.config.view_debounce_ms);
        let (cancel, cancelled) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => inner.notify(),
                _ = cancelled => {}
            }
        });
        lock(&self.inner.view_timer).replace(cancel);
    }

    /// Flush pending deltas to the device log now instead of waiting for
    /// the debounce.
    pub async fn flush_now(&self) -> Result<()> {
        lock(&self.inner.flush_timer).take();
        self.inner.flush_pending().await
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Word movement per day: compacted summaries, every device's merged
    /// increments, this device's live log, and unflushed pending deltas.
    pub async fn totals(&self) -> BTreeMap<String, DailySummary> {
        let engine = self.inner.engine.lock().await;
        self.totals_with(&engine)
    }

    fn totals_with(&self, engine: &Engine) -> BTreeMap<String, DailySummary> {
        let pending = lock(&self.inner.pending).snapshot();
        aggregate::build_totals(
            &engine.shared.compacted,
            engine.merged.iter().chain(engine.log.increments()),
            &pending,
        )
    }

    /// Daily summaries, newest first.
    pub async fn history(&self) -> Vec<DailySummary> {
        let engine = self.inner.engine.lock().await;
        aggregate::history(&self.totals_with(&engine))
    }

    pub async fn today_summary(&self) -> DailySummary {
        let today = dates::today_local();
        let engine = self.inner.engine.lock().await;
        self.totals_with(&engine)
            .remove(&today)
            .unwrap_or_else(|| DailySummary::empty(&today))
    }

    /// Consecutive days before today whose net movement met the daily goal.
    pub async fn streak(&self) -> u32 {
        let today = dates::today_local();
        let engine = self.inner.engine.lock().await;
        let totals = self.totals_with(&engine);
        aggregate::streak(&totals, engine.shared.settings.daily_goal, &today)
    }

    pub async fn settings(&self) -> Settings {
        self.inner.engine.lock().await.shared.settings
    }

    pub async fn identity(&self) -> DeviceIdentity {
        self.inner.engine.lock().await.log.identity().clone()
    }

    /// Re-read the synced folder now instead of waiting for the interval.
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    /// Change feed for the presentation layer.  The value is a revision
    /// counter, bumped whenever totals or settings may have changed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Wipe today's words for this device: pending deltas, live log
    /// increments, and today's compacted entry.  Other devices' logs are
    /// theirs alone; whatever they wrote today survives a reset here.
    pub async fn reset_today(&self) -> Result<()> {
        let today = dates::today_local();
        let mut engine = self.inner.engine.lock().await;
        lock(&self.inner.pending).remove_day(&today);

        let removed = engine.log.remove_on(&today);
        if engine.log.is_dirty() {
            engine
                .log
                .flush()
                .await
                .context("flushing device log after reset")?;
        }
        if engine.shared.compacted.remove(&today).is_some() || engine.shared_dirty {
            engine
                .save_shared()
                .await
                .context("saving shared state after reset")?;
        }

        // Drop our flushed copies of today from the read cache too.
        engine.merged = merge_increments(engine.storage.as_ref()).await;
        drop(engine);

        info!(date = %today, removed, "reset today's words for this device");
        self.inner.notify();
        Ok(())
    }

    /// Fold everything before today into the shared summaries, regardless
    /// of the configured window.  Returns how many increments were folded.
    pub async fn compact_now(&self) -> Result<usize> {
        let cutoff = dates::today_local();
        let mut engine = self.inner.engine.lock().await;
        let outcome = {
            let Engine { log, shared, .. } = &mut *engine;
            compact(log, shared, &cutoff).await?
        };
        if outcome.folded == 0 && !engine.shared_dirty {
            return Ok(0);
        }

        engine
            .save_shared()
            .await
            .context("saving shared state after compaction")?;
        engine.merged = merge_increments(engine.storage.as_ref()).await;
        drop(engine);

        self.inner.notify();
        Ok(outcome.folded)
    }

    /// Change the shared daily goal.  Saved immediately so other devices
    /// pick it up on their next refresh.
    pub async fn set_daily_goal(&self, goal: u32) -> Result<()> {
        let mut engine = self.inner.engine.lock().await;
        if engine.shared.settings.daily_goal == goal {
            return Ok(());
        }
        engine.shared.settings.daily_goal = goal;
        engine.save_shared().await.context("saving settings")?;
        drop(engine);

        info!(goal, "daily goal updated");
        self.inner.notify();
        Ok(())
    }

    /// Change how long increments stay in the per-device logs before the
    /// routine compaction folds them away.  Floored at one day so the
    /// current day is never compacted out from under the editor.
    pub async fn set_compact_after_days(&self, days: u32) -> Result<()> {
        let days = days.max(1);
        let mut engine = self.inner.engine.lock().await;
        if engine.shared.settings.compact_after_days == days {
            return Ok(());
        }
        engine.shared.settings.compact_after_days = days;
        engine.save_shared().await.context("saving settings")?;
        drop(engine);

        info!(days, "compaction window updated");
        self.inner.notify();
        Ok(())
    }

    /// Rename this device.  The local identity file and the device log in
    /// the synced folder both follow the new name.
    pub async fn set_device_name(&self, name: Option<&str>) -> Result<()> {
        let identity = self.inner.local_store.set_name(name);
        let mut engine = self.inner.engine.lock().await;
        engine.log.rename_to(identity.name).await?;
        drop(engine);
        self.inner.notify();
        Ok(())
    }

    /// Stop the timers and the refresh task, then flush anything still
    /// unpersisted: pending counters, appended-but-unwritten increments, and
    /// an unsaved shared document alike.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.inner.shutdown.send(true);
        lock(&self.inner.flush_timer).take();
        lock(&self.inner.view_timer).take();

        // The loop exits on the shutdown signal; an in-flight refresh
        // finishes first.
        let refresh = lock(&self.inner.refresh_task).take();
        if let Some(handle) = refresh {
            let _ = handle.await;
        }

        self.inner
            .flush_pending()
            .await
            .context("final flush on shutdown")?;
        info!("tracker session closed");
        Ok(())
    }
}
