use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use crate::app::adb::locator::resolve_adb_program;
use crate::app::adb::runner::{AdbRunner, ProcessRunner, RunOptions};
use crate::app::config::AppConfig;
use crate::app::events::{CoreEvent, EventSink, LogStream};
use crate::app::models::{ConnectionState, DeviceSnapshot, ListingStatus, PackageEntry, RootState};
use crate::app::scheduler::{CancelToken, TaskScheduler};
use crate::app::shortcuts::{shortcuts_path, ShortcutStore};

/// Owner of the current `DeviceSnapshot`. Every change is published as a
/// fresh clone, so the rendering layer never shares state with the core.
pub struct SnapshotStore {
    inner: RwLock<DeviceSnapshot>,
    sink: EventSink,
}

impl SnapshotStore {
    pub fn new(sink: EventSink) -> Self {
        Self {
            inner: RwLock::new(DeviceSnapshot::default()),
            sink,
        }
    }

    pub fn current(&self) -> DeviceSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update(&self, change: impl FnOnce(&mut DeviceSnapshot)) -> DeviceSnapshot {
        let snapshot = {
            let mut guard = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            change(&mut guard);
            guard.clone()
        };
        (self.sink)(CoreEvent::Snapshot(snapshot.clone()));
        snapshot
    }

    pub fn set_connection(&self, connection: ConnectionState) {
        self.update(|snapshot| snapshot.connection = connection);
    }

    pub fn set_root(&self, root: RootState) {
        self.update(|snapshot| snapshot.root = root);
    }

    pub fn begin_listing(&self) {
        self.update(|snapshot| snapshot.listing = ListingStatus::Loading);
    }

    /// Discards the previous collection and returns the new generation.
    pub fn replace_packages(&self, packages: Vec<PackageEntry>, listing: ListingStatus) -> u64 {
        self.update(|snapshot| {
            snapshot.generation += 1;
            snapshot.packages = packages;
            snapshot.listing = listing;
        })
        .generation
    }

    /// Sets one entry's label. Dropped (returns `false`) when a newer listing
    /// replaced the collection or the entry at `index` is no longer `identifier`.
    pub fn apply_label(&self, generation: u64, index: usize, identifier: &str, label: &str) -> bool {
        let applied = {
            let mut guard = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.generation != generation {
                false
            } else {
                match guard.packages.get_mut(index) {
                    Some(entry) if entry.identifier == identifier => {
                        entry.label = label.to_string();
                        true
                    }
                    _ => false,
                }
            }
        };
        if applied {
            (self.sink)(CoreEvent::LabelResolved {
                generation,
                index,
                identifier: identifier.to_string(),
                label: label.to_string(),
            });
        }
        applied
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub runner: Arc<dyn AdbRunner>,
    pub scheduler: TaskScheduler,
    pub log: Arc<LogStream>,
    pub snapshot: Arc<SnapshotStore>,
    pub shortcuts: Mutex<ShortcutStore>,
    pub sink: EventSink,
    label_tasks: Mutex<Vec<CancelToken>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        runner: Arc<dyn AdbRunner>,
        log: Arc<LogStream>,
        shortcuts: ShortcutStore,
        sink: EventSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler: TaskScheduler::new(config.command.max_concurrent_tasks),
            snapshot: Arc::new(SnapshotStore::new(Arc::clone(&sink))),
            shortcuts: Mutex::new(shortcuts),
            config,
            runner,
            log,
            sink,
            label_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Production wiring: real `adb` process runner and the per-user shortcut file.
    pub fn from_config(config: AppConfig, sink: EventSink) -> Arc<Self> {
        let log = Arc::new(LogStream::new(config.logging.max_lines, Arc::clone(&sink)));
        let program = resolve_adb_program(&config.adb.command_path);
        info!(adb_program = %program, "using device bridge");
        let runner: Arc<dyn AdbRunner> = Arc::new(ProcessRunner::new(program, Arc::clone(&log)));
        let shortcuts = ShortcutStore::open(shortcuts_path());
        Self::new(config, runner, log, shortcuts, sink)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions::new(Duration::from_secs(self.config.command.timeout_secs))
    }

    pub fn bundle_temp_root(&self) -> Option<PathBuf> {
        self.config.bundle_temp_root()
    }

    pub fn lock_shortcuts(&self) -> MutexGuard<'_, ShortcutStore> {
        self.shortcuts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancels label lookups still pending for the previous listing. Returns
    /// how many tokens were cancelled.
    pub fn cancel_label_tasks(&self) -> usize {
        let tokens = std::mem::take(
            &mut *self
                .label_tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    /// Remembers the lookups of the current listing so the next refresh can stop them.
    pub fn track_label_tasks(&self, tokens: Vec<CancelToken>) {
        self.label_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(tokens);
    }

    /// Flushes shortcuts, stops label lookups, and gives the remaining
    /// in-flight work a bounded grace period.
    pub fn shutdown(&self, grace: Duration, trace_id: &str) {
        self.cancel_label_tasks();
        if let Err(err) = self.lock_shortcuts().persist(trace_id) {
            warn!(trace_id = %trace_id, error = %err, "failed to persist shortcuts at shutdown");
            self.log.push(err.error);
        }
        if !self.scheduler.wait_idle(grace) {
            warn!(
                trace_id = %trace_id,
                outstanding = self.scheduler.outstanding(),
                "background tasks still running at shutdown"
            );
        }
    }
}
