//! Platform monitor: one native watch feeding the diff engine.
//!
//! ```text
//! notify watcher --(dir changed)--> Settler --(settled dir)--> SnapshotStore::compute_changes
//!                                                                   |
//!                              EventSink <--(Create batches)-- FilterPipeline
//! ```
//!
//! The native layer is only trusted to say that a directory changed. Every
//! signal is reduced to its directory, coalesced, and re-listed; the event
//! payload itself is never used to decide what happened.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::debouncer::Settler;
use super::error::{MonitorError, MonitorResult};
use super::filter::FilterPipeline;
use super::snapshot::{ChangeSet, SnapshotStore};
use super::types::{EventType, FileEvent, MonitorConfig, MonitorId, MonitorType, PathMode};
use crate::config::{MonitorDefaults, Settings};

/// Receiver of filtered event batches produced by a running monitor.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one batch of events detected by `monitor_id`.
    async fn deliver(&self, monitor_id: &MonitorId, events: Vec<FileEvent>);

    /// Called when a monitor's loop ends with an unrecoverable error.
    async fn monitor_failed(&self, _monitor_id: &MonitorId, _error: &MonitorError) {}
}

/// The native watch resource, selected by [`MonitorType`].
enum NativeWatcher {
    Recommended(RecommendedWatcher),
    Poll(PollWatcher),
}

impl NativeWatcher {
    fn create(
        monitor_type: MonitorType,
        poll_interval: Duration,
        tx: mpsc::Sender<notify::Result<Event>>,
    ) -> MonitorResult<Self> {
        let handler = move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        };

        let watcher = match monitor_type {
            MonitorType::Native => NativeWatcher::Recommended(notify::recommended_watcher(handler)?),
            MonitorType::Polling => {
                let config = notify::Config::default().with_poll_interval(poll_interval);
                NativeWatcher::Poll(PollWatcher::new(handler, config)?)
            }
        };
        Ok(watcher)
    }

    fn watch(&mut self, path: &Path, mode: RecursiveMode) -> notify::Result<()> {
        match self {
            NativeWatcher::Recommended(w) => w.watch(path, mode),
            NativeWatcher::Poll(w) => w.watch(path, mode),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            NativeWatcher::Recommended(_) => "native",
            NativeWatcher::Poll(_) => "polling",
        }
    }
}

/// A configured watcher and its event channel, ready to be started.
struct Armed {
    watcher: NativeWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
}

/// Handle to a running monitor loop.
pub struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signal the loop to stop and wait for it to release its watcher.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("[monitor] task ended abnormally: {e}");
        }
    }
}

/// OS-specific backend realising one monitor's native watch.
pub struct PlatformMonitor {
    id: MonitorId,
    config: MonitorConfig,
    root: PathBuf,
    pipeline: Arc<FilterPipeline>,
    defaults: MonitorDefaults,
    armed: Option<Armed>,
    run: Option<RunHandle>,
}

impl std::fmt::Debug for PlatformMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformMonitor")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("mode", &self.config.path_mode)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PlatformMonitor {
    /// Validate the configuration and create the native watch resource.
    pub fn configure(
        id: MonitorId,
        config: MonitorConfig,
        settings: &Settings,
    ) -> MonitorResult<Self> {
        for event_type in &config.event_types {
            if *event_type != EventType::Create {
                return Err(MonitorError::UnsupportedEventType {
                    event_type: *event_type,
                });
            }
        }

        let requested = if config.root.as_os_str().is_empty() {
            std::env::current_dir().map_err(|e| MonitorError::InitFailed {
                reason: format!("no working directory: {e}"),
            })?
        } else {
            config.root.clone()
        };
        let root = requested
            .canonicalize()
            .map_err(|e| MonitorError::WatchFailed {
                path: requested.clone(),
                reason: e.to_string(),
            })?;
        if !root.is_dir() {
            return Err(MonitorError::WatchFailed {
                path: requested,
                reason: "not a directory".to_string(),
            });
        }

        let pipeline = Arc::new(FilterPipeline::for_monitor(&config, &settings.filter));
        let mut monitor = Self {
            id,
            config,
            root,
            pipeline,
            defaults: settings.monitor.clone(),
            armed: None,
            run: None,
        };
        monitor.armed = Some(monitor.arm()?);

        crate::log_event!(
            "monitor",
            "configured",
            "{} on {} ({})",
            monitor.id,
            monitor.root.display(),
            monitor.config.path_mode
        );
        Ok(monitor)
    }

    pub fn id(&self) -> &MonitorId {
        &self.id
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Canonical absolute root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.is_finished())
    }

    fn settle_window(&self) -> Duration {
        match self.config.monitor_type {
            MonitorType::Native if !self.config.timeout.is_zero() => self.config.timeout,
            _ => Duration::from_millis(self.defaults.settle_ms),
        }
    }

    fn poll_interval(&self) -> Duration {
        match self.config.monitor_type {
            MonitorType::Polling if !self.config.timeout.is_zero() => self.config.timeout,
            _ => Duration::from_millis(self.defaults.poll_interval_ms),
        }
    }

    fn arm(&self) -> MonitorResult<Armed> {
        let (tx, rx) = mpsc::channel(self.defaults.event_channel_capacity.max(1));
        let watcher = NativeWatcher::create(self.config.monitor_type, self.poll_interval(), tx)?;
        Ok(Armed { watcher, rx })
    }

    /// Take baseline snapshots and register native watches.
    fn prepare(&self, watcher: &mut NativeWatcher) -> MonitorResult<SnapshotStore> {
        let mut snapshots = SnapshotStore::new();
        let watch_failed = |path: &Path, e: &dyn std::fmt::Display| MonitorError::WatchFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        match self.config.path_mode {
            PathMode::Flat => {
                snapshots
                    .seed(&self.root)
                    .map_err(|e| watch_failed(&self.root, &e))?;
                watcher
                    .watch(&self.root, RecursiveMode::NonRecursive)
                    .map_err(|e| watch_failed(&self.root, &e))?;
            }
            PathMode::Recurse => {
                for dir in self.tree_directories() {
                    snapshots.seed(&dir).map_err(|e| watch_failed(&dir, &e))?;
                    watcher
                        .watch(&dir, RecursiveMode::NonRecursive)
                        .map_err(|e| watch_failed(&dir, &e))?;
                }
            }
            PathMode::Follow => {
                for dir in self.tree_directories() {
                    snapshots.seed(&dir).map_err(|e| watch_failed(&dir, &e))?;
                }
                watcher
                    .watch(&self.root, RecursiveMode::Recursive)
                    .map_err(|e| watch_failed(&self.root, &e))?;
            }
        }

        Ok(snapshots)
    }

    /// Root plus every non-blacklisted directory below it.
    fn tree_directories(&self) -> Vec<PathBuf> {
        let blacklist = &self.config.blacklist;
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !blacklist
                        .iter()
                        .any(|b| entry.file_name().to_str() == Some(b.as_str()))
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("[monitor] skipping unreadable entry: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Start the monitor loop on the current tokio runtime.
    ///
    /// Returns once baseline snapshots are taken and the native watch is
    /// registered; the loop then runs until [`stop`](Self::stop).
    pub fn start(&mut self, sink: Arc<dyn EventSink>) -> MonitorResult<()> {
        if self.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            MonitorError::InitFailed {
                reason: e.to_string(),
            }
        })?;

        let Armed { mut watcher, rx } = match self.armed.take() {
            Some(armed) => armed,
            None => self.arm()?,
        };
        let snapshots = self.prepare(&mut watcher)?;

        let window = self.settle_window();
        let event_loop = EventLoop {
            id: self.id.clone(),
            root: self.root.clone(),
            mode: self.config.path_mode,
            blacklist: self.config.blacklist.clone(),
            block_size: self.config.block_size,
            watcher,
            rx,
            snapshots,
            settler: Settler::new(window, window * 10),
            pipeline: self.pipeline.clone(),
            sink: sink.clone(),
        };

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let id = self.id.clone();
        let task = runtime.spawn(async move {
            if let Err(e) = event_loop.run(loop_cancel.clone()).await {
                tracing::error!("[monitor] {id} stopped on error: {e}");
                // Marks this run as over before the owner is told
                loop_cancel.cancel();
                sink.monitor_failed(&id, &e).await;
            }
        });

        self.run = Some(RunHandle { cancel, task });
        crate::log_event!("monitor", "started", "{}", self.id);
        Ok(())
    }

    /// Signal the running loop to stop without waiting for it.
    pub fn cancel(&self) {
        if let Some(run) = &self.run {
            run.cancel();
        }
    }

    /// Release the run handle if its loop has been told to stop.
    ///
    /// Returns false while a live run is still attached, such as one started
    /// after the loop being reaped had already failed.
    pub fn reap_cancelled(&mut self) -> bool {
        if self.run.as_ref().is_some_and(RunHandle::is_cancelled) {
            self.run = None;
        }
        self.run.is_none()
    }

    /// Detach the running loop without stopping it.
    ///
    /// Lets an owner release its locks before awaiting [`RunHandle::stop`].
    pub fn detach(&mut self) -> Option<RunHandle> {
        self.run.take()
    }

    /// Stop the loop and release the native watch. Safe to call when not running.
    pub async fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.stop().await;
            crate::log_event!("monitor", "stopped", "{}", self.id);
        }
    }
}

/// State owned by a running monitor's task.
struct EventLoop {
    id: MonitorId,
    root: PathBuf,
    mode: PathMode,
    blacklist: Vec<String>,
    block_size: usize,
    watcher: NativeWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
    snapshots: SnapshotStore,
    settler: Settler,
    pipeline: Arc<FilterPipeline>,
    sink: Arc<dyn EventSink>,
}

impl EventLoop {
    /// Run until cancelled or the native source fails.
    async fn run(mut self, cancel: CancellationToken) -> MonitorResult<()> {
        let tick = self
            .settler
            .window()
            .clamp(Duration::from_millis(10), Duration::from_millis(100));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        crate::debug_event!(
            "monitor",
            "loop",
            "{} {} watcher, {} directories",
            self.id,
            self.watcher.kind(),
            self.snapshots.len()
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    let unsettled = self.settler.drain();
                    if !unsettled.is_empty() {
                        crate::debug_event!(
                            "monitor",
                            "cancelled",
                            "{} dropping {} unsettled directories",
                            self.id,
                            unsettled.len()
                        );
                    }
                    return Ok(());
                }

                res = self.rx.recv() => match res {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => {
                        if matches!(e.kind, notify::ErrorKind::MaxFilesWatch) {
                            return Err(MonitorError::Native { details: e.to_string() });
                        }
                        tracing::error!("[monitor] {} watch error: {e}", self.id);
                    }
                    None => return Err(MonitorError::ChannelClosed),
                },

                _ = ticker.tick(), if self.settler.has_pending() => {
                    for dir in self.settler.take_ready() {
                        if !self.process_directory(&dir, &cancel).await {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Reduce a raw notification to the directories it touched.
    fn handle_event(&mut self, event: Event) {
        // Reads never change a listing; close-after-write marks completion
        if matches!(event.kind, EventKind::Access(access) if access != AccessKind::Close(AccessMode::Write))
        {
            return;
        }
        crate::debug_event!("monitor", "raw", "{:?} {:?}", event.kind, event.paths);

        for path in event.paths {
            if let Some(parent) = path.parent()
                && self.is_relevant(parent)
            {
                self.settler.record(parent.to_path_buf());
            }
            // The watched directory itself (removed, renamed, attributes)
            if self.snapshots.contains(&path) && self.is_relevant(&path) {
                self.settler.record(path);
            }
        }
    }

    fn is_blacklisted(&self, dir: &Path) -> bool {
        match dir.strip_prefix(&self.root) {
            Ok(rel) => rel.components().any(|c| {
                let name = c.as_os_str().to_str();
                self.blacklist.iter().any(|b| name == Some(b.as_str()))
            }),
            Err(_) => true,
        }
    }

    fn is_relevant(&self, dir: &Path) -> bool {
        if !dir.starts_with(&self.root) || self.is_blacklisted(dir) {
            return false;
        }
        match self.mode {
            PathMode::Flat => dir == self.root,
            PathMode::Recurse => self.snapshots.contains(dir) || dir == self.root,
            PathMode::Follow => true,
        }
    }

    /// Diff a settled directory and deliver what survives the filters.
    ///
    /// Returns false if cancelled while delivering.
    async fn process_directory(&mut self, dir: &Path, cancel: &CancellationToken) -> bool {
        let mut queue = VecDeque::from([dir.to_path_buf()]);

        while let Some(dir) = queue.pop_front() {
            let changes = match self.snapshots.compute_changes(&dir) {
                Ok(changes) => changes,
                Err(e) => {
                    tracing::warn!("[monitor] {} cannot list {}: {e}", self.id, dir.display());
                    continue;
                }
            };
            if changes.is_empty() {
                continue;
            }
            self.track_subdirectories(&changes, &mut queue);

            let events = self.pipeline.apply(changes.candidates());
            if events.is_empty() {
                continue;
            }

            crate::log_event!(
                "monitor",
                "detected",
                "{} new files in {} ({})",
                events.len(),
                dir.display(),
                self.id
            );

            for batch in into_batches(events, self.block_size) {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    _ = self.sink.deliver(&self.id, batch) => {}
                }
            }
        }
        true
    }

    /// Keep snapshot bookkeeping in step with directories coming and going.
    fn track_subdirectories(&mut self, changes: &ChangeSet, queue: &mut VecDeque<PathBuf>) {
        for removed in changes.removed.iter().filter(|c| c.stat.is_dir) {
            self.snapshots.forget_tree(&removed.path);
            self.settler.remove(&removed.path);
        }

        if self.mode != PathMode::Follow {
            return;
        }
        for added in changes.added.iter().filter(|c| c.stat.is_dir) {
            if self.is_blacklisted(&added.path) || self.snapshots.contains(&added.path) {
                continue;
            }
            // Files may have landed before the recursive watch covered it
            self.snapshots.seed_empty(&added.path);
            queue.push_back(added.path.clone());
        }
    }
}

/// Split events into batches of at most `block_size` (0 = one batch).
fn into_batches(events: Vec<FileEvent>, block_size: usize) -> Vec<Vec<FileEvent>> {
    if block_size == 0 || events.len() <= block_size {
        return vec![events];
    }
    events
        .chunks(block_size)
        .map(<[FileEvent]>::to_vec)
        .collect()
}
