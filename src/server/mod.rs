//! Monitor coordinator.
//!
//! Owns every monitor, the subscriber registered for each, and the file
//! operations offered to remote clients. The registry is shared with the
//! callback dispatch running inside monitor tasks, so it is only ever
//! locked for short synchronous sections. Starting and stopping a monitor
//! happen under that monitor's own lock instead.

mod error;
mod files;
mod hash_index;
mod subscriber;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::config::Settings;
use crate::monitor::{
    EventSink, MonitorConfig, MonitorId, MonitorState, PlatformMonitor, ServerId,
};

pub use error::{ServerError, ServerResult};
pub use subscriber::{
    ChannelSubscriber, LoggingSubscriber, Notification, Subscriber, SubscriberError,
};

use hash_index::HashIndex;
use subscriber::{Dispatch, Registry};

/// Lifecycle lock around one monitor's native resources.
type SharedMonitor = Arc<tokio::sync::Mutex<PlatformMonitor>>;

/// Registry record for one monitor.
pub(crate) struct MonitorEntry {
    monitor: SharedMonitor,
    root: PathBuf,
    subscriber: Arc<dyn Subscriber>,
    state: MonitorState,
}

/// Directory named by a listing request.
#[derive(Debug, Clone)]
pub enum DirectoryTarget {
    /// The root of a registered monitor.
    Monitor(MonitorId),
    /// Any absolute path on this host.
    Absolute(PathBuf),
}

pub struct MonitorServer {
    server_id: ServerId,
    settings: Arc<Settings>,
    registry: Arc<Registry>,
    sink: Arc<dyn EventSink>,
    hashes: Arc<HashIndex>,
    reads: Semaphore,
}

impl MonitorServer {
    pub fn new(settings: Settings) -> Self {
        let server_id = ServerId::generate();
        let registry: Arc<Registry> = Arc::new(Mutex::new(HashMap::new()));
        let hashes = Arc::new(HashIndex::new());
        let sink: Arc<dyn EventSink> =
            Arc::new(Dispatch::new(server_id, &registry, hashes.clone()));
        let reads = Semaphore::new(settings.server.max_concurrent_reads.max(1));

        let server = Self {
            server_id,
            settings: Arc::new(settings),
            registry,
            sink,
            hashes,
            reads,
        };
        crate::log_event!("server", "ready", "{}", server.server_id);
        server
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Configure a new monitor and register `subscriber` for its events.
    ///
    /// The monitor starts out [`MonitorState::Created`].
    pub fn create_monitor(
        &self,
        config: MonitorConfig,
        subscriber: Arc<dyn Subscriber>,
    ) -> ServerResult<MonitorId> {
        let id = MonitorId::generate();
        let monitor = PlatformMonitor::configure(id.clone(), config, &self.settings).map_err(|e| {
            tracing::error!("[server] failed to create monitor: {e}");
            ServerError::creation(e)
        })?;

        crate::log_event!(
            "server",
            "created",
            "{id} on {} ({})",
            monitor.root().display(),
            monitor.config().path_mode
        );
        self.registry.lock().insert(
            id.clone(),
            MonitorEntry {
                root: monitor.root().to_path_buf(),
                monitor: Arc::new(tokio::sync::Mutex::new(monitor)),
                subscriber,
                state: MonitorState::Created,
            },
        );
        Ok(id)
    }

    fn shared_monitor(&self, id: &MonitorId) -> ServerResult<(SharedMonitor, MonitorState)> {
        self.registry
            .lock()
            .get(id)
            .map(|entry| (entry.monitor.clone(), entry.state))
            .ok_or_else(|| ServerError::MonitorNotFound { id: id.clone() })
    }

    fn set_state(&self, id: &MonitorId, state: MonitorState) -> ServerResult<()> {
        let mut registry = self.registry.lock();
        let entry = registry
            .get_mut(id)
            .ok_or_else(|| ServerError::MonitorNotFound { id: id.clone() })?;
        entry.state = state;
        Ok(())
    }

    /// Begin watching. Fails without side effects if the monitor is already running.
    ///
    /// Baseline snapshots are taken under the monitor's own lock, so event
    /// delivery for other monitors carries on while a large tree is walked.
    pub async fn start_monitor(&self, id: &MonitorId) -> ServerResult<()> {
        let (shared, state) = self.shared_monitor(id)?;
        if state == MonitorState::Running {
            return Err(ServerError::MonitorOperation {
                id: id.clone(),
                operation: "start",
                reason: "monitor is already running".to_string(),
            });
        }

        let mut monitor = shared.lock().await;
        monitor.start(self.sink.clone()).map_err(|e| {
            tracing::error!("[server] monitor {id} failed to start: {e}");
            ServerError::operation(id, "start", e)
        })?;

        if let Err(e) = self.set_state(id, MonitorState::Running) {
            // Destroyed while starting
            monitor.cancel();
            return Err(e);
        }
        crate::log_event!("server", "started", "{id}");
        Ok(())
    }

    /// Stop watching and wait for the monitor task to finish.
    ///
    /// Stopping a monitor that is not running does nothing.
    pub async fn stop_monitor(&self, id: &MonitorId) -> ServerResult<()> {
        let (shared, state) = self.shared_monitor(id)?;
        if state != MonitorState::Running {
            crate::debug_event!("server", "stop ignored", "{id} is {state}");
            return Ok(());
        }

        let run = {
            let mut monitor = shared.lock().await;
            self.set_state(id, MonitorState::Stopped)?;
            monitor.detach()
        };

        if let Some(run) = run {
            run.stop().await;
        }
        crate::log_event!("server", "stopped", "{id}");
        Ok(())
    }

    /// Remove the monitor, stopping it first if it is running.
    pub async fn destroy_monitor(&self, id: &MonitorId) -> ServerResult<()> {
        let entry = self
            .registry
            .lock()
            .remove(id)
            .ok_or_else(|| ServerError::MonitorNotFound { id: id.clone() })?;

        // A failing loop may be waiting on this lock; never hold it while joining
        let run = entry.monitor.lock().await.detach();
        if let Some(run) = run {
            run.stop().await;
        }
        crate::log_event!("server", "destroyed", "{id}");
        Ok(())
    }

    pub fn get_monitor_state(&self, id: &MonitorId) -> ServerResult<MonitorState> {
        self.registry
            .lock()
            .get(id)
            .map(|entry| entry.state)
            .ok_or_else(|| ServerError::MonitorNotFound { id: id.clone() })
    }

    /// Ids of all registered monitors, in no particular order.
    pub fn list_monitors(&self) -> Vec<MonitorId> {
        self.registry.lock().keys().cloned().collect()
    }

    /// Root directory watched by a monitor.
    pub fn monitor_root(&self, id: &MonitorId) -> ServerResult<PathBuf> {
        self.registry
            .lock()
            .get(id)
            .map(|entry| entry.root.clone())
            .ok_or_else(|| ServerError::MonitorNotFound { id: id.clone() })
    }

    /// List the entries of a directory matching a glob `filter`.
    ///
    /// Directories come first with a trailing `/`, then files, each group
    /// sorted by name. An empty filter matches everything.
    pub fn list_directory(
        &self,
        target: &DirectoryTarget,
        relative_path: impl AsRef<Path>,
        filter: &str,
    ) -> ServerResult<Vec<String>> {
        let base = match target {
            DirectoryTarget::Monitor(id) => self.monitor_root(id)?,
            DirectoryTarget::Absolute(path) => path.clone(),
        };
        let dir = base.join(relative_path);
        let filter = if filter.is_empty() { "*" } else { filter };
        let pattern = glob::Pattern::new(filter).map_err(|e| ServerError::Configuration {
            reason: format!("invalid filter '{filter}': {e}"),
        })?;

        let unreadable = |e: std::io::Error| {
            tracing::error!("[server] unable to list {}: {e}", dir.display());
            ServerError::FileAccess {
                reference: dir.display().to_string(),
                reason: format!("unable to get directory: {e}"),
            }
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !pattern.matches(&name) {
                continue;
            }
            // Follow symlinks so a link to a directory lists as one
            if entry.path().is_dir() {
                dirs.push(format!("{name}/"));
            } else {
                files.push(name);
            }
        }

        dirs.sort();
        files.sort();
        dirs.extend(files);
        Ok(dirs)
    }

    /// Stop and remove every monitor.
    pub async fn shutdown(&self) {
        for id in self.list_monitors() {
            if let Err(e) = self.destroy_monitor(&id).await {
                crate::debug_event!("server", "shutdown", "{e}");
            }
        }
    }
}

impl Drop for MonitorServer {
    fn drop(&mut self) {
        // Dropping a handle leaves its task running
        for entry in self.registry.lock().values() {
            match entry.monitor.try_lock() {
                Ok(monitor) => monitor.cancel(),
                Err(_) => tracing::warn!("[server] monitor busy during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn server() -> MonitorServer {
        MonitorServer::new(Settings::default())
    }

    #[test]
    fn test_list_directory_orders_dirs_first() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("zeta")).unwrap();
        fs::create_dir(temp.path().join("alpha")).unwrap();
        fs::write(temp.path().join("b.tif"), b"b").unwrap();
        fs::write(temp.path().join("a.jpg"), b"a").unwrap();

        let server = server();
        let target = DirectoryTarget::Absolute(temp.path().to_path_buf());

        assert_eq!(
            server.list_directory(&target, "", "").unwrap(),
            vec!["alpha/", "zeta/", "a.jpg", "b.tif"]
        );
        assert_eq!(
            server.list_directory(&target, "", "*.tif").unwrap(),
            vec!["b.tif"]
        );
    }

    #[test]
    fn test_list_directory_errors() {
        let temp = TempDir::new().unwrap();
        let server = server();
        let target = DirectoryTarget::Absolute(temp.path().to_path_buf());

        assert!(matches!(
            server.list_directory(&target, "missing", "*"),
            Err(ServerError::FileAccess { .. })
        ));
        assert!(matches!(
            server.list_directory(&target, "", "[unclosed"),
            Err(ServerError::Configuration { .. })
        ));
        assert!(matches!(
            server.list_directory(&DirectoryTarget::Monitor(MonitorId::from("nope")), "", "*"),
            Err(ServerError::MonitorNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_monitor_directory() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("sub").join("inner")).unwrap();
        fs::write(temp.path().join("sub").join("x.tif"), b"x").unwrap();

        let server = server();
        let id = server
            .create_monitor(MonitorConfig::new(temp.path()), Arc::new(LoggingSubscriber))
            .unwrap();

        assert_eq!(
            server
                .list_directory(&DirectoryTarget::Monitor(id), "sub", "")
                .unwrap(),
            vec!["inner/", "x.tif"]
        );
    }

    #[tokio::test]
    async fn test_create_failure_is_reported() {
        let temp = TempDir::new().unwrap();
        let server = server();

        let err = server
            .create_monitor(
                MonitorConfig::new(temp.path().join("absent")),
                Arc::new(LoggingSubscriber),
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::MonitorCreation { .. }));
        assert!(server.list_monitors().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lifecycle_states() {
        let temp = TempDir::new().unwrap();
        let server = server();
        let id = server
            .create_monitor(MonitorConfig::new(temp.path()), Arc::new(LoggingSubscriber))
            .unwrap();

        assert_eq!(server.get_monitor_state(&id).unwrap(), MonitorState::Created);
        // Stopping a monitor that never ran is a no-op
        server.stop_monitor(&id).await.unwrap();
        assert_eq!(server.get_monitor_state(&id).unwrap(), MonitorState::Created);

        server.start_monitor(&id).await.unwrap();
        assert_eq!(server.get_monitor_state(&id).unwrap(), MonitorState::Running);

        server.stop_monitor(&id).await.unwrap();
        assert_eq!(server.get_monitor_state(&id).unwrap(), MonitorState::Stopped);
        server.stop_monitor(&id).await.unwrap();

        // Restart after stop
        server.start_monitor(&id).await.unwrap();
        assert_eq!(server.get_monitor_state(&id).unwrap(), MonitorState::Running);

        server.shutdown().await;
        assert!(server.list_monitors().is_empty());
    }
}
