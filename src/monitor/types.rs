//! Core value types shared by the monitor and server layers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a monitor, stable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorId(String);

impl MonitorId {
    /// Allocate a fresh unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MonitorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MonitorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Backend used to receive native change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MonitorType {
    /// The platform's recommended watcher (inotify, FSEvents, ReadDirectoryChangesW).
    #[default]
    Native,
    /// Portable stat-polling watcher.
    Polling,
}

/// Event types a caller may request. Only `Create` is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Create,
    Modify,
    Delete,
    MoveIn,
    MoveOut,
    All,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Create => "Create",
            EventType::Modify => "Modify",
            EventType::Delete => "Delete",
            EventType::MoveIn => "MoveIn",
            EventType::MoveOut => "MoveOut",
            EventType::All => "All",
        };
        f.write_str(name)
    }
}

/// How much of the tree below the root is watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathMode {
    /// Direct children of the root only.
    #[default]
    Flat,
    /// Every directory that exists when the monitor starts.
    Recurse,
    /// The whole subtree, including directories created later.
    Follow,
}

impl fmt::Display for PathMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PathMode::Flat => "Flat",
            PathMode::Recurse => "Recurse",
            PathMode::Follow => "Follow",
        };
        f.write_str(name)
    }
}

impl FromStr for PathMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(PathMode::Flat),
            "recurse" => Ok(PathMode::Recurse),
            "follow" => Ok(PathMode::Follow),
            other => Err(format!("unknown path mode '{other}'")),
        }
    }
}

/// Lifecycle state of a monitor.
///
/// ```text
/// Created --start--> Running --stop--> Stopped --start--> Running
///    any state --destroy--> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorState {
    Created,
    Running,
    Stopped,
    Destroyed,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Created => "Created",
            MonitorState::Running => "Running",
            MonitorState::Stopped => "Stopped",
            MonitorState::Destroyed => "Destroyed",
        };
        f.write_str(name)
    }
}

/// Immutable configuration of one watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub monitor_type: MonitorType,
    pub event_types: Vec<EventType>,
    pub path_mode: PathMode,
    pub root: PathBuf,
    /// Extensions (".tif") or file names of interest. Empty means everything.
    pub whitelist: Vec<String>,
    /// Subdirectory names excluded from recursive modes.
    pub blacklist: Vec<String>,
    /// Settle window for native monitors, poll interval for polling ones.
    /// Zero selects the configured default.
    pub timeout: Duration,
    /// Maximum events per callback batch. Zero means unlimited.
    pub block_size: usize,
    pub ignore_sys_files: bool,
    pub ignore_dir_events: bool,
}

impl MonitorConfig {
    /// Flat `Create` monitor on `root` with everything else defaulted.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            monitor_type: MonitorType::Native,
            event_types: vec![EventType::Create],
            path_mode: PathMode::Flat,
            root: root.into(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            timeout: Duration::ZERO,
            block_size: 0,
            ignore_sys_files: true,
            ignore_dir_events: true,
        }
    }

    pub fn path_mode(mut self, mode: PathMode) -> Self {
        self.path_mode = mode;
        self
    }

    pub fn monitor_type(mut self, monitor_type: MonitorType) -> Self {
        self.monitor_type = monitor_type;
        self
    }

    pub fn whitelist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = entries.into_iter().map(Into::into).collect();
        self
    }

    pub fn blacklist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist = entries.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn ignore_sys_files(mut self, ignore: bool) -> Self {
        self.ignore_sys_files = ignore;
        self
    }

    pub fn ignore_dir_events(mut self, ignore: bool) -> Self {
        self.ignore_dir_events = ignore;
        self
    }

    pub fn event_types(mut self, types: Vec<EventType>) -> Self {
        self.event_types = types;
        self
    }
}

/// Identity of the server instance that minted a [`FileReference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(Uuid);

impl ServerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

const REFERENCE_SCHEME: &str = "fsmonitor://";

/// Identifier a client uses for file-level operations.
///
/// Namespaced by the minting server so references from different servers
/// never alias. Rendered as `fsmonitor://<server-uuid><absolute path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileReference {
    server: ServerId,
    path: PathBuf,
}

impl FileReference {
    pub fn new(server: ServerId, path: impl Into<PathBuf>) -> Self {
        Self {
            server,
            path: path.into(),
        }
    }

    pub fn server(&self) -> ServerId {
        self.server
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REFERENCE_SCHEME}{}{}", self.server, self.path.display())
    }
}

impl FromStr for FileReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(REFERENCE_SCHEME)
            .ok_or_else(|| format!("'{s}' is not a file reference"))?;
        // A hyphenated uuid is always 36 characters
        if rest.len() < 36 || !rest.is_char_boundary(36) {
            return Err(format!("'{s}' has no server id"));
        }
        let (server, path) = rest.split_at(36);
        let server = Uuid::parse_str(server).map_err(|e| format!("bad server id in '{s}': {e}"))?;
        if path.is_empty() {
            return Err(format!("'{s}' has no path"));
        }
        Ok(Self {
            server: ServerId(server),
            path: PathBuf::from(path),
        })
    }
}

/// A single detected change delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub event_type: EventType,
}

impl FileEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            event_type: EventType::Create,
        }
    }
}

/// Kind of filesystem object behind a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Dir,
    Link,
    Mount,
    Unknown,
}

/// Bundle of metadata returned by `get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub base_name: String,
    pub owner: String,
    pub size: u64,
    pub m_time: std::time::SystemTime,
    pub c_time: std::time::SystemTime,
    pub a_time: std::time::SystemTime,
    pub file_type: FileType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_ids_are_unique() {
        let a = MonitorId::generate();
        let b = MonitorId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_reference_display_and_parse() {
        let server = ServerId::generate();
        let reference = FileReference::new(server, "/data/in/photo.tif");

        let rendered = reference.to_string();
        assert!(rendered.starts_with("fsmonitor://"));
        assert!(rendered.ends_with("/data/in/photo.tif"));

        let parsed: FileReference = rendered.parse().unwrap();
        assert_eq!(parsed, reference);
        assert_eq!(parsed.server(), server);
    }

    #[test]
    fn test_file_reference_rejects_garbage() {
        assert!("/data/in/photo.tif".parse::<FileReference>().is_err());
        assert!("fsmonitor://not-a-uuid".parse::<FileReference>().is_err());

        let server = ServerId::generate();
        assert!(format!("fsmonitor://{server}").parse::<FileReference>().is_err());
    }

    #[test]
    fn test_path_mode_from_str() {
        assert_eq!("flat".parse::<PathMode>().unwrap(), PathMode::Flat);
        assert_eq!("Follow".parse::<PathMode>().unwrap(), PathMode::Follow);
        assert!("sideways".parse::<PathMode>().is_err());
    }
}
