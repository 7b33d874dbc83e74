//! Directory monitors that report newly completed files.
//!
//! # Architecture
//!
//! ```text
//! PlatformMonitor (one per watch request)
//!   - NativeWatcher (notify recommended or polling backend)
//!   - Settler (coalesces bursts per directory)
//!   - SnapshotStore (diff engine)
//!   - FilterPipeline (zero-byte, transient, system, whitelist, directory)
//!         |
//!     EventSink (the coordinator's callback dispatch)
//! ```

mod debouncer;
mod error;
pub mod filter;
mod platform;
pub mod snapshot;
pub mod types;

pub use debouncer::Settler;
pub use error::{MonitorError, MonitorResult};
pub use filter::{CandidateFilter, FilterPipeline};
pub use platform::{EventSink, PlatformMonitor, RunHandle};
pub use snapshot::{ChangeSet, DirectorySnapshot, SnapshotStore};
pub use types::{
    EventType, FileEvent, FileReference, FileStats, FileType, MonitorConfig, MonitorId,
    MonitorState, MonitorType, PathMode, ServerId,
};
