//! Event filter pipeline.
//!
//! Candidates come from the diff engine (added then changed entries). Each
//! stage may drop a candidate; survivors become `Create` events. Drops are
//! silent apart from a debug log line.

use std::path::Path;

use super::snapshot::Change;
use super::types::{FileEvent, MonitorConfig};
use crate::config::FilterConfig;

/// One predicate in the filter pipeline.
pub trait CandidateFilter: Send + Sync {
    /// Stage name for logging.
    fn name(&self) -> &str;

    /// Return true to keep the candidate.
    fn keep(&self, candidate: &Change) -> bool;
}

fn base_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Drops entries whose current size is zero.
///
/// Writers usually create, then write, then close; the create notification
/// races the write, so an empty file is almost always incomplete. A file
/// that is legitimately empty is never reported.
#[derive(Debug, Default)]
pub struct ZeroByteFilter;

impl CandidateFilter for ZeroByteFilter {
    fn name(&self) -> &str {
        "zero-byte"
    }

    fn keep(&self, candidate: &Change) -> bool {
        // Directories report a platform-specific size; they are handled by
        // DirectoryFilter instead.
        candidate.stat.is_dir || candidate.stat.size > 0
    }
}

/// Drops entries whose path contains a placeholder name produced by file
/// managers during drag and copy operations.
#[derive(Debug)]
pub struct TransientNameFilter {
    fragments: Vec<String>,
}

impl TransientNameFilter {
    pub fn new(fragments: Vec<String>) -> Self {
        Self { fragments }
    }
}

impl CandidateFilter for TransientNameFilter {
    fn name(&self) -> &str {
        "transient-name"
    }

    fn keep(&self, candidate: &Change) -> bool {
        let path = candidate.path.to_string_lossy();
        !self
            .fragments
            .iter()
            .any(|fragment| !fragment.is_empty() && path.contains(fragment.as_str()))
    }
}

/// Drops entries whose base name starts with the hidden-file marker.
#[derive(Debug)]
pub struct SystemFileFilter {
    prefix: String,
}

impl SystemFileFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl CandidateFilter for SystemFileFilter {
    fn name(&self) -> &str {
        "system-file"
    }

    fn keep(&self, candidate: &Change) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        match base_name(&candidate.path) {
            Some(name) => !name.starts_with(self.prefix.as_str()),
            None => true,
        }
    }
}

/// Keeps only entries whose extension or name is whitelisted.
///
/// Entries starting with `.` match the extension, case-insensitively.
/// Other entries match the full file name or the bare extension.
#[derive(Debug)]
pub struct WhitelistFilter {
    entries: Vec<String>,
}

impl WhitelistFilter {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    fn matches(&self, path: &Path) -> bool {
        let name = base_name(path);
        let extension = path.extension().and_then(|e| e.to_str());

        self.entries.iter().any(|entry| {
            if let Some(wanted) = entry.strip_prefix('.') {
                extension.is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
            } else {
                name == Some(entry.as_str())
                    || extension.is_some_and(|ext| ext.eq_ignore_ascii_case(entry))
            }
        })
    }
}

impl CandidateFilter for WhitelistFilter {
    fn name(&self) -> &str {
        "whitelist"
    }

    fn keep(&self, candidate: &Change) -> bool {
        // Directories are not subject to extension matching
        candidate.stat.is_dir || self.matches(&candidate.path)
    }
}

/// Drops directory entries.
#[derive(Debug, Default)]
pub struct DirectoryFilter;

impl CandidateFilter for DirectoryFilter {
    fn name(&self) -> &str {
        "directory"
    }

    fn keep(&self, candidate: &Change) -> bool {
        !candidate.stat.is_dir
    }
}

/// Ordered chain of filters applied to diff candidates.
pub struct FilterPipeline {
    stages: Vec<Box<dyn CandidateFilter>>,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

impl FilterPipeline {
    /// Pipeline with no stages; keeps everything.
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// Build the standard pipeline for a monitor.
    ///
    /// Order: zero-byte, transient-name, system-file (if enabled),
    /// whitelist (if non-empty), directory (if enabled).
    pub fn for_monitor(config: &MonitorConfig, policy: &FilterConfig) -> Self {
        let mut pipeline = Self::empty()
            .stage(ZeroByteFilter)
            .stage(TransientNameFilter::new(policy.transient_names.clone()));

        if config.ignore_sys_files {
            pipeline = pipeline.stage(SystemFileFilter::new(policy.hidden_prefix.clone()));
        }
        if !config.whitelist.is_empty() {
            pipeline = pipeline.stage(WhitelistFilter::new(config.whitelist.clone()));
        }
        if config.ignore_dir_events {
            pipeline = pipeline.stage(DirectoryFilter);
        }
        pipeline
    }

    /// Append a stage.
    pub fn stage(mut self, filter: impl CandidateFilter + 'static) -> Self {
        self.stages.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check one candidate against every stage in order.
    pub fn accepts(&self, candidate: &Change) -> bool {
        for stage in &self.stages {
            if !stage.keep(candidate) {
                crate::debug_event!(
                    "filter",
                    "dropped",
                    "{} by {}",
                    candidate.path.display(),
                    stage.name()
                );
                return false;
            }
        }
        true
    }

    /// Turn candidates into `Create` events, preserving their order.
    pub fn apply<'a>(&self, candidates: impl IntoIterator<Item = &'a Change>) -> Vec<FileEvent> {
        candidates
            .into_iter()
            .filter(|c| self.accepts(c))
            .map(|c| FileEvent::created(c.path.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::snapshot::EntryStat;
    use std::path::PathBuf;

    fn file(path: &str, size: u64) -> Change {
        Change {
            path: PathBuf::from(path),
            stat: EntryStat {
                size,
                mtime: None,
                is_dir: false,
            },
        }
    }

    fn dir(path: &str) -> Change {
        Change {
            path: PathBuf::from(path),
            stat: EntryStat {
                size: 4096,
                mtime: None,
                is_dir: true,
            },
        }
    }

    fn policy() -> FilterConfig {
        FilterConfig::default()
    }

    #[test]
    fn test_zero_byte_files_are_dropped() {
        let config = MonitorConfig::new("/in");
        let pipeline = FilterPipeline::for_monitor(&config, &policy());

        assert!(!pipeline.accepts(&file("/in/photo.tif", 0)));
        assert!(pipeline.accepts(&file("/in/photo.tif", 2048)));
    }

    #[test]
    fn test_transient_names_are_dropped() {
        let config = MonitorConfig::new("/in").ignore_dir_events(false);
        let pipeline = FilterPipeline::for_monitor(&config, &policy());

        assert!(!pipeline.accepts(&dir("/in/untitled folder")));
        assert!(!pipeline.accepts(&file("/in/untitled folder/a.tif", 10)));
        assert!(pipeline.accepts(&dir("/in/batch-01")));
    }

    #[test]
    fn test_system_files_respect_flag() {
        let hidden = file("/in/.DS_Store", 5);

        let ignoring = FilterPipeline::for_monitor(&MonitorConfig::new("/in"), &policy());
        assert!(!ignoring.accepts(&hidden));

        let keeping = FilterPipeline::for_monitor(
            &MonitorConfig::new("/in").ignore_sys_files(false),
            &policy(),
        );
        assert!(keeping.accepts(&hidden));
    }

    #[test]
    fn test_whitelist_by_extension() {
        let config = MonitorConfig::new("/in").whitelist([".tif"]);
        let pipeline = FilterPipeline::for_monitor(&config, &policy());

        assert!(pipeline.accepts(&file("/in/foo.tif", 10)));
        assert!(pipeline.accepts(&file("/in/FOO.TIF", 10)));
        assert!(!pipeline.accepts(&file("/in/foo.jpg", 10)));
        assert!(!pipeline.accepts(&file("/in/tif", 10)));
    }

    #[test]
    fn test_whitelist_by_name() {
        let filter = WhitelistFilter::new(vec!["manifest.xml".to_string(), "dv".to_string()]);

        assert!(filter.keep(&file("/in/manifest.xml", 1)));
        assert!(filter.keep(&file("/in/scan.dv", 1)));
        assert!(!filter.keep(&file("/in/other.xml", 1)));
    }

    #[test]
    fn test_directory_events_respect_flag() {
        let ignoring = FilterPipeline::for_monitor(&MonitorConfig::new("/in"), &policy());
        assert!(!ignoring.accepts(&dir("/in/batch")));

        let keeping = FilterPipeline::for_monitor(
            &MonitorConfig::new("/in").ignore_dir_events(false),
            &policy(),
        );
        assert!(keeping.accepts(&dir("/in/batch")));
    }

    #[test]
    fn test_apply_preserves_order() {
        let pipeline = FilterPipeline::for_monitor(&MonitorConfig::new("/in"), &policy());
        let candidates = vec![
            file("/in/b.tif", 3),
            file("/in/.hidden", 3),
            file("/in/a.tif", 0),
            file("/in/c.tif", 9),
        ];

        let events = pipeline.apply(&candidates);
        let paths: Vec<_> = events.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/in/b.tif"), PathBuf::from("/in/c.tif")]
        );
    }

    #[test]
    fn test_custom_policy() {
        let policy = FilterConfig {
            transient_names: vec!["Nouveau dossier".to_string()],
            hidden_prefix: "~".to_string(),
        };
        let pipeline = FilterPipeline::for_monitor(&MonitorConfig::new("/in"), &policy);

        assert!(!pipeline.accepts(&file("/in/Nouveau dossier/x.tif", 1)));
        assert!(!pipeline.accepts(&file("/in/~lock.tif", 1)));
        assert!(pipeline.accepts(&file("/in/.visible-here", 1)));
    }
}
