//! Directory snapshots and the diff engine.
//!
//! Native watch sources only say "this directory changed". The diff engine
//! re-reads the directory and compares it against the last listing it saw,
//! so missed or merged notifications never lose information: truth is always
//! re-derived from a fresh listing.
//!
//! Snapshots are replaced wholesale after every diff, never patched.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// What the diff engine remembers about one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub size: u64,
    pub mtime: Option<SystemTime>,
    pub is_dir: bool,
}

/// Listing of one directory at a sampling instant.
///
/// Entries are kept ordered by name so diffs come out in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    entries: BTreeMap<OsString, EntryStat>,
}

impl DirectorySnapshot {
    /// Snapshot with no entries (a directory never seen before).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read the current listing of `dir`.
    ///
    /// Entries that vanish between `read_dir` and `metadata` are skipped.
    pub fn read(dir: &Path) -> io::Result<Self> {
        let mut entries = BTreeMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            entries.insert(
                entry.file_name(),
                EntryStat {
                    size: metadata.len(),
                    mtime: metadata.modified().ok(),
                    is_dir: metadata.is_dir(),
                },
            );
        }
        Ok(Self { entries })
    }

    /// Build a snapshot from explicit entries.
    pub fn from_entries<I, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, EntryStat)>,
        N: Into<OsString>,
    {
        Self {
            entries: entries.into_iter().map(|(n, s)| (n.into(), s)).collect(),
        }
    }

    pub fn get(&self, name: &OsString) -> Option<&EntryStat> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of entries that are directories.
    pub fn subdirectories(&self) -> impl Iterator<Item = &OsString> {
        self.entries
            .iter()
            .filter(|(_, stat)| stat.is_dir)
            .map(|(name, _)| name)
    }
}

/// One entry reported by a diff, with the stat from the side it exists on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: PathBuf,
    pub stat: EntryStat,
}

/// Result of comparing two listings of the same directory.
///
/// The three sets are disjoint. `added` and `changed` carry the current
/// stat, `removed` the last known one. A directory that stays a directory
/// is never `changed`: its own size and mtime only track its contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<Change>,
    pub removed: Vec<Change>,
    pub changed: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Added entries followed by changed entries, in detection order.
    pub fn candidates(&self) -> impl Iterator<Item = &Change> {
        self.added.iter().chain(self.changed.iter())
    }
}

/// Compare `before` with `after` for the directory `dir`.
pub fn diff(dir: &Path, before: &DirectorySnapshot, after: &DirectorySnapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (name, stat) in &after.entries {
        match before.entries.get(name) {
            None => changes.added.push(Change {
                path: dir.join(name),
                stat: *stat,
            }),
            Some(old) if old.is_dir && stat.is_dir => {}
            Some(old) if old != stat => changes.changed.push(Change {
                path: dir.join(name),
                stat: *stat,
            }),
            Some(_) => {}
        }
    }

    for (name, stat) in &before.entries {
        if !after.entries.contains_key(name) {
            changes.removed.push(Change {
                path: dir.join(name),
                stat: *stat,
            });
        }
    }

    changes
}

/// Per-directory snapshots owned by one monitor's diff cycle.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: HashMap<PathBuf, DirectorySnapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current listing of `dir` as its baseline.
    pub fn seed(&mut self, dir: &Path) -> io::Result<()> {
        let snapshot = DirectorySnapshot::read(dir)?;
        self.snapshots.insert(dir.to_path_buf(), snapshot);
        Ok(())
    }

    /// Start tracking `dir` as if it had been empty.
    ///
    /// Used for directories that appear after the monitor started, so
    /// everything already inside them counts as added.
    pub fn seed_empty(&mut self, dir: &Path) {
        self.snapshots
            .entry(dir.to_path_buf())
            .or_insert_with(DirectorySnapshot::empty);
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.snapshots.contains_key(dir)
    }

    pub fn get(&self, dir: &Path) -> Option<&DirectorySnapshot> {
        self.snapshots.get(dir)
    }

    pub fn forget(&mut self, dir: &Path) {
        self.snapshots.remove(dir);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Diff the current listing of `dir` against its stored snapshot and
    /// swap in the fresh listing.
    ///
    /// If `dir` no longer exists, every former entry is reported removed and
    /// no snapshot is kept until the directory is seeded again.
    pub fn compute_changes(&mut self, dir: &Path) -> io::Result<ChangeSet> {
        let before = self.snapshots.remove(dir).unwrap_or_default();

        match DirectorySnapshot::read(dir) {
            Ok(after) => {
                let changes = diff(dir, &before, &after);
                self.snapshots.insert(dir.to_path_buf(), after);
                Ok(changes)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(diff(dir, &before, &DirectorySnapshot::empty()))
            }
            Err(e) => {
                // Keep the old baseline so the next cycle still has something to compare with
                self.snapshots.insert(dir.to_path_buf(), before);
                Err(e)
            }
        }
    }

    /// Drop every snapshot at or below `dir`.
    pub fn forget_tree(&mut self, dir: &Path) {
        self.snapshots.retain(|path, _| !path.starts_with(dir));
    }
}
