//! Reverse index from content digest to the file it was computed for.
//!
//! Entries are only trusted while the file still looks the way it did when
//! it was hashed. A lookup that finds the file gone or its size or mtime
//! moved evicts the entry instead of returning it.

use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;

use dashmap::DashMap;

use crate::monitor::FileReference;

/// Size and modification time of a file when its digest was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Fingerprint {
    size: u64,
    m_time: Option<SystemTime>,
}

impl Fingerprint {
    pub(super) fn of(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            m_time: metadata.modified().ok(),
        }
    }

    fn current(path: &Path) -> Option<Self> {
        std::fs::metadata(path)
            .ok()
            .filter(Metadata::is_file)
            .map(|metadata| Self::of(&metadata))
    }
}

#[derive(Debug, Clone)]
struct Recorded {
    reference: FileReference,
    fingerprint: Fingerprint,
}

#[derive(Debug, Default)]
pub(super) struct HashIndex {
    by_digest: DashMap<String, Recorded>,
    by_reference: DashMap<FileReference, String>,
}

impl HashIndex {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Record `digest` for `reference`, replacing whatever digest the
    /// reference had before.
    pub(super) fn record(&self, digest: &str, reference: &FileReference, fingerprint: Fingerprint) {
        if let Some(previous) = self
            .by_reference
            .insert(reference.clone(), digest.to_string())
            && previous != digest
        {
            self.by_digest
                .remove_if(&previous, |_, recorded| recorded.reference == *reference);
        }

        self.by_digest.insert(
            digest.to_string(),
            Recorded {
                reference: reference.clone(),
                fingerprint,
            },
        );
    }

    /// Reference whose current content still has `digest`.
    pub(super) fn lookup(&self, digest: &str) -> Option<FileReference> {
        // Clone out so no shard lock is held during the stat or eviction
        let recorded = self.by_digest.get(digest).map(|entry| entry.value().clone())?;

        if Fingerprint::current(recorded.reference.path()) == Some(recorded.fingerprint) {
            return Some(recorded.reference);
        }

        crate::debug_event!("files", "stale digest", "{} {digest}", recorded.reference);
        self.by_digest
            .remove_if(digest, |_, entry| entry.reference == recorded.reference);
        self.by_reference
            .remove_if(&recorded.reference, |_, entry| entry == digest);
        None
    }

    /// Drop whatever digest is recorded for `reference`.
    pub(super) fn forget(&self, reference: &FileReference) {
        if let Some((_, digest)) = self.by_reference.remove(reference) {
            self.by_digest
                .remove_if(&digest, |_, recorded| recorded.reference == *reference);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_digest.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ServerId;
    use std::fs;
    use tempfile::TempDir;

    fn fingerprint(path: &Path) -> Fingerprint {
        Fingerprint::current(path).unwrap()
    }

    #[test]
    fn test_rehash_replaces_previous_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        fs::write(&path, b"one").unwrap();
        let reference = FileReference::new(ServerId::generate(), &path);

        let index = HashIndex::new();
        index.record("aaaa", &reference, fingerprint(&path));
        fs::write(&path, b"second").unwrap();
        index.record("bbbb", &reference, fingerprint(&path));

        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("aaaa"), None);
        assert_eq!(index.lookup("bbbb"), Some(reference));
    }

    #[test]
    fn test_lookup_evicts_modified_and_deleted_files() {
        let temp = TempDir::new().unwrap();
        let edited = temp.path().join("edited.bin");
        let deleted = temp.path().join("deleted.bin");
        fs::write(&edited, b"before").unwrap();
        fs::write(&deleted, b"gone soon").unwrap();

        let server = ServerId::generate();
        let index = HashIndex::new();
        index.record("1111", &FileReference::new(server, &edited), fingerprint(&edited));
        index.record("2222", &FileReference::new(server, &deleted), fingerprint(&deleted));

        fs::write(&edited, b"after the rewrite").unwrap();
        fs::remove_file(&deleted).unwrap();

        assert_eq!(index.lookup("1111"), None);
        assert_eq!(index.lookup("2222"), None);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_forget_only_touches_own_digest() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("first.bin");
        let copy = temp.path().join("copy.bin");
        fs::write(&first, b"same").unwrap();
        fs::write(&copy, b"same").unwrap();

        let server = ServerId::generate();
        let first_ref = FileReference::new(server, &first);
        let copy_ref = FileReference::new(server, &copy);
        let index = HashIndex::new();
        index.record("cafe", &first_ref, fingerprint(&first));
        // Identical content: the later file owns the digest
        index.record("cafe", &copy_ref, fingerprint(&copy));

        index.forget(&first_ref);
        assert_eq!(index.lookup("cafe"), Some(copy_ref.clone()));

        index.forget(&copy_ref);
        assert_eq!(index.lookup("cafe"), None);
    }
}
