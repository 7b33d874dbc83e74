//! File-reference operations: metadata, content hashing and block reads.
//!
//! All operations resolve a [`FileReference`] minted by this server to a
//! local path first. I/O failures are translated into [`ServerError`]s that
//! name the reference.

use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use super::MonitorServer;
use super::error::{ServerError, ServerResult};
use super::hash_index::Fingerprint;
use crate::monitor::{FileReference, FileStats, FileType};

impl MonitorServer {
    /// Mint a reference for `path` on this server.
    ///
    /// Relative paths are taken relative to the working directory.
    pub fn file_reference(&self, path: impl AsRef<Path>) -> FileReference {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        FileReference::new(self.server_id, absolute)
    }

    fn resolve<'r>(&self, reference: &'r FileReference) -> ServerResult<&'r Path> {
        if reference.server() != self.server_id {
            return Err(ServerError::FileNotFound {
                reference: reference.to_string(),
                reason: "not on this server".to_string(),
            });
        }
        Ok(reference.path())
    }

    fn metadata(&self, reference: &FileReference) -> ServerResult<Metadata> {
        let path = self.resolve(reference)?;
        std::fs::metadata(path).map_err(|e| ServerError::io(reference, &e))
    }

    pub fn get_base_name(&self, reference: &FileReference) -> ServerResult<String> {
        let path = self.resolve(reference)?;
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ServerError::FileAccess {
                reference: reference.to_string(),
                reason: "path has no base name".to_string(),
            })
    }

    pub fn get_owner(&self, reference: &FileReference) -> ServerResult<String> {
        Ok(owner_name(&self.metadata(reference)?))
    }

    pub fn get_size(&self, reference: &FileReference) -> ServerResult<u64> {
        Ok(self.metadata(reference)?.len())
    }

    /// Status-change time on Unix, creation time elsewhere.
    pub fn get_c_time(&self, reference: &FileReference) -> ServerResult<SystemTime> {
        let metadata = self.metadata(reference)?;
        change_time(&metadata).map_err(|e| ServerError::io(reference, &e))
    }

    pub fn get_m_time(&self, reference: &FileReference) -> ServerResult<SystemTime> {
        self.metadata(reference)?
            .modified()
            .map_err(|e| ServerError::io(reference, &e))
    }

    pub fn get_a_time(&self, reference: &FileReference) -> ServerResult<SystemTime> {
        self.metadata(reference)?
            .accessed()
            .map_err(|e| ServerError::io(reference, &e))
    }

    pub fn is_dir(&self, reference: &FileReference) -> ServerResult<bool> {
        Ok(self.metadata(reference)?.is_dir())
    }

    pub fn is_file(&self, reference: &FileReference) -> ServerResult<bool> {
        Ok(self.metadata(reference)?.is_file())
    }

    /// Name, owner, size, timestamps and type in one call.
    ///
    /// A dangling symlink is reported as [`FileType::Link`] with the link's
    /// own metadata.
    pub fn get_stats(&self, reference: &FileReference) -> ServerResult<FileStats> {
        let path = self.resolve(reference)?;
        let io = |e: std::io::Error| ServerError::io(reference, &e);

        let (metadata, file_type) = match std::fs::metadata(path) {
            Ok(metadata) => {
                let file_type = classify(path, &metadata);
                (metadata, file_type)
            }
            Err(e) => match std::fs::symlink_metadata(path) {
                Ok(link) if link.file_type().is_symlink() => (link, FileType::Link),
                _ => return Err(io(e)),
            },
        };

        Ok(FileStats {
            base_name: self.get_base_name(reference)?,
            owner: owner_name(&metadata),
            size: metadata.len(),
            m_time: metadata.modified().map_err(io)?,
            c_time: change_time(&metadata).map_err(io)?,
            a_time: metadata.accessed().map_err(io)?,
            file_type,
        })
    }

    /// SHA-256 hex digest of the file's content.
    ///
    /// The result is also recorded for [`get_file_reference_by_hash`](Self::get_file_reference_by_hash),
    /// replacing any digest recorded earlier for the same reference.
    pub async fn get_content_hash(&self, reference: &FileReference) -> ServerResult<String> {
        let path = self.resolve(reference)?.to_path_buf();
        let block_size = self.settings.server.hash_block_size.max(1);
        let _permit = self.reads.acquire().await.map_err(|e| ServerError::HashComputation {
            reference: reference.to_string(),
            reason: e.to_string(),
        })?;

        let owned = reference.clone();
        let (digest, fingerprint) =
            tokio::task::spawn_blocking(move || digest_file(&path, block_size, &owned))
                .await
                .map_err(|e| ServerError::HashComputation {
                    reference: reference.to_string(),
                    reason: e.to_string(),
                })??;

        self.hashes.record(&digest, reference, fingerprint);
        crate::debug_event!("files", "hashed", "{reference} {digest}");
        Ok(digest)
    }

    /// Reverse lookup of a digest previously computed by this server.
    ///
    /// Only files whose size and mtime are unchanged since they were hashed
    /// are returned; anything else is dropped from the index.
    pub fn get_file_reference_by_hash(&self, hash: &str) -> ServerResult<FileReference> {
        let key = hash.trim().to_ascii_lowercase();
        self.hashes
            .lookup(&key)
            .ok_or_else(|| ServerError::FileNotFound {
                reference: hash.to_string(),
                reason: "no current file with this content hash".to_string(),
            })
    }

    /// Read at most `size` bytes starting at `offset`.
    ///
    /// Fewer bytes are returned at end of file; an offset past the end
    /// yields an empty block.
    pub async fn read_block(
        &self,
        reference: &FileReference,
        offset: u64,
        size: usize,
    ) -> ServerResult<Vec<u8>> {
        let path = self.resolve(reference)?.to_path_buf();
        let _permit = self.reads.acquire().await.map_err(|e| ServerError::FileAccess {
            reference: reference.to_string(),
            reason: e.to_string(),
        })?;

        let result = tokio::task::spawn_blocking(move || read_at(&path, offset, size))
            .await
            .map_err(|e| ServerError::FileAccess {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;

        result.map_err(|e| ServerError::FileAccess {
            reference: reference.to_string(),
            reason: format!("failed to read data: {e}"),
        })
    }
}

fn digest_file(
    path: &Path,
    block_size: usize,
    reference: &FileReference,
) -> ServerResult<(String, Fingerprint)> {
    let mut file = File::open(path).map_err(|e| ServerError::io(reference, &e))?;
    // Taken before reading so a write during hashing shows up as stale
    let fingerprint = file
        .metadata()
        .map(|metadata| Fingerprint::of(&metadata))
        .map_err(|e| ServerError::io(reference, &e))?;
    let mut hasher = Sha256::new();
    let mut block = vec![0u8; block_size];

    loop {
        let n = match file.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ServerError::HashComputation {
                    reference: reference.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        hasher.update(&block[..n]);
    }

    Ok((format!("{:x}", hasher.finalize()), fingerprint))
}

fn read_at(path: &Path, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut data = Vec::with_capacity(size.min(1 << 20));
    file.take(size as u64).read_to_end(&mut data)?;
    Ok(data)
}

fn classify(path: &Path, metadata: &Metadata) -> FileType {
    if metadata.is_file() {
        FileType::File
    } else if metadata.is_dir() {
        if is_mount_point(path, metadata) {
            FileType::Mount
        } else {
            FileType::Dir
        }
    } else {
        FileType::Unknown
    }
}

/// A directory on a different device than its parent, or the filesystem root.
#[cfg(unix)]
fn is_mount_point(path: &Path, metadata: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;

    match path.parent() {
        Some(parent) => std::fs::metadata(parent)
            .map(|p| p.dev() != metadata.dev())
            .unwrap_or(false),
        None => true,
    }
}

#[cfg(not(unix))]
fn is_mount_point(path: &Path, _metadata: &Metadata) -> bool {
    path.parent().is_none()
}

#[cfg(unix)]
fn change_time(metadata: &Metadata) -> std::io::Result<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    use std::time::Duration;

    let secs = metadata.ctime();
    let nanos = metadata.ctime_nsec().clamp(0, 999_999_999) as u32;
    let time = if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nanos)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
            + Duration::from_nanos(nanos.into())
    };
    Ok(time)
}

#[cfg(not(unix))]
fn change_time(metadata: &Metadata) -> std::io::Result<SystemTime> {
    metadata.created()
}

#[cfg(unix)]
fn owner_name(metadata: &Metadata) -> String {
    use std::os::unix::fs::MetadataExt;

    let uid = metadata.uid();
    user_name(uid).unwrap_or_else(|| uid.to_string())
}

#[cfg(not(unix))]
fn owner_name(_metadata: &Metadata) -> String {
    "unknown".to_string()
}

/// Look up a login name in the password database.
#[cfg(unix)]
fn user_name(uid: libc::uid_t) -> Option<String> {
    let mut buf = vec![0 as libc::c_char; 1024];
    loop {
        // SAFETY: zeroed passwd is a valid out-parameter; buf outlives the call
        // and pw_name points into buf on success.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result)
        };

        if rc == libc::ERANGE && buf.len() < 64 * 1024 {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
            return None;
        }
        // SAFETY: non-null, NUL-terminated and backed by buf
        let name = unsafe { std::ffi::CStr::from_ptr(pwd.pw_name) };
        return Some(name.to_string_lossy().into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::monitor::ServerId;
    use std::fs;
    use tempfile::TempDir;

    fn server() -> MonitorServer {
        MonitorServer::new(Settings::default())
    }

    #[test]
    fn test_foreign_reference_rejected() {
        let server = server();
        let foreign = FileReference::new(ServerId::generate(), "/etc/hosts");

        let err = server.get_size(&foreign).unwrap_err();
        assert!(matches!(err, ServerError::FileNotFound { .. }));
        assert!(err.to_string().contains("not on this server"));
    }

    #[test]
    fn test_metadata_operations() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("photo.tif");
        fs::write(&path, vec![0u8; 2048]).unwrap();

        let server = server();
        let file = server.file_reference(&path);
        let dir = server.file_reference(temp.path());

        assert_eq!(server.get_base_name(&file).unwrap(), "photo.tif");
        assert_eq!(server.get_size(&file).unwrap(), 2048);
        assert!(server.is_file(&file).unwrap());
        assert!(!server.is_dir(&file).unwrap());
        assert!(server.is_dir(&dir).unwrap());
        assert!(!server.get_owner(&file).unwrap().is_empty());
        assert!(server.get_m_time(&file).unwrap() <= SystemTime::now());
        server.get_c_time(&file).unwrap();
        server.get_a_time(&file).unwrap();

        let stats = server.get_stats(&file).unwrap();
        assert_eq!(stats.base_name, "photo.tif");
        assert_eq!(stats.size, 2048);
        assert_eq!(stats.file_type, FileType::File);
        assert_eq!(server.get_stats(&dir).unwrap().file_type, FileType::Dir);
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let server = server();
        let missing = server.file_reference(temp.path().join("absent.tif"));

        assert!(matches!(
            server.get_size(&missing),
            Err(ServerError::FileNotFound { .. })
        ));
        assert!(matches!(
            server.get_stats(&missing),
            Err(ServerError::FileNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_link() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("dangling");
        std::os::unix::fs::symlink(temp.path().join("nowhere"), &link).unwrap();

        let server = server();
        let stats = server.get_stats(&server.file_reference(&link)).unwrap();
        assert_eq!(stats.file_type, FileType::Link);
    }

    #[tokio::test]
    async fn test_read_block() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        let content: Vec<u8> = (0..=255u8).collect();
        fs::write(&path, &content).unwrap();

        let server = server();
        let file = server.file_reference(&path);

        assert_eq!(server.read_block(&file, 0, 256).await.unwrap(), content);
        assert_eq!(server.read_block(&file, 10, 4).await.unwrap(), vec![10, 11, 12, 13]);
        assert_eq!(server.read_block(&file, 250, 100).await.unwrap().len(), 6);
        assert!(server.read_block(&file, 1000, 16).await.unwrap().is_empty());

        let missing = server.file_reference(temp.path().join("absent"));
        assert!(matches!(
            server.read_block(&missing, 0, 1).await,
            Err(ServerError::FileAccess { .. })
        ));
    }

    #[tokio::test]
    async fn test_content_hash_and_reverse_lookup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"abc").unwrap();

        let server = server();
        let file = server.file_reference(&path);
        let digest = server.get_content_hash(&file).await.unwrap();

        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(server.get_file_reference_by_hash(&digest).unwrap(), file);
        assert_eq!(
            server
                .get_file_reference_by_hash(&digest.to_ascii_uppercase())
                .unwrap(),
            file
        );
        assert!(matches!(
            server.get_file_reference_by_hash("00"),
            Err(ServerError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_reverse_lookup_follows_current_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        fs::write(&path, b"original content").unwrap();

        let server = server();
        let file = server.file_reference(&path);
        let original = server.get_content_hash(&file).await.unwrap();

        // Rewritten but not hashed again: the old digest no longer matches
        fs::write(&path, b"rewritten").unwrap();
        assert!(matches!(
            server.get_file_reference_by_hash(&original),
            Err(ServerError::FileNotFound { .. })
        ));

        let current = server.get_content_hash(&file).await.unwrap();
        assert_ne!(current, original);
        assert_eq!(server.get_file_reference_by_hash(&current).unwrap(), file);
        assert!(server.get_file_reference_by_hash(&original).is_err());

        fs::remove_file(&path).unwrap();
        assert!(matches!(
            server.get_file_reference_by_hash(&current),
            Err(ServerError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rehash_drops_previous_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("b.bin");
        fs::write(&path, b"first").unwrap();

        let server = server();
        let file = server.file_reference(&path);
        let first = server.get_content_hash(&file).await.unwrap();
        fs::write(&path, b"second version").unwrap();
        server.get_content_hash(&file).await.unwrap();

        // Restoring the old bytes does not resurrect the old entry
        fs::write(&path, b"first").unwrap();
        assert!(server.get_file_reference_by_hash(&first).is_err());
    }

    #[tokio::test]
    async fn test_hash_spans_blocks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        let content = vec![42u8; 5000];
        fs::write(&path, &content).unwrap();

        let mut settings = Settings::default();
        settings.server.hash_block_size = 7;
        let server = MonitorServer::new(settings);
        let digest = server
            .get_content_hash(&server.file_reference(&path))
            .await
            .unwrap();

        assert_eq!(digest, format!("{:x}", Sha256::digest(&content)));
    }
}
