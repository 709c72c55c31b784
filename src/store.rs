use crate::error::{GateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Sidecar file holding the last-artifact record across restarts. Dot-named so
/// the sanitized lookup paths can never reach it.
const RECORD_FILE: &str = ".last_artifact.json";

/// Metadata for the most recently ingested attachment. Exactly one record is
/// retained; each successful ingestion replaces the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub stored_path: String,
    pub file_name: String,
    /// Size at download completion; the live size may diverge if the file is
    /// modified externally (see [`ArtifactStore::get_last`]).
    pub file_size: u64,
    pub download_url: String,
    pub download_timestamp: DateTime<Utc>,
    pub chat_id: i64,
    pub sender: String,
    pub sha256: String,
}

/// Record as returned to readers: the stored snapshot plus a live existence
/// check and current on-disk size.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStatus {
    #[serde(flatten)]
    pub record: ArtifactRecord,
    pub exists: bool,
    pub current_size: Option<u64>,
}

/// Directory of downloaded attachments plus the single last-artifact record.
/// One mutex guards every record read-modify-write and the eviction sweep so
/// an in-flight ingestion cannot race an eviction.
pub struct ArtifactStore {
    dir: PathBuf,
    last: Mutex<Option<ArtifactRecord>>,
}

/// Strips any directory components from a requested name. Returns `None` for
/// names with no usable final component and for dot-prefixed names.
fn sanitize_name(name: &str) -> Option<String> {
    let component = Path::new(name).file_name()?.to_str()?;
    if component.is_empty() || component.starts_with('.') {
        return None;
    }
    Some(component.to_string())
}

impl ArtifactStore {
    /// Opens (creating if needed) the artifact directory and reloads any
    /// persisted record from a previous run.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let record_path = dir.join(RECORD_FILE);
        let last = match fs::read_to_string(&record_path) {
            Ok(raw) => match serde_json::from_str::<ArtifactRecord>(&raw) {
                Ok(record) => {
                    debug!("Reloaded last-artifact record for '{}'", record.file_name);
                    Some(record)
                }
                Err(e) => {
                    warn!("Ignoring unreadable record file {:?}: {}", record_path, e);
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Self {
            dir,
            last: Mutex::new(last),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists attachment bytes and replaces the last-artifact record.
    pub fn put(
        &self,
        file_name: &str,
        bytes: &[u8],
        download_url: &str,
        chat_id: i64,
        sender: &str,
    ) -> Result<ArtifactRecord> {
        let name = sanitize_name(file_name).ok_or_else(|| GateError::Api {
            message: format!("Unusable attachment file name '{}'", file_name),
        })?;

        let sha256 = {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        };

        let path = self.dir.join(&name);
        let mut last = self.last.lock().unwrap();
        fs::write(&path, bytes)?;

        let record = ArtifactRecord {
            stored_path: path.to_string_lossy().into_owned(),
            file_name: name,
            file_size: bytes.len() as u64,
            download_url: download_url.to_string(),
            download_timestamp: Utc::now(),
            chat_id,
            sender: sender.to_string(),
            sha256,
        };
        self.persist_record(Some(&record));
        *last = Some(record.clone());
        Ok(record)
    }

    /// Current record, augmented with a live check of the underlying file.
    pub fn get_last(&self) -> Option<ArtifactStatus> {
        let record = self.last.lock().unwrap().clone()?;
        let meta = fs::metadata(&record.stored_path).ok();
        Some(ArtifactStatus {
            exists: meta.is_some(),
            current_size: meta.map(|m| m.len()),
            record,
        })
    }

    /// Reads a stored artifact strictly from within the artifact directory.
    /// Directory components in `name` are stripped before lookup.
    pub fn serve(&self, name: &str) -> Result<Option<(String, Vec<u8>)>> {
        let Some(name) = sanitize_name(name) else {
            return Ok(None);
        };
        let path = self.dir.join(&name);
        if path.is_dir() {
            return Ok(None);
        }
        // Read directly instead of stat-then-read: a file deleted in between
        // is still a NotFound, not a server error.
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some((name, bytes)))
    }

    /// Deletes one named artifact; clears the record if it pointed at it.
    pub fn delete_one(&self, name: &str) -> Result<bool> {
        let Some(name) = sanitize_name(name) else {
            return Ok(false);
        };
        let path = self.dir.join(&name);

        let mut last = self.last.lock().unwrap();
        if path.is_dir() {
            return Ok(false);
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if last.as_ref().map(|r| r.file_name == name).unwrap_or(false) {
            *last = None;
            self.persist_record(None);
        }
        debug!("Deleted artifact '{}'", name);
        Ok(true)
    }

    /// Deletes every regular file in the artifact directory and clears the
    /// record. Individual unlink failures are logged and skipped.
    pub fn evict_all(&self) -> Result<usize> {
        let mut last = self.last.lock().unwrap();
        let mut deleted = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || entry.file_name().to_string_lossy() == RECORD_FILE {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete {:?}, skipping: {}", path, e),
            }
        }
        *last = None;
        self.persist_record(None);
        debug!("Evicted {} artifact(s)", deleted);
        Ok(deleted)
    }

    // Best-effort sidecar write; the in-memory record stays authoritative for
    // this process either way. Callers hold the record lock.
    fn persist_record(&self, record: Option<&ArtifactRecord>) {
        let path = self.dir.join(RECORD_FILE);
        let outcome = match record {
            Some(record) => serde_json::to_string_pretty(record)
                .map_err(GateError::from)
                .and_then(|raw| fs::write(&path, raw).map_err(GateError::from)),
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        };
        if let Err(e) = outcome {
            warn!("Failed to persist record file {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> ArtifactStore {
        ArtifactStore::open(dir).unwrap()
    }

    #[test]
    fn put_then_get_last_round_trips() {
        let tmp = tempdir().unwrap();
        let store = store_in(tmp.path());

        let record = store
            .put("report.pdf", b"pdf-bytes", "https://files/abc", 42, "alice")
            .unwrap();
        assert_eq!(record.file_name, "report.pdf");
        assert_eq!(record.file_size, 9);

        let status = store.get_last().unwrap();
        assert!(status.exists);
        assert_eq!(status.current_size, Some(9));
        assert_eq!(status.record.file_name, "report.pdf");

        let (name, bytes) = store.serve("report.pdf").unwrap().unwrap();
        assert_eq!(name, "report.pdf");
        assert_eq!(bytes, b"pdf-bytes");
    }

    #[test]
    fn record_survives_reopen() {
        let tmp = tempdir().unwrap();
        store_in(tmp.path())
            .put("a.bin", b"12345", "url", 1, "alice")
            .unwrap();

        let reopened = store_in(tmp.path());
        let status = reopened.get_last().unwrap();
        assert_eq!(status.record.file_name, "a.bin");
        assert_eq!(status.record.file_size, 5);
    }

    #[test]
    fn serve_neutralizes_path_traversal() {
        let tmp = tempdir().unwrap();
        let store = store_in(tmp.path());
        store.put("inside.txt", b"safe", "url", 1, "alice").unwrap();

        // Traversal collapses to the final component, which does not exist
        // inside the directory.
        assert!(store.serve("../../etc/passwd").unwrap().is_none());
        assert!(store.serve("a/b/c").unwrap().is_none());
        assert!(store.serve("..").unwrap().is_none());
        // A nested path ending in a stored name still resolves inside the dir.
        assert!(store.serve("x/y/inside.txt").unwrap().is_some());
    }

    #[test]
    fn serve_and_delete_treat_vanished_files_as_missing() {
        let tmp = tempdir().unwrap();
        let store = store_in(tmp.path());

        // A name whose file is gone by read time is a miss, not an error.
        assert!(store.serve("vanished.bin").unwrap().is_none());
        assert!(!store.delete_one("vanished.bin").unwrap());

        // Subdirectories are never served or deleted.
        fs::create_dir(tmp.path().join("nested")).unwrap();
        assert!(store.serve("nested").unwrap().is_none());
        assert!(!store.delete_one("nested").unwrap());
    }

    #[test]
    fn record_sidecar_is_not_servable() {
        let tmp = tempdir().unwrap();
        let store = store_in(tmp.path());
        store.put("a.bin", b"1", "url", 1, "alice").unwrap();
        assert!(store.serve(RECORD_FILE).unwrap().is_none());
        assert!(!store.delete_one(RECORD_FILE).unwrap());
    }

    #[test]
    fn second_ingestion_replaces_record_but_keeps_first_file() {
        let tmp = tempdir().unwrap();
        let store = store_in(tmp.path());
        store.put("first.bin", b"one", "url-1", 1, "alice").unwrap();
        store.put("second.bin", b"two", "url-2", 1, "alice").unwrap();

        let status = store.get_last().unwrap();
        assert_eq!(status.record.file_name, "second.bin");
        assert!(tmp.path().join("first.bin").is_file());
    }

    #[test]
    fn evict_all_clears_files_and_record() {
        let tmp = tempdir().unwrap();
        let store = store_in(tmp.path());
        store.put("a.bin", b"1", "url", 1, "alice").unwrap();
        store.put("b.bin", b"2", "url", 1, "alice").unwrap();

        assert_eq!(store.evict_all().unwrap(), 2);
        assert!(store.get_last().is_none());
        let remaining = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(remaining, 0);

        // Eviction survives a restart too.
        assert!(store_in(tmp.path()).get_last().is_none());
    }

    #[test]
    fn delete_one_clears_matching_record() {
        let tmp = tempdir().unwrap();
        let store = store_in(tmp.path());
        store.put("keep.bin", b"1", "url", 1, "alice").unwrap();
        store.put("gone.bin", b"2", "url", 1, "alice").unwrap();

        assert!(store.delete_one("gone.bin").unwrap());
        assert!(store.get_last().is_none());
        assert!(!store.delete_one("gone.bin").unwrap());
        assert!(tmp.path().join("keep.bin").is_file());
    }
}
