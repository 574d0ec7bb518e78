// ABOUTME: Persistence tier for artifacts: the ArtifactStore trait plus file and memory stores.
// ABOUTME: The file store splits artifacts into sync.json metadata and local.json content.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{join_records, Artifact, LocalRecord, SyncRecord};

pub const SYNC_FILE: &str = "sync.json";
pub const LOCAL_FILE: &str = "local.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed store file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where artifacts live between runs.
pub trait ArtifactStore: Send + Sync {
    fn load(&self) -> Result<Vec<Artifact>, StoreError>;

    /// Replaces the stored set with `artifacts`.
    fn save_all(&self, artifacts: &[Artifact]) -> Result<(), StoreError>;

    /// Human-readable location, used in error messages.
    fn location(&self) -> String;
}

/// Two JSON files in one directory: the small metadata tier and the larger
/// content tier keyed by artifact id.
#[derive(Debug, Clone)]
pub struct SplitFileStore {
    dir: PathBuf,
}

impl SplitFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn sync_path(&self) -> PathBuf {
        self.dir.join(SYNC_FILE)
    }

    fn local_path(&self) -> PathBuf {
        self.dir.join(LOCAL_FILE)
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if data.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&data).map_err(|e| StoreError::json(path, e))
}

/// Writes via a sibling temp file and a rename so readers never see a
/// partially written file.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

impl ArtifactStore for SplitFileStore {
    fn load(&self) -> Result<Vec<Artifact>, StoreError> {
        let sync: Vec<SyncRecord> = read_json(&self.sync_path())?;
        let local: HashMap<String, LocalRecord> = read_json(&self.local_path())?;
        debug!(dir = %self.dir.display(), records = sync.len(), "loaded artifacts");
        Ok(join_records(sync, local))
    }

    fn save_all(&self, artifacts: &[Artifact]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut sync = Vec::with_capacity(artifacts.len());
        let mut local = BTreeMap::new();
        for artifact in artifacts {
            let (meta, content) = artifact.split();
            sync.push(meta);
            local.insert(artifact.id.clone(), content);
        }
        write_json(&self.local_path(), &local)?;
        write_json(&self.sync_path(), &sync)?;
        debug!(dir = %self.dir.display(), records = sync.len(), "saved artifacts");
        Ok(())
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// In-memory store that counts saves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: Mutex<Vec<Artifact>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        Self {
            artifacts: Mutex::new(artifacts),
            saves: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> Vec<Artifact> {
        self.artifacts.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl ArtifactStore for MemoryStore {
    fn load(&self) -> Result<Vec<Artifact>, StoreError> {
        Ok(self.snapshot())
    }

    fn save_all(&self, artifacts: &[Artifact]) -> Result<(), StoreError> {
        *self.artifacts.lock() = artifacts.to_vec();
        *self.saves.lock() += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn artifact(id: &str) -> Artifact {
        Artifact {
            id: id.to_string(),
            url: format!("https://example.com/{}", id),
            selector: format!("#{}", id),
            heading_fingerprint: Some("Heading".to_string()),
            html_cache: format!("<div id=\"{}\"><h2>Heading</h2></div>", id),
            excluded_selectors: vec![".ad".to_string()],
            name: id.to_uppercase(),
            ..Default::default()
        }
    }

    #[test]
    fn file_store_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SplitFileStore::new(dir.path().join("deck"));
        let artifacts = vec![artifact("b"), artifact("a")];
        store.save_all(&artifacts).unwrap();

        assert!(dir.path().join("deck").join(SYNC_FILE).exists());
        assert!(dir.path().join("deck").join(LOCAL_FILE).exists());
        assert!(!dir.path().join("deck").join("sync.json.tmp").exists());
        assert_eq!(store.load().unwrap(), artifacts);
    }

    #[test]
    fn metadata_file_carries_no_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = SplitFileStore::new(dir.path());
        store.save_all(&[artifact("a")]).unwrap();
        let sync = fs::read_to_string(dir.path().join(SYNC_FILE)).unwrap();
        assert!(!sync.contains("htmlCache"));
        let local = fs::read_to_string(dir.path().join(LOCAL_FILE)).unwrap();
        assert!(local.contains("htmlCache"));
    }

    #[test]
    fn missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SplitFileStore::new(dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SYNC_FILE), "{not json").unwrap();
        let err = SplitFileStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryStore::new(vec![artifact("a")]);
        store.save_all(&[]).unwrap();
        assert_eq!(store.save_count(), 1);
        assert!(store.load().unwrap().is_empty());
    }
}
