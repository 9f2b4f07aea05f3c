// src/store/file.rs
//! One JSON document per source under a state directory.
//! Writes go to a temp file that is renamed over the old document, so a crash
//! leaves either the previous or the new state, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::ingest::content_hash;

use super::{apply_batch, CommitBatch, SeenRecord, StateStore};

const DOC_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateDoc {
    version: u32,
    source_id: String,
    // sorted for stable diffs of the document
    records: BTreeMap<String, SeenRecord>,
}

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create the directory if needed and check that it is writable.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            StoreError::unavailable(format!("creating state dir {}: {e}", dir.display()))
        })?;
        let probe = dir.join(".probe");
        fs::write(&probe, b"ok").await.map_err(|e| {
            StoreError::unavailable(format!("state dir {} not writable: {e}", dir.display()))
        })?;
        let _ = fs::remove_file(&probe).await;

        tracing::info!(target: "store", dir = %dir.display(), "file store opened");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// `tracker.one` → `tracker.one.json`; anything unusual gets a hash suffix
    /// so two ids never share a file.
    pub fn path_for(&self, source_id: &str) -> PathBuf {
        let safe: String = source_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = if safe == source_id && !safe.starts_with('.') {
            format!("{safe}.json")
        } else {
            format!("{safe}-{}.json", content_hash(source_id, 4))
        };
        self.dir.join(name)
    }

    async fn read_doc(&self, source_id: &str) -> Result<HashMap<String, SeenRecord>, StoreError> {
        let path = self.path_for(source_id);
        let raw = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        let doc: StateDoc = serde_json::from_slice(&raw)?;
        if doc.version != DOC_VERSION {
            return Err(StoreError::unavailable(format!(
                "{}: unsupported state version {}",
                path.display(),
                doc.version
            )));
        }
        Ok(doc.records.into_iter().collect())
    }
}

/// The rename is only atomic across a crash if the data hit the disk first.
async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = fs::File::create(path).await?;
    f.write_all(bytes).await?;
    f.sync_all().await
}

#[async_trait::async_trait]
impl StateStore for FileStore {
    async fn get(&self, source_id: &str) -> Result<HashMap<String, SeenRecord>, StoreError> {
        self.read_doc(source_id).await
    }

    async fn commit(&self, source_id: &str, batch: CommitBatch) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.read_doc(source_id).await?;
        let pruned = apply_batch(&mut records, batch);

        let doc = StateDoc {
            version: DOC_VERSION,
            source_id: source_id.to_string(),
            records: records.into_iter().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let path = self.path_for(source_id);
        let tmp = path.with_extension("json.tmp");
        write_synced(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        tracing::debug!(
            target: "store",
            source = source_id,
            records = doc.records.len(),
            pruned,
            "state committed"
        );
        Ok(())
    }
}
