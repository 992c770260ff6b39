//! File-based entity store.

use crate::error::StoreResult;
use crate::record::{RecordQuery, StoredRecord};
use crate::store::EntityStore;
use crate::table::Tables;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tillsync_protocol::SyncGuid;

/// An entity store kept as one JSON document on disk.
///
/// The document is loaded when the store is opened. Writes go to memory
/// and are staged until [`persist`](EntityStore::persist), which rewrites
/// the document through a temporary file and a rename so a crash never
/// leaves a half-written store behind.
///
/// # Example
///
/// ```no_run
/// use tillsync_store::{EntityStore, FileStore};
///
/// # async fn run() -> tillsync_store::StoreResult<()> {
/// let store = FileStore::open("client", "data/client.json").await?;
/// store.persist().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileStore {
    name: String,
    path: PathBuf,
    tables: RwLock<Tables>,
    staged: AtomicUsize,
}

impl FileStore {
    /// Opens the store at `path`, creating an empty one if the file does
    /// not exist yet. Parent directories are created on first persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut tables: Tables = serde_json::from_slice(&bytes)?;
                tables.reindex();
                tables
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };
        let name = name.into();
        tracing::debug!(store = %name, path = %path.display(), records = tables.len(), "opened file store");

        Ok(Self {
            name,
            path,
            tables: RwLock::new(tables),
            staged: AtomicUsize::new(0),
        })
    }

    /// Returns the path to the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entity types present in the store.
    pub fn entity_types(&self) -> Vec<String> {
        self.tables.read().entity_types()
    }
}

#[async_trait]
impl EntityStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> StoreResult<()> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(()),
            // Not written yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_guid(
        &self,
        entity_type: &str,
        guid: SyncGuid,
    ) -> StoreResult<Option<StoredRecord>> {
        Ok(self.tables.read().find(entity_type, guid).cloned())
    }

    async fn insert(&self, entity_type: &str, record: StoredRecord) -> StoreResult<StoredRecord> {
        let stored = self.tables.write().insert(entity_type, record);
        self.staged.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn apply_values(
        &self,
        entity_type: &str,
        existing: &StoredRecord,
        incoming: StoredRecord,
    ) -> StoreResult<StoredRecord> {
        let stored = self
            .tables
            .write()
            .apply_values(entity_type, existing, incoming)?;
        self.staged.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn query(&self, entity_type: &str, query: &RecordQuery) -> StoreResult<Vec<StoredRecord>> {
        Ok(self.tables.read().query(entity_type, query))
    }

    async fn count(&self, entity_type: &str, query: &RecordQuery) -> StoreResult<u64> {
        Ok(self.tables.read().count(entity_type, query))
    }

    async fn persist(&self) -> StoreResult<usize> {
        let staged = self.staged.load(Ordering::SeqCst);
        let bytes = serde_json::to_vec_pretty(&*self.tables.read())?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        self.staged.fetch_sub(staged, Ordering::SeqCst);
        tracing::debug!(store = %self.name, writes = staged, bytes = bytes.len(), "persisted file store");
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;
    use tillsync_protocol::{DataSource, SyncMetadata};

    fn record() -> StoredRecord {
        StoredRecord {
            entity_type: String::new(),
            local_id: 0,
            meta: SyncMetadata::created(DataSource::Client, Utc::now()),
            body: serde_json::json!({ "sku": "A-1" }),
        }
    }

    #[tokio::test]
    async fn file_open_missing_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open("client", dir.path().join("client.json"))
            .await
            .unwrap();
        assert_eq!(store.count("Product", &RecordQuery::all()).await.unwrap(), 0);
        assert!(store.ping().await.is_ok());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("server.json");

        let guid = {
            let store = FileStore::open("server", &path).await.unwrap();
            let stored = store.insert("Product", record()).await.unwrap();
            assert_eq!(store.persist().await.unwrap(), 1);
            stored.guid()
        };

        let store = FileStore::open("server", &path).await.unwrap();
        let found = store.find_by_guid("Product", guid).await.unwrap().unwrap();
        assert_eq!(found.local_id, 1);
        assert_eq!(found.body["sku"], "A-1");
        assert_eq!(store.entity_types(), vec!["Product"]);

        let next = store.insert("Product", record()).await.unwrap();
        assert_eq!(next.local_id, 2);
    }

    #[tokio::test]
    async fn file_unpersisted_writes_are_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.json");
        {
            let store = FileStore::open("client", &path).await.unwrap();
            store.insert("Product", record()).await.unwrap();
            store.persist().await.unwrap();
            store.insert("Product", record()).await.unwrap();
        }
        let store = FileStore::open("client", &path).await.unwrap();
        assert_eq!(store.count("Product", &RecordQuery::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_corrupted_document_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(FileStore::open("client", &path).await.is_err());
    }
}
