//! On-disk layout of a till's sync data.

use crate::catalog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tillsync_engine::{FileHistory, SyncConfiguration, SyncOrchestrator};
use tillsync_store::{EntityStore, FileStore};

const CLIENT_FILE: &str = "client.json";
const SERVER_FILE: &str = "server.json";
const HISTORY_FILE: &str = "history.jsonl";
const CONFIG_FILE: &str = "sync.json";

/// A data directory holding both stores, the run history, and optionally
/// a `sync.json` configuration.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
    server: Option<PathBuf>,
}

impl Workspace {
    /// Uses `dir` for every file. `server` overrides the server store path.
    pub fn new(dir: impl Into<PathBuf>, server: Option<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            server,
        }
    }

    /// Returns the data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn server_path(&self) -> PathBuf {
        self.server
            .clone()
            .unwrap_or_else(|| self.dir.join(SERVER_FILE))
    }

    /// Loads `config` if given, else `sync.json` in the data directory if
    /// present, else defaults.
    pub async fn load_config(
        &self,
        config: Option<&Path>,
    ) -> Result<SyncConfiguration, Box<dyn std::error::Error>> {
        let path = match config {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = self.dir.join(CONFIG_FILE);
                if !candidate.exists() {
                    tracing::debug!(dir = %self.dir.display(), "no sync.json, using defaults");
                    return Ok(SyncConfiguration::default());
                }
                candidate
            }
        };
        Ok(SyncConfiguration::load(&path).await?)
    }

    /// Opens the client store.
    pub async fn client(&self) -> Result<Arc<FileStore>, Box<dyn std::error::Error>> {
        Ok(Arc::new(
            FileStore::open("client", self.dir.join(CLIENT_FILE)).await?,
        ))
    }

    /// Opens both stores and builds an orchestrator over the catalog.
    pub async fn orchestrator(
        &self,
        config: SyncConfiguration,
    ) -> Result<Arc<SyncOrchestrator>, Box<dyn std::error::Error>> {
        let client: Arc<dyn EntityStore> = self.client().await?;
        let server: Arc<dyn EntityStore> =
            Arc::new(FileStore::open("server", self.server_path()).await?);
        let history = Arc::new(FileHistory::new(self.dir.join(HISTORY_FILE)));

        let builder = SyncOrchestrator::builder(config, client, server).with_history(history);
        Ok(Arc::new(catalog::register(builder).build()?))
    }
}
