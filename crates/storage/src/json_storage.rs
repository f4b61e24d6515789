//! JSON file index backend.
//!
//! `index.json` under the root directory is the source of truth. Every call
//! reads the file, so writes made by another process (for example `automat
//! record` next to a running scheduler) are seen on the next call. Writes
//! re-read the file under a lock, apply the change and rename a temporary
//! file into place, so a crash never leaves a half-written index.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use automat_core::{
    AssetPartition, CheckResult, DataVersion, RequestMarker, TickRecord, Time, UpdateRecord,
};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::state::{IndexState, PersistedState};
use crate::{IndexSnapshot, Result, UpdateIndex};

const INDEX_FILE: &str = "index.json";

/// File-backed index.
pub struct JsonIndex {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonIndex {
    /// Open (or create) an index under `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let index = Self {
            root,
            write_lock: Mutex::new(()),
        };
        // Fail early on a corrupt file.
        index.load().await?;
        info!("Opened index at {}", index.path().display());
        Ok(index)
    }

    /// Path of the index file.
    pub fn path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    async fn load(&self) -> Result<IndexState> {
        match fs::read_to_string(self.path()).await {
            Ok(json) => {
                let persisted: PersistedState = serde_json::from_str(&json)?;
                Ok(IndexState::from(persisted))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, state: &IndexState) -> Result<()> {
        let json = serde_json::to_string_pretty(&PersistedState::from(state))?;
        // One temp file per process; writes within a process hold `write_lock`.
        let tmp = self.root.join(format!("{}.{}.tmp", INDEX_FILE, std::process::id()));
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, self.path()).await?;
        Ok(())
    }

    /// Re-read the file, apply `change` and write the result back when
    /// `change` reports a modification.
    async fn update<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut IndexState) -> bool + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await?;
        let changed = change(&mut state);
        if changed {
            self.persist(&state).await?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl UpdateIndex for JsonIndex {
    async fn last_update(&self, asset_partition: &AssetPartition) -> Result<Option<UpdateRecord>> {
        Ok(self.load().await?.last_update(asset_partition))
    }

    async fn update_history(&self, asset_partition: &AssetPartition) -> Result<Vec<Time>> {
        Ok(self.load().await?.update_history(asset_partition))
    }

    async fn record_materialization(
        &self,
        asset_partition: &AssetPartition,
        at: Time,
        data_version: Option<DataVersion>,
    ) -> Result<()> {
        if self
            .update(|state| state.apply_materialization(asset_partition, at, data_version))
            .await?
        {
            debug!("Recorded materialization of {} at {}", asset_partition, at);
        }
        Ok(())
    }

    async fn record_observation(
        &self,
        asset_partition: &AssetPartition,
        at: Time,
        data_version: Option<DataVersion>,
    ) -> Result<()> {
        if self
            .update(|state| state.apply_observation(asset_partition, at, data_version))
            .await?
        {
            debug!("Recorded observation of {} at {}", asset_partition, at);
        }
        Ok(())
    }

    async fn record_request(&self, asset_partition: &AssetPartition, marker: RequestMarker) -> Result<()> {
        self.update(|state| {
            state.record_request(asset_partition, marker);
            true
        })
        .await?;
        Ok(())
    }

    async fn save_check_result(&self, result: &CheckResult) -> Result<()> {
        self.update(|state| {
            state.save_check_result(result);
            true
        })
        .await?;
        Ok(())
    }

    async fn check_results(&self) -> Result<Vec<CheckResult>> {
        Ok(self.load().await?.check_results())
    }

    async fn save_tick(&self, record: &TickRecord) -> Result<()> {
        self.update(|state| {
            state.save_tick(record);
            true
        })
        .await?;
        Ok(())
    }

    async fn last_tick(&self, binding: &str) -> Result<Option<TickRecord>> {
        Ok(self.load().await?.recent_ticks(binding, 1).pop())
    }

    async fn recent_ticks(&self, binding: &str, limit: usize) -> Result<Vec<TickRecord>> {
        Ok(self.load().await?.recent_ticks(binding, limit))
    }

    async fn snapshot(&self) -> Result<IndexSnapshot> {
        Ok(self.load().await?.snapshot(chrono::Utc::now()))
    }
}
