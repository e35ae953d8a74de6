// SPDX-License-Identifier: MIT

//! Checkpoint persistence
//!
//! Stores see opaque bytes; `CheckpointManager` owns the encoding.

use super::store::State;
use crate::adk::error::FlowError;
use crate::kinetic::workflow::graph::types::NodeKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Byte store keyed by checkpoint id.
///
/// Retries must be safe: `set` overwrites and `delete` of a missing key is
/// not an error.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FlowError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), FlowError>;
    async fn delete(&self, key: &str) -> Result<(), FlowError>;
}

#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FlowError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), FlowError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FlowError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per checkpoint under a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names are the hex form of the key, so distinct ids never share a file
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(key.as_bytes())))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FlowError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), FlowError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FlowError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Persisted form of a suspended run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    /// Node awaiting resume data
    pub suspended_node: Option<NodeKey>,
    pub state: State,
    pub saved_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, FlowError> {
        let Some(bytes) = self.store.get(checkpoint_id).await? else {
            return Ok(None);
        };
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        log::debug!(
            "Loaded checkpoint '{}' saved at {}",
            checkpoint_id,
            checkpoint.saved_at
        );
        Ok(Some(checkpoint))
    }

    pub async fn save(&self, checkpoint_id: &str, state: &State) -> Result<(), FlowError> {
        let checkpoint = Checkpoint {
            checkpoint_id: checkpoint_id.to_string(),
            suspended_node: state.suspended().map(|s| s.node_key.clone()),
            state: state.clone(),
            saved_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&checkpoint)?;
        self.store.set(checkpoint_id, bytes).await?;
        log::debug!("Saved checkpoint '{}'", checkpoint_id);
        Ok(())
    }

    pub async fn clear(&self, checkpoint_id: &str) -> Result<(), FlowError> {
        self.store.delete(checkpoint_id).await
    }
}
