// SPDX-License-Identifier: MIT

use super::{AppWorkflow, DraftInfo, IdGenerator, VersionInfo, WorkflowMeta, WorkflowRepository};
use crate::adk::error::FlowError;
use crate::kinetic::workflow::reference::WorkflowReferenceKey;
use crate::kinetic::workflow::types::Canvas;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    metas: HashMap<i64, WorkflowMeta>,
    drafts: HashMap<i64, DraftInfo>,
    versions: HashMap<i64, Vec<VersionInfo>>,
    references: BTreeSet<WorkflowReferenceKey>,
    connector_versions: Vec<(i64, i64, String)>,
}

/// Process-local repository and id source
#[derive(Clone)]
pub struct InMemoryRepository {
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Published versions of `id`, oldest first
    pub async fn versions(&self, id: i64) -> Vec<VersionInfo> {
        let tables = self.tables.read().await;
        tables.versions.get(&id).cloned().unwrap_or_default()
    }

    /// `(app_id, connector_id, version)` rows created so far
    pub async fn connector_versions(&self) -> Vec<(i64, i64, String)> {
        self.tables.read().await.connector_versions.clone()
    }

    /// Every stored workflow id
    pub async fn workflow_ids(&self) -> Vec<i64> {
        let tables = self.tables.read().await;
        let mut ids: Vec<i64> = tables.metas.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn create_meta(&self, meta: WorkflowMeta) -> Result<(), FlowError> {
        let mut tables = self.tables.write().await;
        if tables.metas.contains_key(&meta.id) {
            return Err(FlowError::storage(format!("workflow {} already exists", meta.id)));
        }
        tables.metas.insert(meta.id, meta);
        Ok(())
    }

    async fn get_meta(&self, id: i64) -> Result<WorkflowMeta, FlowError> {
        let tables = self.tables.read().await;
        tables
            .metas
            .get(&id)
            .cloned()
            .ok_or_else(|| FlowError::not_found("workflow", id))
    }

    async fn get_draft(&self, id: i64) -> Result<Option<DraftInfo>, FlowError> {
        Ok(self.tables.read().await.drafts.get(&id).cloned())
    }

    async fn create_or_update_draft(&self, id: i64, draft: DraftInfo) -> Result<(), FlowError> {
        let mut tables = self.tables.write().await;
        if !tables.metas.contains_key(&id) {
            return Err(FlowError::not_found("workflow", id));
        }
        tables.drafts.insert(id, draft);
        Ok(())
    }

    async fn get_version(&self, id: i64, version: &str) -> Result<Option<VersionInfo>, FlowError> {
        let tables = self.tables.read().await;
        Ok(tables
            .versions
            .get(&id)
            .and_then(|vs| vs.iter().find(|v| v.version == version))
            .cloned())
    }

    async fn get_latest_version(&self, id: i64) -> Result<Option<VersionInfo>, FlowError> {
        let tables = self.tables.read().await;
        let Some(latest) = tables.metas.get(&id).and_then(|m| m.latest_version.as_ref()) else {
            return Ok(None);
        };
        Ok(tables
            .versions
            .get(&id)
            .and_then(|vs| vs.iter().find(|v| &v.version == latest))
            .cloned())
    }

    async fn create_version(
        &self,
        id: i64,
        version: VersionInfo,
        refs: BTreeSet<WorkflowReferenceKey>,
    ) -> Result<(), FlowError> {
        let mut tables = self.tables.write().await;
        if !tables.metas.contains_key(&id) {
            return Err(FlowError::not_found("workflow", id));
        }
        let versions = tables.versions.entry(id).or_default();
        if versions.iter().any(|v| v.version == version.version) {
            return Err(FlowError::storage(format!(
                "workflow {} already has version {}",
                id, version.version
            )));
        }
        let name = version.version.clone();
        versions.push(version);
        if let Some(meta) = tables.metas.get_mut(&id) {
            meta.latest_version = Some(name);
        }

        tables.references.retain(|r| r.referring_id != id);
        tables.references.extend(refs);
        Ok(())
    }

    async fn get_references(&self, referred_id: i64) -> Result<Vec<WorkflowReferenceKey>, FlowError> {
        let tables = self.tables.read().await;
        Ok(tables
            .references
            .iter()
            .filter(|r| r.referred_id == referred_id)
            .cloned()
            .collect())
    }

    async fn get_app_drafts(&self, app_id: i64) -> Result<Vec<AppWorkflow>, FlowError> {
        let tables = self.tables.read().await;
        let mut out: Vec<AppWorkflow> = tables
            .metas
            .values()
            .filter(|m| m.app_id == Some(app_id))
            .filter_map(|m| {
                tables.drafts.get(&m.id).map(|d| AppWorkflow {
                    meta: m.clone(),
                    draft: d.clone(),
                })
            })
            .collect();
        out.sort_by_key(|w| w.meta.id);
        Ok(out)
    }

    async fn copy_workflow(
        &self,
        id: i64,
        target_app_id: Option<i64>,
        canvas: Canvas,
    ) -> Result<WorkflowMeta, FlowError> {
        let new_id = self.next();
        let mut tables = self.tables.write().await;
        let source = tables
            .metas
            .get(&id)
            .cloned()
            .ok_or_else(|| FlowError::not_found("workflow", id))?;
        let draft = tables
            .drafts
            .get(&id)
            .cloned()
            .ok_or_else(|| FlowError::not_found("workflow draft", id))?;

        let now = Utc::now();
        let meta = WorkflowMeta {
            id: new_id,
            app_id: target_app_id,
            latest_version: None,
            created_at: now,
            ..source
        };
        tables.metas.insert(new_id, meta.clone());
        tables.drafts.insert(
            new_id,
            DraftInfo {
                canvas,
                commit_id: new_id.to_string(),
                saved_at: now,
                ..draft
            },
        );
        Ok(meta)
    }

    async fn create_connector_versions(
        &self,
        app_id: i64,
        connector_ids: &[i64],
        version: &str,
    ) -> Result<(), FlowError> {
        let mut tables = self.tables.write().await;
        for connector_id in connector_ids {
            tables
                .connector_versions
                .push((app_id, *connector_id, version.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdGenerator for InMemoryRepository {
    async fn gen_id(&self) -> Result<i64, FlowError> {
        Ok(self.next())
    }

    async fn gen_multi_ids(&self, n: usize) -> Result<Vec<i64>, FlowError> {
        Ok((0..n).map(|_| self.next()).collect())
    }
}
