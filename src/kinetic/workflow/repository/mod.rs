// SPDX-License-Identifier: MIT

//! Collaborator contracts for workflow storage
//!
//! The service layer talks to storage only through these traits, so hosts can
//! back them with a database while tests and the CLI use
//! `InMemoryRepository`.

mod memory;

pub use memory::InMemoryRepository;

use crate::adk::error::FlowError;
use crate::kinetic::workflow::graph::types::NamedTypeInfo;
use crate::kinetic::workflow::reference::WorkflowReferenceKey;
use crate::kinetic::workflow::types::Canvas;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identity and bookkeeping for one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Owning application; `None` for library workflows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The editable copy of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftInfo {
    pub canvas: Canvas,
    #[serde(default)]
    pub input_params: Vec<NamedTypeInfo>,
    #[serde(default)]
    pub output_params: Vec<NamedTypeInfo>,
    pub commit_id: String,
    #[serde(default)]
    pub test_run_success: bool,
    #[serde(default)]
    pub modified: bool,
    pub saved_at: DateTime<Utc>,
}

/// An immutable published snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub canvas: Canvas,
    #[serde(default)]
    pub input_params: Vec<NamedTypeInfo>,
    #[serde(default)]
    pub output_params: Vec<NamedTypeInfo>,
    pub commit_id: String,
    pub created_at: DateTime<Utc>,
}

/// A workflow owned by an application together with its draft
#[derive(Debug, Clone, PartialEq)]
pub struct AppWorkflow {
    pub meta: WorkflowMeta,
    pub draft: DraftInfo,
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create_meta(&self, meta: WorkflowMeta) -> Result<(), FlowError>;

    /// Fails with `FlowError::NotFound` for unknown ids
    async fn get_meta(&self, id: i64) -> Result<WorkflowMeta, FlowError>;

    async fn get_draft(&self, id: i64) -> Result<Option<DraftInfo>, FlowError>;

    async fn create_or_update_draft(&self, id: i64, draft: DraftInfo) -> Result<(), FlowError>;

    async fn get_version(&self, id: i64, version: &str) -> Result<Option<VersionInfo>, FlowError>;

    async fn get_latest_version(&self, id: i64) -> Result<Option<VersionInfo>, FlowError>;

    /// Store a version and replace the references held by `id`
    async fn create_version(
        &self,
        id: i64,
        version: VersionInfo,
        refs: BTreeSet<WorkflowReferenceKey>,
    ) -> Result<(), FlowError>;

    /// References whose `referred_id` is `id`
    async fn get_references(&self, referred_id: i64) -> Result<Vec<WorkflowReferenceKey>, FlowError>;

    async fn get_app_drafts(&self, app_id: i64) -> Result<Vec<AppWorkflow>, FlowError>;

    /// Create a new workflow from `id`'s meta and draft, with `canvas` as its
    /// draft canvas
    async fn copy_workflow(
        &self,
        id: i64,
        target_app_id: Option<i64>,
        canvas: Canvas,
    ) -> Result<WorkflowMeta, FlowError>;

    async fn create_connector_versions(
        &self,
        app_id: i64,
        connector_ids: &[i64],
        version: &str,
    ) -> Result<(), FlowError>;
}

/// Source of unique ids; commit ids are drawn from here too
#[async_trait]
pub trait IdGenerator: Send + Sync {
    async fn gen_id(&self) -> Result<i64, FlowError>;
    async fn gen_multi_ids(&self, n: usize) -> Result<Vec<i64>, FlowError>;
}

/// Canvas lookup used to inline sub-workflows.
///
/// `version: None` selects the draft.
#[async_trait]
pub trait CanvasProvider: Send + Sync {
    async fn get_workflow_canvas(&self, id: i64, version: Option<&str>)
        -> Result<Canvas, FlowError>;
}

#[async_trait]
impl<R: WorkflowRepository + ?Sized> CanvasProvider for R {
    async fn get_workflow_canvas(
        &self,
        id: i64,
        version: Option<&str>,
    ) -> Result<Canvas, FlowError> {
        match version {
            Some(v) => self
                .get_version(id, v)
                .await?
                .map(|info| info.canvas)
                .ok_or_else(|| FlowError::not_found("workflow version", format!("{}@{}", id, v))),
            None => self
                .get_draft(id)
                .await?
                .map(|draft| draft.canvas)
                .ok_or_else(|| FlowError::not_found("workflow draft", id)),
        }
    }
}

/// Presents a repository trait object as a `CanvasProvider` trait object
pub struct RepositoryCanvas<'a>(pub &'a dyn WorkflowRepository);

#[async_trait]
impl CanvasProvider for RepositoryCanvas<'_> {
    async fn get_workflow_canvas(
        &self,
        id: i64,
        version: Option<&str>,
    ) -> Result<Canvas, FlowError> {
        self.0.get_workflow_canvas(id, version).await
    }
}
