// SPDX-License-Identifier: MIT

//! Workflow lifecycle operations
//!
//! `WorkflowService` ties the compiler and the reference engine to the
//! storage contracts: saving drafts, publishing versions, walking the
//! reference graph and copying whole workflow families between an
//! application and the library.

use crate::adk::error::FlowError;
use crate::kinetic::config::EngineConfig;
use crate::kinetic::workflow::graph::types::{NodeKey, NodeProperty, NodeType, WorkflowSchema};
use crate::kinetic::workflow::graph::{compile_canvas, extract_io_params, SchemaCompiler};
use crate::kinetic::workflow::reference::{
    build_ref_tree, build_refs, collect_dependencies, materialize, replace_related_references,
    validate_canvas, validate_closure, workflow_targets, DependenceResource,
    ExternalResourceRelated, IdVersionPair, Materializer, PluginEntity, ValidateConfig,
    ValidateIssue,
};
use crate::kinetic::workflow::repository::{
    CanvasProvider, DraftInfo, IdGenerator, RepositoryCanvas, VersionInfo, WorkflowMeta,
    WorkflowRepository,
};
use crate::kinetic::workflow::state::carry_test_run_success;
use crate::kinetic::workflow::types::{BlockInput, Canvas, Edge, Node, NodeData, NodeInputs, Param};
use crate::kinetic::workflow::version::{ensure_newer, Version};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Version given to workflows copied into the library
pub const LIBRARY_COPY_VERSION: &str = "v0.0.1";

/// Checks run by `workflow_schema_check`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// Every reachable sub-workflow and tool workflow is a published version
    Published,
    /// No reachable node uses a type from `ValidateConfig::disallowed_node_types`
    AllowedNodes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_type: CheckType,
    pub is_pass: bool,
    #[serde(default)]
    pub reason: String,
}

/// Settings for publishing every workflow of an application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseWorkflowConfig {
    pub version: String,
    /// Application plugins that are released alongside, at the same version
    #[serde(default)]
    pub plugin_ids: Vec<i64>,
    #[serde(default)]
    pub connector_ids: Vec<i64>,
    #[serde(default)]
    pub validate: ValidateConfig,
}

/// Copies produced by a bulk copy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopiedWorkflows {
    /// Original id to the id (and version, if published) of its copy
    pub workflow_id_version_map: HashMap<i64, IdVersionPair>,
    pub copied_workflows: Vec<WorkflowMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CopyOutcome {
    /// Validation failed and nothing was copied
    Invalid(Vec<ValidateIssue>),
    Copied(CopiedWorkflows),
}

pub struct WorkflowService {
    repo: Arc<dyn WorkflowRepository>,
    ids: Arc<dyn IdGenerator>,
    config: EngineConfig,
}

impl WorkflowService {
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        ids: Arc<dyn IdGenerator>,
        config: EngineConfig,
    ) -> Self {
        Self { repo, ids, config }
    }

    pub fn repository(&self) -> &Arc<dyn WorkflowRepository> {
        &self.repo
    }

    /// Create a workflow whose draft holds `canvas`, or a bare entry/exit
    /// pair when none is given
    pub async fn create(
        &self,
        name: &str,
        description: &str,
        app_id: Option<i64>,
        canvas: Option<Canvas>,
    ) -> Result<i64, FlowError> {
        let id = self.ids.gen_id().await?;
        self.repo
            .create_meta(WorkflowMeta {
                id,
                name: name.to_string(),
                description: description.to_string(),
                app_id,
                latest_version: None,
                created_at: Utc::now(),
            })
            .await?;
        self.save(id, canvas.unwrap_or_else(initial_canvas)).await?;
        log::info!("Created workflow {} '{}'", id, name);
        Ok(id)
    }

    /// Store a new draft.
    ///
    /// Drafts need not compile. The test-run flag survives only when both
    /// the old and the new draft compile to equal schemas.
    pub async fn save(&self, id: i64, canvas: Canvas) -> Result<DraftInfo, FlowError> {
        let io = extract_io_params(&canvas);
        let new_schema = compile_canvas(&canvas).ok();
        let previous = self.repo.get_draft(id).await?;
        let test_run_success = match &previous {
            Some(prev) => {
                let old_schema = compile_canvas(&prev.canvas).ok();
                carry_test_run_success(
                    old_schema.as_ref(),
                    prev.test_run_success,
                    new_schema.as_ref(),
                )
            }
            None => false,
        };
        let commit_id = self.ids.gen_id().await?.to_string();
        log::debug!(
            "Saving draft of workflow {} (commit {}, test run carried: {})",
            id,
            commit_id,
            test_run_success
        );

        let draft = DraftInfo {
            canvas,
            input_params: io.input,
            output_params: io.output,
            commit_id,
            test_run_success,
            modified: true,
            saved_at: Utc::now(),
        };
        self.repo.create_or_update_draft(id, draft.clone()).await?;
        Ok(draft)
    }

    /// Record a passing test run of the draft saved as `commit_id`.
    ///
    /// Returns false when the draft has been saved again since.
    pub async fn mark_test_run_success(&self, id: i64, commit_id: &str) -> Result<bool, FlowError> {
        let mut draft = self
            .repo
            .get_draft(id)
            .await?
            .ok_or_else(|| FlowError::not_found("workflow draft", id))?;
        if draft.commit_id != commit_id {
            log::warn!(
                "Ignoring test run of workflow {} at stale commit {} (current {})",
                id,
                commit_id,
                draft.commit_id
            );
            return Ok(false);
        }
        draft.test_run_success = true;
        self.repo.create_or_update_draft(id, draft).await?;
        Ok(true)
    }

    /// Publish the current draft as `version`
    pub async fn publish(
        &self,
        id: i64,
        version: &str,
        description: &str,
        force: bool,
    ) -> Result<VersionInfo, FlowError> {
        version.parse::<Version>()?;
        if let Some(latest) = self.repo.get_latest_version(id).await? {
            ensure_newer(&latest.version, version)?;
        }

        let draft = self
            .repo
            .get_draft(id)
            .await?
            .ok_or_else(|| FlowError::not_found("workflow draft", id))?;
        if !force && self.config.publish_requires_test_run && !draft.test_run_success {
            return Err(FlowError::TestRunRequired(id));
        }

        let refs = build_refs(id, &draft.canvas)?;
        let info = VersionInfo {
            version: version.to_string(),
            description: description.to_string(),
            canvas: draft.canvas,
            input_params: draft.input_params,
            output_params: draft.output_params,
            commit_id: draft.commit_id,
            created_at: Utc::now(),
        };
        self.repo.create_version(id, info.clone(), refs).await?;
        log::info!("Published workflow {} as {}", id, version);
        Ok(info)
    }

    /// Workflows whose published versions reference `id`
    pub async fn get_workflow_reference(&self, id: i64) -> Result<Vec<WorkflowMeta>, FlowError> {
        let referring: BTreeSet<i64> = self
            .repo
            .get_references(id)
            .await?
            .into_iter()
            .map(|r| r.referring_id)
            .collect();
        let mut metas = Vec::with_capacity(referring.len());
        for referring_id in referring {
            metas.push(self.repo.get_meta(referring_id).await?);
        }
        Ok(metas)
    }

    /// Compile a stored workflow with its sub-workflows inlined
    pub async fn compile(&self, id: i64, version: Option<&str>) -> Result<WorkflowSchema, FlowError> {
        let provider = RepositoryCanvas(self.repo.as_ref());
        SchemaCompiler::with_provider(&provider)
            .compile_workflow(id, version)
            .await
    }

    pub async fn query_node_properties(
        &self,
        id: i64,
        version: Option<&str>,
    ) -> Result<BTreeMap<NodeKey, NodeProperty>, FlowError> {
        Ok(self.compile(id, version).await?.node_properties())
    }

    /// Run each check over the workflow and everything it reaches.
    ///
    /// Each check walks the closure breadth-first with its own visited set
    /// seeded with the workflow itself. Missing targets are skipped.
    pub async fn workflow_schema_check(
        &self,
        id: i64,
        version: Option<&str>,
        checks: &[CheckType],
        validate: &ValidateConfig,
    ) -> Result<Vec<CheckResult>, FlowError> {
        let canvas = self.repo.get_workflow_canvas(id, version).await?;
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            let failure = self
                .first_check_failure(id, version, &canvas, *check, validate)
                .await?;
            results.push(CheckResult {
                check_type: *check,
                is_pass: failure.is_none(),
                reason: failure.unwrap_or_default(),
            });
        }
        Ok(results)
    }

    async fn first_check_failure(
        &self,
        id: i64,
        version: Option<&str>,
        canvas: &Canvas,
        check: CheckType,
        validate: &ValidateConfig,
    ) -> Result<Option<String>, FlowError> {
        let mut visited: HashSet<(i64, Option<String>)> =
            HashSet::from([(id, version.map(str::to_string))]);
        let mut queue: VecDeque<Node> = canvas.nodes.iter().cloned().collect();

        while let Some(node) = queue.pop_front() {
            if let Some(reason) = check_node(&node, check, validate) {
                return Ok(Some(reason));
            }
            queue.extend(node.blocks.iter().cloned());

            let single = Canvas {
                nodes: vec![Node {
                    blocks: Vec::new(),
                    ..node
                }],
                ..Default::default()
            };
            for t in workflow_targets(&single)? {
                let key = (t.target.id, t.target.version.clone());
                if !visited.insert(key.clone()) {
                    continue;
                }
                match self
                    .repo
                    .get_workflow_canvas(t.target.id, t.target.version.as_deref())
                    .await
                {
                    Ok(sub) => queue.extend(sub.nodes),
                    Err(e) if e.is_not_found() => {
                        visited.remove(&key);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(None)
    }

    /// Validate the draft of `id` and every workflow it reaches
    pub async fn validate_tree(
        &self,
        id: i64,
        config: &ValidateConfig,
    ) -> Result<Vec<ValidateIssue>, FlowError> {
        validate_closure(self.repo.as_ref(), id, config).await
    }

    /// Publish every workflow draft of an application at one version.
    ///
    /// Nothing is written when any draft has issues; they are returned
    /// instead. Workflows that already have the version are left alone.
    pub async fn release_application_workflows(
        &self,
        app_id: i64,
        config: &ReleaseWorkflowConfig,
    ) -> Result<Vec<ValidateIssue>, FlowError> {
        config.version.parse::<Version>()?;
        let drafts = self.repo.get_app_drafts(app_id).await?;

        let related: HashMap<i64, IdVersionPair> = drafts
            .iter()
            .map(|w| (w.meta.id, IdVersionPair::new(w.meta.id, config.version.clone())))
            .collect();
        let external = ExternalResourceRelated {
            plugin_map: config
                .plugin_ids
                .iter()
                .map(|id| {
                    (
                        *id,
                        PluginEntity {
                            plugin_id: *id,
                            plugin_version: Some(config.version.clone()),
                        },
                    )
                })
                .collect(),
            ..Default::default()
        };

        let issues: Vec<ValidateIssue> = drafts
            .iter()
            .flat_map(|w| validate_canvas(w.meta.id, &w.meta.name, &w.draft.canvas, &config.validate))
            .collect();
        if !issues.is_empty() {
            log::warn!(
                "Release of app {} blocked by {} validation issue(s)",
                app_id,
                issues.len()
            );
            return Ok(issues);
        }

        for workflow in drafts {
            let id = workflow.meta.id;
            if self.repo.get_version(id, &config.version).await?.is_some() {
                log::debug!("Workflow {} already has {}", id, config.version);
                continue;
            }
            let mut canvas = workflow.draft.canvas;
            replace_related_references(&mut canvas, &related, &external)?;
            let refs = build_refs(id, &canvas)?;
            let info = VersionInfo {
                version: config.version.clone(),
                description: String::new(),
                canvas,
                input_params: workflow.draft.input_params,
                output_params: workflow.draft.output_params,
                commit_id: workflow.draft.commit_id,
                created_at: Utc::now(),
            };
            self.repo.create_version(id, info, refs).await?;
        }

        self.repo
            .create_connector_versions(app_id, &config.connector_ids, &config.version)
            .await?;
        log::info!("Released workflows of app {} as {}", app_id, config.version);
        Ok(Vec::new())
    }

    /// Copy an application workflow and the application workflows it uses
    /// into the library, publishing each copy once
    pub async fn copy_workflow_from_app_to_library(
        &self,
        workflow_id: i64,
        app_id: i64,
        config: &ValidateConfig,
    ) -> Result<CopyOutcome, FlowError> {
        let drafts = self.app_draft_canvases(app_id).await?;
        if !drafts.contains_key(&workflow_id) {
            return Err(FlowError::not_found("application workflow", workflow_id));
        }
        let tree = build_ref_tree(workflow_id, &drafts)?;

        let mut issues = Vec::new();
        for node in tree.post_order() {
            let name = self.repo.get_meta(node.id).await?.name;
            issues.extend(validate_canvas(node.id, &name, &node.canvas, config));
        }
        if !issues.is_empty() {
            return Ok(CopyOutcome::Invalid(issues));
        }

        let sink = CopySink {
            repo: self.repo.as_ref(),
            target_app_id: None,
            publish_as: Some(LIBRARY_COPY_VERSION),
            copied: Mutex::new(Vec::new()),
        };
        let mut memo = HashMap::new();
        materialize(&[tree], &mut memo, &ExternalResourceRelated::default(), &sink).await?;
        Ok(CopyOutcome::Copied(CopiedWorkflows {
            workflow_id_version_map: memo,
            copied_workflows: sink.copied.into_inner(),
        }))
    }

    /// Copy every workflow of `source_app_id` into `target_app_id` as drafts,
    /// rewriting references between them and resource ids per `external`
    pub async fn duplicate_workflows_by_app(
        &self,
        source_app_id: i64,
        target_app_id: i64,
        external: &ExternalResourceRelated,
    ) -> Result<CopiedWorkflows, FlowError> {
        let drafts = self.app_draft_canvases(source_app_id).await?;
        let mut roots: Vec<i64> = drafts.keys().copied().collect();
        roots.sort_unstable();
        let trees = roots
            .into_iter()
            .map(|id| build_ref_tree(id, &drafts))
            .collect::<Result<Vec<_>, _>>()?;

        let sink = CopySink {
            repo: self.repo.as_ref(),
            target_app_id: Some(target_app_id),
            publish_as: None,
            copied: Mutex::new(Vec::new()),
        };
        let mut memo = HashMap::new();
        materialize(&trees, &mut memo, external, &sink).await?;
        log::info!(
            "Duplicated {} workflow(s) from app {} into app {}",
            memo.len(),
            source_app_id,
            target_app_id
        );
        Ok(CopiedWorkflows {
            workflow_id_version_map: memo,
            copied_workflows: sink.copied.into_inner(),
        })
    }

    /// Rewrite resource ids in every application draft not listed in
    /// `related_workflows`, one concurrent task per draft.
    ///
    /// Commit ids are reserved in one batch before the tasks start.
    pub async fn sync_related_workflow_resources(
        &self,
        app_id: i64,
        related_workflows: &HashMap<i64, IdVersionPair>,
        external: &ExternalResourceRelated,
    ) -> Result<usize, FlowError> {
        let targets: Vec<_> = self
            .repo
            .get_app_drafts(app_id)
            .await?
            .into_iter()
            .filter(|w| !related_workflows.contains_key(&w.meta.id))
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }
        let commit_ids = self.ids.gen_multi_ids(targets.len()).await?;

        let tasks = targets.into_iter().zip(commit_ids).map(|(workflow, commit_id)| {
            let repo = self.repo.clone();
            async move {
                let mut canvas = workflow.draft.canvas;
                replace_related_references(&mut canvas, related_workflows, external)?;
                let draft = DraftInfo {
                    canvas,
                    commit_id: commit_id.to_string(),
                    test_run_success: false,
                    modified: true,
                    saved_at: Utc::now(),
                    ..workflow.draft
                };
                repo.create_or_update_draft(workflow.meta.id, draft).await
            }
        });
        let synced = try_join_all(tasks).await?.len();
        log::info!("Synced resources of {} workflow(s) in app {}", synced, app_id);
        Ok(synced)
    }

    pub async fn get_workflow_dependence_resource(
        &self,
        id: i64,
    ) -> Result<DependenceResource, FlowError> {
        collect_dependencies(self.repo.as_ref(), id).await
    }

    async fn app_draft_canvases(&self, app_id: i64) -> Result<HashMap<i64, Canvas>, FlowError> {
        Ok(self
            .repo
            .get_app_drafts(app_id)
            .await?
            .into_iter()
            .map(|w| (w.meta.id, w.draft.canvas))
            .collect())
    }
}

/// Copies one workflow, optionally publishing the copy
struct CopySink<'a> {
    repo: &'a dyn WorkflowRepository,
    target_app_id: Option<i64>,
    publish_as: Option<&'static str>,
    copied: Mutex<Vec<WorkflowMeta>>,
}

#[async_trait]
impl Materializer for CopySink<'_> {
    async fn materialize(&self, id: i64, canvas: Canvas) -> Result<IdVersionPair, FlowError> {
        let meta = self
            .repo
            .copy_workflow(id, self.target_app_id, canvas.clone())
            .await?;
        let new_id = meta.id;
        self.copied.lock().await.push(meta);

        let Some(version) = self.publish_as else {
            return Ok(IdVersionPair::new(new_id, ""));
        };
        let io = extract_io_params(&canvas);
        let refs = build_refs(new_id, &canvas)?;
        let info = VersionInfo {
            version: version.to_string(),
            description: String::new(),
            canvas,
            input_params: io.input,
            output_params: io.output,
            commit_id: new_id.to_string(),
            created_at: Utc::now(),
        };
        self.repo.create_version(new_id, info, refs).await?;
        Ok(IdVersionPair::new(new_id, version))
    }
}

fn check_node(node: &Node, check: CheckType, validate: &ValidateConfig) -> Option<String> {
    let node_type = NodeType::from_tag(&node.node_type)?;
    match check {
        CheckType::AllowedNodes => validate
            .disallowed_node_types
            .contains(&node_type)
            .then(|| format!("node '{}' has disallowed type '{}'", node.id, node_type)),
        CheckType::Published => {
            let inputs = &node.data.inputs;
            match node_type {
                NodeType::SubWorkflow
                    if inputs.workflow_version.as_deref().unwrap_or("").is_empty() =>
                {
                    Some(format!(
                        "node '{}' uses the draft of workflow {}",
                        node.id,
                        inputs.workflow_id.as_deref().unwrap_or("?")
                    ))
                }
                NodeType::Llm => inputs
                    .fc_param
                    .as_ref()
                    .and_then(|fc| fc.workflow_list.iter().find(|t| t.is_draft))
                    .map(|t| {
                        format!(
                            "node '{}' uses the draft of workflow {} as a tool",
                            node.id, t.workflow_id
                        )
                    }),
                _ => None,
            }
        }
    }
}

/// Entry wired straight to exit, passing `input` through
fn initial_canvas() -> Canvas {
    let node = |id: &str, node_type: &str, inputs: NodeInputs| Node {
        id: id.to_string(),
        node_type: node_type.to_string(),
        data: NodeData {
            inputs,
            ..Default::default()
        },
        blocks: Vec::new(),
        edges: Vec::new(),
        parent_id: None,
        extra: Map::new(),
    };
    let exit_inputs = NodeInputs {
        input_parameters: vec![Param {
            name: "output".to_string(),
            data_type: None,
            input: BlockInput::Ref {
                block_id: "entry".to_string(),
                path: "input".to_string(),
            },
        }],
        ..Default::default()
    };
    Canvas {
        nodes: vec![
            node("entry", NodeType::Entry.tag(), NodeInputs::default()),
            node("exit", NodeType::Exit.tag(), exit_inputs),
        ],
        edges: vec![Edge {
            source_node_id: "entry".to_string(),
            target_node_id: "exit".to_string(),
            source_port_id: None,
        }],
        extra: Map::new(),
    }
}
