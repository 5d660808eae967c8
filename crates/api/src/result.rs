//! Typed command results. Every command, successful or not, produces a
//! [`CommandResult`]; its `data` is a union keyed by command kind.

use previews_apply::{KnownService, SkippedDocument};
use previews_core::{
    ClusterInfo, CommandError, CommandKind, DeploymentMethod, ErrorCode, Observed, PreviewNamespace, PrNumber,
    ReadinessState, ResourceRef, ServiceStatus, WorkloadStatus,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub summary: String,
    /// Markdown, filled in by the renderer. Empty straight out of the orchestrator.
    #[serde(default)]
    pub content: String,
    pub data: CommandData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandData {
    Help(HelpData),
    Status(StatusReport),
    Plan(PlanData),
    Preview(PreviewData),
    Cleanup(CleanupData),
    Connection(ClusterInfo),
    Failed(FailureData),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPermissions {
    pub can_read: bool,
    pub can_deploy: bool,
    pub can_cleanup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelpData {
    pub requested_by: String,
    pub available_commands: Vec<CommandKind>,
    pub user_permissions: UserPermissions,
    pub default_target: String,
    pub known_services: Vec<KnownService>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewStatus {
    pub namespace: PreviewNamespace,
    pub workload: Observed<WorkloadStatus>,
    pub service: Observed<ServiceStatus>,
    /// State of the background readiness wait, when this process started one.
    pub readiness: Option<ReadinessState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub requested_by: String,
    pub pr: PrNumber,
    pub previews: Vec<PreviewStatus>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanData {
    pub requested_by: String,
    pub pr: PrNumber,
    /// Target as typed; `None` when the default was used.
    pub requested: Option<String>,
    pub target: String,
    pub sanitized_target: String,
    pub namespace: String,
    /// `None` when nothing backs the target.
    pub method: Option<DeploymentMethod>,
    pub manifest_path: Option<String>,
    pub resources: Vec<ResourceRef>,
    pub skipped: Vec<SkippedDocument>,
    pub already_deployed: bool,
    pub would_deploy: bool,
    pub known_services: Vec<KnownService>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewData {
    pub requested_by: String,
    pub pr: PrNumber,
    pub target: String,
    pub sanitized_target: String,
    pub namespace: String,
    pub method: DeploymentMethod,
    pub manifest_detected: bool,
    pub manifest_path: Option<String>,
    pub deployed_resources: Vec<ResourceRef>,
    pub skipped_documents: Vec<SkippedDocument>,
    /// Workloads the background readiness wait is watching.
    pub awaiting_ready: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupData {
    pub requested_by: String,
    pub pr: PrNumber,
    pub cleaned_namespaces: Vec<String>,
    pub total_cleaned: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureData {
    /// `None` when the text never parsed into a command.
    pub command: Option<CommandKind>,
    pub code: ErrorCode,
    pub message: String,
    /// Namespace left behind by a partially completed workflow.
    pub namespace: Option<String>,
    pub known_services: Vec<KnownService>,
    /// Steps or namespaces completed before the failure.
    pub completed: Vec<String>,
}

impl CommandResult {
    pub fn ok(summary: impl Into<String>, data: CommandData) -> Self {
        Self { success: true, summary: summary.into(), content: String::new(), data }
    }

    pub fn failure(command: Option<CommandKind>, err: &CommandError) -> Self {
        Self {
            success: false,
            summary: err.to_string(),
            content: String::new(),
            data: CommandData::Failed(FailureData {
                command,
                code: err.code(),
                message: err.to_string(),
                namespace: err.namespace().map(str::to_string),
                known_services: Vec::new(),
                completed: Vec::new(),
            }),
        }
    }

    pub fn with_known_services(mut self, services: Vec<KnownService>) -> Self {
        if let CommandData::Failed(f) = &mut self.data {
            f.known_services = services;
        }
        self
    }

    pub fn with_completed(mut self, completed: Vec<String>) -> Self {
        if let CommandData::Failed(f) = &mut self.data {
            f.completed = completed;
        }
        self
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match &self.data {
            CommandData::Failed(f) => Some(f.code),
            _ => None,
        }
    }
}
