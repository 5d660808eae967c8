//! Failure taxonomy shared by the grammar, the orchestrator and the renderers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every way a command can fail. Workflow errors carry the underlying cause as text
/// so they can travel inside a result payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandError {
    #[error("unknown command: {text}")]
    UnknownCommand { text: String },

    #[error("permission denied: {actor} may not run {action}")]
    PermissionDenied { actor: String, action: String },

    #[error("failed to create namespace {namespace}: {cause}")]
    NamespaceCreateFailed { namespace: String, cause: String },

    #[error("failed to deploy workload {workload} in {namespace}: {cause}")]
    WorkloadDeployFailed { namespace: String, workload: String, cause: String },

    #[error("failed to create service {service} in {namespace}: {cause}")]
    ServiceCreateFailed { namespace: String, service: String, cause: String },

    #[error("failed to read manifest {path}: {cause}")]
    ManifestParseFailed { path: String, cause: String },

    #[error("failed to apply manifest {path} into {namespace}: {cause}")]
    ManifestApplyFailed { path: String, namespace: String, cause: String },

    #[error("service not found: {service}")]
    ServiceNotFound { service: String },

    #[error("cleanup failed: {cause}")]
    CleanupFailed { cause: String },

    #[error("status query failed: {cause}")]
    StatusQueryFailed { cause: String },
}

/// Stable machine-readable tag for a [`CommandError`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownCommand,
    PermissionDenied,
    NamespaceCreateFailed,
    WorkloadDeployFailed,
    ServiceCreateFailed,
    ManifestParseFailed,
    ManifestApplyFailed,
    ServiceNotFound,
    CleanupFailed,
    StatusQueryFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownCommand => "UnknownCommand",
            ErrorCode::PermissionDenied => "PermissionDenied",
            ErrorCode::NamespaceCreateFailed => "NamespaceCreateFailed",
            ErrorCode::WorkloadDeployFailed => "WorkloadDeployFailed",
            ErrorCode::ServiceCreateFailed => "ServiceCreateFailed",
            ErrorCode::ManifestParseFailed => "ManifestParseFailed",
            ErrorCode::ManifestApplyFailed => "ManifestApplyFailed",
            ErrorCode::ServiceNotFound => "ServiceNotFound",
            ErrorCode::CleanupFailed => "CleanupFailed",
            ErrorCode::StatusQueryFailed => "StatusQueryFailed",
        }
    }
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::UnknownCommand { .. } => ErrorCode::UnknownCommand,
            CommandError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            CommandError::NamespaceCreateFailed { .. } => ErrorCode::NamespaceCreateFailed,
            CommandError::WorkloadDeployFailed { .. } => ErrorCode::WorkloadDeployFailed,
            CommandError::ServiceCreateFailed { .. } => ErrorCode::ServiceCreateFailed,
            CommandError::ManifestParseFailed { .. } => ErrorCode::ManifestParseFailed,
            CommandError::ManifestApplyFailed { .. } => ErrorCode::ManifestApplyFailed,
            CommandError::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            CommandError::CleanupFailed { .. } => ErrorCode::CleanupFailed,
            CommandError::StatusQueryFailed { .. } => ErrorCode::StatusQueryFailed,
        }
    }

    /// Namespace the failure left behind, if any.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            CommandError::NamespaceCreateFailed { namespace, .. }
            | CommandError::WorkloadDeployFailed { namespace, .. }
            | CommandError::ServiceCreateFailed { namespace, .. }
            | CommandError::ManifestApplyFailed { namespace, .. } => Some(namespace),
            _ => None,
        }
    }
}
