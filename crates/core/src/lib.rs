//! PR previews core types: preview namespaces, observed workload/service state,
//! naming rules and the command grammar.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod command;
pub mod error;
pub mod naming;

pub use command::{parse, CommandKind, Intent};
pub use error::{CommandError, ErrorCode};

/// Pull request identifier as supplied by the chat platform.
pub type PrNumber = u64;

/// A preview namespace as observed in the cluster (one per PR + service).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewNamespace {
    pub name: String,
    pub pr: PrNumber,
    /// Sanitized service name (the `service` label).
    pub service: String,
    /// Target exactly as the actor typed it.
    pub target: String,
    /// Primary workload created inside the namespace, if recorded.
    pub workload: Option<String>,
    /// Primary service object created inside the namespace, if recorded.
    pub service_object: Option<String>,
    pub created_at: Option<String>,
    pub phase: Option<String>,
}

impl PreviewNamespace {
    /// Name of the workload that owns this preview.
    pub fn workload_name(&self) -> &str {
        self.workload.as_deref().unwrap_or(&self.service)
    }

    /// Name of the service object that exposes this preview.
    pub fn service_object_name(&self) -> &str {
        self.service_object.as_deref().unwrap_or(&self.service)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodStatus {
    pub name: String,
    pub phase: Option<String>,
    pub ready: bool,
}

/// Replica counters and pods of a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub pods: Vec<PodStatus>,
    pub created_at: Option<String>,
}

impl WorkloadStatus {
    pub fn is_ready(&self) -> bool {
        self.replicas > 0 && self.ready_replicas == self.replicas
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicePortStatus {
    pub name: Option<String>,
    pub port: i32,
    pub target_port: Option<String>,
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub namespace: String,
    pub service_type: Option<String>,
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePortStatus>,
}

/// Aggregate counters used by health checks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterInfo {
    pub nodes: usize,
    pub namespaces: usize,
    pub preview_namespaces: usize,
}

/// `Kind/name` reference to a resource created inside a preview namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind: kind.into(), name: name.into() }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Live observation of a sub-resource. Missing resources are a normal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Observed<T> {
    #[serde(rename = "none")]
    Absent,
    Found(T),
    Error { message: String },
}

impl<T> Observed<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            Observed::Found(v) => Some(v),
            _ => None,
        }
    }
}

/// Outcome of the background readiness wait started after a preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReadinessState {
    Pending,
    Ready,
    TimedOut,
    Failed { message: String },
    Cancelled,
}

impl ReadinessState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReadinessState::Pending)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMethod {
    /// Built-in probe-equipped workload plus a ClusterIP service.
    Default,
    /// Resources decoded from a user manifest.
    Manifest,
}

impl DeploymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentMethod::Default => "default",
            DeploymentMethod::Manifest => "manifest",
        }
    }
}

pub mod prelude {
    pub use super::{
        ClusterInfo, CommandError, CommandKind, DeploymentMethod, ErrorCode, Intent, Observed, PodStatus, PrNumber,
        PreviewNamespace, ReadinessState, ResourceRef, ServicePortStatus, ServiceStatus, WorkloadStatus,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(replicas: i32, ready: i32) -> WorkloadStatus {
        WorkloadStatus {
            name: "web".into(),
            namespace: "ns".into(),
            replicas,
            ready_replicas: ready,
            available_replicas: ready,
            pods: vec![],
            created_at: None,
        }
    }

    #[test]
    fn readiness_requires_at_least_one_replica() {
        assert!(!workload(0, 0).is_ready());
        assert!(!workload(2, 1).is_ready());
        assert!(workload(2, 2).is_ready());
    }

    #[test]
    fn observed_serializes_with_status_tag() {
        let absent: Observed<WorkloadStatus> = Observed::Absent;
        assert_eq!(serde_json::to_value(&absent).unwrap(), serde_json::json!({"status": "none"}));
        let found = serde_json::to_value(Observed::Found(workload(1, 0))).unwrap();
        assert_eq!(found["status"], "found");
        assert_eq!(found["ready_replicas"], 0);
    }

    #[test]
    fn namespace_falls_back_to_service_for_owned_names() {
        let ns = PreviewNamespace {
            name: "preview-pr-1-web".into(),
            pr: 1,
            service: "web".into(),
            target: "web".into(),
            workload: None,
            service_object: Some("web-svc".into()),
            created_at: None,
            phase: None,
        };
        assert_eq!(ns.workload_name(), "web");
        assert_eq!(ns.service_object_name(), "web-svc");
    }
}
