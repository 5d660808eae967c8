//! PR previews ops: the cluster gateway. Everything that touches the live cluster goes
//! through [`ClusterGateway`]; [`KubeGateway`] talks to a real API server and
//! [`mock::MockGateway`] keeps an in-memory cluster for tests.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Result;
use previews_apply::ParsedManifestSet;
use previews_core::{
    naming::PreviewNamespaceSpec, ClusterInfo, PreviewNamespace, PrNumber, ResourceRef, ServiceStatus, WorkloadStatus,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod builders;
mod kube_gateway;
pub mod mock;

pub use kube_gateway::KubeGateway;

/// Furthest deadline a wait will use; longer timeouts are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, clamped so huge timeouts cannot overflow the clock.
pub fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now + Duration::from_secs(86_400))
}

/// Built-in workload deployed when no manifest backs the target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultWorkload {
    pub name: String,
    pub image: String,
    pub port: i32,
}

impl DefaultWorkload {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self { name: name.into(), image: image.into(), port: 80 }
    }
}

/// ClusterIP service in front of a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExposeSpec {
    pub name: String,
    /// Value of the `app` label the service selects.
    pub app: String,
    pub port: i32,
    pub target_port: i32,
}

impl ExposeSpec {
    pub fn for_workload(w: &DefaultWorkload) -> Self {
        Self { name: w.name.clone(), app: w.name.clone(), port: w.port, target_port: w.port }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

/// Cluster lifecycle primitives. Each call is a single round of cluster I/O; dropping
/// the returned future abandons it.
#[async_trait::async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn test_connection(&self) -> Result<()>;

    /// Node, namespace and preview-namespace counts.
    async fn cluster_info(&self) -> Result<ClusterInfo>;

    /// Create a preview namespace. Fails if it already exists.
    async fn create_namespace(&self, spec: &PreviewNamespaceSpec) -> Result<()>;

    /// Cascading delete. `Ok(false)` when the namespace was already gone.
    async fn delete_namespace(&self, name: &str) -> Result<bool>;

    async fn list_preview_namespaces(&self) -> Result<Vec<PreviewNamespace>>;

    /// Preview namespaces of one PR, sorted by name.
    async fn preview_namespaces_for_pr(&self, pr: PrNumber) -> Result<Vec<PreviewNamespace>>;

    async fn deploy_default_workload(&self, namespace: &str, workload: &DefaultWorkload) -> Result<()>;

    async fn create_service(&self, namespace: &str, service: &ExposeSpec) -> Result<()>;

    /// Apply workloads, then services, then config objects. Stops at the first failure;
    /// whatever was applied before it stays.
    async fn apply_manifest(&self, namespace: &str, set: &ParsedManifestSet) -> Result<Vec<ResourceRef>>;

    /// `Ok(None)` when the workload does not exist.
    async fn workload_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>>;

    /// `Ok(None)` when the service does not exist.
    async fn service_status(&self, namespace: &str, name: &str) -> Result<Option<ServiceStatus>>;

    /// Poll `workload_status` every `poll` until ready or `timeout` elapses. The first
    /// check happens immediately; read errors end the wait.
    async fn wait_for_ready(&self, namespace: &str, workload: &str, timeout: Duration, poll: Duration) -> Result<WaitOutcome> {
        let deadline = deadline_after(timeout);
        loop {
            if let Some(st) = self.workload_status(namespace, workload).await? {
                if st.is_ready() {
                    return Ok(WaitOutcome::Ready);
                }
                debug!(namespace, workload, ready = st.ready_replicas, total = st.replicas, "waiting for workload");
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}
