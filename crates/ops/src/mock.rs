//! In-memory cluster used by tests and offline runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use previews_apply::ParsedManifestSet;
use previews_core::{
    naming::PreviewNamespaceSpec, ClusterInfo, PreviewNamespace, PrNumber, ResourceRef, ServicePortStatus,
    ServiceStatus, WorkloadStatus,
};

use crate::{ClusterGateway, DefaultWorkload, ExposeSpec};

const MOCK_CREATED_AT: &str = "2024-01-01T00:00:00+00:00";
const MOCK_CLUSTER_IP: &str = "10.96.0.10";

/// Recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    TestConnection,
    ClusterInfo,
    CreateNamespace(String),
    DeleteNamespace(String),
    ListPreviews,
    ListPreviewsForPr(PrNumber),
    DeployWorkload { namespace: String, name: String },
    CreateService { namespace: String, name: String },
    ApplyManifest { namespace: String, resources: usize },
    WorkloadStatus { namespace: String, name: String },
    ServiceStatus { namespace: String, name: String },
}

impl GatewayCall {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            GatewayCall::CreateNamespace(_)
                | GatewayCall::DeleteNamespace(_)
                | GatewayCall::DeployWorkload { .. }
                | GatewayCall::CreateService { .. }
                | GatewayCall::ApplyManifest { .. }
        )
    }
}

/// Failure injection switches.
#[derive(Debug, Clone, Default)]
pub struct MockFailures {
    pub connection: bool,
    pub list: bool,
    pub create_namespace: bool,
    pub deploy_workload: bool,
    pub create_service: bool,
    /// Fails after the first resource has been applied.
    pub apply_manifest: bool,
    pub delete_namespaces: BTreeSet<String>,
    pub workload_status: bool,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: usize,
    other_namespaces: usize,
    namespaces: BTreeMap<String, PreviewNamespace>,
    workloads: BTreeMap<(String, String), WorkloadStatus>,
    services: BTreeMap<(String, String), ServiceStatus>,
    calls: Vec<GatewayCall>,
}

#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
    failures: MockFailures,
}

fn workload(namespace: &str, name: &str, replicas: i32) -> WorkloadStatus {
    WorkloadStatus {
        name: name.to_string(),
        namespace: namespace.to_string(),
        replicas,
        ready_replicas: 0,
        available_replicas: 0,
        pods: Vec::new(),
        created_at: Some(MOCK_CREATED_AT.to_string()),
    }
}

fn service(namespace: &str, name: &str, port: i32, target_port: Option<String>) -> ServiceStatus {
    ServiceStatus {
        name: name.to_string(),
        namespace: namespace.to_string(),
        service_type: Some("ClusterIP".to_string()),
        cluster_ip: Some(MOCK_CLUSTER_IP.to_string()),
        ports: vec![ServicePortStatus {
            name: Some("http".to_string()),
            port,
            target_port,
            protocol: Some("TCP".to_string()),
        }],
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self { state: Mutex::new(MockState { nodes: 1, other_namespaces: 4, ..Default::default() }), failures: MockFailures::default() }
    }

    pub fn with_failures(failures: MockFailures) -> Self {
        Self { failures, ..Self::new() }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, call: GatewayCall) {
        self.lock().calls.push(call);
    }

    /// Seed an existing preview namespace.
    pub fn insert_namespace(&self, spec: &PreviewNamespaceSpec) {
        let ns = PreviewNamespace {
            name: spec.name.clone(),
            pr: spec.pr,
            service: spec.service.clone(),
            target: spec.target.clone(),
            workload: spec.workload.clone(),
            service_object: spec.service_object.clone(),
            created_at: Some(MOCK_CREATED_AT.to_string()),
            phase: Some("Active".to_string()),
        };
        self.lock().namespaces.insert(ns.name.clone(), ns);
    }

    pub fn set_workload(&self, status: WorkloadStatus) {
        self.lock().workloads.insert((status.namespace.clone(), status.name.clone()), status);
    }

    pub fn set_service(&self, status: ServiceStatus) {
        self.lock().services.insert((status.namespace.clone(), status.name.clone()), status);
    }

    /// Make every replica of a workload ready. Returns false if it does not exist.
    pub fn mark_ready(&self, namespace: &str, name: &str) -> bool {
        let mut st = self.lock();
        match st.workloads.get_mut(&(namespace.to_string(), name.to_string())) {
            Some(w) => {
                w.replicas = w.replicas.max(1);
                w.ready_replicas = w.replicas;
                w.available_replicas = w.replicas;
                true
            }
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<GatewayCall> {
        self.lock().calls.iter().filter(|c| c.is_mutation()).cloned().collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.lock().namespaces.keys().cloned().collect()
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadStatus> {
        self.lock().workloads.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.lock().namespaces.contains_key(namespace) {
            Ok(())
        } else {
            Err(anyhow!("namespaces \"{}\" not found", namespace))
        }
    }
}

#[async_trait::async_trait]
impl ClusterGateway for MockGateway {
    async fn test_connection(&self) -> Result<()> {
        self.record(GatewayCall::TestConnection);
        if self.failures.connection {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        self.record(GatewayCall::ClusterInfo);
        if self.failures.connection {
            return Err(anyhow!("connection refused"));
        }
        let st = self.lock();
        Ok(ClusterInfo {
            nodes: st.nodes,
            namespaces: st.other_namespaces + st.namespaces.len(),
            preview_namespaces: st.namespaces.len(),
        })
    }

    async fn create_namespace(&self, spec: &PreviewNamespaceSpec) -> Result<()> {
        self.record(GatewayCall::CreateNamespace(spec.name.clone()));
        if self.failures.create_namespace {
            return Err(anyhow!("namespace create rejected"));
        }
        if self.lock().namespaces.contains_key(&spec.name) {
            return Err(anyhow!("namespaces \"{}\" already exists", spec.name));
        }
        self.insert_namespace(spec);
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        self.record(GatewayCall::DeleteNamespace(name.to_string()));
        if self.failures.delete_namespaces.contains(name) {
            return Err(anyhow!("failed to delete namespace {}", name));
        }
        let mut st = self.lock();
        st.workloads.retain(|(ns, _), _| ns != name);
        st.services.retain(|(ns, _), _| ns != name);
        Ok(st.namespaces.remove(name).is_some())
    }

    async fn list_preview_namespaces(&self) -> Result<Vec<PreviewNamespace>> {
        self.record(GatewayCall::ListPreviews);
        if self.failures.list {
            return Err(anyhow!("failed to list namespaces"));
        }
        Ok(self.lock().namespaces.values().cloned().collect())
    }

    async fn preview_namespaces_for_pr(&self, pr: PrNumber) -> Result<Vec<PreviewNamespace>> {
        self.record(GatewayCall::ListPreviewsForPr(pr));
        if self.failures.list {
            return Err(anyhow!("failed to list namespaces"));
        }
        Ok(self.lock().namespaces.values().filter(|n| n.pr == pr).cloned().collect())
    }

    async fn deploy_default_workload(&self, namespace: &str, w: &DefaultWorkload) -> Result<()> {
        self.record(GatewayCall::DeployWorkload { namespace: namespace.to_string(), name: w.name.clone() });
        if self.failures.deploy_workload {
            return Err(anyhow!("deployment admission denied"));
        }
        self.require_namespace(namespace)?;
        self.set_workload(workload(namespace, &w.name, 1));
        Ok(())
    }

    async fn create_service(&self, namespace: &str, s: &ExposeSpec) -> Result<()> {
        self.record(GatewayCall::CreateService { namespace: namespace.to_string(), name: s.name.clone() });
        if self.failures.create_service {
            return Err(anyhow!("service port conflict"));
        }
        self.require_namespace(namespace)?;
        self.set_service(service(namespace, &s.name, s.port, Some(s.target_port.to_string())));
        Ok(())
    }

    async fn apply_manifest(&self, namespace: &str, set: &ParsedManifestSet) -> Result<Vec<ResourceRef>> {
        self.record(GatewayCall::ApplyManifest { namespace: namespace.to_string(), resources: set.len() });
        self.require_namespace(namespace)?;
        let mut applied = Vec::new();
        for r in set.resources() {
            if self.failures.apply_manifest && !applied.is_empty() {
                return Err(anyhow!("applying {}: admission webhook denied the request", r));
            }
            applied.push(r);
        }
        for d in &set.workloads {
            let name = d.metadata.name.clone().unwrap_or_default();
            let replicas = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            self.set_workload(workload(namespace, &name, replicas));
        }
        for s in &set.services {
            let name = s.metadata.name.clone().unwrap_or_default();
            let port = s.spec.as_ref().and_then(|sp| sp.ports.as_ref()).and_then(|p| p.first()).map(|p| p.port).unwrap_or(80);
            self.set_service(service(namespace, &name, port, None));
        }
        Ok(applied)
    }

    async fn workload_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>> {
        self.record(GatewayCall::WorkloadStatus { namespace: namespace.to_string(), name: name.to_string() });
        if self.failures.workload_status {
            return Err(anyhow!("failed to get deployment {}", name));
        }
        Ok(self.workload(namespace, name))
    }

    async fn service_status(&self, namespace: &str, name: &str) -> Result<Option<ServiceStatus>> {
        self.record(GatewayCall::ServiceStatus { namespace: namespace.to_string(), name: name.to_string() });
        Ok(self.lock().services.get(&(namespace.to_string(), name.to_string())).cloned())
    }
}
