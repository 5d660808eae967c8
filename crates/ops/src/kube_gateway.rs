use std::fmt::Debug;
use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{Pod, Service},
    },
    NamespaceResourceScope,
};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    Client, Resource,
};
use metrics::histogram;
use previews_apply::ParsedManifestSet;
use previews_core::{
    naming::{PreviewNamespaceSpec, CREATOR, FIELD_MANAGER, LABEL_MANAGED_BY},
    ClusterInfo, PreviewNamespace, PrNumber, ResourceRef, ServiceStatus, WorkloadStatus,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::{builders, ClusterGateway, DefaultWorkload, ExposeSpec};

/// Gateway backed by a kube-rs client.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    /// Connect using in-cluster credentials, or the given/default kubeconfig.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = previews_kubehub::get_kube_client(kubeconfig).await?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn apply_one<K>(&self, namespace: &str, obj: &K) -> Result<ResourceRef>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
    {
        let kind = K::kind(&()).to_string();
        let mut obj = obj.clone();
        let name = obj.meta().name.clone().ok_or_else(|| anyhow!("{} without metadata.name", kind))?;
        let meta = obj.meta_mut();
        meta.namespace = Some(namespace.to_string());
        meta.resource_version = None;
        meta.uid = None;
        meta.labels.get_or_insert_with(Default::default).insert(LABEL_MANAGED_BY.to_string(), CREATOR.to_string());

        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&obj))
            .await
            .with_context(|| format!("applying {}/{}", kind, name))?;
        debug!(namespace, kind = %kind, name = %name, "applied");
        Ok(ResourceRef::new(kind, name))
    }
}

#[async_trait::async_trait]
impl ClusterGateway for KubeGateway {
    async fn test_connection(&self) -> Result<()> {
        previews_kubehub::test_connection(&self.client).await
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        previews_kubehub::cluster_info(&self.client).await
    }

    async fn create_namespace(&self, spec: &PreviewNamespaceSpec) -> Result<()> {
        previews_kubehub::create_namespace(&self.client, spec).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        previews_kubehub::delete_namespace(&self.client, name).await
    }

    async fn list_preview_namespaces(&self) -> Result<Vec<PreviewNamespace>> {
        previews_kubehub::list_preview_namespaces(&self.client, &previews_core::naming::preview_selector()).await
    }

    async fn preview_namespaces_for_pr(&self, pr: PrNumber) -> Result<Vec<PreviewNamespace>> {
        previews_kubehub::preview_namespaces_for_pr(&self.client, pr).await
    }

    async fn deploy_default_workload(&self, namespace: &str, workload: &DefaultWorkload) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let dep = builders::default_deployment(namespace, workload);
        api.create(&PostParams::default(), &dep)
            .await
            .with_context(|| format!("failed to create deployment {}", workload.name))?;
        info!(namespace, workload = %workload.name, image = %workload.image, "default workload created");
        Ok(())
    }

    async fn create_service(&self, namespace: &str, service: &ExposeSpec) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = builders::cluster_ip_service(namespace, service);
        api.create(&PostParams::default(), &svc)
            .await
            .with_context(|| format!("failed to create service {}", service.name))?;
        info!(namespace, service = %service.name, port = service.port, "service created");
        Ok(())
    }

    async fn apply_manifest(&self, namespace: &str, set: &ParsedManifestSet) -> Result<Vec<ResourceRef>> {
        let t0 = Instant::now();
        let mut applied = Vec::with_capacity(set.len());
        for d in &set.workloads {
            applied.push(self.apply_one(namespace, d).await?);
        }
        for s in &set.services {
            applied.push(self.apply_one(namespace, s).await?);
        }
        for c in &set.config_objects {
            applied.push(self.apply_one(namespace, c).await?);
        }
        histogram!("previews_manifest_apply_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(namespace, count = applied.len(), "manifest applied");
        Ok(applied)
    }

    async fn workload_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let dep = match api.get_opt(name).await.with_context(|| format!("failed to get deployment {}", name))? {
            Some(d) => d,
            None => return Ok(None),
        };
        let selector = dep
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.as_ref())
            .map(builders::label_selector)
            .unwrap_or_default();
        let pods = if selector.is_empty() {
            Vec::new()
        } else {
            let pods_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            pods_api
                .list(&ListParams::default().labels(&selector))
                .await
                .with_context(|| format!("failed to list pods of {}", name))?
                .items
        };
        Ok(Some(builders::workload_status_from(&dep, &pods)))
    }

    async fn service_status(&self, namespace: &str, name: &str) -> Result<Option<ServiceStatus>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = api.get_opt(name).await.with_context(|| format!("failed to get service {}", name))?;
        Ok(svc.as_ref().map(builders::service_status_from))
    }
}
