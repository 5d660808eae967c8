//! PR previews kubehub: client acquisition, cluster info and the namespace half of
//! the preview lifecycle.

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result};
use k8s_openapi::{
    api::core::v1::{Namespace, Node},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use metrics::counter;
use previews_core::{
    naming::{self, PreviewNamespaceSpec},
    ClusterInfo, PreviewNamespace, PrNumber,
};
use tracing::{debug, info, warn};

/// Build a client. An explicit kubeconfig wins; otherwise in-cluster service account
/// credentials are tried first and the local kubeconfig is the fallback.
pub async fn get_kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?
        }
        None => match Config::incluster() {
            Ok(cfg) => {
                debug!("using in-cluster credentials");
                cfg
            }
            Err(e) => {
                debug!(error = %e, "in-cluster config unavailable; falling back to kubeconfig");
                Config::from_kubeconfig(&KubeConfigOptions::default()).await.context("loading kubeconfig")?
            }
        },
    };
    let client = Client::try_from(config).context("building kube client")?;
    Ok(client)
}

/// True when the error is an API 404.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

pub async fn test_connection(client: &Client) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    api.list(&ListParams::default().limit(1)).await.context("failed to connect to cluster")?;
    Ok(())
}

pub async fn cluster_info(client: &Client) -> Result<ClusterInfo> {
    let nodes: Api<Node> = Api::all(client.clone());
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let node_list = nodes.list(&ListParams::default()).await.context("listing nodes")?;
    let ns_list = namespaces.list(&ListParams::default()).await.context("listing namespaces")?;
    let previews = namespaces
        .list(&ListParams::default().labels(&naming::preview_selector()))
        .await
        .context("listing preview namespaces")?;
    Ok(ClusterInfo { nodes: node_list.items.len(), namespaces: ns_list.items.len(), preview_namespaces: previews.items.len() })
}

/// Create the namespace described by `spec`. A conflict (already exists) is an error:
/// one preview namespace per PR + service.
pub async fn create_namespace(client: &Client, spec: &PreviewNamespaceSpec) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let created_at = chrono::Utc::now().to_rfc3339();
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            labels: Some(spec.labels()),
            annotations: Some(spec.annotations(&created_at)),
            ..Default::default()
        },
        ..Default::default()
    };
    api.create(&PostParams::default(), &ns)
        .await
        .with_context(|| format!("failed to create namespace {}", spec.name))?;
    counter!("previews_namespaces_created", 1u64);
    info!(namespace = %spec.name, pr = spec.pr, service = %spec.service, "namespace created");
    Ok(())
}

/// Delete a namespace; everything inside goes with it. Returns false if it was already gone.
pub async fn delete_namespace(client: &Client, name: &str) -> Result<bool> {
    let api: Api<Namespace> = Api::all(client.clone());
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            counter!("previews_namespaces_deleted", 1u64);
            info!(namespace = %name, "namespace deletion requested");
            Ok(true)
        }
        Err(e) if is_not_found(&e) => {
            debug!(namespace = %name, "namespace already gone");
            Ok(false)
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("failed to delete namespace {}", name))),
    }
}

/// List preview namespaces matching a label selector, sorted by name.
pub async fn list_preview_namespaces(client: &Client, selector: &str) -> Result<Vec<PreviewNamespace>> {
    let api: Api<Namespace> = Api::all(client.clone());
    let list = api
        .list(&ListParams::default().labels(selector))
        .await
        .with_context(|| format!("listing namespaces ({})", selector))?;
    let mut out: Vec<PreviewNamespace> = list.items.iter().filter_map(preview_from).collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

pub async fn preview_namespaces_for_pr(client: &Client, pr: PrNumber) -> Result<Vec<PreviewNamespace>> {
    list_preview_namespaces(client, &naming::pr_selector(pr)).await
}

fn preview_from(ns: &Namespace) -> Option<PreviewNamespace> {
    let name = ns.metadata.name.clone()?;
    let labels = ns.metadata.labels.clone().unwrap_or_default();
    let annos = ns.metadata.annotations.clone().unwrap_or_default();
    let pr = match labels.get(naming::LABEL_PR_NUMBER).map(|v| v.parse::<PrNumber>()) {
        Some(Ok(pr)) => pr,
        _ => {
            warn!(namespace = %name, "preview namespace without a valid pr-number label; skipping");
            return None;
        }
    };
    let service = labels.get(naming::LABEL_SERVICE).cloned().unwrap_or_default();
    let target = annos.get(naming::ANNO_SERVICE).cloned().unwrap_or_else(|| service.clone());
    Some(PreviewNamespace {
        name,
        pr,
        service,
        target,
        workload: annos.get(naming::ANNO_WORKLOAD).cloned(),
        service_object: annos.get(naming::ANNO_SERVICE_OBJECT).cloned(),
        created_at: ns.metadata.creation_timestamp.as_ref().map(|t| t.0.to_rfc3339()),
        phase: ns.status.as_ref().and_then(|s| s.phase.clone()),
    })
}
