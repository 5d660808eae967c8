//! Typed objects for the default workload/service, and projections of live objects
//! into status shapes.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerPort, HTTPGetAction, Pod, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Service,
            ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use previews_core::{
    naming::{CREATOR, LABEL_APP, LABEL_MANAGED_BY},
    PodStatus, ServicePortStatus, ServiceStatus, WorkloadStatus,
};

use crate::{DefaultWorkload, ExposeSpec};

pub const CPU_REQUEST: &str = "100m";
pub const MEMORY_REQUEST: &str = "128Mi";
pub const CPU_LIMIT: &str = "200m";
pub const MEMORY_LIMIT: &str = "256Mi";

/// Readiness is probed before liveness.
pub const READINESS_DELAY_SECS: i32 = 5;
pub const READINESS_PERIOD_SECS: i32 = 5;
pub const LIVENESS_DELAY_SECS: i32 = 10;
pub const LIVENESS_PERIOD_SECS: i32 = 10;

const LABEL_PREVIEW_DEPLOYMENT: &str = "preview-deployment";

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn http_probe(port: i32, delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction { path: Some("/".to_string()), port: IntOrString::Int(port), ..Default::default() }),
        initial_delay_seconds: Some(delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    let mut m = BTreeMap::new();
    m.insert("cpu".to_string(), Quantity(cpu.to_string()));
    m.insert("memory".to_string(), Quantity(memory.to_string()));
    m
}

/// Single-replica probe-equipped deployment for targets without a manifest.
pub fn default_deployment(namespace: &str, w: &DefaultWorkload) -> Deployment {
    let name = w.name.as_str();
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(&[(LABEL_APP, name), (LABEL_MANAGED_BY, CREATOR), (LABEL_PREVIEW_DEPLOYMENT, "true")])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(labels(&[(LABEL_APP, name)])), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(&[(LABEL_APP, name), (LABEL_PREVIEW_DEPLOYMENT, "true")])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(w.image.clone()),
                        ports: Some(vec![ContainerPort {
                            container_port: w.port,
                            name: Some("http".to_string()),
                            ..Default::default()
                        }]),
                        resources: Some(ResourceRequirements {
                            requests: Some(quantities(CPU_REQUEST, MEMORY_REQUEST)),
                            limits: Some(quantities(CPU_LIMIT, MEMORY_LIMIT)),
                            ..Default::default()
                        }),
                        liveness_probe: Some(http_probe(w.port, LIVENESS_DELAY_SECS, LIVENESS_PERIOD_SECS)),
                        readiness_probe: Some(http_probe(w.port, READINESS_DELAY_SECS, READINESS_PERIOD_SECS)),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn cluster_ip_service(namespace: &str, s: &ExposeSpec) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(s.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(&[(LABEL_APP, s.app.as_str()), (LABEL_MANAGED_BY, CREATOR)])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels(&[(LABEL_APP, s.app.as_str())])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: s.port,
                target_port: Some(IntOrString::Int(s.target_port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `k=v,k2=v2` selector string from match labels.
pub fn label_selector(match_labels: &BTreeMap<String, String>) -> String {
    match_labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

pub fn workload_status_from(dep: &Deployment, pods: &[Pod]) -> WorkloadStatus {
    let status = dep.status.clone().unwrap_or_default();
    let mut pods: Vec<PodStatus> = pods
        .iter()
        .map(|p| PodStatus {
            name: p.metadata.name.clone().unwrap_or_default(),
            phase: p.status.as_ref().and_then(|s| s.phase.clone()),
            ready: pod_is_ready(p),
        })
        .collect();
    pods.sort_by(|a, b| a.name.cmp(&b.name));
    WorkloadStatus {
        name: dep.metadata.name.clone().unwrap_or_default(),
        namespace: dep.metadata.namespace.clone().unwrap_or_default(),
        replicas: status.replicas.unwrap_or(0),
        ready_replicas: status.ready_replicas.unwrap_or(0),
        available_replicas: status.available_replicas.unwrap_or(0),
        pods,
        created_at: dep.metadata.creation_timestamp.as_ref().map(|t| t.0.to_rfc3339()),
    }
}

pub fn service_status_from(svc: &Service) -> ServiceStatus {
    let spec = svc.spec.clone().unwrap_or_default();
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| ServicePortStatus {
            name: p.name,
            port: p.port,
            target_port: p.target_port.map(|t| match t {
                IntOrString::Int(i) => i.to_string(),
                IntOrString::String(s) => s,
            }),
            protocol: p.protocol,
        })
        .collect();
    ServiceStatus {
        name: svc.metadata.name.clone().unwrap_or_default(),
        namespace: svc.metadata.namespace.clone().unwrap_or_default(),
        service_type: spec.type_,
        cluster_ip: spec.cluster_ip,
        ports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::{apps::v1::DeploymentStatus, core::v1::{PodCondition, PodStatus as KPodStatus}};

    fn pod(name: &str, ready: &str) -> Pod {
        Pod {
            metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            status: Some(KPodStatus {
                phase: Some("Running".into()),
                conditions: Some(vec![PodCondition { type_: "Ready".into(), status: ready.into(), ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn default_deployment_probes_liveness_after_readiness() {
        let d = default_deployment("preview-pr-1-web", &DefaultWorkload::new("web", "nginx:alpine"));
        let spec = d.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let c = &spec.template.spec.unwrap().containers[0];
        assert_eq!(c.image.as_deref(), Some("nginx:alpine"));
        let live = c.liveness_probe.as_ref().unwrap().initial_delay_seconds.unwrap();
        let ready = c.readiness_probe.as_ref().unwrap().initial_delay_seconds.unwrap();
        assert!(live > ready);
        let res = c.resources.as_ref().unwrap();
        assert_eq!(res.requests.as_ref().unwrap()["cpu"], Quantity("100m".into()));
        assert_eq!(res.limits.as_ref().unwrap()["memory"], Quantity("256Mi".into()));
        assert_eq!(d.metadata.namespace.as_deref(), Some("preview-pr-1-web"));
    }

    #[test]
    fn service_selects_the_workload() {
        let w = DefaultWorkload::new("web", "nginx:alpine");
        let s = cluster_ip_service("ns", &ExposeSpec::for_workload(&w));
        let spec = s.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(spec.selector.unwrap()["app"], "web");
        assert_eq!(spec.ports.unwrap()[0].target_port, Some(IntOrString::Int(80)));
    }

    #[test]
    fn label_selector_joins_sorted_pairs() {
        let m = labels(&[("tier", "web"), ("app", "shop")]);
        assert_eq!(label_selector(&m), "app=shop,tier=web");
    }

    #[test]
    fn workload_status_counts_ready_pods() {
        let mut d = default_deployment("ns", &DefaultWorkload::new("web", "nginx:alpine"));
        d.status = Some(DeploymentStatus { replicas: Some(2), ready_replicas: Some(1), ..Default::default() });
        let st = workload_status_from(&d, &[pod("web-b", "False"), pod("web-a", "True")]);
        assert_eq!((st.ready_replicas, st.replicas), (1, 2));
        assert_eq!(st.pods[0].name, "web-a");
        assert!(st.pods[0].ready);
        assert!(!st.pods[1].ready);
        assert!(!st.is_ready());
    }
}
