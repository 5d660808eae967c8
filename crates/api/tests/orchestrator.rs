use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use previews_api::{
    render,
    result::{FailureData, PlanData, PreviewData, StatusReport},
    AllowList, CommandData, CommandResult, Orchestrator, OrchestratorConfig,
};
use previews_core::{naming::PreviewNamespaceSpec, prelude::*};
use previews_ops::{
    mock::{GatewayCall, MockFailures, MockGateway},
    ClusterGateway,
};
use tempfile::TempDir;

const PR: u64 = 42;
const DEPLOYER: &str = "alice";
const OUTSIDER: &str = "mallory";

const MYAPP: &str = "apiVersion: apps/v1
kind: Deployment
metadata:
  name: myapp
spec:
  replicas: 2
  selector:
    matchLabels:
      app: myapp
  template:
    metadata:
      labels:
        app: myapp
    spec:
      containers:
      - name: myapp
        image: ghcr.io/acme/myapp:pr-42
---
apiVersion: v1
kind: Service
metadata:
  name: myapp
spec:
  selector:
    app: myapp
  ports:
  - port: 8080
";

fn repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("k8s")).unwrap();
    std::fs::write(dir.path().join("k8s/myapp.yaml"), MYAPP).unwrap();
    dir
}

fn orchestrator(gw: &Arc<MockGateway>, root: &Path) -> Orchestrator {
    let config = OrchestratorConfig {
        repo_root: root.to_path_buf(),
        deployers: vec![DEPLOYER.to_string()],
        ..Default::default()
    };
    let policy = Arc::new(AllowList::new(config.deployers.clone()));
    Orchestrator::new(gw.clone(), policy, config)
}

fn failure(r: &CommandResult) -> &FailureData {
    match &r.data {
        CommandData::Failed(f) => f,
        other => panic!("expected failure, got {:?}", other),
    }
}

fn preview_data(r: &CommandResult) -> &PreviewData {
    match &r.data {
        CommandData::Preview(d) => d,
        other => panic!("expected preview data, got {:?}", other),
    }
}

fn status_data(r: &CommandResult) -> &StatusReport {
    match &r.data {
        CommandData::Status(d) => d,
        other => panic!("expected status data, got {:?}", other),
    }
}

fn plan_data(r: &CommandResult) -> &PlanData {
    match &r.data {
        CommandData::Plan(d) => d,
        other => panic!("expected plan data, got {:?}", other),
    }
}

#[tokio::test]
async fn help_lists_every_command_without_cluster_access() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/help", OUTSIDER, PR).await;
    assert!(r.success);
    let CommandData::Help(h) = &r.data else { panic!("expected help") };
    assert_eq!(h.available_commands, CommandKind::ALL.to_vec());
    assert!(h.user_permissions.can_read);
    assert!(!h.user_permissions.can_deploy);
    assert_eq!(h.known_services.len(), 1);
    assert_eq!(h.known_services[0].name, "myapp");
    assert!(gw.calls().is_empty());
}

#[tokio::test]
async fn preview_from_manifest_applies_every_resource() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/preview myapp", DEPLOYER, PR).await;
    assert!(r.success, "{:?}", r);
    let d = preview_data(&r);
    assert!(d.manifest_detected);
    assert_eq!(d.method, DeploymentMethod::Manifest);
    assert_eq!(d.deployed_resources.len(), 2);
    assert_eq!(d.namespace, "preview-pr-42-myapp");
    assert_eq!(d.status, "deploying");
    assert_eq!(d.awaiting_ready, vec!["myapp".to_string()]);
    assert_eq!(gw.namespaces(), vec!["preview-pr-42-myapp".to_string()]);
    assert_eq!(orch.readiness().state(&d.namespace), Some(ReadinessState::Pending));

    let muts = gw.mutations();
    assert_eq!(muts[0], GatewayCall::CreateNamespace("preview-pr-42-myapp".into()));
    assert_eq!(muts[1], GatewayCall::ApplyManifest { namespace: "preview-pr-42-myapp".into(), resources: 2 });
}

#[tokio::test]
async fn unknown_service_fails_before_any_mutation() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/preview ghost", DEPLOYER, PR).await;
    assert!(!r.success);
    let f = failure(&r);
    assert_eq!(f.code, ErrorCode::ServiceNotFound);
    assert_eq!(f.known_services[0].name, "myapp");
    assert!(gw.mutations().is_empty());
}

#[tokio::test]
async fn status_reports_unready_workload_without_failing() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());
    assert!(orch.handle_text("/preview", DEPLOYER, PR).await.success);

    let r = orch.handle_text("/status", OUTSIDER, PR).await;
    assert!(r.success);
    let s = status_data(&r);
    assert_eq!(s.total, 1);
    let entry = &s.previews[0];
    assert_eq!(entry.namespace.name, "preview-pr-42-nginx");
    let w = entry.workload.found().expect("workload");
    assert_eq!((w.ready_replicas, w.replicas), (0, 1));
    assert!(entry.service.found().is_some());
    assert_eq!(entry.readiness, Some(ReadinessState::Pending));
}

#[tokio::test]
async fn status_marks_missing_sub_resources_as_none() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    gw.insert_namespace(&PreviewNamespaceSpec::new(PR, "web"));
    let orch = orchestrator(&gw, dir.path());

    let r = orch.status(PR, OUTSIDER).await;
    assert!(r.success);
    let entry = &status_data(&r).previews[0];
    assert_eq!(entry.workload, Observed::Absent);
    assert_eq!(entry.service, Observed::Absent);
    assert_eq!(entry.readiness, None);
}

#[tokio::test]
async fn status_is_idempotent() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    gw.insert_namespace(&PreviewNamespaceSpec::new(PR, "web"));
    gw.insert_namespace(&PreviewNamespaceSpec::new(PR + 1, "web"));
    let orch = orchestrator(&gw, dir.path());

    let a = orch.status(PR, OUTSIDER).await;
    let b = orch.status(PR, OUTSIDER).await;
    assert_eq!(a.data, b.data);
    assert_eq!(status_data(&a).total, 1);
}

#[tokio::test]
async fn status_with_no_previews_is_success() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());
    let r = orch.status(PR, OUTSIDER).await;
    assert!(r.success);
    assert!(status_data(&r).previews.is_empty());
}

#[tokio::test]
async fn status_list_failure_is_reported() {
    let dir = repo();
    let gw = Arc::new(MockGateway::with_failures(MockFailures { list: true, ..Default::default() }));
    let orch = orchestrator(&gw, dir.path());
    let r = orch.status(PR, OUTSIDER).await;
    assert_eq!(failure(&r).code, ErrorCode::StatusQueryFailed);
}

#[tokio::test]
async fn gated_commands_make_no_calls_for_outsiders() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    for text in ["/preview", "/preview myapp", "/cleanup"] {
        let r = orch.handle_text(text, OUTSIDER, PR).await;
        assert!(!r.success);
        assert_eq!(failure(&r).code, ErrorCode::PermissionDenied);
    }
    assert!(gw.calls().is_empty());
}

#[tokio::test]
async fn cleanup_without_previews_succeeds_empty() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/cleanup", DEPLOYER, PR).await;
    assert!(r.success);
    let CommandData::Cleanup(c) = &r.data else { panic!("expected cleanup") };
    assert!(c.cleaned_namespaces.is_empty());
    assert_eq!(c.total_cleaned, 0);
    assert!(gw.mutations().is_empty());
}

#[tokio::test]
async fn cleanup_deletes_every_namespace_of_the_pr_and_cancels_waits() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());
    assert!(orch.handle_text("/preview", DEPLOYER, PR).await.success);
    assert!(orch.handle_text("/preview myapp", DEPLOYER, PR).await.success);
    gw.insert_namespace(&PreviewNamespaceSpec::new(7, "other"));

    let r = orch.handle_text("/cleanup", DEPLOYER, PR).await;
    assert!(r.success);
    let CommandData::Cleanup(c) = &r.data else { panic!("expected cleanup") };
    assert_eq!(c.cleaned_namespaces, vec!["preview-pr-42-myapp".to_string(), "preview-pr-42-nginx".to_string()]);
    assert_eq!(gw.namespaces(), vec!["preview-pr-7-other".to_string()]);
    assert_eq!(orch.readiness().state("preview-pr-42-nginx"), None);
    assert!(orch.readiness().pending().is_empty());
}

#[tokio::test]
async fn cleanup_stops_at_first_failed_delete() {
    let dir = repo();
    let failures = MockFailures {
        delete_namespaces: ["preview-pr-42-web".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let gw = Arc::new(MockGateway::with_failures(failures));
    gw.insert_namespace(&PreviewNamespaceSpec::new(PR, "api"));
    gw.insert_namespace(&PreviewNamespaceSpec::new(PR, "web"));
    let orch = orchestrator(&gw, dir.path());

    let r = orch.cleanup(PR, DEPLOYER).await;
    assert!(!r.success);
    let f = failure(&r);
    assert_eq!(f.code, ErrorCode::CleanupFailed);
    assert_eq!(f.completed, vec!["preview-pr-42-api".to_string()]);
    assert!(f.message.contains("preview-pr-42-web"));
    assert_eq!(gw.namespaces(), vec!["preview-pr-42-web".to_string()]);
}

#[tokio::test]
async fn second_preview_of_same_target_conflicts() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());
    assert!(orch.handle_text("/preview myapp", DEPLOYER, PR).await.success);

    let r = orch.handle_text("/preview myapp", DEPLOYER, PR).await;
    let f = failure(&r);
    assert_eq!(f.code, ErrorCode::NamespaceCreateFailed);
    assert!(f.message.contains("already exists"));
    assert_eq!(f.namespace.as_deref(), Some("preview-pr-42-myapp"));
}

#[tokio::test]
async fn manifest_apply_failure_leaves_namespace_behind() {
    let dir = repo();
    let gw = Arc::new(MockGateway::with_failures(MockFailures { apply_manifest: true, ..Default::default() }));
    let orch = orchestrator(&gw, dir.path());

    let r = orch.preview(PR, DEPLOYER, Some("myapp")).await;
    let f = failure(&r);
    assert_eq!(f.code, ErrorCode::ManifestApplyFailed);
    assert!(f.message.contains("Service/myapp"));
    assert_eq!(f.completed, vec!["Namespace/preview-pr-42-myapp".to_string()]);
    assert_eq!(gw.namespaces(), vec!["preview-pr-42-myapp".to_string()]);
    assert!(orch.readiness().pending().is_empty());

    let md = render::render(&r);
    assert!(md.contains("/cleanup"));
}

#[tokio::test]
async fn unreadable_manifest_creates_nothing() {
    let dir = repo();
    std::fs::write(dir.path().join("k8s/broken.yaml"), [0xff_u8, 0xfe, 0x00]).unwrap();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/preview broken", DEPLOYER, PR).await;
    assert_eq!(failure(&r).code, ErrorCode::ManifestParseFailed);
    assert!(gw.mutations().is_empty());
}

#[tokio::test]
async fn workload_failure_stops_before_service() {
    let dir = repo();
    let gw = Arc::new(MockGateway::with_failures(MockFailures { deploy_workload: true, ..Default::default() }));
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/preview", DEPLOYER, PR).await;
    let f = failure(&r);
    assert_eq!(f.code, ErrorCode::WorkloadDeployFailed);
    assert!(!gw.mutations().iter().any(|c| matches!(c, GatewayCall::CreateService { .. })));
}

#[tokio::test]
async fn service_failure_reports_deployed_workload() {
    let dir = repo();
    let gw = Arc::new(MockGateway::with_failures(MockFailures { create_service: true, ..Default::default() }));
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/preview", DEPLOYER, PR).await;
    let f = failure(&r);
    assert_eq!(f.code, ErrorCode::ServiceCreateFailed);
    assert_eq!(f.completed, vec!["Namespace/preview-pr-42-nginx".to_string(), "Deployment/nginx".to_string()]);
}

#[tokio::test]
async fn plan_is_read_only() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/plan myapp", OUTSIDER, PR).await;
    assert!(r.success);
    let p = plan_data(&r);
    assert_eq!(p.method, Some(DeploymentMethod::Manifest));
    assert_eq!(p.resources.len(), 2);
    assert!(p.would_deploy);

    let r = orch.handle_text("/plan ghost", OUTSIDER, PR).await;
    assert!(r.success);
    let p = plan_data(&r);
    assert_eq!(p.method, None);
    assert!(!p.would_deploy);

    let r = orch.handle_text("/plan", OUTSIDER, PR).await;
    let p = plan_data(&r);
    assert_eq!(p.target, "nginx");
    assert_eq!(p.requested, None);
    assert_eq!(p.method, Some(DeploymentMethod::Default));

    assert!(gw.mutations().is_empty());
}

#[tokio::test]
async fn plan_notices_existing_preview() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());
    assert!(orch.handle_text("/preview myapp", DEPLOYER, PR).await.success);

    let r = orch.plan(PR, OUTSIDER, Some("myapp")).await;
    let p = plan_data(&r);
    assert!(p.already_deployed);
    assert!(!p.would_deploy);
}

#[tokio::test]
async fn unknown_text_is_a_failed_result() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("looks good to me!", DEPLOYER, PR).await;
    let f = failure(&r);
    assert_eq!(f.code, ErrorCode::UnknownCommand);
    assert_eq!(f.command, None);
    assert!(gw.calls().is_empty());
}

#[tokio::test]
async fn connection_check_reports_counts() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    gw.insert_namespace(&PreviewNamespaceSpec::new(PR, "web"));
    let orch = orchestrator(&gw, dir.path());

    let r = orch.test_connection().await;
    let CommandData::Connection(info) = r.data else { panic!("expected connection") };
    assert_eq!(info.preview_namespaces, 1);

    let down = Arc::new(MockGateway::with_failures(MockFailures { connection: true, ..Default::default() }));
    let r = orchestrator(&down, dir.path()).test_connection().await;
    assert!(!r.success);
}

#[tokio::test(start_paused = true)]
async fn readiness_shows_up_in_status_once_ready() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());
    assert!(orch.handle_text("/preview", DEPLOYER, PR).await.success);

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(gw.mark_ready("preview-pr-42-nginx", "nginx"));
    assert_eq!(orch.readiness().wait("preview-pr-42-nginx").await, Some(ReadinessState::Ready));

    let r = orch.status(PR, OUTSIDER).await;
    assert_eq!(status_data(&r).previews[0].readiness, Some(ReadinessState::Ready));
}

#[tokio::test]
async fn rendered_results_carry_markdown() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = render::attach_markdown(orch.handle_text("/preview myapp", DEPLOYER, PR).await);
    assert!(r.content.contains("preview-pr-42-myapp"));
    assert!(r.content.contains("Deployment/myapp"));

    let r = render::attach_markdown(orch.handle_text("/status", DEPLOYER, PR).await);
    assert!(r.content.contains("0/2 replicas ready"));
}

#[tokio::test]
async fn every_service_offered_by_help_can_be_previewed() {
    let dir = repo();
    std::fs::write(dir.path().join("k8s/deployment.yaml"), MYAPP).unwrap();
    std::fs::create_dir_all(dir.path().join("k8s/web")).unwrap();
    std::fs::write(dir.path().join("k8s/web/deployment.yaml"), MYAPP).unwrap();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/help", DEPLOYER, PR).await;
    let CommandData::Help(h) = &r.data else { panic!("expected help") };
    let names: Vec<&str> = h.known_services.iter().map(|k| k.name.as_str()).collect();
    assert_eq!(names, vec!["myapp", "web"]);

    for name in names {
        let r = orch.handle_text(&format!("/preview {}", name), DEPLOYER, PR).await;
        assert!(r.success, "{}: {:?}", name, r);
        assert_eq!(preview_data(&r).method, DeploymentMethod::Manifest);
    }
}

#[tokio::test]
async fn status_forgets_waits_of_namespaces_deleted_elsewhere() {
    let dir = repo();
    let gw = Arc::new(MockGateway::new());
    let orch = orchestrator(&gw, dir.path());

    let r = orch.handle_text("/preview myapp", DEPLOYER, PR).await;
    let ns = preview_data(&r).namespace.clone();
    assert_eq!(orch.readiness().pending(), vec![ns.clone()]);

    gw.delete_namespace(&ns).await.unwrap();
    let r = orch.handle_text("/status", OUTSIDER, PR).await;
    assert_eq!(status_data(&r).total, 0);
    assert_eq!(orch.readiness().state(&ns), None);
    assert!(orch.readiness().pending().is_empty());
}
