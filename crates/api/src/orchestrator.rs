use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use previews_apply::{KnownService, ManifestCatalog, ParsedManifestSet};
use previews_core::{
    naming::{namespace_name, namespace_prefix, sanitize_service, PreviewNamespaceSpec},
    CommandError, CommandKind, DeploymentMethod, Intent, Observed, PrNumber, ResourceRef,
};
use previews_ops::{ClusterGateway, DefaultWorkload, ExposeSpec};
use tracing::{info, warn};

use crate::{
    config::OrchestratorConfig,
    policy::{GatedAction, PermissionPolicy},
    readiness::ReadinessTracker,
    result::{
        CleanupData, CommandData, CommandResult, HelpData, PlanData, PreviewData, PreviewStatus, StatusReport,
        UserPermissions,
    },
};

/// Full cause chain of a gateway error, for result payloads.
fn cause(e: &anyhow::Error) -> String {
    format!("{:#}", e)
}

/// How a target would be deployed.
struct Resolution {
    target: String,
    sanitized: String,
    namespace: String,
    method: Option<DeploymentMethod>,
    manifest: Option<PathBuf>,
}

pub struct Orchestrator {
    gateway: Arc<dyn ClusterGateway>,
    policy: Arc<dyn PermissionPolicy>,
    config: OrchestratorConfig,
    catalog: ManifestCatalog,
    readiness: ReadinessTracker,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn ClusterGateway>, policy: Arc<dyn PermissionPolicy>, config: OrchestratorConfig) -> Self {
        let catalog = ManifestCatalog::new(config.repo_root.clone());
        Self { gateway, policy, config, catalog, readiness: ReadinessTracker::new() }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn readiness(&self) -> &ReadinessTracker {
        &self.readiness
    }

    /// Parse `text` and run the command it names. Unparseable text is a failed result,
    /// not an error.
    pub async fn handle_text(&self, text: &str, actor: &str, pr: PrNumber) -> CommandResult {
        match previews_core::parse(text, actor, pr) {
            Ok(intent) => self.dispatch(&intent).await,
            Err(e) => {
                info!(actor, pr, "api: ignoring non-command text");
                counter!("previews_commands_total", 1u64, "command" => "unknown", "outcome" => "failure");
                CommandResult::failure(None, &e)
            }
        }
    }

    pub async fn dispatch(&self, intent: &Intent) -> CommandResult {
        let t0 = Instant::now();
        let kind = intent.kind;
        info!(command = kind.as_str(), actor = %intent.actor, pr = intent.pr, target = ?intent.target, "api: command start");
        let result = match kind {
            CommandKind::Help => self.help(&intent.actor),
            CommandKind::Status => self.status(intent.pr, &intent.actor).await,
            CommandKind::Plan => self.plan(intent.pr, &intent.actor, intent.target.as_deref()).await,
            CommandKind::Preview => self.preview(intent.pr, &intent.actor, intent.target.as_deref()).await,
            CommandKind::Cleanup => self.cleanup(intent.pr, &intent.actor).await,
        };
        let took_ms = t0.elapsed().as_secs_f64() * 1000.0;
        let outcome = if result.success { "success" } else { "failure" };
        counter!("previews_commands_total", 1u64, "command" => kind.as_str(), "outcome" => outcome);
        histogram!("previews_command_latency_ms", took_ms, "command" => kind.as_str());
        info!(command = kind.as_str(), success = result.success, code = ?result.error_code(), took_ms = %t0.elapsed().as_millis(), "api: command done");
        result
    }

    fn known_services(&self) -> Vec<KnownService> {
        self.catalog.scan()
    }

    fn resolve(&self, pr: PrNumber, target: Option<&str>) -> Resolution {
        let target = target.unwrap_or(&self.config.default_target).to_string();
        let sanitized = sanitize_service(&target);
        let namespace = namespace_name(pr, &sanitized);
        let manifest = self.catalog.resolve(&target);
        let method = match &manifest {
            Some(_) => Some(DeploymentMethod::Manifest),
            None if target == self.config.default_target => Some(DeploymentMethod::Default),
            None => None,
        };
        Resolution { target, sanitized, namespace, method, manifest }
    }

    fn gate(&self, kind: CommandKind, actor: &str, action: GatedAction) -> Option<CommandResult> {
        if self.policy.is_permitted(actor, action) {
            return None;
        }
        warn!(actor, action = action.as_str(), "api: permission denied");
        let err = CommandError::PermissionDenied { actor: actor.to_string(), action: action.as_str().to_string() };
        Some(CommandResult::failure(Some(kind), &err))
    }

    fn ingest(path: &std::path::Path) -> Result<ParsedManifestSet, CommandError> {
        previews_apply::parse_file(path)
            .map_err(|e| CommandError::ManifestParseFailed { path: path.display().to_string(), cause: e.to_string() })
    }

    /// Static command reference plus the services the checkout offers. No cluster access.
    pub fn help(&self, actor: &str) -> CommandResult {
        let data = HelpData {
            requested_by: actor.to_string(),
            available_commands: CommandKind::ALL.to_vec(),
            user_permissions: UserPermissions {
                can_read: true,
                can_deploy: self.policy.is_permitted(actor, GatedAction::Preview),
                can_cleanup: self.policy.is_permitted(actor, GatedAction::Cleanup),
            },
            default_target: self.config.default_target.clone(),
            known_services: self.known_services(),
        };
        CommandResult::ok("Available commands", CommandData::Help(data))
    }

    /// Live state of every preview namespace of `pr`. Missing or unreadable
    /// sub-resources are reported per entry and never fail the call.
    pub async fn status(&self, pr: PrNumber, actor: &str) -> CommandResult {
        let namespaces = match self.gateway.preview_namespaces_for_pr(pr).await {
            Ok(v) => v,
            Err(e) => {
                let err = CommandError::StatusQueryFailed { cause: cause(&e) };
                return CommandResult::failure(Some(CommandKind::Status), &err);
            }
        };

        self.readiness.retain_live(&namespace_prefix(pr), namespaces.iter().map(|ns| ns.name.as_str()));

        let mut previews = Vec::with_capacity(namespaces.len());
        for ns in namespaces {
            let workload = match self.gateway.workload_status(&ns.name, ns.workload_name()).await {
                Ok(Some(w)) => Observed::Found(w),
                Ok(None) => Observed::Absent,
                Err(e) => Observed::Error { message: cause(&e) },
            };
            let service = match self.gateway.service_status(&ns.name, ns.service_object_name()).await {
                Ok(Some(s)) => Observed::Found(s),
                Ok(None) => Observed::Absent,
                Err(e) => Observed::Error { message: cause(&e) },
            };
            let readiness = self.readiness.state(&ns.name);
            previews.push(PreviewStatus { namespace: ns, workload, service, readiness });
        }

        let total = previews.len();
        let summary = if total == 0 {
            format!("No preview environments for PR #{}", pr)
        } else {
            format!("{} preview environment(s) for PR #{}", total, pr)
        };
        CommandResult::ok(summary, CommandData::Status(StatusReport { requested_by: actor.to_string(), pr, previews, total }))
    }

    /// What `/preview` would do for `target`. Reads only.
    pub async fn plan(&self, pr: PrNumber, actor: &str, target: Option<&str>) -> CommandResult {
        let r = self.resolve(pr, target);

        let (resources, skipped) = match (&r.method, &r.manifest) {
            (Some(DeploymentMethod::Manifest), Some(path)) => match Self::ingest(path) {
                Ok(set) => (set.resources(), set.skipped),
                Err(err) => return CommandResult::failure(Some(CommandKind::Plan), &err),
            },
            (Some(DeploymentMethod::Default), _) => (
                vec![ResourceRef::new("Deployment", r.sanitized.clone()), ResourceRef::new("Service", r.sanitized.clone())],
                Vec::new(),
            ),
            _ => (Vec::new(), Vec::new()),
        };

        let already_deployed = match self.gateway.preview_namespaces_for_pr(pr).await {
            Ok(v) => v.iter().any(|n| n.name == r.namespace),
            Err(e) => {
                let err = CommandError::StatusQueryFailed { cause: cause(&e) };
                return CommandResult::failure(Some(CommandKind::Plan), &err);
            }
        };

        let would_deploy = r.method.is_some() && !already_deployed;
        let summary = match (r.method, already_deployed) {
            (None, _) => format!("No manifest found for {}", r.target),
            (Some(_), true) => format!("{} is already deployed in {}", r.target, r.namespace),
            (Some(m), false) => format!("Would deploy {} ({}) into {}", r.target, m.as_str(), r.namespace),
        };
        let data = PlanData {
            requested_by: actor.to_string(),
            pr,
            requested: target.map(str::to_string),
            target: r.target,
            sanitized_target: r.sanitized,
            namespace: r.namespace,
            method: r.method,
            manifest_path: r.manifest.map(|p| p.display().to_string()),
            resources,
            skipped,
            already_deployed,
            would_deploy,
            known_services: self.known_services(),
        };
        CommandResult::ok(summary, CommandData::Plan(data))
    }

    /// Provision a preview environment: namespace, then workload(s) and service(s).
    /// Each step stops the workflow on failure; nothing is rolled back.
    pub async fn preview(&self, pr: PrNumber, actor: &str, target: Option<&str>) -> CommandResult {
        const CMD: Option<CommandKind> = Some(CommandKind::Preview);
        if let Some(denied) = self.gate(CommandKind::Preview, actor, GatedAction::Preview) {
            return denied;
        }

        let r = self.resolve(pr, target);
        let method = match r.method {
            Some(m) => m,
            None => {
                let err = CommandError::ServiceNotFound { service: r.target.clone() };
                return CommandResult::failure(CMD, &err).with_known_services(self.known_services());
            }
        };

        // Read the manifest before touching the cluster.
        let manifest = match (method, &r.manifest) {
            (DeploymentMethod::Manifest, Some(path)) => match Self::ingest(path) {
                Ok(set) => Some((path.display().to_string(), set)),
                Err(err) => return CommandResult::failure(CMD, &err),
            },
            _ => None,
        };

        let (workload, service_object) = match &manifest {
            Some((_, set)) => (set.primary_workload(), set.primary_service()),
            None => (Some(r.sanitized.clone()), Some(r.sanitized.clone())),
        };
        let spec = PreviewNamespaceSpec::new(pr, &r.target).with_owned(workload, service_object);
        let ns = spec.name.clone();
        info!(namespace = %ns, target = %r.target, method = method.as_str(), actor, pr, "api: preview start");

        if let Err(e) = self.gateway.create_namespace(&spec).await {
            let err = CommandError::NamespaceCreateFailed { namespace: ns.clone(), cause: cause(&e) };
            return CommandResult::failure(CMD, &err);
        }
        let mut completed = vec![format!("Namespace/{}", ns)];

        let (deployed, skipped, awaiting) = match &manifest {
            Some((path, set)) => match self.gateway.apply_manifest(&ns, set).await {
                Ok(applied) => {
                    let awaiting: Vec<String> = set.workloads.iter().filter_map(|d| d.metadata.name.clone()).collect();
                    (applied, set.skipped.clone(), awaiting)
                }
                Err(e) => {
                    let err = CommandError::ManifestApplyFailed { path: path.clone(), namespace: ns.clone(), cause: cause(&e) };
                    return CommandResult::failure(CMD, &err).with_completed(completed);
                }
            },
            None => {
                let w = DefaultWorkload::new(r.sanitized.clone(), self.config.default_image.clone());
                if let Err(e) = self.gateway.deploy_default_workload(&ns, &w).await {
                    let err = CommandError::WorkloadDeployFailed { namespace: ns.clone(), workload: w.name.clone(), cause: cause(&e) };
                    return CommandResult::failure(CMD, &err).with_completed(completed);
                }
                let deployment = ResourceRef::new("Deployment", w.name.clone());
                completed.push(deployment.to_string());

                let svc = ExposeSpec::for_workload(&w);
                if let Err(e) = self.gateway.create_service(&ns, &svc).await {
                    let err = CommandError::ServiceCreateFailed { namespace: ns.clone(), service: svc.name.clone(), cause: cause(&e) };
                    return CommandResult::failure(CMD, &err).with_completed(completed);
                }
                (vec![deployment, ResourceRef::new("Service", svc.name)], Vec::new(), vec![w.name])
            }
        };

        if !awaiting.is_empty() {
            self.readiness.track(
                &ns,
                self.gateway.clone(),
                awaiting.clone(),
                self.config.readiness_timeout,
                self.config.readiness_poll,
            );
        }
        info!(namespace = %ns, resources = deployed.len(), skipped = skipped.len(), "api: preview accepted");

        let data = PreviewData {
            requested_by: actor.to_string(),
            pr,
            target: r.target.clone(),
            sanitized_target: r.sanitized,
            namespace: ns.clone(),
            method,
            manifest_detected: manifest.is_some(),
            manifest_path: manifest.map(|(p, _)| p),
            deployed_resources: deployed,
            skipped_documents: skipped,
            awaiting_ready: awaiting,
            status: "deploying".to_string(),
        };
        CommandResult::ok(format!("Deploying {} into {}", r.target, ns), CommandData::Preview(data))
    }

    /// Delete every preview namespace of `pr`. Stops at the first failed delete;
    /// namespaces already removed stay removed.
    pub async fn cleanup(&self, pr: PrNumber, actor: &str) -> CommandResult {
        const CMD: Option<CommandKind> = Some(CommandKind::Cleanup);
        if let Some(denied) = self.gate(CommandKind::Cleanup, actor, GatedAction::Cleanup) {
            return denied;
        }

        let namespaces = match self.gateway.preview_namespaces_for_pr(pr).await {
            Ok(v) => v,
            Err(e) => return CommandResult::failure(CMD, &CommandError::CleanupFailed { cause: cause(&e) }),
        };

        let mut cleaned = Vec::with_capacity(namespaces.len());
        for ns in &namespaces {
            match self.gateway.delete_namespace(&ns.name).await {
                Ok(existed) => {
                    if self.readiness.cancel(&ns.name) {
                        info!(namespace = %ns.name, "api: cancelled pending readiness wait");
                    }
                    if !existed {
                        info!(namespace = %ns.name, "api: namespace already gone");
                    }
                    cleaned.push(ns.name.clone());
                }
                Err(e) => {
                    let err = CommandError::CleanupFailed { cause: format!("deleting {}: {}", ns.name, cause(&e)) };
                    return CommandResult::failure(CMD, &err).with_completed(cleaned);
                }
            }
        }

        let total_cleaned = cleaned.len();
        let summary = if total_cleaned == 0 {
            format!("Nothing to clean up for PR #{}", pr)
        } else {
            format!("Cleaned up {} preview environment(s) for PR #{}", total_cleaned, pr)
        };
        info!(pr, total_cleaned, "api: cleanup done");
        CommandResult::ok(
            summary,
            CommandData::Cleanup(CleanupData { requested_by: actor.to_string(), pr, cleaned_namespaces: cleaned, total_cleaned }),
        )
    }

    /// Health check: connectivity plus aggregate counts.
    pub async fn test_connection(&self) -> CommandResult {
        let probe = async {
            self.gateway.test_connection().await?;
            self.gateway.cluster_info().await
        };
        match probe.await {
            Ok(info) => CommandResult::ok("Connected to cluster", CommandData::Connection(info)),
            Err(e) => {
                warn!(error = %cause(&e), "api: cluster connection failed");
                CommandResult::failure(None, &CommandError::StatusQueryFailed { cause: cause(&e) })
            }
        }
    }
}
