//! Markdown presentation of [`CommandResult`]s. Pure: reads only the structured data.

use std::fmt::Write as _;

use previews_apply::{catalog::MANIFEST_DIRS, KnownService, SkippedDocument};
use previews_core::{CommandKind, ErrorCode, Observed, ReadinessState};

use crate::result::{
    CleanupData, CommandData, CommandResult, FailureData, HelpData, PlanData, PreviewData, PreviewStatus, StatusReport,
};

/// Fill `content` with the Markdown rendering of the result.
pub fn attach_markdown(mut result: CommandResult) -> CommandResult {
    result.content = render(&result);
    result
}

pub fn render(result: &CommandResult) -> String {
    match &result.data {
        CommandData::Help(d) => help(d),
        CommandData::Status(d) => status(d),
        CommandData::Plan(d) => plan(d),
        CommandData::Preview(d) => preview(d),
        CommandData::Cleanup(d) => cleanup(d),
        CommandData::Connection(info) => format!(
            "## Cluster connection OK\n\n- **Nodes:** {}\n- **Namespaces:** {}\n- **Preview namespaces:** {}\n",
            info.nodes, info.namespaces, info.preview_namespaces
        ),
        CommandData::Failed(f) => failure(f),
    }
}

fn usage(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Help => "`/help` - show this message",
        CommandKind::Status => "`/status` - show preview environments of this PR",
        CommandKind::Plan => "`/plan [service]` - show what would be deployed",
        CommandKind::Preview => "`/preview [service]` - deploy a preview environment",
        CommandKind::Cleanup => "`/cleanup` - delete every preview environment of this PR",
    }
}

fn service_list(out: &mut String, services: &[KnownService]) {
    if services.is_empty() {
        out.push_str("_No service manifests found._\n");
        return;
    }
    for s in services {
        let _ = writeln!(out, "- `{}` ({}/)", s.name, s.directory);
    }
}

fn skipped_list(out: &mut String, skipped: &[SkippedDocument]) {
    if skipped.is_empty() {
        return;
    }
    out.push_str("\n### Skipped documents\n");
    for s in skipped {
        let kind = s.kind.as_deref().unwrap_or("?");
        let name = s.name.as_deref().unwrap_or("-");
        let _ = writeln!(out, "- #{} {}/{}: {:?}", s.index, kind, name, s.reason);
    }
}

fn help(d: &HelpData) -> String {
    let mut out = String::from("## Available commands\n\n**Read-only (everyone):**\n");
    for k in d.available_commands.iter().filter(|k| !k.is_gated()) {
        let _ = writeln!(out, "- {}", usage(*k));
    }
    out.push_str("\n**Deployment (allow-listed actors):**\n");
    for k in d.available_commands.iter().filter(|k| k.is_gated()) {
        let _ = writeln!(out, "- {}", usage(*k));
    }
    let _ = writeln!(out, "\n**Services:**\n- `{}` (default)", d.default_target);
    for s in &d.known_services {
        let _ = writeln!(out, "- `{}` ({}/)", s.name, s.directory);
    }
    let p = &d.user_permissions;
    let _ = write!(
        out,
        "\n_@{}: read {}, deploy {}, cleanup {}_\n",
        d.requested_by,
        yes_no(p.can_read),
        yes_no(p.can_deploy),
        yes_no(p.can_cleanup)
    );
    out
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn readiness_text(r: &ReadinessState) -> String {
    match r {
        ReadinessState::Pending => "waiting".to_string(),
        ReadinessState::Ready => "ready".to_string(),
        ReadinessState::TimedOut => "timed out".to_string(),
        ReadinessState::Failed { message } => format!("failed ({})", message),
        ReadinessState::Cancelled => "cancelled".to_string(),
    }
}

fn status_entry(out: &mut String, p: &PreviewStatus) {
    let ns = &p.namespace;
    let _ = writeln!(out, "#### {}\n- **Namespace:** `{}`", ns.target, ns.name);
    if let Some(c) = &ns.created_at {
        let _ = writeln!(out, "- **Created:** {}", c);
    }
    match &p.workload {
        Observed::Found(w) => {
            let _ = writeln!(out, "- **Workload:** {}/{} replicas ready, {} pod(s)", w.ready_replicas, w.replicas, w.pods.len());
            for pod in &w.pods {
                let phase = pod.phase.as_deref().unwrap_or("Unknown");
                let _ = writeln!(out, "  - `{}` {}{}", pod.name, phase, if pod.ready { " (ready)" } else { "" });
            }
        }
        Observed::Absent => out.push_str("- **Workload:** none\n"),
        Observed::Error { message } => {
            let _ = writeln!(out, "- **Workload:** unavailable ({})", message);
        }
    }
    match &p.service {
        Observed::Found(s) => {
            let ports: Vec<String> = s.ports.iter().map(|p| p.port.to_string()).collect();
            let _ = writeln!(
                out,
                "- **Service:** `{}` {} ports {}",
                s.name,
                s.cluster_ip.as_deref().unwrap_or("-"),
                ports.join(",")
            );
        }
        Observed::Absent => out.push_str("- **Service:** none\n"),
        Observed::Error { message } => {
            let _ = writeln!(out, "- **Service:** unavailable ({})", message);
        }
    }
    if let Some(r) = &p.readiness {
        let _ = writeln!(out, "- **Readiness:** {}", readiness_text(r));
    }
    out.push('\n');
}

fn status(d: &StatusReport) -> String {
    let mut out = format!("## Preview environment status\n\n**PR:** #{}\n\n", d.pr);
    if d.previews.is_empty() {
        out.push_str("No preview environments are active for this PR.\n\nRun `/preview` or `/preview <service>` to create one.\n");
        return out;
    }
    let _ = writeln!(out, "### Active environments ({})\n", d.total);
    for p in &d.previews {
        status_entry(&mut out, p);
    }
    out
}

fn plan(d: &PlanData) -> String {
    let mut out = format!("## Deployment plan\n\n**Requested by:** @{}\n**PR:** #{}\n**Service:** {}\n", d.requested_by, d.pr, d.target);
    let _ = writeln!(out, "**Namespace:** `{}`", d.namespace);
    match d.method {
        Some(m) => {
            let _ = writeln!(out, "**Method:** {}", m.as_str());
        }
        None => {
            out.push_str("\nNo manifest backs this service, so `/preview` would fail.\n\n**Known services:**\n");
            service_list(&mut out, &d.known_services);
            return out;
        }
    }
    if let Some(p) = &d.manifest_path {
        let _ = writeln!(out, "**Manifest:** `{}`", p);
    }
    out.push_str("\n### Resources\n");
    for r in &d.resources {
        let _ = writeln!(out, "- {}", r);
    }
    skipped_list(&mut out, &d.skipped);
    if d.already_deployed {
        out.push_str("\nA preview for this service already exists. Run `/cleanup` first to redeploy.\n");
    }
    out
}

fn preview(d: &PreviewData) -> String {
    let mut out = format!(
        "## Preview deployment started\n\n**Triggered by:** @{}\n**Service:** {}\n**Method:** {}\n**PR:** #{}\n**Namespace:** `{}`\n",
        d.requested_by,
        d.target,
        d.method.as_str(),
        d.pr,
        d.namespace
    );
    if let Some(p) = &d.manifest_path {
        let _ = writeln!(out, "**Manifest:** `{}`", p);
    }
    out.push_str("\n### Resources created\n");
    for r in &d.deployed_resources {
        let _ = writeln!(out, "- {}", r);
    }
    skipped_list(&mut out, &d.skipped_documents);
    out.push_str("\n_Use `/status` to follow the rollout._\n");
    out
}

fn cleanup(d: &CleanupData) -> String {
    if d.cleaned_namespaces.is_empty() {
        return format!("## Nothing to clean up\n\nNo preview environments were found for PR #{}.\n", d.pr);
    }
    let mut out = format!("## Cleanup completed\n\nDeleted {} namespace(s) for PR #{}:\n", d.total_cleaned, d.pr);
    for ns in &d.cleaned_namespaces {
        let _ = writeln!(out, "- `{}`", ns);
    }
    out
}

fn remediation(out: &mut String, f: &FailureData) {
    match f.code {
        ErrorCode::UnknownCommand => out.push_str("Run `/help` to see the available commands.\n"),
        ErrorCode::PermissionDenied => out.push_str(
            "Read-only commands (`/help`, `/status`, `/plan`) are open to everyone. Ask a maintainer for deployment access.\n",
        ),
        ErrorCode::NamespaceCreateFailed => {
            out.push_str("The preview may already exist. Check `/status`, or run `/cleanup` and then `/preview` again.\n")
        }
        ErrorCode::WorkloadDeployFailed | ErrorCode::ServiceCreateFailed | ErrorCode::ManifestApplyFailed => {
            if let Some(ns) = &f.namespace {
                let _ = writeln!(out, "Namespace `{}` was left partially populated. Run `/cleanup` before retrying.", ns);
            }
        }
        ErrorCode::ManifestParseFailed => out.push_str("Make sure the manifest file is readable and within the size limit.\n"),
        ErrorCode::ServiceNotFound => {
            out.push_str("**Available services:**\n");
            service_list(out, &f.known_services);
            let dirs: Vec<String> = MANIFEST_DIRS.iter().map(|d| format!("`{}/`", d)).collect();
            let _ = writeln!(out, "\nAdd `<service>.yaml` to one of {} to make a service deployable.", dirs.join(", "));
        }
        ErrorCode::CleanupFailed => {
            out.push_str("Namespaces already deleted stay deleted. Run `/cleanup` again to retry the rest.\n")
        }
        ErrorCode::StatusQueryFailed => out.push_str("Check cluster connectivity and permissions, then retry.\n"),
    }
}

fn failure(f: &FailureData) -> String {
    let title = match f.command {
        Some(k) => format!("`/{}` failed", k.as_str()),
        None => "Command not recognized".to_string(),
    };
    let mut out = format!("## {}\n\n**Error:** {} ({})\n", title, f.message, f.code.as_str());
    if !f.completed.is_empty() {
        out.push_str("\n**Completed before the failure:**\n");
        for c in &f.completed {
            let _ = writeln!(out, "- {}", c);
        }
    }
    out.push('\n');
    remediation(&mut out, f);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use previews_core::{ClusterInfo, CommandError};

    #[test]
    fn unknown_command_points_at_help() {
        let r = attach_markdown(CommandResult::failure(None, &CommandError::UnknownCommand { text: "/deploy".into() }));
        assert!(r.content.contains("Command not recognized"));
        assert!(r.content.contains("/help"));
    }

    #[test]
    fn service_not_found_lists_known_services() {
        let err = CommandError::ServiceNotFound { service: "ghost".into() };
        let r = CommandResult::failure(Some(CommandKind::Preview), &err)
            .with_known_services(vec![KnownService { name: "myapp".into(), directory: "k8s".into() }]);
        let md = render(&r);
        assert!(md.contains("`myapp` (k8s/)"));
        assert!(md.contains("`deploy/`"));
    }

    #[test]
    fn connection_lists_counts() {
        let r = CommandResult::ok("ok", CommandData::Connection(ClusterInfo { nodes: 2, namespaces: 7, preview_namespaces: 1 }));
        assert!(render(&r).contains("**Preview namespaces:** 1"));
    }
}
