//! Deterministic naming and the label/annotation contract that marks a namespace
//! as a preview environment.

use std::collections::BTreeMap;

use crate::PrNumber;

pub const LABEL_PREVIEW: &str = "preview";
pub const LABEL_PR_NUMBER: &str = "pr-number";
pub const LABEL_SERVICE: &str = "service";
pub const LABEL_CREATED_BY: &str = "created-by";
pub const LABEL_ENVIRONMENT: &str = "environment";
pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const LABEL_APP: &str = "app";

pub const CREATOR: &str = "pr-previews";
/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "pr-previews";

pub const ANNO_CREATED_AT: &str = "pr-previews.io/created-at";
pub const ANNO_PR_NUMBER: &str = "pr-previews.io/pr-number";
pub const ANNO_SERVICE: &str = "pr-previews.io/service";
pub const ANNO_WORKLOAD: &str = "pr-previews.io/workload";
pub const ANNO_SERVICE_OBJECT: &str = "pr-previews.io/service-object";

const MAX_SERVICE_LEN: usize = 40;
const MAX_NAMESPACE_LEN: usize = 63;

/// Turn a user-typed target into a DNS-1123 label fragment.
pub fn sanitize_service(target: &str) -> String {
    let mut out = String::with_capacity(target.len());
    for ch in target.chars() {
        let c = ch.to_ascii_lowercase();
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    out.truncate(MAX_SERVICE_LEN);
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "svc".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `preview-pr-<pr>-`, shared by every namespace of one PR.
pub fn namespace_prefix(pr: PrNumber) -> String {
    format!("preview-pr-{}-", pr)
}

/// `preview-pr-<pr>-<sanitized>` capped at the namespace name limit.
pub fn namespace_name(pr: PrNumber, sanitized: &str) -> String {
    let mut name = format!("{}{}", namespace_prefix(pr), sanitized);
    name.truncate(MAX_NAMESPACE_LEN);
    name.trim_end_matches('-').to_string()
}

/// Selector matching every preview namespace.
pub fn preview_selector() -> String {
    format!("{}=true", LABEL_PREVIEW)
}

/// Selector matching the preview namespaces of one PR.
pub fn pr_selector(pr: PrNumber) -> String {
    format!("{}=true,{}={}", LABEL_PREVIEW, LABEL_PR_NUMBER, pr)
}

/// Everything needed to create one preview namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewNamespaceSpec {
    pub name: String,
    pub pr: PrNumber,
    pub target: String,
    pub service: String,
    pub workload: Option<String>,
    pub service_object: Option<String>,
}

impl PreviewNamespaceSpec {
    pub fn new(pr: PrNumber, target: &str) -> Self {
        let service = sanitize_service(target);
        Self {
            name: namespace_name(pr, &service),
            pr,
            target: target.to_string(),
            service,
            workload: None,
            service_object: None,
        }
    }

    pub fn with_owned(mut self, workload: Option<String>, service_object: Option<String>) -> Self {
        self.workload = workload;
        self.service_object = service_object;
        self
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert(LABEL_PREVIEW.to_string(), "true".to_string());
        m.insert(LABEL_PR_NUMBER.to_string(), self.pr.to_string());
        m.insert(LABEL_SERVICE.to_string(), self.service.clone());
        m.insert(LABEL_CREATED_BY.to_string(), CREATOR.to_string());
        m.insert(LABEL_ENVIRONMENT.to_string(), "preview".to_string());
        m
    }

    /// Annotations stamped at creation time; `created_at` is RFC 3339.
    pub fn annotations(&self, created_at: &str) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert(ANNO_CREATED_AT.to_string(), created_at.to_string());
        m.insert(ANNO_PR_NUMBER.to_string(), self.pr.to_string());
        m.insert(ANNO_SERVICE.to_string(), self.target.clone());
        if let Some(w) = &self.workload {
            m.insert(ANNO_WORKLOAD.to_string(), w.clone());
        }
        if let Some(s) = &self.service_object {
            m.insert(ANNO_SERVICE_OBJECT.to_string(), s.clone());
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_replaces_slashes() {
        assert_eq!(sanitize_service("ai/open-webui"), "ai-open-webui");
        assert_eq!(sanitize_service("MyApp"), "myapp");
        assert_eq!(sanitize_service("a//b--c/"), "a-b-c");
        assert_eq!(sanitize_service("/"), "svc");
    }

    #[test]
    fn sanitize_caps_length_without_trailing_dash() {
        let long = format!("{}-tail", "x".repeat(39));
        let s = sanitize_service(&long);
        assert!(s.len() <= 40);
        assert!(!s.ends_with('-'));
    }

    #[test]
    fn namespace_name_is_deterministic_and_bounded() {
        assert_eq!(namespace_name(42, "web"), "preview-pr-42-web");
        let n = namespace_name(u64::MAX, &"y".repeat(40));
        assert!(n.len() <= 63);
        assert_eq!(n, namespace_name(u64::MAX, &"y".repeat(40)));
    }

    #[test]
    fn spec_labels_carry_ownership_contract() {
        let spec = PreviewNamespaceSpec::new(12, "ai/open-webui");
        assert_eq!(spec.name, "preview-pr-12-ai-open-webui");
        let labels = spec.labels();
        assert_eq!(labels.get("preview").map(String::as_str), Some("true"));
        assert_eq!(labels.get("pr-number").map(String::as_str), Some("12"));
        assert_eq!(labels.get("service").map(String::as_str), Some("ai-open-webui"));
        assert_eq!(labels.get("created-by").map(String::as_str), Some("pr-previews"));
        let annos = spec.annotations("2024-01-01T00:00:00Z");
        assert_eq!(annos.get(ANNO_SERVICE).map(String::as_str), Some("ai/open-webui"));
        assert!(!annos.contains_key(ANNO_WORKLOAD));
    }

    #[test]
    fn selectors_match_label_contract() {
        assert_eq!(preview_selector(), "preview=true");
        assert_eq!(pr_selector(9), "preview=true,pr-number=9");
    }
}
