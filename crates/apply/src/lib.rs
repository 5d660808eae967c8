//! PR previews manifest ingestion: multi-document YAML to a kind-partitioned set of
//! typed resources. Ingestion is best-effort; a bad document is recorded and skipped.

#![forbid(unsafe_code)]

use std::path::Path;

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Service},
};
use metrics::counter;
use previews_core::ResourceRef;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{debug, warn};

pub mod catalog;

pub use catalog::{KnownService, ManifestCatalog};

fn max_manifest_bytes() -> usize {
    std::env::var("PREVIEWS_MAX_MANIFEST_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

/// Whole-file failures. Per-document problems never surface here.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is too large ({size} bytes, limit {max})")]
    TooLarge { path: String, size: usize, max: usize },
}

/// One decoded document, closed over the supported kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestDocument {
    Workload(Box<Deployment>),
    Service(Box<Service>),
    ConfigObject(Box<ConfigMap>),
    Unsupported { kind: String, name: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    InvalidYaml { message: String },
    MissingKind,
    Unsupported,
    Malformed { message: String },
}

/// A document that did not make it into the set, kept so callers can report it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedDocument {
    /// Zero-based position among the non-empty documents of the file.
    pub index: usize,
    pub kind: Option<String>,
    pub name: Option<String>,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedManifestSet {
    pub workloads: Vec<Deployment>,
    pub services: Vec<Service>,
    pub config_objects: Vec<ConfigMap>,
    pub skipped: Vec<SkippedDocument>,
}

impl ParsedManifestSet {
    /// Number of decoded resources (skipped documents excluded).
    pub fn len(&self) -> usize {
        self.workloads.len() + self.services.len() + self.config_objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Kind/name` of every decoded resource in apply order: workloads, services, config objects.
    pub fn resources(&self) -> Vec<ResourceRef> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.workloads.iter().map(|d| ResourceRef::new("Deployment", d.metadata.name.clone().unwrap_or_default())));
        out.extend(self.services.iter().map(|s| ResourceRef::new("Service", s.metadata.name.clone().unwrap_or_default())));
        out.extend(
            self.config_objects.iter().map(|c| ResourceRef::new("ConfigMap", c.metadata.name.clone().unwrap_or_default())),
        );
        out
    }

    pub fn primary_workload(&self) -> Option<String> {
        self.workloads.iter().find_map(|d| d.metadata.name.clone())
    }

    pub fn primary_service(&self) -> Option<String> {
        self.services.iter().find_map(|s| s.metadata.name.clone())
    }

    fn push(&mut self, index: usize, doc: ManifestDocument) {
        match doc {
            ManifestDocument::Workload(d) => self.workloads.push(*d),
            ManifestDocument::Service(s) => self.services.push(*s),
            ManifestDocument::ConfigObject(c) => self.config_objects.push(*c),
            ManifestDocument::Unsupported { kind, name } => {
                debug!(index, kind = %kind, "skipping unsupported resource kind");
                self.skip(SkippedDocument { index, kind: Some(kind), name, reason: SkipReason::Unsupported });
            }
        }
    }

    fn skip(&mut self, doc: SkippedDocument) {
        counter!("previews_manifest_documents_skipped", 1u64);
        self.skipped.push(doc);
    }
}

fn is_delimiter(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ")
}

/// Split on `---` delimiter lines; documents are trimmed and empty ones dropped.
pub fn split_documents(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut cur = String::new();
    for line in content.lines() {
        if is_delimiter(line) {
            docs.push(std::mem::take(&mut cur));
            continue;
        }
        cur.push_str(line);
        cur.push('\n');
    }
    docs.push(cur);
    docs.into_iter().map(|d| d.trim().to_string()).filter(|d| !d.is_empty()).collect()
}

fn meta_name(json: &Json) -> Option<String> {
    json.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Decode one document: generic read of `kind`, then typed decoding for the kinds we handle.
pub fn decode_document(doc: &str) -> Result<ManifestDocument, (Option<String>, Option<String>, SkipReason)> {
    let val: serde_yaml::Value =
        serde_yaml::from_str(doc).map_err(|e| (None, None, SkipReason::InvalidYaml { message: e.to_string() }))?;
    let json = serde_json::to_value(val).map_err(|e| (None, None, SkipReason::InvalidYaml { message: e.to_string() }))?;
    let name = meta_name(&json);
    let kind = match json.get("kind").and_then(|v| v.as_str()) {
        Some(k) => k.to_string(),
        None => return Err((None, name, SkipReason::MissingKind)),
    };
    let decoded = match kind.as_str() {
        "Deployment" => serde_json::from_value(json).map(|d| ManifestDocument::Workload(Box::new(d))),
        "Service" => serde_json::from_value(json).map(|s| ManifestDocument::Service(Box::new(s))),
        "ConfigMap" => serde_json::from_value(json).map(|c| ManifestDocument::ConfigObject(Box::new(c))),
        _ => return Ok(ManifestDocument::Unsupported { kind: kind.clone(), name }),
    };
    decoded.map_err(|e| (Some(kind), name, SkipReason::Malformed { message: e.to_string() }))
}

/// Ingest manifest text. Never fails; problems end up in `skipped`.
pub fn parse_str(content: &str) -> ParsedManifestSet {
    let mut set = ParsedManifestSet::default();
    for (index, doc) in split_documents(content).iter().enumerate() {
        match decode_document(doc) {
            Ok(d) => set.push(index, d),
            Err((kind, name, reason)) => {
                warn!(index, kind = ?kind, name = ?name, reason = ?reason, "skipping manifest document");
                set.skip(SkippedDocument { index, kind, name, reason });
            }
        }
    }
    set
}

/// Ingest a manifest file. Only an unreadable or oversized file is an error.
pub fn parse_file(path: &Path) -> Result<ParsedManifestSet, ManifestError> {
    let content = std::fs::read_to_string(path)
        .map_err(|source| ManifestError::Read { path: path.display().to_string(), source })?;
    let max = max_manifest_bytes();
    if content.len() > max {
        return Err(ManifestError::TooLarge { path: path.display().to_string(), size: content.len(), max });
    }
    let set = parse_str(&content);
    debug!(path = %path.display(), resources = set.len(), skipped = set.skipped.len(), "manifest ingested");
    Ok(set)
}
