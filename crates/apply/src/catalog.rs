//! Manifest directory conventions: which file backs a service, and which services
//! a repository checkout offers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Directories searched, in precedence order.
pub const MANIFEST_DIRS: [&str; 4] = ["k8s", "kubernetes", "manifests", "deploy"];

/// File name suffixes tried for a service, in precedence order.
const SUFFIXES: [&str; 3] = [".yaml", ".yml", "-deployment.yaml"];

/// Stems too generic to name a service. Inside a service directory
/// (`k8s/web/deployment.yaml`) the directory names the service.
const GENERIC_STEMS: [&str; 3] = ["deployment", "service", "app"];

const YAML_EXTS: [&str; 2] = ["yaml", "yml"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct KnownService {
    pub name: String,
    /// Convention directory the manifest was found in (`k8s`, `deploy`, ...).
    pub directory: String,
}

#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    root: PathBuf,
}

impl ManifestCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every path that could back `service`, in lookup order: flat files in each
    /// convention directory first, then a service directory holding a generic file.
    /// Targets with empty segments (leading `/`, `a//b`) have no candidates.
    pub fn candidates(&self, service: &str) -> Vec<PathBuf> {
        let segments: Vec<&str> = service.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Vec::new();
        }
        let (file, parents) = match segments.split_last() {
            Some(v) => v,
            None => return Vec::new(),
        };
        let bases: Vec<PathBuf> = MANIFEST_DIRS
            .iter()
            .map(|dir| {
                let mut base = self.root.join(dir);
                for p in parents {
                    base.push(p);
                }
                base
            })
            .collect();
        let mut out = Vec::with_capacity(bases.len() * (SUFFIXES.len() + GENERIC_STEMS.len() * YAML_EXTS.len()));
        for base in &bases {
            for suffix in SUFFIXES {
                out.push(base.join(format!("{}{}", file, suffix)));
            }
        }
        for base in &bases {
            let service_dir = base.join(file);
            for stem in GENERIC_STEMS {
                for ext in YAML_EXTS {
                    out.push(service_dir.join(format!("{}.{}", stem, ext)));
                }
            }
        }
        out
    }

    /// First existing manifest for `service`.
    pub fn resolve(&self, service: &str) -> Option<PathBuf> {
        self.candidates(service).into_iter().find(|p| p.is_file())
    }

    /// Services offered by the checkout. Looks at yaml files in each convention
    /// directory and one level of subdirectories below it, and lists only names
    /// that [`resolve`](Self::resolve) accepts.
    pub fn scan(&self) -> Vec<KnownService> {
        let mut out = Vec::new();
        for dir in MANIFEST_DIRS {
            let full = self.root.join(dir);
            for path in yaml_entries(&full) {
                if let Some(name) = service_name(None, &path) {
                    out.push(KnownService { name, directory: dir.to_string() });
                }
            }
            for sub in subdirs(&full) {
                let Some(group) = sub.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                    continue;
                };
                for path in yaml_entries(&sub) {
                    if let Some(name) = service_name(Some(&group), &path) {
                        out.push(KnownService { name, directory: dir.to_string() });
                    }
                }
            }
        }
        out.retain(|k| {
            let ok = self.resolve(&k.name).is_some();
            if !ok {
                debug!(service = %k.name, dir = %k.directory, "manifest name does not resolve; not listed");
            }
            ok
        });
        out.sort();
        out.dedup();
        out
    }
}

fn read_dir_paths(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "manifest dir not readable");
            Vec::new()
        }
    }
}

fn yaml_entries(dir: &Path) -> Vec<PathBuf> {
    read_dir_paths(dir)
        .into_iter()
        .filter(|p| p.is_file())
        .filter(|p| p.extension().and_then(|e| e.to_str()).map_or(false, |e| YAML_EXTS.contains(&e)))
        .collect()
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    read_dir_paths(dir).into_iter().filter(|p| p.is_dir()).collect()
}

/// Service name for a manifest file. `group` is the subdirectory below the
/// convention directory, if any. A generic stem directly in a convention directory
/// names nothing.
fn service_name(group: Option<&str>, path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if GENERIC_STEMS.contains(&stem) {
        return group.map(str::to_string);
    }
    let name = stem.strip_suffix("-deployment").filter(|s| !s.is_empty()).unwrap_or(stem);
    Some(match group {
        Some(g) => format!("{}/{}", g, name),
        None => name.to_string(),
    })
}
