//! Orchestrator configuration, passed in at construction.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TARGET: &str = "nginx";
pub const DEFAULT_IMAGE: &str = "nginx:alpine";
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_READY_POLL_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Checkout whose convention directories hold service manifests.
    pub repo_root: PathBuf,
    /// Target used when `/preview` or `/plan` names none.
    pub default_target: String,
    pub default_image: String,
    pub readiness_timeout: Duration,
    pub readiness_poll: Duration,
    /// Actors allowed to run gated commands.
    pub deployers: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            default_target: DEFAULT_TARGET.to_string(),
            default_image: DEFAULT_IMAGE.to_string(),
            readiness_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            readiness_poll: Duration::from_secs(DEFAULT_READY_POLL_SECS),
            deployers: Vec::new(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok()).filter(|s| *s > 0).unwrap_or(default);
    Duration::from_secs(secs)
}

/// Split a comma separated allow-list, dropping blanks.
pub fn parse_deployers(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

impl OrchestratorConfig {
    /// Defaults overridden by `PREVIEWS_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            repo_root: env_string("PREVIEWS_REPO_ROOT").map(PathBuf::from).unwrap_or(d.repo_root),
            default_target: env_string("PREVIEWS_DEFAULT_SERVICE").unwrap_or(d.default_target),
            default_image: env_string("PREVIEWS_DEFAULT_IMAGE").unwrap_or(d.default_image),
            readiness_timeout: env_secs("PREVIEWS_READY_TIMEOUT_SECS", DEFAULT_READY_TIMEOUT_SECS),
            readiness_poll: env_secs("PREVIEWS_READY_POLL_SECS", DEFAULT_READY_POLL_SECS),
            deployers: env_string("PREVIEWS_DEPLOYERS").map(|s| parse_deployers(&s)).unwrap_or(d.deployers),
        }
    }
}
