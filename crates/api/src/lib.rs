//! PR previews API: the orchestrator frontends (CLI, chat webhooks) drive.
//!
//! [`Orchestrator`] turns a command into cluster work through a
//! [`previews_ops::ClusterGateway`] and answers with a typed [`CommandResult`];
//! [`render`] turns that result into Markdown.

#![forbid(unsafe_code)]

pub mod config;
mod orchestrator;
pub mod policy;
pub mod readiness;
pub mod render;
pub mod result;

pub use config::OrchestratorConfig;
pub use orchestrator::Orchestrator;
pub use policy::{AllowList, GatedAction, PermissionPolicy};
pub use readiness::ReadinessTracker;
pub use result::{CommandData, CommandResult};
