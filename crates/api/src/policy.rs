//! Who may run the cluster-mutating commands.

use std::collections::BTreeSet;

use previews_core::CommandKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GatedAction {
    Preview,
    Cleanup,
}

impl GatedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            GatedAction::Preview => "preview",
            GatedAction::Cleanup => "cleanup",
        }
    }

    /// The gate protecting a command, if it has one.
    pub fn for_command(kind: CommandKind) -> Option<Self> {
        match kind {
            CommandKind::Preview => Some(GatedAction::Preview),
            CommandKind::Cleanup => Some(GatedAction::Cleanup),
            _ => None,
        }
    }
}

pub trait PermissionPolicy: Send + Sync {
    fn is_permitted(&self, actor: &str, action: GatedAction) -> bool;
}

/// Static allow-list granting every gated action to its members.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    actors: BTreeSet<String>,
}

impl AllowList {
    pub fn new<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { actors: actors.into_iter().map(Into::into).collect() }
    }

    pub fn contains(&self, actor: &str) -> bool {
        self.actors.contains(actor)
    }
}

impl PermissionPolicy for AllowList {
    fn is_permitted(&self, actor: &str, _action: GatedAction) -> bool {
        self.contains(actor)
    }
}
