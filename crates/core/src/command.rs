//! Slash-command grammar: raw comment text to [`Intent`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{CommandError, PrNumber};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Help,
    Status,
    Plan,
    Preview,
    Cleanup,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] =
        [CommandKind::Help, CommandKind::Status, CommandKind::Plan, CommandKind::Preview, CommandKind::Cleanup];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Help => "help",
            CommandKind::Status => "status",
            CommandKind::Plan => "plan",
            CommandKind::Preview => "preview",
            CommandKind::Cleanup => "cleanup",
        }
    }

    /// Whether the command may carry a target token.
    pub fn takes_target(self) -> bool {
        matches!(self, CommandKind::Plan | CommandKind::Preview)
    }

    /// Whether the command mutates the cluster and is gated by permission.
    pub fn is_gated(self) -> bool {
        matches!(self, CommandKind::Preview | CommandKind::Cleanup)
    }
}

/// A parsed command. `target == None` means "default/all".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Intent {
    pub kind: CommandKind,
    pub target: Option<String>,
    pub actor: String,
    pub pr: PrNumber,
}

static PATTERNS: Lazy<Vec<(CommandKind, Regex)>> = Lazy::new(|| {
    CommandKind::ALL
        .iter()
        .filter_map(|kind| {
            let src = if kind.takes_target() {
                format!(r"^/{}(?:\s+([A-Za-z0-9/-]+))?\s*$", kind.as_str())
            } else {
                format!(r"^/{}\s*$", kind.as_str())
            };
            Regex::new(&src).ok().map(|re| (*kind, re))
        })
        .collect()
});

/// Parse trimmed comment text into an intent. Anything that does not match one of the
/// five anchored patterns is `UnknownCommand` carrying the raw text.
pub fn parse(text: &str, actor: &str, pr: PrNumber) -> Result<Intent, CommandError> {
    let line = text.trim();
    for (kind, re) in PATTERNS.iter() {
        if let Some(caps) = re.captures(line) {
            let target = caps.get(1).map(|m| m.as_str().to_string());
            return Ok(Intent { kind: *kind, target, actor: actor.to_string(), pr });
        }
    }
    Err(CommandError::UnknownCommand { text: text.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(text: &str) -> Option<CommandKind> {
        parse(text, "octo", 1).ok().map(|i| i.kind)
    }

    #[test]
    fn recognizes_the_five_commands() {
        assert_eq!(kind_of("/help"), Some(CommandKind::Help));
        assert_eq!(kind_of("  /status  "), Some(CommandKind::Status));
        assert_eq!(kind_of("/plan"), Some(CommandKind::Plan));
        assert_eq!(kind_of("/preview\n"), Some(CommandKind::Preview));
        assert_eq!(kind_of("/cleanup"), Some(CommandKind::Cleanup));
    }

    #[test]
    fn target_is_kept_exactly_as_typed() {
        let i = parse("/preview ai/Open-WebUI", "octo", 7).unwrap();
        assert_eq!(i.target.as_deref(), Some("ai/Open-WebUI"));
        assert_eq!(i.actor, "octo");
        assert_eq!(i.pr, 7);

        let i = parse("/plan \t MyApp  ", "octo", 7).unwrap();
        assert_eq!(i.kind, CommandKind::Plan);
        assert_eq!(i.target.as_deref(), Some("MyApp"));

        let i = parse("/preview", "octo", 7).unwrap();
        assert_eq!(i.target, None);
    }

    #[test]
    fn rejects_everything_else() {
        for text in [
            "",
            "help",
            "/Help",
            "/helpme",
            "/status now",
            "/cleanup all",
            "/help me",
            "/preview a b",
            "/preview my_app",
            "/preview my.app",
            "/previewfoo",
            "please /preview",
            "/plan ../etc",
            "/deploy web",
        ] {
            match parse(text, "octo", 1) {
                Err(CommandError::UnknownCommand { text: raw }) => assert_eq!(raw, text),
                other => panic!("{:?} parsed as {:?}", text, other),
            }
        }
    }

    #[test]
    fn at_most_one_pattern_matches_any_input() {
        let inputs = [
            "/help", "/status", "/plan", "/plan x", "/preview", "/preview a/b-c", "/cleanup", "/previews", "/plans x",
        ];
        for text in inputs {
            let hits = PATTERNS.iter().filter(|(_, re)| re.is_match(text)).count();
            assert!(hits <= 1, "{} matched {} patterns", text, hits);
        }
        assert_eq!(PATTERNS.len(), 5);
    }
}
