//! Whitelist / policy engine (C2).
//!
//! A static rule table keyed by `(first_word, action_subpattern)` with a
//! per-rule allowed risk level and forbidden-flag list. Sits in front of the
//! risk analyzer: a match decides outright, `Unknown` defers to C1.

use crate::safety::risk::Risk;
use serde::{Deserialize, Serialize};

/// Tri-state outcome. `allowed` is a sum type, not an `Option<bool>` field —
/// `Unknown` is a distinct, meaningful third state (fall through to C1), not
/// the absence of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Allowed {
        risk_level: Risk,
        matched_by: String,
    },
    Denied {
        risk_level: Risk,
        reason: String,
        matched_by: String,
    },
    Unknown,
}

impl PolicyDecision {
    pub fn risk_level(&self) -> Option<Risk> {
        match self {
            PolicyDecision::Allowed { risk_level, .. } => Some(*risk_level),
            PolicyDecision::Denied { risk_level, .. } => Some(*risk_level),
            PolicyDecision::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistRule {
    pub first_word: String,
    pub action_subpattern: String,
    pub allowed_risk_level: Risk,
    #[serde(default)]
    pub forbidden_flags: Vec<String>,
    #[serde(default)]
    pub excluded: bool,
}

/// Rule set plus query logic. The default table is a minimal, embedded
/// starting point; an operator can point `whitelist_path` at a TOML file of
/// `WhitelistRule` entries to extend or replace it (Open Question: the
/// loadable-data format — resolved as TOML, matching every other
/// operator-facing config surface in this crate; see DESIGN.md).
pub struct Whitelist {
    rules: Vec<WhitelistRule>,
}

impl Whitelist {
    pub fn new(rules: Vec<WhitelistRule>) -> Self {
        Self { rules }
    }

    pub fn load_from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        #[derive(Deserialize)]
        struct File {
            #[serde(default)]
            rules: Vec<WhitelistRule>,
        }
        let file: File = toml::from_str(&content)?;
        Ok(Self::new(file.rules))
    }

    pub fn default_rules() -> Self {
        Self::new(vec![
            WhitelistRule {
                first_word: "ls".into(),
                action_subpattern: "*".into(),
                allowed_risk_level: Risk::Safe,
                forbidden_flags: vec![],
                excluded: false,
            },
            WhitelistRule {
                first_word: "git".into(),
                action_subpattern: "status|diff|log|branch".into(),
                allowed_risk_level: Risk::Safe,
                forbidden_flags: vec![],
                excluded: false,
            },
            WhitelistRule {
                first_word: "git".into(),
                action_subpattern: "push".into(),
                allowed_risk_level: Risk::High,
                forbidden_flags: vec!["--force".into(), "-f".into()],
                excluded: false,
            },
            WhitelistRule {
                first_word: "docker".into(),
                action_subpattern: "ps|images|logs".into(),
                allowed_risk_level: Risk::Safe,
                forbidden_flags: vec![],
                excluded: false,
            },
            WhitelistRule {
                first_word: "rm".into(),
                action_subpattern: "*".into(),
                allowed_risk_level: Risk::High,
                forbidden_flags: vec!["--no-preserve-root".into()],
                excluded: true,
            },
        ])
    }

    fn matches_subpattern(subpattern: &str, action: &str) -> bool {
        if subpattern == "*" {
            return true;
        }
        subpattern.split('|').any(|alt| action.contains(alt))
    }

    /// Look up a full shell command. `first_word` and `rest` are derived by
    /// the caller's tokenizer (kept identical to the risk analyzer's).
    pub fn query(&self, command: &str) -> PolicyDecision {
        let trimmed = command.trim();
        let mut tokens = trimmed.split_whitespace();
        let Some(first) = tokens.next() else {
            return PolicyDecision::Unknown;
        };
        let rest: Vec<&str> = tokens.collect();
        let action = rest.join(" ");

        for rule in &self.rules {
            if rule.first_word != first {
                continue;
            }
            if !Self::matches_subpattern(&rule.action_subpattern, &action) {
                continue;
            }
            let has_forbidden = rule
                .forbidden_flags
                .iter()
                .any(|f| rest.iter().any(|t| t == f));
            if rule.excluded || has_forbidden {
                return PolicyDecision::Denied {
                    risk_level: Risk::High,
                    reason: "blacklisted".to_string(),
                    matched_by: format!("{} {}", rule.first_word, rule.action_subpattern),
                };
            }
            return PolicyDecision::Allowed {
                risk_level: rule.allowed_risk_level,
                matched_by: format!("{} {}", rule.first_word, rule.action_subpattern),
            };
        }
        PolicyDecision::Unknown
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::default_rules()
    }
}
