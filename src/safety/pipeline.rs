//! Safety Pipeline (C7): composes the whitelist (C2) and risk analyzer (C1),
//! applies mode-specific risk caps, and decides whether human approval is
//! required before a validated instruction may execute.

use crate::config::SafetyConfig;
use crate::model::Instruction;
use crate::safety::policy::{PolicyDecision, Whitelist};
use crate::safety::risk::{self, Risk};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum SafetyDecision {
    Allow { risk_level: Risk },
    NeedsApproval { risk_level: Risk, reason: String },
    Reject { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Cli,
    Tui,
}

/// Per-turn memoization key for the dry-run-first gate: `(worker, action,
/// args-hash)`. Cleared at the start of every new turn by the engine.
pub type DryRunKey = (String, String, u64);

pub struct SafetyPipeline {
    whitelist: Whitelist,
    config: SafetyConfig,
}

impl SafetyPipeline {
    pub fn new(whitelist: Whitelist, config: SafetyConfig) -> Self {
        Self { whitelist, config }
    }

    fn mode_cap(&self, mode: Mode) -> Risk {
        let raw = match mode {
            Mode::Cli => &self.config.cli_max_risk,
            Mode::Tui => &self.config.tui_max_risk,
        };
        Risk::from_str(raw).unwrap_or(Risk::High)
    }

    /// `Err(reason)` means the command must be rejected outright, with no
    /// risk tier to merge or cap — the disabled-analyzer/no-whitelist-match
    /// case, where there's nothing left to classify it with.
    fn base_risk(&self, instruction: &Instruction, worker_risk_hint: Risk) -> Result<(Risk, String), String> {
        if instruction.worker == "shell" && instruction.action == "execute_command" {
            let command = instruction
                .args
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            if !self.config.risk_analyzer_enabled {
                return match self.whitelist.query(command) {
                    PolicyDecision::Allowed { risk_level, .. } => Ok((risk_level, "whitelist".into())),
                    PolicyDecision::Denied { risk_level, reason, .. } => Ok((risk_level, reason)),
                    PolicyDecision::Unknown => Err(
                        "risk analyzer disabled and command matches no whitelist rule".into(),
                    ),
                };
            }

            match self.whitelist.query(command) {
                PolicyDecision::Allowed { risk_level, matched_by } => {
                    Ok((risk_level, format!("whitelist: {matched_by}")))
                }
                PolicyDecision::Denied { risk_level, reason, .. } => Ok((risk_level, reason)),
                PolicyDecision::Unknown => {
                    let verdict = risk::classify(command);
                    Ok((verdict.risk, format!("risk_analyzer: {}", verdict.reason)))
                }
            }
        } else {
            Ok((worker_risk_hint, "worker risk_hint".to_string()))
        }
    }

    /// Evaluate a validated instruction. `dry_run_observed` is the set of
    /// `(worker, action, args-hash)` keys for which a dry run has already
    /// completed successfully this turn.
    pub fn evaluate(
        &self,
        instruction: &Instruction,
        worker_risk_hint: Risk,
        mode: Mode,
        dry_run_observed: &HashSet<DryRunKey>,
    ) -> SafetyDecision {
        let (base_risk, reason) = match self.base_risk(instruction, worker_risk_hint) {
            Ok(pair) => pair,
            Err(reason) => return SafetyDecision::Reject { reason },
        };
        let risk_level = base_risk.max(instruction.risk_level);

        let cap = self.mode_cap(mode);
        if risk_level > cap {
            return SafetyDecision::Reject {
                reason: format!("{reason} exceeds {mode:?} cap ({})", cap.as_str()),
            };
        }

        if risk_level == Risk::Blocked {
            return SafetyDecision::Reject { reason };
        }

        if risk_level == Risk::High
            && self.config.require_dry_run_for_high_risk
            && !instruction.dry_run
        {
            let key = args_hash_key(instruction);
            if !dry_run_observed.contains(&key) {
                return SafetyDecision::Reject {
                    reason: "dry-run required first for high-risk action".to_string(),
                };
            }
        }

        if risk_level >= Risk::Medium {
            return SafetyDecision::NeedsApproval { risk_level, reason };
        }

        SafetyDecision::Allow { risk_level }
    }
}

/// Deterministic `(worker, action, args-hash)` key. Args are serialized to
/// a canonical JSON string (serde_json preserves insertion order for maps
/// built from a sorted BTreeMap) before hashing so the key is stable across
/// calls with an equivalent argument set.
pub fn args_hash_key(instruction: &Instruction) -> DryRunKey {
    use std::collections::BTreeMap;
    use std::hash::{Hash, Hasher};

    let sorted: BTreeMap<_, _> = instruction.args.iter().collect();
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    canonical.hash(&mut hasher);
    (instruction.worker.clone(), instruction.action.clone(), hasher.finish())
}
