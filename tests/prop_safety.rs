use opsai::config::SafetyConfig;
use opsai::model::Instruction;
use opsai::safety::pipeline::{Mode, SafetyPipeline};
use opsai::safety::policy::Whitelist;
use opsai::safety::risk::{self, Risk};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

fn shell_instruction(command: &str) -> Instruction {
    let mut args = HashMap::new();
    args.insert("command".to_string(), serde_json::json!(command));
    Instruction {
        worker: "shell".into(),
        action: "execute_command".into(),
        args,
        risk_level: Risk::Safe,
        dry_run: false,
        thinking: String::new(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn classify_never_panics(command in ".*") {
        let _ = risk::classify(&command);
    }

    #[test]
    fn pipeline_never_panics_and_never_allows_blocked(command in ".*") {
        let pipeline = SafetyPipeline::new(Whitelist::default_rules(), SafetyConfig::default());
        let instr = shell_instruction(&command);
        let decision = pipeline.evaluate(&instr, Risk::Safe, Mode::Cli, &HashSet::new());
        if risk::classify(&command).risk == Risk::Blocked {
            assert!(matches!(decision, opsai::safety::pipeline::SafetyDecision::Reject { .. }));
        }
    }

    #[test]
    fn pipeline_never_allows_above_cli_cap(command in ".*") {
        let pipeline = SafetyPipeline::new(Whitelist::default_rules(), SafetyConfig::default());
        let instr = shell_instruction(&command);
        let decision = pipeline.evaluate(&instr, Risk::Safe, Mode::Cli, &HashSet::new());
        if let opsai::safety::pipeline::SafetyDecision::Allow { risk_level } = decision {
            assert!(risk_level <= Risk::High);
        }
    }
}

#[test]
fn known_destructive_command_is_blocked() {
    let verdict = risk::classify("rm -rf /");
    assert_eq!(verdict.risk, Risk::Blocked);
}

#[test]
fn read_only_command_is_safe() {
    let verdict = risk::classify("ls -la");
    assert_eq!(verdict.risk, Risk::Safe);
}
