//! Instruction Validator (C6): schema-checks a parsed `Instruction` against
//! the live `WorkerRegistry` before it reaches the safety pipeline.

use crate::errors::EngineError;
use crate::model::Instruction;
use crate::tools::WorkerRegistry;
use std::collections::HashSet;

pub fn validate(instruction: &Instruction, registry: &WorkerRegistry) -> Result<(), EngineError> {
    let worker = registry.get(&instruction.worker).ok_or_else(|| EngineError::InvalidInstruction {
        path: instruction.worker.clone(),
        reason: format!("unknown worker: {}", instruction.worker),
    })?;

    let action = worker
        .actions()
        .into_iter()
        .find(|a| a.name == instruction.action)
        .ok_or_else(|| EngineError::InvalidInstruction {
            path: format!("{}.{}", instruction.worker, instruction.action),
            reason: format!("unknown action: {}", instruction.action),
        })?;

    for param in &action.params {
        match instruction.args.get(&param.name) {
            Some(value) if !param.param_type.matches(value) => {
                return Err(EngineError::InvalidInstruction {
                    path: format!("{}.{}.{}", instruction.worker, instruction.action, param.name),
                    reason: format!("expected {:?}, got {value}", param.param_type),
                });
            }
            None if param.required => {
                return Err(EngineError::InvalidInstruction {
                    path: format!("{}.{}.{}", instruction.worker, instruction.action, param.name),
                    reason: "missing required parameter".to_string(),
                });
            }
            _ => {}
        }
    }

    if !action.open_schema {
        let known: HashSet<&str> = action.params.iter().map(|p| p.name.as_str()).collect();
        if let Some(unknown) = instruction.args.keys().find(|k| !known.contains(k.as_str())) {
            return Err(EngineError::InvalidInstruction {
                path: format!("{}.{}.{}", instruction.worker, instruction.action, unknown),
                reason: "unknown parameter".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::risk::Risk;
    use std::collections::HashMap;

    fn instr(worker: &str, action: &str, args: HashMap<String, serde_json::Value>) -> Instruction {
        Instruction {
            worker: worker.to_string(),
            action: action.to_string(),
            args,
            risk_level: Risk::Safe,
            dry_run: false,
            thinking: String::new(),
        }
    }

    #[test]
    fn unknown_worker_rejected() {
        let registry = WorkerRegistry::new();
        let i = instr("bogus", "x", HashMap::new());
        assert!(validate(&i, &registry).is_err());
    }

    #[test]
    fn unknown_action_rejected() {
        let registry = WorkerRegistry::new();
        let i = instr("file", "bogus", HashMap::new());
        assert!(validate(&i, &registry).is_err());
    }

    #[test]
    fn missing_required_param_rejected() {
        let registry = WorkerRegistry::new();
        let i = instr("file", "read", HashMap::new());
        assert!(validate(&i, &registry).is_err());
    }

    #[test]
    fn valid_instruction_passes() {
        let registry = WorkerRegistry::new();
        let mut args = HashMap::new();
        args.insert("path".to_string(), serde_json::json!("/tmp/x"));
        let i = instr("file", "read", args);
        assert!(validate(&i, &registry).is_ok());
    }

    #[test]
    fn wrong_type_rejected() {
        let registry = WorkerRegistry::new();
        let mut args = HashMap::new();
        args.insert("path".to_string(), serde_json::json!(123));
        let i = instr("file", "read", args);
        assert!(validate(&i, &registry).is_err());
    }

    #[test]
    fn unknown_param_rejected_for_closed_schema() {
        let registry = WorkerRegistry::new();
        let mut args = HashMap::new();
        args.insert("path".to_string(), serde_json::json!("/tmp/x"));
        args.insert("bogus".to_string(), serde_json::json!(1));
        let i = instr("file", "read", args);
        assert!(validate(&i, &registry).is_err());
    }
}
