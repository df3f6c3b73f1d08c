//! Dual-mode instruction extraction (C5): lifts a `ToolCallResult` out of
//! either an OpenAI tool call or a free-text JSON payload, with bounded
//! repair for the latter.

use super::types::ChatResponse;
use crate::errors::EngineError;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ToolCallResult {
    pub worker: String,
    pub action: String,
    pub args: HashMap<String, Value>,
    pub thinking: String,
    pub is_final: bool,
    pub chat_message: String,
}

impl ToolCallResult {
    fn final_message(chat_message: String) -> Self {
        Self {
            is_final: true,
            chat_message,
            ..Default::default()
        }
    }
}

/// Extract one instruction (or a final chat reply) from a model response.
/// `supports_function_calling` selects between native tool-calls and the
/// text-JSON fallback.
pub fn extract(response: &ChatResponse, supports_function_calling: bool) -> Result<ToolCallResult, EngineError> {
    let choice = response
        .choices
        .first()
        .ok_or_else(|| EngineError::Parse("model response had no choices".to_string()))?;
    let message = &choice.message;

    if supports_function_calling {
        if let Some(call) = message.tool_calls.as_ref().and_then(|calls| calls.first()) {
            let (worker, action) = call.function.name.split_once('.').ok_or_else(|| {
                EngineError::Parse(format!(
                    "tool name {:?} is not in worker.action form",
                    call.function.name
                ))
            })?;
            let args: HashMap<String, Value> = serde_json::from_str(&call.function.arguments)
                .map_err(|e| EngineError::Parse(format!("tool call arguments not valid JSON: {e}")))?;
            return Ok(ToolCallResult {
                worker: worker.to_string(),
                action: action.to_string(),
                args,
                thinking: message.reasoning_content.clone().unwrap_or_default(),
                is_final: false,
                chat_message: String::new(),
            });
        }
        return Ok(ToolCallResult::final_message(message.content.clone()));
    }

    match extract_json_object(&message.content) {
        JsonExtraction::Parsed(value) => parse_instruction_value(&value),
        JsonExtraction::NoneFound => Ok(ToolCallResult::final_message(message.content.clone())),
        JsonExtraction::Unparseable => Err(EngineError::Parse(
            "response contained a JSON-shaped block that could not be parsed after repair".to_string(),
        )),
    }
}

fn parse_instruction_value(value: &Value) -> Result<ToolCallResult, EngineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::Parse("extracted JSON is not an object".to_string()))?;
    let worker = obj
        .get("worker")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Parse("extracted instruction missing `worker`".to_string()))?
        .to_string();
    let action = obj
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Parse("extracted instruction missing `action`".to_string()))?
        .to_string();
    let args: HashMap<String, Value> = obj
        .get("args")
        .and_then(Value::as_object)
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default();
    let thinking = obj.get("thinking").and_then(Value::as_str).unwrap_or_default().to_string();

    Ok(ToolCallResult {
        worker,
        action,
        args,
        thinking,
        is_final: false,
        chat_message: String::new(),
    })
}

enum JsonExtraction {
    /// No `{` at all — the response is a genuine final chat reply.
    NoneFound,
    /// A balanced `{...}` blob was found but remains invalid JSON after
    /// both repair passes — a parse error, not a chat reply.
    Unparseable,
    Parsed(Value),
}

/// (a) fenced ```json block, (b) first balanced `{…}` scan, (c) up to 2
/// repair passes (strip trailing commas) before giving up.
fn extract_json_object(text: &str) -> JsonExtraction {
    if let Some(v) = extract_fenced(text).and_then(|s| serde_json::from_str(&s).ok()) {
        return JsonExtraction::Parsed(v);
    }

    let Some(candidate) = balanced_braces(text) else {
        return JsonExtraction::NoneFound;
    };
    if let Ok(v) = serde_json::from_str(&candidate) {
        return JsonExtraction::Parsed(v);
    }

    let mut repaired = candidate;
    for _ in 0..2 {
        repaired = strip_trailing_commas(&repaired);
        if let Ok(v) = serde_json::from_str(&repaired) {
            return JsonExtraction::Parsed(v);
        }
    }
    JsonExtraction::Unparseable
}

fn extract_fenced(text: &str) -> Option<String> {
    let start = text.find("```json")?;
    let after = &text[start + "```json".len()..];
    let end = after.find("```")?;
    Some(after[..end].trim().to_string())
}

fn balanced_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{Choice, Message, ToolCall, ToolFunction, Usage};

    fn response_with(message: Message) -> ChatResponse {
        ChatResponse {
            id: "x".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "m".into(),
            choices: vec![Choice {
                index: 0,
                message,
                reasoning_content: None,
                finish_reason: Some("stop".into()),
            }],
            usage: Usage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            },
        }
    }

    #[test]
    fn tool_call_mode_lifts_worker_action_args() {
        let mut msg = Message::assistant("");
        msg.tool_calls = Some(vec![ToolCall {
            id: "1".into(),
            call_type: "function".into(),
            function: ToolFunction {
                name: "shell.execute_command".into(),
                arguments: r#"{"command":"ls"}"#.into(),
            },
        }]);
        let result = extract(&response_with(msg), true).unwrap();
        assert_eq!(result.worker, "shell");
        assert_eq!(result.action, "execute_command");
        assert!(!result.is_final);
    }

    #[test]
    fn tool_call_mode_no_call_is_final() {
        let msg = Message::assistant("all done here");
        let result = extract(&response_with(msg), true).unwrap();
        assert!(result.is_final);
        assert_eq!(result.chat_message, "all done here");
    }

    #[test]
    fn text_mode_extracts_fenced_json() {
        let msg = Message::assistant("here you go:\n```json\n{\"worker\":\"file\",\"action\":\"read\",\"args\":{\"path\":\"/tmp/x\"}}\n```");
        let result = extract(&response_with(msg), false).unwrap();
        assert_eq!(result.worker, "file");
        assert_eq!(result.action, "read");
    }

    #[test]
    fn text_mode_extracts_bare_balanced_braces() {
        let msg = Message::assistant("sure: {\"worker\":\"git\",\"action\":\"status\",\"args\":{}} thanks");
        let result = extract(&response_with(msg), false).unwrap();
        assert_eq!(result.worker, "git");
    }

    #[test]
    fn text_mode_repairs_trailing_comma() {
        let msg = Message::assistant("{\"worker\":\"git\",\"action\":\"status\",\"args\":{},}");
        let result = extract(&response_with(msg), false).unwrap();
        assert_eq!(result.worker, "git");
    }

    #[test]
    fn text_mode_with_no_json_is_final() {
        let msg = Message::assistant("just chatting, nothing to do");
        let result = extract(&response_with(msg), false).unwrap();
        assert!(result.is_final);
    }

    #[test]
    fn text_mode_with_unrepairable_braces_is_parse_error() {
        let msg = Message::assistant("sure: {\"worker\": \"git\", \"action\": }  oops");
        let err = extract(&response_with(msg), false).unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }
}
