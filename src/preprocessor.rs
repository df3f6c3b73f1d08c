//! Preprocessor (C3): deterministic pre-LLM pass producing intent tag,
//! entity extraction, and reference resolution. No network or filesystem
//! I/O; idempotent per input.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::WorkerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Chat,
    List,
    Explain,
    Execute,
    Deploy,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    pub repo_url: Option<String>,
    pub ports: Vec<u32>,
}

/// Service-default ports the prompt explicitly forbids the model from
/// silently substituting in place of an extracted port.
pub const FORBIDDEN_DEFAULT_PORTS: &[u32] = &[80, 443, 6379, 3306, 5432, 27017];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreprocessResult {
    pub intent: Intent,
    pub entities: Entities,
    /// The user's text, with any "this/that/上面那个"-style reference
    /// rewritten to include the resolved identifier in parentheses.
    pub resolved_text: String,
    pub flags: Vec<String>,
}

impl Default for Intent {
    fn default() -> Self {
        Intent::Unknown
    }
}

static REPO_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(?:github|gitlab)\.com/[\w.-]+/[\w.-]+").unwrap());

static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\d{1,5}\s*(?:端口|port)").unwrap(),
        Regex::new(r"(?:端口|port)\s*\d{1,5}").unwrap(),
        Regex::new(r":\s*\d{1,5}").unwrap(),
        Regex::new(r"(?:在|on)\s*\d{1,5}").unwrap(),
    ]
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,5}").unwrap());

const DEPLOY_VERBS: &[&str] = &["deploy", "install", "启动", "run", "部署"];
const LIST_WORDS: &[&str] = &["list", "show", "列出", "显示", "查看"];
const EXPLAIN_WORDS: &[&str] = &["explain", "why", "解释", "为什么", "what does"];
const EXECUTE_WORDS: &[&str] = &["restart", "stop", "start", "delete", "remove", "kill", "重启", "停止", "删除"];
const REFERENCE_WORDS: &[&str] = &["this", "that", "上面那个", "它", "那个"];

fn classify_intent(text: &str, has_repo: bool) -> Intent {
    let lower = text.to_lowercase();
    let has_deploy_verb = DEPLOY_VERBS.iter().any(|v| lower.contains(v));
    if has_repo && has_deploy_verb {
        return Intent::Deploy;
    }
    if EXECUTE_WORDS.iter().any(|w| lower.contains(w)) {
        return Intent::Execute;
    }
    if LIST_WORDS.iter().any(|w| lower.contains(w)) {
        return Intent::List;
    }
    if EXPLAIN_WORDS.iter().any(|w| lower.contains(w)) {
        return Intent::Explain;
    }
    if lower.trim().is_empty() {
        return Intent::Unknown;
    }
    Intent::Chat
}

fn extract_ports(text: &str) -> Vec<u32> {
    let mut ports = std::collections::BTreeSet::new();
    for pattern in PORT_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            if let Some(num) = NUMBER_RE.find(m.as_str()) {
                if let Ok(p) = num.as_str().parse::<u32>() {
                    if p > 0 && p <= 65535 {
                        ports.insert(p);
                    }
                }
            }
        }
    }
    ports.into_iter().collect()
}

/// Search the most recent successful `WorkerResult.data` for an identifier
/// (container name, PID, path) to substitute for a bare pronoun reference.
fn find_recent_identifier(recent: Option<&WorkerResult>) -> Option<String> {
    let result = recent?;
    let data = result.data.as_ref()?;
    match data {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => {
            for key in ["name", "id", "pid", "path", "container", "container_id"] {
                if let Some(v) = map.get(key) {
                    if let Some(s) = v.as_str() {
                        return Some(s.to_string());
                    }
                    if let Some(n) = v.as_i64() {
                        return Some(n.to_string());
                    }
                }
            }
            None
        }
        serde_json::Value::Array(items) => items.first().and_then(|first| match first {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .get("name")
                .or_else(|| map.get("id"))
                .and_then(|v| v.as_str())
                .map(String::from),
            _ => None,
        }),
        _ => None,
    }
}

fn resolve_references(text: &str, recent: Option<&WorkerResult>) -> String {
    let Some(identifier) = find_recent_identifier(recent) else {
        return text.to_string();
    };
    let lower = text.to_lowercase();
    if REFERENCE_WORDS.iter().any(|w| lower.contains(w)) {
        format!("{text} ({identifier})")
    } else {
        text.to_string()
    }
}

/// Run the full preprocessing pass for one turn.
pub fn preprocess(user_input: &str, recent_result: Option<&WorkerResult>) -> PreprocessResult {
    let repo_url = REPO_URL_RE.find(user_input).map(|m| m.as_str().to_string());
    let ports = extract_ports(user_input);
    let intent = classify_intent(user_input, repo_url.is_some());
    let resolved_text = resolve_references(user_input, recent_result);

    let mut flags = Vec::new();
    if !ports.is_empty() {
        flags.push("has_port_reference".to_string());
    }
    if resolved_text != user_input {
        flags.push("reference_resolved".to_string());
    }

    PreprocessResult {
        intent,
        entities: Entities { repo_url, ports },
        resolved_text,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_requires_both_url_and_verb() {
        let r = preprocess("deploy https://github.com/foo/bar", None);
        assert_eq!(r.intent, Intent::Deploy);
    }

    #[test]
    fn url_without_deploy_verb_is_not_deploy() {
        let r = preprocess("check https://github.com/foo/bar", None);
        assert_ne!(r.intent, Intent::Deploy);
    }

    #[test]
    fn deploy_verb_without_url_is_not_deploy() {
        let r = preprocess("install the package", None);
        assert_ne!(r.intent, Intent::Deploy);
    }

    #[test]
    fn extracts_port_patterns() {
        let r = preprocess("nginx is running on 8080 port", None);
        assert!(r.entities.ports.contains(&8080));
    }

    #[test]
    fn extracts_colon_port() {
        let r = preprocess("curl localhost:3000", None);
        assert!(r.entities.ports.contains(&3000));
    }

    #[test]
    fn execute_intent_for_action_verbs() {
        let r = preprocess("restart nginx", None);
        assert_eq!(r.intent, Intent::Execute);
    }

    #[test]
    fn list_intent() {
        let r = preprocess("list running containers", None);
        assert_eq!(r.intent, Intent::List);
    }

    #[test]
    fn resolves_reference_to_recent_identifier() {
        let recent = WorkerResult {
            success: true,
            data: Some(serde_json::json!({"name": "web-1"})),
            message: "ok".into(),
            task_completed: false,
            simulated: false,
            raw_output: None,
        };
        let r = preprocess("restart that", Some(&recent));
        assert!(r.resolved_text.contains("web-1"));
    }

    #[test]
    fn no_reference_resolution_without_pronoun() {
        let recent = WorkerResult {
            success: true,
            data: Some(serde_json::json!({"name": "web-1"})),
            message: "ok".into(),
            task_completed: false,
            simulated: false,
            raw_output: None,
        };
        let r = preprocess("restart nginx", Some(&recent));
        assert_eq!(r.resolved_text, "restart nginx");
    }

    #[test]
    fn idempotent_on_repeated_calls() {
        let a = preprocess("deploy https://github.com/foo/bar on 8080 port", None);
        let b = preprocess("deploy https://github.com/foo/bar on 8080 port", None);
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.entities.ports, b.entities.ports);
    }

    #[test]
    fn empty_input_is_unknown() {
        let r = preprocess("", None);
        assert_eq!(r.intent, Intent::Unknown);
    }
}
