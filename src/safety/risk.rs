//! Deterministic, I/O-free command-risk classification (C1).
//!
//! Four ordered layers — command category, action semantics, dangerous
//! flags/paths, composition — each permitted only to raise the risk tier.
//! `Blocked` is terminal and short-circuits remaining layers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Safe,
    Medium,
    High,
    Blocked,
}

impl Risk {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "safe" => Risk::Safe,
            "medium" => Risk::Medium,
            "high" => Risk::High,
            "blocked" => Risk::Blocked,
            _ => return None,
        })
    }

    fn tier(self) -> u8 {
        match self {
            Risk::Safe => 0,
            Risk::Medium => 1,
            Risk::High => 2,
            Risk::Blocked => 3,
        }
    }

    fn from_tier(t: u8) -> Risk {
        match t {
            0 => Risk::Safe,
            1 => Risk::Medium,
            2 => Risk::High,
            _ => Risk::Blocked,
        }
    }

    fn raise(self, by: u8) -> Risk {
        if self == Risk::Blocked {
            return self;
        }
        Risk::from_tier((self.tier() + by).min(Risk::Blocked.tier()))
    }

    fn raise_to(self, floor: Risk) -> Risk {
        if self == Risk::Blocked {
            return self;
        }
        Risk::from_tier(self.tier().max(floor.tier()))
    }

    fn lower(self, by: u8) -> Risk {
        if self == Risk::Blocked {
            return self;
        }
        Risk::from_tier(self.tier().saturating_sub(by))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Risk::Safe => "safe",
            Risk::Medium => "medium",
            Risk::High => "high",
            Risk::Blocked => "blocked",
        }
    }
}

impl PartialOrd for Risk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.tier().cmp(&other.tier()))
    }
}
impl Ord for Risk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier().cmp(&other.tier())
    }
}

/// Verdict returned by the analyzer: a tier plus a one-line reason naming
/// the trigger, surfaced verbatim in audit output.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskVerdict {
    pub risk: Risk,
    pub reason: String,
}

impl RiskVerdict {
    fn new(risk: Risk, reason: impl Into<String>) -> Self {
        Self {
            risk,
            reason: reason.into(),
        }
    }
}

const QUERY_CMDS: &[&str] = &[
    "cat", "less", "head", "tail", "grep", "find", "which", "whoami", "df", "du", "free", "ps",
    "top", "netstat", "ss", "ip", "ping", "stat", "lsof", "pwd", "echo", "env", "id", "uname",
];
const PACKAGE_MANAGER_CMDS: &[&str] = &[
    "npm", "yarn", "pnpm", "pip", "pip3", "cargo", "go", "brew", "apt", "apt-get", "dnf", "yum",
    "apk",
];
const SERVICE_MGMT_CMDS: &[&str] = &["systemctl", "service", "nginx", "redis-cli", "psql", "mongosh"];
const CONTAINER_CMDS: &[&str] = &["docker", "docker-compose", "podman", "kubectl", "helm"];
const VCS_CMDS: &[&str] = &["git", "svn", "hg"];
const LANG_RUNTIME_CMDS: &[&str] = &["node", "python", "python3", "ruby", "php", "java", "make", "gcc"];
const NETWORK_TOOL_CMDS: &[&str] = &["curl", "wget", "ssh", "scp", "rsync", "nc", "nmap"];
const MONITORING_CMDS: &[&str] = &["vmstat", "iostat", "htop", "strace"];
const DESTRUCTIVE_CMDS: &[&str] = &["rm", "rmdir", "kill", "killall", "dd", "mkfs", "shred"];

const SAFE_TOKENS: &[&str] = &[
    "--version", "--help", "status", "list", "show", "info", "describe", "inspect", "check",
    "ping", "top", "logs", "cat", "view",
];
const WRITE_TOKENS: &[&str] = &[
    "install", "add", "create", "touch", "write", "set", "update", "upgrade", "build", "init",
    "apply", "patch", "enable",
];
const DESTRUCTIVE_TOKENS: &[&str] = &[
    "remove", "delete", "rm", "drop", "purge", "uninstall", "kill", "stop", "destroy", "reset",
    "rollback", "prune", "clean", "wipe", "truncate", "drain", "evict",
];

const SYSTEM_PREFIXES: &[&str] = &[
    "/etc", "/usr", "/var", "/boot", "/sys", "/proc", "/bin", "/sbin", "/lib", "/root",
];

const SAFE_PIPE_TARGETS: &[&str] = &[
    "grep", "awk", "sed", "sort", "uniq", "wc", "head", "tail", "cut", "tr", "tee", "xargs",
    "less", "more", "cat", "jq", "yq", "column", "fmt",
];

static CMD_SUBSTITUTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\([^)]*\)|`[^`]*`").unwrap());
static PIPE_TO_SHELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|\s*(bash|sh|zsh|sudo|xargs\s+rm)\b").unwrap());

fn tokenize(command: &str) -> Vec<&str> {
    command.split_whitespace().collect()
}

fn category_baseline(first: &str) -> (Risk, &'static str) {
    if QUERY_CMDS.contains(&first) {
        (Risk::Safe, "query")
    } else if PACKAGE_MANAGER_CMDS.contains(&first) {
        (Risk::Medium, "package_manager")
    } else if SERVICE_MGMT_CMDS.contains(&first) {
        (Risk::Medium, "service_management")
    } else if CONTAINER_CMDS.contains(&first) {
        (Risk::Medium, "container")
    } else if VCS_CMDS.contains(&first) {
        (Risk::Safe, "version_control")
    } else if LANG_RUNTIME_CMDS.contains(&first) {
        (Risk::Safe, "language_runtime")
    } else if NETWORK_TOOL_CMDS.contains(&first) {
        (Risk::Medium, "network_tools")
    } else if MONITORING_CMDS.contains(&first) {
        (Risk::Safe, "monitoring")
    } else if DESTRUCTIVE_CMDS.contains(&first) {
        (Risk::High, "destructive")
    } else {
        (Risk::Medium, "unknown command")
    }
}

/// Classify one shell segment (no `|`/`&&`/`;` splitting — callers recurse).
fn classify_segment(command: &str) -> RiskVerdict {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return RiskVerdict::new(Risk::Safe, "empty command");
    }

    let mut tokens = tokenize(trimmed);
    let mut sudo_prefix = false;
    while matches!(tokens.first(), Some(&"sudo") | Some(&"doas")) {
        sudo_prefix = true;
        tokens.remove(0);
    }
    let Some(&first) = tokens.first() else {
        return RiskVerdict::new(Risk::Safe, "empty command");
    };

    // Layer 1: command category.
    let (mut risk, mut category) = category_baseline(first);
    if sudo_prefix {
        risk = risk.raise(1);
    }
    let mut reason_parts: Vec<String> = vec![category.to_string()];
    let _ = &mut category;

    // Layer 2: action semantics.
    let rest = &tokens[1..];
    let mut semantic_note: Option<&str> = None;
    for tok in rest {
        if DESTRUCTIVE_TOKENS.contains(tok) {
            risk = risk.raise_to(Risk::High);
            semantic_note = Some("destructive semantics");
        } else if semantic_note.is_none() && WRITE_TOKENS.contains(tok) {
            risk = risk.raise_to(Risk::Medium);
            semantic_note = Some("write semantics");
        } else if semantic_note.is_none() && SAFE_TOKENS.contains(tok) {
            risk = risk.lower(1);
            semantic_note = Some("read-only semantics");
        }
    }
    if let Some(note) = semantic_note {
        reason_parts.push(note.to_string());
    }

    // Layer 3: dangerous flags and paths.
    if trimmed.contains("--no-preserve-root") {
        return RiskVerdict::new(Risk::Blocked, "--no-preserve-root present → blocked");
    }
    let mut force_like = false;
    for tok in rest {
        if matches!(*tok, "-rf" | "--force" | "-9" | "--purge") {
            force_like = true;
            risk = risk.raise(1).min(Risk::High);
            reason_parts.push("force-like flag".to_string());
        } else if matches!(*tok, "--recursive" | "--all") {
            risk = risk.raise(1).min(Risk::High);
            reason_parts.push("recursive/all flag".to_string());
        }
    }
    let mut path_to_system = false;
    for tok in rest {
        if SYSTEM_PREFIXES.iter().any(|p| tok.starts_with(p) || *tok == "/") {
            path_to_system = true;
        }
    }
    if path_to_system {
        risk = risk.raise_to(Risk::High);
        reason_parts.push("system path target".to_string());
        if force_like {
            return RiskVerdict::new(
                Risk::Blocked,
                "force flag combined with system path target → blocked",
            );
        }
    }
    for tok in rest {
        if matches!(*tok, "--dry-run" | "--check" | "--diff" | "--simulate" | "-n") {
            risk = risk.lower(1);
            reason_parts.push("dry-run marker".to_string());
        }
    }

    RiskVerdict::new(risk, reason_parts.join(" + "))
}

/// Split on top-level shell metacharacters `;`, `&&`, `||`, respecting quotes.
fn split_segments(command: &str) -> Vec<&str> {
    let bytes = command.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => {
                segments.push(&command[start..i]);
                start = i + 1;
            }
            '&' if !in_single && !in_double && bytes.get(i + 1) == Some(&b'&') => {
                segments.push(&command[start..i]);
                i += 1;
                start = i + 1;
            }
            '|' if !in_single && !in_double && bytes.get(i + 1) == Some(&b'|') => {
                segments.push(&command[start..i]);
                i += 1;
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push(&command[start..]);
    segments
}

/// True iff `command` matches the explicit `echo` config-generation idiom:
/// first token `echo`, only metacharacters are `>`, `>>`, `$(...)`.
fn is_echo_idiom(command: &str) -> bool {
    let trimmed = command.trim();
    if !trimmed.starts_with("echo ") && trimmed != "echo" {
        return false;
    }
    if trimmed.contains('`') || trimmed.contains("&&") || trimmed.contains("||") {
        return false;
    }
    if trimmed.matches(';').count() > 0 || trimmed.contains('&') && !trimmed.contains("&&") {
        // bare '&' background operator is also forbidden inside the idiom
        if trimmed.contains(';') {
            return false;
        }
    }
    true
}

fn redirect_target_is_system(command: &str) -> Option<bool> {
    let re = Regex::new(r">>?\s*(\S+)").ok()?;
    re.captures(command).map(|c| {
        let target = &c[1];
        SYSTEM_PREFIXES.iter().any(|p| target.starts_with(p)) || target == "/"
    })
}

/// Classify a full shell command string through all four layers, including
/// pipe/chain composition and the `echo` idiom exception.
pub fn classify(command: &str) -> RiskVerdict {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return RiskVerdict::new(Risk::Safe, "empty command");
    }

    if is_echo_idiom(trimmed) {
        if let Some(is_system) = redirect_target_is_system(trimmed) {
            if is_system {
                return RiskVerdict::new(
                    Risk::Blocked,
                    "echo redirection targets a system path → blocked",
                );
            }
        }
        // $(...) and redirection are permitted inside the idiom; still check
        // the substituted command's own risk, since "this idiom retains its
        // base risk unless the substituted command is itself risky".
        if let Some(cap) = CMD_SUBSTITUTION.find(trimmed) {
            let inner = cap.as_str();
            let inner = inner
                .trim_start_matches("$(")
                .trim_start_matches('`')
                .trim_end_matches(')')
                .trim_end_matches('`');
            let inner_verdict = classify(inner);
            if inner_verdict.risk > Risk::Safe {
                return RiskVerdict::new(
                    inner_verdict.risk,
                    format!("echo idiom wraps risky substitution: {}", inner_verdict.reason),
                );
            }
        }
        return RiskVerdict::new(Risk::Safe, "echo config-generation idiom");
    }

    if PIPE_TO_SHELL.is_match(trimmed) {
        return RiskVerdict::new(Risk::Blocked, "pipes into a shell/sudo/xargs-rm → blocked");
    }
    if CMD_SUBSTITUTION.is_match(trimmed) {
        return RiskVerdict::new(Risk::Blocked, "command substitution present → blocked");
    }

    let segments = split_segments(trimmed);
    if segments.len() > 1 {
        let mut worst = RiskVerdict::new(Risk::Safe, "composition");
        for seg in &segments {
            let v = classify(seg);
            if v.risk > worst.risk {
                worst = v;
            }
        }
        return RiskVerdict::new(worst.risk, format!("composed command, worst segment: {}", worst.reason));
    }

    // Layer 4: piping to a non-safe target raises one tier.
    if let Some(pipe_idx) = trimmed.find('|') {
        let (left, right) = trimmed.split_at(pipe_idx);
        let right = right.trim_start_matches('|').trim();
        let right_first = right.split_whitespace().next().unwrap_or("");
        let mut verdict = classify_segment(left.trim());
        if !SAFE_PIPE_TARGETS.contains(&right_first) {
            verdict.risk = verdict.risk.raise(1);
            verdict.reason = format!("{} + pipes to non-safe target '{}'", verdict.reason, right_first);
        }
        return verdict;
    }

    classify_segment(trimmed)
}
