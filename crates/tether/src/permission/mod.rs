//! Tool permission policy.
//!
//! A pure decision function consulted by the hub before any agent tool call
//! proceeds. This is the security boundary: it is total (never panics),
//! deterministic, and depends only on static rule tables.
//!
//! Effective first-match order:
//!
//! 1. bypass mode allows everything except the interactive question tool;
//! 2. the deny tables run next, so a denied input stays denied in every mode
//!    short of bypass;
//! 3. acceptEdits mode allows the editing tool set;
//! 4. the safe allowlist applies in any mode;
//! 5. everything else asks a human.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tether_protocol::PermissionMode;

/// The interactive question tool: never auto-allowed, even in bypass mode,
/// because answering it is the whole point.
pub const QUESTION_TOOL: &str = "AskUserQuestion";

/// Tools the acceptEdits mode allows without asking.
const EDIT_TOOLS: &[&str] = &["Edit", "Write", "Bash", "NotebookEdit"];

/// Read-only or bookkeeping tools allowed in every mode.
const SAFE_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "WebSearch",
    "WebFetch",
    "TodoWrite",
    "TaskList",
    "TaskGet",
    "TaskCreate",
    "TaskUpdate",
];

/// Tools whose deny check inspects `file_path`.
const FILE_TOOLS: &[&str] = &["Edit", "Write", "NotebookEdit"];

/// Sensitive filename fragments for edit/write denial.
static PROTECTED_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(env|secret|credentials|password)").unwrap_or_else(|e| {
        unreachable!("protected-file pattern is static: {e}")
    })
});

/// Destructive shell patterns, each with its denial reason.
static DESTRUCTIVE_COMMANDS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r"(?i)\brm\s+-[a-z]*(rf|fr)[a-z]*\s+/(\s|$)",
            "recursive force delete of the filesystem root",
        ),
        (
            r"(?i)\brm\s+-[a-z]*(rf|fr)[a-z]*\s+[^\s]*\*",
            "mass delete",
        ),
        (r"(?i)\bmkfs(\.[a-z0-9]+)?\b", "filesystem format"),
        (r"(?i)\bdd\s+[^|;]*\bof=/dev/", "raw disk overwrite"),
        (r"(?i)\bformat\s+[a-z]:", "disk format"),
        (
            r"(?i)\b(shutdown|reboot|poweroff|halt)\b",
            "system shutdown or reboot",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, reason)| Regex::new(pattern).ok().map(|re| (re, reason)))
    .collect()
});

/// Outcome of a single tool-call decision. Produced once per call, never
/// persisted, never auto-retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Proceed, with the (possibly rewritten) input to use.
    Allow { updated_input: Value },
    /// Refuse, with a structured reason surfaced to the agent.
    Deny { reason: String },
    /// Forward the request to a human.
    Ask,
}

impl PermissionDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, PermissionDecision::Allow { .. })
    }
}

/// Decide whether a tool call may proceed.
pub fn decide(tool_name: &str, tool_input: &Value, mode: PermissionMode) -> PermissionDecision {
    if mode == PermissionMode::BypassPermissions && tool_name != QUESTION_TOOL {
        return allow(tool_input);
    }

    if let Some(reason) = deny_reason(tool_name, tool_input) {
        return PermissionDecision::Deny { reason };
    }

    if mode == PermissionMode::AcceptEdits && EDIT_TOOLS.contains(&tool_name) {
        return allow(tool_input);
    }

    if SAFE_TOOLS.contains(&tool_name) {
        return allow(tool_input);
    }

    PermissionDecision::Ask
}

fn allow(input: &Value) -> PermissionDecision {
    PermissionDecision::Allow {
        updated_input: input.clone(),
    }
}

/// Check the deny tables. Inspects `command` for the shell tool and
/// `file_path` for file tools; an absent field checks against the empty
/// string and never matches.
fn deny_reason(tool_name: &str, tool_input: &Value) -> Option<String> {
    if tool_name == "Bash" {
        let command = str_field(tool_input, "command");
        for (pattern, reason) in DESTRUCTIVE_COMMANDS.iter() {
            if pattern.is_match(command) {
                return Some(format!("destructive command blocked: {reason}"));
            }
        }
        return None;
    }

    if FILE_TOOLS.contains(&tool_name) {
        let file_path = str_field(tool_input, "file_path");
        if PROTECTED_FILE.is_match(file_path) {
            return Some(format!("write to protected file blocked: {file_path}"));
        }
    }

    None
}

fn str_field<'a>(input: &'a Value, field: &str) -> &'a str {
    input.get(field).and_then(Value::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tag(decision: &PermissionDecision) -> &'static str {
        match decision {
            PermissionDecision::Allow { .. } => "allow",
            PermissionDecision::Deny { .. } => "deny",
            PermissionDecision::Ask => "ask",
        }
    }

    #[test]
    fn test_bypass_beats_deny() {
        let input = json!({"command": "rm -rf /"});
        let decision = decide("Bash", &input, PermissionMode::BypassPermissions);
        assert!(decision.is_allow());
    }

    #[test]
    fn test_bypass_never_allows_question_tool() {
        let decision = decide(QUESTION_TOOL, &json!({}), PermissionMode::BypassPermissions);
        assert_eq!(decision, PermissionDecision::Ask);
    }

    #[test]
    fn test_deny_beats_ask_in_default_mode() {
        let input = json!({"command": "rm -rf /"});
        match decide("Bash", &input, PermissionMode::Default) {
            PermissionDecision::Deny { reason } => {
                assert!(reason.contains("root"), "reason: {reason}")
            }
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn test_accept_edits_allows_plain_edit_but_not_env_file() {
        let plain = json!({"file_path": "src/main.rs"});
        assert!(decide("Edit", &plain, PermissionMode::AcceptEdits).is_allow());

        let env = json!({"file_path": "project/.env"});
        match decide("Edit", &env, PermissionMode::AcceptEdits) {
            PermissionDecision::Deny { reason } => {
                assert!(reason.contains(".env"), "reason: {reason}")
            }
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn test_protected_filenames_case_insensitive() {
        for path in [".ENV", "a/.Secret", "x/.CREDENTIALS.json", "y/.password"] {
            let input = json!({"file_path": path});
            assert_eq!(tag(&decide("Write", &input, PermissionMode::Default)), "deny");
        }
    }

    #[test]
    fn test_safe_tools_allowed_in_default_mode() {
        for tool in ["Read", "Glob", "Grep", "WebSearch", "WebFetch", "TodoWrite"] {
            assert!(decide(tool, &json!({}), PermissionMode::Default).is_allow());
        }
    }

    #[test]
    fn test_unknown_tools_ask() {
        assert_eq!(
            decide("LaunchMissiles", &json!({}), PermissionMode::Default),
            PermissionDecision::Ask
        );
        assert_eq!(
            decide("Edit", &json!({"file_path": "a.rs"}), PermissionMode::Default),
            PermissionDecision::Ask
        );
    }

    #[test]
    fn test_destructive_command_table() {
        let denied = [
            "rm -rf /",
            "sudo rm -fr / ",
            "rm -rf ./build/*",
            "mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda",
            "format c:",
            "shutdown -h now",
            "reboot",
        ];
        for command in denied {
            let input = json!({"command": command});
            assert_eq!(
                tag(&decide("Bash", &input, PermissionMode::Default)),
                "deny",
                "command should be denied: {command}"
            );
        }

        let fine = ["ls -la", "rm file.txt", "cargo build", "echo reboots are rare"];
        for command in fine {
            let input = json!({"command": command});
            assert_eq!(
                tag(&decide("Bash", &input, PermissionMode::Default)),
                "ask",
                "command should fall through to ask: {command}"
            );
        }
    }

    #[test]
    fn test_absent_field_never_matches() {
        assert_eq!(tag(&decide("Bash", &json!({}), PermissionMode::Default)), "ask");
        assert_eq!(
            tag(&decide("Edit", &Value::Null, PermissionMode::Default)),
            "ask"
        );
    }

    #[test]
    fn test_total_on_arbitrary_input_shapes() {
        let weird_inputs = [
            Value::Null,
            json!([1, 2, 3]),
            json!("just a string"),
            json!({"command": 42}),
            json!({"file_path": {"nested": true}}),
        ];
        for input in &weird_inputs {
            for mode in [
                PermissionMode::Default,
                PermissionMode::AcceptEdits,
                PermissionMode::BypassPermissions,
            ] {
                for tool in ["Bash", "Edit", "Read", "Whatever", ""] {
                    let first = decide(tool, input, mode);
                    let second = decide(tool, input, mode);
                    assert_eq!(tag(&first), tag(&second));
                }
            }
        }
    }

    #[test]
    fn test_determinism() {
        let input = json!({"command": "git status"});
        let baseline = tag(&decide("Bash", &input, PermissionMode::Default));
        for _ in 0..100 {
            assert_eq!(tag(&decide("Bash", &input, PermissionMode::Default)), baseline);
        }
    }
}
