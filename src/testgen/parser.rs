//! Text heuristics over source and model output.

use std::sync::OnceLock;

use regex::Regex;

use crate::testgen::request::RequestKind;

/// Hooks the runtime calls on its own; tests for these are behavioral.
pub const LIFECYCLE_HOOKS: &[&str] = &[
    "Start",
    "Awake",
    "OnEnable",
    "OnDisable",
    "Update",
    "FixedUpdate",
    "LateUpdate",
    "OnCollisionEnter",
    "OnTriggerEnter",
];

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[\w+#.-]*[ \t]*\r?\n?([\s\S]+?)\s*```").expect("fence regex"))
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bclass\s+([A-Za-z0-9_]+)").expect("class regex"))
}

fn public_method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\bpublic\s+(?:(?:static|virtual|override|async|sealed|new)\s+)*[\w<>\[\],.?]+\s+(\w+)\s*\(",
        )
        .expect("public method regex")
    })
}

fn hook_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:void|IEnumerator)\s+(\w+)\s*\(").expect("hook regex")
    })
}

/// Pull the test code out of a raw model response.
///
/// The first fenced block wins; with no fence the whole trimmed response is
/// taken as code. Blank input yields an empty string.
pub fn extract_test_code(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    match fence_re().captures(raw) {
        Some(c) => c.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
        None => raw.trim().to_string(),
    }
}

/// Name from the first `class <Name>` in `code`.
pub fn extract_class_name(code: &str) -> Option<String> {
    class_re()
        .captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: RequestKind,
}

/// Candidate selectors for a target unit, in source order.
pub fn list_testable_members(source: &str) -> Vec<MemberDescriptor> {
    let mut out: Vec<MemberDescriptor> = Vec::new();

    let mut push = |name: &str, kind: RequestKind| {
        if !out.iter().any(|m| m.name == name) {
            out.push(MemberDescriptor {
                name: name.to_string(),
                kind,
            });
        }
    };

    for c in public_method_re().captures_iter(source) {
        let Some(name) = c.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if LIFECYCLE_HOOKS.contains(&name) {
            continue;
        }
        push(name, RequestKind::UnitMethod);
    }

    for c in hook_re().captures_iter(source) {
        let Some(name) = c.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if LIFECYCLE_HOOKS.contains(&name) {
            push(name, RequestKind::BehaviorLifecycle);
        }
    }

    out
}
