//! Tool-name normalization and the closed alias/group tables.
//!
//! Tool names arrive from the host assistant in whatever casing the model
//! produced. Normalization (trim, lowercase, alias) happens once on the hot
//! path and once per selector during expansion, so both sides of a comparison
//! see canonical names.

use std::collections::BTreeSet;

use tracing::warn;

use super::ToolSelector;

/// Prefix that marks a selector as a group reference.
pub const GROUP_PREFIX: &str = "group:";

/// Closed alias table mapping legacy tool names to canonical ones.
pub const TOOL_ALIASES: &[(&str, &str)] = &[("bash", "exec"), ("apply-patch", "apply_patch")];

/// Closed table of tool groups and their members.
pub const TOOL_GROUPS: &[(&str, &[&str])] = &[
    ("memory", &["memory_search", "memory_get"]),
    ("web", &["web_search", "web_fetch"]),
    ("fs", &["read", "write", "edit", "apply_patch"]),
    ("runtime", &["exec", "process"]),
    (
        "sessions",
        &[
            "sessions_list",
            "sessions_history",
            "sessions_send",
            "sessions_spawn",
            "subagents",
            "session_status",
        ],
    ),
    ("ui", &["browser", "canvas"]),
    ("automation", &["cron", "gateway"]),
    ("messaging", &["message"]),
    ("nodes", &["nodes"]),
];

/// Normalize a raw tool name: trim, lowercase, then apply the alias table.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let name = raw.trim().to_lowercase();
    for (alias, canonical) in TOOL_ALIASES {
        if name == *alias {
            return (*canonical).to_string();
        }
    }
    name
}

/// Returns the members of a tool group, or `None` for an unknown group ID.
#[must_use]
pub fn group_members(group_id: &str) -> Option<&'static [&'static str]> {
    TOOL_GROUPS
        .iter()
        .find(|(id, _)| *id == group_id)
        .map(|(_, members)| *members)
}

/// Expand a selector list into the set of concrete, normalized tool names.
///
/// Unknown group references are skipped with a warning; they neither match
/// anything nor poison the rest of the list.
#[must_use]
pub fn expand(selectors: &[ToolSelector]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for selector in selectors {
        if let Some(group_id) = selector.group_id() {
            match group_members(group_id) {
                Some(members) => {
                    names.extend(members.iter().map(|name| (*name).to_string()));
                },
                None => {
                    warn!(group = %group_id, "unknown tool group in policy; skipping selector");
                },
            }
        } else {
            names.insert(normalize(selector.as_str()));
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_lowercases_and_aliases() {
        assert_eq!(normalize("  Bash "), "exec");
        assert_eq!(normalize("apply-patch"), "apply_patch");
        assert_eq!(normalize("Web_Search"), "web_search");
        assert_eq!(normalize("read"), "read");
    }

    #[test]
    fn test_group_members_closed_table() {
        assert_eq!(
            group_members("fs"),
            Some(["read", "write", "edit", "apply_patch"].as_slice())
        );
        assert_eq!(group_members("nodes"), Some(["nodes"].as_slice()));
        assert_eq!(group_members("nope"), None);
    }

    #[test]
    fn test_expand_mixes_literals_and_groups() {
        let selectors = vec![
            ToolSelector::from("group:web"),
            ToolSelector::from("Bash"),
            ToolSelector::from("canvas"),
        ];
        let expanded = expand(&selectors);
        assert!(expanded.contains("web_search"));
        assert!(expanded.contains("web_fetch"));
        assert!(expanded.contains("exec"));
        assert!(expanded.contains("canvas"));
        assert_eq!(expanded.len(), 4);
    }

    #[test]
    fn test_expand_skips_unknown_groups() {
        let selectors = vec![
            ToolSelector::from("group:unknown"),
            ToolSelector::from("read"),
        ];
        let expanded = expand(&selectors);
        assert_eq!(expanded.len(), 1);
        assert!(expanded.contains("read"));
        // The unknown group must not degrade into a literal name.
        assert!(!expanded.contains("group:unknown"));
    }
}
