//! Per-key policy for a bare/`null` header value (spec.md §9 Open
//! Question: "the source codebase tolerates `null` values in places where
//! a boolean is expected... An implementer should make this policy
//! explicit per key and document it.")
//!
//! `null` on one of these keys means "enable with defaults"; it is
//! rewritten to `Value::Bool(true)` by the frontmatter parser before
//! further processing. `null` on any other key is a `MalformedHeader`.

/// Keys (dotted paths relative to the header root) for which an explicit
/// `null` means "enable with defaults" rather than "absent".
const ENABLE_WITH_DEFAULTS_KEYS: &[&str] = &[
    "safe-outputs.threat-detection",
    "cache",
];

/// Safe-output type keys live under `safe-outputs.*`; any of them may be
/// `null` to mean "enabled with defaults" except the reserved keys that
/// are not output types (`footer`, `threat-detection`, `jobs`).
const SAFE_OUTPUT_RESERVED_KEYS: &[&str] = &["footer", "threat-detection", "jobs"];

pub fn allows_null(field_path: &str) -> bool {
    if ENABLE_WITH_DEFAULTS_KEYS.contains(&field_path) {
        return true;
    }
    if let Some(rest) = field_path.strip_prefix("safe-outputs.") {
        if !rest.contains('.') && !SAFE_OUTPUT_RESERVED_KEYS.contains(&rest) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_and_threat_detection_allow_null() {
        assert!(allows_null("cache"));
        assert!(allows_null("safe-outputs.threat-detection"));
    }

    #[test]
    fn safe_output_type_allows_null() {
        assert!(allows_null("safe-outputs.create_issue"));
    }

    #[test]
    fn safe_output_footer_does_not_allow_null() {
        assert!(!allows_null("safe-outputs.footer"));
    }

    #[test]
    fn unrelated_key_does_not_allow_null() {
        assert!(!allows_null("engine"));
        assert!(!allows_null("sandbox.agent"));
    }
}
