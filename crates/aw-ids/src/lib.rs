//! Shared identifier wrappers for the workflow compiler.
//!
//! Mirrors the newtype-with-validated-`parse` pattern used throughout the
//! rest of the compiler: each identifier is a thin wrapper around `String`
//! that can only be constructed through a validating constructor, so a
//! `TrackerId` or `EngineId` in hand is always known-good.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

/// Minimum length for a `tracker-id` (spec.md §3 invariant 4).
pub const TRACKER_ID_MIN_LEN: usize = 8;

/// A validated `tracker-id`: at least 8 characters, alphanumeric plus `-`/`_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackerId(String);

impl TrackerId {
    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        if value.chars().count() < TRACKER_ID_MIN_LEN {
            return Err(IdParseError::new(format!(
                "tracker-id must be at least {TRACKER_ID_MIN_LEN} characters, got {}",
                value.chars().count()
            )));
        }
        if !value.chars().all(is_tracker_char) {
            return Err(IdParseError::new(
                "tracker-id must contain only letters, digits, '-' and '_'",
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_tracker_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
}

/// The closed set of AI engines the tool & runtime registry understands
/// (spec.md §4.3). Unknown engine names surface as `UnknownEngine` rather
/// than being silently accepted as a fourth, uninterpreted string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineId {
    Claude,
    Codex,
    Copilot,
    Custom,
}

impl EngineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Claude => "claude",
            EngineId::Codex => "codex",
            EngineId::Copilot => "copilot",
            EngineId::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        match value {
            "claude" => Ok(EngineId::Claude),
            "codex" => Ok(EngineId::Codex),
            "copilot" => Ok(EngineId::Copilot),
            "custom" => Ok(EngineId::Custom),
            other => Err(IdParseError::new(format!("unknown engine id: {other}"))),
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed set of runtime ids recognized by the runtime registry
/// (spec.md §3 invariant 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeId {
    Node,
    Python,
    Go,
    Uv,
    Bun,
    Deno,
}

impl RuntimeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeId::Node => "node",
            RuntimeId::Python => "python",
            RuntimeId::Go => "go",
            RuntimeId::Uv => "uv",
            RuntimeId::Bun => "bun",
            RuntimeId::Deno => "deno",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "node" => Some(RuntimeId::Node),
            "python" => Some(RuntimeId::Python),
            "go" => Some(RuntimeId::Go),
            "uv" => Some(RuntimeId::Uv),
            "bun" => Some(RuntimeId::Bun),
            "deno" => Some(RuntimeId::Deno),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job names in the emitted pipeline are fixed by the job graph builder, but
/// custom-job safe outputs (spec.md §4.4) let the author name their own job.
/// Validate those the same way GitHub Actions validates a job id: starts
/// with a letter or `_`, then letters/digits/`-`/`_`.
pub fn is_valid_job_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_id_rejects_short() {
        assert!(TrackerId::parse("short").is_err());
    }

    #[test]
    fn tracker_id_rejects_bad_chars() {
        assert!(TrackerId::parse("abcd1234!").is_err());
    }

    #[test]
    fn tracker_id_accepts_valid() {
        let id = TrackerId::parse("sub-005_abc").unwrap();
        assert_eq!(id.as_str(), "sub-005_abc");
    }

    #[test]
    fn engine_id_round_trips() {
        for s in ["claude", "codex", "copilot", "custom"] {
            let id = EngineId::parse(s).unwrap();
            assert_eq!(id.as_str(), s);
        }
        assert!(EngineId::parse("gpt5").is_err());
    }

    #[test]
    fn runtime_id_known_set_only() {
        assert!(RuntimeId::parse("node").is_some());
        assert!(RuntimeId::parse("ruby").is_none());
    }

    #[test]
    fn job_name_validation() {
        assert!(is_valid_job_name("my_job-1"));
        assert!(!is_valid_job_name("1bad"));
        assert!(!is_valid_job_name(""));
        assert!(!is_valid_job_name("bad name"));
    }
}
