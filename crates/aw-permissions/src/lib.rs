//! Closed permission-scope set and least-privilege computation (spec.md
//! §4.6, invariant 10).
//!
//! The 17 scope names are a closed Rust enum rather than open strings, so
//! an unrecognized scope anywhere in the pipeline is a compile-time-checked
//! `UnknownPermissionScope` rather than a stringly-typed lookup miss —
//! the same closed-enum-over-open-string discipline `aw-ids` applies to
//! engine and runtime ids.

use aw_types::{CompileError, ErrorKind, PermLevel, Value};

/// The fixed set of permission scopes GitHub Actions recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PermissionScope {
    Actions,
    Attestations,
    Checks,
    Contents,
    Deployments,
    Discussions,
    IdToken,
    Issues,
    Metadata,
    Models,
    Packages,
    Pages,
    PullRequests,
    RepositoryProjects,
    SecurityEvents,
    Statuses,
    Workflows,
}

/// Every scope, in the fixed order `aw-ids`-style enums use for
/// round-tripping (declaration order, not alphabetical — alphabetical
/// ordering is applied only at render time, per invariant 6).
pub const ALL_SCOPES: &[PermissionScope] = &[
    PermissionScope::Actions,
    PermissionScope::Attestations,
    PermissionScope::Checks,
    PermissionScope::Contents,
    PermissionScope::Deployments,
    PermissionScope::Discussions,
    PermissionScope::IdToken,
    PermissionScope::Issues,
    PermissionScope::Metadata,
    PermissionScope::Models,
    PermissionScope::Packages,
    PermissionScope::Pages,
    PermissionScope::PullRequests,
    PermissionScope::RepositoryProjects,
    PermissionScope::SecurityEvents,
    PermissionScope::Statuses,
    PermissionScope::Workflows,
];

impl PermissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionScope::Actions => "actions",
            PermissionScope::Attestations => "attestations",
            PermissionScope::Checks => "checks",
            PermissionScope::Contents => "contents",
            PermissionScope::Deployments => "deployments",
            PermissionScope::Discussions => "discussions",
            PermissionScope::IdToken => "id-token",
            PermissionScope::Issues => "issues",
            PermissionScope::Metadata => "metadata",
            PermissionScope::Models => "models",
            PermissionScope::Packages => "packages",
            PermissionScope::Pages => "pages",
            PermissionScope::PullRequests => "pull-requests",
            PermissionScope::RepositoryProjects => "repository-projects",
            PermissionScope::SecurityEvents => "security-events",
            PermissionScope::Statuses => "statuses",
            PermissionScope::Workflows => "workflows",
        }
    }

    pub fn parse(value: &str, field_path: &str) -> Result<Self, CompileError> {
        ALL_SCOPES
            .iter()
            .copied()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| {
                CompileError::new(
                    ErrorKind::UnknownPermissionScope,
                    field_path.to_string(),
                    format!(
                        "'{value}' is not a recognized permission scope (expected one of: {})",
                        ALL_SCOPES.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                    ),
                )
            })
    }
}

fn level_rank(level: PermLevel) -> u8 {
    match level {
        PermLevel::None => 0,
        PermLevel::Read => 1,
        PermLevel::Write => 2,
    }
}

fn level_max(a: PermLevel, b: PermLevel) -> PermLevel {
    if level_rank(a) >= level_rank(b) {
        a
    } else {
        b
    }
}

/// One scope requirement contributed by a safe-output, the engine, or the
/// dev-mode checkout step.
#[derive(Debug, Clone, Copy)]
pub struct ScopeRequirement {
    pub scope: PermissionScope,
    pub level: PermLevel,
}

impl ScopeRequirement {
    pub fn new(scope: PermissionScope, level: PermLevel) -> Self {
        Self { scope, level }
    }
}

/// The computed, least-privilege permission set for a single job.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    entries: Vec<(PermissionScope, PermLevel)>,
}

impl PermissionSet {
    /// Union the given requirements, taking the maximum level per scope
    /// (invariant 10: never broader than the union of requirements).
    pub fn compute(requirements: &[ScopeRequirement], needs_checkout: bool) -> Self {
        let mut merged: Vec<(PermissionScope, PermLevel)> = Vec::new();

        let mut push = |scope: PermissionScope, level: PermLevel| {
            if level == PermLevel::None {
                return;
            }
            match merged.iter_mut().find(|(s, _)| *s == scope) {
                Some((_, existing)) => *existing = level_max(*existing, level),
                None => merged.push((scope, level)),
            }
        };

        for req in requirements {
            push(req.scope, req.level);
        }
        if needs_checkout {
            push(PermissionScope::Contents, PermLevel::Read);
        }

        merged.sort_by_key(|(scope, _)| scope.as_str());
        Self { entries: merged }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(PermissionScope, PermLevel)] {
        &self.entries
    }

    /// Render as a `Value` suitable for the YAML emitter: a mapping of
    /// scope -> level, sorted by scope name, or an explicit empty mapping
    /// when no scope is required.
    pub fn to_value(&self) -> Value {
        Value::Map(
            self.entries
                .iter()
                .map(|(scope, level)| (scope.as_str().to_string(), Value::Str(level.as_str().to_string())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_unions_and_takes_max_level() {
        let reqs = vec![
            ScopeRequirement::new(PermissionScope::Issues, PermLevel::Read),
            ScopeRequirement::new(PermissionScope::Issues, PermLevel::Write),
            ScopeRequirement::new(PermissionScope::Contents, PermLevel::Read),
        ];
        let set = PermissionSet::compute(&reqs, false);
        let entries = set.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&(PermissionScope::Issues, PermLevel::Write)));
        assert!(entries.contains(&(PermissionScope::Contents, PermLevel::Read)));
    }

    #[test]
    fn compute_adds_contents_read_for_checkout() {
        let set = PermissionSet::compute(&[], true);
        assert_eq!(set.entries(), &[(PermissionScope::Contents, PermLevel::Read)]);
    }

    #[test]
    fn empty_requirements_yield_empty_set() {
        let set = PermissionSet::compute(&[], false);
        assert!(set.is_empty());
        assert_eq!(set.to_value(), Value::Map(Vec::new()));
    }

    #[test]
    fn to_value_sorted_by_scope_name() {
        let reqs = vec![
            ScopeRequirement::new(PermissionScope::PullRequests, PermLevel::Write),
            ScopeRequirement::new(PermissionScope::Actions, PermLevel::Read),
        ];
        let set = PermissionSet::compute(&reqs, false);
        let map = set.to_value();
        let keys: Vec<&str> = map.as_map().unwrap().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["actions", "pull-requests"]);
    }

    #[test]
    fn parse_rejects_unknown_scope() {
        let err = PermissionScope::parse("bogus", "permissions.bogus").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownPermissionScope);
    }

    #[test]
    fn parse_accepts_every_known_scope() {
        for scope in ALL_SCOPES {
            assert!(PermissionScope::parse(scope.as_str(), "permissions").is_ok());
        }
    }
}
