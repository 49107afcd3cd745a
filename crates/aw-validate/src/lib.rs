//! Semantic validation (spec.md §4.7): env-secret leakage, role lists,
//! sandbox/network config, tool timeouts, and Docker image existence.
//!
//! The Docker daemon is never touched directly — validation takes a
//! [`DockerProbe`] implementation (Design Notes §9: "model as an injected
//! probe capability"), so the validator itself stays pure and testable.

use aw_ids::EngineId;
use aw_tools::EngineCapabilities;
use aw_types::{CompileError, ErrorKind, Value, Warning};
use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;

fn secret_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{\{[^}]*\bsecrets\.([A-Za-z0-9_]+)[^}]*\}\}").unwrap())
}

/// Find every `secrets.NAME` reference inside a `${{ ... }}` expression,
/// including ones nested under `&&`/`||`/`!` — a single regex over the
/// expression body finds the identifier regardless of the boolean
/// structure wrapping it, so no expression-tree parse is needed here.
fn find_secret_refs(value: &str) -> Vec<String> {
    secret_pattern()
        .captures_iter(value)
        .map(|c| format!("secrets.{}", &c[1]))
        .collect()
}

/// Scan `env`/`engine.env` for secret references (spec.md §4.7, invariant
/// 9, S6). `engine_token_vars` are the variable names the engine's own
/// token fallback chain uses — overriding one of those with a secret is
/// always permitted, even in strict mode.
pub fn check_env_secrets(
    field_path: &str,
    env: &[(String, String)],
    engine_token_vars: &[&str],
    strict: bool,
) -> Result<Vec<Warning>, CompileError> {
    let mut warnings = Vec::new();
    for (key, value) in env {
        let refs = find_secret_refs(value);
        if refs.is_empty() {
            continue;
        }
        if engine_token_vars.contains(&key.as_str()) {
            continue;
        }
        let message = format!("{} references {}", key, refs.join(", "));
        if strict {
            return Err(CompileError::new(ErrorKind::SecretsInEnv, format!("{field_path}.{key}"), message));
        }
        warnings.push(Warning::new(format!("{field_path}.{key}"), message));
    }
    Ok(warnings)
}

/// Default role set when `on.roles` is absent (spec.md §4.7).
pub const DEFAULT_ROLES: &[&str] = &["admin", "maintainer", "write"];

/// Validate `on.roles`: either the literal `"all"`, or a list of role
/// tokens; an absent value defaults to [`DEFAULT_ROLES`].
pub fn resolve_roles(on_roles: Option<&Value>) -> Result<Vec<String>, CompileError> {
    match on_roles {
        None | Some(Value::Null) => Ok(DEFAULT_ROLES.iter().map(|s| s.to_string()).collect()),
        Some(Value::Str(s)) if s == "all" => Ok(vec!["all".to_string()]),
        Some(Value::Str(other)) => Ok(vec![other.clone()]),
        Some(Value::List(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| CompileError::malformed_header("on.roles", "list entries must be strings")))
            .collect(),
        Some(_) => Err(CompileError::malformed_header("on.roles", "must be 'all' or a list of role names")),
    }
}

/// Emitted when the deprecated top-level `roles` key is present and
/// non-empty (spec.md §9 Open Question resolution).
pub fn deprecated_roles_warning(top_level_roles: &[String]) -> Option<Warning> {
    if top_level_roles.is_empty() {
        None
    } else {
        Some(Warning::new("roles", "top-level 'roles' is deprecated and ignored; use 'on.roles' instead"))
    }
}

/// Validate `sandbox.agent`: `false`, the string `"awf"`, or a nested
/// object are all accepted; `true` is meaningless and rejected.
pub fn validate_sandbox_agent(value: Option<&Value>) -> Result<(), CompileError> {
    match value {
        None | Some(Value::Bool(false)) => Ok(()),
        Some(Value::Bool(true)) | Some(Value::Null) => Err(CompileError::new(
            ErrorKind::SandboxAgentTrue,
            "sandbox.agent",
            "must be false, a sandbox type string (e.g. 'awf'), or an object — 'true' (and a bare 'null') has no meaning here",
        )),
        Some(Value::Str(s)) if s == "awf" => Ok(()),
        Some(Value::Str(other)) => Err(CompileError::malformed_header("sandbox.agent", format!("unknown sandbox type '{other}'"))),
        Some(Value::Map(_)) => Ok(()),
        Some(_) => Err(CompileError::malformed_header("sandbox.agent", "must be false, a string, or an object")),
    }
}

/// Validate a single `src:dst:mode` mount specifier.
pub fn validate_mount(spec: &str, field_path: &str) -> Result<(), CompileError> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 {
        return Err(CompileError::new(
            ErrorKind::InvalidMountSyntax,
            field_path.to_string(),
            format!("expected 'src:dst:mode', got '{spec}'"),
        ));
    }
    let mode = parts[2];
    if mode != "ro" && mode != "rw" {
        return Err(CompileError::new(
            ErrorKind::InvalidMountSyntax,
            format!("{field_path}.mode"),
            format!("mode must be 'ro' or 'rw', got '{mode}'"),
        ));
    }
    Ok(())
}

/// Whether the sandbox config requires at least one MCP server; surfaced
/// as a warning (not a named fatal kind — spec.md does not enumerate one
/// for this case).
pub fn sandbox_requires_mcp_warning(agent_enabled: bool, mcp_server_count: usize) -> Option<Warning> {
    if agent_enabled && mcp_server_count == 0 {
        Some(Warning::new("sandbox.mcp", "agent sandbox is enabled but no MCP server is configured"))
    } else {
        None
    }
}

/// Tool timeouts must be positive; non-integer shapes are already caught
/// earlier by the frontmatter parser (`InvalidTimeout`), so this only
/// narrows the *value* of an already-integer timeout.
pub fn validate_timeout(value: Option<i64>, field_path: &str) -> Result<(), CompileError> {
    match value {
        Some(v) if v < 1 => Err(CompileError::new(ErrorKind::InvalidTimeout, field_path.to_string(), format!("must be >= 1, got {v}"))),
        _ => Ok(()),
    }
}

/// Reject HTTP-transport MCP servers for engines that don't support them.
pub fn validate_http_mcp_support(caps: &EngineCapabilities, uses_http_transport: bool, field_path: &str) -> Result<(), CompileError> {
    if uses_http_transport && !caps.supports_http_mcp {
        return Err(CompileError::new(
            ErrorKind::HttpTransportUnsupported,
            field_path.to_string(),
            "the selected engine does not support HTTP MCP transport; use a stdio server instead",
        ));
    }
    Ok(())
}

/// Reject `engine.max-turns` for engines that don't support it.
pub fn validate_max_turns_support(engine: EngineId, caps: &EngineCapabilities, max_turns: Option<i64>) -> Result<(), CompileError> {
    if max_turns.is_some() && !caps.supports_max_turns {
        return Err(CompileError::new(
            ErrorKind::MaxTurnsUnsupported,
            "engine.max-turns",
            format!("engine '{}' does not support max-turns", engine.as_str()),
        ));
    }
    Ok(())
}

/// The result of probing whether a container image is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Present,
    Missing,
    AuthRequired,
    DaemonUnavailable,
}

/// Injected Docker-availability collaborator; the validator never shells
/// out to `docker` itself.
pub trait DockerProbe {
    fn probe_once(&self, image: &str) -> ProbeOutcome;
}

/// Always reports presence — used in dev builds and most unit tests where
/// Docker availability is not the thing under test.
pub struct NullProbe;

impl DockerProbe for NullProbe {
    fn probe_once(&self, _image: &str) -> ProbeOutcome {
        ProbeOutcome::Present
    }
}

/// Memoizes `probe_once` per image for the lifetime of a single compile
/// (spec.md §5: "Docker-daemon availability is checked at most once per
/// process... and cached").
pub struct CachingProbe<P: DockerProbe> {
    inner: P,
    cache: RefCell<HashMap<String, ProbeOutcome>>,
}

impl<P: DockerProbe> CachingProbe<P> {
    pub fn new(inner: P) -> Self {
        Self { inner, cache: RefCell::new(HashMap::new()) }
    }
}

impl<P: DockerProbe> DockerProbe for CachingProbe<P> {
    fn probe_once(&self, image: &str) -> ProbeOutcome {
        if let Some(outcome) = self.cache.borrow().get(image) {
            return *outcome;
        }
        let outcome = self.inner.probe_once(image);
        self.cache.borrow_mut().insert(image.to_string(), outcome);
        outcome
    }
}

/// Check a list of referenced container images (spec.md §4.7): a bounded
/// 3-attempt retry absorbs transient `DaemonUnavailable` results;
/// authentication failures are never a failure; a genuine `Missing` image
/// is a warning, never an error, unless the daemon was unreachable the
/// whole time and `strict_requires_docker` is set.
pub fn check_docker_images(images: &[String], probe: &dyn DockerProbe, strict_requires_docker: bool) -> Result<Vec<Warning>, CompileError> {
    let mut warnings = Vec::new();
    for image in images {
        let mut outcome = probe.probe_once(image);
        let mut attempts = 1;
        while outcome == ProbeOutcome::DaemonUnavailable && attempts < 3 {
            outcome = probe.probe_once(image);
            attempts += 1;
        }
        match outcome {
            ProbeOutcome::Present | ProbeOutcome::AuthRequired => {}
            ProbeOutcome::Missing => {
                warnings.push(Warning::new("sandbox.mcp", format!("docker image '{image}' does not appear to exist")));
            }
            ProbeOutcome::DaemonUnavailable => {
                if strict_requires_docker {
                    return Err(CompileError::new(
                        ErrorKind::DockerImageMissing,
                        "sandbox.mcp",
                        format!("no Docker daemon available to verify image '{image}' and the selected engine requires it"),
                    ));
                }
                warnings.push(Warning::new("sandbox.mcp", format!("Docker daemon unavailable; could not verify image '{image}'")));
            }
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_secret_refs_catches_nested_boolean_forms() {
        assert_eq!(find_secret_refs("${{ a && secrets.API_KEY }}"), vec!["secrets.API_KEY"]);
        assert_eq!(find_secret_refs("${{ !secrets.X }}"), vec!["secrets.X"]);
        assert_eq!(find_secret_refs("${{ (a || secrets.Y) }}"), vec!["secrets.Y"]);
        assert!(find_secret_refs("${{ github.event.name }}").is_empty());
    }

    #[test]
    fn check_env_secrets_strict_fails() {
        let env = vec![("API_KEY".to_string(), "${{ secrets.API_KEY }}".to_string())];
        let err = check_env_secrets("env", &env, &[], true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SecretsInEnv);
    }

    #[test]
    fn check_env_secrets_non_strict_warns() {
        let env = vec![("API_KEY".to_string(), "${{ secrets.API_KEY }}".to_string())];
        let warnings = check_env_secrets("env", &env, &[], false).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn check_env_secrets_allows_engine_token_override() {
        let env = vec![("GH_AW_GITHUB_TOKEN".to_string(), "${{ secrets.CUSTOM_TOKEN }}".to_string())];
        let warnings = check_env_secrets("engine.env", &env, &["GH_AW_GITHUB_TOKEN"], true).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn resolve_roles_defaults() {
        assert_eq!(resolve_roles(None).unwrap(), vec!["admin", "maintainer", "write"]);
    }

    #[test]
    fn resolve_roles_accepts_all() {
        assert_eq!(resolve_roles(Some(&Value::Str("all".to_string()))).unwrap(), vec!["all"]);
    }

    #[test]
    fn sandbox_agent_true_is_rejected() {
        let err = validate_sandbox_agent(Some(&Value::Bool(true))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SandboxAgentTrue);
    }

    #[test]
    fn sandbox_agent_false_is_ok() {
        assert!(validate_sandbox_agent(Some(&Value::Bool(false))).is_ok());
    }

    #[test]
    fn sandbox_agent_null_is_rejected_same_as_true() {
        let err = validate_sandbox_agent(Some(&Value::Null)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SandboxAgentTrue);
    }

    #[test]
    fn mount_requires_three_parts_and_known_mode() {
        assert!(validate_mount("src:dst:ro", "sandbox.mounts[0]").is_ok());
        assert!(validate_mount("src:dst", "sandbox.mounts[0]").is_err());
        assert!(validate_mount("src:dst:bogus", "sandbox.mounts[0]").is_err());
    }

    #[test]
    fn docker_probe_retries_on_daemon_unavailable_then_succeeds() {
        struct FlakyProbe(RefCell<u32>);
        impl DockerProbe for FlakyProbe {
            fn probe_once(&self, _image: &str) -> ProbeOutcome {
                let mut count = self.0.borrow_mut();
                *count += 1;
                if *count < 3 {
                    ProbeOutcome::DaemonUnavailable
                } else {
                    ProbeOutcome::Present
                }
            }
        }
        let probe = FlakyProbe(RefCell::new(0));
        let warnings = check_docker_images(&["ghcr.io/x/y".to_string()], &probe, false).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn docker_probe_missing_is_a_warning_not_an_error() {
        struct MissingProbe;
        impl DockerProbe for MissingProbe {
            fn probe_once(&self, _image: &str) -> ProbeOutcome {
                ProbeOutcome::Missing
            }
        }
        let warnings = check_docker_images(&["ghcr.io/x/y".to_string()], &MissingProbe, true).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn docker_daemon_unavailable_strict_requires_docker_fails() {
        struct AlwaysDown;
        impl DockerProbe for AlwaysDown {
            fn probe_once(&self, _image: &str) -> ProbeOutcome {
                ProbeOutcome::DaemonUnavailable
            }
        }
        let err = check_docker_images(&["ghcr.io/x/y".to_string()], &AlwaysDown, true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DockerImageMissing);
    }

    #[test]
    fn caching_probe_calls_inner_once_per_image() {
        struct CountingProbe(RefCell<u32>);
        impl DockerProbe for CountingProbe {
            fn probe_once(&self, _image: &str) -> ProbeOutcome {
                *self.0.borrow_mut() += 1;
                ProbeOutcome::Present
            }
        }
        let probe = CachingProbe::new(CountingProbe(RefCell::new(0)));
        probe.probe_once("x");
        probe.probe_once("x");
        assert_eq!(*probe.inner.0.borrow(), 1);
    }
}
