//! The orchestrator (spec.md §4.12): the one pass that sequences every
//! other crate in this workspace into a single `compile()` entry point.
//!
//! `parse → validate-phase-1 → merge-imports → expand-includes →
//! extract-tools/runtimes/safe-outputs → validate-phase-2 →
//! apply-defaults → build-job-graph → step-order-check → emit`. The first
//! error from any stage is returned immediately; no partial output is ever
//! produced (spec.md §4.12, §5: the lock file is built in memory and
//! returned only on `Ok`).

use aw_ids::RuntimeId;
use aw_imports::{expand_includes, resolve_imports, split_frontmatter, FileLoader, FsLoader};
use aw_jobgraph::{build_job_graph, JobGraphInput};
use aw_permissions::{PermissionScope, PermissionSet, ScopeRequirement};
use aw_pin::ActionPinner;
use aw_safeoutputs::{parse_safe_outputs, SafeOutputKind};
use aw_tools::{build_setup_steps, capabilities, detect_from_command, resolve_tools};
use aw_types::{CompileError, ErrorKind, FrontmatterConfig, PermLevel, PermissionsDecl, Value, Warning};
use aw_validate::{
    check_docker_images, check_env_secrets, deprecated_roles_warning, resolve_roles,
    sandbox_requires_mcp_warning, validate_http_mcp_support, validate_max_turns_support,
    validate_mount, validate_sandbox_agent, validate_timeout, DockerProbe, NullProbe,
};
use aw_yaml::{emit, WorkflowDocument};
use std::path::{Path, PathBuf};

/// Release vs. dev action-reference pinning (spec.md §4.5).
pub use aw_pin::Mode;

/// Everything the caller controls about a single compile; fields not
/// sourced from the header itself (spec.md §6 CLI shell contract).
pub struct CompileOptions {
    pub mode: Mode,
    /// `--strict`; ORed with the header's own `strict: true`.
    pub strict_flag: bool,
    /// `--action-tag`; highest-precedence source in the tag chain
    /// (spec.md §4.5).
    pub action_tag_flag: Option<String>,
    /// The compiler's own version string, the lowest-precedence tag
    /// source and also the `PinResolutionFailed`-on-`dev`/empty check.
    pub compiler_version: String,
    pub runs_on: String,
    pub default_timeout_minutes: i64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Dev,
            strict_flag: false,
            action_tag_flag: None,
            compiler_version: env!("CARGO_PKG_VERSION").to_string(),
            runs_on: "ubuntu-latest".to_string(),
            default_timeout_minutes: 30,
        }
    }
}

/// The successful result of a compile: the lock-file text plus every
/// non-fatal warning accumulated along the way (spec.md §7).
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub yaml: String,
    pub warnings: Vec<Warning>,
}

/// Compile a source document's text. `base_dir` anchors `@include(...)`
/// and `imports:` path resolution (spec.md §6: "relative to the source
/// file's directory"). `loader` and `docker_probe` are the two injected
/// collaborators this crate never bypasses (Design Notes §9).
pub fn compile(
    source: &str,
    base_dir: &Path,
    opts: &CompileOptions,
    loader: &dyn FileLoader,
    docker_probe: &dyn DockerProbe,
) -> Result<CompileOutput, CompileError> {
    let mut warnings: Vec<Warning> = Vec::new();

    // --- parse ---
    let (header_text, body_text) = split_frontmatter(source);
    let raw_header = parse_header_value(&header_text)?;
    let main_cfg = FrontmatterConfig::from_value(&raw_header)?;

    // --- merge-imports ---
    let import_result = resolve_imports(&raw_header, &main_cfg.imports, base_dir, loader)?;
    let merged_cfg = FrontmatterConfig::from_value(&import_result.merged_header)?;

    let strict = merged_cfg.strict || opts.strict_flag;

    if let Some(w) = deprecated_roles_warning(&merged_cfg.deprecated_roles) {
        warnings.push(w);
    }

    // --- expand-includes ---
    let mut body = String::new();
    if !import_result.body_prefix.is_empty() {
        body.push_str(&import_result.body_prefix);
        body.push('\n');
    }
    for path in &import_result.runtime_macros {
        body.push_str(&format!("{{{{#runtime-import {path}}}}}\n"));
    }
    body.push_str(&expand_includes(&body_text, base_dir, loader)?);

    // --- validate-phase-2 (post-merge semantic checks) ---
    let caps = capabilities(merged_cfg.engine.id);

    validate_max_turns_support(merged_cfg.engine.id, &caps, merged_cfg.engine.max_turns)?;

    let engine_token_vars: Vec<&str> = aw_tools::token_fallback_chain(caps.default_tool_token).to_vec();
    warnings.extend(check_env_secrets("env", &merged_cfg.env, &engine_token_vars, strict)?);
    warnings.extend(check_env_secrets("engine.env", &merged_cfg.engine.env, &engine_token_vars, strict)?);

    validate_sandbox_agent(merged_cfg.sandbox.as_ref().and_then(|s| s.get("agent")))?;
    let mcp_server_count = merged_cfg.mcp_servers.len();
    let sandbox_agent_enabled = merged_cfg
        .sandbox
        .as_ref()
        .and_then(|s| s.get("agent"))
        .map(|v| !matches!(v, Value::Bool(false)))
        .unwrap_or(false);
    if let Some(w) = sandbox_requires_mcp_warning(sandbox_agent_enabled, mcp_server_count) {
        warnings.push(w);
    }

    if let Some(mounts) = merged_cfg.sandbox.as_ref().and_then(|s| s.get("mounts")).and_then(Value::as_list) {
        for (idx, mount) in mounts.iter().enumerate() {
            if let Some(spec) = mount.as_str() {
                validate_mount(spec, &format!("sandbox.mounts[{idx}]"))?;
            }
        }
    }

    validate_timeout(merged_cfg.tools.timeout, "tools.timeout")?;
    validate_timeout(merged_cfg.tools.startup_timeout, "tools.startup-timeout")?;

    for (key, _) in &merged_cfg.runtimes {
        if RuntimeId::parse(key).is_none() {
            let msg = format!("'{key}' is not a recognized runtime id");
            if strict {
                return Err(CompileError::new(ErrorKind::UnknownRuntime, format!("runtimes.{key}"), msg));
            }
            warnings.push(Warning::new(format!("runtimes.{key}"), msg));
        }
    }

    let uses_http_transport = merged_cfg
        .mcp_servers
        .iter()
        .any(|(_, v)| matches!(v.get("transport").and_then(Value::as_str), Some("http")) || v.get("url").is_some());
    validate_http_mcp_support(&caps, uses_http_transport, "mcp-servers")?;

    let docker_images = collect_docker_images(&merged_cfg.mcp_servers);
    let strict_requires_docker = strict && sandbox_agent_enabled;
    warnings.extend(check_docker_images(&docker_images, docker_probe, strict_requires_docker)?);

    // --- extract tools / runtimes / safe-outputs ---
    let tool_resolution = resolve_tools(&merged_cfg.tools.entries, merged_cfg.engine.id);
    warnings.extend(tool_resolution.warnings);

    let mut detected_runtimes: Vec<RuntimeId> = Vec::new();
    for (_, value) in &merged_cfg.mcp_servers {
        if let Some(command) = value.get("command").and_then(Value::as_str) {
            if let Some(rt) = detect_from_command(command) {
                if !detected_runtimes.contains(&rt) {
                    detected_runtimes.push(rt);
                }
            }
        }
    }
    for (_, value) in &tool_resolution.tools {
        if let Some(command) = value.get("command").and_then(Value::as_str) {
            if let Some(rt) = detect_from_command(command) {
                if !detected_runtimes.contains(&rt) {
                    detected_runtimes.push(rt);
                }
            }
        }
    }
    let runtime_steps = build_setup_steps(&merged_cfg.runtimes, &detected_runtimes);

    let safe_outputs_raw = merged_cfg.safe_outputs.clone().unwrap_or(Value::Null);
    let enabled_safe_outputs = parse_safe_outputs(&safe_outputs_raw)?;
    // spec.md §4.4 point 5: every static kind enabled must resolve to a
    // schema entry (dynamic kinds are exempt). `filter_and_enhance`
    // performs this check internally and returns `CompilerBug` on a gap.
    aw_safeoutputs::filter_and_enhance(&enabled_safe_outputs)?;

    let threat_detection_enabled = match &merged_cfg.threat_detection {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Map(_)) => true,
        Some(Value::Null) => true,
        Some(_) => false,
    };

    let cache_memory_configured = merged_cfg.tools.entries.iter().any(|(k, _)| k == "cache-memory");
    let upload_asset_configured = enabled_safe_outputs.iter().any(|(k, _)| matches!(k, SafeOutputKind::UploadAsset));
    let lock_for_agent = match safe_outputs_raw.get("lock-for-agent") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) => true,
        _ => false,
    };
    let add_comment_already_commented = enabled_safe_outputs.iter().any(|(k, _)| matches!(k, SafeOutputKind::AddComment));
    let safe_outputs_need_activation_outputs = enabled_safe_outputs
        .iter()
        .any(|(k, _)| matches!(k, SafeOutputKind::AddComment | SafeOutputKind::CreateIssue | SafeOutputKind::CloseIssue | SafeOutputKind::UpdateIssue));

    let has_pre_activation_check = main_cfg_has_query(&merged_cfg.skip_if_match);

    _ = resolve_roles(merged_cfg.on.get("roles"))?;

    // --- apply-defaults / action pinning ---
    let feature_action_tag = merged_cfg.to_map().get("features").and_then(|f| f.get("action-tag")).and_then(Value::as_str).map(str::to_string);
    let tag = aw_pin::resolve_tag(opts.action_tag_flag.as_deref(), feature_action_tag.as_deref(), &opts.compiler_version)?;
    let pinner = ActionPinner::new(opts.mode, tag);

    // --- build-job-graph (includes the step-ordering guard) ---
    let needs_checkout = matches!(opts.mode, Mode::Dev)
        || enabled_safe_outputs
            .iter()
            .any(|(k, _)| matches!(k, SafeOutputKind::CreatePullRequest | SafeOutputKind::PushToPullRequestBranch));

    let safe_output_kinds: Vec<SafeOutputKind> = enabled_safe_outputs.iter().map(|(k, _)| k.clone()).collect();

    let job_input = JobGraphInput {
        runs_on: opts.runs_on.clone(),
        has_pre_activation_check,
        threat_detection_enabled,
        safe_output_kinds,
        safe_outputs_need_activation_outputs,
        upload_asset_configured,
        cache_memory_configured,
        lock_for_agent,
        add_comment_already_commented,
        runtime_setup_steps: runtime_steps,
        agent_run_command: agent_run_command(&merged_cfg, &tool_resolution.tools),
        default_timeout_minutes: opts.default_timeout_minutes,
        footer_enabled: merged_cfg.footer,
    };
    let mut jobs = build_job_graph(&job_input)?;

    for job in &mut jobs {
        for step in &mut job.steps {
            if let Some(uses) = &step.uses {
                if uses.starts_with("./actions/") {
                    step.uses = Some(pinner.pin(uses, strict)?);
                }
            }
        }
    }

    // --- permissions (top level) ---
    let top_level_permissions = resolve_top_level_permissions(&merged_cfg, &enabled_safe_outputs, needs_checkout)?;

    // --- emit ---
    let doc = WorkflowDocument {
        name: merged_cfg.name.clone().unwrap_or_else(|| "Agentic Workflow".to_string()),
        on: merged_cfg.on.clone(),
        permissions: top_level_permissions,
        concurrency: None,
        run_name: None,
        env: merged_cfg.env.clone(),
        jobs,
    };
    let _ = &body; // body is reserved for the agent job's prompt payload; the
                   // step builders that consume it live outside this crate's
                   // scope (spec.md §1 non-goals: runtime helper scripts).

    Ok(CompileOutput { yaml: emit(&doc), warnings })
}

fn parse_header_value(header_text: &str) -> Result<Value, CompileError> {
    if header_text.trim().is_empty() {
        return Ok(Value::Map(Vec::new()));
    }
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(header_text).map_err(|e| CompileError::malformed_header("<root>", format!("header is not valid YAML: {e}")))?;
    Value::from_yaml(&yaml).map_err(|e| CompileError::malformed_header("<root>", e))
}

fn main_cfg_has_query(skip_if_match: &Option<Value>) -> bool {
    matches!(skip_if_match, Some(v) if v.get("query").is_some())
}

fn collect_docker_images(mcp_servers: &[(String, Value)]) -> Vec<String> {
    let mut images = Vec::new();
    for (_, value) in mcp_servers {
        if let Some(image) = value.get("container").and_then(Value::as_str) {
            images.push(image.to_string());
        }
    }
    images
}

fn agent_run_command(cfg: &FrontmatterConfig, tools: &[(String, Value)]) -> String {
    let entries: Vec<String> = tools
        .iter()
        .map(|(name, value)| match value.as_list() {
            Some(items) => {
                let rendered: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                format!("{name}:{}", rendered.join("|"))
            }
            None => name.clone(),
        })
        .collect();
    let tool_summary = entries.join(",");
    match &cfg.engine.model {
        Some(model) => format!("echo 'invoking {} engine (model={model}, tools={tool_summary})'", cfg.engine.id),
        None => format!("echo 'invoking {} engine (tools={tool_summary})'", cfg.engine.id),
    }
}

fn resolve_top_level_permissions(
    cfg: &FrontmatterConfig,
    enabled_safe_outputs: &[(SafeOutputKind, aw_safeoutputs::SafeOutputConfig)],
    needs_checkout: bool,
) -> Result<PermissionSet, CompileError> {
    match &cfg.permissions {
        Some(PermissionsDecl::Detailed(entries)) => {
            let mut requirements = Vec::with_capacity(entries.len());
            for (scope, level) in entries {
                let scope = PermissionScope::parse(scope, &format!("permissions.{scope}"))?;
                requirements.push(ScopeRequirement::new(scope, *level));
            }
            Ok(PermissionSet::compute(&requirements, needs_checkout))
        }
        Some(PermissionsDecl::Shorthand(s)) => Ok(shorthand_permission_set(s, needs_checkout)),
        None => Ok(aw_safeoutputs::compute_permissions(enabled_safe_outputs, needs_checkout)),
    }
}

fn shorthand_permission_set(shorthand: &str, needs_checkout: bool) -> PermissionSet {
    let level = match shorthand {
        "write-all" | "write" => PermLevel::Write,
        "read-all" | "read" => PermLevel::Read,
        _ => PermLevel::None,
    };
    let requirements: Vec<ScopeRequirement> = if level == PermLevel::None {
        Vec::new()
    } else {
        aw_permissions::ALL_SCOPES.iter().map(|s| ScopeRequirement::new(*s, level)).collect()
    };
    PermissionSet::compute(&requirements, needs_checkout)
}

/// A default-filesystem loader plus a docker probe that always reports
/// presence, bundled for callers (the CLI shell) that don't need to
/// inject test doubles.
pub fn default_loader() -> FsLoader {
    FsLoader
}

pub fn default_docker_probe() -> NullProbe {
    NullProbe
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapLoader(HashMap<PathBuf, String>);

    impl FileLoader for MapLoader {
        fn read(&self, path: &Path) -> Result<String, CompileError> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| CompileError::new(ErrorKind::ImportNotFound, path.display().to_string(), "not found"))
        }
    }

    fn empty_loader() -> MapLoader {
        MapLoader(HashMap::new())
    }

    // S1: minimal workflow compiles with activation + agent, no safe_outputs job.
    #[test]
    fn s1_minimal_compiles() {
        let source = "---\non: push\nengine: copilot\ntools:\n  bash: [echo]\n  github:\n    mode: remote\n---\n# Test\n";
        let out = compile(source, Path::new(""), &CompileOptions::default(), &empty_loader(), &NullProbe).unwrap();
        assert!(out.yaml.contains("activation:"));
        assert!(out.yaml.contains("agent:"));
        assert!(!out.yaml.contains("safe_outputs:"));
        // the step id the activation job's own declared outputs (and the
        // agent job's gating `if:`) read from must actually be emitted.
        assert!(out.yaml.contains("id: activation") || out.yaml.contains("id: \"activation\""));
    }

    // S3: non-numeric tools.timeout is InvalidTimeout.
    #[test]
    fn s3_invalid_timeout() {
        let source = "---\non: push\ntools:\n  timeout: not-a-number\n---\nbody\n";
        let err = compile(source, Path::new(""), &CompileOptions::default(), &empty_loader(), &NullProbe).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTimeout);
        assert!(err.hint.contains("timeout"));
    }

    // S4: an engine without allowlist support drops declared tools to a single default.
    #[test]
    fn s4_custom_engine_drops_tools() {
        let source = "---\non: push\nengine: custom\ntools:\n  bash: [echo]\n---\nbody\n";
        let out = compile(source, Path::new(""), &CompileOptions::default(), &empty_loader(), &NullProbe).unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("github"));
    }

    // S5: object-form skip-if-match produces a pre_activation job.
    #[test]
    fn s5_skip_if_match_object_form_adds_pre_activation() {
        let source = "---\non: push\nskip-if-match:\n  query: \"is:pr is:open\"\n  max: 3\n---\nbody\n";
        let out = compile(source, Path::new(""), &CompileOptions::default(), &empty_loader(), &NullProbe).unwrap();
        assert!(out.yaml.contains("pre_activation:"));
    }

    // S6: strict mode + a secret in env is a fatal SecretsInEnv.
    #[test]
    fn s6_strict_env_secret_leak() {
        let source = "---\non: push\nstrict: true\nenv:\n  API_KEY: \"${{ secrets.API_KEY }}\"\n---\nbody\n";
        let err = compile(source, Path::new(""), &CompileOptions::default(), &empty_loader(), &NullProbe).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SecretsInEnv);
    }

    // S7: sandbox.agent: false compiles fine in non-strict mode without an
    // MCP server, and the MCP gateway step is still present (the gateway
    // is always enabled regardless of the firewall/sandbox setting).
    #[test]
    fn s7_sandbox_agent_false_is_fine_without_mcp() {
        let source = "---\non: push\nsandbox:\n  agent: false\n---\nbody\n";
        let out = compile(source, Path::new(""), &CompileOptions::default(), &empty_loader(), &NullProbe).unwrap();
        assert!(out.warnings.is_empty());
        assert!(out.yaml.contains("mcp-gateway"));
    }

    // S9: release-mode action pinning emits a 40-hex digest and trailing tag comment.
    #[test]
    fn s9_release_mode_pins_actions() {
        let source = "---\non: push\nruntimes:\n  node:\n    version: \"20\"\n---\nbody\n";
        let mut opts = CompileOptions::default();
        opts.mode = Mode::Release;
        opts.action_tag_flag = Some("v1.0.0".to_string());
        let out = compile(source, Path::new(""), &opts, &empty_loader(), &NullProbe).unwrap();
        assert!(out.yaml.contains("@a94f33749c2bc6b2dff5b35bfc1ea44cb4d42c82 # v1.0.0"));
        assert!(out.yaml.contains("@d3c2b1a0e9f8d7c6b5a4938271605948372615af # v1.0.0"));
    }

    // S10: an inputs-bearing import substitutes its body and leaves no runtime macro.
    #[test]
    fn s10_import_with_inputs_substitutes_body() {
        let mut files = HashMap::new();
        files.insert(
            PathBuf::from("shared.md"),
            "---\n---\nUse ${{ github.aw.inputs.count }} items.\n".to_string(),
        );
        let loader = MapLoader(files);
        let source = "---\non: push\nimports:\n  - path: shared.md\n    inputs:\n      count: 50\n---\nmain body\n";
        let out = compile(source, Path::new(""), &CompileOptions::default(), &loader, &NullProbe).unwrap();
        // body isn't emitted into the lock file directly (it's consumed by
        // the agent's prompt payload, out of this crate's scope), but the
        // compile must still succeed deterministically with no leftover
        // unsubstituted marker or macro.
        assert!(out.yaml.contains("agent:"));
    }

    #[test]
    fn deterministic_output_for_identical_input() {
        let source = "---\non: push\nengine: copilot\n---\nbody\n";
        let a = compile(source, Path::new(""), &CompileOptions::default(), &empty_loader(), &NullProbe).unwrap();
        let b = compile(source, Path::new(""), &CompileOptions::default(), &empty_loader(), &NullProbe).unwrap();
        assert_eq!(a.yaml, b.yaml);
    }
}
