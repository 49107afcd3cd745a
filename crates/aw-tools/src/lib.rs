//! Neutral tool names, engine capability matrix, and runtime setup-step
//! synthesis (spec.md §4.3).
//!
//! The engine table is static data loaded once through a `OnceLock`.

use aw_ids::{EngineId, RuntimeId};
use aw_types::{Value, Warning};
use std::sync::OnceLock;

/// Which fallback chain (§6) an engine's default tool token resolves
/// through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    DefaultTool,
    SafeOutput,
    CopilotRequest,
    AgentAssignment,
    Project,
}

pub fn token_fallback_chain(purpose: TokenPurpose) -> &'static [&'static str] {
    match purpose {
        TokenPurpose::DefaultTool => &["GH_AW_GITHUB_MCP_SERVER_TOKEN", "GH_AW_GITHUB_TOKEN", "GITHUB_TOKEN"],
        TokenPurpose::SafeOutput => &["GH_AW_GITHUB_TOKEN", "GITHUB_TOKEN"],
        TokenPurpose::CopilotRequest => &["COPILOT_GITHUB_TOKEN"],
        TokenPurpose::AgentAssignment => &["GH_AW_AGENT_TOKEN", "GH_AW_GITHUB_TOKEN", "GITHUB_TOKEN"],
        TokenPurpose::Project => &["GH_AW_PROJECT_GITHUB_TOKEN"],
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineCapabilities {
    pub default_tools_remote: &'static [&'static str],
    pub default_tools_local: &'static [&'static str],
    pub supports_tool_allowlist: bool,
    pub supports_http_mcp: bool,
    pub supports_max_turns: bool,
    pub supports_web_search: bool,
    pub default_tool_token: TokenPurpose,
}

struct EngineEntry {
    id: EngineId,
    caps: EngineCapabilities,
}

static ENGINE_REGISTRY: OnceLock<Vec<EngineEntry>> = OnceLock::new();

fn registry() -> &'static [EngineEntry] {
    ENGINE_REGISTRY
        .get_or_init(|| {
            vec![
                EngineEntry {
                    id: EngineId::Claude,
                    caps: EngineCapabilities {
                        default_tools_remote: &["github"],
                        default_tools_local: &["github"],
                        supports_tool_allowlist: true,
                        supports_http_mcp: true,
                        supports_max_turns: true,
                        supports_web_search: true,
                        default_tool_token: TokenPurpose::DefaultTool,
                    },
                },
                EngineEntry {
                    id: EngineId::Codex,
                    caps: EngineCapabilities {
                        default_tools_remote: &["github"],
                        default_tools_local: &["github"],
                        supports_tool_allowlist: true,
                        supports_http_mcp: true,
                        supports_max_turns: true,
                        supports_web_search: false,
                        default_tool_token: TokenPurpose::DefaultTool,
                    },
                },
                EngineEntry {
                    id: EngineId::Copilot,
                    caps: EngineCapabilities {
                        default_tools_remote: &["github"],
                        default_tools_local: &["github"],
                        supports_tool_allowlist: true,
                        supports_http_mcp: true,
                        supports_max_turns: false,
                        supports_web_search: true,
                        default_tool_token: TokenPurpose::CopilotRequest,
                    },
                },
                EngineEntry {
                    id: EngineId::Custom,
                    caps: EngineCapabilities {
                        default_tools_remote: &["github"],
                        default_tools_local: &["github"],
                        supports_tool_allowlist: false,
                        supports_http_mcp: false,
                        supports_max_turns: false,
                        supports_web_search: false,
                        default_tool_token: TokenPurpose::DefaultTool,
                    },
                },
            ]
        })
        .as_slice()
}

pub fn capabilities(engine: EngineId) -> EngineCapabilities {
    registry()
        .iter()
        .find(|e| e.id == engine)
        .map(|e| e.caps)
        .expect("engine registry covers every EngineId variant")
}

/// The neutral tool vocabulary spec.md §4.3 names, before engine-specific
/// expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeutralTool {
    Bash,
    WebFetch,
    WebSearch,
    Edit,
    Playwright,
}

impl NeutralTool {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bash" => Some(NeutralTool::Bash),
            "web-fetch" => Some(NeutralTool::WebFetch),
            "web-search" => Some(NeutralTool::WebSearch),
            "edit" => Some(NeutralTool::Edit),
            "playwright" => Some(NeutralTool::Playwright),
            _ => None,
        }
    }

    /// Expand to the engine-specific tool identifier.
    pub fn expand(&self, engine: EngineId) -> &'static str {
        match (self, engine) {
            (NeutralTool::Bash, EngineId::Claude) => "Bash",
            (NeutralTool::Bash, _) => "bash",
            (NeutralTool::WebFetch, EngineId::Claude) => "WebFetch",
            (NeutralTool::WebFetch, _) => "web-fetch",
            (NeutralTool::WebSearch, EngineId::Claude) => "WebSearch",
            (NeutralTool::WebSearch, _) => "web-search",
            (NeutralTool::Edit, EngineId::Claude) => "Edit",
            (NeutralTool::Edit, _) => "edit",
            (NeutralTool::Playwright, _) => "playwright",
        }
    }
}

/// Result of resolving a frontmatter `tools` section against an engine's
/// capabilities.
pub struct ToolResolution {
    pub tools: Vec<(String, Value)>,
    pub warnings: Vec<Warning>,
}

/// Reads the declared `github.mode` out of a `tools` entry list, defaulting
/// to `"remote"` when the key is absent or its value isn't `"local"`
/// (spec.md §4.3: "default tool set, distinct for remote vs local GitHub MCP").
fn declared_github_mode(entries: &[(String, Value)]) -> &'static str {
    entries
        .iter()
        .find(|(name, _)| name == "github")
        .and_then(|(_, v)| v.as_map())
        .and_then(|m| m.iter().find(|(k, _)| k == "mode").and_then(|(_, v)| v.as_str()))
        .map(|mode| if mode == "local" { "local" } else { "remote" })
        .unwrap_or("remote")
}

fn default_tool_set(caps: &EngineCapabilities, mode: &str) -> &'static [&'static str] {
    if mode == "local" {
        caps.default_tools_local
    } else {
        caps.default_tools_remote
    }
}

/// Resolve the final tool set for an engine (spec.md §4.3, S4). Engines
/// without allowlist support discard any declared tools and fall back to
/// a single default `github` entry; otherwise declared tools are kept
/// (sorted by name) and a default set is injected only when none were
/// declared at all.
pub fn resolve_tools(entries: &[(String, Value)], engine: EngineId) -> ToolResolution {
    let caps = capabilities(engine);
    let github_mode = declared_github_mode(entries);

    if !caps.supports_tool_allowlist {
        let mut warnings = Vec::new();
        if !entries.is_empty() {
            warnings.push(Warning::new(
                "tools",
                format!(
                    "engine '{}' does not support a tool allowlist; declared tools are discarded and a single default 'github' tool is installed",
                    engine.as_str()
                ),
            ));
        }
        return ToolResolution {
            tools: vec![("github".to_string(), Value::Map(vec![("mode".to_string(), Value::Str(github_mode.to_string()))]))],
            warnings,
        };
    }

    let mut tools = if entries.is_empty() {
        default_tool_set(&caps, github_mode)
            .iter()
            .map(|name| (name.to_string(), Value::Null))
            .collect()
    } else {
        entries.to_vec()
    };
    tools.sort_by(|a, b| a.0.cmp(&b.0));
    ToolResolution { tools, warnings: Vec::new() }
}

/// A detected or declared runtime requirement, resolved into the setup
/// step the job graph builder will emit.
#[derive(Debug, Clone)]
pub struct RuntimeSetupStep {
    pub runtime: RuntimeId,
    pub uses: String,
    pub version: String,
    pub condition: Option<String>,
    pub emits_goroot_capture: bool,
}

pub fn default_action_for(runtime: RuntimeId) -> &'static str {
    match runtime {
        RuntimeId::Node => "./actions/setup-node",
        RuntimeId::Python => "./actions/setup-python",
        RuntimeId::Go => "./actions/setup-go",
        RuntimeId::Uv => "./actions/setup-uv",
        RuntimeId::Bun => "./actions/setup-bun",
        RuntimeId::Deno => "./actions/setup-deno",
    }
}

pub fn default_version_for(runtime: RuntimeId) -> &'static str {
    match runtime {
        RuntimeId::Node => "20",
        RuntimeId::Python => "3.12",
        RuntimeId::Go => "1.22",
        RuntimeId::Uv => "latest",
        RuntimeId::Bun => "latest",
        RuntimeId::Deno => "latest",
    }
}

/// Scan a shelled-out command string for a runtime-implying invocation
/// (`npx`, `uvx`, `go run`, `bunx`, `deno run`).
pub fn detect_from_command(command: &str) -> Option<RuntimeId> {
    if command.contains("npx") {
        Some(RuntimeId::Node)
    } else if command.contains("uvx") {
        Some(RuntimeId::Uv)
    } else if command.contains("go run") {
        Some(RuntimeId::Go)
    } else if command.contains("bunx") {
        Some(RuntimeId::Bun)
    } else if command.contains("deno run") {
        Some(RuntimeId::Deno)
    } else {
        None
    }
}

/// Build the ordered, deduplicated list of runtime setup steps from the
/// explicit `runtimes` declarations plus any detected requirements.
/// Runtimes are sorted (`RuntimeId`'s declared `Ord`) for determinism.
pub fn build_setup_steps(
    explicit: &[(String, Value)],
    detected: &[RuntimeId],
) -> Vec<RuntimeSetupStep> {
    let mut ids: Vec<RuntimeId> = Vec::new();
    for (k, _) in explicit {
        if let Some(id) = RuntimeId::parse(k) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    for id in detected {
        if !ids.contains(id) {
            ids.push(*id);
        }
    }
    ids.sort();

    ids.into_iter()
        .map(|id| {
            let descriptor = explicit.iter().find(|(k, _)| RuntimeId::parse(k) == Some(id)).map(|(_, v)| v);
            let version = descriptor
                .and_then(|d| d.get("version"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| default_version_for(id).to_string());
            let action_repo = descriptor.and_then(|d| d.get("action-repo")).and_then(Value::as_str);
            let action_version = descriptor.and_then(|d| d.get("action-version")).and_then(Value::as_str);
            let condition = descriptor.and_then(|d| d.get("if")).and_then(Value::as_str).map(str::to_string);

            let uses = match (action_repo, action_version) {
                (Some(repo), Some(ver)) => format!("{repo}@{ver}"),
                (Some(repo), None) => format!("{repo}@{}", default_version_for(id)),
                _ => default_action_for(id).to_string(),
            };

            RuntimeSetupStep {
                runtime: id,
                uses,
                version,
                condition,
                emits_goroot_capture: id == RuntimeId::Go,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_engine_has_no_allowlist() {
        assert!(!capabilities(EngineId::Custom).supports_tool_allowlist);
    }

    #[test]
    fn resolve_tools_drops_allowlist_for_custom_engine() {
        let entries = vec![("bash".to_string(), Value::List(vec![Value::Str("echo".into())]))];
        let resolution = resolve_tools(&entries, EngineId::Custom);
        assert_eq!(resolution.tools.len(), 1);
        assert_eq!(resolution.tools[0].0, "github");
        assert_eq!(resolution.warnings.len(), 1);
    }

    #[test]
    fn resolve_tools_keeps_declared_tools_sorted_for_capable_engine() {
        let entries = vec![
            ("github".to_string(), Value::Null),
            ("bash".to_string(), Value::List(vec![Value::Str("echo".into())])),
        ];
        let resolution = resolve_tools(&entries, EngineId::Claude);
        assert_eq!(resolution.tools[0].0, "bash");
        assert_eq!(resolution.tools[1].0, "github");
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn resolve_tools_threads_declared_github_mode_through_no_allowlist_fallback() {
        let entries = vec![("github".to_string(), Value::Map(vec![("mode".to_string(), Value::Str("local".to_string()))]))];
        let resolution = resolve_tools(&entries, EngineId::Custom);
        assert_eq!(resolution.tools.len(), 1);
        assert_eq!(resolution.tools[0].0, "github");
        let mode = resolution.tools[0].1.as_map().and_then(|m| m.iter().find(|(k, _)| k == "mode")).and_then(|(_, v)| v.as_str());
        assert_eq!(mode, Some("local"));
    }

    #[test]
    fn neutral_tool_expands_per_engine() {
        assert_eq!(NeutralTool::Bash.expand(EngineId::Claude), "Bash");
        assert_eq!(NeutralTool::Bash.expand(EngineId::Codex), "bash");
    }

    #[test]
    fn detect_from_command_recognizes_npx_and_uvx() {
        assert_eq!(detect_from_command("npx playwright install"), Some(RuntimeId::Node));
        assert_eq!(detect_from_command("uvx ruff check"), Some(RuntimeId::Uv));
        assert_eq!(detect_from_command("echo hi"), None);
    }

    #[test]
    fn build_setup_steps_dedupes_and_sorts() {
        let explicit = vec![("python".to_string(), Value::Map(vec![("version".into(), Value::Str("3.11".into()))]))];
        let detected = vec![RuntimeId::Node, RuntimeId::Python];
        let steps = build_setup_steps(&explicit, &detected);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].runtime, RuntimeId::Node);
        assert_eq!(steps[1].runtime, RuntimeId::Python);
        assert_eq!(steps[1].version, "3.11");
    }

    #[test]
    fn go_runtime_emits_goroot_capture() {
        let steps = build_setup_steps(&[], &[RuntimeId::Go]);
        assert!(steps[0].emits_goroot_capture);
    }
}
