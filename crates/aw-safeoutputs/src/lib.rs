//! Safe-output taxonomy, tool-schema filtering/enhancement, and permission
//! computation (spec.md §4.4).
//!
//! Modeled as Design Notes §9 directs: a tagged variant keyed by
//! output-name, each carrying only the config fields relevant to that
//! variant, rather than one wide record with fields that are only valid
//! for some outputs.

use aw_ids::is_valid_job_name;
use aw_permissions::{PermissionScope, PermissionSet, ScopeRequirement};
use aw_types::{null_policy, CompileError, PermLevel, Value};
use serde_json::json;
use std::sync::OnceLock;

/// The full safe-output taxonomy: thirteen statically schema-backed kinds
/// plus the two dynamically generated ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeOutputKind {
    CreateIssue,
    AddComment,
    CreateDiscussion,
    UpdateIssue,
    CloseIssue,
    CreatePullRequest,
    PushToPullRequestBranch,
    AddLabels,
    CreatePullRequestReviewComment,
    UploadAsset,
    MissingTool,
    CreateAgentSession,
    AssignToAgent,
    CustomJob(String),
    DispatchWorkflow(String),
}

impl SafeOutputKind {
    /// The static tool name this kind is exposed to the model as; for the
    /// two dynamic kinds this is the author-chosen job/workflow name.
    pub fn tool_name(&self) -> &str {
        match self {
            SafeOutputKind::CreateIssue => "create_issue",
            SafeOutputKind::AddComment => "add_comment",
            SafeOutputKind::CreateDiscussion => "create_discussion",
            SafeOutputKind::UpdateIssue => "update_issue",
            SafeOutputKind::CloseIssue => "close_issue",
            SafeOutputKind::CreatePullRequest => "create_pull_request",
            SafeOutputKind::PushToPullRequestBranch => "push_to_pull_request_branch",
            SafeOutputKind::AddLabels => "add_labels",
            SafeOutputKind::CreatePullRequestReviewComment => "create_pull_request_review_comment",
            SafeOutputKind::UploadAsset => "upload_asset",
            SafeOutputKind::MissingTool => "missing_tool",
            SafeOutputKind::CreateAgentSession => "create_agent_session",
            SafeOutputKind::AssignToAgent => "assign_to_agent",
            SafeOutputKind::CustomJob(name) => name,
            SafeOutputKind::DispatchWorkflow(name) => name,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, SafeOutputKind::CustomJob(_) | SafeOutputKind::DispatchWorkflow(_))
    }

    fn header_key(name: &str) -> Result<Self, CompileError> {
        Ok(match name {
            "create_issue" => SafeOutputKind::CreateIssue,
            "add_comment" => SafeOutputKind::AddComment,
            "create_discussion" => SafeOutputKind::CreateDiscussion,
            "update_issue" => SafeOutputKind::UpdateIssue,
            "close_issue" => SafeOutputKind::CloseIssue,
            "create_pull_request" => SafeOutputKind::CreatePullRequest,
            "push_to_pull_request_branch" => SafeOutputKind::PushToPullRequestBranch,
            "add_labels" => SafeOutputKind::AddLabels,
            "create_pull_request_review_comment" => SafeOutputKind::CreatePullRequestReviewComment,
            "upload_asset" => SafeOutputKind::UploadAsset,
            "missing_tool" => SafeOutputKind::MissingTool,
            "create_agent_session" => SafeOutputKind::CreateAgentSession,
            "assign_to_agent" => SafeOutputKind::AssignToAgent,
            other => {
                return Err(CompileError::malformed_header(
                    format!("safe-outputs.{other}"),
                    "not a recognized safe-output type",
                ))
            }
        })
    }

    /// Step order within the consolidated `safe_outputs` job: unified
    /// handler steps first, then copilot-assignment follow-ups, then
    /// assign-to-agent, then create-agent-session (spec.md §4.4).
    pub fn step_order_rank(&self) -> u8 {
        match self {
            SafeOutputKind::AssignToAgent => 2,
            SafeOutputKind::CreateAgentSession => 3,
            _ => 0,
        }
    }

    /// The least-privilege scope requirements this output contributes.
    pub fn scope_requirements(&self) -> Vec<ScopeRequirement> {
        match self {
            SafeOutputKind::CreateIssue
            | SafeOutputKind::UpdateIssue
            | SafeOutputKind::CloseIssue
            | SafeOutputKind::AddLabels
            | SafeOutputKind::AddComment
            | SafeOutputKind::AssignToAgent => {
                vec![ScopeRequirement::new(PermissionScope::Issues, PermLevel::Write)]
            }
            SafeOutputKind::CreateDiscussion => {
                vec![ScopeRequirement::new(PermissionScope::Discussions, PermLevel::Write)]
            }
            SafeOutputKind::CreatePullRequest | SafeOutputKind::PushToPullRequestBranch => vec![
                ScopeRequirement::new(PermissionScope::Contents, PermLevel::Write),
                ScopeRequirement::new(PermissionScope::PullRequests, PermLevel::Write),
            ],
            SafeOutputKind::CreatePullRequestReviewComment => {
                vec![ScopeRequirement::new(PermissionScope::PullRequests, PermLevel::Write)]
            }
            SafeOutputKind::UploadAsset => {
                vec![ScopeRequirement::new(PermissionScope::Contents, PermLevel::Write)]
            }
            SafeOutputKind::MissingTool => Vec::new(),
            SafeOutputKind::CreateAgentSession | SafeOutputKind::DispatchWorkflow(_) => {
                vec![ScopeRequirement::new(PermissionScope::Actions, PermLevel::Write)]
            }
            SafeOutputKind::CustomJob(_) => Vec::new(),
        }
    }
}

/// Per-kind configuration payload. Only the fields relevant to the kind
/// that produced it are populated.
#[derive(Debug, Clone, Default)]
pub struct SafeOutputConfig {
    pub max: Option<u32>,
    pub title_prefix: Option<String>,
    pub labels: Vec<String>,
    pub target_repo: Option<String>,
    pub allowed_repos: Vec<String>,
    pub draft: bool,
    pub target: Option<String>,
    pub agent: Option<String>,
    pub custom_job_inputs: Vec<JobInputSpec>,
}

fn parse_config(value: &Value) -> Result<SafeOutputConfig, CompileError> {
    let mut cfg = SafeOutputConfig::default();
    if value.is_null() {
        return Ok(cfg);
    }
    cfg.max = int_field(value, "max")?;
    cfg.title_prefix = value.get("title-prefix").and_then(Value::as_str).map(str::to_string);
    cfg.labels = string_list_field(value, "labels")?;
    cfg.labels.sort();
    cfg.target_repo = value.get("target-repo").and_then(Value::as_str).map(str::to_string);
    cfg.allowed_repos = string_list_field(value, "allowed-repos")?;
    cfg.allowed_repos.sort();
    cfg.draft = value.get("draft").and_then(Value::as_bool).unwrap_or(false);
    cfg.target = value.get("target").and_then(Value::as_str).map(str::to_string);
    cfg.agent = value.get("agent").and_then(Value::as_str).map(str::to_string);
    Ok(cfg)
}

fn int_field(value: &Value, key: &str) -> Result<Option<u32>, CompileError> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(i)) if *i >= 0 => Ok(Some(*i as u32)),
        Some(other) => Err(CompileError::malformed_header(key, format!("must be a non-negative integer, got {other:?}"))),
    }
}

fn string_list_field(value: &Value, key: &str) -> Result<Vec<String>, CompileError> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::List(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| CompileError::malformed_header(key, "list entries must be strings")))
            .collect(),
        Some(_) => Err(CompileError::malformed_header(key, "must be a list of strings")),
    }
}

/// One input on a custom safe-output job (spec.md §4.4 point 4).
#[derive(Debug, Clone)]
pub struct JobInputSpec {
    pub name: String,
    pub input_type: JobInputType,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub enum JobInputType {
    String,
    Number,
    Boolean,
    Choice(Vec<String>),
}

fn parse_job_inputs(job_spec: &Value) -> Result<Vec<JobInputSpec>, CompileError> {
    let inputs_map = match job_spec.get("inputs") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Map(entries)) => entries,
        Some(_) => return Err(CompileError::malformed_header("safe-outputs.jobs[].inputs", "must be a mapping")),
    };

    let mut out = Vec::new();
    for (name, descriptor) in inputs_map {
        let field_path = format!("safe-outputs.jobs.inputs.{name}");
        let type_str = descriptor.get("type").and_then(Value::as_str).unwrap_or("string");
        let input_type = match type_str {
            "string" => JobInputType::String,
            "number" => JobInputType::Number,
            "boolean" => JobInputType::Boolean,
            "choice" => {
                let options = string_list_field(descriptor, "options")?;
                JobInputType::Choice(options)
            }
            other => {
                return Err(CompileError::malformed_header(
                    field_path,
                    format!("unknown input type '{other}' (expected string/number/boolean/choice)"),
                ))
            }
        };
        out.push(JobInputSpec {
            name: name.clone(),
            input_type,
            description: descriptor.get("description").and_then(Value::as_str).map(str::to_string),
            default: descriptor.get("default").cloned(),
            required: descriptor.get("required").and_then(Value::as_bool).unwrap_or(false),
        });
    }
    Ok(out)
}

/// Parse the `safe-outputs` header section into the enabled kind/config
/// pairs, including dynamically declared custom jobs.
pub fn parse_safe_outputs(raw: &Value) -> Result<Vec<(SafeOutputKind, SafeOutputConfig)>, CompileError> {
    let map = match raw.as_map() {
        Some(m) => m,
        None => return Ok(Vec::new()),
    };

    let mut out = Vec::new();
    for (key, value) in map {
        if matches!(key.as_str(), "footer" | "threat-detection" | "jobs" | "lock-for-agent") {
            continue;
        }
        let field_path = format!("safe-outputs.{key}");
        let effective = if value.is_null() {
            if null_policy::allows_null(&field_path) {
                Value::Map(Vec::new())
            } else {
                return Err(CompileError::malformed_header(field_path, "null is not permitted here"));
            }
        } else {
            value.clone()
        };
        let kind = SafeOutputKind::header_key(key)?;
        let config = parse_config(&effective)?;
        out.push((kind, config));
    }

    if let Some(jobs) = map.iter().find(|(k, _)| k == "jobs").map(|(_, v)| v) {
        for (job_name, job_spec) in jobs.as_map().unwrap_or(&[]) {
            if !is_valid_job_name(job_name) {
                return Err(CompileError::malformed_header(format!("safe-outputs.jobs.{job_name}"), "must be a valid job identifier"));
            }
            let mut config = SafeOutputConfig::default();
            config.custom_job_inputs = parse_job_inputs(job_spec)?;
            out.push((SafeOutputKind::CustomJob(job_name.clone()), config));
        }
    }

    Ok(out)
}

/// A fully resolved tool descriptor ready for the pipeline's tool schema.
#[derive(Debug, Clone)]
pub struct EnhancedTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

struct StaticTool {
    name: &'static str,
    base_description: &'static str,
    base_schema: fn() -> serde_json::Value,
}

static STATIC_TOOLS: OnceLock<Vec<StaticTool>> = OnceLock::new();

fn static_tools() -> &'static [StaticTool] {
    STATIC_TOOLS.get_or_init(|| {
        vec![
            StaticTool { name: "create_issue", base_description: "Create a new issue", base_schema: || json!({"type":"object","properties":{"title":{"type":"string"},"body":{"type":"string"}},"required":["title","body"]}) },
            StaticTool { name: "add_comment", base_description: "Add a comment to an issue or pull request", base_schema: || json!({"type":"object","properties":{"body":{"type":"string"}},"required":["body"]}) },
            StaticTool { name: "create_discussion", base_description: "Create a new discussion", base_schema: || json!({"type":"object","properties":{"title":{"type":"string"},"body":{"type":"string"}},"required":["title","body"]}) },
            StaticTool { name: "update_issue", base_description: "Update an existing issue", base_schema: || json!({"type":"object","properties":{"issue_number":{"type":"number"}},"required":["issue_number"]}) },
            StaticTool { name: "close_issue", base_description: "Close an issue", base_schema: || json!({"type":"object","properties":{"issue_number":{"type":"number"}},"required":["issue_number"]}) },
            StaticTool { name: "create_pull_request", base_description: "Create a new pull request from the agent's patch", base_schema: || json!({"type":"object","properties":{"title":{"type":"string"},"body":{"type":"string"}},"required":["title","body"]}) },
            StaticTool { name: "push_to_pull_request_branch", base_description: "Push additional commits to the pull request branch", base_schema: || json!({"type":"object","properties":{"message":{"type":"string"}},"required":["message"]}) },
            StaticTool { name: "add_labels", base_description: "Add labels to an issue or pull request", base_schema: || json!({"type":"object","properties":{"labels":{"type":"array","items":{"type":"string"}}},"required":["labels"]}) },
            StaticTool { name: "create_pull_request_review_comment", base_description: "Add a review comment on a pull request", base_schema: || json!({"type":"object","properties":{"path":{"type":"string"},"line":{"type":"number"},"body":{"type":"string"}},"required":["path","line","body"]}) },
            StaticTool { name: "upload_asset", base_description: "Upload a build artifact to the orphan assets branch", base_schema: || json!({"type":"object","properties":{"path":{"type":"string"}},"required":["path"]}) },
            StaticTool { name: "missing_tool", base_description: "Report a tool the agent needed but was not available", base_schema: || json!({"type":"object","properties":{"tool":{"type":"string"},"reason":{"type":"string"}},"required":["tool","reason"]}) },
            StaticTool { name: "create_agent_session", base_description: "Start a follow-up coding agent session", base_schema: || json!({"type":"object","properties":{"prompt":{"type":"string"}},"required":["prompt"]}) },
            StaticTool { name: "assign_to_agent", base_description: "Assign the issue or pull request to a coding agent", base_schema: || json!({"type":"object","properties":{"agent":{"type":"string"}},"required":["agent"]}) },
        ]
    })
}

/// Filter the static tool list by the enabled kinds, enhance descriptions
/// with config-derived constraints, and add a `repo` property when the
/// config grants cross-repo access (spec.md §4.4 points 1-3, S8).
pub fn filter_and_enhance(enabled: &[(SafeOutputKind, SafeOutputConfig)]) -> Result<Vec<EnhancedTool>, CompileError> {
    let mut out = Vec::new();
    for (kind, config) in enabled {
        if kind.is_dynamic() {
            continue;
        }
        let base = static_tools()
            .iter()
            .find(|t| t.name == kind.tool_name())
            .ok_or_else(|| {
                CompileError::compiler_bug(
                    format!("safe-outputs.{}", kind.tool_name()),
                    "enabled safe-output type has no static tool schema entry",
                )
            })?;

        let mut description = base.base_description.to_string();
        if let Some(max) = config.max {
            description.push_str(&format!(" (max {max} per run)"));
        }
        if let Some(prefix) = &config.title_prefix {
            description.push_str(&format!("; titles are prefixed with '{prefix}'"));
        }
        if !config.labels.is_empty() {
            description.push_str(&format!("; allowed labels: {}", config.labels.join(", ")));
        }
        if config.draft {
            description.push_str("; opened as a draft");
        }
        if let Some(target) = &config.target_repo {
            description.push_str(&format!("; targets {target}"));
        }

        let mut schema = (base.base_schema)();
        let grants_cross_repo = !config.allowed_repos.is_empty() || config.target_repo.as_deref() == Some("*");
        if grants_cross_repo {
            if let Some(obj) = schema.get_mut("properties").and_then(|p| p.as_object_mut()) {
                let repo_description = match &config.target_repo {
                    Some(repo) if repo != "*" => format!("Target repository (defaults to {repo})"),
                    _ => "Target repository, one of the allowed repos".to_string(),
                };
                obj.insert("repo".to_string(), json!({"type": "string", "description": repo_description}));
            }
        }

        out.push(EnhancedTool { name: kind.tool_name().to_string(), description, input_schema: schema });
    }
    Ok(out)
}

/// Translate a custom job's declared inputs into a JSON schema (spec.md
/// §4.4 point 4): choice becomes `string + enum`, defaults are preserved,
/// the required list is sorted.
pub fn custom_job_tool(name: &str, inputs: &[JobInputSpec]) -> EnhancedTool {
    let mut properties = serde_json::Map::new();
    let mut required: Vec<String> = Vec::new();

    for input in inputs {
        let mut prop = serde_json::Map::new();
        match &input.input_type {
            JobInputType::String => {
                prop.insert("type".to_string(), json!("string"));
            }
            JobInputType::Number => {
                prop.insert("type".to_string(), json!("number"));
            }
            JobInputType::Boolean => {
                prop.insert("type".to_string(), json!("boolean"));
            }
            JobInputType::Choice(options) => {
                prop.insert("type".to_string(), json!("string"));
                prop.insert("enum".to_string(), json!(options));
            }
        }
        if let Some(desc) = &input.description {
            prop.insert("description".to_string(), json!(desc));
        }
        if let Some(default) = &input.default {
            prop.insert("default".to_string(), default.to_json());
        }
        properties.insert(input.name.clone(), serde_json::Value::Object(prop));
        if input.required {
            required.push(input.name.clone());
        }
    }
    required.sort();

    EnhancedTool {
        name: name.to_string(),
        description: format!("Run the custom job '{name}'"),
        input_schema: json!({"type": "object", "properties": properties, "required": required}),
    }
}

/// Translate a dispatch-workflow target's discovered event inputs into a
/// schema (spec.md §4.4 point 4, second bullet).
pub fn dispatch_workflow_tool(workflow_name: &str, discovered_inputs: &[JobInputSpec]) -> EnhancedTool {
    let mut tool = custom_job_tool(workflow_name, discovered_inputs);
    tool.description = format!("Dispatch the '{workflow_name}' workflow");
    tool
}

/// Compute the job-level permission set for the consolidated
/// `safe_outputs` job: the union of every enabled output's scope
/// requirements (spec.md §4.4 point 6, invariant 10).
pub fn compute_permissions(enabled: &[(SafeOutputKind, SafeOutputConfig)], needs_checkout: bool) -> PermissionSet {
    let requirements: Vec<ScopeRequirement> = enabled.iter().flat_map(|(kind, _)| kind.scope_requirements()).collect();
    PermissionSet::compute(&requirements, needs_checkout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aw_types::ErrorKind;

    fn m(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn parse_safe_outputs_handles_null_as_enable_with_defaults() {
        let raw = m(vec![("create_issue", Value::Null)]);
        let parsed = parse_safe_outputs(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, SafeOutputKind::CreateIssue);
    }

    #[test]
    fn repo_parameter_absent_without_allowed_repos() {
        let raw = m(vec![("create_issue", m(vec![("target-repo", Value::Str("owner/repo".into()))]))]);
        let enabled = parse_safe_outputs(&raw).unwrap();
        let tools = filter_and_enhance(&enabled).unwrap();
        assert!(!tools[0].input_schema["properties"].as_object().unwrap().contains_key("repo"));
    }

    #[test]
    fn repo_parameter_present_with_allowed_repos() {
        let raw = m(vec![(
            "create_issue",
            m(vec![
                ("target-repo", Value::Str("owner/repo".into())),
                ("allowed-repos", Value::List(vec![Value::Str("owner/other".into())])),
            ]),
        )]);
        let enabled = parse_safe_outputs(&raw).unwrap();
        let tools = filter_and_enhance(&enabled).unwrap();
        let props = tools[0].input_schema["properties"].as_object().unwrap();
        assert!(props.contains_key("repo"));
        assert!(props["repo"]["description"].as_str().unwrap().contains("owner/repo"));
    }

    #[test]
    fn custom_job_schema_sorts_required_and_preserves_choice() {
        let inputs = vec![
            JobInputSpec { name: "b".into(), input_type: JobInputType::String, description: None, default: None, required: true },
            JobInputSpec { name: "a".into(), input_type: JobInputType::Choice(vec!["x".into(), "y".into()]), description: None, default: None, required: true },
        ];
        let tool = custom_job_tool("deploy", &inputs);
        assert_eq!(tool.input_schema["required"], json!(["a", "b"]));
        assert_eq!(tool.input_schema["properties"]["a"]["enum"], json!(["x", "y"]));
    }

    #[test]
    fn compute_permissions_unions_scopes() {
        let enabled = vec![
            (SafeOutputKind::CreateIssue, SafeOutputConfig::default()),
            (SafeOutputKind::CreatePullRequest, SafeOutputConfig::default()),
        ];
        let set = compute_permissions(&enabled, false);
        assert_eq!(set.entries().len(), 3);
    }

    #[test]
    fn every_static_kind_has_schema_entry() {
        let enabled: Vec<(SafeOutputKind, SafeOutputConfig)> = vec![
            SafeOutputKind::CreateIssue,
            SafeOutputKind::AddComment,
            SafeOutputKind::CreateDiscussion,
            SafeOutputKind::UpdateIssue,
            SafeOutputKind::CloseIssue,
            SafeOutputKind::CreatePullRequest,
            SafeOutputKind::PushToPullRequestBranch,
            SafeOutputKind::AddLabels,
            SafeOutputKind::CreatePullRequestReviewComment,
            SafeOutputKind::UploadAsset,
            SafeOutputKind::MissingTool,
            SafeOutputKind::CreateAgentSession,
            SafeOutputKind::AssignToAgent,
        ]
        .into_iter()
        .map(|k| (k, SafeOutputConfig::default()))
        .collect();
        assert!(filter_and_enhance(&enabled).is_ok());
    }

    #[test]
    fn custom_job_names_validated() {
        let raw = m(vec![("jobs", m(vec![("1bad", m(vec![]))]))]);
        let err = parse_safe_outputs(&raw).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedHeader);
    }
}
