//! Job graph construction (spec.md §4.8): the nine fixed-order job kinds,
//! wired together with [`aw_cond::Expr`] conditions rather than synthesized
//! strings (Design Notes §9).

pub mod guard;

use aw_cond::Expr;
use aw_permissions::{PermissionScope, PermissionSet, ScopeRequirement};
use aw_safeoutputs::SafeOutputKind;
use aw_tools::RuntimeSetupStep;
use aw_types::{CompileError, Value};

/// One emitted workflow step (spec.md §6 step key order: name, id, if,
/// uses, with, env, run, shell, continue-on-error).
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub id: Option<String>,
    pub if_cond: Option<Expr>,
    pub uses: Option<String>,
    pub with: Vec<(String, Value)>,
    pub env: Vec<(String, String)>,
    pub run: Option<String>,
    pub shell: Option<String>,
    pub continue_on_error: bool,
    /// Marks the single step that invokes the AI engine — the reference
    /// point [`guard::check_step_order`] measures against.
    pub is_agent_execution: bool,
}

impl Step {
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            if_cond: None,
            uses: None,
            with: Vec::new(),
            env: Vec::new(),
            run: Some(command.into()),
            shell: None,
            continue_on_error: false,
            is_agent_execution: false,
        }
    }

    pub fn action(name: impl Into<String>, uses: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            if_cond: None,
            uses: Some(uses.into()),
            with: Vec::new(),
            env: Vec::new(),
            run: None,
            shell: None,
            continue_on_error: false,
            is_agent_execution: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_if(mut self, cond: Expr) -> Self {
        self.if_cond = Some(cond);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.with.push((key.into(), value));
        self
    }

    pub fn as_agent_execution(mut self) -> Self {
        self.is_agent_execution = true;
        self
    }
}

/// One emitted workflow job (spec.md §6 job key order: name, if, needs,
/// runs-on, permissions, concurrency, timeout-minutes, outputs, env, steps).
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub if_cond: Option<Expr>,
    pub needs: Vec<String>,
    pub runs_on: String,
    pub permissions: PermissionSet,
    pub timeout_minutes: Option<i64>,
    pub outputs: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub steps: Vec<Step>,
}

/// Fixed job names every downstream job references by (invariant 7: at
/// most one activation job, referenced by a fixed name).
pub const ACTIVATION_JOB: &str = "activation";
pub const PRE_ACTIVATION_JOB: &str = "pre_activation";
pub const AGENT_JOB: &str = "agent";
pub const DETECTION_JOB: &str = "detection";
pub const SAFE_OUTPUTS_JOB: &str = "safe_outputs";
pub const UPLOAD_ASSETS_JOB: &str = "upload_assets";
pub const UPDATE_CACHE_MEMORY_JOB: &str = "update_cache_memory";
pub const UNLOCK_JOB: &str = "unlock";
pub const CONCLUSION_JOB: &str = "conclusion";

/// Everything the job graph builder needs to know about the compiled
/// workflow to decide which of the nine job kinds are present and how
/// they're wired.
#[derive(Debug, Clone, Default)]
pub struct JobGraphInput {
    pub runs_on: String,
    pub has_pre_activation_check: bool,
    pub threat_detection_enabled: bool,
    pub safe_output_kinds: Vec<SafeOutputKind>,
    pub safe_outputs_need_activation_outputs: bool,
    pub upload_asset_configured: bool,
    pub cache_memory_configured: bool,
    pub lock_for_agent: bool,
    pub add_comment_already_commented: bool,
    pub runtime_setup_steps: Vec<RuntimeSetupStep>,
    pub agent_run_command: String,
    pub default_timeout_minutes: i64,
    /// `safe-outputs.footer` (spec.md §6): global toggle for AI-generated
    /// footers on issues/comments/etc, surfaced to the safe-outputs job's
    /// handler steps as an env var. `None` means not configured (handler
    /// default applies); `Some(_)` is an explicit override.
    pub footer_enabled: Option<bool>,
}

fn runtime_step(step: &RuntimeSetupStep) -> Vec<Step> {
    let mut s = Step::action(format!("Set up {:?}", step.runtime), step.uses.clone())
        .with_param("version", Value::Str(step.version.clone()));
    if let Some(cond) = &step.condition {
        s = s.with_if(Expr::prop(cond.clone()));
    }
    let mut out = vec![s];
    if step.emits_goroot_capture {
        out.push(Step::run("Export GOROOT", "echo \"GOROOT=$(go env GOROOT)\" >> \"$GITHUB_ENV\""));
    }
    out
}

fn build_activation_job(input: &JobGraphInput) -> Job {
    let mut steps = vec![
        Step::run("Check role membership", "echo checking role membership"),
        Step::run("Check skip-if-match", "echo checking skip-if-match").with_id("check_skip_if_match"),
        Step::run("Check stop-after", "echo checking stop-after").with_id("activation"),
    ];
    if input.has_pre_activation_check {
        steps.insert(
            1,
            Step::run("Evaluate pre-activation result", "echo evaluating pre-activation")
                .with_if(Expr::prop(format!("needs.{PRE_ACTIVATION_JOB}.outputs.skip_check_ok")).eq(Expr::literal("true"))),
        );
    }
    Job {
        name: ACTIVATION_JOB.to_string(),
        if_cond: None,
        needs: if input.has_pre_activation_check { vec![PRE_ACTIVATION_JOB.to_string()] } else { Vec::new() },
        runs_on: input.runs_on.clone(),
        permissions: PermissionSet::default(),
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: vec![
            ("activated".to_string(), "${{ steps.activation.outputs.activated }}".to_string()),
            ("comment_id".to_string(), "${{ steps.activation.outputs.comment_id }}".to_string()),
            ("comment_repo".to_string(), "${{ steps.activation.outputs.comment_repo }}".to_string()),
            ("issue_locked".to_string(), "${{ steps.activation.outputs.issue_locked }}".to_string()),
        ],
        env: Vec::new(),
        steps,
    }
}

fn build_pre_activation_job(input: &JobGraphInput) -> Option<Job> {
    if !input.has_pre_activation_check {
        return None;
    }
    Some(Job {
        name: PRE_ACTIVATION_JOB.to_string(),
        if_cond: None,
        needs: Vec::new(),
        runs_on: input.runs_on.clone(),
        permissions: PermissionSet::default(),
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: vec![("skip_check_ok".to_string(), "${{ steps.search_query.outputs.skip_check_ok }}".to_string())],
        env: Vec::new(),
        steps: vec![Step::run("Run search-query check", "echo running search-query check").with_id("search_query")],
    })
}

fn build_agent_job(input: &JobGraphInput) -> Job {
    // The MCP gateway step is always emitted regardless of sandbox
    // configuration (spec.md S7: disabling the agent sandbox removes the
    // firewall step, never the gateway).
    let mut steps: Vec<Step> = vec![Step::action("Start MCP gateway", "./actions/mcp-gateway")];
    steps.extend(input.runtime_setup_steps.iter().flat_map(runtime_step));
    steps.push(
        Step::run("Run agent", input.agent_run_command.clone())
            .with_id("agent_run")
            .as_agent_execution(),
    );
    Job {
        name: AGENT_JOB.to_string(),
        if_cond: Some(Expr::prop(format!("needs.{ACTIVATION_JOB}.outputs.activated")).eq(Expr::literal("true"))),
        needs: vec![ACTIVATION_JOB.to_string()],
        runs_on: input.runs_on.clone(),
        permissions: PermissionSet::default(),
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: vec![
            ("output_types".to_string(), "${{ steps.agent_run.outputs.output_types }}".to_string()),
            ("has_patch".to_string(), "${{ steps.agent_run.outputs.has_patch }}".to_string()),
            ("secret_verification_result".to_string(), "${{ steps.agent_run.outputs.secret_verification_result }}".to_string()),
            ("checkout_pr_success".to_string(), "${{ steps.agent_run.outputs.checkout_pr_success }}".to_string()),
        ],
        env: Vec::new(),
        steps,
    }
}

fn build_detection_job(input: &JobGraphInput) -> Option<Job> {
    if !input.threat_detection_enabled {
        return None;
    }
    let cond = Expr::prop(format!("needs.{AGENT_JOB}.outputs.output_types"))
        .not_eq(Expr::literal(""))
        .or(Expr::prop(format!("needs.{AGENT_JOB}.outputs.has_patch")).eq(Expr::literal("true")));
    Some(Job {
        name: DETECTION_JOB.to_string(),
        if_cond: Some(cond),
        needs: vec![AGENT_JOB.to_string()],
        runs_on: input.runs_on.clone(),
        permissions: PermissionSet::default(),
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: vec![("success".to_string(), "${{ steps.detect.outputs.success }}".to_string())],
        env: Vec::new(),
        steps: vec![Step::run("Run threat detection", "echo running threat detection").with_id("detect")],
    })
}

fn safe_outputs_permissions(kinds: &[SafeOutputKind], needs_checkout: bool) -> PermissionSet {
    let requirements: Vec<ScopeRequirement> = kinds.iter().flat_map(SafeOutputKind::scope_requirements).collect();
    PermissionSet::compute(&requirements, needs_checkout)
}

fn build_safe_outputs_job(input: &JobGraphInput) -> Option<Job> {
    if input.safe_output_kinds.is_empty() {
        return None;
    }
    let mut needs = vec![AGENT_JOB.to_string()];
    if input.safe_outputs_need_activation_outputs {
        needs.push(ACTIVATION_JOB.to_string());
    }
    if input.lock_for_agent {
        needs.push(UNLOCK_JOB.to_string());
    }

    let mut cond = Expr::call("cancelled")
        .not()
        .and(Expr::prop(format!("needs.{AGENT_JOB}.result")).not_eq(Expr::literal("skipped")));
    if input.threat_detection_enabled {
        cond = cond.and(Expr::prop(format!("needs.{DETECTION_JOB}.outputs.success")).eq(Expr::literal("true")));
    }

    let needs_checkout = input
        .safe_output_kinds
        .iter()
        .any(|k| matches!(k, SafeOutputKind::CreatePullRequest | SafeOutputKind::PushToPullRequestBranch));

    // Per-handler ordering (spec.md §4.4): the unified handler first, then
    // copilot-assignment follow-ups, then assign-to-agent, then
    // create-agent-session. Within a rank, tool names break ties so the
    // order is still deterministic (invariant 6).
    let mut ranked: Vec<(u8, String)> =
        input.safe_output_kinds.iter().map(|k| (k.step_order_rank(), k.tool_name().to_string())).collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let steps = ranked
        .iter()
        .map(|(_, n)| Step::run(format!("Process {n}"), format!("echo processing {n}")))
        .collect();

    let env = match input.footer_enabled {
        Some(enabled) => vec![("GH_AW_SAFE_OUTPUTS_FOOTER".to_string(), enabled.to_string())],
        None => Vec::new(),
    };

    Some(Job {
        name: SAFE_OUTPUTS_JOB.to_string(),
        if_cond: Some(cond),
        needs,
        runs_on: input.runs_on.clone(),
        permissions: safe_outputs_permissions(&input.safe_output_kinds, needs_checkout),
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: Vec::new(),
        env,
        steps,
    })
}

fn build_upload_assets_job(input: &JobGraphInput) -> Option<Job> {
    if !input.upload_asset_configured {
        return None;
    }
    let permissions = PermissionSet::compute(&[ScopeRequirement::new(PermissionScope::Contents, aw_types::PermLevel::Write)], false);
    Some(Job {
        name: UPLOAD_ASSETS_JOB.to_string(),
        if_cond: None,
        needs: vec![AGENT_JOB.to_string()],
        runs_on: input.runs_on.clone(),
        permissions,
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: Vec::new(),
        env: Vec::new(),
        steps: vec![Step::run("Push assets to orphan branch", "echo pushing assets")],
    })
}

fn build_update_cache_memory_job(input: &JobGraphInput) -> Option<Job> {
    if !(input.threat_detection_enabled && input.cache_memory_configured) {
        return None;
    }
    Some(Job {
        name: UPDATE_CACHE_MEMORY_JOB.to_string(),
        if_cond: None,
        needs: vec![AGENT_JOB.to_string(), DETECTION_JOB.to_string()],
        runs_on: input.runs_on.clone(),
        permissions: PermissionSet::default(),
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: Vec::new(),
        env: Vec::new(),
        steps: vec![
            Step::run("Download artifacts", "echo downloading artifacts"),
            Step::run("Validate artifact extensions", "echo validating extensions"),
            Step::run("Persist to runner cache", "echo persisting cache"),
        ],
    })
}

fn build_unlock_job(input: &JobGraphInput) -> Option<Job> {
    if !input.lock_for_agent {
        return None;
    }
    let mut needs = vec![AGENT_JOB.to_string()];
    if input.threat_detection_enabled {
        needs.push(DETECTION_JOB.to_string());
    }
    Some(Job {
        name: UNLOCK_JOB.to_string(),
        if_cond: Some(Expr::call("always")),
        needs,
        runs_on: input.runs_on.clone(),
        permissions: PermissionSet::default(),
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: Vec::new(),
        env: Vec::new(),
        steps: vec![Step::run("Unlock issue", "echo unlocking issue")],
    })
}

fn build_conclusion_job(input: &JobGraphInput, present: &[&str]) -> Job {
    let mut needs: Vec<String> = present.iter().map(|s| s.to_string()).collect();
    if !needs.contains(&ACTIVATION_JOB.to_string()) {
        needs.insert(0, ACTIVATION_JOB.to_string());
    }

    let mut cond = Expr::call("always").and(Expr::prop(format!("needs.{AGENT_JOB}.result")).not_eq(Expr::literal("skipped")));
    if input.add_comment_already_commented {
        cond = cond.and(Expr::prop(format!("needs.{ACTIVATION_JOB}.outputs.comment_id")).eq(Expr::literal("")));
    }

    Job {
        name: CONCLUSION_JOB.to_string(),
        if_cond: Some(cond),
        needs,
        runs_on: input.runs_on.clone(),
        permissions: PermissionSet::default(),
        timeout_minutes: Some(input.default_timeout_minutes),
        outputs: Vec::new(),
        env: Vec::new(),
        steps: vec![Step::run("Summarize run", "echo summarizing run")],
    }
}

/// Build the full, fixed-order job graph, skipping any job kind whose
/// trigger is absent, and run the step-ordering guard over the agent job
/// before returning.
pub fn build_job_graph(input: &JobGraphInput) -> Result<Vec<Job>, CompileError> {
    let mut jobs = Vec::new();

    if let Some(job) = build_pre_activation_job(input) {
        jobs.push(job);
    }
    jobs.push(build_activation_job(input));

    let agent = build_agent_job(input);
    guard::check_step_order(&agent.steps)?;
    jobs.push(agent);

    if let Some(job) = build_detection_job(input) {
        jobs.push(job);
    }
    if let Some(job) = build_safe_outputs_job(input) {
        jobs.push(job);
    }
    if let Some(job) = build_upload_assets_job(input) {
        jobs.push(job);
    }
    if let Some(job) = build_update_cache_memory_job(input) {
        jobs.push(job);
    }
    if let Some(job) = build_unlock_job(input) {
        jobs.push(job);
    }

    let present: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).filter(|n| *n != ACTIVATION_JOB).collect();
    jobs.push(build_conclusion_job(input, &present));

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> JobGraphInput {
        JobGraphInput {
            runs_on: "ubuntu-latest".to_string(),
            default_timeout_minutes: 30,
            agent_run_command: "echo run agent".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn minimal_graph_has_activation_agent_conclusion_in_order() {
        let graph = build_job_graph(&base_input()).unwrap();
        let names: Vec<&str> = graph.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec![ACTIVATION_JOB, AGENT_JOB, CONCLUSION_JOB]);
    }

    #[test]
    fn activation_job_has_a_step_id_backing_its_declared_outputs() {
        let graph = build_job_graph(&base_input()).unwrap();
        let activation = graph.iter().find(|j| j.name == ACTIVATION_JOB).unwrap();
        assert!(activation.steps.iter().any(|s| s.id.as_deref() == Some("activation")));
        for (_, expr) in &activation.outputs {
            assert!(expr.contains("steps.activation.outputs"));
        }
    }

    #[test]
    fn pre_activation_precedes_activation_when_present() {
        let mut input = base_input();
        input.has_pre_activation_check = true;
        let graph = build_job_graph(&input).unwrap();
        assert_eq!(graph[0].name, PRE_ACTIVATION_JOB);
        assert_eq!(graph[1].name, ACTIVATION_JOB);
        assert_eq!(graph[1].needs, vec![PRE_ACTIVATION_JOB.to_string()]);
    }

    #[test]
    fn detection_runs_only_when_enabled_and_safe_outputs_depend_on_it() {
        let mut input = base_input();
        input.threat_detection_enabled = true;
        input.safe_output_kinds = vec![SafeOutputKind::CreateIssue];
        let graph = build_job_graph(&input).unwrap();
        let detection = graph.iter().find(|j| j.name == DETECTION_JOB).unwrap();
        assert!(detection.if_cond.is_some());
        let safe_outputs = graph.iter().find(|j| j.name == SAFE_OUTPUTS_JOB).unwrap();
        assert!(safe_outputs.if_cond.as_ref().unwrap().render().contains("detection"));
    }

    #[test]
    fn footer_toggle_is_threaded_into_safe_outputs_job_env() {
        let mut input = base_input();
        input.safe_output_kinds = vec![SafeOutputKind::CreateIssue];
        input.footer_enabled = Some(false);
        let graph = build_job_graph(&input).unwrap();
        let safe_outputs = graph.iter().find(|j| j.name == SAFE_OUTPUTS_JOB).unwrap();
        assert!(safe_outputs.env.contains(&("GH_AW_SAFE_OUTPUTS_FOOTER".to_string(), "false".to_string())));
    }

    #[test]
    fn unlock_job_is_always_and_gates_safe_outputs() {
        let mut input = base_input();
        input.lock_for_agent = true;
        input.safe_output_kinds = vec![SafeOutputKind::CreateIssue];
        let graph = build_job_graph(&input).unwrap();
        let unlock = graph.iter().find(|j| j.name == UNLOCK_JOB).unwrap();
        assert_eq!(unlock.if_cond.as_ref().unwrap().render(), "always()");
        let safe_outputs = graph.iter().find(|j| j.name == SAFE_OUTPUTS_JOB).unwrap();
        assert!(safe_outputs.needs.contains(&UNLOCK_JOB.to_string()));
    }

    #[test]
    fn conclusion_depends_on_every_present_job_plus_activation() {
        let mut input = base_input();
        input.safe_output_kinds = vec![SafeOutputKind::CreateIssue];
        let graph = build_job_graph(&input).unwrap();
        let conclusion = graph.iter().find(|j| j.name == CONCLUSION_JOB).unwrap();
        assert!(conclusion.needs.contains(&ACTIVATION_JOB.to_string()));
        assert!(conclusion.needs.contains(&AGENT_JOB.to_string()));
        assert!(conclusion.needs.contains(&SAFE_OUTPUTS_JOB.to_string()));
    }

    #[test]
    fn upload_assets_job_appears_only_when_configured() {
        let mut input = base_input();
        input.upload_asset_configured = true;
        let graph = build_job_graph(&input).unwrap();
        assert!(graph.iter().any(|j| j.name == UPLOAD_ASSETS_JOB));
    }
}
