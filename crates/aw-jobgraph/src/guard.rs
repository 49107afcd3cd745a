//! Step ordering guard (spec.md §4.10, invariant 8).
//!
//! Watches the agent job's step list for a secret-redaction or
//! artifact-upload step appearing before the step that actually invokes
//! the engine. A single `agent_executed` flag is all the state this
//! needs — no step is inspected after the flag flips.

use crate::Step;
use aw_types::{CompileError, ErrorKind};

fn looks_like_secret_redaction(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("secret-redaction") || lower.contains("redact")
}

fn looks_like_artifact_upload(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("artifact-upload") || lower.contains("upload-artifact")
}

/// Fail compilation if any step matching the secret-redaction or
/// artifact-upload pattern appears before the agent-execution step.
pub fn check_step_order(steps: &[Step]) -> Result<(), CompileError> {
    let mut agent_executed = false;
    for (idx, step) in steps.iter().enumerate() {
        if step.is_agent_execution {
            agent_executed = true;
            continue;
        }
        if !agent_executed && (looks_like_secret_redaction(&step.name) || looks_like_artifact_upload(&step.name)) {
            return Err(CompileError::new(
                ErrorKind::StepOrderingViolation,
                format!("jobs.agent.steps[{idx}]"),
                format!("step '{}' must not run before the agent-execution step", step.name),
            ));
        }
    }
    Ok(())
}
