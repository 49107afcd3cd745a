//! The fixed-order, fixed-indentation YAML emitter (spec.md §4.9).
//!
//! Hand-written rather than built on `serde_yaml`'s derived `Serialize`:
//! every record type (workflow, job, step) has an exact field order spec.md
//! §6 names, and the emitter must never reorder a step list or silently
//! reformat a value, so a small recursive writer over a local tree gives
//! full control over both.

use aw_cond::Expr;
use aw_jobgraph::{Job, Step};
use aw_permissions::PermissionSet;
use aw_types::Value;

const INDENT: &str = "  ";

/// An emittable node: either a scalar, a fixed-order map (a record), or a
/// list. Keeping this separate from [`Value`] lets ordering be encoded in
/// the tree itself instead of re-derived at print time.
enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// A string whose trailing `" # comment"` suffix must be written as a
    /// literal YAML comment, never inside the quoted scalar (used for
    /// pinned action references).
    StrWithComment(String, String),
    List(Vec<Node>),
    Map(Vec<(String, Node)>),
}

impl Node {
    fn str(s: impl Into<String>) -> Self {
        Node::Str(s.into())
    }

}

fn value_to_node(v: &Value) -> Node {
    match v {
        Value::Null => Node::Null,
        Value::Bool(b) => Node::Bool(*b),
        Value::Int(i) => Node::Int(*i),
        Value::Str(s) => Node::str(s.clone()),
        Value::List(items) => Node::List(items.iter().map(value_to_node).collect()),
        Value::Map(entries) => Node::Map(entries.iter().map(|(k, v)| (k.clone(), value_to_node(v))).collect()),
    }
}

fn expr_node(e: &Expr) -> Node {
    Node::str(e.render())
}

/// A plain (unquoted) YAML scalar must not start with an indicator
/// character, look like `true`/`false`/`null`/a number, contain `: `, or
/// have leading/trailing whitespace.
fn is_plain_safe(s: &str) -> bool {
    if s.is_empty() || s.trim() != s {
        return false;
    }
    if s.contains("${{") || s.contains(": ") || s.ends_with(':') || s.contains('\n') || s.contains('#') {
        return false;
    }
    let first = s.chars().next().unwrap();
    if "-?:,[]{}#&*!|>'\"%@`".contains(first) {
        return false;
    }
    !matches!(s, "true" | "false" | "null" | "~" | "yes" | "no" | "on" | "off") && s.parse::<i64>().is_err()
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn render_scalar(s: &str) -> String {
    if is_plain_safe(s) {
        s.to_string()
    } else {
        quote(s)
    }
}

fn write_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

/// Write `node` as the value following `key:` at the given depth (depth is
/// the indentation of the key itself; nested block content is written one
/// level deeper).
fn write_entry(out: &mut String, depth: usize, key: &str, node: &Node) {
    match node {
        Node::Null => {
            write_indent(out, depth);
            out.push_str(key);
            out.push_str(": null\n");
        }
        Node::Bool(b) => {
            write_indent(out, depth);
            out.push_str(key);
            out.push_str(": ");
            out.push_str(if *b { "true" } else { "false" });
            out.push('\n');
        }
        Node::Int(i) => {
            write_indent(out, depth);
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&i.to_string());
            out.push('\n');
        }
        Node::Str(s) => {
            write_indent(out, depth);
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&render_scalar(s));
            out.push('\n');
        }
        Node::StrWithComment(value, comment) => {
            write_indent(out, depth);
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&render_scalar(value));
            out.push_str(" # ");
            out.push_str(comment);
            out.push('\n');
        }
        Node::List(items) => {
            if items.is_empty() {
                write_indent(out, depth);
                out.push_str(key);
                out.push_str(": []\n");
                return;
            }
            write_indent(out, depth);
            out.push_str(key);
            out.push_str(":\n");
            for item in items {
                write_list_item(out, depth + 1, item);
            }
        }
        Node::Map(entries) => {
            if entries.is_empty() {
                write_indent(out, depth);
                out.push_str(key);
                out.push_str(": {}\n");
                return;
            }
            write_indent(out, depth);
            out.push_str(key);
            out.push_str(":\n");
            for (k, v) in entries {
                write_entry(out, depth + 1, k, v);
            }
        }
    }
}

/// Every record this emitter writes as a list item (steps) leads with a
/// plain scalar key (`name`), so the `- ` marker and the first key always
/// share a line; later keys fall back to `write_entry` one level deeper.
fn write_list_item(out: &mut String, depth: usize, node: &Node) {
    match node {
        Node::Map(entries) => {
            let mut iter = entries.iter();
            match iter.next() {
                Some((k, v)) => {
                    write_indent(out, depth);
                    out.push_str("- ");
                    out.push_str(k);
                    out.push_str(": ");
                    out.push_str(&scalar_only(v));
                    out.push('\n');
                }
                None => {
                    write_indent(out, depth);
                    out.push_str("- {}\n");
                }
            }
            for (k, v) in iter {
                write_entry(out, depth + 1, k, v);
            }
        }
        other => {
            write_indent(out, depth);
            out.push_str("- ");
            out.push_str(&scalar_only(other));
            out.push('\n');
        }
    }
}

fn scalar_only(node: &Node) -> String {
    match node {
        Node::Null => "null".to_string(),
        Node::Bool(b) => b.to_string(),
        Node::Int(i) => i.to_string(),
        Node::Str(s) => render_scalar(s),
        Node::StrWithComment(value, comment) => format!("{} # {}", render_scalar(value), comment),
        Node::List(_) | Node::Map(_) => String::new(),
    }
}

/// Parse a pinned action reference of the form `owner/repo@sha # tag` into
/// its scalar and trailing-comment parts; references with no `#` marker
/// are left as a plain string.
fn split_pin_comment(uses: &str) -> Node {
    match uses.split_once(" # ") {
        Some((value, comment)) => Node::StrWithComment(value.to_string(), comment.to_string()),
        None => Node::str(uses),
    }
}

fn step_node(step: &Step) -> Node {
    let mut entries: Vec<(String, Node)> = vec![("name".to_string(), Node::str(step.name.clone()))];
    if let Some(id) = &step.id {
        entries.push(("id".to_string(), Node::str(id.clone())));
    }
    if let Some(cond) = &step.if_cond {
        entries.push(("if".to_string(), expr_node(cond)));
    }
    if let Some(uses) = &step.uses {
        entries.push(("uses".to_string(), split_pin_comment(uses)));
    }
    if !step.with.is_empty() {
        entries.push((
            "with".to_string(),
            Node::Map(step.with.iter().map(|(k, v)| (k.clone(), value_to_node(v))).collect()),
        ));
    }
    if !step.env.is_empty() {
        entries.push(("env".to_string(), Node::Map(step.env.iter().map(|(k, v)| (k.clone(), Node::str(v.clone()))).collect())));
    }
    if let Some(run) = &step.run {
        entries.push(("run".to_string(), Node::str(run.clone())));
    }
    if let Some(shell) = &step.shell {
        entries.push(("shell".to_string(), Node::str(shell.clone())));
    }
    if step.continue_on_error {
        entries.push(("continue-on-error".to_string(), Node::Bool(true)));
    }
    Node::Map(entries)
}

fn job_node(job: &Job) -> Node {
    let mut entries: Vec<(String, Node)> = vec![("name".to_string(), Node::str(job.name.clone()))];
    if let Some(cond) = &job.if_cond {
        entries.push(("if".to_string(), expr_node(cond)));
    }
    if !job.needs.is_empty() {
        entries.push(("needs".to_string(), Node::List(job.needs.iter().map(|n| Node::str(n.clone())).collect())));
    }
    entries.push(("runs-on".to_string(), Node::str(job.runs_on.clone())));
    entries.push(("permissions".to_string(), permissions_node(&job.permissions)));
    if let Some(minutes) = job.timeout_minutes {
        entries.push(("timeout-minutes".to_string(), Node::Int(minutes)));
    }
    if !job.outputs.is_empty() {
        entries.push(("outputs".to_string(), Node::Map(job.outputs.iter().map(|(k, v)| (k.clone(), Node::str(v.clone()))).collect())));
    }
    if !job.env.is_empty() {
        entries.push(("env".to_string(), Node::Map(job.env.iter().map(|(k, v)| (k.clone(), Node::str(v.clone()))).collect())));
    }
    entries.push(("steps".to_string(), Node::List(job.steps.iter().map(step_node).collect())));
    Node::Map(entries)
}

fn permissions_node(permissions: &PermissionSet) -> Node {
    value_to_node(&permissions.to_value())
}

/// The top-level lock-file document (spec.md §6 key order: name, on,
/// permissions, concurrency, run-name, env, jobs).
#[derive(Debug, Clone)]
pub struct WorkflowDocument {
    pub name: String,
    pub on: Value,
    pub permissions: PermissionSet,
    pub concurrency: Option<Value>,
    pub run_name: Option<String>,
    pub env: Vec<(String, String)>,
    pub jobs: Vec<Job>,
}

/// Render a [`WorkflowDocument`] to its final lock-file text. Never
/// reorders the job or step lists it's given — ordering is the job
/// graph builder's responsibility.
pub fn emit(doc: &WorkflowDocument) -> String {
    let mut entries: Vec<(String, Node)> = vec![("name".to_string(), Node::str(doc.name.clone())), ("on".to_string(), value_to_node(&doc.on))];
    entries.push(("permissions".to_string(), permissions_node(&doc.permissions)));
    if let Some(concurrency) = &doc.concurrency {
        entries.push(("concurrency".to_string(), value_to_node(concurrency)));
    }
    if let Some(run_name) = &doc.run_name {
        entries.push(("run-name".to_string(), Node::str(run_name.clone())));
    }
    if !doc.env.is_empty() {
        entries.push(("env".to_string(), Node::Map(doc.env.iter().map(|(k, v)| (k.clone(), Node::str(v.clone()))).collect())));
    }
    entries.push(("jobs".to_string(), Node::Map(doc.jobs.iter().map(|j| (j.name.clone(), job_node(j))).collect())));

    let mut out = String::new();
    for (k, v) in &entries {
        write_entry(&mut out, 0, k, v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use aw_jobgraph::{Job, Step};

    fn sample_job() -> Job {
        Job {
            name: "agent".to_string(),
            if_cond: Some(Expr::prop("needs.activation.outputs.activated").eq(Expr::literal("true"))),
            needs: vec!["activation".to_string()],
            runs_on: "ubuntu-latest".to_string(),
            permissions: PermissionSet::default(),
            timeout_minutes: Some(30),
            outputs: vec![("has_patch".to_string(), "${{ steps.agent_run.outputs.has_patch }}".to_string())],
            env: Vec::new(),
            steps: vec![Step::run("Run agent", "echo hi").with_id("agent_run").as_agent_execution()],
        }
    }

    #[test]
    fn plain_scalar_is_unquoted() {
        assert_eq!(render_scalar("ubuntu-latest"), "ubuntu-latest");
    }

    #[test]
    fn expression_scalar_is_quoted() {
        assert_eq!(render_scalar("${{ github.event.name }}"), "\"${{ github.event.name }}\"");
    }

    #[test]
    fn bool_and_int_keyword_strings_are_quoted() {
        assert_eq!(render_scalar("true"), "\"true\"");
        assert_eq!(render_scalar("123"), "\"123\"");
    }

    #[test]
    fn pin_reference_splits_trailing_comment() {
        let node = split_pin_comment("github/gh-aw/actions/checkout@abc123 # v1.0.0");
        match node {
            Node::StrWithComment(value, comment) => {
                assert_eq!(value, "github/gh-aw/actions/checkout@abc123");
                assert_eq!(comment, "v1.0.0");
            }
            _ => panic!("expected StrWithComment"),
        }
    }

    #[test]
    fn emit_orders_job_keys_fixed() {
        let doc = WorkflowDocument {
            name: "Test Workflow".to_string(),
            on: Value::Map(vec![("push".to_string(), Value::Null)]),
            permissions: PermissionSet::default(),
            concurrency: None,
            run_name: None,
            env: Vec::new(),
            jobs: vec![sample_job()],
        };
        let text = emit(&doc);
        let name_pos = text.find("name: Test Workflow").unwrap();
        let on_pos = text.find("on:").unwrap();
        let jobs_pos = text.find("jobs:").unwrap();
        assert!(name_pos < on_pos);
        assert!(on_pos < jobs_pos);
        assert!(text.contains("if: needs.activation.outputs.activated == 'true'"));
        assert!(text.contains("runs-on: ubuntu-latest"));
    }

    #[test]
    fn empty_needs_is_omitted() {
        let mut job = sample_job();
        job.needs.clear();
        let node = job_node(&job);
        if let Node::Map(entries) = node {
            assert!(!entries.iter().any(|(k, _)| k == "needs"));
        } else {
            panic!("expected map");
        }
    }
}
