//! `aw-compile`: the CLI shell around [`aw_compiler::compile`] (spec.md
//! §6). Thin by design -- argument parsing, a real filesystem loader and
//! Docker probe, an atomic write of the lock file, and a single-line
//! error report. All actual compiler logic lives in `aw-compiler`.

use anyhow::Context;
use aw_validate::{CachingProbe, DockerProbe, ProbeOutcome};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "aw-compile", about = "Compile an agentic workflow markdown document into a CI pipeline lock file")]
struct Args {
    /// Source `.md` document (YAML frontmatter + body).
    source: PathBuf,

    /// Where to write the compiled lock file.
    #[arg(short, long, default_value = "workflow-lock.yml")]
    output: PathBuf,

    /// Pin actions to release-mode SHA digests.
    #[arg(long, conflicts_with = "dev")]
    release: bool,

    /// Dev mode: leave local action references unpinned (default).
    #[arg(long, conflicts_with = "release")]
    dev: bool,

    /// Promote recoverable warnings (env-secret leakage, unknown runtime,
    /// unresolved pin) to errors.
    #[arg(long)]
    strict: bool,

    /// Explicit action-pin tag; the highest-precedence source in the
    /// compiler's three-way tag resolution chain.
    #[arg(long)]
    action_tag: Option<String>,
}

/// Shells out to the real `docker` CLI. The daemon-availability result is
/// wrapped in [`CachingProbe`] by the caller so a multi-image document
/// only pays this cost once per image per process (spec.md §9).
struct ShellDockerProbe;

impl DockerProbe for ShellDockerProbe {
    fn probe_once(&self, image: &str) -> ProbeOutcome {
        match Command::new("docker").args(["info"]).output() {
            Ok(out) if out.status.success() => {}
            _ => return ProbeOutcome::DaemonUnavailable,
        }
        match Command::new("docker").args(["manifest", "inspect", image]).output() {
            Ok(out) if out.status.success() => ProbeOutcome::Present,
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr).to_lowercase();
                if stderr.contains("unauthorized") || stderr.contains("authentication required") {
                    ProbeOutcome::AuthRequired
                } else {
                    ProbeOutcome::Missing
                }
            }
            Err(_) => ProbeOutcome::DaemonUnavailable,
        }
    }
}

fn write_atomically(path: &Path, contents: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    std::fs::write(&tmp_path, contents)
        .with_context(|| format!("writing temporary lock file {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let source_text = std::fs::read_to_string(&args.source)
        .with_context(|| format!("reading source document {}", args.source.display()))?;
    let base_dir = args.source.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));

    let mode = if args.release { aw_compiler::Mode::Release } else { aw_compiler::Mode::Dev };
    let opts = aw_compiler::CompileOptions {
        mode,
        strict_flag: args.strict,
        action_tag_flag: args.action_tag.clone(),
        ..aw_compiler::CompileOptions::default()
    };

    let loader = aw_compiler::default_loader();
    let probe = CachingProbe::new(ShellDockerProbe);

    let output = aw_compiler::compile(&source_text, base_dir, &opts, &loader, &probe)?;

    for warning in &output.warnings {
        tracing::warn!(field_path = %warning.field_path, "{}", warning.message);
    }

    write_atomically(&args.output, &output.yaml)?;
    tracing::info!("compiled {} -> {}", args.source.display(), args.output.display());
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "aw_cli=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
