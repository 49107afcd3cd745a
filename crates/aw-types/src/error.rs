//! The compiler's single error type: message + context + remediation
//! hint, as a closed `thiserror` enum rather than a loosely typed struct.
//! spec.md §7 enumerates every error kind up front, and each one knows
//! its own field path shape, so there is no need for a stringly-typed
//! "kind" field.

use std::fmt;

/// Every error kind spec.md §7 names, in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedHeader,
    SchemaViolation,
    ImportCycle,
    ImportNotFound,
    IncludeNotFound,
    UnknownRuntime,
    SecretsInEnv,
    InvalidTimeout,
    InvalidMountSyntax,
    SandboxAgentTrue,
    HttpTransportUnsupported,
    MaxTurnsUnsupported,
    PinResolutionFailed,
    DockerImageMissing,
    StepOrderingViolation,
    CompilerBug,
    UnknownPermissionScope,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::MalformedHeader => "MalformedHeader",
            ErrorKind::SchemaViolation => "SchemaViolation",
            ErrorKind::ImportCycle => "ImportCycle",
            ErrorKind::ImportNotFound => "ImportNotFound",
            ErrorKind::IncludeNotFound => "IncludeNotFound",
            ErrorKind::UnknownRuntime => "UnknownRuntime",
            ErrorKind::SecretsInEnv => "SecretsInEnv",
            ErrorKind::InvalidTimeout => "InvalidTimeout",
            ErrorKind::InvalidMountSyntax => "InvalidMountSyntax",
            ErrorKind::SandboxAgentTrue => "SandboxAgentTrue",
            ErrorKind::HttpTransportUnsupported => "HTTPTransportUnsupported",
            ErrorKind::MaxTurnsUnsupported => "MaxTurnsUnsupported",
            ErrorKind::PinResolutionFailed => "PinResolutionFailed",
            ErrorKind::DockerImageMissing => "DockerImageMissing",
            ErrorKind::StepOrderingViolation => "StepOrderingViolation",
            ErrorKind::CompilerBug => "CompilerBug",
            ErrorKind::UnknownPermissionScope => "UnknownPermissionScope",
        };
        write!(f, "{s}")
    }
}

/// A compile failure: one error kind, the field path it occurred at, and a
/// remediation hint with an example value (spec.md §7's user-visible
/// failure form).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} at {field_path}: {hint}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub field_path: String,
    pub hint: String,
}

impl CompileError {
    pub fn new(kind: ErrorKind, field_path: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            kind,
            field_path: field_path.into(),
            hint: hint.into(),
        }
    }

    pub fn malformed_header(field_path: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedHeader, field_path, hint)
    }

    pub fn compiler_bug(field_path: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::CompilerBug, field_path, hint)
    }
}

/// A non-fatal diagnostic. Accumulated during compilation and surfaced to
/// the caller; warnings never suppress output (spec.md §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub field_path: String,
    pub message: String,
}

impl Warning {
    pub fn new(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// Promote this warning to a fatal error of the given kind — used by
    /// strict mode (spec.md §3 invariant 9, §7).
    pub fn promote(&self, kind: ErrorKind) -> CompileError {
        CompileError::new(kind, self.field_path.clone(), self.message.clone())
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warning at {}: {}", self.field_path, self.message)
    }
}
