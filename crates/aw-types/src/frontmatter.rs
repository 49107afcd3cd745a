//! The typed frontmatter record (spec.md §3, §4.1).
//!
//! [`FrontmatterConfig::from_value`] is the one place the generic,
//! order-preserving [`Value`] tree is turned into a typed record; after
//! the import-merge pass (which operates purely on [`Value`]) this is
//! called exactly once per compile. [`FrontmatterConfig::to_map`] is its
//! exact inverse, modulo key order and numeric canonicalization, as
//! required by spec.md §8's round-trip property.

use crate::error::{CompileError, ErrorKind};
use crate::null_policy;
use crate::value::Value;
use aw_ids::{EngineId, RuntimeId, TrackerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermLevel {
    Read,
    Write,
    None,
}

impl PermLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermLevel::Read => "read",
            PermLevel::Write => "write",
            PermLevel::None => "none",
        }
    }

    fn parse(s: &str, field_path: &str) -> Result<Self, CompileError> {
        match s {
            "read" => Ok(PermLevel::Read),
            "write" => Ok(PermLevel::Write),
            "none" => Ok(PermLevel::None),
            other => Err(CompileError::malformed_header(
                field_path,
                format!("permission level must be one of read/write/none, got '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionsDecl {
    /// `read-all`, `write-all`, `read`, `write`, `none`.
    Shorthand(String),
    /// Explicit scope -> level mapping, validated against the closed scope
    /// set by `aw-permissions` (this crate only checks the level syntax).
    Detailed(Vec<(String, PermLevel)>),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub id: EngineId,
    pub model: Option<String>,
    pub version: Option<String>,
    pub max_turns: Option<i64>,
    pub env: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id: EngineId::Copilot,
            model: None,
            version: None,
            max_turns: None,
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub path: String,
    pub inputs: Option<Vec<(String, Value)>>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolsSection {
    /// Tool entries, meta keys (`timeout`, `startup-timeout`) already
    /// removed per invariant 3.
    pub entries: Vec<(String, Value)>,
    pub timeout: Option<i64>,
    pub startup_timeout: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FrontmatterConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub tracker_id: Option<TrackerId>,
    pub engine: EngineConfig,
    /// `on` as a normalized mapping (`on: push` becomes `{push: null}`).
    pub on: Value,
    /// Deprecated top-level `roles` — round-tripped but never authoritative.
    pub deprecated_roles: Vec<String>,
    pub skip_if_match: Option<Value>,
    pub stop_after: Option<Value>,
    pub permissions: Option<PermissionsDecl>,
    pub tools: ToolsSection,
    pub mcp_servers: Vec<(String, Value)>,
    pub runtimes: Vec<(String, Value)>,
    pub safe_outputs: Option<Value>,
    pub footer: Option<bool>,
    pub threat_detection: Option<Value>,
    pub plugins: Option<Value>,
    pub imports: Vec<ImportDecl>,
    pub strict: bool,
    pub env: Vec<(String, String)>,
    pub cache: Option<Value>,
    pub network: Option<Value>,
    pub sandbox: Option<Value>,
    /// The full header as parsed, used for `to_map` passthrough of keys
    /// this record does not model explicitly.
    raw: Value,
}

/// Known top-level keys this record models explicitly; anything else in
/// `raw` is passed through verbatim by `to_map`.
const KNOWN_KEYS: &[&str] = &[
    "name", "description", "source", "tracker-id", "engine", "on", "roles",
    "skip-if-match", "stop-after", "permissions", "tools", "mcp-servers",
    "runtimes", "safe-outputs", "plugins", "imports", "strict", "env",
    "cache", "network", "sandbox",
];

impl FrontmatterConfig {
    pub fn parse(header_yaml: &str) -> Result<Self, CompileError> {
        let trimmed = header_yaml.trim();
        let yaml_value: serde_yaml::Value = if trimmed.is_empty() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            serde_yaml::from_str(header_yaml).map_err(|e| {
                CompileError::malformed_header("<root>", format!("header is not valid YAML: {e}"))
            })?
        };
        let value = Value::from_yaml(&yaml_value)
            .map_err(|e| CompileError::malformed_header("<root>", e))?;
        Self::from_value(&value)
    }

    pub fn from_value(header: &Value) -> Result<Self, CompileError> {
        let map = match header {
            Value::Map(_) => header.clone(),
            Value::Null => Value::Map(Vec::new()),
            other => {
                return Err(CompileError::malformed_header(
                    "<root>",
                    format!("header must be a mapping, got {other:?}"),
                ))
            }
        };

        let name = field_str(&map, "name")?;
        let description = field_str(&map, "description")?;
        let source = field_str(&map, "source")?;

        let tracker_id = match field_str(&map, "tracker-id")? {
            Some(s) => Some(TrackerId::parse(&s).map_err(|e| {
                CompileError::malformed_header("tracker-id", e.to_string())
            })?),
            None => None,
        };

        let engine = parse_engine(&map)?;
        let on = parse_on(&map)?;
        let deprecated_roles = parse_string_list(&map, "roles")?;
        let skip_if_match = nullable_field(&map, "skip-if-match");
        let stop_after = nullable_field(&map, "stop-after");
        let permissions = parse_permissions(&map)?;
        let tools = parse_tools(&map)?;
        let mcp_servers = parse_owned_map(&map, "mcp-servers")?;
        let runtimes = parse_runtimes(&map)?;
        let safe_outputs = nullable_field(&map, "safe-outputs");
        let footer = match map.get("safe-outputs").and_then(|v| v.get("footer")) {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Null) => Some(true),
            Some(_) => {
                return Err(CompileError::malformed_header(
                    "safe-outputs.footer",
                    "must be a boolean, e.g. true",
                ))
            }
            None => None,
        };
        let threat_detection = map
            .get("safe-outputs")
            .and_then(|v| v.get("threat-detection"))
            .cloned();
        let plugins = nullable_field(&map, "plugins");
        let imports = parse_imports(&map)?;
        let strict = match map.get("strict") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => false,
            Some(_) => {
                return Err(CompileError::malformed_header("strict", "must be a boolean"))
            }
        };
        let env = parse_string_map(&map, "env")?;
        let cache = nullable_field(&map, "cache");
        let network = nullable_field(&map, "network");
        let sandbox = nullable_field(&map, "sandbox");

        Ok(Self {
            name,
            description,
            source,
            tracker_id,
            engine,
            on,
            deprecated_roles,
            skip_if_match,
            stop_after,
            permissions,
            tools,
            mcp_servers,
            runtimes,
            safe_outputs,
            footer,
            threat_detection,
            plugins,
            imports,
            strict,
            env,
            cache,
            network,
            sandbox,
            raw: map,
        })
    }

    /// Produce a canonical round-trip mapping for downstream consumers
    /// that still want the generic form (spec.md §4.1).
    pub fn to_map(&self) -> Value {
        let mut out: Vec<(String, Value)> = Vec::new();
        for (key, value) in self.raw.as_map().unwrap_or(&[]) {
            if KNOWN_KEYS.contains(&key.as_str()) {
                continue;
            }
            out.push((key.clone(), value.clone()));
        }

        if let Some(n) = &self.name {
            out.push(("name".into(), Value::Str(n.clone())));
        }
        if let Some(d) = &self.description {
            out.push(("description".into(), Value::Str(d.clone())));
        }
        if let Some(s) = &self.source {
            out.push(("source".into(), Value::Str(s.clone())));
        }
        if let Some(t) = &self.tracker_id {
            out.push(("tracker-id".into(), Value::Str(t.as_str().to_string())));
        }
        out.push(("engine".into(), engine_to_value(&self.engine)));
        out.push(("on".into(), self.on.clone()));
        if !self.deprecated_roles.is_empty() {
            out.push((
                "roles".into(),
                Value::List(self.deprecated_roles.iter().map(|r| Value::Str(r.clone())).collect()),
            ));
        }
        if let Some(v) = &self.skip_if_match {
            out.push(("skip-if-match".into(), v.clone()));
        }
        if let Some(v) = &self.stop_after {
            out.push(("stop-after".into(), v.clone()));
        }
        if let Some(p) = &self.permissions {
            out.push(("permissions".into(), permissions_to_value(p)));
        }
        out.push(("tools".into(), tools_to_value(&self.tools)));
        if !self.mcp_servers.is_empty() {
            out.push(("mcp-servers".into(), Value::Map(self.mcp_servers.clone())));
        }
        if !self.runtimes.is_empty() {
            out.push(("runtimes".into(), Value::Map(self.runtimes.clone())));
        }
        if let Some(v) = &self.safe_outputs {
            out.push(("safe-outputs".into(), v.clone()));
        }
        if let Some(v) = &self.plugins {
            out.push(("plugins".into(), v.clone()));
        }
        if !self.imports.is_empty() {
            out.push((
                "imports".into(),
                Value::List(self.imports.iter().map(import_to_value).collect()),
            ));
        }
        out.push(("strict".into(), Value::Bool(self.strict)));
        if !self.env.is_empty() {
            out.push((
                "env".into(),
                Value::Map(self.env.iter().map(|(k, v)| (k.clone(), Value::Str(v.clone()))).collect()),
            ));
        }
        if let Some(v) = &self.cache {
            out.push(("cache".into(), v.clone()));
        }
        if let Some(v) = &self.network {
            out.push(("network".into(), v.clone()));
        }
        if let Some(v) = &self.sandbox {
            out.push(("sandbox".into(), v.clone()));
        }
        Value::Map(out)
    }
}

fn field_path_null_check(map: &Value, key: &str) -> Option<&Value> {
    map.get(key)
}

fn nullable_field(map: &Value, key: &str) -> Option<Value> {
    match field_path_null_check(map, key) {
        Some(Value::Null) if null_policy::allows_null(key) => Some(Value::Bool(true)),
        Some(Value::Null) => None,
        Some(v) => Some(v.clone()),
        None => None,
    }
}

fn field_str(map: &Value, key: &str) -> Result<Option<String>, CompileError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(CompileError::malformed_header(
            key,
            format!("must be a string, got {other:?}"),
        )),
    }
}

fn parse_string_list(map: &Value, key: &str) -> Result<Vec<String>, CompileError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::List(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    CompileError::malformed_header(key, "list entries must be strings")
                })
            })
            .collect(),
        Some(Value::Str(s)) => Ok(vec![s.clone()]),
        Some(_) => Err(CompileError::malformed_header(key, "must be a list of strings")),
    }
}

fn parse_string_map(map: &Value, key: &str) -> Result<Vec<(String, String)>, CompileError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Map(entries)) => entries
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::Str(s) => s.clone(),
                    Value::Int(i) => i.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(CompileError::malformed_header(
                            format!("{key}.{k}"),
                            format!("must be a scalar, got {other:?}"),
                        ))
                    }
                };
                Ok((k.clone(), rendered))
            })
            .collect(),
        Some(_) => Err(CompileError::malformed_header(key, "must be a mapping")),
    }
}

fn parse_owned_map(map: &Value, key: &str) -> Result<Vec<(String, Value)>, CompileError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Map(entries)) => Ok(entries.clone()),
        Some(_) => Err(CompileError::malformed_header(key, "must be a mapping")),
    }
}

fn parse_engine(map: &Value) -> Result<EngineConfig, CompileError> {
    match map.get("engine") {
        None | Some(Value::Null) => Ok(EngineConfig::default()),
        Some(Value::Str(s)) => {
            let id = EngineId::parse(s)
                .map_err(|e| CompileError::malformed_header("engine", e.to_string()))?;
            Ok(EngineConfig { id, ..EngineConfig::default() })
        }
        Some(Value::Map(_)) => {
            let engine_map = map.get("engine").unwrap();
            let id_str = engine_map
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    CompileError::malformed_header("engine.id", "required, e.g. 'copilot'")
                })?;
            let id = EngineId::parse(id_str)
                .map_err(|e| CompileError::malformed_header("engine.id", e.to_string()))?;
            let model = engine_map.get("model").and_then(Value::as_str).map(str::to_string);
            let version = engine_map.get("version").and_then(Value::as_str).map(str::to_string);
            let max_turns = match engine_map.get("max-turns") {
                None | Some(Value::Null) => None,
                Some(Value::Int(i)) => Some(*i),
                Some(_) => {
                    return Err(CompileError::malformed_header(
                        "engine.max-turns",
                        "must be an integer, e.g. 20",
                    ))
                }
            };
            let env = match engine_map.get("env") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Map(entries)) => entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render_scalar()))
                    .collect(),
                Some(_) => {
                    return Err(CompileError::malformed_header("engine.env", "must be a mapping"))
                }
            };
            Ok(EngineConfig { id, model, version, max_turns, env })
        }
        Some(_) => Err(CompileError::malformed_header(
            "engine",
            "must be a string or a mapping with 'id'",
        )),
    }
}

fn engine_to_value(engine: &EngineConfig) -> Value {
    let mut entries = vec![("id".to_string(), Value::Str(engine.id.as_str().to_string()))];
    if let Some(m) = &engine.model {
        entries.push(("model".into(), Value::Str(m.clone())));
    }
    if let Some(v) = &engine.version {
        entries.push(("version".into(), Value::Str(v.clone())));
    }
    if let Some(mt) = engine.max_turns {
        entries.push(("max-turns".into(), Value::Int(mt)));
    }
    if !engine.env.is_empty() {
        entries.push((
            "env".into(),
            Value::Map(engine.env.iter().map(|(k, v)| (k.clone(), Value::Str(v.clone()))).collect()),
        ));
    }
    Value::Map(entries)
}

fn parse_on(map: &Value) -> Result<Value, CompileError> {
    match map.get("on") {
        None | Some(Value::Null) => Ok(Value::Map(Vec::new())),
        Some(Value::Str(s)) => Ok(Value::Map(vec![(s.clone(), Value::Null)])),
        Some(Value::List(items)) => {
            let mut entries = Vec::new();
            for item in items {
                let s = item.as_str().ok_or_else(|| {
                    CompileError::malformed_header("on", "list entries must be event names")
                })?;
                entries.push((s.to_string(), Value::Null));
            }
            Ok(Value::Map(entries))
        }
        Some(Value::Map(entries)) => Ok(Value::Map(entries.clone())),
        Some(_) => Err(CompileError::malformed_header(
            "on",
            "must be a string, list, or mapping of event -> config",
        )),
    }
}

fn parse_permissions(map: &Value) -> Result<Option<PermissionsDecl>, CompileError> {
    match map.get("permissions") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(PermissionsDecl::Shorthand(s.clone()))),
        Some(Value::Map(entries)) => {
            let mut levels = Vec::with_capacity(entries.len());
            for (scope, level_value) in entries {
                let level_str = level_value.as_str().ok_or_else(|| {
                    CompileError::malformed_header(
                        format!("permissions.{scope}"),
                        "must be one of read/write/none",
                    )
                })?;
                let level = PermLevel::parse(level_str, &format!("permissions.{scope}"))?;
                levels.push((scope.clone(), level));
            }
            Ok(Some(PermissionsDecl::Detailed(levels)))
        }
        Some(_) => Err(CompileError::malformed_header(
            "permissions",
            "must be a shorthand string or a scope -> level mapping",
        )),
    }
}

fn permissions_to_value(p: &PermissionsDecl) -> Value {
    match p {
        PermissionsDecl::Shorthand(s) => Value::Str(s.clone()),
        PermissionsDecl::Detailed(entries) => Value::Map(
            entries
                .iter()
                .map(|(scope, level)| (scope.clone(), Value::Str(level.as_str().to_string())))
                .collect(),
        ),
    }
}

fn parse_tools(map: &Value) -> Result<ToolsSection, CompileError> {
    let tools_value = match map.get("tools") {
        None | Some(Value::Null) => return Ok(ToolsSection::default()),
        Some(Value::Map(entries)) => entries,
        Some(_) => return Err(CompileError::malformed_header("tools", "must be a mapping")),
    };

    let mut entries = Vec::new();
    let mut timeout = None;
    let mut startup_timeout = None;

    for (key, value) in tools_value {
        match key.as_str() {
            "timeout" => {
                timeout = Some(extract_timeout_like(value, "tools.timeout")?);
            }
            "startup-timeout" => {
                startup_timeout = Some(extract_timeout_like(value, "tools.startup-timeout")?);
            }
            _ => entries.push((key.clone(), value.clone())),
        }
    }

    Ok(ToolsSection { entries, timeout, startup_timeout })
}

fn extract_timeout_like(value: &Value, field_path: &str) -> Result<i64, CompileError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(CompileError::new(
            ErrorKind::InvalidTimeout,
            field_path,
            format!("timeout must be a positive integer (seconds), got {other:?}"),
        )),
    }
}

fn tools_to_value(tools: &ToolsSection) -> Value {
    let mut entries = tools.entries.clone();
    if let Some(t) = tools.timeout {
        entries.push(("timeout".into(), Value::Int(t)));
    }
    if let Some(t) = tools.startup_timeout {
        entries.push(("startup-timeout".into(), Value::Int(t)));
    }
    Value::Map(entries)
}

fn parse_runtimes(map: &Value) -> Result<Vec<(String, Value)>, CompileError> {
    match map.get("runtimes") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Map(entries)) => Ok(entries.clone()),
        Some(_) => Err(CompileError::malformed_header("runtimes", "must be a mapping")),
    }
}

fn parse_imports(map: &Value) -> Result<Vec<ImportDecl>, CompileError> {
    match map.get("imports") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::List(items)) => items
            .iter()
            .map(|item| match item {
                Value::Str(path) => Ok(ImportDecl { path: path.clone(), inputs: None }),
                Value::Map(_) => {
                    let path = item
                        .get("path")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            CompileError::malformed_header("imports[].path", "required string")
                        })?
                        .to_string();
                    let inputs = match item.get("inputs") {
                        None | Some(Value::Null) => None,
                        Some(Value::Map(entries)) => Some(entries.clone()),
                        Some(_) => {
                            return Err(CompileError::malformed_header(
                                "imports[].inputs",
                                "must be a mapping",
                            ))
                        }
                    };
                    Ok(ImportDecl { path, inputs })
                }
                _ => Err(CompileError::malformed_header(
                    "imports[]",
                    "must be a path string or {path, inputs}",
                )),
            })
            .collect(),
        Some(_) => Err(CompileError::malformed_header("imports", "must be a list")),
    }
}

fn import_to_value(decl: &ImportDecl) -> Value {
    match &decl.inputs {
        None => Value::Str(decl.path.clone()),
        Some(inputs) => Value::Map(vec![
            ("path".into(), Value::Str(decl.path.clone())),
            ("inputs".into(), Value::Map(inputs.clone())),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_header_parses() {
        let yaml = "on: push\nengine: copilot\ntools:\n  bash: [echo]\n  github:\n    mode: remote\n";
        let cfg = FrontmatterConfig::parse(yaml).unwrap();
        assert_eq!(cfg.engine.id, EngineId::Copilot);
        assert!(cfg.on.get("push").is_some());
        assert_eq!(cfg.tools.entries.len(), 2);
    }

    #[test]
    fn tracker_id_too_short_is_malformed() {
        let yaml = "tracker-id: short\n";
        let err = FrontmatterConfig::parse(yaml).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedHeader);
    }

    #[test]
    fn tools_timeout_non_integer_is_invalid_timeout() {
        let yaml = "tools:\n  timeout: not-a-number\n";
        let err = FrontmatterConfig::parse(yaml).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTimeout);
        assert!(err.hint.contains("timeout"));
    }

    #[test]
    fn tools_meta_keys_removed_from_entries() {
        let yaml = "tools:\n  timeout: 60\n  startup-timeout: 10\n  bash: [echo]\n";
        let cfg = FrontmatterConfig::parse(yaml).unwrap();
        assert_eq!(cfg.tools.timeout, Some(60));
        assert_eq!(cfg.tools.startup_timeout, Some(10));
        assert_eq!(cfg.tools.entries.len(), 1);
        assert_eq!(cfg.tools.entries[0].0, "bash");
    }

    #[test]
    fn on_shorthand_normalizes_to_map() {
        let cfg = FrontmatterConfig::parse("on: push\n").unwrap();
        assert_eq!(cfg.on.as_map().unwrap().len(), 1);
    }

    #[test]
    fn safe_outputs_footer_null_enables_with_defaults() {
        let cfg = FrontmatterConfig::parse("safe-outputs:\n  footer: true\n").unwrap();
        assert_eq!(cfg.footer, Some(true));
    }

    #[test]
    fn empty_header_is_ok() {
        let cfg = FrontmatterConfig::parse("").unwrap();
        assert!(cfg.name.is_none());
        assert_eq!(cfg.engine.id, EngineId::Copilot);
    }

    #[test]
    fn to_map_round_trips_known_fields() {
        let yaml = "name: Test\non: push\nstrict: true\n";
        let cfg = FrontmatterConfig::parse(yaml).unwrap();
        let map = cfg.to_map();
        assert_eq!(map.get("name").unwrap().as_str(), Some("Test"));
        assert_eq!(map.get("strict").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn imports_with_inputs_parse() {
        let yaml = "imports:\n  - path: shared.md\n    inputs:\n      count: 50\n  - other.md\n";
        let cfg = FrontmatterConfig::parse(yaml).unwrap();
        assert_eq!(cfg.imports.len(), 2);
        assert_eq!(cfg.imports[0].path, "shared.md");
        assert!(cfg.imports[0].inputs.is_some());
        assert!(cfg.imports[1].inputs.is_none());
    }
}
