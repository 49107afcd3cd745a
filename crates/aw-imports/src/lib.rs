//! Import resolution: locating, parsing, and merging imported workflow
//! fragments (spec.md §4.2).
//!
//! File access is abstracted behind [`FileLoader`] rather than called
//! directly, the same injected-collaborator shape the validator's
//! `DockerProbe` uses — it keeps this crate deterministic and testable
//! without touching a real filesystem.

use aw_types::{merge, CompileError, ErrorKind, ImportDecl, Precedence, Value};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

pub trait FileLoader {
    fn read(&self, path: &Path) -> Result<String, CompileError>;
}

/// Reads imported fragments from the real filesystem.
pub struct FsLoader;

impl FileLoader for FsLoader {
    fn read(&self, path: &Path) -> Result<String, CompileError> {
        std::fs::read_to_string(path).map_err(|e| {
            CompileError::new(
                ErrorKind::ImportNotFound,
                path.display().to_string(),
                format!("could not read imported file: {e}"),
            )
        })
    }
}

/// The outcome of resolving a frontmatter `imports` list: the header
/// merged in with import-lower-priority semantics, the concatenated body
/// text contributed by inputs-bearing imports (to be prepended to the
/// main body), and the input-less import paths (to be emitted as
/// `{{#runtime-import PATH}}` markers).
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub merged_header: Value,
    pub body_prefix: String,
    pub runtime_macros: Vec<String>,
}

pub fn resolve_imports(
    main_header: &Value,
    imports: &[ImportDecl],
    base_dir: &Path,
    loader: &dyn FileLoader,
) -> Result<ImportResult, CompileError> {
    let mut merged_header = main_header.clone();
    let mut body_prefix = String::new();
    let mut runtime_macros = Vec::new();
    let mut visiting: Vec<PathBuf> = Vec::new();

    resolve_recursive(imports, base_dir, loader, &mut merged_header, &mut body_prefix, &mut runtime_macros, &mut visiting)?;

    Ok(ImportResult { merged_header, body_prefix, runtime_macros })
}

#[allow(clippy::too_many_arguments)]
fn resolve_recursive(
    imports: &[ImportDecl],
    base_dir: &Path,
    loader: &dyn FileLoader,
    merged_header: &mut Value,
    body_prefix: &mut String,
    runtime_macros: &mut Vec<String>,
    visiting: &mut Vec<PathBuf>,
) -> Result<(), CompileError> {
    for decl in imports {
        let resolved = lexical_normalize(&base_dir.join(&decl.path));

        if visiting.contains(&resolved) {
            let mut chain: Vec<String> = visiting.iter().map(|p| p.display().to_string()).collect();
            chain.push(resolved.display().to_string());
            return Err(CompileError::new(
                ErrorKind::ImportCycle,
                decl.path.clone(),
                format!("import cycle: {}", chain.join(" -> ")),
            ));
        }

        let content = loader.read(&resolved)?;
        let (header_text, body_text) = split_frontmatter(&content);
        let header_value = parse_header_value(&header_text)?;

        *merged_header = merge(merged_header, &header_value, Precedence::MainWins);

        visiting.push(resolved.clone());
        if let Some(nested_raw) = header_value.get("imports") {
            let nested_decls = parse_import_decls(nested_raw)?;
            let nested_dir = resolved.parent().map(Path::to_path_buf).unwrap_or_else(|| base_dir.to_path_buf());
            resolve_recursive(&nested_decls, &nested_dir, loader, merged_header, body_prefix, runtime_macros, visiting)?;
        }
        visiting.pop();

        match &decl.inputs {
            Some(inputs) => {
                let substituted = substitute_inputs(&body_text, inputs);
                if !body_prefix.is_empty() {
                    body_prefix.push('\n');
                }
                body_prefix.push_str(&substituted);
            }
            None => runtime_macros.push(decl.path.clone()),
        }
    }
    Ok(())
}

/// Collapse `.`/`..` components lexically (no filesystem access, so this
/// works for paths that don't exist yet in tests).
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Split `---\n<header>\n---\n<body>` per spec.md §6; a missing header is
/// treated as empty.
pub fn split_frontmatter(content: &str) -> (String, String) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (String::new(), content.to_string());
    };
    match rest.find("\n---\n") {
        Some(idx) => (rest[..idx].to_string(), rest[idx + "\n---\n".len()..].to_string()),
        None => (String::new(), content.to_string()),
    }
}

fn parse_header_value(header_text: &str) -> Result<Value, CompileError> {
    if header_text.trim().is_empty() {
        return Ok(Value::Map(Vec::new()));
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(header_text)
        .map_err(|e| CompileError::malformed_header("<import-header>", e.to_string()))?;
    Value::from_yaml(&yaml).map_err(|e| CompileError::malformed_header("<import-header>", e))
}

fn parse_import_decls(value: &Value) -> Result<Vec<ImportDecl>, CompileError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => items
            .iter()
            .map(|item| match item {
                Value::Str(path) => Ok(ImportDecl { path: path.clone(), inputs: None }),
                Value::Map(_) => {
                    let path = item
                        .get("path")
                        .and_then(Value::as_str)
                        .ok_or_else(|| CompileError::malformed_header("imports[].path", "required string"))?
                        .to_string();
                    let inputs = match item.get("inputs") {
                        None | Some(Value::Null) => None,
                        Some(Value::Map(entries)) => Some(entries.clone()),
                        Some(_) => return Err(CompileError::malformed_header("imports[].inputs", "must be a mapping")),
                    };
                    Ok(ImportDecl { path, inputs })
                }
                _ => Err(CompileError::malformed_header("imports[]", "must be a path string or {path, inputs}")),
            })
            .collect(),
        _ => Err(CompileError::malformed_header("imports", "must be a list")),
    }
}

fn include_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@include\(([^)]+)\)").unwrap())
}

/// Expand `@include(path)` body macros (spec.md §6) by textually
/// inlining the referenced file's contents; `path` is resolved relative
/// to `base_dir`. Expansion is not recursive — an included file's own
/// `@include(...)` markers, if any, are left untouched, matching the
/// compile-time-inclusion-only semantics `imports:` already covers for
/// header-level composition.
pub fn expand_includes(body: &str, base_dir: &Path, loader: &dyn FileLoader) -> Result<String, CompileError> {
    let mut err: Option<CompileError> = None;
    let expanded = include_pattern()
        .replace_all(body, |caps: &regex::Captures| {
            if err.is_some() {
                return String::new();
            }
            let raw_path = caps[1].trim();
            let resolved = lexical_normalize(&base_dir.join(raw_path));
            match loader.read(&resolved) {
                Ok(content) => content,
                Err(_) => {
                    err = Some(CompileError::new(
                        ErrorKind::IncludeNotFound,
                        raw_path.to_string(),
                        format!("included file '{raw_path}' could not be read"),
                    ));
                    String::new()
                }
            }
        })
        .into_owned();

    match err {
        Some(e) => Err(e),
        None => Ok(expanded),
    }
}

fn input_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{\{\s*github\.aw\.inputs\.([A-Za-z0-9_]+)\s*\}\}").unwrap())
}

/// Substitute `${{ github.aw.inputs.NAME }}` occurrences with the literal
/// provided input value (strings as-is, numbers rendered canonically).
/// Names with no matching input are left unsubstituted.
pub fn substitute_inputs(body: &str, inputs: &[(String, Value)]) -> String {
    input_pattern()
        .replace_all(body, |caps: &regex::Captures| {
            let name = &caps[1];
            match inputs.iter().find(|(k, _)| k == name) {
                Some((_, value)) => value.render_scalar(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
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

    #[test]
    fn split_frontmatter_separates_header_and_body() {
        let (header, body) = split_frontmatter("---\non: push\n---\n# Test\n");
        assert_eq!(header, "on: push");
        assert_eq!(body, "# Test\n");
    }

    #[test]
    fn split_frontmatter_handles_missing_header() {
        let (header, body) = split_frontmatter("# Test\n");
        assert_eq!(header, "");
        assert_eq!(body, "# Test\n");
    }

    #[test]
    fn substitute_inputs_renders_numbers_canonically() {
        let body = "Count is ${{ github.aw.inputs.count }}.";
        let out = substitute_inputs(body, &[("count".to_string(), Value::Int(50))]);
        assert_eq!(out, "Count is 50.");
    }

    #[test]
    fn substitute_inputs_leaves_unknown_names_untouched() {
        let body = "${{ github.aw.inputs.missing }}";
        let out = substitute_inputs(body, &[("count".to_string(), Value::Int(50))]);
        assert_eq!(out, body);
    }

    #[test]
    fn resolve_imports_merges_header_and_prepends_substituted_body() {
        let mut files = HashMap::new();
        files.insert(
            PathBuf::from("included.md"),
            "---\ntools:\n  bash: [ls]\n---\nUse ${{ github.aw.inputs.count }} items.\n".to_string(),
        );
        let loader = MapLoader(files);
        let main_header = Value::Map(vec![("tools".to_string(), Value::Map(vec![("bash".to_string(), Value::List(vec![Value::Str("echo".into())]))]))]);
        let decl = ImportDecl { path: "included.md".to_string(), inputs: Some(vec![("count".to_string(), Value::Int(50))]) };

        let result = resolve_imports(&main_header, &[decl], Path::new(""), &loader).unwrap();
        assert!(result.body_prefix.contains("Use 50 items."));
        assert!(result.runtime_macros.is_empty());
        let bash = result.merged_header.get("tools").unwrap().get("bash").unwrap();
        let items: Vec<&str> = bash.as_list().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(items, vec!["echo", "ls"]);
    }

    #[test]
    fn resolve_imports_records_input_less_import_as_runtime_macro() {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("shared.md"), "---\n---\nshared body\n".to_string());
        let loader = MapLoader(files);
        let decl = ImportDecl { path: "shared.md".to_string(), inputs: None };

        let result = resolve_imports(&Value::Map(Vec::new()), &[decl], Path::new(""), &loader).unwrap();
        assert_eq!(result.runtime_macros, vec!["shared.md".to_string()]);
        assert!(result.body_prefix.is_empty());
    }

    #[test]
    fn resolve_imports_detects_self_cycle() {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("a.md"), "---\nimports:\n  - a.md\n---\nbody\n".to_string());
        let loader = MapLoader(files);
        let decl = ImportDecl { path: "a.md".to_string(), inputs: None };

        let err = resolve_imports(&Value::Map(Vec::new()), &[decl], Path::new(""), &loader).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ImportCycle);
    }

    #[test]
    fn resolve_imports_reports_not_found() {
        let loader = MapLoader(HashMap::new());
        let decl = ImportDecl { path: "missing.md".to_string(), inputs: None };
        let err = resolve_imports(&Value::Map(Vec::new()), &[decl], Path::new(""), &loader).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ImportNotFound);
    }

    #[test]
    fn expand_includes_inlines_referenced_file() {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("snippet.md"), "shared snippet text".to_string());
        let loader = MapLoader(files);
        let body = "Before\n@include(snippet.md)\nAfter\n";
        let expanded = expand_includes(body, Path::new(""), &loader).unwrap();
        assert_eq!(expanded, "Before\nshared snippet text\nAfter\n");
    }

    #[test]
    fn expand_includes_reports_missing_file() {
        let loader = MapLoader(HashMap::new());
        let err = expand_includes("@include(missing.md)", Path::new(""), &loader).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncludeNotFound);
    }
}
