//! Executes one type-check job against an isolated language-service
//! host.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::EffectiveOptions;
use crate::diagnostics::{Diagnostic, Location, Severity};
use crate::source::SourceKind;

#[derive(Debug, Clone)]
pub struct TypeCheckTask {
    pub id: String,
    pub file: PathBuf,
    pub source: String,
    pub kind: SourceKind,
    pub options: EffectiveOptions,
}

#[derive(Debug, Clone, Default)]
pub struct TypeCheckResult {
    pub diagnostics: Vec<Diagnostic>,
    pub has_errors: bool,
}

/// Diagnostic patterns ignored in the SFC synthetic context: unresolved
/// modules, and identifiers the SFC compiler injects (`$props`, `_ctx`,
/// `_cache`) that a plain language service would otherwise flag as unused
/// or undeclared.
const IGNORED_IDENTIFIERS: &[&str] = &["$props", "_ctx", "_cache"];

/// The isolated language-service host a type-check task runs against. The
/// concrete third-party language service is an external interface; this
/// trait is the seam it plugs into, with a heuristic default good enough
/// to drive the rest of the pipeline end to end.
pub trait TypeCheckHost: Send + Sync {
    fn check(&self, task: &TypeCheckTask) -> TypeCheckResult;
}

/// Ambient declarations for the component framework's globals, preferring
/// a project-supplied `.d.ts` shim and falling back to a minimal built-in
/// set. Represented here as the set of identifiers considered
/// pre-declared, since no real declaration-merging language service runs
/// in this crate.
#[derive(Debug, Clone, Default)]
pub struct AmbientShim {
    pub declared_globals: Vec<String>,
}

/// Filenames searched, in order, at the project root for a project-authored
/// ambient shim.
const SHIM_FILE_NAMES: &[&str] = &["shims.d.ts", "ambient.d.ts"];

static DECLARED_GLOBAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*declare\s+(?:const|function|class)\s+(\w+)").unwrap());

impl AmbientShim {
    pub const BUILTIN_GLOBALS: &'static [&'static str] =
        &["defineComponent", "defineProps", "defineEmits", "ref", "reactive", "computed"];

    pub fn builtin() -> Self {
        Self { declared_globals: Self::BUILTIN_GLOBALS.iter().map(|s| s.to_string()).collect() }
    }

    /// Looks for a project-authored `.d.ts` shim at the project root
    /// (`shims.d.ts`, then `ambient.d.ts`) and, if one declares at least one
    /// global, uses exactly its declared identifiers in place of the
    /// built-in set. Falls back to [`Self::builtin`] when no shim file is
    /// present or none of its `declare` statements matched.
    pub fn discover(project_root: &Path) -> Self {
        for name in SHIM_FILE_NAMES {
            let Ok(content) = std::fs::read_to_string(project_root.join(name)) else { continue };
            let globals: Vec<String> = DECLARED_GLOBAL.captures_iter(&content).map(|c| c[1].to_string()).collect();
            if !globals.is_empty() {
                return Self { declared_globals: globals };
            }
        }
        Self::builtin()
    }
}

/// A heuristic host that runs syntactic then semantic passes over the
/// task's source, swallowing exceptions from either so that a partial
/// diagnostic set is always preferable to a crash.
pub struct HeuristicTypeCheckHost {
    shim: AmbientShim,
}

impl HeuristicTypeCheckHost {
    pub fn new(shim: AmbientShim) -> Self {
        Self { shim }
    }
}

impl Default for HeuristicTypeCheckHost {
    fn default() -> Self {
        Self::new(AmbientShim::builtin())
    }
}

impl TypeCheckHost for HeuristicTypeCheckHost {
    fn check(&self, task: &TypeCheckTask) -> TypeCheckResult {
        let mut diagnostics = Vec::new();

        let syntactic = std::panic::catch_unwind(|| syntactic_pass(&task.source, &task.file))
            .unwrap_or_default();
        diagnostics.extend(syntactic);

        let semantic = std::panic::catch_unwind(|| semantic_pass(&task.source, &task.file, &self.shim))
            .unwrap_or_default();
        diagnostics.extend(semantic);

        diagnostics.retain(|d| !is_ignored(&d.message));
        let has_errors = diagnostics.iter().any(Diagnostic::is_error);
        TypeCheckResult { diagnostics, has_errors }
    }
}

fn is_ignored(message: &str) -> bool {
    IGNORED_IDENTIFIERS.iter().any(|id| message.contains(id)) || message.contains("module-not-found")
}

fn syntactic_pass(source: &str, file: &PathBuf) -> Vec<Diagnostic> {
    let mut depth = 0i32;
    for (offset, c) in source.char_indices() {
        match c {
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => {
                depth -= 1;
                if depth < 0 {
                    let (line, column) = line_col(source, offset);
                    return vec![Diagnostic::new(
                        file.clone(),
                        "TS1005: unexpected closing bracket".to_string(),
                        Severity::Error,
                        Location { line, column, byte_offset: offset },
                    )];
                }
            }
            _ => {}
        }
    }
    Vec::new()
}

fn semantic_pass(source: &str, file: &PathBuf, shim: &AmbientShim) -> Vec<Diagnostic> {
    // Minimal stand-in for real type inference: flag use of `any` escape
    // hatches so the "has type errors" branch is exercisable, while never
    // flagging ambient-shim identifiers.
    let mut diagnostics = Vec::new();
    for (idx, _) in source.match_indices(": any") {
        if shim.declared_globals.iter().any(|g| source[..idx].ends_with(g)) {
            continue;
        }
        let (line, column) = line_col(source, idx);
        diagnostics.push(Diagnostic::new(
            file.clone(),
            "TS2322: explicit `any` defeats type checking here".to_string(),
            Severity::Warning,
            Location { line, column, byte_offset: idx },
        ));
    }
    diagnostics
}

fn line_col(source: &str, byte_offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;
    for c in source[..byte_offset.min(source.len())].chars() {
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EffectiveOptions;

    fn opts() -> EffectiveOptions {
        EffectiveOptions {
            alias_map: vec![],
            production: false,
            type_check: true,
            jsx_mode: "preserve".into(),
            module_resolution: "node".into(),
            lib: vec![],
            production_library_urls: Default::default(),
        }
    }

    #[test]
    fn valid_source_has_no_errors() {
        let host = HeuristicTypeCheckHost::default();
        let task = TypeCheckTask {
            id: "t1".into(),
            file: "a.ts".into(),
            source: "export const x = 1;".into(),
            kind: SourceKind::TypedScript,
            options: opts(),
        };
        let result = host.check(&task);
        assert!(!result.has_errors);
    }

    #[test]
    fn unbalanced_source_reports_error() {
        let host = HeuristicTypeCheckHost::default();
        let task = TypeCheckTask {
            id: "t2".into(),
            file: "a.ts".into(),
            source: "export const x = (1;".into(),
            kind: SourceKind::TypedScript,
            options: opts(),
        };
        let result = host.check(&task);
        assert!(result.has_errors);
    }

    #[test]
    fn discover_falls_back_to_builtin_without_a_shim_file() {
        let dir = tempfile::tempdir().unwrap();
        let shim = AmbientShim::discover(dir.path());
        assert_eq!(shim.declared_globals, AmbientShim::builtin().declared_globals);
    }

    #[test]
    fn discover_prefers_project_shim_globals() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shims.d.ts"), "declare const myGlobal: string;\ndeclare function myHelper(): void;").unwrap();
        let shim = AmbientShim::discover(dir.path());
        assert_eq!(shim.declared_globals, vec!["myGlobal".to_string(), "myHelper".to_string()]);
    }

    #[test]
    fn ignored_synthetic_identifiers_are_filtered() {
        let host = HeuristicTypeCheckHost::default();
        let task = TypeCheckTask {
            id: "t3".into(),
            file: "a.sfc".into(),
            source: "function render(_ctx: any) {}".into(),
            kind: SourceKind::Sfc,
            options: opts(),
        };
        let result = host.check(&task);
        assert!(result.diagnostics.is_empty());
    }
}
