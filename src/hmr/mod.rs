//! HMR Strategy Engine: classifies a changed module and emits an update
//! directive.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::source::SourceKind;

/// Sum type of dev-server update directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HmrDirective {
    SelfAccept { module_id: String },
    Propagate { module_id: String, affected_dependents: Vec<PathBuf> },
    ComponentReload { component_id: String },
    FullReload { reason: String },
    LibraryHotSwap { global_name: String, new_url: String },
}

static HOT_ACCEPT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"import\.meta\.hot\s*\.\s*accept\s*\(|module\.hot\s*\.\s*accept\s*\(").unwrap()
});

/// Top-level statement shapes considered pure declarations: variable,
/// function, class, interface/type, and export re-statements of the same.
/// Anything else at the top level (a bare call expression, an `if`, a
/// side-effecting assignment) disqualifies `Propagate`.
static TOP_LEVEL_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(export\s+)?(default\s+)?(const|let|var|function\*?|async\s+function|class|interface|type|import)\b").unwrap()
});
static NON_DECLARATION_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[^\s/].*$").unwrap());

/// A static map of library import paths to their browser-side globals,
/// consulted when no other classification applies.
pub type LibraryMap = std::collections::BTreeMap<String, String>;

pub struct HmrEngine {
    library_map: LibraryMap,
}

impl HmrEngine {
    pub fn new(library_map: LibraryMap) -> Self {
        Self { library_map }
    }

    /// Classifies a changed module in priority order, given the transformed
    /// artifact, the file's kind, its module id, and its dependents from the
    /// compilation cache's reverse graph.
    pub fn classify(
        &self,
        path: &Path,
        kind: SourceKind,
        module_id: &str,
        artifact: &str,
        dependents: Vec<PathBuf>,
    ) -> HmrDirective {
        if kind == SourceKind::Sfc {
            return HmrDirective::ComponentReload { component_id: module_id.to_string() };
        }

        if HOT_ACCEPT_MARKER.is_match(artifact) {
            return HmrDirective::SelfAccept { module_id: module_id.to_string() };
        }

        if Self::is_side_effect_free(artifact) {
            return HmrDirective::Propagate { module_id: module_id.to_string(), affected_dependents: dependents };
        }

        if let Some(new_url) = self.lookup_library(path) {
            let global_name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
            return HmrDirective::LibraryHotSwap { global_name, new_url };
        }

        HmrDirective::FullReload { reason: "indeterminate".to_string() }
    }

    fn lookup_library(&self, path: &Path) -> Option<String> {
        let path_str = path.to_string_lossy();
        self.library_map
            .iter()
            .find(|(lib_path, _)| path_str.contains(lib_path.as_str()))
            .map(|(_, url)| url.clone())
    }

    /// A conservative, shallow structural scan: a module is considered
    /// side-effect-free only if every non-blank, non-comment top-level line
    /// matches a pure declaration shape. The engine never emits
    /// `Propagate` (which implies no `SelfAccept` marker was needed) unless
    /// this scan proves it — a false positive here would silently drop an
    /// update, so this errs toward `FullReload`.
    fn is_side_effect_free(code: &str) -> bool {
        let mut depth = 0i32;
        for line in code.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            if depth == 0 {
                if !TOP_LEVEL_STATEMENT.is_match(line) {
                    return false;
                }
            }
            for c in trimmed.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> HmrEngine {
        let mut map = LibraryMap::new();
        map.insert("node_modules/react".to_string(), "https://cdn.example/react.js".to_string());
        HmrEngine::new(map)
    }

    #[test]
    fn sfc_always_component_reloads() {
        let directive = engine().classify(Path::new("a.sfc"), SourceKind::Sfc, "a", "anything", vec![]);
        assert_eq!(directive, HmrDirective::ComponentReload { component_id: "a".to_string() });
    }

    #[test]
    fn hot_accept_marker_yields_self_accept() {
        let code = "export const x = 1;\nimport.meta.hot.accept(() => {});";
        let directive = engine().classify(Path::new("a.ts"), SourceKind::TypedScript, "a", code, vec![]);
        assert_eq!(directive, HmrDirective::SelfAccept { module_id: "a".to_string() });
    }

    #[test]
    fn pure_declarations_propagate() {
        let code = "export const x = 1;\nfunction f() { return 1; }";
        let directive = engine().classify(
            Path::new("a.ts"),
            SourceKind::TypedScript,
            "a",
            code,
            vec![PathBuf::from("b.ts")],
        );
        assert_eq!(
            directive,
            HmrDirective::Propagate { module_id: "a".to_string(), affected_dependents: vec![PathBuf::from("b.ts")] }
        );
    }

    #[test]
    fn side_effecting_top_level_call_never_self_accepts_or_propagates() {
        let code = "console.log('side effect');\nexport const x = 1;";
        let directive = engine().classify(Path::new("a.ts"), SourceKind::TypedScript, "a", code, vec![]);
        assert!(matches!(directive, HmrDirective::FullReload { .. } | HmrDirective::LibraryHotSwap { .. }));
    }

    #[test]
    fn known_library_path_hot_swaps() {
        let code = "console.log('side effect');";
        let directive = engine().classify(
            Path::new("node_modules/react/index.js"),
            SourceKind::PlainScript,
            "react",
            code,
            vec![],
        );
        assert!(matches!(directive, HmrDirective::LibraryHotSwap { .. }));
    }

    #[test]
    fn unclassifiable_module_falls_back_to_full_reload() {
        let code = "console.log('side effect');";
        let directive = engine().classify(Path::new("a.ts"), SourceKind::TypedScript, "a", code, vec![]);
        assert_eq!(directive, HmrDirective::FullReload { reason: "indeterminate".to_string() });
    }
}
