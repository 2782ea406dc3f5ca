//! Stage `rewrite_imports`: rewrites module specifiers per the configured
//! alias map, with production library-URL substitution and extensionless-
//! specifier resolution.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{AliasMap, EffectiveOptions};
use crate::diagnostics::{Diagnostic, Location, Severity};

static IMPORT_SPECIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^(?P<prefix>\s*(?:import|export)\b[^'"]*?from\s+)(?P<quote>['"])(?P<spec>[^'"]+)(?P=quote)"#).unwrap()
});

const RESOLVABLE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "sfc"];

/// Rewrites every `import ... from "spec"` / `export ... from "spec"`
/// specifier in `code`. `resolve` answers whether an extensionless
/// specifier resolves to an on-disk file, returning the resolved extension.
pub fn rewrite_imports(
    code: &str,
    filename: &PathBuf,
    options: &EffectiveOptions,
    resolve: &dyn Fn(&Path) -> Option<&'static str>,
) -> (String, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();

    let rewritten = IMPORT_SPECIFIER
        .replace_all(code, |caps: &regex::Captures| {
            let prefix = &caps["prefix"];
            let quote = &caps["quote"];
            let spec = &caps["spec"];

            let rewritten_spec = rewrite_one_specifier(spec, filename, options, resolve, &mut diagnostics);
            format!("{prefix}{quote}{rewritten_spec}{quote}")
        })
        .into_owned();

    (rewritten, diagnostics)
}

fn rewrite_one_specifier(
    spec: &str,
    filename: &PathBuf,
    options: &EffectiveOptions,
    resolve: &dyn Fn(&Path) -> Option<&'static str>,
    diagnostics: &mut Vec<Diagnostic>,
) -> String {
    if let Some(production_url) = options.production.then(|| lookup_production_library(spec, &options.production_library_urls)).flatten() {
        return production_url;
    }

    let aliased = resolve_alias(spec, &options.alias_map).unwrap_or_else(|| spec.to_string());

    if has_known_extension(&aliased) {
        return aliased;
    }

    match resolve(Path::new(&aliased)) {
        Some(ext) => {
            let rooted = aliased.strip_prefix('/').unwrap_or(&aliased);
            format!("/{rooted}.{ext}")
        }
        None => {
            diagnostics.push(Diagnostic::new(
                filename.clone(),
                format!("could not resolve import specifier `{spec}` to a file on disk"),
                Severity::Warning,
                Location { line: 0, column: 0, byte_offset: 0 },
            ));
            aliased
        }
    }
}

fn has_known_extension(spec: &str) -> bool {
    RESOLVABLE_EXTENSIONS.iter().any(|ext| spec.ends_with(&format!(".{ext}")))
}

fn lookup_production_library(spec: &str, urls: &std::collections::BTreeMap<String, String>) -> Option<String> {
    urls.get(spec).cloned()
}

/// Leftmost-longest alias match; ties resolved by declaration order.
/// Patterns use a single trailing `*` wildcard, e.g. `"@/*"`.
fn resolve_alias(spec: &str, alias_map: &AliasMap) -> Option<String> {
    let mut best: Option<(usize, usize, String)> = None; // (matched prefix len, declaration index, replacement)

    for (index, (pattern, replacement)) in alias_map.iter().enumerate() {
        let Some(prefix) = pattern.strip_suffix('*') else {
            if pattern == spec {
                let candidate = (pattern.len(), index, replacement.clone());
                if best.as_ref().map_or(true, |b| candidate.0 > b.0) {
                    best = Some(candidate);
                }
            }
            continue;
        };

        if let Some(rest) = spec.strip_prefix(prefix) {
            let expanded = replacement.strip_suffix('*').map(|r| format!("{r}{rest}")).unwrap_or_else(|| replacement.clone());
            let candidate = (prefix.len(), index, expanded);
            match &best {
                Some(b) if b.0 > candidate.0 => {}
                Some(b) if b.0 == candidate.0 && b.1 <= index => {}
                _ => best = Some(candidate),
            }
        }
    }

    best.map(|(_, _, replacement)| replacement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EffectiveOptions;

    fn options(alias_map: AliasMap, production: bool) -> EffectiveOptions {
        EffectiveOptions {
            alias_map,
            production,
            type_check: false,
            jsx_mode: "preserve".into(),
            module_resolution: "node".into(),
            lib: vec![],
            production_library_urls: Default::default(),
        }
    }

    #[test]
    fn resolves_alias_and_extension() {
        let opts = options(vec![("@/*".into(), "src/*".into())], false);
        let resolve = |p: &Path| if p == Path::new("src/util") { Some("js") } else { None };
        let (out, diags) = rewrite_imports(r#"import x from "@/util";"#, &PathBuf::from("a.ts"), &opts, &resolve);
        assert_eq!(out, r#"import x from "/src/util.js";"#);
        assert!(diags.is_empty());
    }

    #[test]
    fn unresolved_alias_keeps_specifier_and_warns() {
        let opts = options(vec![("@/*".into(), "src/*".into())], false);
        let resolve = |_: &Path| None;
        let (out, diags) = rewrite_imports(r#"import x from "@/missing";"#, &PathBuf::from("a.ts"), &opts, &resolve);
        assert_eq!(out, r#"import x from "src/missing";"#);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn leftmost_longest_alias_wins() {
        let opts = options(vec![("@/*".into(), "src/*".into()), ("@/util/*".into(), "lib/util/*".into())], false);
        let resolve = |_: &Path| Some("js");
        let (out, _) = rewrite_imports(r#"import x from "@/util/thing";"#, &PathBuf::from("a.ts"), &opts, &resolve);
        assert_eq!(out, r#"import x from "/lib/util/thing.js";"#);
    }

    #[test]
    fn production_library_url_overrides_alias() {
        let mut opts = options(vec![], true);
        opts.production_library_urls.insert("react".into(), "https://cdn.example/react.js".into());
        let resolve = |_: &Path| Some("js");
        let (out, _) = rewrite_imports(r#"import React from "react";"#, &PathBuf::from("a.ts"), &opts, &resolve);
        assert_eq!(out, r#"import React from "https://cdn.example/react.js";"#);
    }
}
