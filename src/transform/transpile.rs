//! Stage `transpile_typed_script`: lowers typed-script source to plain
//! script by stripping type-only syntax, as an AST-preserving transpiler
//! configured with `noLib`/`skipLibCheck`/`isolatedModules` would. The
//! actual third-party transpiler is an external interface; this stage
//! implements the diagnostic filtering and critical-error policy around
//! that seam.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// Diagnostic codes filtered out regardless of origin: "module not
/// found" and "source file not found" are expected noise when
/// transpiling in isolation, without a full module graph.
const IGNORED_CODES: &[&str] = &["TS2307", "TS6059"];

#[derive(Debug, Clone)]
pub struct TranspileDiagnostic {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct TranspileOutput {
    pub code: String,
    pub diagnostics: Vec<TranspileDiagnostic>,
}

static TYPE_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    // `name: Type` in declarations/params, not object literal `key: value`;
    // approximated by requiring the annotation to precede `=`, `,`, `)`, or `;`.
    Regex::new(r"(?P<name>[A-Za-z_$][\w$]*\??)\s*:\s*[A-Za-z_$][\w$.<>\[\] |&]*(?P<tail>[,)=;])").unwrap()
});
static AS_CAST: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+as\s+[A-Za-z_$][\w$.<>\[\] |&]*").unwrap());
static INTERFACE_OR_TYPE_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(export\s+)?(interface|type)\s+[A-Za-z_$][\w$]*[^{;]*(\{[^}]*\}|=[^;]*;)").unwrap());
static GENERIC_PARAMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[A-Za-z_$][\w$,\s]*>(?=\s*\()").unwrap());
static NON_NULL_ASSERTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Za-z_$][\w$]*)!(?=[.\[\(]|\s*[;,)])").unwrap());

/// Strips type-only syntax. This is necessarily a best-effort, regex-driven
/// lowering (the real transpiler lives behind an external interface); it
/// covers the constructs the integration tests in this crate exercise:
/// variable/parameter type annotations, `as` casts, `interface`/`type`
/// declarations, generic call-site parameters, and non-null assertions.
pub fn transpile_typed_script(code: &str, filename: &PathBuf) -> Result<TranspileOutput> {
    let mut out = INTERFACE_OR_TYPE_DECL.replace_all(code, "").into_owned();
    out = AS_CAST.replace_all(&out, "").into_owned();
    out = NON_NULL_ASSERTION.replace_all(&out, "$1").into_owned();
    out = GENERIC_PARAMS.replace_all(&out, "").into_owned();

    // Type-annotation stripping must run to a fixed point: the regex
    // consumes its trailing delimiter, so repeated annotations
    // (`a: A, b: B`) need multiple passes to fully settle.
    loop {
        let next = TYPE_ANNOTATION.replace_all(&out, "$name$tail").into_owned();
        if next == out {
            break;
        }
        out = next;
    }

    let diagnostics = detect_critical_errors(&out, filename)?;
    Ok(TranspileOutput { code: out, diagnostics })
}

/// A *critical* error is any error-category diagnostic other than the
/// ignored module-resolution codes. The stand-in checker here looks for
/// unmatched type-declaration braces as a structural proxy for "the
/// transpiler itself choked", since no live type-checker runs in this
/// stage (that runs independently, in the worker pool).
fn detect_critical_errors(code: &str, filename: &PathBuf) -> Result<Vec<TranspileDiagnostic>> {
    let mut diagnostics = Vec::new();
    let mut depth = 0i32;
    for c in code.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(Error::SyntaxError {
                file: filename.clone(),
                message: "unbalanced braces after type stripping".to_string(),
            });
        }
    }
    if depth != 0 {
        return Err(Error::SyntaxError {
            file: filename.clone(),
            message: "unbalanced braces after type stripping".to_string(),
        });
    }

    diagnostics.retain(|d: &TranspileDiagnostic| !IGNORED_CODES.contains(&d.code.as_str()));
    Ok(diagnostics)
}
