//! Normalizes compiler diagnostics into uniform records and renders
//! multi-diagnostic output with severity icons, counts, and truncation.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn icon(self) -> &'static str {
        match self {
            Severity::Error => "\u{2716}",
            Severity::Warning => "\u{26A0}",
            Severity::Info => "\u{2139}",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Location {
    pub line: u32,
    pub column: u32,
    pub byte_offset: usize,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub message: String,
    pub severity: Severity,
    pub location: Location,
    pub code: Option<String>,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(file: PathBuf, message: impl Into<String>, severity: Severity, location: Location) -> Self {
        let message = message.into();
        let hint = code_from_message(&message).and_then(hint_for_code);
        Self { file, message: strip_location_prefix(message), severity, location, code: code_from_message_raw(&message), hint }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Redundant "file:line:col: " prefixes are common in raw compiler output;
/// since `Diagnostic` already carries structured location, the prefix is
/// stripped from the message text.
static LOCATION_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[^\s:]+:\d+:\d+:\s*").unwrap());

fn strip_location_prefix(message: String) -> String {
    LOCATION_PREFIX.replace(&message, "").into_owned()
}

static CODE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"TS(\d{4,5})").unwrap());

fn code_from_message(message: &str) -> Option<&str> {
    CODE_PATTERN.find(message).map(|m| m.as_str())
}

fn code_from_message_raw(message: &str) -> Option<String> {
    code_from_message(message).map(|s| s.to_string())
}

/// Fixed hint table for a closed list of diagnostic codes.
fn hint_for_code(code: &str) -> Option<String> {
    match code {
        "TS2304" => Some("cannot find name — check the spelling, or add an import or type declaration".to_string()),
        "TS2307" => Some("cannot find module — verify the path or alias mapping is correct".to_string()),
        "TS2322" => Some("type mismatch — the assigned value's type is not compatible with the declared type".to_string()),
        "TS2339" => Some("property does not exist on this type — check for typos or missing type augmentation".to_string()),
        _ => None,
    }
}

/// Maximum number of diagnostics rendered before a truncation notice.
pub const TRUNCATE_AFTER: usize = 10;

/// Renders a batch of diagnostics: a count summary, one line per
/// diagnostic (icon + location + message + hint), truncated after the
/// first [`TRUNCATE_AFTER`].
pub fn render(diagnostics: &[Diagnostic], verbose: bool, source: Option<&str>) -> String {
    let mut out = String::new();
    let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
    let warnings = diagnostics.iter().filter(|d| d.severity == Severity::Warning).count();
    out.push_str(&format!("{errors} error(s), {warnings} warning(s)\n"));

    for diag in diagnostics.iter().take(TRUNCATE_AFTER) {
        out.push_str(&format!(
            "{} {}:{}:{} {}\n",
            diag.severity.icon(),
            diag.file.display(),
            diag.location.line,
            diag.location.column,
            diag.message
        ));
        if let Some(hint) = &diag.hint {
            out.push_str(&format!("  hint: {hint}\n"));
        }
        if verbose {
            if let Some(source) = source {
                if let Some(snippet) = snippet_with_arrow(source, diag.location.line, diag.location.column) {
                    out.push_str(&snippet);
                    out.push('\n');
                }
            }
        }
    }

    if diagnostics.len() > TRUNCATE_AFTER {
        out.push_str(&format!("... and {} more\n", diagnostics.len() - TRUNCATE_AFTER));
    }

    out
}

fn snippet_with_arrow(source: &str, line: u32, column: u32) -> Option<String> {
    let line_text = source.lines().nth(line.checked_sub(1)? as usize)?;
    let col = column.saturating_sub(1) as usize;
    let arrow = format!("{}^", " ".repeat(col));
    Some(format!("    {line_text}\n    {arrow}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(msg: &str, severity: Severity) -> Diagnostic {
        Diagnostic::new(PathBuf::from("a.ts"), msg, severity, Location { line: 1, column: 1, byte_offset: 0 })
    }

    #[test]
    fn strips_redundant_location_prefix() {
        let d = diag("a.ts:1:1: TS2304: Cannot find name 'x'.", Severity::Error);
        assert!(!d.message.starts_with("a.ts"));
    }

    #[test]
    fn attaches_hint_for_known_code() {
        let d = diag("TS2304: Cannot find name 'x'.", Severity::Error);
        assert!(d.hint.is_some());
    }

    #[test]
    fn unknown_code_has_no_hint() {
        let d = diag("TS9999: something obscure.", Severity::Error);
        assert!(d.hint.is_none());
    }

    #[test]
    fn render_truncates_after_ten() {
        let diagnostics: Vec<Diagnostic> =
            (0..15).map(|i| diag(&format!("error #{i}"), Severity::Error)).collect();
        let rendered = render(&diagnostics, false, None);
        assert!(rendered.contains("and 5 more"));
    }
}
