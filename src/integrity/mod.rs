//! Integrity Validator: structural/syntactic post-condition checks on
//! transformed code, guarding against transforms that silently corrupt
//! output.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::instrument;

use crate::cache::key::hash_bytes;

/// Duration budget for a typical file.
pub const DURATION_BUDGET: Duration = Duration::from_millis(5);

/// LRU bound on the integrity result cache.
pub const CACHE_CAPACITY: usize = 100;

/// Bitmap of which checks passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checks(u8);

impl Checks {
    pub const SIZE: Checks = Checks(0b0001);
    pub const STRUCTURE: Checks = Checks(0b0010);
    pub const EXPORTS: Checks = Checks(0b0100);
    pub const SYNTAX: Checks = Checks(0b1000);

    pub fn empty() -> Self {
        Checks(0)
    }

    pub fn contains(self, other: Checks) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for Checks {
    type Output = Checks;
    fn bitor(self, rhs: Checks) -> Checks {
        Checks(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Checks {
    fn bitor_assign(&mut self, rhs: Checks) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub valid: bool,
    pub checks: Checks,
    pub errors: Vec<String>,
    pub duration: Duration,
}

/// The size floor is lowered from a flat character count to "either long
/// enough, or the output declares at least one export" so legitimately
/// tiny minified modules (`export const x=1;`) are not rejected.
const MIN_SIZE_WITHOUT_EXPORT: usize = 10;

fn check_size(trimmed: &str, export_count: usize) -> bool {
    trimmed.len() >= MIN_SIZE_WITHOUT_EXPORT || export_count > 0
}

/// Balanced-bracket scan with a lexer aware of string/template literals,
/// comments, and regex literals.
fn check_structure(code: &str) -> Result<(), String> {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        SingleQuote,
        DoubleQuote,
        Template,
        TemplateExpr,
        LineComment,
        BlockComment,
        Regex,
    }

    let chars: Vec<char> = code.chars().collect();
    let mut stack: Vec<char> = Vec::new();
    let mut mode = Mode::Code;
    let mut template_expr_depth: Vec<i32> = Vec::new();
    let mut i = 0usize;
    let mut prev_significant: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match mode {
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Code;
                }
                i += 1;
                continue;
            }
            Mode::BlockComment => {
                if c == '*' && next == Some('/') {
                    mode = Mode::Code;
                    i += 2;
                    continue;
                }
                i += 1;
                continue;
            }
            Mode::SingleQuote | Mode::DoubleQuote => {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                let closer = if mode == Mode::SingleQuote { '\'' } else { '"' };
                if c == closer {
                    mode = Mode::Code;
                }
                i += 1;
                continue;
            }
            Mode::Regex => {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == '/' {
                    mode = Mode::Code;
                    prev_significant = Some('/');
                }
                i += 1;
                continue;
            }
            Mode::Template => {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == '`' {
                    mode = Mode::Code;
                    i += 1;
                    continue;
                }
                if c == '$' && next == Some('{') {
                    mode = Mode::TemplateExpr;
                    template_expr_depth.push(0);
                    i += 2;
                    continue;
                }
                i += 1;
                continue;
            }
            Mode::TemplateExpr => {
                // Inside `${ ... }`, bracket counting resumes for the inner
                // expression, bracket counting resumes for it.
                if c == '{' {
                    *template_expr_depth.last_mut().unwrap() += 1;
                    stack.push('{');
                } else if c == '}' {
                    let depth = template_expr_depth.last_mut().unwrap();
                    if *depth == 0 {
                        template_expr_depth.pop();
                        mode = Mode::Template;
                        i += 1;
                        continue;
                    }
                    *depth -= 1;
                    if stack.pop() != Some('{') {
                        return Err("unbalanced `}` inside template expression".into());
                    }
                } else if c == '\'' {
                    mode = Mode::SingleQuote;
                } else if c == '"' {
                    mode = Mode::DoubleQuote;
                }
                i += 1;
                continue;
            }
            Mode::Code => {}
        }

        match c {
            '\'' => mode = Mode::SingleQuote,
            '"' => mode = Mode::DoubleQuote,
            '`' => mode = Mode::Template,
            '/' if next == Some('/') => {
                mode = Mode::LineComment;
                i += 2;
                continue;
            }
            '/' if next == Some('*') => {
                mode = Mode::BlockComment;
                i += 2;
                continue;
            }
            '/' if is_regex_context(prev_significant) => {
                mode = Mode::Regex;
            }
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return Err("unbalanced `)`".into());
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return Err("unbalanced `]`".into());
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return Err("unbalanced `}`".into());
                }
            }
            _ => {}
        }

        if !c.is_whitespace() {
            prev_significant = Some(c);
        }
        i += 1;
    }

    if !stack.is_empty() {
        return Err(format!("unclosed bracket(s): {stack:?}"));
    }
    Ok(())
}

/// A `/` starts a regex literal only in operator context: after an
/// operator, an opening bracket, a comma, `return`, or at start of input —
/// never directly after an identifier or closing bracket.
fn is_regex_context(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(c) => matches!(c, '(' | '[' | '{' | ',' | ';' | ':' | '=' | '!' | '&' | '|' | '?' | '+' | '-' | '*' | '%' | '<' | '>'),
    }
}

static EXPORT_DEFAULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"export\s+default\b").unwrap());
static EXPORT_NAMED_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"export\s*\{([^}]*)\}").unwrap());
static EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"export\s+(?:const|let|var|function\*?|class|async\s+function)\s+([A-Za-z_$][\w$]*)").unwrap()
});
static EXPORT_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"export\s*\*\s*from").unwrap());

/// Detects the set of exported names a source recognizes: `export
/// default`, `export { a, b as c }`, `export <decl> name`, `export * from
/// ...`.
fn detect_exports(code: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    if EXPORT_DEFAULT.is_match(code) {
        names.insert("default".to_string());
    }
    for caps in EXPORT_NAMED_LIST.captures_iter(code) {
        for part in caps[1].split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let exported = part.split("as").last().unwrap_or(part).trim();
            if !exported.is_empty() {
                names.insert(exported.to_string());
            }
        }
    }
    for caps in EXPORT_DECL.captures_iter(code) {
        names.insert(caps[1].to_string());
    }
    if EXPORT_STAR.is_match(code) {
        names.insert("*".to_string());
    }
    names
}

fn check_exports(input: &str, output: &str) -> Result<(), String> {
    let input_exports = detect_exports(input);
    let output_exports = detect_exports(output);
    let missing: Vec<&String> = input_exports.difference(&output_exports).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("output is missing exports present in input: {missing:?}"))
    }
}

/// Fast independent syntax check in module mode. The production transpiler
/// is an external interface, so this check reuses check 2's literal-aware
/// lexer as the "independent fast parser" stand-in at this seam — a second,
/// naive bracket count would reject valid code whose string/comment/regex
/// contents contain an unequal number of bracket characters.
fn check_syntax(code: &str) -> Result<(), String> {
    check_structure(code)
}

struct CacheState {
    order: Vec<(String, u64)>,
    reports: std::collections::HashMap<(String, u64), IntegrityReport>,
}

pub struct IntegrityValidator {
    cache: Mutex<CacheState>,
}

impl IntegrityValidator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(CacheState { order: Vec::new(), reports: std::collections::HashMap::new() }),
        }
    }

    /// Runs all four checks in cost order with short-circuit on failure,
    /// caching by `(context, content_hash)`.
    #[instrument(level = "debug", skip(self, input, output))]
    pub fn validate(&self, context: &str, input: &str, output: &str) -> IntegrityReport {
        let content_hash = hash_bytes(output.as_bytes());
        let cache_key = (context.to_string(), content_hash);

        if let Some(cached) = self.cache.lock().reports.get(&cache_key) {
            return cached.clone();
        }

        let start = Instant::now();
        let mut checks = Checks::empty();
        let mut errors = Vec::new();
        let trimmed = output.trim();
        let export_count = detect_exports(output).len();

        if check_size(trimmed, export_count) {
            checks |= Checks::SIZE;
        } else {
            errors.push(format!("output shorter than {MIN_SIZE_WITHOUT_EXPORT} characters and declares no exports"));
        }

        if checks.contains(Checks::SIZE) {
            match check_structure(output) {
                Ok(()) => checks |= Checks::STRUCTURE,
                Err(e) => errors.push(e),
            }
        }

        if checks.contains(Checks::STRUCTURE) {
            match check_exports(input, output) {
                Ok(()) => checks |= Checks::EXPORTS,
                Err(e) => errors.push(e),
            }
        }

        if checks.contains(Checks::EXPORTS) {
            match check_syntax(output) {
                Ok(()) => checks |= Checks::SYNTAX,
                Err(e) => errors.push(e),
            }
        }

        let report = IntegrityReport {
            valid: errors.is_empty(),
            checks,
            errors,
            duration: start.elapsed(),
        };

        let mut cache = self.cache.lock();
        cache.order.push(cache_key.clone());
        cache.reports.insert(cache_key, report.clone());
        while cache.order.len() > CACHE_CAPACITY {
            let oldest = cache.order.remove(0);
            cache.reports.remove(&oldest);
        }

        report
    }
}

impl Default for IntegrityValidator {
    fn default() -> Self {
        Self::new()
    }
}
