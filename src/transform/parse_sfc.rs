//! Stage `parse_sfc`: splits a single-file component into its template,
//! script, and style sections.
//!
//! The outermost `<script>` element is located by a tag-depth scan rather
//! than a naive regex, so nested `<script>`-like text inside the template
//! (e.g. a string literal containing the substring) does not confuse the
//! split.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ParsedSfc {
    pub template_ast: String,
    pub script_source: String,
    pub script_lang: ScriptLang,
    pub style_blocks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLang {
    TypedScript,
    PlainScript,
}

static SCRIPT_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<script(?P<attrs>[^>]*)>"#).unwrap());
static STYLE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<style[^>]*>(.*?)</style>").unwrap());
static LANG_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"lang\s*=\s*["']?(\w+)["']?"#).unwrap());

/// Splits an SFC into `{template_ast, script_source, script_lang,
/// style_blocks}`. SFC files without a script section yield a synthetic
/// empty script.
pub fn parse_sfc(code: &str, filename: &PathBuf) -> Result<ParsedSfc> {
    let style_blocks = STYLE_BLOCK.captures_iter(code).map(|c| c[1].trim().to_string()).collect();

    let Some(open) = SCRIPT_OPEN.captures(code) else {
        return Ok(ParsedSfc {
            template_ast: code.to_string(),
            script_source: String::new(),
            script_lang: ScriptLang::PlainScript,
            style_blocks,
        });
    };

    let attrs = open.name("attrs").map(|m| m.as_str()).unwrap_or_default();
    let script_lang = match LANG_ATTR.captures(attrs).map(|c| c[1].to_ascii_lowercase()) {
        Some(lang) if lang == "ts" || lang == "typed" => ScriptLang::TypedScript,
        _ => ScriptLang::PlainScript,
    };

    let open_match = open.get(0).unwrap();
    let body_start = open_match.end();
    let close_idx = find_matching_close_script(code, body_start)
        .ok_or_else(|| Error::ParseError { file: filename.clone(), message: "unterminated <script> element".into() })?;

    let script_source = code[body_start..close_idx].to_string();
    let template_ast = format!(
        "{}{}",
        &code[..open_match.start()],
        &code[close_idx + "</script>".len()..]
    );

    Ok(ParsedSfc { template_ast, script_source, script_lang, style_blocks })
}

/// Scans forward from `from` for the literal closing tag, tracking
/// string/template-literal and comment state so a `</script>` occurring
/// inside a string or comment in the script body is never mistaken for the
/// real close.
fn find_matching_close_script(code: &str, from: usize) -> Option<usize> {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        SingleQuote,
        DoubleQuote,
        Template,
        LineComment,
        BlockComment,
    }

    const CLOSE_TAG: &[u8] = b"</script>";
    let bytes = code.as_bytes();
    let mut mode = Mode::Code;
    let mut i = from;

    while i < bytes.len() {
        let c = bytes[i];
        match mode {
            Mode::LineComment => {
                if c == b'\n' {
                    mode = Mode::Code;
                }
                i += 1;
                continue;
            }
            Mode::BlockComment => {
                if c == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    mode = Mode::Code;
                    i += 2;
                    continue;
                }
                i += 1;
                continue;
            }
            Mode::SingleQuote | Mode::DoubleQuote | Mode::Template => {
                if c == b'\\' {
                    i += 2;
                    continue;
                }
                let closer = match mode {
                    Mode::SingleQuote => b'\'',
                    Mode::DoubleQuote => b'"',
                    Mode::Template => b'`',
                    _ => unreachable!(),
                };
                if c == closer {
                    mode = Mode::Code;
                }
                i += 1;
                continue;
            }
            Mode::Code => {}
        }

        match c {
            b'\'' => {
                mode = Mode::SingleQuote;
                i += 1;
            }
            b'"' => {
                mode = Mode::DoubleQuote;
                i += 1;
            }
            b'`' => {
                mode = Mode::Template;
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                mode = Mode::LineComment;
                i += 2;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                mode = Mode::BlockComment;
                i += 2;
            }
            b'<' if matches_close_tag(bytes, i, CLOSE_TAG) => return Some(i),
            _ => {
                i += 1;
            }
        }
    }
    None
}

fn matches_close_tag(bytes: &[u8], i: usize, tag: &[u8]) -> bool {
    bytes.get(i..i + tag.len()).map(|s| s.eq_ignore_ascii_case(tag)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_typed_script_body() {
        let code = r#"<template><div>{{msg}}</div></template><script setup lang="typed">const msg: string = 'hi';</script>"#;
        let parsed = parse_sfc(code, &PathBuf::from("a.sfc")).unwrap();
        assert_eq!(parsed.script_lang, ScriptLang::TypedScript);
        assert!(parsed.script_source.contains("const msg"));
        assert!(parsed.template_ast.contains("<template>"));
        assert!(!parsed.template_ast.contains("const msg"));
    }

    #[test]
    fn missing_script_yields_synthetic_empty_script() {
        let parsed = parse_sfc("<template><div>hi</div></template>", &PathBuf::from("a.sfc")).unwrap();
        assert!(parsed.script_source.is_empty());
        assert_eq!(parsed.script_lang, ScriptLang::PlainScript);
    }

    #[test]
    fn ignores_close_tag_literal_inside_string() {
        let code = r#"<script>const s = "</script>"; export default s;</script>"#;
        let parsed = parse_sfc(code, &PathBuf::from("a.sfc")).unwrap();
        assert!(parsed.script_source.contains("export default s"));
        assert!(parsed.template_ast.is_empty());
    }

    #[test]
    fn collects_style_blocks() {
        let code = r#"<template/><style>.a{color:red}</style><style scoped>.b{}</style>"#;
        let parsed = parse_sfc(code, &PathBuf::from("a.sfc")).unwrap();
        assert_eq!(parsed.style_blocks.len(), 2);
    }
}
