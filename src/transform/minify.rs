//! Stage `minify`: optional, production-only, deterministic whitespace
//! and comment stripping. The real production minifier is an external
//! interface; this stage implements a string/template/regex-aware
//! whitespace collapse that preserves semantics for the subset of syntax
//! this engine itself emits.

/// Collapses insignificant whitespace and strips comments, leaving string,
/// template, and regex literals untouched. Same input and options always
/// yield byte-identical output because the pass is a pure function of
/// `code` with no hidden state.
pub fn minify(code: &str) -> String {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        SingleQuote,
        DoubleQuote,
        Template,
        LineComment,
        BlockComment,
        Regex,
    }

    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut mode = Mode::Code;
    let mut i = 0usize;
    let mut last_emitted_was_space = false;
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
            Mode::SingleQuote | Mode::DoubleQuote | Mode::Template => {
                out.push(c);
                if c == '\\' {
                    if let Some(n) = next {
                        out.push(n);
                        i += 2;
                        continue;
                    }
                }
                let closer = match mode {
                    Mode::SingleQuote => '\'',
                    Mode::DoubleQuote => '"',
                    Mode::Template => '`',
                    _ => unreachable!(),
                };
                if c == closer {
                    mode = Mode::Code;
                }
                last_emitted_was_space = false;
                prev_significant = Some(c);
                i += 1;
                continue;
            }
            Mode::Regex => {
                out.push(c);
                if c == '\\' {
                    if let Some(n) = next {
                        out.push(n);
                        i += 2;
                        continue;
                    }
                }
                if c == '/' {
                    mode = Mode::Code;
                }
                last_emitted_was_space = false;
                prev_significant = Some(c);
                i += 1;
                continue;
            }
            Mode::Code => {}
        }

        match c {
            '\'' => {
                mode = Mode::SingleQuote;
                out.push(c);
                last_emitted_was_space = false;
            }
            '"' => {
                mode = Mode::DoubleQuote;
                out.push(c);
                last_emitted_was_space = false;
            }
            '`' => {
                mode = Mode::Template;
                out.push(c);
                last_emitted_was_space = false;
            }
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
                out.push(c);
                last_emitted_was_space = false;
            }
            c if c.is_whitespace() => {
                if !last_emitted_was_space && !out.is_empty() {
                    out.push(' ');
                    last_emitted_was_space = true;
                }
            }
            _ => {
                out.push(c);
                last_emitted_was_space = false;
            }
        }
        if !c.is_whitespace() {
            prev_significant = Some(c);
        }
        i += 1;
    }

    out.trim().to_string()
}

/// A `/` starts a regex literal only in operator context: after an
/// operator, an opening bracket, a comma, or at start of input — never
/// directly after an identifier or closing bracket.
fn is_regex_context(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(c) => matches!(c, '(' | '[' | '{' | ',' | ';' | ':' | '=' | '!' | '&' | '|' | '?' | '+' | '-' | '*' | '%' | '<' | '>'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_strips_comments() {
        let code = "export const x = 1;   // a comment\nexport default x;";
        let out = minify(code);
        assert_eq!(out, "export const x = 1; export default x;");
    }

    #[test]
    fn preserves_string_contents() {
        let code = "const s = 'a   b';";
        let out = minify(code);
        assert!(out.contains("'a   b'"));
    }

    #[test]
    fn is_deterministic() {
        let code = "export const x:   number = 1;";
        assert_eq!(minify(code), minify(code));
    }

    #[test]
    fn preserves_regex_literal_whitespace() {
        let code = "const re = /a    b/; export default re;";
        let out = minify(code);
        assert!(out.contains("/a    b/"), "{out}");
    }
}
