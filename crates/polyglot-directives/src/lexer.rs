//! Line-oriented lexer for submissions
//!
//! A directive occupies a whole line and starts in column zero with either
//! `#!` followed by a non-whitespace character, or a compiler directive
//! `#r`/`#i` followed by whitespace. Everything else is language code.

use polyglot_types::TextSpan;

/// A lexed region of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Code(TextSpan),
    Directive(DirectiveLine),
}

/// A directive line split into its name and argument tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveLine {
    pub name: String,
    pub name_span: TextSpan,
    pub args: Vec<ArgToken>,
    /// The full line including its line terminator
    pub span: TextSpan,
    pub compiler: bool,
}

/// One whitespace-delimited argument; quotes and JSON brackets group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgToken {
    pub raw: String,
    pub span: TextSpan,
}

impl ArgToken {
    /// `--name` or `-n`, but not a negative number
    pub fn is_option(&self) -> bool {
        let mut chars = self.raw.chars();
        match (chars.next(), chars.next()) {
            (Some('-'), Some(c)) => !c.is_ascii_digit() && c != '.',
            _ => false,
        }
    }

    pub fn is_quoted(&self) -> bool {
        self.raw.len() >= 2 && self.raw.starts_with('"') && self.raw.ends_with('"')
    }

    /// The token text with surrounding quotes and escapes removed
    pub fn unquoted(&self) -> String {
        unquote(&self.raw)
    }
}

/// Remove surrounding double quotes and resolve `\"` and `\\`
pub fn unquote(raw: &str) -> String {
    if !(raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"')) {
        return raw.to_string();
    }
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped @ ('"' | '\\')) => out.push(escaped),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split a submission into code and directive segments
pub fn lex(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut code_start: Option<usize> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        match lex_directive_line(line, line_start) {
            Some(directive) => {
                if let Some(start) = code_start.take() {
                    segments.push(Segment::Code(TextSpan::new(start, line_start)));
                }
                segments.push(Segment::Directive(directive));
            }
            None => {
                code_start.get_or_insert(line_start);
            }
        }
    }

    if let Some(start) = code_start {
        segments.push(Segment::Code(TextSpan::new(start, text.len())));
    }
    segments
}

fn lex_directive_line(line: &str, line_start: usize) -> Option<DirectiveLine> {
    let content = line.trim_end_matches(['\r', '\n']);
    let compiler = is_compiler_directive(content);
    if !compiler && !is_magic_command(content) {
        return None;
    }

    let name_len = content
        .find(char::is_whitespace)
        .unwrap_or(content.len());
    let name = &content[..name_len];
    let args = tokenize_args(&content[name_len..], line_start + name_len);

    Some(DirectiveLine {
        name: name.to_string(),
        name_span: TextSpan::new(line_start, line_start + name_len),
        args,
        span: TextSpan::new(line_start, line_start + line.len()),
        compiler,
    })
}

fn is_magic_command(line: &str) -> bool {
    line.strip_prefix("#!")
        .and_then(|rest| rest.chars().next())
        .map(|c| !c.is_whitespace())
        .unwrap_or(false)
}

fn is_compiler_directive(line: &str) -> bool {
    ["#r", "#i"].iter().any(|prefix| {
        line.strip_prefix(prefix)
            .and_then(|rest| rest.chars().next())
            .map(|c| c == ' ' || c == '\t')
            .unwrap_or(false)
    })
}

/// Tokenize directive arguments. `base` is the offset of `args` within the
/// submission.
pub fn tokenize_args(args: &str, base: usize) -> Vec<ArgToken> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut depth: i32 = 0;

    for (i, c) in args.char_indices() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }

        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            c if c.is_whitespace() && depth <= 0 => {
                if let Some(s) = start.take() {
                    tokens.push(ArgToken {
                        raw: args[s..i].to_string(),
                        span: TextSpan::new(base + s, base + i),
                    });
                }
                depth = 0;
            }
            _ => {}
        }
    }

    if let Some(s) = start {
        tokens.push(ArgToken {
            raw: args[s..].to_string(),
            span: TextSpan::new(base + s, base + args.len()),
        });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(tokens: &[ArgToken]) -> Vec<&str> {
        tokens.iter().map(|t| t.raw.as_str()).collect()
    }

    #[test]
    fn test_directive_must_start_line() {
        let segments = lex("var x = 1; #!csharp\n#!pwsh\nGet-Date");
        assert_eq!(segments.len(), 3);
        assert!(matches!(&segments[0], Segment::Code(span) if span.start == 0));
        let Segment::Directive(d) = &segments[1] else {
            panic!("expected directive");
        };
        assert_eq!(d.name, "#!pwsh");
        assert!(d.args.is_empty());
    }

    #[test]
    fn test_shebang_followed_by_whitespace_is_code() {
        let segments = lex("#! /bin/sh\necho hi");
        assert_eq!(segments, vec![Segment::Code(TextSpan::new(0, 18))]);
    }

    #[test]
    fn test_compiler_directives_need_whitespace() {
        let segments = lex("#r \"nuget:Foo\"\n#region x\n");
        let Segment::Directive(d) = &segments[0] else {
            panic!("expected directive");
        };
        assert!(d.compiler);
        assert_eq!(d.name, "#r");
        assert!(matches!(segments[1], Segment::Code(_)));
    }

    #[test]
    fn test_args_group_quotes_and_json() {
        let tokens = tokenize_args(r#" --name "a b" --data {"x": [1, 2]} -5 @input:"who?""#, 0);
        assert_eq!(
            raw(&tokens),
            vec!["--name", r#""a b""#, "--data", r#"{"x": [1, 2]}"#, "-5", r#"@input:"who?""#]
        );
        assert!(tokens[0].is_option());
        assert!(!tokens[4].is_option());
        assert_eq!(tokens[1].unquoted(), "a b");
    }

    #[test]
    fn test_spans_point_into_submission() {
        let text = "#!set --name x\r\n1";
        let segments = lex(text);
        let Segment::Directive(d) = &segments[0] else {
            panic!("expected directive");
        };
        assert_eq!(&text[d.name_span.start..d.name_span.end], "#!set");
        assert_eq!(&text[d.args[1].span.start..d.args[1].span.end], "x");
        assert_eq!(d.span, TextSpan::new(0, 16));
        assert_eq!(segments[1], Segment::Code(TextSpan::new(16, 17)));
    }
}
