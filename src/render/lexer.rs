//! Splits template source into text runs and `{{ ... }}` actions, and
//! tokenizes action contents.

/// Token inside an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Dot,
    /// `.A.B` field chain.
    Field(Vec<String>),
    /// `.A.B` directly after `)`, applied to the parenthesised value.
    ChainField(Vec<String>),
    /// `$name.A.B`; `$` alone has an empty name.
    Var(String, Vec<String>),
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    LParen,
    RParen,
    Pipe,
    Comma,
    Declare,
    Assign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Action { line: usize, tokens: Vec<Tok> },
    /// A tag that could not be lexed; reported and skipped.
    Malformed { line: usize, message: String },
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Split a template into segments. Trim markers (`{{- ` / ` -}}`) remove
/// adjacent whitespace, comments (`{{/* */}}`) are dropped.
pub fn split(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(start) = rest.find(OPEN) {
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        let after_open = &rest[start + OPEN.len()..];
        let trim_left = after_open.starts_with("- ") || after_open.starts_with("-\n") || after_open.starts_with("-\t");
        if trim_left {
            text = text.trim_end();
        }
        push_text(&mut segments, text);
        line += rest[..start].matches('\n').count();

        let inner_start = if trim_left { 1 } else { 0 };
        let Some(close) = find_close(&after_open[inner_start..]) else {
            segments.push(Segment::Malformed {
                line,
                message: "unclosed action".to_string(),
            });
            return segments;
        };
        let raw = &after_open[inner_start..inner_start + close];
        let (body, trim_right) = match raw.strip_suffix('-') {
            Some(body) if body.ends_with(char::is_whitespace) => (body, true),
            _ => (raw, false),
        };
        trim_next = trim_right;

        let body_trimmed = body.trim();
        if body_trimmed.starts_with("/*") {
            if !body_trimmed.ends_with("*/") {
                segments.push(Segment::Malformed {
                    line,
                    message: "unclosed comment".to_string(),
                });
            }
        } else {
            match tokenize(body_trimmed) {
                Ok(tokens) => segments.push(Segment::Action { line, tokens }),
                Err(message) => segments.push(Segment::Malformed { line, message }),
            }
        }

        line += raw.matches('\n').count();
        rest = &after_open[inner_start + close + CLOSE.len()..];
    }

    let text = if trim_next { rest.trim_start() } else { rest };
    push_text(&mut segments, text);
    segments
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
}

/// Position of the closing `}}`, skipping over string literals and comments.
fn find_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    if s.trim_start().starts_with("/*") {
        let end = s.find("*/")?;
        return s[end..].find(CLOSE).map(|p| end + p);
    }
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Tokenize the inside of an action.
pub fn tokenize(src: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let read_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| is_ident_char(*c)) {
                    let mut fields = Vec::new();
                    while chars.get(i) == Some(&'.') {
                        i += 1;
                        fields.push(read_ident(&mut i));
                    }
                    tokens.push(Tok::ChainField(fields));
                }
            }
            '|' => {
                tokens.push(Tok::Pipe);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Declare);
                i += 2;
            }
            '=' => {
                tokens.push(Tok::Assign);
                i += 1;
            }
            '.' => {
                if chars.get(i + 1).is_some_and(|c| is_ident_char(*c) && !c.is_ascii_digit()) {
                    let mut fields = Vec::new();
                    while chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| is_ident_char(*c)) {
                        i += 1;
                        fields.push(read_ident(&mut i));
                    }
                    tokens.push(Tok::Field(fields));
                } else {
                    tokens.push(Tok::Dot);
                    i += 1;
                }
            }
            '$' => {
                i += 1;
                let name = read_ident(&mut i);
                let mut fields = Vec::new();
                while chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| is_ident_char(*c)) {
                    i += 1;
                    fields.push(read_ident(&mut i));
                }
                tokens.push(Tok::Var(name, fields));
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string".to_string()),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = match chars.get(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('r') => '\r',
                                Some('"') => '"',
                                Some('\\') => '\\',
                                Some(other) => return Err(format!("unknown escape \\{}", other)),
                                None => return Err("unterminated string".to_string()),
                            };
                            s.push(escaped);
                            i += 2;
                        }
                        Some(c) => {
                            s.push(*c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Tok::Str(s));
            }
            '`' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '`' {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated raw string".to_string());
                }
                tokens.push(Tok::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    let f = text.parse().map_err(|_| format!("bad number syntax: {}", text))?;
                    tokens.push(Tok::Float(f));
                } else {
                    let n = text.parse().map_err(|_| format!("bad number syntax: {}", text))?;
                    tokens.push(Tok::Int(n));
                }
            }
            c if is_ident_char(c) => {
                let ident = read_ident(&mut i);
                tokens.push(match ident.as_str() {
                    "true" => Tok::Bool(true),
                    "false" => Tok::Bool(false),
                    "nil" => Tok::Nil,
                    _ => Tok::Ident(ident),
                });
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}
