//! Route pattern compilation.
//!
//! # Pattern language
//! - Literal characters match themselves, in their percent-encoded form
//!   where a request path would carry them encoded
//! - A `:name:` span declares a named parameter matching `[^/]+`
//! - The empty pattern normalizes to `/`
//!
//! # Priority
//! `/` scores 1000. Any other pattern scores the sum over its segments:
//! 1 per literal segment, 100 per segment holding a parameter. Lower wins.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use thiserror::Error;

pub const ROOT_PRIORITY: u32 = 1000;
const LITERAL_SEGMENT: u32 = 1;
const PARAM_SEGMENT: u32 = 100;

/// Characters a client encodes in a path. Non-ASCII is always encoded.
const PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid route '{pattern}': {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("route '{pattern}' is already registered by page '{slug}'")]
    Duplicate { pattern: String, slug: String },

    #[error("no route matches '{path}'")]
    NotFound { path: String },
}

enum Piece {
    Literal(String),
    Param(String),
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    regex: Regex,
    params: Vec<String>,
    priority: u32,
}

impl PatternMatcher {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Parameter names in declaration order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Match a raw (still percent-encoded) request path. Captured values are
    /// decoded exactly once and returned in declaration order.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let captures = self.regex.captures(path)?;
        let values = self
            .params
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let raw = captures.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                let value = percent_decode_str(raw).decode_utf8_lossy().into_owned();
                (name.clone(), value)
            })
            .collect();
        Some(values)
    }
}

/// Normalize a pattern: empty → `/`, leading slash enforced.
pub fn normalize_pattern(pattern: &str) -> String {
    let trimmed = pattern.trim();
    if trimmed.is_empty() || trimmed == "/" {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Compile a pattern into an anchored matcher.
pub fn compile_pattern(pattern: &str) -> Result<PatternMatcher, RouteError> {
    let normalized = normalize_pattern(pattern);
    let pieces = split_pieces(&normalized);

    let mut source = String::from("^");
    let mut params: Vec<String> = Vec::new();
    for piece in &pieces {
        match piece {
            Piece::Literal(text) => {
                let encoded = utf8_percent_encode(text, PATH_ENCODE).to_string();
                source.push_str(&regex::escape(&encoded));
            }
            Piece::Param(name) => {
                if params.contains(name) {
                    return Err(RouteError::InvalidRoute {
                        pattern: normalized,
                        reason: format!("parameter '{}' declared twice", name),
                    });
                }
                params.push(name.clone());
                source.push_str("([^/]+)");
            }
        }
    }
    source.push('$');

    let regex = Regex::new(&source).map_err(|e| RouteError::InvalidRoute {
        pattern: normalized.clone(),
        reason: e.to_string(),
    })?;

    Ok(PatternMatcher {
        priority: priority_of(&normalized),
        pattern: normalized,
        regex,
        params,
    })
}

/// Priority of a pattern (lower wins).
pub fn priority_of(pattern: &str) -> u32 {
    let normalized = normalize_pattern(pattern);
    if normalized == "/" {
        return ROOT_PRIORITY;
    }
    normalized
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let has_param = split_pieces(segment)
                .iter()
                .any(|piece| matches!(piece, Piece::Param(_)));
            if has_param {
                PARAM_SEGMENT
            } else {
                LITERAL_SEGMENT
            }
        })
        .sum()
}

/// Split a pattern into literal runs and `:name:` parameters. A colon that
/// does not open a well-formed parameter is literal.
fn split_pieces(pattern: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut rest = pattern;

    while let Some(pos) = rest.find(':') {
        literal.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if name_len > 0 && after[name_len..].starts_with(':') {
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Param(after[..name_len].to_string()));
            rest = &after[name_len + 1..];
        } else {
            literal.push(':');
            rest = after;
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    pieces
}
