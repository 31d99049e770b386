//! Builds the node tree for a template.
//!
//! Parsing never fails as a whole: malformed tags, stray `{{end}}`/`{{else}}`
//! and unclosed blocks are recorded as [`TemplateError`]s and the rest of the
//! template is still parsed.

use std::fmt;

use crate::render::lexer::{split, Segment, Tok};

/// A problem found while parsing or executing a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    pub template: String,
    pub line: usize,
    pub message: String,
}

impl TemplateError {
    pub fn new(template: &str, line: usize, message: impl Into<String>) -> Self {
        Self {
            template: template.to_string(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template {}:{}: {}", self.template, self.line, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Dot,
    Field(Vec<String>),
    Var(String, Vec<String>),
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Sub(Box<Pipeline>),
    Chain(Box<Arg>, Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    /// Variables declared (`:=`) or assigned (`=`) by this pipeline.
    pub vars: Vec<String>,
    pub assign: bool,
    pub cmds: Vec<Command>,
}

impl Pipeline {
    pub fn is_declaration(&self) -> bool {
        !self.vars.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Action {
        line: usize,
        pipe: Pipeline,
    },
    If {
        line: usize,
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        line: usize,
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    With {
        line: usize,
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Template {
        line: usize,
        name: String,
        pipe: Option<Pipeline>,
    },
}

/// Output of [`parse_template`].
#[derive(Debug, Clone, Default)]
pub struct ParsedTemplate {
    pub name: String,
    pub root: Vec<Node>,
    /// `{{define}}` and `{{block}}` bodies in source order.
    pub defines: Vec<(String, Vec<Node>)>,
    pub errors: Vec<TemplateError>,
}

impl ParsedTemplate {
    pub fn define(&self, name: &str) -> Option<&Vec<Node>> {
        self.defines.iter().rev().find(|(n, _)| n == name).map(|(_, body)| body)
    }

    /// True when the root holds more than whitespace.
    pub fn has_content(&self) -> bool {
        self.root.iter().any(|node| match node {
            Node::Text(text) => !text.trim().is_empty(),
            _ => true,
        })
    }
}

#[derive(Debug)]
enum FrameKind {
    Root,
    If,
    Range,
    With,
    Define(String),
    Block(String, Pipeline),
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    line: usize,
    branches: Vec<(Pipeline, Vec<Node>)>,
    otherwise: Option<Vec<Node>>,
}

impl Frame {
    fn new(kind: FrameKind, line: usize, pipe: Pipeline) -> Self {
        Self {
            kind,
            line,
            branches: vec![(pipe, Vec::new())],
            otherwise: None,
        }
    }

    fn body(&mut self) -> &mut Vec<Node> {
        match self.otherwise {
            Some(ref mut nodes) => nodes,
            None => &mut self.branches.last_mut().expect("frame has a branch").1,
        }
    }

    fn keyword(&self) -> &'static str {
        match self.kind {
            FrameKind::Root => "root",
            FrameKind::If => "if",
            FrameKind::Range => "range",
            FrameKind::With => "with",
            FrameKind::Define(_) => "define",
            FrameKind::Block(_, _) => "block",
        }
    }
}

/// Parse template source.
pub fn parse_template(name: &str, source: &str) -> ParsedTemplate {
    let mut parser = Parser {
        name,
        stack: vec![Frame::new(FrameKind::Root, 1, Pipeline::default())],
        defines: Vec::new(),
        errors: Vec::new(),
    };

    for segment in split(source) {
        match segment {
            Segment::Text(text) => parser.top().body().push(Node::Text(text)),
            Segment::Malformed { line, message } => parser.error(line, message),
            Segment::Action { line, tokens } => parser.action(line, tokens),
        }
    }

    while parser.stack.len() > 1 {
        let Some(frame) = parser.stack.last() else {
            break;
        };
        let message = format!("unclosed {{{{{}}}}} starting at line {}", frame.keyword(), frame.line);
        let line = frame.line;
        parser.error(line, message);
        parser.close();
    }

    let root = parser
        .stack
        .pop()
        .map(|mut frame| std::mem::take(frame.body()))
        .unwrap_or_default();

    ParsedTemplate {
        name: name.to_string(),
        root,
        defines: parser.defines,
        errors: parser.errors,
    }
}

struct Parser<'a> {
    name: &'a str,
    stack: Vec<Frame>,
    defines: Vec<(String, Vec<Node>)>,
    errors: Vec<TemplateError>,
}

impl<'a> Parser<'a> {
    fn top(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("root frame is never popped")
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(TemplateError::new(self.name, line, message));
    }

    fn action(&mut self, line: usize, tokens: Vec<Tok>) {
        if tokens.is_empty() {
            self.error(line, "missing value for command");
            return;
        }

        let keyword = match &tokens[0] {
            Tok::Ident(word) => word.as_str(),
            _ => "",
        };
        let rest = &tokens[1..];

        match keyword {
            "if" | "range" | "with" => match parse_pipeline(rest) {
                Ok(pipe) if !pipe.cmds.is_empty() => {
                    let kind = match keyword {
                        "if" => FrameKind::If,
                        "range" => FrameKind::Range,
                        _ => FrameKind::With,
                    };
                    self.stack.push(Frame::new(kind, line, pipe));
                }
                Ok(_) => self.error(line, format!("missing value for {}", keyword)),
                Err(e) => self.error(line, e),
            },
            "else" => self.else_branch(line, rest),
            "end" => {
                if self.stack.len() == 1 {
                    self.error(line, "unexpected {{end}}");
                } else {
                    self.close();
                }
            }
            "define" => match rest {
                [Tok::Str(name)] => {
                    let name = name.clone();
                    self.stack.push(Frame::new(FrameKind::Define(name), line, Pipeline::default()));
                }
                _ => self.error(line, "define requires a quoted template name"),
            },
            "block" => match rest.split_first() {
                Some((Tok::Str(name), pipe_tokens)) => match parse_pipeline(pipe_tokens) {
                    Ok(pipe) => {
                        let name = name.clone();
                        self.stack
                            .push(Frame::new(FrameKind::Block(name, pipe), line, Pipeline::default()));
                    }
                    Err(e) => self.error(line, e),
                },
                _ => self.error(line, "block requires a quoted template name"),
            },
            "template" => match rest.split_first() {
                Some((Tok::Str(name), pipe_tokens)) => {
                    let pipe = if pipe_tokens.is_empty() {
                        Ok(None)
                    } else {
                        parse_pipeline(pipe_tokens).map(Some)
                    };
                    match pipe {
                        Ok(pipe) => {
                            let node = Node::Template {
                                line,
                                name: name.clone(),
                                pipe,
                            };
                            self.top().body().push(node);
                        }
                        Err(e) => self.error(line, e),
                    }
                }
                _ => self.error(line, "template requires a quoted template name"),
            },
            _ => match parse_pipeline(&tokens) {
                Ok(pipe) if pipe.cmds.is_empty() => self.error(line, "missing value for command"),
                Ok(pipe) => self.top().body().push(Node::Action { line, pipe }),
                Err(e) => self.error(line, e),
            },
        }
    }

    fn else_branch(&mut self, line: usize, rest: &[Tok]) {
        let (kind_ok, chain_word) = {
            let frame = self.top();
            let allowed = matches!(frame.kind, FrameKind::If | FrameKind::Range | FrameKind::With);
            let chain = match frame.kind {
                FrameKind::If => "if",
                FrameKind::With => "with",
                _ => "",
            };
            (allowed && frame.otherwise.is_none(), chain)
        };
        if !kind_ok {
            self.error(line, "unexpected {{else}}");
            return;
        }

        match rest.first() {
            None => self.top().otherwise = Some(Vec::new()),
            Some(Tok::Ident(word)) if !chain_word.is_empty() && word == chain_word => {
                match parse_pipeline(&rest[1..]) {
                    Ok(pipe) if !pipe.cmds.is_empty() => self.top().branches.push((pipe, Vec::new())),
                    Ok(_) => self.error(line, "missing value for else branch"),
                    Err(e) => self.error(line, e),
                }
            }
            Some(_) => self.error(line, "unexpected tokens after else"),
        }
    }

    fn close(&mut self) {
        let Some(mut frame) = self.stack.pop() else {
            return;
        };
        let line = frame.line;
        let otherwise = frame.otherwise.take().unwrap_or_default();
        let node = match frame.kind {
            FrameKind::Root => return,
            FrameKind::If => Some(Node::If {
                line,
                branches: frame.branches,
                otherwise,
            }),
            FrameKind::With => Some(Node::With {
                line,
                branches: frame.branches,
                otherwise,
            }),
            FrameKind::Range => {
                let (pipe, body) = frame.branches.into_iter().next().unwrap_or_default();
                Some(Node::Range {
                    line,
                    pipe,
                    body,
                    otherwise,
                })
            }
            FrameKind::Define(name) => {
                let (_, body) = frame.branches.into_iter().next().unwrap_or_default();
                self.defines.push((name, body));
                None
            }
            FrameKind::Block(name, pipe) => {
                let (_, body) = frame.branches.into_iter().next().unwrap_or_default();
                self.defines.push((name.clone(), body));
                Some(Node::Template {
                    line,
                    name,
                    pipe: if pipe.cmds.is_empty() { None } else { Some(pipe) },
                })
            }
        };
        if let Some(node) = node {
            self.top().body().push(node);
        }
    }
}

/// Parse a pipeline: optional variable declaration, then commands separated
/// by `|`.
fn parse_pipeline(tokens: &[Tok]) -> Result<Pipeline, String> {
    let mut cursor = Cursor { tokens, pos: 0 };
    let pipe = cursor.pipeline()?;
    if cursor.pos < tokens.len() {
        return Err(format!("unexpected {:?} in command", tokens[cursor.pos]));
    }
    Ok(pipe)
}

struct Cursor<'t> {
    tokens: &'t [Tok],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn peek(&self) -> Option<&'t Tok> {
        self.tokens.get(self.pos)
    }

    fn declaration(&mut self) -> (Vec<String>, bool) {
        let mut vars = Vec::new();
        let mut pos = self.pos;
        loop {
            match self.tokens.get(pos) {
                Some(Tok::Var(name, fields)) if fields.is_empty() => {
                    vars.push(name.clone());
                    pos += 1;
                }
                _ => return (Vec::new(), false),
            }
            match self.tokens.get(pos) {
                Some(Tok::Comma) if vars.len() < 2 => pos += 1,
                Some(Tok::Declare) => {
                    self.pos = pos + 1;
                    return (vars, false);
                }
                Some(Tok::Assign) => {
                    self.pos = pos + 1;
                    return (vars, true);
                }
                _ => return (Vec::new(), false),
            }
        }
    }

    fn pipeline(&mut self) -> Result<Pipeline, String> {
        let (vars, assign) = self.declaration();
        let mut cmds = Vec::new();
        loop {
            let cmd = self.command()?;
            if cmd.args.is_empty() {
                if cmds.is_empty() && vars.is_empty() {
                    break;
                }
                return Err("missing command in pipeline".to_string());
            }
            cmds.push(cmd);
            match self.peek() {
                Some(Tok::Pipe) => self.pos += 1,
                _ => break,
            }
        }
        Ok(Pipeline { vars, assign, cmds })
    }

    fn command(&mut self) -> Result<Command, String> {
        let mut args = Vec::new();
        while let Some(tok) = self.peek() {
            let arg = match tok {
                Tok::Pipe | Tok::RParen => break,
                Tok::Dot => Arg::Dot,
                Tok::Field(fields) => Arg::Field(fields.clone()),
                Tok::Var(name, fields) => Arg::Var(name.clone(), fields.clone()),
                Tok::Ident(name) => Arg::Ident(name.clone()),
                Tok::Str(s) => Arg::Str(s.clone()),
                Tok::Int(i) => Arg::Int(*i),
                Tok::Float(f) => Arg::Float(*f),
                Tok::Bool(b) => Arg::Bool(*b),
                Tok::Nil => Arg::Nil,
                Tok::LParen => {
                    self.pos += 1;
                    let inner = self.pipeline()?;
                    if self.peek() != Some(&Tok::RParen) {
                        return Err("unclosed left paren".to_string());
                    }
                    if inner.cmds.is_empty() {
                        return Err("missing value in parenthesis".to_string());
                    }
                    let mut arg = Arg::Sub(Box::new(inner));
                    if let Some(Tok::ChainField(fields)) = self.tokens.get(self.pos + 1) {
                        arg = Arg::Chain(Box::new(arg), fields.clone());
                        self.pos += 1;
                    }
                    arg
                }
                Tok::ChainField(_) => return Err("unexpected field chain".to_string()),
                Tok::Comma | Tok::Declare | Tok::Assign => {
                    return Err(format!("unexpected {:?} in command", tok))
                }
            };
            args.push(arg);
            self.pos += 1;
        }
        Ok(Command { args })
    }
}
