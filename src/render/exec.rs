//! Tree-walking evaluation of parsed templates.
//!
//! Evaluation is best effort: every failure becomes a [`TemplateError`] in
//! the executor's list and the surrounding output keeps flowing. Unresolved
//! fields evaluate to `Null` (empty output, false in conditionals).

use std::collections::HashMap;
use std::sync::Arc;

use crate::render::helpers::{self, HelperEnv};
use crate::render::parser::{Arg, Command, Node, Pipeline, TemplateError};
use crate::render::value::Value;

/// Maximum nesting of `{{template}}` invocations.
pub const MAX_TEMPLATE_DEPTH: usize = 32;

/// Named template bodies visible to `{{template}}`.
pub type Definitions = HashMap<String, Arc<Vec<Node>>>;

pub struct Executor<'a> {
    defs: &'a Definitions,
    env: &'a dyn HelperEnv,
    out: String,
    errors: Vec<TemplateError>,
    vars: Vec<(String, Value)>,
    current: String,
    depth: usize,
    cancelled: bool,
}

impl<'a> Executor<'a> {
    pub fn new(defs: &'a Definitions, env: &'a dyn HelperEnv) -> Self {
        Self {
            defs,
            env,
            out: String::new(),
            errors: Vec::new(),
            vars: Vec::new(),
            current: String::new(),
            depth: 0,
            cancelled: false,
        }
    }

    /// Execute the named template with `data` as both `.` and `$`.
    pub fn execute(mut self, name: &str, data: &Value) -> (String, Vec<TemplateError>) {
        match self.defs.get(name).cloned() {
            Some(body) => {
                self.current = name.to_string();
                self.vars.push((String::new(), data.clone()));
                self.walk(&body, data);
            }
            None => self.error(0, format!("no such template \"{}\"", name)),
        }
        (self.out, self.errors)
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(TemplateError::new(&self.current, line, message));
    }

    fn check_cancelled(&mut self) -> bool {
        if !self.cancelled && self.env.is_cancelled() {
            self.cancelled = true;
            self.error(0, "rendering cancelled");
        }
        self.cancelled
    }

    fn walk(&mut self, nodes: &[Node], dot: &Value) {
        for node in nodes {
            if self.check_cancelled() {
                return;
            }
            self.node(node, dot);
        }
    }

    /// Run `f` with a variable scope that is discarded afterwards.
    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        let mark = self.vars.len();
        f(self);
        self.vars.truncate(mark);
    }

    fn node(&mut self, node: &Node, dot: &Value) {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Action { line, pipe } => {
                let value = self.pipeline(*line, pipe, dot);
                if !pipe.is_declaration() {
                    self.out.push_str(&value.render());
                }
            }
            Node::If {
                line,
                branches,
                otherwise,
            } => self.scoped(|ex| {
                for (pipe, body) in branches {
                    if ex.pipeline(*line, pipe, dot).is_truthy() {
                        ex.walk(body, dot);
                        return;
                    }
                }
                ex.walk(otherwise, dot);
            }),
            Node::With {
                line,
                branches,
                otherwise,
            } => self.scoped(|ex| {
                for (pipe, body) in branches {
                    let value = ex.pipeline(*line, pipe, dot);
                    if value.is_truthy() {
                        ex.walk(body, &value);
                        return;
                    }
                }
                ex.walk(otherwise, dot);
            }),
            Node::Range {
                line,
                pipe,
                body,
                otherwise,
            } => self.range(*line, pipe, body, otherwise, dot),
            Node::Template { line, name, pipe } => {
                let arg = match pipe {
                    Some(pipe) => self.pipeline(*line, pipe, dot),
                    None => Value::Null,
                };
                self.invoke(*line, name, &arg);
            }
        }
    }

    fn invoke(&mut self, line: usize, name: &str, dot: &Value) {
        let Some(body) = self.defs.get(name).cloned() else {
            self.error(line, format!("no such template \"{}\"", name));
            return;
        };
        if self.depth >= MAX_TEMPLATE_DEPTH {
            self.error(line, format!("exceeded maximum template depth ({})", MAX_TEMPLATE_DEPTH));
            return;
        }

        // A called template sees only its own `$`.
        let saved_vars = std::mem::replace(&mut self.vars, vec![(String::new(), dot.clone())]);
        let saved_name = std::mem::replace(&mut self.current, name.to_string());
        self.depth += 1;
        self.walk(&body, dot);
        self.depth -= 1;
        self.current = saved_name;
        self.vars = saved_vars;
    }

    fn range(&mut self, line: usize, pipe: &Pipeline, body: &[Node], otherwise: &[Node], dot: &Value) {
        // Declared variables bind per iteration, so evaluate without them.
        let collection = self.commands(line, &pipe.cmds, dot);
        let items: Vec<(Value, Value)> = match collection {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v))
                .collect(),
            Value::Map(map) => map.into_iter().map(|(k, v)| (Value::Str(k), v)).collect(),
            Value::Int(n) => (0..n.max(0)).map(|i| (Value::Int(i), Value::Int(i))).collect(),
            Value::Null => Vec::new(),
            other => {
                self.error(line, format!("range can't iterate over {}", other.type_name()));
                Vec::new()
            }
        };

        if items.is_empty() {
            self.scoped(|ex| ex.walk(otherwise, dot));
            return;
        }

        for (key, item) in items {
            if self.check_cancelled() {
                return;
            }
            self.scoped(|ex| {
                match pipe.vars.as_slice() {
                    [] => {}
                    [v] => ex.vars.push((v.clone(), item.clone())),
                    [k, v, ..] => {
                        ex.vars.push((k.clone(), key));
                        ex.vars.push((v.clone(), item.clone()));
                    }
                }
                ex.walk(body, &item);
            });
        }
    }

    fn pipeline(&mut self, line: usize, pipe: &Pipeline, dot: &Value) -> Value {
        let value = self.commands(line, &pipe.cmds, dot);
        if pipe.assign {
            for name in &pipe.vars {
                match self.vars.iter_mut().rev().find(|(n, _)| n == name) {
                    Some(slot) => slot.1 = value.clone(),
                    None => self.error(line, format!("undefined variable: ${}", name)),
                }
            }
        } else {
            for name in &pipe.vars {
                self.vars.push((name.clone(), value.clone()));
            }
        }
        value
    }

    fn commands(&mut self, line: usize, cmds: &[Command], dot: &Value) -> Value {
        let mut piped: Option<Value> = None;
        for cmd in cmds {
            piped = Some(self.command(line, cmd, dot, piped.take()));
        }
        piped.unwrap_or_default()
    }

    fn command(&mut self, line: usize, cmd: &Command, dot: &Value, piped: Option<Value>) -> Value {
        let Some((head, rest)) = cmd.args.split_first() else {
            return Value::Null;
        };

        if let Arg::Ident(name) = head {
            let mut args = Vec::with_capacity(rest.len() + 1);
            for arg in rest {
                args.push(self.arg(line, arg, dot));
            }
            args.extend(piped);
            return self.call(line, name, args);
        }

        if !rest.is_empty() || piped.is_some() {
            self.error(line, "can't give argument to non-function");
        }
        self.arg(line, head, dot)
    }

    fn call(&mut self, line: usize, name: &str, args: Vec<Value>) -> Value {
        let Some(helper) = helpers::lookup(name) else {
            self.error(line, format!("function \"{}\" not defined", name));
            return Value::Null;
        };
        if name == "api" && self.check_cancelled() {
            return Value::Null;
        }
        match helper(self.env, args) {
            Ok(value) => value,
            Err(message) => {
                self.error(line, format!("error calling {}: {}", name, message));
                Value::Null
            }
        }
    }

    fn arg(&mut self, line: usize, arg: &Arg, dot: &Value) -> Value {
        match arg {
            Arg::Dot => dot.clone(),
            Arg::Field(fields) => self.fields(line, dot, fields),
            Arg::Var(name, fields) => {
                let found = self.vars.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v.clone());
                match found {
                    Some(value) => self.fields(line, &value, fields),
                    None => {
                        self.error(line, format!("undefined variable: ${}", name));
                        Value::Null
                    }
                }
            }
            Arg::Ident(name) => self.call(line, name, Vec::new()),
            Arg::Str(s) => Value::Str(s.clone()),
            Arg::Int(i) => Value::Int(*i),
            Arg::Float(f) => Value::Float(*f),
            Arg::Bool(b) => Value::Bool(*b),
            Arg::Nil => Value::Null,
            Arg::Sub(pipe) => self.pipeline(line, pipe, dot),
            Arg::Chain(inner, fields) => {
                let base = self.arg(line, inner, dot);
                self.fields(line, &base, fields)
            }
        }
    }

    fn fields(&mut self, line: usize, base: &Value, fields: &[String]) -> Value {
        let mut current = base;
        for field in fields {
            match current {
                Value::Map(map) => match map.get(field) {
                    Some(next) => current = next,
                    None => return Value::Null,
                },
                Value::Null => return Value::Null,
                other => {
                    self.error(
                        line,
                        format!("can't evaluate field {} in type {}", field, other.type_name()),
                    );
                    return Value::Null;
                }
            }
        }
        current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::helpers::NoEnv;
    use crate::render::parser::parse_template;

    fn render(source: &str, data: Value) -> (String, Vec<TemplateError>) {
        let parsed = parse_template("t", source);
        let mut defs = Definitions::new();
        for (name, body) in parsed.defines {
            defs.insert(name, Arc::new(body));
        }
        defs.insert("t".into(), Arc::new(parsed.root));
        let (out, errors) = Executor::new(&defs, &NoEnv).execute("t", &data);
        let mut all = parsed.errors;
        all.extend(errors);
        (out, all)
    }

    fn data() -> Value {
        serde_json::json!({
            "Title": "Hello <World>",
            "Tags": ["a", "b"],
            "Count": 3,
            "Nested": {"Inner": {"Value": "deep"}},
        })
        .into()
    }

    #[test]
    fn fields_are_escaped_and_missing_fields_are_empty() {
        let (out, errors) = render("{{.Title}}|{{.Missing}}|{{.Nested.Inner.Value}}", data());
        assert_eq!(out, "Hello &lt;World&gt;||deep");
        assert!(errors.is_empty());
    }

    #[test]
    fn conditionals_and_else_if() {
        let src = "{{if .Missing}}a{{else if eq .Count 3}}b{{else}}c{{end}}";
        assert_eq!(render(src, data()).0, "b");
    }

    #[test]
    fn range_with_index_and_else() {
        let (out, _) = render("{{range $i, $t := .Tags}}{{$i}}={{$t}};{{end}}", data());
        assert_eq!(out, "0=a;1=b;");
        let (out, _) = render("{{range .Missing}}x{{else}}none{{end}}", data());
        assert_eq!(out, "none");
        let (out, _) = render("{{range 3}}{{.}}{{end}}", data());
        assert_eq!(out, "012");
    }

    #[test]
    fn variables_scope_and_assignment() {
        let src = "{{$x := 1}}{{if true}}{{$x = 2}}{{$y := 5}}{{end}}{{$x}}{{$y}}";
        let (out, errors) = render(src, data());
        assert_eq!(out, "2");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("$y"));
    }

    #[test]
    fn with_rebinds_dot() {
        let (out, _) = render("{{with .Nested.Inner}}{{.Value}}{{end}}", data());
        assert_eq!(out, "deep");
    }

    #[test]
    fn pipelines_pass_the_previous_value_last() {
        let (out, _) = render(r#"{{ .Missing | default "fallback" | upper }}"#, data());
        assert_eq!(out, "FALLBACK");
        let (out, _) = render("{{ (dict \"k\" \"v\").k }}", data());
        assert_eq!(out, "v");
    }

    #[test]
    fn unknown_helper_records_error_and_continues() {
        let (out, errors) = render("a{{nope 1}}b{{.Title | upper}}", data());
        assert_eq!(out, "abHELLO &lt;WORLD&gt;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("nope"));
    }

    #[test]
    fn templates_and_recursion_limit() {
        let src = r#"{{define "item"}}<{{.}}>{{end}}{{template "item" "x"}}{{template "missing"}}"#;
        let (out, errors) = render(src, data());
        assert_eq!(out, "<x>");
        assert_eq!(errors.len(), 1);

        let (_, errors) = render(r#"{{define "loop"}}{{template "loop"}}{{end}}{{template "loop"}}"#, data());
        assert!(errors.iter().any(|e| e.message.contains("maximum template depth")));
    }

    #[test]
    fn safe_output_is_not_escaped() {
        let (out, _) = render(r#"{{safe "<b>x</b>"}}{{"<i>"}}"#, data());
        assert_eq!(out, "<b>x</b>&lt;i&gt;");
    }

    #[test]
    fn cancellation_stops_output() {
        struct Cancelled;
        impl HelperEnv for Cancelled {
            fn read_site_file(&self, _: &str, _: &str) -> Result<String, String> {
                Err("no".into())
            }
            fn api_call(&self, m: &str, p: &str, _: &Value) -> Value {
                helpers::api_error_value(m, p, "no")
            }
            fn is_cancelled(&self) -> bool {
                true
            }
        }
        let parsed = parse_template("t", "abc{{.}}");
        let mut defs = Definitions::new();
        defs.insert("t".into(), Arc::new(parsed.root));
        let (out, errors) = Executor::new(&defs, &Cancelled).execute("t", &Value::Null);
        assert_eq!(out, "");
        assert_eq!(errors[0].message, "rendering cancelled");
    }
}
