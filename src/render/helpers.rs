//! The closed table of functions callable from templates.
//!
//! Helpers that need the outside world (`import`, `api`) go through a
//! [`HelperEnv`] supplied by the renderer; everything else is pure.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::render::value::{escape_html, Value};

/// Capabilities a template may reach outside of its own data.
pub trait HelperEnv {
    /// Read `<sites>/<tenant>/<rel>` through the path validator.
    fn read_site_file(&self, tenant: &str, rel: &str) -> Result<String, String>;

    /// Perform an internal API call and return its template-facing shape.
    fn api_call(&self, method: &str, path: &str, options: &Value) -> Value;

    /// True once the surrounding request is gone or past its deadline.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Environment with no filesystem and no dispatcher, for pure rendering.
pub struct NoEnv;

impl HelperEnv for NoEnv {
    fn read_site_file(&self, _tenant: &str, _rel: &str) -> Result<String, String> {
        Err("file access unavailable".to_string())
    }

    fn api_call(&self, method: &str, path: &str, _options: &Value) -> Value {
        api_error_value(method, path, "api calls unavailable")
    }
}

pub type HelperFn = fn(&dyn HelperEnv, Vec<Value>) -> Result<Value, String>;

/// Every helper by name. The set is fixed at compile time.
pub static HELPERS: Lazy<HashMap<&'static str, HelperFn>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, HelperFn> = HashMap::new();
    // strings
    m.insert("upper", |_, a| str_map(a, |s| s.to_uppercase()));
    m.insert("lower", |_, a| str_map(a, |s| s.to_lowercase()));
    m.insert("title", |_, a| str_map(a, title_case));
    m.insert("trim", |_, a| str_map(a, |s| s.trim().to_string()));
    m.insert("replace", replace);
    m.insert("contains", |_, a| str_pred(a, |s, x| s.contains(x)));
    m.insert("hasPrefix", |_, a| str_pred(a, |s, x| s.starts_with(x)));
    m.insert("hasSuffix", |_, a| str_pred(a, |s, x| s.ends_with(x)));
    // collections
    m.insert("dict", |_, a| Ok(dict(a)));
    m.insert("slice", |_, a| Ok(Value::List(a)));
    m.insert("first", |_, a| first_or_last(a, true));
    m.insert("last", |_, a| first_or_last(a, false));
    m.insert("len", len);
    m.insert("index", index);
    // arithmetic
    m.insert("add", |_, a| arith(a, |x, y| x.wrapping_add(y)));
    m.insert("sub", |_, a| arith(a, |x, y| x.wrapping_sub(y)));
    m.insert("mul", |_, a| arith(a, |x, y| x.wrapping_mul(y)));
    m.insert("div", |_, a| arith(a, |x, y| if y == 0 { 0 } else { x.wrapping_div(y) }));
    // logic
    m.insert("default", default);
    m.insert("isTrue", |_, a| Ok(Value::Bool(a.iter().any(is_true))));
    m.insert("and", and);
    m.insert("or", or);
    m.insert("not", |_, a| match a.as_slice() {
        [v] => Ok(Value::Bool(!v.is_truthy())),
        _ => Err("not takes one argument".to_string()),
    });
    m.insert("eq", eq);
    m.insert("ne", |_, a| match a.as_slice() {
        [x, y] => Ok(Value::Bool(!x.loose_eq(y))),
        _ => Err("ne takes two arguments".to_string()),
    });
    m.insert("lt", |_, a| compare(a, |o| o == Ordering::Less));
    m.insert("le", |_, a| compare(a, |o| o != Ordering::Greater));
    m.insert("gt", |_, a| compare(a, |o| o == Ordering::Greater));
    m.insert("ge", |_, a| compare(a, |o| o != Ordering::Less));
    // output
    m.insert("print", |_, a| Ok(Value::Str(sprint(&a))));
    m.insert("printf", printf);
    m.insert("html", |_, a| Ok(Value::Html(escape_html(&sprint(&a)))));
    m.insert("urlquery", |_, a| {
        Ok(Value::Str(utf8_percent_encode(&sprint(&a), NON_ALPHANUMERIC).to_string()))
    });
    m.insert("safe", |_, a| Ok(Value::Html(sprint(&a))));
    m.insert("toJSON", |_, a| Ok(Value::Str(to_json(a))));
    m.insert("fromJSON", |_, a| Ok(from_json(a)));
    // environment
    m.insert("import", import);
    m.insert("api", api);
    m.insert("isAPIError", |_, a| Ok(Value::Bool(api_arg(&a).map(is_api_error).unwrap_or(true))));
    m.insert("isAPISuccess", |_, a| Ok(Value::Bool(api_arg(&a).is_some_and(|r| !is_api_error(r)))));
    m.insert("getAPIError", |_, a| Ok(Value::Str(api_arg(&a).map(api_error_text).unwrap_or_default())));
    m.insert("getAPIData", get_api_data);
    m
});

pub fn lookup(name: &str) -> Option<HelperFn> {
    HELPERS.get(name).copied()
}

fn text_arg(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::to_text).unwrap_or_default()
}

fn str_map(args: Vec<Value>, f: impl Fn(&str) -> String) -> Result<Value, String> {
    match args.as_slice() {
        [v] => Ok(Value::Str(f(&v.to_text()))),
        _ => Err(format!("expected one argument, got {}", args.len())),
    }
}

fn str_pred(args: Vec<Value>, f: impl Fn(&str, &str) -> bool) -> Result<Value, String> {
    match args.as_slice() {
        [s, x] => Ok(Value::Bool(f(&s.to_text(), &x.to_text()))),
        _ => Err(format!("expected two arguments, got {}", args.len())),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    out
}

fn replace(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    if args.len() != 3 {
        return Err("replace takes (string, old, new)".to_string());
    }
    let (s, old, new) = (text_arg(&args, 0), text_arg(&args, 1), text_arg(&args, 2));
    if old.is_empty() {
        return Ok(Value::Str(s));
    }
    Ok(Value::Str(s.replace(&old, &new)))
}

/// Flat key/value pairs into a map; odd arity yields an empty map.
pub fn dict(args: Vec<Value>) -> Value {
    let mut map = BTreeMap::new();
    if args.len() % 2 != 0 {
        return Value::Map(map);
    }
    let mut iter = args.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        map.insert(k.to_text(), v);
    }
    Value::Map(map)
}

fn first_or_last(args: Vec<Value>, first: bool) -> Result<Value, String> {
    let [v] = args.as_slice() else {
        return Err("expected one argument".to_string());
    };
    let picked = match v {
        Value::List(items) => {
            let item = if first { items.first() } else { items.last() };
            item.cloned().unwrap_or_default()
        }
        Value::Str(s) | Value::Html(s) => {
            let c = if first { s.chars().next() } else { s.chars().last() };
            c.map(|c| Value::Str(c.to_string())).unwrap_or_default()
        }
        Value::Map(map) => {
            let item = if first { map.values().next() } else { map.values().last() };
            item.cloned().unwrap_or_default()
        }
        Value::Null => Value::Null,
        other => return Err(format!("can't take element of {}", other.type_name())),
    };
    Ok(picked)
}

fn len(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let [v] = args.as_slice() else {
        return Err("len takes one argument".to_string());
    };
    let n = match v {
        Value::Str(s) | Value::Html(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::Null => 0,
        other => return Err(format!("len of {}", other.type_name())),
    };
    Ok(Value::Int(n as i64))
}

fn index(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let mut iter = args.into_iter();
    let mut current = iter.next().ok_or("index of nothing")?;
    for key in iter {
        current = match (&current, &key) {
            (Value::Map(map), k) => map.get(&k.to_text()).cloned().unwrap_or_default(),
            (Value::List(items), k) => {
                let i = k.as_int().ok_or_else(|| format!("cannot index slice with {}", k.type_name()))?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| format!("index out of range: {}", i))?
            }
            (Value::Null, _) => Value::Null,
            (other, _) => return Err(format!("can't index item of type {}", other.type_name())),
        };
    }
    Ok(current)
}

fn arith(args: Vec<Value>, op: impl Fn(i64, i64) -> i64) -> Result<Value, String> {
    if args.len() < 2 {
        return Err("arithmetic needs at least two arguments".to_string());
    }
    let mut nums = Vec::with_capacity(args.len());
    for v in &args {
        nums.push(v.as_int().ok_or_else(|| format!("expected a number, got {}", v.type_name()))?);
    }
    let mut acc = nums[0];
    for n in &nums[1..] {
        acc = op(acc, *n);
    }
    Ok(Value::Int(acc))
}

fn default(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let mut iter = args.into_iter();
    let fallback = iter.next().ok_or("default needs a fallback")?;
    Ok(match iter.next() {
        Some(v) if v.is_truthy() => v,
        _ => fallback,
    })
}

/// Mixed-type truthiness used by `isTrue`.
fn is_true(v: &Value) -> bool {
    match v {
        Value::Str(s) | Value::Html(s) => !s.trim().is_empty(),
        other => other.is_truthy(),
    }
}

fn and(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let mut last = Value::Null;
    for v in args {
        if !v.is_truthy() {
            return Ok(v);
        }
        last = v;
    }
    Ok(last)
}

fn or(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let mut last = Value::Null;
    for v in args {
        if v.is_truthy() {
            return Ok(v);
        }
        last = v;
    }
    Ok(last)
}

fn eq(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let Some((first, rest)) = args.split_first() else {
        return Err("eq needs arguments".to_string());
    };
    if rest.is_empty() {
        return Err("eq needs at least two arguments".to_string());
    }
    Ok(Value::Bool(rest.iter().any(|v| first.loose_eq(v))))
}

fn compare(args: Vec<Value>, pred: impl Fn(Ordering) -> bool) -> Result<Value, String> {
    let [a, b] = args.as_slice() else {
        return Err("comparison takes two arguments".to_string());
    };
    let ordering = match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => Some(x.cmp(y)),
            _ => None,
        },
    };
    ordering
        .map(|o| Value::Bool(pred(o)))
        .ok_or_else(|| format!("incompatible types for comparison: {} and {}", a.type_name(), b.type_name()))
}

/// Concatenate operands, adding spaces between operands when neither side
/// is a string.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        let is_str = v.as_str().is_some();
        if i > 0 && !is_str && args[i - 1].as_str().is_none() {
            out.push(' ');
        }
        out.push_str(&v.to_text());
    }
    out
}

fn printf(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let mut iter = args.into_iter();
    let format = iter.next().ok_or("printf needs a format")?.to_text();
    let mut operands = iter;
    let mut out = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = operands.next() else {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        };
        match verb {
            's' | 'v' => out.push_str(&arg.to_text()),
            'q' => out.push_str(&format!("{:?}", arg.to_text())),
            'd' => match arg.as_int() {
                Some(n) => out.push_str(&n.to_string()),
                None => out.push_str(&format!("%!d({})", arg.to_text())),
            },
            'f' => match arg.as_float() {
                Some(f) => out.push_str(&format!("{:.*}", precision.unwrap_or(6), f)),
                None => out.push_str(&format!("%!f({})", arg.to_text())),
            },
            't' => out.push_str(&arg.is_truthy().to_string()),
            other => out.push_str(&format!("%!{}({})", other, arg.to_text())),
        }
    }
    Ok(Value::Str(out))
}

fn to_json(args: Vec<Value>) -> String {
    let json = match args.as_slice() {
        [v] => v.to_json(),
        _ => return "{}".to_string(),
    };
    serde_json::to_string(&json).unwrap_or_else(|_| "{}".to_string())
}

fn from_json(args: Vec<Value>) -> Value {
    match args.as_slice() {
        [v] => serde_json::from_str::<serde_json::Value>(&v.to_text())
            .map(Value::from)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn import(env: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let (kind, tenant, rel) = (text_arg(&args, 0), text_arg(&args, 1), text_arg(&args, 2));
    if args.len() != 3 {
        return Ok(html_comment("import takes (type, site, path)"));
    }
    if !matches!(kind.as_str(), "css" | "js" | "html") {
        return Ok(html_comment(&format!("unknown import type {}", kind)));
    }
    if tenant.is_empty() || tenant.contains(['/', '\\']) || tenant.starts_with('.') {
        return Ok(html_comment("invalid site"));
    }
    // Reads stay inside the named site's directory.
    if rel.is_empty()
        || rel.starts_with('/')
        || rel.contains(['\\', '\0'])
        || rel.split('/').any(|segment| segment == "..")
    {
        return Ok(html_comment("invalid path"));
    }

    let contents = match env.read_site_file(&tenant, &rel) {
        Ok(contents) => contents,
        Err(e) => return Ok(html_comment(&format!("import failed: {}", e))),
    };

    let html = match kind.as_str() {
        "css" => format!("<style>\n{}\n</style>", neutralize_close_tags(&contents)),
        "js" => format!("<script>\n{}\n</script>", neutralize_close_tags(&contents)),
        _ => escape_html(&contents),
    };
    Ok(Value::Html(html))
}

/// Keeps inlined CSS/JS from terminating its wrapping element early.
fn neutralize_close_tags(s: &str) -> String {
    s.replace("</", "<\\/")
}

fn html_comment(message: &str) -> Value {
    Value::Html(format!("<!-- {} -->", message.replace("--", "- -")))
}

fn api(env: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let method = text_arg(&args, 0);
    let path = text_arg(&args, 1);
    let options = args.get(2).cloned().unwrap_or_default();
    if args.len() > 3 {
        return Err("api takes (method, path, options?)".to_string());
    }
    Ok(env.api_call(&method.to_ascii_uppercase(), &path, &options))
}

/// Shape returned by `api` when the call could not be made at all.
pub fn api_error_value(method: &str, path: &str, error: &str) -> Value {
    let mut v = Value::map();
    v.insert("status", 0i64);
    v.insert("data", Value::Null);
    v.insert("body", "");
    v.insert("headers", Value::map());
    v.insert("error", error);
    v.insert("_method", method);
    v.insert("_path", path);
    v.insert("_status", 0i64);
    v.insert("_duration_ms", 0i64);
    v.insert("_cache_hit", false);
    v
}

fn api_arg(args: &[Value]) -> Option<&Value> {
    args.iter().rev().find(|v| matches!(v, Value::Map(_)))
}

fn is_api_error(resp: &Value) -> bool {
    let has_error = resp.get("error").is_some_and(|e| !e.to_text().is_empty());
    let status = resp.get("status").and_then(Value::as_int).unwrap_or(0);
    has_error || !(1..400).contains(&status)
}

fn api_error_text(resp: &Value) -> String {
    match resp.get("error").map(Value::to_text) {
        Some(e) if !e.is_empty() => e,
        _ => {
            let status = resp.get("status").and_then(Value::as_int).unwrap_or(0);
            if is_api_error(resp) {
                format!("HTTP {}", status)
            } else {
                String::new()
            }
        }
    }
}

/// `getAPIData resp` or `getAPIData resp "key"`; also accepts the key first
/// so it composes with pipelines.
fn get_api_data(_: &dyn HelperEnv, args: Vec<Value>) -> Result<Value, String> {
    let resp = api_arg(&args).ok_or("getAPIData needs an api response")?;
    let data = resp.get("data").cloned().unwrap_or_default();
    let key = args.iter().find(|v| matches!(v, Value::Str(_)));
    Ok(match key {
        Some(k) => data.get(&k.to_text()).cloned().unwrap_or_default(),
        None => data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, String> {
        (lookup(name).expect("helper exists"))(&NoEnv, args)
    }

    fn s(v: &str) -> Value {
        Value::from(v)
    }

    #[test]
    fn string_helpers() {
        assert_eq!(call("upper", vec![s("abc")]).unwrap(), s("ABC"));
        assert_eq!(call("title", vec![s("hello big-world")]).unwrap(), s("Hello Big-World"));
        assert_eq!(call("trim", vec![s("  x ")]).unwrap(), s("x"));
        assert_eq!(call("replace", vec![s("a-b-c"), s("-"), s("+")]).unwrap(), s("a+b+c"));
        assert_eq!(call("hasPrefix", vec![s("/blog/x"), s("/blog")]).unwrap(), Value::Bool(true));
        assert_eq!(call("contains", vec![s("abc"), s("z")]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn dict_with_odd_arity_is_empty() {
        assert_eq!(dict(vec![s("a"), Value::Int(1), s("b")]), Value::map());
        let d = dict(vec![s("a"), Value::Int(1), s("b"), Value::Int(2)]);
        assert_eq!(d.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(call("add", vec![Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
        assert_eq!(call("sub", vec![Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(-1));
        assert_eq!(call("mul", vec![Value::Int(4), s("5")]).unwrap(), Value::Int(20));
        assert_eq!(call("div", vec![Value::Int(7), Value::Int(0)]).unwrap(), Value::Int(0));
        assert!(call("add", vec![Value::Int(1), Value::map()]).is_err());
    }

    #[test]
    fn default_and_is_true() {
        assert_eq!(call("default", vec![s("d"), s("")]).unwrap(), s("d"));
        assert_eq!(call("default", vec![s("d"), s("v")]).unwrap(), s("v"));
        assert_eq!(call("isTrue", vec![s("  "), Value::Int(0)]).unwrap(), Value::Bool(false));
        assert_eq!(call("isTrue", vec![Value::Null, s("x")]).unwrap(), Value::Bool(true));
        assert_eq!(
            call("isTrue", vec![Value::List(vec![Value::Null])]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn collections() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(call("first", vec![list.clone()]).unwrap(), Value::Int(1));
        assert_eq!(call("last", vec![list.clone()]).unwrap(), Value::Int(3));
        assert_eq!(call("len", vec![list.clone()]).unwrap(), Value::Int(3));
        assert_eq!(call("len", vec![s("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(call("index", vec![list, Value::Int(1)]).unwrap(), Value::Int(2));
    }

    #[test]
    fn comparisons() {
        assert_eq!(call("eq", vec![Value::Int(1), Value::Float(1.0)]).unwrap(), Value::Bool(true));
        assert_eq!(call("eq", vec![s("a"), s("b"), s("a")]).unwrap(), Value::Bool(true));
        assert_eq!(call("lt", vec![Value::Int(1), Value::Int(2)]).unwrap(), Value::Bool(true));
        assert_eq!(call("ge", vec![s("b"), s("a")]).unwrap(), Value::Bool(true));
        assert!(call("lt", vec![s("a"), Value::Int(1)]).is_err());
    }

    #[test]
    fn printf_verbs() {
        let out = call(
            "printf",
            vec![s("%s has %d items (%.2f%%)"), s("cart"), Value::Int(3), Value::Float(12.5)],
        )
        .unwrap();
        assert_eq!(out, s("cart has 3 items (12.50%)"));
    }

    #[test]
    fn json_round_trip_and_failures() {
        let d = dict(vec![s("a"), Value::Int(1)]);
        let json = call("toJSON", vec![d.clone()]).unwrap();
        assert_eq!(json, s(r#"{"a":1}"#));
        assert_eq!(call("fromJSON", vec![json]).unwrap(), d);
        assert_eq!(call("fromJSON", vec![s("{nope")]).unwrap(), Value::Null);
        assert_eq!(call("toJSON", vec![]).unwrap(), s("{}"));
    }

    #[test]
    fn api_data_round_trips_dict_values() {
        let resp = dict(vec![s("status"), Value::Int(200), s("data"), dict(vec![s("a"), Value::Int(1), s("b"), Value::Int(2)])]);
        assert_eq!(call("getAPIData", vec![resp.clone(), s("a")]).unwrap(), Value::Int(1));
        assert_eq!(call("getAPIData", vec![s("b"), resp.clone()]).unwrap(), Value::Int(2));
        assert_eq!(call("isAPISuccess", vec![resp.clone()]).unwrap(), Value::Bool(true));
        assert_eq!(call("getAPIError", vec![resp]).unwrap(), s(""));
    }

    #[test]
    fn api_error_shape() {
        let failed = call("api", vec![s("get"), s("/x")]).unwrap();
        assert_eq!(failed.get("_method"), Some(&s("GET")));
        assert_eq!(call("isAPIError", vec![failed.clone()]).unwrap(), Value::Bool(true));
        assert_eq!(call("getAPIError", vec![failed]).unwrap(), s("api calls unavailable"));

        let not_found = dict(vec![s("status"), Value::Int(404)]);
        assert_eq!(call("getAPIError", vec![not_found]).unwrap(), s("HTTP 404"));
    }

    #[test]
    fn import_rejects_unknown_types_and_bad_sites() {
        let out = call("import", vec![s("pdf"), s("a.test"), s("x.pdf")]).unwrap();
        assert!(matches!(out, Value::Html(ref h) if h.starts_with("<!--")));
        let out = call("import", vec![s("css"), s(".."), s("x.css")]).unwrap();
        assert!(matches!(out, Value::Html(ref h) if h.starts_with("<!--")));
    }

    #[test]
    fn import_stays_inside_the_site_directory() {
        struct Reads;
        impl HelperEnv for Reads {
            fn read_site_file(&self, _: &str, rel: &str) -> Result<String, String> {
                Ok(format!("contents of {}", rel))
            }
            fn api_call(&self, m: &str, p: &str, _: &Value) -> Value {
                api_error_value(m, p, "none")
            }
        }
        let import = lookup("import").unwrap();
        for rel in ["../b.test/config.toml", "../../sitehost.toml", "assets/../../x.css", "/etc/passwd", "a\\..\\b"] {
            let out = import(&Reads, vec![s("html"), s("a.test"), s(rel)]).unwrap();
            let html = out.as_str().unwrap().to_string();
            assert!(html.starts_with("<!--"), "{rel}: {html}");
            assert!(!html.contains("contents of"), "{rel}: {html}");
        }
        let ok = import(&Reads, vec![s("html"), s("a.test"), s("partials/x.html")]).unwrap();
        assert_eq!(ok.as_str(), Some("contents of partials/x.html"));
    }

    #[test]
    fn import_wraps_contents() {
        struct Files;
        impl HelperEnv for Files {
            fn read_site_file(&self, _: &str, rel: &str) -> Result<String, String> {
                Ok(format!("/* {} */ a > b {{}}</style>", rel))
            }
            fn api_call(&self, m: &str, p: &str, _: &Value) -> Value {
                api_error_value(m, p, "none")
            }
        }
        let css = (lookup("import").unwrap())(&Files, vec![s("css"), s("a.test"), s("x.css")]).unwrap();
        assert_eq!(css, Value::Html("<style>\n/* x.css */ a > b {}<\\/style>\n</style>".into()));
        let html = (lookup("import").unwrap())(&Files, vec![s("html"), s("a.test"), s("x")]).unwrap();
        assert!(html.as_str().unwrap().contains("&lt;/style&gt;"));
    }
}
