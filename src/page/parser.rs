//! Page metadata parsing and serialisation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_TITLE: &str = "Untitled Page";
pub const DEFAULT_LAYOUT: &str = "default";
pub const DEFAULT_TEMPLATE: &str = "default";

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageParseError {
    #[error("metadata comment is not terminated")]
    Unterminated,

    #[error("line {line}: metadata key is empty")]
    EmptyKey { line: usize },

    #[error("@{key}: '{value}' is not a boolean")]
    InvalidBool { key: String, value: String },

    #[error("@{key}: '{value}' is not an RFC 3339 timestamp")]
    InvalidDate { key: String, value: String },
}

/// A page loaded from a tenant's `pages/` directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub slug: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub author: String,
    pub layout: String,
    pub template: String,
    pub is_draft: bool,
    pub require_auth: bool,
    pub required_roles: Vec<String>,
    pub custom: BTreeMap<String, String>,
    #[serde(skip)]
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Page {
    /// A page with default metadata and the whole source as its body.
    pub fn from_body(slug: &str, source: &str) -> Self {
        Self {
            slug: slug.to_string(),
            url: url_from_slug(slug),
            title: DEFAULT_TITLE.to_string(),
            description: String::new(),
            keywords: Vec::new(),
            author: String::new(),
            layout: DEFAULT_LAYOUT.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
            is_draft: false,
            require_auth: false,
            required_roles: Vec::new(),
            custom: BTreeMap::new(),
            body: source.trim_start().to_string(),
            published_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Render the metadata comment for this page.
    pub fn metadata_block(&self) -> String {
        let mut lines = vec![COMMENT_OPEN.to_string()];
        if self.title != DEFAULT_TITLE {
            lines.push(format!("@name {}", self.title));
        }
        lines.push(format!("@url {}", self.url));
        if !self.author.is_empty() {
            lines.push(format!("@author {}", self.author));
        }
        if self.layout != DEFAULT_LAYOUT {
            lines.push(format!("@layout {}", self.layout));
        }
        if self.template != DEFAULT_TEMPLATE {
            lines.push(format!("@template {}", self.template));
        }
        if !self.description.is_empty() {
            lines.push(format!("@description {}", self.description));
        }
        if !self.keywords.is_empty() {
            lines.push(format!("@keywords [{}]", self.keywords.join(",")));
        }
        if self.is_draft {
            lines.push("@is_draft".to_string());
        }
        if self.require_auth {
            lines.push("@require_auth".to_string());
        }
        if !self.required_roles.is_empty() {
            lines.push(format!("@required_roles [{}]", self.required_roles.join(",")));
        }
        if let Some(published) = self.published_at {
            lines.push(format!("@published_at {}", published.to_rfc3339()));
        }
        for (key, value) in &self.custom {
            lines.push(format!("@{} {}", key, value));
        }
        lines.push(COMMENT_CLOSE.to_string());
        lines.join("\n")
    }

    /// Metadata comment followed by the body.
    pub fn to_source(&self) -> String {
        format!("{}\n\n{}", self.metadata_block(), self.body)
    }
}

/// Parse a page source. `slug` is the page's path below `pages/` without
/// extension; it provides the default URL.
pub fn parse_page(slug: &str, source: &str) -> Result<Page, PageParseError> {
    let mut page = Page::from_body(slug, source);
    let Some(after_open) = source.trim_start().strip_prefix(COMMENT_OPEN) else {
        return Ok(page);
    };
    let end = after_open
        .find(COMMENT_CLOSE)
        .ok_or(PageParseError::Unterminated)?;

    page.body = after_open[end + COMMENT_CLOSE.len()..].trim_start().to_string();
    for (line, key, value) in entries(&after_open[..end]) {
        if key.is_empty() {
            return Err(PageParseError::EmptyKey { line });
        }
        apply(&mut page, key, value)?;
    }

    Ok(page)
}

/// Body-only page for a source whose metadata failed to parse.
///
/// The metadata comment is never part of the body. Access control is kept:
/// a `@require_auth` whose value does not parse counts as set, and any
/// `@required_roles` implies authentication.
pub fn fallback_page(slug: &str, source: &str) -> Page {
    let mut page = Page::from_body(slug, source);
    let Some(after_open) = source.trim_start().strip_prefix(COMMENT_OPEN) else {
        return page;
    };
    let meta = match after_open.find(COMMENT_CLOSE) {
        Some(end) => {
            page.body = after_open[end + COMMENT_CLOSE.len()..].trim_start().to_string();
            &after_open[..end]
        }
        None => after_open,
    };

    for (_, key, value) in entries(meta) {
        match key {
            "require_auth" => page.require_auth = parse_flag(key, value).unwrap_or(true),
            "required_roles" => page.required_roles = parse_list(value),
            _ => {}
        }
    }
    if !page.required_roles.is_empty() {
        page.require_auth = true;
    }
    page
}

/// `@key value` lines of a metadata block as (1-based line, key, value).
fn entries(meta: &str) -> impl Iterator<Item = (usize, &str, &str)> {
    meta.lines().enumerate().filter_map(|(index, raw)| {
        let entry = raw.trim().strip_prefix('@')?;
        let (key, value) = match entry.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (entry, ""),
        };
        Some((index + 1, key, value))
    })
}

fn apply(page: &mut Page, key: &str, value: &str) -> Result<(), PageParseError> {
    match key {
        "name" | "title" => page.title = value.to_string(),
        "url" => page.url = normalize_url(value),
        "author" => page.author = value.to_string(),
        "layout" => page.layout = non_empty_or(value, DEFAULT_LAYOUT),
        "template" => page.template = non_empty_or(value, DEFAULT_TEMPLATE),
        "description" => page.description = value.to_string(),
        "keywords" => page.keywords = parse_list(value),
        "is_draft" => page.is_draft = parse_flag(key, value)?,
        "require_auth" => page.require_auth = parse_flag(key, value)?,
        "required_roles" => page.required_roles = parse_list(value),
        "published_at" => {
            let parsed = DateTime::parse_from_rfc3339(value).map_err(|_| {
                PageParseError::InvalidDate {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            })?;
            page.published_at = Some(parsed.with_timezone(&Utc));
        }
        _ => {
            let value = if value.is_empty() { "true" } else { value };
            page.custom.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

/// A bare `@key` means true.
fn parse_flag(key: &str, value: &str) -> Result<bool, PageParseError> {
    match value.to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(PageParseError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    let inner = value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    inner
        .split(',')
        .map(|item| item.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn normalize_url(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() || value == "/" {
        "/".to_string()
    } else if value.starts_with('/') {
        value.to_string()
    } else {
        format!("/{}", value)
    }
}

/// `index` → `/`, `blog/index` → `/blog`, `about` → `/about`.
fn url_from_slug(slug: &str) -> String {
    let trimmed = slug.trim_matches('/');
    let path = trimmed
        .strip_suffix("/index")
        .unwrap_or(if trimmed == "index" { "" } else { trimmed });
    normalize_url(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
<!--
  Blog post page.
  @name Hello World
  @url /blog/post/:slug:
  @author Ada
  @layout blog
  @require_auth
  @is_draft false
  @required_roles [editor, admin]
  @hero_image /assets/hero.png
  @featured
-->

   {{define "page-content"}}<h1>{{.Page.Title}}</h1>{{end}}
"#;

    #[test]
    fn parses_metadata_and_body() {
        let page = parse_page("blog/post", SOURCE).unwrap();
        assert_eq!(page.title, "Hello World");
        assert_eq!(page.url, "/blog/post/:slug:");
        assert_eq!(page.author, "Ada");
        assert_eq!(page.layout, "blog");
        assert_eq!(page.template, DEFAULT_TEMPLATE);
        assert!(page.require_auth);
        assert!(!page.is_draft);
        assert_eq!(page.required_roles, vec!["editor", "admin"]);
        assert_eq!(page.custom["hero_image"], "/assets/hero.png");
        assert_eq!(page.custom["featured"], "true");
        assert!(page.body.starts_with("{{define"));
    }

    #[test]
    fn defaults_without_metadata() {
        let page = parse_page("about", "  <p>hi</p>").unwrap();
        assert_eq!(page.title, DEFAULT_TITLE);
        assert_eq!(page.layout, DEFAULT_LAYOUT);
        assert_eq!(page.url, "/about");
        assert_eq!(page.body, "<p>hi</p>");
        assert!(page.custom.is_empty());
    }

    #[test]
    fn url_defaults_follow_slug() {
        assert_eq!(Page::from_body("index", "").url, "/");
        assert_eq!(Page::from_body("blog/index", "").url, "/blog");
        assert_eq!(Page::from_body("docs/intro", "").url, "/docs/intro");
    }

    #[test]
    fn unterminated_comment_is_an_error() {
        assert_eq!(
            parse_page("x", "<!-- @name X\n<p>body</p>").unwrap_err(),
            PageParseError::Unterminated
        );
    }

    #[test]
    fn invalid_flag_is_an_error() {
        let err = parse_page("x", "<!--\n@is_draft maybe\n-->").unwrap_err();
        assert!(matches!(err, PageParseError::InvalidBool { .. }));
    }

    #[test]
    fn fallback_drops_the_comment_and_keeps_access_control() {
        let source = "<!--\n@require_auth\n@required_roles [admin]\n@owner_email ops@example.com\n@is_draft maybe\n-->\nsecret body";
        assert!(parse_page("secret", source).is_err());

        let page = fallback_page("secret", source);
        assert_eq!(page.body, "secret body");
        assert!(page.require_auth);
        assert_eq!(page.required_roles, ["admin"]);
        assert!(page.custom.is_empty());
        assert_eq!(page.url, "/secret");
    }

    #[test]
    fn fallback_fails_closed_on_bad_auth_values() {
        let page = fallback_page("p", "<!--\n@require_auth perhaps\n-->\nbody");
        assert!(page.require_auth);

        let page = fallback_page("p", "<!--\n@required_roles [editor]\n@is_draft maybe\n-->\nbody");
        assert!(page.require_auth);

        let unterminated = fallback_page("p", "<!--\n@require_auth\nbody");
        assert!(unterminated.require_auth);
    }

    #[test]
    fn reserialized_metadata_round_trips() {
        let page = parse_page("blog/post", SOURCE).unwrap();
        let again = parse_page("blog/post", &page.to_source()).unwrap();
        assert_eq!(page, again);
    }

    #[test]
    fn published_at_is_parsed() {
        let page = parse_page("x", "<!--\n@published_at 2024-05-01T10:00:00Z\n-->body").unwrap();
        assert_eq!(
            page.published_at.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
        let again = parse_page("x", &page.to_source()).unwrap();
        assert_eq!(page.published_at, again.published_at);
    }
}
