//! Page rendering.
//!
//! # Data Flow
//! ```text
//! Page body ──parse──▶ page defines (override the set's by name)
//!      │                  └─ body without {{define "page-content"}} becomes "page-content"
//!      ▼
//! layout lookup: "layouts/<layout>" → "<layout>" → page-content alone
//!      │
//!      ▼
//! execute with { Site, Page, Data, Request, Params }  ──▶  RenderOutput { html, errors }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::page::Page;
use crate::render::exec::Executor;
use crate::render::helpers::HelperEnv;
use crate::render::parser::{parse_template, TemplateError};
use crate::render::set::TemplateSet;
use crate::render::value::Value;

/// Block the layout expects the page body to define.
pub const PAGE_CONTENT: &str = "page-content";

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Request-dependent part of the render context.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// `.Site`, prepared by the tenant.
    pub site: Value,
    /// `.Request`.
    pub request: Value,
    /// Route parameters, also exposed as `.Params`.
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    pub html: String,
    pub errors: Vec<TemplateError>,
}

/// Renders pages against a tenant's template set.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    set: Arc<TemplateSet>,
}

impl PageRenderer {
    pub fn new(set: Arc<TemplateSet>) -> Self {
        Self { set }
    }

    pub fn set(&self) -> &TemplateSet {
        &self.set
    }

    /// Render `page`. Never fails: problems are returned alongside whatever
    /// output could be produced.
    pub fn render(&self, page: &Page, ctx: RenderContext, env: &dyn HelperEnv) -> RenderOutput {
        let page_name = format!("pages/{}", page.slug);
        let parsed = parse_template(&page_name, &page.body);
        let mut errors = parsed.errors.clone();

        let mut defs = self.set.definitions().clone();
        let has_content = parsed.has_content();
        for (name, body) in parsed.defines {
            defs.insert(name, Arc::new(body));
        }
        let root = Arc::new(parsed.root);
        if has_content && !defs.contains_key(PAGE_CONTENT) {
            defs.insert(PAGE_CONTENT.to_string(), Arc::clone(&root));
        }
        defs.insert(page_name.clone(), root);

        let entry = match self.set.layout_name(&page.layout) {
            Some(layout) => layout,
            None => {
                errors.push(TemplateError::new(
                    &page_name,
                    0,
                    format!("layout \"{}\" not found", page.layout),
                ));
                if defs.contains_key(PAGE_CONTENT) {
                    PAGE_CONTENT.to_string()
                } else {
                    page_name.clone()
                }
            }
        };

        let data = context_value(page, ctx, self.set.theme_css());
        let (html, exec_errors) = Executor::new(&defs, env).execute(&entry, &data);
        errors.extend(exec_errors);

        if !errors.is_empty() {
            metrics::counter!("sitehost_template_errors_total").increment(errors.len() as u64);
        }
        RenderOutput { html, errors }
    }
}

fn context_value(page: &Page, ctx: RenderContext, theme_css: Option<&str>) -> Value {
    let mut site = match ctx.site {
        Value::Map(map) => Value::Map(map),
        _ => Value::map(),
    };
    if let Some(css) = theme_css {
        site.insert("ThemeCSS", Value::Html(format!("<style>\n{}\n</style>", css.replace("</", "<\\/"))));
    }

    let mut root = Value::map();
    root.insert("Site", site);
    root.insert("Page", page_value(page));
    root.insert("Data", page.custom.clone());
    root.insert("Request", ctx.request);
    root.insert("Params", ctx.params);
    root
}

/// Template-facing view of a page.
pub fn page_value(page: &Page) -> Value {
    let mut v = Value::map();
    v.insert("Slug", page.slug.as_str());
    v.insert("URL", page.url.as_str());
    v.insert("Title", page.title.as_str());
    v.insert("Description", page.description.as_str());
    v.insert("Keywords", page.keywords.clone());
    v.insert("Author", page.author.as_str());
    v.insert("Layout", page.layout.as_str());
    v.insert("Template", page.template.as_str());
    v.insert("IsDraft", page.is_draft);
    v.insert("RequireAuth", page.require_auth);
    v.insert("RequiredRoles", page.required_roles.clone());
    v.insert("Custom", page.custom.clone());
    v.insert("PublishedAt", page.published_at.map(|t| t.to_rfc3339()));
    v.insert("CreatedAt", page.created_at.map(|t| t.to_rfc3339()));
    v.insert("UpdatedAt", page.updated_at.map(|t| t.to_rfc3339()));
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::parse_page;
    use crate::render::helpers::NoEnv;

    fn renderer() -> PageRenderer {
        let mut set = TemplateSet::default();
        set.add_source(
            "layouts/default",
            "default",
            r#"<title>{{.Page.Title}}</title>{{template "nav" .}}<main>{{template "page-content" .}}</main>"#,
        );
        set.add_source("partials/nav", "nav", r#"<nav>{{.Site.Name}}</nav>"#);
        set.add_source("layouts/bare", "bare", r#"{{template "page-content" .}}"#);
        PageRenderer::new(Arc::new(set))
    }

    fn ctx() -> RenderContext {
        let mut site = Value::map();
        site.insert("Name", "Acme");
        let mut params = BTreeMap::new();
        params.insert("slug".to_string(), "hello".to_string());
        RenderContext {
            site,
            request: Value::map(),
            params,
        }
    }

    #[test]
    fn composes_layout_partials_and_page() {
        let page = parse_page(
            "blog/post",
            "<!--\n@name Post\n@url /blog/post/:slug:\n@hero big\n-->\n{{define \"page-content\"}}slug={{.Params.slug}} hero={{.Data.hero}}{{end}}",
        )
        .unwrap();
        let out = renderer().render(&page, ctx(), &NoEnv);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(
            out.html,
            "<title>Post</title><nav>Acme</nav><main>slug=hello hero=big</main>"
        );
    }

    #[test]
    fn body_without_define_becomes_page_content() {
        let page = parse_page("about", "<!--\n@layout bare\n-->\n<p>{{.Page.Title}}</p>").unwrap();
        let out = renderer().render(&page, ctx(), &NoEnv);
        assert_eq!(out.html, "<p>Untitled Page</p>");
    }

    #[test]
    fn errors_are_collected_while_rendering_continues() {
        let page = Page::from_body("x", "{{define \"page-content\"}}a{{missingHelper}}b{{.Nope.Deeper}}c{{end}}");
        let out = renderer().render(&page, ctx(), &NoEnv);
        assert!(out.html.contains("<main>abc</main>"));
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.contains("missingHelper"));
    }

    #[test]
    fn missing_layout_falls_back_to_page_content() {
        let mut page = Page::from_body("x", "hi");
        page.layout = "ghost".to_string();
        let out = renderer().render(&page, ctx(), &NoEnv);
        assert_eq!(out.html, "hi");
        assert_eq!(out.errors.len(), 1);
    }
}
