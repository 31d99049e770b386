//! Per-tenant template set.
//!
//! Files are loaded from `layouts/`, `partials/` (also read from the older
//! `snippets/` name), `sections/` and `blocks/`, in that order. Each file is
//! registered under `dir/stem` and under its bare `stem`; `{{define}}` blocks
//! register under their own name. Later registrations override earlier
//! ones.

use std::sync::Arc;

use crate::render::exec::Definitions;
use crate::render::parser::{parse_template, TemplateError};
use crate::sandbox::{PathError, PathValidator};

pub const TEMPLATE_DIRS: &[&str] = &["layouts", "partials", "snippets", "sections", "blocks"];

#[derive(Debug, Default)]
pub struct TemplateSet {
    defs: Definitions,
    errors: Vec<TemplateError>,
    theme_css: Option<String>,
    files: usize,
}

impl TemplateSet {
    /// Load the template set rooted at `site_dir` (root-relative).
    pub async fn load(validator: &PathValidator, site_dir: &str, theme: &str) -> Result<Self, PathError> {
        let mut set = TemplateSet::default();

        for dir in TEMPLATE_DIRS {
            let rel_dir = format!("{}/{}", site_dir, dir);
            for file in validator.glob(&rel_dir, "html").await? {
                let source = validator.read_to_string(&file).await?;
                let stem = file
                    .rsplit('/')
                    .next()
                    .and_then(|name| name.strip_suffix(".html"))
                    .unwrap_or_default()
                    .to_string();
                let canonical = match *dir {
                    "snippets" => format!("partials/{}", stem),
                    other => format!("{}/{}", other, stem),
                };
                set.add_source(&canonical, &stem, &source);
            }
        }

        let theme_file = format!("{}/themes/{}.css", site_dir, theme);
        match validator.read_to_string(&theme_file).await {
            Ok(css) => set.theme_css = Some(css),
            Err(PathError::NotFound) => {}
            Err(e) => return Err(e),
        }

        tracing::debug!(
            site_dir = %site_dir,
            files = set.files,
            templates = set.defs.len(),
            errors = set.errors.len(),
            "Template set loaded"
        );
        Ok(set)
    }

    /// Parse `source` and register it under `name` and `alias`.
    pub fn add_source(&mut self, name: &str, alias: &str, source: &str) {
        let parsed = parse_template(name, source);
        self.errors.extend(parsed.errors.iter().cloned());
        for (define, body) in parsed.defines {
            self.defs.insert(define, Arc::new(body));
        }
        let root = Arc::new(parsed.root);
        if !alias.is_empty() && alias != name {
            self.defs.insert(alias.to_string(), Arc::clone(&root));
        }
        self.defs.insert(name.to_string(), root);
        self.files += 1;
    }

    pub fn definitions(&self) -> &Definitions {
        &self.defs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Parse problems found while loading.
    pub fn errors(&self) -> &[TemplateError] {
        &self.errors
    }

    pub fn theme_css(&self) -> Option<&str> {
        self.theme_css.as_deref()
    }

    /// Name under which `layout` is registered, preferring `layouts/<name>`.
    pub fn layout_name(&self, layout: &str) -> Option<String> {
        let qualified = format!("layouts/{}", layout);
        if self.contains(&qualified) {
            Some(qualified)
        } else if self.contains(layout) {
            Some(layout.to_string())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> (tempfile::TempDir, PathValidator) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("sites/a.test");
        for d in ["layouts", "partials", "snippets", "blocks", "themes"] {
            std::fs::create_dir_all(base.join(d)).unwrap();
        }
        std::fs::write(base.join("layouts/default.html"), "<main>{{template \"page-content\" .}}</main>").unwrap();
        std::fs::write(base.join("partials/header.html"), "<header>{{.Site.Name}}</header>").unwrap();
        std::fs::write(base.join("snippets/footer.html"), "<footer></footer>").unwrap();
        std::fs::write(base.join("blocks/cta.html"), "{{define \"cta\"}}Go{{end}}{{if}}").unwrap();
        std::fs::write(base.join("themes/default.css"), "body{}").unwrap();
        let v = PathValidator::new(dir.path()).unwrap();
        (dir, v)
    }

    #[tokio::test]
    async fn loads_all_directories() {
        let (_dir, v) = site();
        let set = TemplateSet::load(&v, "sites/a.test", "default").await.unwrap();
        assert!(set.contains("layouts/default"));
        assert!(set.contains("default"));
        assert!(set.contains("partials/header"));
        assert!(set.contains("header"));
        assert!(set.contains("partials/footer"));
        assert!(set.contains("cta"));
        assert_eq!(set.layout_name("default").as_deref(), Some("layouts/default"));
        assert_eq!(set.layout_name("header").as_deref(), Some("header"));
        assert_eq!(set.layout_name("nope"), None);
        assert_eq!(set.theme_css(), Some("body{}"));
        // `{{if}}` without a condition is reported, not fatal.
        assert_eq!(set.errors().len(), 1);
    }

    #[tokio::test]
    async fn missing_directories_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sites/b.test")).unwrap();
        let v = PathValidator::new(dir.path()).unwrap();
        let set = TemplateSet::load(&v, "sites/b.test", "default").await.unwrap();
        assert!(set.definitions().is_empty());
        assert_eq!(set.theme_css(), None);
    }
}
