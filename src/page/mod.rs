//! Page sources.
//!
//! A page file starts with an optional HTML comment carrying `@key value`
//! metadata lines; the rest of the file is the template body.
//!
//! ```text
//! <!--
//! @name Hello
//! @url /blog/post/:slug:
//! @require_auth
//! @required_roles [editor, admin]
//! @hero_image /assets/hero.png
//! -->
//! {{define "page-content"}}...{{end}}
//! ```

pub mod parser;

pub use parser::{fallback_page, parse_page, Page, PageParseError, DEFAULT_LAYOUT, DEFAULT_TEMPLATE, DEFAULT_TITLE};
