//! Template loading and page rendering.
//!
//! # Responsibilities
//! - Parse a Go-template-like language (`lexer`, `parser`)
//! - Evaluate it best effort, collecting errors instead of failing (`exec`)
//! - Provide the closed helper table templates may call (`helpers`)
//! - Assemble a tenant's layouts and partials (`set`) and render pages (`engine`)
//!
//! # Design Decisions
//! - Helpers are resolved by name from a fixed table at execution time
//! - Output is HTML-escaped unless a value is trusted markup (`Value::Html`)
//! - Rendering is synchronous; callers run it on the blocking pool

pub mod engine;
pub mod exec;
pub mod helpers;
pub mod lexer;
pub mod parser;
pub mod set;
pub mod value;

pub use engine::{page_value, PageRenderer, RenderContext, RenderOutput, HTML_CONTENT_TYPE, PAGE_CONTENT};
pub use helpers::{HelperEnv, NoEnv};
pub use parser::{parse_template, TemplateError};
pub use set::TemplateSet;
pub use value::Value;
