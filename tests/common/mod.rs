//! Shared fixtures for integration tests: a project root with a few sites
//! and helpers to drive the app in-process.

#![allow(dead_code)]

use std::path::Path;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use tower::ServiceExt;

use sitehost::config::{Environment, ServerConfig};
use sitehost::Server;

pub const LAYOUT: &str = r#"<html><head><title>{{.Page.Title}}</title></head><body>{{template "page-content" .}}</body></html>"#;

pub fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A site directory with a config, the default layout and no pages.
pub fn site(root: &Path, host: &str) {
    write(
        root,
        &format!("sites/{host}/config.toml"),
        &format!("name = \"{host}\"\ndomain = \"{host}\"\nbase_url = \"https://{host}\"\n"),
    );
    write(root, &format!("sites/{host}/layouts/default.html"), LAYOUT);
}

pub fn page(root: &Path, host: &str, slug: &str, source: &str) {
    write(root, &format!("sites/{host}/pages/{slug}.html"), source);
}

/// The standard fixture tree:
/// - `localhost`: home, a parameterised blog post, a literal featured post,
///   a page calling the internal API, a page with a template error, a draft,
///   and a page requiring the `editor` role
/// - `a.test`: `/x` and a public file
/// - `b.test`: home only
pub fn fixture_tree(root: &Path) {
    site(root, "localhost");
    page(root, "localhost", "index", "<!--\n@name Home\n-->\nwelcome home");
    page(
        root,
        "localhost",
        "blog/post",
        "<!--\n@name Post\n@url /blog/post/:slug:\n-->\n{{define \"page-content\"}}post {{.Params.slug}}{{end}}",
    );
    page(
        root,
        "localhost",
        "blog/featured",
        "<!--\n@name Featured\n@url /blog/post/featured\n-->\nfeatured post",
    );
    page(
        root,
        "localhost",
        "status",
        "{{$r := api \"GET\" \"/health\"}}{{if isAPISuccess $r}}status={{getAPIData $r \"status\"}} site={{getAPIData $r \"site\"}}{{end}}",
    );
    page(root, "localhost", "broken", "before {{nosuchhelper 1}} after");
    page(root, "localhost", "draft", "<!--\n@is_draft true\n-->\nunfinished");
    page(
        root,
        "localhost",
        "editors",
        "<!--\n@require_auth\n@required_roles [editor]\n-->\nfor editors",
    );

    site(root, "a.test");
    page(root, "a.test", "x", "<!--\n@url /x\n-->\npage x");
    write(root, "sites/a.test/public/hello.txt", "hello from public");

    site(root, "b.test");
    page(root, "b.test", "index", "b home");
}

pub fn config(root: &Path, environment: Environment) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.project_root = root.to_path_buf();
    config.server.environment = environment;
    config.rate_limit.enabled = false;
    config.logging.persist = false;
    config
}

pub fn server(root: &Path) -> Server {
    Server::new(config(root, Environment::Local)).unwrap()
}

pub fn get(host: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
