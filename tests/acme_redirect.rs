//! The plain-HTTP front-end: ACME HTTP-01 passthrough and HTTPS redirect.

mod common;

use axum::http::{header, StatusCode};

use common::*;

#[tokio::test]
async fn challenge_tokens_are_answered() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(dir.path());
    server.challenges().put_http("tok", "tok.thumbprint");
    let app = server.redirect_app();

    let response = send(&app, get("a.test", "/.well-known/acme-challenge/tok")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "tok.thumbprint");

    let unknown = send(&app, get("a.test", "/.well-known/acme-challenge/other")).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn everything_else_is_redirected_to_https() {
    let dir = tempfile::tempdir().unwrap();
    let app = server(dir.path()).redirect_app();

    let response = send(&app, get("a.test:8080", "/blog?page=2")).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "https://a.test:8443/blog?page=2");

    let missing_host = send(
        &app,
        axum::http::Request::builder()
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(missing_host.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redirect_listener_over_a_real_socket() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(dir.path());
    server.challenges().put_http("live", "live.thumbprint");
    let app = server.redirect_app();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let challenge = client
        .get(format!("http://{addr}/.well-known/acme-challenge/live"))
        .send()
        .await
        .unwrap();
    assert_eq!(challenge.status(), reqwest::StatusCode::OK);
    assert_eq!(challenge.text().await.unwrap(), "live.thumbprint");

    let redirect = client
        .get(format!("http://{addr}/docs"))
        .header("host", "b.test")
        .send()
        .await
        .unwrap();
    assert_eq!(redirect.status(), reqwest::StatusCode::MOVED_PERMANENTLY);
    assert_eq!(redirect.headers()["location"], "https://b.test:8443/docs");
}
