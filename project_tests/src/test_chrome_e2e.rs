//! End-to-end smoke test: needs a Chromium binary on PATH. Serves the
//! testdata corpus through the middleware on a local port and checks the
//! rendered responses. Run with `cargo run -p project_tests --bin test_chrome_e2e`.

use anyhow::{ensure, Context, Result};
use axum::routing::post;
use axum::Router;
use lib_chrome::{Chrome, ChromeConfig};
use std::net::SocketAddr;
use tower_http::services::ServeDir;

const PORT: u16 = 9080;

#[tokio::main]
async fn main() -> Result<()> {
    let chrome_config: ChromeConfig = ChromeConfig::parse_directive(
        "chrome {
            timeout 30s
            links
        }",
    )?;
    let chrome = Chrome::provision(&chrome_config)
        .await
        .context("provisioning the browser (is a Chromium binary on PATH?)")?;

    let app = Router::new()
        .route("/fetch_post.json", post(|body: String| async move { body }))
        .fallback_service(ServeDir::new("./servers/testdata"));
    let app = chrome.wrap(app);

    let addr = SocketAddr::from(([127, 0, 0, 1], PORT));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });

    let client = reqwest::Client::new();
    let base = format!("http://localhost:{PORT}");

    println!("--- Starting end-to-end render tests ---");

    for (path, expectations) in [
        ("/html.html", vec!["<html>", "<h1>Hello from HTML</h1>"]),
        ("/html_class.html", vec![r#"<html class="test">"#]),
        (
            "/javascript_inline.html",
            vec!["<html>", "<h1>Hello from inline Javascript</h1>"],
        ),
        (
            "/javascript_external.html",
            vec!["<html>", "<h1>Hello from external Javascript</h1>"],
        ),
        (
            "/javascript_module.html",
            vec!["<html>", "<h1>Hello from Javascript module</h1>"],
        ),
        (
            "/shadow_dom.html",
            vec![
                "<html>",
                r#"<template shadowrootmode="open""#,
                "<h1>Hello from Web Component</h1>",
            ],
        ),
        (
            "/shadow_dom_nested.html",
            vec![
                r#"<template shadowrootmode="open""#,
                "<h1>Hello from main component</h1>",
                "<p>Hello from nested component</p>",
            ],
        ),
        (
            "/shadow_dom_server.html",
            vec![r#"<template shadowrootmode="open""#, "<p>slot default</p>"],
        ),
        (
            "/fetch_get.html",
            vec!["<html>", "Hello from fetch GET component!"],
        ),
        (
            "/fetch_post.html",
            vec!["<html>", "Hello from fetch POST component!"],
        ),
        ("/pending_task.html", vec!["<html>", "Hello after a timeout!"]),
        (
            "/attribute_namespace.html",
            vec!["</html>", r#"<div foo:bar="baz">"#],
        ),
        (
            "/attribute_boolean.html",
            vec!["</html>", "<input required />"],
        ),
    ] {
        let url = format!("{base}{path}");
        let response = client.get(&url).send().await?;
        ensure!(
            response.status() == 200,
            "{path}: expected 200, got {}",
            response.status()
        );
        let body = response.text().await?;
        for expected in expectations {
            ensure!(
                body.contains(expected),
                "{path}: body does not contain {expected:?}\n---\n{body}"
            );
        }
        println!("✅ {path}");
    }

    // Cookies set on the request must be visible to page script.
    let body = client
        .get(format!("{base}/cookie.html"))
        .header("Cookie", "test=cookie")
        .send()
        .await?
        .text()
        .await?;
    ensure!(
        body.contains("document.cookie is [test=cookie]"),
        "/cookie.html: cookie did not reach the page\n---\n{body}"
    );
    println!("✅ /cookie.html");

    // The page must observe the client's User-Agent.
    let body = client
        .get(format!("{base}/user_agent.html"))
        .header("User-Agent", "test user agent")
        .send()
        .await?
        .text()
        .await?;
    ensure!(
        body.contains("navigator.userAgent is [test user agent]"),
        "/user_agent.html: user agent did not reach the page\n---\n{body}"
    );
    println!("✅ /user_agent.html");

    // Link hints for the stylesheet, script, image, and third-party origin.
    let response = client.get(format!("{base}/links.html")).send().await?;
    let mut link_headers: Vec<String> = response
        .headers()
        .get_all("link")
        .iter()
        .filter_map(|value| value.to_str().ok().map(str::to_string))
        .collect();
    link_headers.sort();
    let expected = vec![
        format!("<{base}/links.css>; rel=preload; as=style"),
        format!("<{base}/links.jpg>; rel=preload; as=image"),
        format!("<{base}/links.js>; rel=preload; as=script"),
        "<https://www.googletagmanager.com>; rel=preconnect".to_string(),
    ];
    ensure!(
        link_headers == expected,
        "/links.html: Link headers mismatch\nexpected: {expected:#?}\ngot: {link_headers:#?}"
    );
    println!("✅ /links.html");

    // A non-HTML response passes through byte-identical.
    let body = client
        .get(format!("{base}/fetch_get.json"))
        .send()
        .await?
        .text()
        .await?;
    ensure!(
        body.contains("Hello from fetch GET component!") && !body.contains("<!DOCTYPE"),
        "/fetch_get.json: non-HTML response was rewritten\n---\n{body}"
    );
    println!("✅ /fetch_get.json (passthrough)");

    chrome.cleanup().await;
    println!("--- All end-to-end tests passed ---");
    Ok(())
}
