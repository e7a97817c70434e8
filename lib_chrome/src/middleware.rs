//! The middleware orchestrator. Wraps an axum `Router`: responses whose
//! Content-Type matches the configured MIME types are buffered, loaded in a
//! fresh browser context with every subresource fetch intercepted, and
//! replaced by the serialized post-render DOM. Everything else passes through
//! untouched.

use crate::browser::{Browser, Session};
use crate::cdp::protocol::{CdpEvent, DomNode};
use crate::config::ChromeConfig;
use crate::errors::{ChromeError, Result};
use crate::links::Links;
use crate::render::serializer::DomSerializer;
use crate::render::{intercept, settle, RenderContext};
use crate::response::{media_type_matches, BufferedResponse, BufferPool};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use http::header;
use http::{HeaderMap, HeaderName, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

// Headers describing the upstream byte stream; wrong for the rewritten body.
const SKIP_HEADERS: [HeaderName; 5] = [
    header::ACCEPT_RANGES,
    header::CONTENT_LENGTH,
    header::ETAG,
    header::LAST_MODIFIED,
    header::VARY,
];

/// Marker extension a TLS-terminating host inserts into requests so the
/// navigate URL is synthesized with the `https` scheme.
#[derive(Debug, Clone, Copy)]
pub struct TlsConnection;

/// The provisioned middleware. One instance owns the browser for the life of
/// the process; each admitted request gets its own isolated browser context.
pub struct Chrome {
    timeout: Duration,
    mime_types: Vec<String>,
    fulfill_hosts: Vec<String>,
    continue_hosts: Vec<String>,
    links_enabled: bool,
    browser: Browser,
    replay: OnceLock<Router>,
    buffers: BufferPool,
}

impl Chrome {
    /// Validate the configuration, launch or connect the browser, and verify
    /// the control connection works.
    pub async fn provision(config: &ChromeConfig) -> Result<Arc<Self>> {
        let resolved = config.resolve()?;
        let browser = Browser::provision(&resolved.browser).await?;
        Ok(Arc::new(Self {
            timeout: resolved.timeout,
            mime_types: resolved.mime_types,
            fulfill_hosts: resolved.fulfill_hosts,
            continue_hosts: resolved.continue_hosts,
            links_enabled: resolved.links,
            browser,
            replay: OnceLock::new(),
            buffers: BufferPool::new(),
        }))
    }

    /// Layer the rewrite middleware onto `router`. A pre-middleware clone of
    /// the router is kept as the replay target for intercepted subresource
    /// requests, so those bypass the rewriter itself.
    pub fn wrap(self: &Arc<Self>, router: Router) -> Router {
        if self.replay.set(router.clone()).is_err() {
            log::warn!("chrome middleware wrapped more than once; keeping the first replay target");
        }
        router.layer(middleware::from_fn_with_state(self.clone(), rewrite))
    }

    /// Tear the browser down, bounded by the shutdown grace period.
    pub async fn cleanup(&self) {
        self.browser.close().await;
    }

    fn admits(&self, headers: &HeaderMap) -> bool {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        media_type_matches(content_type, &self.mime_types)
    }

    async fn render(
        &self,
        navigate_url: &str,
        authority: &str,
        cookie_header: Option<&str>,
        user_agent: Option<&str>,
        extensions: http::Extensions,
        upstream: BufferedResponse,
        links: Arc<Links>,
    ) -> Result<Bytes> {
        let replay = self.replay.get().cloned().ok_or_else(|| {
            ChromeError::Render("no replay target; middleware was never wrapped".to_string())
        })?;

        let (session, events) = self.browser.new_session().await?;
        let session = Arc::new(session);
        let _guard = SessionGuard(session.clone());
        let cancel = CancellationToken::new();
        let ctx = Arc::new(RenderContext {
            navigate_url: navigate_url.to_string(),
            authority: authority.to_string(),
            fulfill_hosts: self.fulfill_hosts.clone(),
            continue_hosts: self.continue_hosts.clone(),
            links,
            upstream,
            replay,
            extensions,
            cancel: cancel.clone(),
        });

        let outcome = tokio::select! {
            result = tokio::time::timeout(
                self.timeout,
                self.drive(&session, events, ctx.clone(), cookie_header, user_agent),
            ) => match result {
                Ok(result) => result,
                Err(_) => Err(ChromeError::Render(format!(
                    "deadline of {:?} exceeded",
                    self.timeout
                ))),
            },
            _ = cancel.cancelled() => Err(ChromeError::Render(
                "cancelled by interception failure".to_string(),
            )),
        };

        session.close().await;
        outcome
    }

    async fn drive(
        &self,
        session: &Arc<Session>,
        events: mpsc::UnboundedReceiver<CdpEvent>,
        ctx: Arc<RenderContext>,
        cookie_header: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Bytes> {
        session.call("Fetch.enable", json!({})).await?;
        session.call("Runtime.enable", json!({})).await?;
        session.call("Page.enable", json!({})).await?;

        let cookie_domain = ctx.authority.split(':').next().unwrap_or_default();
        for (name, value) in parse_cookie_header(cookie_header.unwrap_or("")) {
            session
                .call(
                    "Network.setCookie",
                    json!({"name": name, "value": value, "domain": cookie_domain}),
                )
                .await?;
        }
        if let Some(user_agent) = user_agent {
            session
                .call(
                    "Emulation.setUserAgentOverride",
                    json!({"userAgent": user_agent}),
                )
                .await?;
        }
        settle::install(session).await?;

        let (loaded_tx, loaded_rx) = oneshot::channel();
        tokio::spawn(intercept::run_router(
            events,
            session.clone(),
            ctx.clone(),
            loaded_tx,
        ));

        let navigated = session
            .call("Page.navigate", json!({"url": ctx.navigate_url}))
            .await?;
        if let Some(error_text) = navigated.get("errorText").and_then(Value::as_str) {
            return Err(ChromeError::Render(format!(
                "navigation failed: {error_text}"
            )));
        }
        loaded_rx.await.map_err(|_| {
            ChromeError::Render("page went away before finishing its load".to_string())
        })?;

        settle::await_settled(session).await?;

        let document = session
            .call("DOM.getDocument", json!({"depth": -1, "pierce": true}))
            .await?;
        let root = document.get("root").cloned().ok_or_else(|| {
            ChromeError::Render("DOM.getDocument returned no root".to_string())
        })?;
        let root: DomNode = serde_json::from_value(root)
            .map_err(|err| ChromeError::Render(format!("failed to decode DOM tree: {err}")))?;

        let mut buf = self.buffers.acquire();
        let serialized = DomSerializer::new().serialize(&root, &mut buf);
        let outcome = serialized.map(|()| Bytes::copy_from_slice(buf.as_bytes()));
        self.buffers.release(buf);
        outcome
    }
}

// Sessions abandoned by a dropped request future (client disconnect) still
// release their browser context.
struct SessionGuard(Arc<Session>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.spawn_close();
    }
}

async fn rewrite(State(chrome): State<Arc<Chrome>>, request: Request, next: Next) -> Response {
    let scheme = request_scheme(&request);
    let host = request_host(&request);
    let request_uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let cookie_header = request
        .headers()
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let extensions = request.extensions().clone();

    let response = next.run(request).await;
    if !chrome.admits(response.headers()) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let collected = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            log::error!("failed to buffer upstream response: {err}");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };
    if collected.is_empty() {
        return Response::from_parts(parts, Body::empty());
    }
    let Some(host) = host else {
        log::warn!("request has no host; passing response through unrendered");
        return Response::from_parts(parts, Body::from(collected));
    };

    let navigate_url = format!("{scheme}://{host}{request_uri}");
    let upstream = BufferedResponse::new(parts.status, parts.headers.clone(), collected);
    let links = Arc::new(Links::new());

    let rendered = chrome
        .render(
            &navigate_url,
            &host,
            cookie_header.as_deref(),
            user_agent.as_deref(),
            extensions,
            upstream.clone(),
            links.clone(),
        )
        .await;

    match rendered {
        Ok(html) => {
            let mut headers = HeaderMap::new();
            for (name, value) in upstream.headers() {
                if SKIP_HEADERS.contains(name) {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
            if chrome.links_enabled {
                links.emit(&mut headers);
            }
            let mut response = Response::new(Body::from(html));
            *response.status_mut() = upstream.status();
            *response.headers_mut() = headers;
            response
        }
        Err(err) => {
            log::error!("failed to render {navigate_url}: {err}");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

fn request_scheme(request: &Request) -> String {
    if request.extensions().get::<TlsConnection>().is_some() {
        return "https".to_string();
    }
    if let Some(scheme) = request.uri().scheme_str() {
        return scheme.to_string();
    }
    if let Some(proto) = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
    {
        return proto.to_string();
    }
    "http".to_string()
}

fn request_host(request: &Request) -> Option<String> {
    if let Some(authority) = request.uri().authority() {
        return Some(authority.to_string());
    }
    request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    #[test]
    fn scheme_detection() {
        assert_eq!(request_scheme(&request("/page.html")), "http");

        let mut tls = request("/page.html");
        tls.extensions_mut().insert(TlsConnection);
        assert_eq!(request_scheme(&tls), "https");

        let forwarded = http::Request::builder()
            .uri("/page.html")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .expect("request");
        assert_eq!(request_scheme(&forwarded), "https");
    }

    #[test]
    fn host_comes_from_authority_or_host_header() {
        let absolute = request("http://localhost:9080/page.html");
        assert_eq!(request_host(&absolute).as_deref(), Some("localhost:9080"));

        let relative = http::Request::builder()
            .uri("/page.html")
            .header(header::HOST, "localhost:9080")
            .body(Body::empty())
            .expect("request");
        assert_eq!(request_host(&relative).as_deref(), Some("localhost:9080"));

        assert_eq!(request_host(&request("/page.html")), None);
    }

    #[test]
    fn navigate_url_keeps_the_query_string() {
        let request = http::Request::builder()
            .uri("/search.html?q=rust&page=2")
            .header(header::HOST, "localhost:9080")
            .body(Body::empty())
            .expect("request");
        let uri = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        let url = format!(
            "{}://{}{}",
            request_scheme(&request),
            request_host(&request).unwrap_or_default(),
            uri
        );
        assert_eq!(url, "http://localhost:9080/search.html?q=rust&page=2");
    }

    #[test]
    fn cookie_header_parsing() {
        assert_eq!(
            parse_cookie_header("test=cookie"),
            vec![("test".to_string(), "cookie".to_string())]
        );
        assert_eq!(
            parse_cookie_header("a=1; b=2;  c=x=y"),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "x=y".to_string()),
            ]
        );
        assert!(parse_cookie_header("").is_empty());
        assert!(parse_cookie_header("; ;").is_empty());
        assert!(parse_cookie_header("=bare").is_empty());
    }

    #[test]
    fn stale_upstream_headers_are_stripped() {
        let mut upstream_headers = HeaderMap::new();
        upstream_headers.insert(header::CONTENT_TYPE, "text/html".parse().unwrap());
        upstream_headers.insert(header::CONTENT_LENGTH, "1234".parse().unwrap());
        upstream_headers.insert(header::ETAG, "\"abc\"".parse().unwrap());
        upstream_headers.insert(header::LAST_MODIFIED, "yesterday".parse().unwrap());
        upstream_headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
        upstream_headers.insert(header::VARY, "Accept-Encoding".parse().unwrap());
        upstream_headers.insert(header::CACHE_CONTROL, "no-store".parse().unwrap());

        let mut kept = HeaderMap::new();
        for (name, value) in upstream_headers.iter() {
            if SKIP_HEADERS.contains(name) {
                continue;
            }
            kept.append(name.clone(), value.clone());
        }

        assert!(kept.contains_key(header::CONTENT_TYPE));
        assert!(kept.contains_key(header::CACHE_CONTROL));
        for name in SKIP_HEADERS {
            assert!(!kept.contains_key(&name), "{name} should be stripped");
        }
    }
}
