use crate::cdp::protocol::RequestPausedParams;
use crate::errors::{ChromeError, Result};
use crate::response::BufferedResponse;
use axum::body::Body;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Replay an intercepted browser request through the server's own handler,
/// in-process, and capture the result. The original client request's
/// extensions ride along so request-scoped values keep propagating.
pub async fn dispatch(
    replay: &Router,
    extensions: &http::Extensions,
    paused: &RequestPausedParams,
) -> Result<BufferedResponse> {
    let mut builder = http::Request::builder()
        .method(paused.request.method.as_str())
        .uri(&paused.request.url);
    for (name, value) in &paused.request.headers {
        if let Some(value) = value.as_str() {
            builder = builder.header(name, value);
        }
    }

    let body = match &paused.request.post_data {
        Some(data) if paused.request.has_post_data => Body::from(data.clone()),
        _ => Body::empty(),
    };
    let mut request = builder.body(body).map_err(|err| {
        ChromeError::Intercept(format!(
            "failed to build sub-request for {}: {err}",
            paused.request.url
        ))
    })?;
    *request.extensions_mut() = extensions.clone();

    let response = match replay.clone().oneshot(request).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    };

    let (parts, body) = response.into_parts();
    let body = body.collect().await.map_err(|err| {
        ChromeError::Intercept(format!(
            "failed to buffer sub-response for {}: {err}",
            paused.request.url
        ))
    })?;
    Ok(BufferedResponse::new(
        parts.status,
        parts.headers,
        body.to_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::protocol::{CdpEvent, ResourceType};
    use axum::routing::{get, post};
    use serde_json::json;

    fn paused(method: &str, url: &str, post_data: Option<&str>) -> RequestPausedParams {
        let mut params = json!({
            "requestId": "interception-job-1.0",
            "request": {
                "url": url,
                "method": method,
                "headers": {"X-Probe": "1"},
            },
            "resourceType": "Fetch"
        });
        if let Some(data) = post_data {
            params["request"]["postData"] = json!(data);
            params["request"]["hasPostData"] = json!(true);
        }
        let CdpEvent::RequestPaused(parsed) =
            CdpEvent::parse("Fetch.requestPaused", params).expect("parse")
        else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.resource_type, ResourceType::Fetch);
        parsed
    }

    #[tokio::test]
    async fn replays_get_requests_with_headers() {
        let app = Router::new().route(
            "/probe.json",
            get(|headers: http::HeaderMap| async move {
                format!(
                    "probe={}",
                    headers
                        .get("x-probe")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("missing")
                )
            }),
        );
        let paused = paused("GET", "http://localhost:9080/probe.json", None);
        let response = dispatch(&app, &http::Extensions::new(), &paused)
            .await
            .expect("dispatch");
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.body(), b"probe=1");
    }

    #[tokio::test]
    async fn replays_post_bodies() {
        let app = Router::new().route("/fetch_post.json", post(|body: String| async move { body }));
        let paused = paused(
            "POST",
            "http://localhost:9080/fetch_post.json",
            Some("Hello from fetch POST component!"),
        );
        let response = dispatch(&app, &http::Extensions::new(), &paused)
            .await
            .expect("dispatch");
        assert_eq!(response.body(), b"Hello from fetch POST component!");
    }

    #[tokio::test]
    async fn unmatched_routes_surface_their_status() {
        let app = Router::new();
        let paused = paused("GET", "http://localhost:9080/missing", None);
        let response = dispatch(&app, &http::Extensions::new(), &paused)
            .await
            .expect("dispatch");
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    }
}
