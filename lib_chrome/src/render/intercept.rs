//! Per-page interception router. Every `Fetch.requestPaused` event gets its
//! own worker so a slow sub-request never stalls the other paused requests;
//! each worker ends in exactly one of fulfill, continue, or fail. A worker
//! error cancels the whole session so the outer render fails fast instead of
//! leaving the browser hung on an unanswered pause.

use crate::browser::Session;
use crate::cdp::protocol::{
    CdpEvent, RequestPausedParams, ResourceType, BLOCKED_BY_CLIENT,
};
use crate::errors::{ChromeError, Result};
use crate::links::Links;
use crate::render::subrequest;
use crate::response::BufferedResponse;
use axum::Router;
use base64::engine::general_purpose;
use base64::Engine as _;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Everything a worker needs to decide and execute a verdict. Shared by all
/// workers of one render; `links` is the only mutable part and carries its
/// own lock.
pub struct RenderContext {
    pub navigate_url: String,
    pub authority: String,
    pub fulfill_hosts: Vec<String>,
    pub continue_hosts: Vec<String>,
    pub links: Arc<Links>,
    pub upstream: BufferedResponse,
    pub replay: Router,
    pub extensions: http::Extensions,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    FulfillUpstream,
    Replay,
    Continue,
    Block,
}

fn authority_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn origin_of(url: &Url) -> String {
    format!("{}://{}", url.scheme(), authority_of(url))
}

fn is_handleable(resource_type: ResourceType) -> bool {
    matches!(
        resource_type,
        ResourceType::Script | ResourceType::Xhr | ResourceType::Fetch
    )
}

fn classify(ctx: &RenderContext, paused: &RequestPausedParams, url: &Url) -> Verdict {
    if paused.request.url == ctx.navigate_url {
        return Verdict::FulfillUpstream;
    }
    let authority = authority_of(url);
    let handleable = is_handleable(paused.resource_type);
    if handleable
        && (authority == ctx.authority || ctx.fulfill_hosts.contains(&authority))
    {
        Verdict::Replay
    } else if handleable && ctx.continue_hosts.contains(&authority) {
        Verdict::Continue
    } else {
        Verdict::Block
    }
}

fn record_hint(ctx: &RenderContext, paused: &RequestPausedParams, url: &Url) {
    if authority_of(url) == ctx.authority {
        ctx.links.add_resource(&paused.request.url, paused.resource_type);
    } else {
        ctx.links.add_preconnect(&origin_of(url));
    }
}

/// Drain the session's event stream until it closes. The first
/// `Page.loadEventFired` resolves `loaded_tx`; every `Fetch.requestPaused`
/// spawns a verdict worker; runtime exceptions are logged and ignored.
pub async fn run_router(
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    session: Arc<Session>,
    ctx: Arc<RenderContext>,
    loaded_tx: oneshot::Sender<()>,
) {
    let mut loaded_tx = Some(loaded_tx);
    while let Some(event) = events.recv().await {
        match event {
            CdpEvent::RequestPaused(paused) => {
                let session = session.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_paused(&session, &ctx, &paused).await {
                        log::error!(
                            "failed to settle intercepted request {}: {err}",
                            paused.request.url
                        );
                        ctx.cancel.cancel();
                    }
                });
            }
            CdpEvent::ExceptionThrown(thrown) => {
                log::error!(
                    "exception thrown in page: {}",
                    thrown.exception_details.description()
                );
            }
            CdpEvent::LoadEventFired => {
                if let Some(tx) = loaded_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    }
}

async fn handle_paused(
    session: &Session,
    ctx: &RenderContext,
    paused: &RequestPausedParams,
) -> Result<()> {
    let url = Url::parse(&paused.request.url).map_err(|err| {
        ChromeError::Intercept(format!(
            "failed to parse request URL {}: {err}",
            paused.request.url
        ))
    })?;
    log::debug!(
        "request paused: url={} type={:?} navigate={}",
        paused.request.url,
        paused.resource_type,
        paused.request.url == ctx.navigate_url
    );

    match classify(ctx, paused, &url) {
        Verdict::FulfillUpstream => {
            fulfill(session, &paused.request_id, &ctx.upstream).await?;
            log::debug!("navigation fulfilled: {}", paused.request.url);
        }
        Verdict::Replay => {
            record_hint(ctx, paused, &url);
            let sub_response = subrequest::dispatch(&ctx.replay, &ctx.extensions, paused).await?;
            fulfill(session, &paused.request_id, &sub_response).await?;
            log::debug!("request fulfilled: {}", paused.request.url);
        }
        Verdict::Continue => {
            ctx.links.add_preconnect(&origin_of(&url));
            session
                .call(
                    "Fetch.continueRequest",
                    json!({"requestId": paused.request_id}),
                )
                .await?;
            log::debug!("request continued: {}", paused.request.url);
        }
        Verdict::Block => {
            record_hint(ctx, paused, &url);
            session
                .call(
                    "Fetch.failRequest",
                    json!({"requestId": paused.request_id, "errorReason": BLOCKED_BY_CLIENT}),
                )
                .await?;
            log::debug!("request blocked: {}", paused.request.url);
        }
    }
    Ok(())
}

/// Answer a paused request with a canned response: source status, the source
/// header multi-map flattened to one entry per value, body Base64-encoded.
async fn fulfill(session: &Session, request_id: &str, source: &BufferedResponse) -> Result<()> {
    let headers: Vec<serde_json::Value> = source
        .headers()
        .iter()
        .map(|(name, value)| {
            json!({
                "name": name.as_str(),
                "value": String::from_utf8_lossy(value.as_bytes()),
            })
        })
        .collect();
    session
        .call(
            "Fetch.fulfillRequest",
            json!({
                "requestId": request_id,
                "responseCode": source.status().as_u16(),
                "responseHeaders": headers,
                "body": general_purpose::STANDARD.encode(source.body()),
            }),
        )
        .await?;
    Ok(())
}
