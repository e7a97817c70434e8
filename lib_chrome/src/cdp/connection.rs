//! # DevTools control connection
//!
//! One WebSocket carries every command and event for the whole browser, with
//! page traffic multiplexed by `sessionId`. A single spawned task owns the
//! socket:
//!
//! - Callers submit commands over an mpsc channel together with a oneshot
//!   responder; the task assigns ids, writes the frame, and resolves the
//!   responder when the matching `id` reply arrives.
//! - Frames carrying `method` instead of `id` are events. They are decoded
//!   into the closed [`CdpEvent`] set and forwarded to whichever subscriber
//!   registered for their `sessionId`; everything else is dropped.
//!
//! Connection loss fails every in-flight command and every later call, so a
//! dead browser surfaces as an error rather than a hang.

use crate::cdp::protocol::CdpEvent;
use crate::errors::{ChromeError, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Subscribers = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<CdpEvent>>>>;

struct Command {
    method: String,
    params: Value,
    session_id: Option<String>,
    responder: oneshot::Sender<Result<Value>>,
}

pub struct CdpConnection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    subscribers: Subscribers,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (stream, _) = connect_async(ws_url).await.map_err(|err| {
            ChromeError::Provision(format!("failed to connect to browser at {ws_url}: {err}"))
        })?;
        log::debug!("devtools connection established to {ws_url}");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let subscribers: Subscribers = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(run_io(stream, cmd_rx, subscribers.clone()));

        Ok(Self {
            cmd_tx,
            subscribers,
        })
    }

    /// Issue a command and await its result. `session_id` of `None` targets
    /// the browser itself rather than a page session.
    pub async fn call(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let (responder, rx) = oneshot::channel();
        let command = Command {
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
            responder,
        };
        self.cmd_tx
            .send(command)
            .map_err(|_| ChromeError::Transport("browser connection closed".to_string()))?;
        rx.await
            .map_err(|_| ChromeError::Transport("browser connection closed".to_string()))?
    }

    /// Register for the events of one page session. Events arriving for a
    /// session nobody subscribed to are dropped.
    pub fn subscribe(&self, session_id: &str) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.insert(session_id.to_string(), tx);
        rx
    }

    pub fn unsubscribe(&self, session_id: &str) {
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.remove(session_id);
    }
}

async fn run_io(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    subscribers: Subscribers,
) {
    let (mut write, mut read) = stream.split();
    let mut next_id: u64 = 0;
    let mut pending: HashMap<u64, (String, oneshot::Sender<Result<Value>>)> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Connection owner dropped.
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                };
                next_id += 1;
                let mut frame = json!({
                    "id": next_id,
                    "method": cmd.method,
                    "params": cmd.params,
                });
                if let Some(session_id) = &cmd.session_id {
                    frame["sessionId"] = json!(session_id);
                }
                if let Err(err) = write.send(WsMessage::Text(frame.to_string().into())).await {
                    let _ = cmd.responder.send(Err(ChromeError::Transport(err.to_string())));
                    break;
                }
                pending.insert(next_id, (cmd.method, cmd.responder));
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        dispatch_frame(&text, &mut pending, &subscribers);
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => {
                        log::warn!("devtools connection closed by browser");
                        break;
                    }
                    Some(Err(err)) => {
                        log::error!("devtools read error: {err}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    for (_, (method, responder)) in pending.drain() {
        let _ = responder.send(Err(ChromeError::Transport(format!(
            "connection closed while awaiting {method}"
        ))));
    }
    subscribers
        .lock()
        .expect("subscriber lock poisoned")
        .clear();
}

fn dispatch_frame(
    text: &str,
    pending: &mut HashMap<u64, (String, oneshot::Sender<Result<Value>>)>,
    subscribers: &Subscribers,
) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("dropping unparseable devtools frame: {err}");
            return;
        }
    };

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let Some((method, responder)) = pending.remove(&id) else {
            return;
        };
        let outcome = match frame.get("error") {
            Some(error) => {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown protocol error");
                Err(ChromeError::Cdp {
                    method,
                    message: message.to_string(),
                })
            }
            None => Ok(frame.get("result").cloned().unwrap_or_else(|| json!({}))),
        };
        let _ = responder.send(outcome);
        return;
    }

    let Some(method) = frame.get("method").and_then(Value::as_str) else {
        return;
    };
    let params = frame.get("params").cloned().unwrap_or_else(|| json!({}));
    let Some(event) = CdpEvent::parse(method, params) else {
        return;
    };
    let Some(session_id) = frame.get("sessionId").and_then(Value::as_str) else {
        return;
    };
    let subscribers = subscribers.lock().expect("subscriber lock poisoned");
    if let Some(tx) = subscribers.get(session_id) {
        let _ = tx.send(event);
    }
}
