//! The render barrier. A script evaluated on every new document tracks
//! `pending-task` events (bubbling, composed; each carries a `complete`
//! promise) and exposes `window.ChromeRender.pendingTask`, which resolves
//! once all outstanding tasks have completed. The driver awaits that promise
//! after navigation; a rejection means some task failed, which is logged but
//! does not abort the render.

use crate::browser::Session;
use crate::errors::Result;
use serde_json::{json, Value};

pub const ON_NEW_DOCUMENT_SCRIPT: &str = include_str!("../../js/on_new_document.js");

const PENDING_TASK_EXPRESSION: &str = "window.ChromeRender.pendingTask";

pub async fn install(session: &Session) -> Result<()> {
    session
        .call(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": ON_NEW_DOCUMENT_SCRIPT}),
        )
        .await?;
    Ok(())
}

pub async fn await_settled(session: &Session) -> Result<()> {
    let result = session
        .call(
            "Runtime.evaluate",
            json!({"expression": PENDING_TASK_EXPRESSION, "awaitPromise": true}),
        )
        .await?;
    if let Some(details) = result.get("exceptionDetails") {
        let description = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("unknown");
        log::warn!("pending tasks rejected: {description}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The injected script is a contract with the driver side; make sure the
    // pieces the driver relies on stay present.
    #[test]
    fn script_exposes_the_settlement_contract() {
        assert!(ON_NEW_DOCUMENT_SCRIPT.contains("'pending-task'"));
        assert!(ON_NEW_DOCUMENT_SCRIPT.contains("window.ChromeRender"));
        assert!(ON_NEW_DOCUMENT_SCRIPT.contains("pendingTask"));
        assert!(ON_NEW_DOCUMENT_SCRIPT.contains("event.complete"));
        assert!(PENDING_TASK_EXPRESSION.starts_with("window.ChromeRender"));
    }
}
