//! Typed views over the DevTools protocol messages this crate consumes.
//!
//! The protocol surface is deliberately closed: commands are sent as raw
//! `serde_json` params and only the events and structures the render pipeline
//! actually reads get a typed decoding here.

use serde::Deserialize;
use serde_json::Value;

/// `Fetch.failRequest` reason for requests the router refuses to serve.
pub const BLOCKED_BY_CLIENT: &str = "BlockedByClient";

/// DOM node types as numbered by the protocol.
pub const NODE_ELEMENT: i64 = 1;
pub const NODE_TEXT: i64 = 3;
pub const NODE_DOCUMENT: i64 = 9;
pub const NODE_DOCUMENT_TYPE: i64 = 10;
pub const NODE_DOCUMENT_FRAGMENT: i64 = 11;

/// `Network.ResourceType`. Types this crate has no special handling for,
/// including ones newer than this list, all map to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    Xhr,
    Fetch,
    Prefetch,
    EventSource,
    WebSocket,
    Manifest,
    SignedExchange,
    Ping,
    Preflight,
    Other,
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(match name.as_str() {
            "Document" => ResourceType::Document,
            "Stylesheet" => ResourceType::Stylesheet,
            "Image" => ResourceType::Image,
            "Media" => ResourceType::Media,
            "Font" => ResourceType::Font,
            "Script" => ResourceType::Script,
            "TextTrack" => ResourceType::TextTrack,
            "XHR" => ResourceType::Xhr,
            "Fetch" => ResourceType::Fetch,
            "Prefetch" => ResourceType::Prefetch,
            "EventSource" => ResourceType::EventSource,
            "WebSocket" => ResourceType::WebSocket,
            "Manifest" => ResourceType::Manifest,
            "SignedExchange" => ResourceType::SignedExchange,
            "Ping" => ResourceType::Ping,
            "Preflight" => ResourceType::Preflight,
            _ => ResourceType::Other,
        })
    }
}

/// The request half of a `Fetch.requestPaused` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub has_post_data: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPausedParams {
    pub request_id: String,
    pub request: PausedRequest,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub network_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrownParams {
    pub exception_details: ExceptionDetails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl ExceptionDetails {
    /// Prefer the thrown object's description over the summary text.
    pub fn description(&self) -> &str {
        self.exception
            .as_ref()
            .and_then(|e| e.description.as_deref())
            .unwrap_or(&self.text)
    }
}

/// A DOM node as returned by `DOM.getDocument` with `pierce: true`.
/// `attributes` is the protocol's flat name/value list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomNode {
    pub node_type: i64,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub local_name: String,
    #[serde(default)]
    pub node_value: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub children: Vec<DomNode>,
    #[serde(default)]
    pub shadow_roots: Vec<DomNode>,
    #[serde(default)]
    pub shadow_root_type: Option<String>,
}

/// The closed set of events the pipeline subscribes to. Anything else coming
/// over the wire is dropped at the connection.
#[derive(Debug, Clone)]
pub enum CdpEvent {
    RequestPaused(RequestPausedParams),
    ExceptionThrown(ExceptionThrownParams),
    LoadEventFired,
}

impl CdpEvent {
    pub fn parse(method: &str, params: Value) -> Option<CdpEvent> {
        match method {
            "Fetch.requestPaused" => match serde_json::from_value(params) {
                Ok(parsed) => Some(CdpEvent::RequestPaused(parsed)),
                Err(err) => {
                    log::warn!("dropping malformed Fetch.requestPaused event: {err}");
                    None
                }
            },
            "Runtime.exceptionThrown" => match serde_json::from_value(params) {
                Ok(parsed) => Some(CdpEvent::ExceptionThrown(parsed)),
                Err(err) => {
                    log::warn!("dropping malformed Runtime.exceptionThrown event: {err}");
                    None
                }
            },
            "Page.loadEventFired" => Some(CdpEvent::LoadEventFired),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_request_paused() {
        let params = json!({
            "requestId": "interception-job-1.0",
            "request": {
                "url": "http://localhost:9080/app.js",
                "method": "GET",
                "headers": {"Accept": "*/*"},
                "initialPriority": "High",
                "referrerPolicy": "strict-origin-when-cross-origin"
            },
            "frameId": "F1",
            "resourceType": "Script",
            "networkId": "1000.2"
        });
        let event = CdpEvent::parse("Fetch.requestPaused", params).unwrap();
        let CdpEvent::RequestPaused(paused) = event else {
            panic!("wrong variant");
        };
        assert_eq!(paused.request_id, "interception-job-1.0");
        assert_eq!(paused.request.url, "http://localhost:9080/app.js");
        assert_eq!(paused.request.method, "GET");
        assert!(!paused.request.has_post_data);
        assert_eq!(paused.resource_type, ResourceType::Script);
        assert_eq!(paused.network_id.as_deref(), Some("1000.2"));
    }

    #[test]
    fn decodes_post_data() {
        let params = json!({
            "requestId": "interception-job-2.0",
            "request": {
                "url": "http://localhost:9080/fetch_post.json",
                "method": "POST",
                "headers": {},
                "postData": "Hello from fetch POST component!",
                "hasPostData": true
            },
            "resourceType": "Fetch"
        });
        let CdpEvent::RequestPaused(paused) =
            CdpEvent::parse("Fetch.requestPaused", params).unwrap()
        else {
            panic!("wrong variant");
        };
        assert!(paused.request.has_post_data);
        assert_eq!(
            paused.request.post_data.as_deref(),
            Some("Hello from fetch POST component!")
        );
        assert_eq!(paused.resource_type, ResourceType::Fetch);
    }

    #[test]
    fn decodes_exception_thrown() {
        let params = json!({
            "timestamp": 1e12,
            "exceptionDetails": {
                "text": "Uncaught",
                "lineNumber": 12,
                "exception": {"description": "TypeError: x is not a function"}
            }
        });
        let CdpEvent::ExceptionThrown(thrown) =
            CdpEvent::parse("Runtime.exceptionThrown", params).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(
            thrown.exception_details.description(),
            "TypeError: x is not a function"
        );
    }

    #[test]
    fn unknown_resource_types_decode_as_other() {
        let value = json!("FedCM");
        let parsed: ResourceType = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, ResourceType::Other);
    }

    #[test]
    fn unknown_methods_are_dropped() {
        assert!(CdpEvent::parse("Network.dataReceived", json!({})).is_none());
    }

    #[test]
    fn decodes_dom_tree() {
        let root = json!({
            "nodeId": 1,
            "nodeType": 9,
            "nodeName": "#document",
            "localName": "",
            "nodeValue": "",
            "children": [{
                "nodeId": 2,
                "nodeType": 1,
                "nodeName": "HTML",
                "localName": "html",
                "nodeValue": "",
                "attributes": ["class", "test"],
                "children": [],
                "shadowRoots": [{
                    "nodeId": 3,
                    "nodeType": 11,
                    "nodeName": "#document-fragment",
                    "shadowRootType": "open"
                }]
            }]
        });
        let node: DomNode = serde_json::from_value(root).unwrap();
        assert_eq!(node.node_type, NODE_DOCUMENT);
        let html = &node.children[0];
        assert_eq!(html.node_type, NODE_ELEMENT);
        assert_eq!(html.local_name, "html");
        assert_eq!(html.attributes, vec!["class", "test"]);
        assert_eq!(html.shadow_roots[0].shadow_root_type.as_deref(), Some("open"));
    }
}
