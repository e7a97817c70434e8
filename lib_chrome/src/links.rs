use crate::cdp::protocol::ResourceType;
use http::header::LINK;
use http::{HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::Mutex;

/// Accumulates the subresource URLs observed while rendering, classified for
/// `Link` header emission. Interception workers insert concurrently; the
/// orchestrator reads once the render is done. Order is unspecified.
#[derive(Debug, Default)]
pub struct Links {
    urls: Mutex<HashMap<String, &'static str>>,
}

impl Links {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&self, url: &str, resource_type: ResourceType) {
        let rel_as = match resource_type {
            ResourceType::Font => "font",
            ResourceType::Image => "image",
            ResourceType::Script => "script",
            ResourceType::Stylesheet => "style",
            _ => return,
        };
        let mut urls = self.urls.lock().expect("links lock poisoned");
        urls.insert(url.to_string(), rel_as);
    }

    pub fn add_preconnect(&self, origin: &str) {
        let mut urls = self.urls.lock().expect("links lock poisoned");
        urls.insert(origin.to_string(), "preconnect");
    }

    /// Append one `Link` header per recorded entry.
    pub fn emit(&self, headers: &mut HeaderMap) {
        let urls = self.urls.lock().expect("links lock poisoned");
        for (url, rel_as) in urls.iter() {
            let value = if *rel_as == "preconnect" {
                format!("<{url}>; rel=preconnect")
            } else {
                format!("<{url}>; rel=preload; as={rel_as}")
            };
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(LINK, value);
                }
                Err(_) => log::warn!("skipping unencodable Link header for {url}"),
            }
        }
    }
}
