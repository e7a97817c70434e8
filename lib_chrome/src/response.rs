use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Mutex;

/// A fully buffered HTTP response: the upstream page on its way into the
/// browser, or a replayed sub-request result on its way into a fulfillment.
/// Read-only once constructed.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl BufferedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// True when the Content-Type's media type (parameters stripped) matches one
/// of the configured types. `mime_types` entries are lowercase essences.
pub fn media_type_matches(content_type: Option<&str>, mime_types: &[String]) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let Ok(media) = content_type.parse::<mime::Mime>() else {
        return false;
    };
    mime_types.iter().any(|m| m == media.essence_str())
}

// Serializer output can run to megabytes per render; reuse the allocations
// across requests. Buffers above the cap are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 4 << 20;

#[derive(Default)]
pub struct BufferPool {
    buffers: Mutex<Vec<String>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> String {
        let mut buffers = self.buffers.lock().expect("buffer pool lock poisoned");
        buffers.pop().unwrap_or_default()
    }

    pub fn release(&self, mut buf: String) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock().expect("buffer pool lock poisoned");
        buffers.push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_matching() {
        let types = vec!["text/html".to_string(), "application/xhtml+xml".to_string()];
        assert!(media_type_matches(Some("text/html"), &types));
        assert!(media_type_matches(
            Some("text/html; charset=utf-8"),
            &types
        ));
        assert!(media_type_matches(Some("TEXT/HTML"), &types));
        assert!(media_type_matches(Some("application/xhtml+xml"), &types));
        assert!(!media_type_matches(Some("application/json"), &types));
        assert!(!media_type_matches(Some("text/plain; charset=utf-8"), &types));
        assert!(!media_type_matches(Some(""), &types));
        assert!(!media_type_matches(None, &types));
    }

    #[test]
    fn pool_reuses_buffers() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire();
        buf.push_str("scratch");
        let capacity = buf.capacity();
        pool.release(buf);

        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), capacity);
    }
}
