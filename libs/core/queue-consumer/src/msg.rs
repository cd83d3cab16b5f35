//! Queue message wrapper
//!
//! Wraps a decoded payload with the metadata the queue client attached to it.
//! The consumer core never interprets the payload or the headers.

use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Message headers as attached by the producer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgHeaders {
    data: BTreeMap<String, Vec<u8>>,
}

impl MsgHeaders {
    /// Create empty headers
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.data.insert(key.into(), value.into())
    }

    /// Get a header value
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether there are no headers
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A message pulled from a queue
///
/// `key` is the producer-assigned message key. It is unrelated to the
/// correlation ID the notification loop assigns when the message is polled.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMsg<T> {
    /// Producer-assigned message key
    pub key: Uuid,

    /// The decoded payload
    pub value: T,

    /// Message headers
    pub headers: MsgHeaders,
}

impl<T> QueueMsg<T> {
    /// Create a message with empty headers
    pub fn new(key: Uuid, value: T) -> Self {
        Self {
            key,
            value,
            headers: MsgHeaders::new(),
        }
    }

    /// Create a message with a random key
    pub fn with_random_key(value: T) -> Self {
        Self::new(Uuid::new_v4(), value)
    }

    /// Attach headers
    pub fn with_headers(mut self, headers: MsgHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Get the payload
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Display for QueueMsg<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueMsg(key={}, value={:?})", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers() {
        let mut headers = MsgHeaders::new();
        assert!(headers.is_empty());

        assert_eq!(headers.put("tenant", "t-1"), None);
        assert_eq!(headers.put("tenant", "t-2"), Some(b"t-1".to_vec()));
        assert_eq!(headers.get("tenant"), Some(&b"t-2"[..]));
        assert_eq!(headers.get("missing"), None);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_display_includes_key_and_value() {
        let key = Uuid::new_v4();
        let msg = QueueMsg::new(key, "component-lifecycle");

        let rendered = msg.to_string();
        assert!(rendered.contains(&key.to_string()));
        assert!(rendered.contains("component-lifecycle"));
    }
}
