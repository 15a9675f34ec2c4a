//! Response and log sinks
//!
//! The host hands every invocation a response sink and two log sinks. A
//! response sink is a one-shot channel: exactly one write terminates the
//! invocation.

use crate::body::ByteStream;
use crate::error::Error;
use crate::headers::OutgoingHeaders;
use bytes::Bytes;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Body handed to [`ResponseSink::send`]
pub enum OutgoingBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl OutgoingBody {
    /// Length when the body is already buffered
    pub fn len(&self) -> Option<usize> {
        match self {
            OutgoingBody::Bytes(bytes) => Some(bytes.len()),
            OutgoingBody::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, OutgoingBody::Stream(_))
    }
}

impl From<Bytes> for OutgoingBody {
    fn from(bytes: Bytes) -> Self {
        OutgoingBody::Bytes(bytes)
    }
}

impl fmt::Debug for OutgoingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutgoingBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            OutgoingBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Response side of an invocation
pub trait ResponseSink: Send + Sync {
    /// Send a binary or streamed body
    fn send(&self, body: OutgoingBody, status: StatusCode, headers: OutgoingHeaders);

    /// Send a JSON document
    fn json(&self, body: serde_json::Value, status: StatusCode, headers: OutgoingHeaders);

    /// Finish the invocation without a body
    fn empty(&self);

    /// Redirect to another URL
    fn redirect(&self, url: &str, status: StatusCode, headers: OutgoingHeaders);

    fn text(&self, body: String, status: StatusCode, headers: OutgoingHeaders) {
        self.send(OutgoingBody::Bytes(Bytes::from(body)), status, headers);
    }

    fn binary(&self, body: Bytes, status: StatusCode, headers: OutgoingHeaders) {
        self.send(OutgoingBody::Bytes(body), status, headers);
    }
}

/// Single argument accepted by a log sink
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Text(String),
    Json(serde_json::Value),
    Error { name: String, message: String },
}

impl From<&str> for LogEntry {
    fn from(text: &str) -> Self {
        LogEntry::Text(text.to_string())
    }
}

impl From<String> for LogEntry {
    fn from(text: String) -> Self {
        LogEntry::Text(text)
    }
}

impl From<serde_json::Value> for LogEntry {
    fn from(value: serde_json::Value) -> Self {
        LogEntry::Json(value)
    }
}

impl From<&Error> for LogEntry {
    fn from(error: &Error) -> Self {
        LogEntry::Error {
            name: error.name().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<Error> for LogEntry {
    fn from(error: Error) -> Self {
        LogEntry::from(&error)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEntry::Text(text) => write!(f, "{}", text),
            LogEntry::Json(value) => write!(f, "{}", value),
            LogEntry::Error { name, message } => write!(f, "{}: {}", name, message),
        }
    }
}

/// Log or error side of an invocation
pub trait LogSink: Send + Sync {
    fn write(&self, entry: LogEntry);
}

impl<F> LogSink for F
where
    F: Fn(LogEntry) + Send + Sync,
{
    fn write(&self, entry: LogEntry) {
        self(entry)
    }
}

/// Lets exactly one write reach the wrapped sink
///
/// Later writes are dropped with a warning. `written()` tells the caller
/// whether the invocation still needs its terminating write.
pub struct SinkGuard {
    inner: Arc<dyn ResponseSink>,
    written: AtomicBool,
}

impl SinkGuard {
    pub fn new(inner: Arc<dyn ResponseSink>) -> Self {
        Self {
            inner,
            written: AtomicBool::new(false),
        }
    }

    pub fn written(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    fn claim(&self, operation: &str) -> bool {
        let first = !self.written.swap(true, Ordering::AcqRel);
        if !first {
            warn!("Dropping second response write ({}) for invocation", operation);
        }
        first
    }
}

impl ResponseSink for SinkGuard {
    fn send(&self, body: OutgoingBody, status: StatusCode, headers: OutgoingHeaders) {
        if self.claim("send") {
            self.inner.send(body, status, headers);
        }
    }

    fn json(&self, body: serde_json::Value, status: StatusCode, headers: OutgoingHeaders) {
        if self.claim("json") {
            self.inner.json(body, status, headers);
        }
    }

    fn empty(&self) {
        if self.claim("empty") {
            self.inner.empty();
        }
    }

    fn redirect(&self, url: &str, status: StatusCode, headers: OutgoingHeaders) {
        if self.claim("redirect") {
            self.inner.redirect(url, status, headers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSink {
        writes: Mutex<Vec<String>>,
    }

    impl ResponseSink for CountingSink {
        fn send(&self, body: OutgoingBody, status: StatusCode, _headers: OutgoingHeaders) {
            self.writes
                .lock()
                .unwrap()
                .push(format!("send {} {:?}", status.as_u16(), body.len()));
        }

        fn json(&self, _body: serde_json::Value, status: StatusCode, _headers: OutgoingHeaders) {
            self.writes
                .lock()
                .unwrap()
                .push(format!("json {}", status.as_u16()));
        }

        fn empty(&self) {
            self.writes.lock().unwrap().push("empty".to_string());
        }

        fn redirect(&self, url: &str, status: StatusCode, _headers: OutgoingHeaders) {
            self.writes
                .lock()
                .unwrap()
                .push(format!("redirect {} {}", status.as_u16(), url));
        }
    }

    #[test]
    fn test_sink_guard_allows_single_write() {
        let inner = Arc::new(CountingSink::default());
        let guard = SinkGuard::new(inner.clone());
        assert!(!guard.written());

        guard.text("hi".to_string(), StatusCode::OK, OutgoingHeaders::new());
        guard.empty();
        guard.redirect("/elsewhere", StatusCode::FOUND, OutgoingHeaders::new());

        assert!(guard.written());
        assert_eq!(*inner.writes.lock().unwrap(), vec!["send 200 Some(2)"]);
    }

    #[test]
    fn test_log_entry_from_error() {
        let entry = LogEntry::from(Error::MissingUrl);
        assert_eq!(
            entry,
            LogEntry::Error {
                name: "MissingURLError".to_string(),
                message: "Missing URL".to_string(),
            }
        );
        assert_eq!(entry.to_string(), "MissingURLError: Missing URL");
    }

    #[test]
    fn test_closure_log_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink = move |entry: LogEntry| captured.lock().unwrap().push(entry.to_string());

        sink.write(LogEntry::from("hello"));
        sink.write(LogEntry::from(serde_json::json!({"k": 1})));

        assert_eq!(*lines.lock().unwrap(), vec!["hello", "{\"k\":1}"]);
    }
}
