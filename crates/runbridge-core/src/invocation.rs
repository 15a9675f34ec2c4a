//! Incoming invocation and its context

use crate::abort::AbortSignal;
use crate::error::{Error, Result};
use crate::sink::{LogEntry, LogSink, ResponseSink};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Request fields supplied by the host for one invocation
///
/// Headers arrive already folded into one value per name (see
/// [`crate::headers::fold_headers`]). An empty `host` means the host did
/// not supply one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncomingInvocation {
    pub method: String,
    pub url: String,
    pub host: String,
    pub scheme: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: HashMap<String, String>,
    pub query_string: String,
    pub headers: HashMap<String, String>,
    pub body_raw: Option<String>,
    #[serde(skip)]
    pub body_binary: Option<Bytes>,
}

impl IncomingInvocation {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_text_body(mut self, body: impl Into<String>) -> Self {
        self.body_raw = Some(body.into());
        self
    }

    pub fn with_binary_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body_binary = Some(body.into());
        self
    }

    pub fn has_body(&self) -> bool {
        self.body_binary.as_ref().is_some_and(|b| !b.is_empty())
            || self.body_raw.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Body as text, preferring the raw text payload
    pub fn body_text(&self) -> Option<String> {
        match (&self.body_raw, &self.body_binary) {
            (Some(raw), _) => Some(raw.clone()),
            (None, Some(binary)) => Some(String::from_utf8_lossy(binary).into_owned()),
            (None, None) => None,
        }
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T> {
        let text = self.body_text().unwrap_or_default();
        Ok(serde_json::from_str(&text)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Per-call bundle handed to the adapter entrypoint
#[derive(Clone)]
pub struct InvocationContext {
    pub req: IncomingInvocation,
    pub res: Arc<dyn ResponseSink>,
    pub log: Arc<dyn LogSink>,
    pub error: Arc<dyn LogSink>,
    /// Fires when the host aborts the invocation
    pub abort: Option<AbortSignal>,
}

impl InvocationContext {
    pub fn new(
        req: IncomingInvocation,
        res: Arc<dyn ResponseSink>,
        log: Arc<dyn LogSink>,
        error: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            req,
            res,
            log,
            error,
            abort: None,
        }
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    pub fn log(&self, entry: impl Into<LogEntry>) {
        self.log.write(entry.into());
    }

    pub fn error(&self, entry: impl Into<LogEntry>) {
        self.error.write(entry.into());
    }

    pub fn report(&self, error: &Error) {
        self.error.write(LogEntry::from(error));
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("req", &self.req)
            .field("abort", &self.abort)
            .finish_non_exhaustive()
    }
}
