//! Development host
//!
//! Turns plain HTTP requests into invocations so a framework can be run
//! locally behind the adapter. Each request gets a fresh
//! [`InvocationContext`] whose response sink is a one-shot channel back to
//! the axum handler, and whose abort signal fires if the client goes away
//! before a response was produced.

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use runbridge_adapter::InvocationHandler;
use runbridge_core::headers::fold_headers;
use runbridge_core::{
    AbortController, IncomingInvocation, InvocationContext, OutgoingBody, OutgoingHeaders,
    ResponseSink,
};
use runbridge_observability::{HealthState, TracingLogSink, health_router};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

const SCHEME: &str = "http";

/// Shared state for the invocation route
pub struct HostState {
    pub handler: InvocationHandler,
    pub trusted_hostname: Option<String>,
    pub max_body_bytes: usize,
}

/// Every path goes to the invocation handler except the health endpoints
pub fn invocation_router(state: Arc<HostState>, health: HealthState) -> Router {
    Router::new()
        .fallback(invoke)
        .with_state(state)
        .merge(health_router(health))
}

async fn invoke(State(state): State<Arc<HostState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(err) => {
            warn!("Rejecting request body: {}", err);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let invocation = incoming_invocation(&parts, body, state.trusted_hostname.as_deref());
    debug!(
        method = %invocation.method,
        url = %invocation.url,
        "Dispatching invocation"
    );

    let (sink, written) = ChannelSink::channel();
    let controller = AbortController::new();
    let mut abort_guard = AbortOnDrop::new(controller.clone());

    let ctx = InvocationContext::new(
        invocation,
        Arc::new(sink),
        Arc::new(TracingLogSink::log()),
        Arc::new(TracingLogSink::error()),
    )
    .with_abort_signal(controller.signal());

    let handler = state.handler.clone();
    tokio::spawn(async move { handler(ctx).await });

    let response = match written.await {
        Ok(write) => write.into_response(),
        Err(_) => {
            warn!("Invocation finished without writing a response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    };

    abort_guard.disarm();
    response
}

/// Map the HTTP request onto the host's invocation record
fn incoming_invocation(
    parts: &Parts,
    body: Bytes,
    trusted_hostname: Option<&str>,
) -> IncomingInvocation {
    let header_host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| parts.uri.authority().map(|authority| authority.as_str()))
        .unwrap_or_default();

    let authority = if header_host.is_empty() {
        trusted_hostname.unwrap_or_default()
    } else {
        header_host
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let url = if authority.is_empty() {
        String::new()
    } else {
        format!("{}://{}{}", SCHEME, authority, path_and_query)
    };

    let query_string = parts.uri.query().unwrap_or_default().to_string();
    let query: HashMap<String, String> = url::form_urlencoded::parse(query_string.as_bytes())
        .into_owned()
        .collect();

    let headers = fold_headers(parts.headers.iter().map(|(name, value)| {
        (
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
    }));

    let has_body = !body.is_empty();

    IncomingInvocation {
        method: parts.method.to_string(),
        port: Url::parse(&url).ok().and_then(|u| u.port_or_known_default()),
        url,
        host: trusted_hostname.unwrap_or(header_host).to_string(),
        scheme: SCHEME.to_string(),
        path: parts.uri.path().to_string(),
        query,
        query_string,
        headers,
        body_raw: has_body.then(|| String::from_utf8_lossy(&body).into_owned()),
        body_binary: has_body.then_some(body),
    }
}

/// A single write captured from the invocation's response sink
#[derive(Debug)]
pub enum SinkWrite {
    Send {
        body: OutgoingBody,
        status: StatusCode,
        headers: OutgoingHeaders,
    },
    Json {
        body: serde_json::Value,
        status: StatusCode,
        headers: OutgoingHeaders,
    },
    Empty,
    Redirect {
        url: String,
        status: StatusCode,
        headers: OutgoingHeaders,
    },
}

impl IntoResponse for SinkWrite {
    fn into_response(self) -> Response {
        match self {
            SinkWrite::Send {
                body,
                status,
                headers,
            } => {
                let body = match body {
                    OutgoingBody::Bytes(bytes) => Body::from(bytes),
                    OutgoingBody::Stream(stream) => Body::from_stream(stream),
                };
                with_parts(body, status, headers)
            }
            SinkWrite::Json {
                body,
                status,
                mut headers,
            } => {
                let bytes = match serde_json::to_vec(&body) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!("Failed to encode JSON response: {}", err);
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                };
                if headers.content_type().is_none() {
                    headers.insert(header::CONTENT_TYPE.as_str(), "application/json");
                }
                headers.set_content_length(bytes.len());
                with_parts(Body::from(bytes), status, headers)
            }
            SinkWrite::Empty => StatusCode::NO_CONTENT.into_response(),
            SinkWrite::Redirect {
                url,
                status,
                headers,
            } => {
                let mut response = with_parts(Body::empty(), status, headers);
                match HeaderValue::from_str(&url) {
                    Ok(location) => {
                        response.headers_mut().insert(header::LOCATION, location);
                        response
                    }
                    Err(_) => {
                        warn!(url = %url, "Invalid redirect location");
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }
        }
    }
}

fn with_parts(body: Body, status: StatusCode, headers: OutgoingHeaders) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().extend(headers.to_header_map());
    response
}

/// Response sink that forwards its first write over a oneshot channel
pub struct ChannelSink {
    sender: Mutex<Option<oneshot::Sender<SinkWrite>>>,
}

impl ChannelSink {
    pub fn channel() -> (Self, oneshot::Receiver<SinkWrite>) {
        let (sender, receiver) = oneshot::channel();
        let sink = Self {
            sender: Mutex::new(Some(sender)),
        };
        (sink, receiver)
    }

    fn deliver(&self, write: SinkWrite) {
        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(sender) => {
                if sender.send(write).is_err() {
                    debug!("Client went away before the response was written");
                }
            }
            None => warn!("Response already written, dropping write"),
        }
    }
}

impl ResponseSink for ChannelSink {
    fn send(&self, body: OutgoingBody, status: StatusCode, headers: OutgoingHeaders) {
        self.deliver(SinkWrite::Send {
            body,
            status,
            headers,
        });
    }

    fn json(&self, body: serde_json::Value, status: StatusCode, headers: OutgoingHeaders) {
        self.deliver(SinkWrite::Json {
            body,
            status,
            headers,
        });
    }

    fn empty(&self) {
        self.deliver(SinkWrite::Empty);
    }

    fn redirect(&self, url: &str, status: StatusCode, headers: OutgoingHeaders) {
        self.deliver(SinkWrite::Redirect {
            url: url.to_string(),
            status,
            headers,
        });
    }
}

/// Aborts the invocation unless disarmed
struct AbortOnDrop {
    controller: AbortController,
    armed: bool,
}

impl AbortOnDrop {
    fn new(controller: AbortController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abort("client disconnected");
        }
    }
}
