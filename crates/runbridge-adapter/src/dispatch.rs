//! Response dispatch
//!
//! Turns whatever the framework returned into exactly one write on the
//! invocation's response sink. Cache records are written directly. Realized
//! responses are folded into an outgoing header record and written as a
//! buffer, a stream, or an empty body.
//!
//! A streamed body is forwarded as a stream when the headers say the
//! framework took care of framing (`transfer-encoding`, `content-encoding`,
//! `content-length`), when `x-accel-buffering: no` is set, or when the
//! content type is neither `application/json` nor `text/*`.
//! `text/event-stream` is always streamed. Everything else is buffered into
//! one chunk with a computed `content-length`.

use crate::response::{
    CachedBody, CachedResponse, RealizedResponse, Response, ResponseBody, ResponseConstructor,
    ResponseInit,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use http::StatusCode;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING};
use once_cell::sync::Lazy;
use regex::Regex;
use runbridge_core::body::{stream_to_bytes, stream_to_bytes_limited};
use runbridge_core::headers::build_outgoing_headers;
use runbridge_core::{
    BodyStream, ByteStream, Error, OutgoingBody, OutgoingHeaders, ResponseSink, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Value returned by a framework's `fetch`
pub enum FetchOutput {
    Ready(Response),
    Pending(BoxFuture<'static, Result<Response>>),
}

impl FetchOutput {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<Response>> + Send + 'static,
    {
        FetchOutput::Pending(Box::pin(future))
    }

    /// Run `observe` on the error if the pending result rejects
    ///
    /// The rejection itself still reaches [`dispatch`] unchanged.
    pub fn inspect_rejection<F>(self, observe: F) -> Self
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        match self {
            FetchOutput::Ready(response) => FetchOutput::Ready(response),
            FetchOutput::Pending(pending) => {
                FetchOutput::pending(async move { pending.await.inspect_err(observe) })
            }
        }
    }
}

impl From<Response> for FetchOutput {
    fn from(response: Response) -> Self {
        FetchOutput::Ready(response)
    }
}

impl fmt::Debug for FetchOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutput::Ready(response) => f.debug_tuple("Ready").field(response).finish(),
            FetchOutput::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Replaces the default mapping of a rejected fetch
///
/// Returning `None` means the handler dealt with the invocation itself.
pub type ErrorHandler = Arc<dyn Fn(Error) -> BoxFuture<'static, Option<Response>> + Send + Sync>;

pub fn error_handler<F, Fut>(handler: F) -> ErrorHandler
where
    F: Fn(Error) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Response>> + Send + 'static,
{
    Arc::new(move |err: Error| -> BoxFuture<'static, Option<Response>> {
        Box::pin(handler(err))
    })
}

/// How streamed bodies reach the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Streaming,
    /// Reduced-feature mode: every stream is collected into one write
    Buffered,
}

#[derive(Clone, Default)]
pub struct DispatchOptions {
    pub error_handler: Option<ErrorHandler>,
    pub delivery: DeliveryMode,
    pub constructor: ResponseConstructor,
    pub max_buffer_bytes: Option<usize>,
}

impl fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("error_handler", &self.error_handler.is_some())
            .field("delivery", &self.delivery)
            .field("constructor", &self.constructor)
            .field("max_buffer_bytes", &self.max_buffer_bytes)
            .finish()
    }
}

/// What [`dispatch`] wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Cache record with a text body
    Cached,
    /// Pre-buffered realized body
    Direct,
    Streamed,
    Buffered,
    /// Realized response without a body
    Empty,
    /// The error handler took over; nothing was written
    Handled,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Cached => "cached",
            Delivery::Direct => "direct",
            Delivery::Streamed => "streamed",
            Delivery::Buffered => "buffered",
            Delivery::Empty => "empty",
            Delivery::Handled => "handled",
        }
    }
}

/// Synthetic response for a rejected fetch: 504 for timeouts, 500 otherwise
pub fn fetch_error_response(err: &Error, constructor: ResponseConstructor) -> Response {
    let status = if err.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    constructor.build(ResponseBody::Empty, ResponseInit::status(status))
}

pub async fn dispatch(
    output: FetchOutput,
    sink: &dyn ResponseSink,
    options: &DispatchOptions,
) -> Result<Delivery> {
    let response = match output {
        FetchOutput::Ready(response) => response,
        FetchOutput::Pending(pending) => match pending.await {
            Ok(response) => response,
            Err(err) => match &options.error_handler {
                Some(handler) => match handler(err).await {
                    Some(response) => response,
                    None => return Ok(Delivery::Handled),
                },
                None => {
                    warn!(error_name = err.name(), "Fetch rejected: {}", err);
                    fetch_error_response(&err, options.constructor)
                }
            },
        },
    };

    match response {
        Response::Cached(cached) => write_cached(cached, sink, options).await,
        Response::Realized(realized) => write_realized(realized, sink, options).await,
    }
}

async fn write_cached(
    cached: CachedResponse,
    sink: &dyn ResponseSink,
    options: &DispatchOptions,
) -> Result<Delivery> {
    let CachedResponse {
        status,
        body,
        mut headers,
    } = cached;

    match body {
        CachedBody::Text(text) => {
            headers.set_content_length(text.len());
            sink.send(OutgoingBody::Bytes(Bytes::from(text)), status, headers);
            Ok(Delivery::Cached)
        }
        CachedBody::Stream(stream) => match options.delivery {
            DeliveryMode::Streaming => {
                sink.send(OutgoingBody::Stream(lock(stream)?), status, headers);
                Ok(Delivery::Streamed)
            }
            DeliveryMode::Buffered => buffer(lock(stream)?, sink, status, headers, options).await,
        },
    }
}

async fn write_realized(
    mut realized: RealizedResponse,
    sink: &dyn ResponseSink,
    options: &DispatchOptions,
) -> Result<Delivery> {
    let status = realized.status();
    let mut headers = build_outgoing_headers(realized.headers());

    let bytes = match realized.take_body()? {
        ResponseBody::Text(text) => Bytes::from(text),
        ResponseBody::Bytes(bytes) => bytes,
        ResponseBody::Blob(blob) => blob.bytes().await,
        ResponseBody::Stream(stream) => {
            let stream = lock(stream)?;
            if options.delivery == DeliveryMode::Streaming && should_stream(&headers) {
                sink.send(OutgoingBody::Stream(stream), status, headers);
                return Ok(Delivery::Streamed);
            }
            return buffer(stream, sink, status, headers, options).await;
        }
        ResponseBody::Empty => {
            headers.set_content_length(0);
            sink.send(OutgoingBody::Bytes(Bytes::new()), status, headers);
            return Ok(Delivery::Empty);
        }
    };

    headers.set_content_length(bytes.len());
    sink.send(OutgoingBody::Bytes(bytes), status, headers);
    Ok(Delivery::Direct)
}

async fn buffer(
    stream: ByteStream,
    sink: &dyn ResponseSink,
    status: StatusCode,
    mut headers: OutgoingHeaders,
    options: &DispatchOptions,
) -> Result<Delivery> {
    let bytes = match options.max_buffer_bytes {
        Some(max) => stream_to_bytes_limited(stream, max).await?,
        None => stream_to_bytes(stream).await?,
    };
    debug!(bytes = bytes.len(), "Buffered streamed response body");

    headers.set_content_length(bytes.len());
    sink.send(OutgoingBody::Bytes(bytes), status, headers);
    Ok(Delivery::Buffered)
}

fn lock(mut stream: BodyStream) -> Result<ByteStream> {
    stream.lock()
}

/// Decide whether a streamed body is forwarded as a stream
pub fn should_stream(headers: &OutgoingHeaders) -> bool {
    let present = |name: &str| headers.get(name).is_some_and(|v| !v.is_empty());

    present(TRANSFER_ENCODING.as_str())
        || present(CONTENT_ENCODING.as_str())
        || present(CONTENT_LENGTH.as_str())
        || headers
            .get("x-accel-buffering")
            .is_some_and(|v| v.eq_ignore_ascii_case("no"))
        || !is_bufferable_content_type(headers.content_type().unwrap_or_default())
}

static BUFFERABLE_CONTENT_TYPE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)^(application/json\b|text/)"));

static EVENT_STREAM: Lazy<Option<Regex>> = Lazy::new(|| compile(r"(?i)^text/event-stream\b"));

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Invalid content-type pattern '{}': {}", pattern, e);
            None
        }
    }
}

fn matches(regex: Option<&Regex>, content_type: &str) -> bool {
    regex.is_some_and(|regex| regex.is_match(content_type))
}

/// `application/json` or any `text/*` except `text/event-stream`
fn is_bufferable_content_type(content_type: &str) -> bool {
    matches(BUFFERABLE_CONTENT_TYPE.as_ref(), content_type)
        && !matches(EVENT_STREAM.as_ref(), content_type)
}
