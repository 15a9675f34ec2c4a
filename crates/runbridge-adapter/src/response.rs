//! Response representations
//!
//! A [`Response`] is either a cheap cache record (status, body, header
//! record) or a realized response with a full `HeaderMap` and a body that
//! can be read once. The lightweight constructor [`Response::new`] produces
//! the cache record for text and stream bodies; anything that needs the full
//! interface realizes it in place.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use runbridge_core::headers::{DEFAULT_CONTENT_TYPE, build_outgoing_headers};
use runbridge_core::{Blob, BodyStream, Error, OutgoingHeaders, Result};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// Status and headers for a new response
#[derive(Debug, Clone)]
pub struct ResponseInit {
    pub status: StatusCode,
    pub status_text: Option<String>,
    pub headers: HeaderMap,
}

impl Default for ResponseInit {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            status_text: None,
            headers: HeaderMap::new(),
        }
    }
}

impl ResponseInit {
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.append(name, HeaderValue::from_static(value));
        self
    }
}

#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Blob(Blob),
    Stream(BodyStream),
}

impl From<String> for ResponseBody {
    fn from(text: String) -> Self {
        ResponseBody::Text(text)
    }
}

impl From<&str> for ResponseBody {
    fn from(text: &str) -> Self {
        ResponseBody::Text(text.to_string())
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        ResponseBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        ResponseBody::Bytes(Bytes::from(bytes))
    }
}

impl From<Blob> for ResponseBody {
    fn from(blob: Blob) -> Self {
        ResponseBody::Blob(blob)
    }
}

impl From<BodyStream> for ResponseBody {
    fn from(stream: BodyStream) -> Self {
        ResponseBody::Stream(stream)
    }
}

/// Body of a cache record
#[derive(Debug)]
pub enum CachedBody {
    Text(String),
    Stream(BodyStream),
}

/// Pre-decomposed response written without building a realized one
#[derive(Debug)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub body: CachedBody,
    pub headers: OutgoingHeaders,
}

#[derive(Debug)]
pub struct RealizedResponse {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    body: ResponseBody,
    body_used: bool,
}

impl Default for RealizedResponse {
    fn default() -> Self {
        Self::new(ResponseBody::Empty, ResponseInit::default())
    }
}

impl RealizedResponse {
    /// Standard constructor; fills `content-type` from the body kind
    pub fn new(body: ResponseBody, init: ResponseInit) -> Self {
        let mut headers = init.headers;

        if !headers.contains_key(CONTENT_TYPE) {
            let inferred = match &body {
                ResponseBody::Text(_) => Some(HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
                ResponseBody::Blob(blob) => blob
                    .content_type()
                    .and_then(|ct| HeaderValue::from_str(ct).ok()),
                _ => None,
            };
            if let Some(value) = inferred {
                headers.insert(CONTENT_TYPE, value);
            }
        }

        Self {
            status: init.status,
            status_text: init.status_text.unwrap_or_default(),
            headers,
            body,
            body_used: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn has_body(&self) -> bool {
        !matches!(self.body, ResponseBody::Empty)
    }

    pub fn body_used(&self) -> bool {
        self.body_used
    }

    /// Take the body out; a second call fails with [`Error::BodyUsed`]
    pub fn take_body(&mut self) -> Result<ResponseBody> {
        if self.body_used {
            return Err(Error::BodyUsed);
        }
        self.body_used = true;
        Ok(std::mem::take(&mut self.body))
    }

    pub async fn array_buffer(&mut self) -> Result<Bytes> {
        match self.take_body()? {
            ResponseBody::Empty => Ok(Bytes::new()),
            ResponseBody::Text(text) => Ok(Bytes::from(text)),
            ResponseBody::Bytes(bytes) => Ok(bytes),
            ResponseBody::Blob(blob) => Ok(blob.bytes().await),
            ResponseBody::Stream(stream) => stream.into_bytes().await,
        }
    }

    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.array_buffer().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.array_buffer().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn blob(&mut self) -> Result<Blob> {
        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(Blob::new(self.array_buffer().await?, content_type))
    }
}

impl From<CachedResponse> for RealizedResponse {
    fn from(cached: CachedResponse) -> Self {
        let body = match cached.body {
            CachedBody::Text(text) => ResponseBody::Text(text),
            CachedBody::Stream(stream) => ResponseBody::Stream(stream),
        };
        let init = ResponseInit {
            status: cached.status,
            status_text: None,
            headers: cached.headers.to_header_map(),
        };
        Self::new(body, init)
    }
}

/// A response in exactly one of its two representations
#[derive(Debug)]
pub enum Response {
    Cached(CachedResponse),
    Realized(RealizedResponse),
}

impl Response {
    /// Lightweight constructor
    ///
    /// Text and stream bodies become a cache record. Without explicit
    /// headers the record carries `content-type: text/plain; charset=UTF-8`.
    pub fn new(body: impl Into<ResponseBody>, init: ResponseInit) -> Self {
        let body = match body.into() {
            ResponseBody::Text(text) => CachedBody::Text(text),
            ResponseBody::Stream(stream) => CachedBody::Stream(stream),
            other => return Response::realized(other, init),
        };

        let headers = if init.headers.is_empty() {
            OutgoingHeaders::from_iter([(CONTENT_TYPE.as_str(), DEFAULT_CONTENT_TYPE)])
        } else {
            build_outgoing_headers(&init.headers)
        };

        Response::Cached(CachedResponse {
            status: init.status,
            body,
            headers,
        })
    }

    /// Standard constructor, always realized
    pub fn realized(body: impl Into<ResponseBody>, init: ResponseInit) -> Self {
        Response::Realized(RealizedResponse::new(body.into(), init))
    }

    pub fn json<T: Serialize>(value: &T, status: StatusCode) -> Result<Self> {
        let body = serde_json::to_string(value)?;
        let init = ResponseInit::status(status).with_header("content-type", "application/json");
        Ok(Response::realized(body, init))
    }

    pub fn empty(status: StatusCode) -> Self {
        Response::realized(ResponseBody::Empty, ResponseInit::status(status))
    }

    /// Status without realizing
    pub fn status(&self) -> StatusCode {
        match self {
            Response::Cached(cached) => cached.status,
            Response::Realized(realized) => realized.status(),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Response::Cached(_))
    }

    /// Replace the cache record with a realized response
    pub fn realize(&mut self) -> &mut RealizedResponse {
        if self.is_cached() {
            let taken = std::mem::replace(self, Response::Realized(RealizedResponse::default()));
            *self = Response::Realized(taken.into_realized());
        }

        match self {
            Response::Realized(realized) => realized,
            Response::Cached(_) => unreachable!("cache record replaced above"),
        }
    }

    pub fn into_realized(self) -> RealizedResponse {
        match self {
            Response::Cached(cached) => cached.into(),
            Response::Realized(realized) => realized,
        }
    }

    pub fn headers(&mut self) -> &HeaderMap {
        self.realize().headers()
    }

    pub async fn array_buffer(&mut self) -> Result<Bytes> {
        self.realize().array_buffer().await
    }

    pub async fn text(&mut self) -> Result<String> {
        self.realize().text().await
    }
}

/// Which constructor synthetic responses go through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseConstructor {
    #[default]
    Lightweight,
    Standard,
}

impl ResponseConstructor {
    pub fn build(self, body: impl Into<ResponseBody>, init: ResponseInit) -> Response {
        match self {
            ResponseConstructor::Lightweight => Response::new(body, init),
            ResponseConstructor::Standard => Response::realized(body, init),
        }
    }
}
