//! Realized request
//!
//! The fully built, standard-shaped request handed to frameworks. Building
//! one follows the usual request constructor rules: `CONNECT`, `TRACE` and
//! `TRACK` are forbidden methods, and `GET`/`HEAD` requests cannot carry a
//! body.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use runbridge_core::{AbortController, AbortSignal, Blob, BodyStream, Error, Result};
use serde::de::DeserializeOwned;
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestCache {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestCredentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestRedirect {
    #[default]
    Follow,
    Error,
    Manual,
}

/// Options for [`RealizedRequest::new`]
#[derive(Debug, Clone, Default)]
pub struct RequestInit {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub signal: Option<AbortSignal>,
    pub cache: RequestCache,
    pub credentials: RequestCredentials,
    pub mode: RequestMode,
    pub redirect: RequestRedirect,
    pub referrer: Option<String>,
    pub referrer_policy: String,
    pub integrity: String,
    pub keepalive: bool,
}

#[derive(Debug)]
pub struct RealizedRequest {
    method: Method,
    method_override: Option<Method>,
    url: Url,
    headers: HeaderMap,
    has_body: bool,
    body: Mutex<Option<Bytes>>,
    signal: AbortSignal,
    cache: RequestCache,
    credentials: RequestCredentials,
    mode: RequestMode,
    redirect: RequestRedirect,
    referrer: String,
    referrer_policy: String,
    integrity: String,
    keepalive: bool,
}

fn is_forbidden_method(method: &Method) -> bool {
    *method == Method::CONNECT
        || *method == Method::TRACE
        || method.as_str().eq_ignore_ascii_case("TRACK")
}

impl RealizedRequest {
    pub fn new(url: &str, init: RequestInit) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::RequestBuild(format!("Invalid URL '{}': {}", url, e)))?;

        if is_forbidden_method(&init.method) {
            return Err(Error::RequestBuild(format!(
                "'{}' HTTP method is unsupported.",
                init.method
            )));
        }

        if (init.method == Method::GET || init.method == Method::HEAD) && init.body.is_some() {
            return Err(Error::RequestBuild(
                "Request with GET/HEAD method cannot have body.".to_string(),
            ));
        }

        let signal = init
            .signal
            .unwrap_or_else(|| AbortController::new().signal());

        Ok(Self {
            method: init.method,
            method_override: None,
            url,
            headers: init.headers,
            has_body: init.body.is_some(),
            body: Mutex::new(init.body),
            signal,
            cache: init.cache,
            credentials: init.credentials,
            mode: init.mode,
            redirect: init.redirect,
            referrer: init.referrer.unwrap_or_else(|| "about:client".to_string()),
            referrer_policy: init.referrer_policy,
            integrity: init.integrity,
            keepalive: init.keepalive,
        })
    }

    /// Report a different method than the one the request was built with
    pub(crate) fn with_method_override(mut self, method: Method) -> Self {
        self.method_override = Some(method);
        self
    }

    pub fn method(&self) -> &Method {
        self.method_override.as_ref().unwrap_or(&self.method)
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn parsed_url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub fn cache(&self) -> RequestCache {
        self.cache
    }

    pub fn credentials(&self) -> RequestCredentials {
        self.credentials
    }

    /// Always empty for requests built from an invocation
    pub fn destination(&self) -> &str {
        ""
    }

    pub fn integrity(&self) -> &str {
        &self.integrity
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn redirect(&self) -> RequestRedirect {
        self.redirect
    }

    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    pub fn referrer_policy(&self) -> &str {
        &self.referrer_policy
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn body_used(&self) -> bool {
        self.has_body && self.body_slot().is_none()
    }

    fn body_slot(&self) -> MutexGuard<'_, Option<Bytes>> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn consume(&self) -> Result<Bytes> {
        if !self.has_body {
            return Ok(Bytes::new());
        }
        self.body_slot().take().ok_or(Error::BodyUsed)
    }

    /// Take the body as a one-shot stream
    pub fn body(&self) -> Result<Option<BodyStream>> {
        if !self.has_body {
            return Ok(None);
        }
        self.body_slot()
            .take()
            .map(|bytes| Some(BodyStream::from_bytes(bytes)))
            .ok_or(Error::StreamLocked)
    }

    pub fn array_buffer(&self) -> Result<Bytes> {
        self.consume()
    }

    pub fn text(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.consume()?).into_owned())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.consume()?)?)
    }

    pub fn blob(&self) -> Result<Blob> {
        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(Blob::new(self.consume()?, content_type))
    }

    /// Parse an `application/x-www-form-urlencoded` body
    pub fn form_data(&self) -> Result<Vec<(String, String)>> {
        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if !content_type
            .to_ascii_lowercase()
            .starts_with("application/x-www-form-urlencoded")
        {
            return Err(Error::Stream(format!(
                "Could not parse content as FormData (content-type '{}')",
                content_type
            )));
        }

        let body = self.consume()?;
        Ok(url::form_urlencoded::parse(&body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect())
    }

    /// Copy the request; fails once the body has been read
    pub fn try_clone(&self) -> Result<Self> {
        let body = {
            let slot = self.body_slot();
            if self.has_body && slot.is_none() {
                return Err(Error::BodyUsed);
            }
            slot.clone()
        };

        Ok(Self {
            method: self.method.clone(),
            method_override: self.method_override.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            has_body: self.has_body,
            body: Mutex::new(body),
            signal: self.signal.clone(),
            cache: self.cache,
            credentials: self.credentials,
            mode: self.mode,
            redirect: self.redirect,
            referrer: self.referrer.clone(),
            referrer_policy: self.referrer_policy.clone(),
            integrity: self.integrity.clone(),
            keepalive: self.keepalive,
        })
    }
}
