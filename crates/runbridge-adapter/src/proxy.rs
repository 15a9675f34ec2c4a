//! Lazy request proxy
//!
//! A [`RequestProxy`] answers `method` and `url` straight from the incoming
//! invocation. Everything else goes through a single build-or-fetch accessor
//! that builds the [`RealizedRequest`] on first use and caches it for the
//! rest of the invocation.

use crate::request::{
    RealizedRequest, RequestCache, RequestCredentials, RequestInit, RequestMode, RequestRedirect,
};
use bytes::Bytes;
use http::{HeaderMap, Method};
use once_cell::sync::OnceCell;
use runbridge_core::headers::{to_header_map, validate_host};
use runbridge_core::{
    AbortController, AbortSignal, Blob, BodyStream, Error, IncomingInvocation, Result,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use url::Url;

pub struct RequestProxy<'a> {
    incoming: &'a IncomingInvocation,
    url: Url,
    abort: AbortController,
    cache: OnceCell<Arc<RealizedRequest>>,
    builds: AtomicUsize,
}

impl<'a> RequestProxy<'a> {
    /// Validate the invocation and wrap it
    ///
    /// The invocation's own `host` is the trust anchor; `default_host` is
    /// used only when the invocation carries none.
    pub fn new(incoming: &'a IncomingInvocation, default_host: Option<&str>) -> Result<Self> {
        let host = match incoming.host.as_str() {
            "" => default_host
                .filter(|host| !host.is_empty())
                .ok_or(Error::MissingHost)?,
            host => host,
        };

        if incoming.url.is_empty() {
            return Err(Error::MissingUrl);
        }

        let url = Url::parse(&incoming.url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", incoming.url, e)))?;

        validate_host(url.host_str().unwrap_or_default(), host)?;

        Ok(Self {
            incoming,
            url,
            abort: AbortController::new(),
            cache: OnceCell::new(),
            builds: AtomicUsize::new(0),
        })
    }

    /// Method as supplied by the host, `GET` when absent
    pub fn method(&self) -> &str {
        match self.incoming.method.as_str() {
            "" => "GET",
            method => method,
        }
    }

    /// Normalized absolute URL
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn incoming(&self) -> &IncomingInvocation {
        self.incoming
    }

    /// Build the realized request once and return the cached instance
    pub fn get_realized(&self) -> Result<Arc<RealizedRequest>> {
        self.cached().cloned()
    }

    /// The proxy's abort controller
    ///
    /// Forces the build first so that aborting always reaches the request
    /// handed to the framework.
    pub fn abort_controller(&self) -> Result<&AbortController> {
        self.cached()?;
        Ok(&self.abort)
    }

    pub fn is_realized(&self) -> bool {
        self.cache.get().is_some()
    }

    /// How many realized requests were built (0 or 1)
    ///
    /// Failed attempts are not counted; the next access retries the build.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Acquire)
    }

    fn cached(&self) -> Result<&Arc<RealizedRequest>> {
        self.cache
            .get_or_try_init(|| self.build().map(Arc::new).map_err(into_request_error))
    }

    fn realized(&self) -> Result<&RealizedRequest> {
        self.cached().map(Arc::as_ref)
    }

    fn build(&self) -> Result<RealizedRequest> {
        let method = Method::from_bytes(self.method().to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::RequestBuild(format!("Invalid method '{}'", self.method())))?;

        // TRACE cannot be constructed; build as GET and report TRACE
        let trace = method == Method::TRACE;
        let method = if trace { Method::GET } else { method };

        let body = if method == Method::GET || method == Method::HEAD || !self.incoming.has_body()
        {
            None
        } else {
            match (&self.incoming.body_binary, &self.incoming.body_raw) {
                (Some(binary), _) if !binary.is_empty() => Some(binary.clone()),
                (_, Some(raw)) => Some(Bytes::from(raw.clone())),
                _ => None,
            }
        };

        let init = RequestInit {
            method,
            headers: to_header_map(&self.incoming.headers)?,
            body,
            signal: Some(self.abort.signal()),
            ..Default::default()
        };

        let request = RealizedRequest::new(self.url.as_str(), init)?;
        self.builds.fetch_add(1, Ordering::AcqRel);

        debug!(
            method = %self.method(),
            url = %self.url,
            "Realized request built"
        );

        Ok(if trace {
            request.with_method_override(Method::TRACE)
        } else {
            request
        })
    }

    pub fn headers(&self) -> Result<&HeaderMap> {
        Ok(self.realized()?.headers())
    }

    pub fn signal(&self) -> Result<&AbortSignal> {
        Ok(self.realized()?.signal())
    }

    pub fn body(&self) -> Result<Option<BodyStream>> {
        self.realized()?.body()
    }

    pub fn body_used(&self) -> Result<bool> {
        Ok(self.realized()?.body_used())
    }

    pub fn cache(&self) -> Result<RequestCache> {
        Ok(self.realized()?.cache())
    }

    pub fn credentials(&self) -> Result<RequestCredentials> {
        Ok(self.realized()?.credentials())
    }

    pub fn destination(&self) -> Result<&str> {
        Ok(self.realized()?.destination())
    }

    pub fn integrity(&self) -> Result<&str> {
        Ok(self.realized()?.integrity())
    }

    pub fn keepalive(&self) -> Result<bool> {
        Ok(self.realized()?.keepalive())
    }

    pub fn mode(&self) -> Result<RequestMode> {
        Ok(self.realized()?.mode())
    }

    pub fn redirect(&self) -> Result<RequestRedirect> {
        Ok(self.realized()?.redirect())
    }

    pub fn referrer(&self) -> Result<&str> {
        Ok(self.realized()?.referrer())
    }

    pub fn referrer_policy(&self) -> Result<&str> {
        Ok(self.realized()?.referrer_policy())
    }

    pub fn array_buffer(&self) -> Result<Bytes> {
        self.realized()?.array_buffer()
    }

    pub fn blob(&self) -> Result<Blob> {
        self.realized()?.blob()
    }

    pub fn try_clone(&self) -> Result<RealizedRequest> {
        self.realized()?.try_clone()
    }

    pub fn form_data(&self) -> Result<Vec<(String, String)>> {
        self.realized()?.form_data()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        self.realized()?.json()
    }

    pub fn text(&self) -> Result<String> {
        self.realized()?.text()
    }
}

/// Anything that goes wrong while building surfaces as a request error
fn into_request_error(err: Error) -> Error {
    if err.is_request_error() {
        err
    } else {
        Error::RequestBuild(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(method: &str) -> IncomingInvocation {
        IncomingInvocation::new(method, "https://api.example.com/users?page=2")
            .with_host("api.example.com")
    }

    #[test]
    fn test_method_and_url_do_not_build() {
        let invocation = incoming("POST");
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        assert_eq!(proxy.method(), "POST");
        assert_eq!(proxy.url(), "https://api.example.com/users?page=2");
        assert!(!proxy.is_realized());
        assert_eq!(proxy.build_count(), 0);
    }

    #[test]
    fn test_missing_method_defaults_to_get() {
        let invocation = incoming("");
        let proxy = RequestProxy::new(&invocation, None).unwrap();
        assert_eq!(proxy.method(), "GET");
        assert_eq!(proxy.get_realized().unwrap().method(), &Method::GET);
    }

    #[test]
    fn test_get_realized_is_cached() {
        let invocation = incoming("GET");
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        let first = proxy.get_realized().unwrap();
        let second = proxy.get_realized().unwrap();
        proxy.headers().unwrap();
        proxy.signal().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(proxy.build_count(), 1);
    }

    #[test]
    fn test_missing_host() {
        let invocation = IncomingInvocation::new("GET", "https://api.example.com/");
        let err = RequestProxy::new(&invocation, None).err().unwrap();
        assert!(matches!(err, Error::MissingHost));

        let err = RequestProxy::new(&invocation, Some("")).err().unwrap();
        assert_eq!(err.name(), "MissingHostError");
    }

    #[test]
    fn test_default_host_used_when_absent() {
        let invocation = IncomingInvocation::new("GET", "https://api.example.com/");
        assert!(RequestProxy::new(&invocation, Some("api.example.com:443")).is_ok());
    }

    #[test]
    fn test_missing_url() {
        let invocation = IncomingInvocation::new("GET", "").with_host("api.example.com");
        let err = RequestProxy::new(&invocation, None).err().unwrap();
        assert_eq!(err.name(), "MissingURLError");
    }

    #[test]
    fn test_invalid_url() {
        let invocation = IncomingInvocation::new("GET", "/relative").with_host("api.example.com");
        let err = RequestProxy::new(&invocation, None).err().unwrap();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_invalid_host() {
        let invocation =
            IncomingInvocation::new("GET", "https://api.example.com/x").with_host("evil.com");
        let err = RequestProxy::new(&invocation, None).err().unwrap();
        assert_eq!(err.name(), "InvalidHostError");
    }

    #[test]
    fn test_host_port_is_stripped() {
        let invocation = IncomingInvocation::new("GET", "http://localhost:3000/")
            .with_host("localhost:3000");
        assert!(RequestProxy::new(&invocation, None).is_ok());
    }

    #[test]
    fn test_get_and_head_drop_body() {
        for method in ["GET", "HEAD"] {
            let invocation = incoming(method).with_text_body("ignored");
            let proxy = RequestProxy::new(&invocation, None).unwrap();

            let request = proxy.get_realized().unwrap();
            assert!(!request.has_body());
            assert!(request.body().unwrap().is_none());
        }
    }

    #[test]
    fn test_binary_body_preferred() {
        let invocation = incoming("POST")
            .with_text_body("text")
            .with_binary_body(Bytes::from_static(b"\x00\x01binary"));
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        assert_eq!(
            proxy.array_buffer().unwrap(),
            Bytes::from_static(b"\x00\x01binary")
        );
        assert!(proxy.body_used().unwrap());
    }

    #[test]
    fn test_text_body_used_without_binary() {
        let invocation = incoming("PUT").with_text_body(r#"{"name": "widget"}"#);
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        let value: serde_json::Value = proxy.json().unwrap();
        assert_eq!(value["name"], "widget");
    }

    #[test]
    fn test_trace_reports_trace() {
        let invocation = incoming("TRACE").with_text_body("dropped");
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        let request = proxy.get_realized().unwrap();
        assert_eq!(request.method(), &Method::TRACE);
        assert!(!request.has_body());
    }

    #[test]
    fn test_headers_pass_through() {
        let invocation = incoming("GET")
            .with_header("X-Request-Id", "abc")
            .with_header("Set-Cookie", "a=1\nb=2");
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        let headers = proxy.headers().unwrap();
        assert_eq!(headers.get("x-request-id").unwrap(), "abc");
        assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_invalid_header_is_request_build_error() {
        let invocation = incoming("GET").with_header("bad header", "x");
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        let err = proxy.get_realized().unwrap_err();
        assert_eq!(err.name(), "RequestBuildError");
    }

    #[test]
    fn test_failed_builds_are_not_counted() {
        let invocation = incoming("GET").with_header("bad header", "x");
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        assert!(proxy.get_realized().is_err());
        assert!(proxy.headers().is_err());
        assert!(proxy.signal().is_err());

        assert!(!proxy.is_realized());
        assert_eq!(proxy.build_count(), 0);
    }

    #[test]
    fn test_abort_controller_forces_build() {
        let invocation = incoming("GET");
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        let controller = proxy.abort_controller().unwrap();
        assert!(proxy.is_realized());

        controller.abort("client went away");
        let request = proxy.get_realized().unwrap();
        assert!(request.signal().is_aborted());
        assert_eq!(request.signal().reason().as_deref(), Some("client went away"));
    }

    #[test]
    fn test_pass_through_defaults() {
        let invocation = incoming("GET");
        let proxy = RequestProxy::new(&invocation, None).unwrap();

        assert_eq!(proxy.mode().unwrap(), RequestMode::Cors);
        assert_eq!(proxy.redirect().unwrap(), RequestRedirect::Follow);
        assert_eq!(proxy.credentials().unwrap(), RequestCredentials::SameOrigin);
        assert_eq!(proxy.cache().unwrap(), RequestCache::Default);
        assert_eq!(proxy.destination().unwrap(), "");
        assert_eq!(proxy.integrity().unwrap(), "");
        assert_eq!(proxy.referrer().unwrap(), "about:client");
        assert_eq!(proxy.referrer_policy().unwrap(), "");
        assert!(!proxy.keepalive().unwrap());
        assert_eq!(proxy.text().unwrap(), "");
        assert!(proxy.try_clone().is_ok());
        assert_eq!(proxy.build_count(), 1);
    }
}
