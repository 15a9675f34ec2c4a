//! Header folding and outgoing header records
//!
//! Hosts deliver request headers as a flat string map. Multi-valued headers
//! are folded into one value per name: ordinary headers are joined with
//! `", "`, `cookie` with `"; "`, and `set-cookie` with a newline so the
//! individual cookies can be recovered when building a `HeaderMap`.

use crate::error::{Error, Result};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Content type used when a response does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

const SET_COOKIE_SEPARATOR: &str = "\n";

/// Fold an ordered header multimap into single string values
pub fn fold_headers<I, K, V>(pairs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut folded: HashMap<String, String> = HashMap::new();

    for (name, value) in pairs {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.as_ref();

        match folded.get_mut(&name) {
            Some(existing) => {
                let separator = match name.as_str() {
                    "set-cookie" => SET_COOKIE_SEPARATOR,
                    "cookie" => "; ",
                    _ => ", ",
                };
                existing.push_str(separator);
                existing.push_str(value);
            }
            None => {
                folded.insert(name, value.to_string());
            }
        }
    }

    folded
}

/// Build an `http::HeaderMap` from folded headers
pub fn to_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidHeader(name.clone()))?;

        if header_name == SET_COOKIE {
            for cookie in value.split(SET_COOKIE_SEPARATOR) {
                map.append(header_name.clone(), parse_value(name, cookie)?);
            }
        } else {
            map.append(header_name, parse_value(name, value)?);
        }
    }

    Ok(map)
}

fn parse_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(format!("{}: {:?}", name, value)))
}

/// A single outgoing header value; `set-cookie` is the only multi-valued entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutgoingHeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl OutgoingHeaderValue {
    /// First value, for headers inspected as a single string
    pub fn first(&self) -> Option<&str> {
        match self {
            OutgoingHeaderValue::Single(value) => Some(value.as_str()),
            OutgoingHeaderValue::Multiple(values) => values.first().map(String::as_str),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            OutgoingHeaderValue::Single(value) => vec![value.as_str()],
            OutgoingHeaderValue::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Header record written to the response sink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutgoingHeaders(BTreeMap<String, OutgoingHeaderValue>);

impl OutgoingHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single-valued header, replacing any existing value
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(
            name.as_ref().to_ascii_lowercase(),
            OutgoingHeaderValue::Single(value.into()),
        );
    }

    /// Append a value, turning the entry into a list when needed
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();

        match self.0.remove(&name) {
            None => {
                self.0.insert(name, OutgoingHeaderValue::Multiple(vec![value]));
            }
            Some(OutgoingHeaderValue::Single(existing)) => {
                self.0
                    .insert(name, OutgoingHeaderValue::Multiple(vec![existing, value]));
            }
            Some(OutgoingHeaderValue::Multiple(mut values)) => {
                values.push(value);
                self.0.insert(name, OutgoingHeaderValue::Multiple(values));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(OutgoingHeaderValue::first)
    }

    pub fn get_all(&self, name: &str) -> Option<&OutgoingHeaderValue> {
        self.0.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<OutgoingHeaderValue> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn set_content_length(&mut self, length: usize) {
        self.insert(CONTENT_LENGTH.as_str(), length.to_string());
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutgoingHeaderValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert back into a `HeaderMap`, skipping entries that are not valid HTTP
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.0.len());

        for (name, value) in &self.0 {
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!("Skipping invalid outgoing header name: {}", name);
                continue;
            };

            for v in value.values() {
                match HeaderValue::from_str(v) {
                    Ok(hv) => {
                        map.append(header_name.clone(), hv);
                    }
                    Err(_) => tracing::warn!("Skipping invalid value for header {}", name),
                }
            }
        }

        map
    }
}

impl<K, V> FromIterator<(K, V)> for OutgoingHeaders
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = OutgoingHeaders::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Fold response headers into the record written to the sink
///
/// Every `set-cookie` value is kept; other repeated headers keep their last
/// value. `content-type` falls back to [`DEFAULT_CONTENT_TYPE`].
pub fn build_outgoing_headers(headers: &HeaderMap) -> OutgoingHeaders {
    let mut outgoing = OutgoingHeaders::new();
    let mut cookies = Vec::new();

    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        if name == SET_COOKIE {
            cookies.push(value);
        } else {
            outgoing.insert(name.as_str(), value);
        }
    }

    if !cookies.is_empty() {
        outgoing
            .0
            .insert(SET_COOKIE.as_str().to_string(), OutgoingHeaderValue::Multiple(cookies));
    }

    if !outgoing.contains(CONTENT_TYPE.as_str()) {
        outgoing.insert(CONTENT_TYPE.as_str(), DEFAULT_CONTENT_TYPE);
    }

    outgoing
}

/// Remove a trailing `:<port>` from a host value
pub fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port))
            if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name
        }
        _ => host,
    }
}

/// Check that the URL hostname matches the trusted host value
pub fn validate_host(url_hostname: &str, host: &str) -> Result<()> {
    if url_hostname.eq_ignore_ascii_case(strip_port(host)) {
        Ok(())
    } else {
        Err(Error::InvalidHost {
            host: host.to_string(),
            hostname: url_hostname.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_headers_joins_repeated_values() {
        let folded = fold_headers([
            ("Accept", "text/html"),
            ("accept", "application/json"),
            ("X-Trace", "abc"),
        ]);

        assert_eq!(folded["accept"], "text/html, application/json");
        assert_eq!(folded["x-trace"], "abc");
    }

    #[test]
    fn test_fold_headers_cookie_separators() {
        let folded = fold_headers([
            ("cookie", "a=1"),
            ("Cookie", "b=2"),
            ("set-cookie", "session=xyz; Path=/"),
            ("Set-Cookie", "theme=dark"),
        ]);

        assert_eq!(folded["cookie"], "a=1; b=2");
        assert_eq!(folded["set-cookie"], "session=xyz; Path=/\ntheme=dark");
    }

    #[test]
    fn test_to_header_map_splits_set_cookie() {
        let folded = fold_headers([("set-cookie", "a=1"), ("set-cookie", "b=2"), ("x-one", "1")]);
        let map = to_header_map(&folded).unwrap();

        let cookies: Vec<_> = map.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
        assert_eq!(map.get("x-one").unwrap(), "1");
    }

    #[test]
    fn test_to_header_map_rejects_invalid_name() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());

        let err = to_header_map(&headers).unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn test_build_outgoing_headers_collects_cookies() {
        let mut map = HeaderMap::new();
        map.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        map.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        map.insert("x-powered-by", HeaderValue::from_static("runbridge"));

        let outgoing = build_outgoing_headers(&map);

        assert_eq!(
            outgoing.get_all("set-cookie"),
            Some(&OutgoingHeaderValue::Multiple(vec![
                "a=1".to_string(),
                "b=2".to_string()
            ]))
        );
        assert_eq!(outgoing.get("x-powered-by"), Some("runbridge"));
    }

    #[test]
    fn test_build_outgoing_headers_default_content_type() {
        let outgoing = build_outgoing_headers(&HeaderMap::new());
        assert_eq!(outgoing.content_type(), Some(DEFAULT_CONTENT_TYPE));

        let mut map = HeaderMap::new();
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let outgoing = build_outgoing_headers(&map);
        assert_eq!(outgoing.content_type(), Some("application/json"));
    }

    #[test]
    fn test_outgoing_headers_append_and_serialize() {
        let mut headers = OutgoingHeaders::new();
        headers.insert("Content-Type", "text/html");
        headers.append("set-cookie", "a=1");
        headers.append("set-cookie", "b=2");
        headers.set_content_length(12);

        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(json["content-type"], "text/html");
        assert_eq!(json["content-length"], "12");
        assert_eq!(json["set-cookie"], serde_json::json!(["a=1", "b=2"]));
    }

    #[test]
    fn test_outgoing_headers_to_header_map() {
        let mut headers = OutgoingHeaders::new();
        headers.insert("content-type", "text/plain");
        headers.append("set-cookie", "a=1");
        headers.append("set-cookie", "b=2");

        let map = headers.to_header_map();
        assert_eq!(map.get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(map.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("api.example.com:8080"), "api.example.com");
        assert_eq!(strip_port("api.example.com"), "api.example.com");
        assert_eq!(strip_port("localhost:"), "localhost:");
        assert_eq!(strip_port("[::1]:3000"), "[::1]");
    }

    #[test]
    fn test_validate_host() {
        assert!(validate_host("api.example.com", "api.example.com").is_ok());
        assert!(validate_host("api.example.com", "api.example.com:443").is_ok());
        assert!(validate_host("api.example.com", "API.Example.com").is_ok());

        let err = validate_host("api.example.com", "evil.com").unwrap_err();
        assert!(matches!(err, Error::InvalidHost { .. }));

        // Same length, different host
        assert!(validate_host("aaa.com", "bbb.com").is_err());
    }
}
