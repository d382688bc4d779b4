//! Transport seam and request/response types.
//!
//! # Design
//! The core never opens sockets. Everything HTTP-shaped goes through the
//! `Transport` trait, which receives the fully merged parameter set plus the
//! client's cookies and hands back the raw response body. Concrete transports
//! (ureq, curl bindings, test doubles) live with the caller.
//!
//! Parameters, headers and cookies are `BTreeMap`s so that merged parameter
//! sets, log records and test expectations have a stable order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, TransportError};

pub type Parameters = BTreeMap<String, String>;
pub type Headers = BTreeMap<String, String>;
pub type Cookies = BTreeMap<String, String>;

/// HTTP method for a request. Only the two methods the wiki API accepts exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub const ALLOWED: [HttpMethod; 2] = [HttpMethod::Get, HttpMethod::Post];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }

    fn allowed_list() -> String {
        Self::ALLOWED.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            _ => Err(ApiError::MethodNotAllowed {
                method: s.to_string(),
                allowed: Self::allowed_list(),
            }),
        }
    }
}

/// Executes HTTP round-trips on behalf of `ApiClient`.
///
/// Implementations own the cookie jar: every `Set-Cookie` received is
/// recorded and reported by `cookies()`, which the client reads after a
/// successful login.
pub trait Transport: Send + Sync {
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        parameters: &Parameters,
        headers: &Headers,
        cookies: &Cookies,
    ) -> Result<String, TransportError>;

    fn cookies(&self) -> Cookies;
}

/// Parse a raw `a=1&b=2` query string into a parameter map.
///
/// A leading `?` is ignored. Repeated keys keep the last value.
pub fn parse_query_string(query: &str) -> Parameters {
    let query = query.strip_prefix('?').unwrap_or(query);
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// A single API request described as plain data.
///
/// Built with `RequestOptions::get` / `RequestOptions::post` (or
/// `RequestOptions::with_method` for a method name chosen at runtime), then
/// passed to `ApiClient::request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub parameters: Parameters,
    pub headers: Headers,
    pub decode: bool,
}

impl RequestOptions {
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            parameters: Parameters::new(),
            headers: Headers::new(),
            decode: true,
        }
    }

    pub fn get() -> Self {
        Self::new(HttpMethod::Get)
    }

    pub fn post() -> Self {
        Self::new(HttpMethod::Post)
    }

    /// Validate a method name and start a request with it.
    pub fn with_method(method: &str) -> Result<Self, ApiError> {
        Ok(Self::new(method.parse()?))
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn params<I, K, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters
            .extend(parameters.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add parameters from a raw query string such as `action=query&meta=siteinfo`.
    pub fn query_string(self, query: &str) -> Self {
        self.params(parse_query_string(query))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Return the body as received instead of decoding it as JSON.
    pub fn raw(mut self) -> Self {
        self.decode = false;
        self
    }
}

/// Body returned by `ApiClient::request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Decoded(serde_json::Value),
    Raw(String),
}

impl Response {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Response::Decoded(value) => Some(value),
            Response::Raw(_) => None,
        }
    }

    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Response::Decoded(value) => Some(value),
            Response::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Response::Raw(body) => Some(body),
            Response::Decoded(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("Post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
    }

    #[test]
    fn method_parse_rejects_unknown() {
        let err = "DELETE".parse::<HttpMethod>().unwrap_err();
        match err {
            ApiError::MethodNotAllowed { method, allowed } => {
                assert_eq!(method, "DELETE");
                assert_eq!(allowed, "GET, POST");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn query_string_is_decoded() {
        let params = parse_query_string("?action=query&titles=Main%20Page&list=a+b");
        assert_eq!(params["action"], "query");
        assert_eq!(params["titles"], "Main Page");
        assert_eq!(params["list"], "a b");
    }

    #[test]
    fn options_builder_collects_fields() {
        let options = RequestOptions::post()
            .param("action", "query")
            .query_string("meta=siteinfo")
            .header("User-Agent", "wiki-core")
            .raw();
        assert_eq!(options.method, HttpMethod::Post);
        assert_eq!(options.parameters.len(), 2);
        assert_eq!(options.headers["User-Agent"], "wiki-core");
        assert!(!options.decode);
    }

    #[test]
    fn with_method_validates() {
        assert!(RequestOptions::with_method("get").is_ok());
        assert!(RequestOptions::with_method("PATCH").unwrap_err().is_usage());
    }

    #[test]
    fn response_serializes_untagged() {
        let decoded = Response::Decoded(serde_json::json!({"foo": "bar"}));
        assert_eq!(serde_json::to_value(&decoded).unwrap(), serde_json::json!({"foo": "bar"}));
        let raw = Response::Raw("<api/>".to_string());
        assert_eq!(serde_json::to_value(&raw).unwrap(), serde_json::json!("<api/>"));
    }
}
