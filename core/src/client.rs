//! Stateful client for a single wiki API endpoint.
//!
//! # Design
//! `ApiClient` owns the per-site session: the cookie set, the default
//! parameters merged into every request and the optional query log. The HTTP
//! round-trip and persistence are delegated to the shared `Transport` and
//! `KeyValueStore` handed in at construction.
//!
//! Every request goes through the same pipeline: merge defaults, check that a
//! decoded response was asked for in JSON, log, call the transport, decode and
//! classify errors, attach the response to the log.
//!
//! Login is the token handshake of the `login` action: the first reply may be
//! `NeedToken`, in which case the request is repeated once with `lgtoken`.
//! After `Success` the transport's cookie jar becomes the client's cookie set
//! and is stored without expiry under `"{url}.cookies"`, so a later process can
//! pick the session up again.
//!
//! Mutating methods take `&mut self`; a client is meant to be driven by one
//! caller at a time.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ApiError;
use crate::http::{Cookies, HttpMethod, Parameters, RequestOptions, Response, Transport};
use crate::query_log::{LogField, LogRecord, ProjectedRecord, QueryLog};
use crate::storage::KeyValueStore;
use crate::types::{ErrorEnvelope, LoginEnvelope, LoginResult};

const ACCESS_DENIED_CODE: &str = "readapidenied";

pub struct ApiClient {
    url: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn KeyValueStore>,
    cookies: Cookies,
    default_parameters: Parameters,
    log_queries: bool,
    query_log: QueryLog,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("url", &self.url)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("default_parameters", &self.default_parameters)
            .field("log_queries", &self.log_queries)
            .finish_non_exhaustive()
    }
}

/// Default parameters of a fresh client: `format=json`.
pub fn default_parameters() -> Parameters {
    Parameters::from([("format".to_string(), "json".to_string())])
}

/// Key under which a site's cookies are persisted.
pub fn cookie_key(url: &str) -> String {
    format!("{url}.cookies")
}

fn validate_url(url: &str) -> Result<(), ApiError> {
    let parsed = Url::parse(url).map_err(|source| ApiError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    if !parsed.has_host() {
        return Err(ApiError::InvalidUrl {
            url: url.to_string(),
            source: url::ParseError::EmptyHost,
        });
    }
    Ok(())
}

fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

impl ApiClient {
    /// Create a client for `url`, restoring cookies persisted by an earlier
    /// login.
    pub fn new(
        url: &str,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ApiError> {
        validate_url(url)?;
        let cookies = store.get_as::<Cookies>(&cookie_key(url))?.unwrap_or_default();
        Ok(Self {
            url: url.to_string(),
            transport,
            store,
            cookies,
            default_parameters: default_parameters(),
            log_queries: false,
            query_log: QueryLog::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    pub fn default_parameters(&self) -> &Parameters {
        &self.default_parameters
    }

    /// Replace the default parameters wholesale.
    pub fn set_default_parameters(&mut self, parameters: Parameters) -> &mut Self {
        self.default_parameters = parameters;
        self
    }

    pub fn allowed_methods(&self) -> &'static [HttpMethod] {
        &HttpMethod::ALLOWED
    }

    pub fn is_method_allowed(&self, method: &str) -> bool {
        method.parse::<HttpMethod>().is_ok()
    }

    pub fn enable_query_log(&mut self) {
        self.log_queries = true;
    }

    pub fn disable_query_log(&mut self) {
        self.log_queries = false;
    }

    pub fn is_query_log_enabled(&self) -> bool {
        self.log_queries
    }

    pub fn query_log(
        &self,
        fields: Option<&[LogField]>,
        count: Option<usize>,
    ) -> Result<Vec<ProjectedRecord>, ApiError> {
        Ok(self.query_log.get_log(fields, count)?)
    }

    pub fn clear_query_log(&mut self) -> Vec<LogRecord> {
        self.query_log.clear_log()
    }

    /// Issue a request and return the raw or decoded body.
    ///
    /// # Errors
    /// - `DecodeRequiresJson` if decoding is requested and the merged `format`
    ///   parameter is not `json`; the transport is not called.
    /// - `Transport` for anything the transport reports, unchanged.
    /// - `InvalidJson` if the body cannot be decoded.
    /// - `AccessDenied` for an `error` envelope with code `readapidenied`.
    ///   Other error codes are returned as data.
    pub fn request(&mut self, options: RequestOptions) -> Result<Response, ApiError> {
        let RequestOptions { method, parameters, headers, decode } = options;

        let mut merged = self.default_parameters.clone();
        merged.extend(parameters);

        if decode {
            let format = merged.get("format").map(String::as_str).unwrap_or_default();
            if !format.eq_ignore_ascii_case("json") {
                return Err(ApiError::DecodeRequiresJson { format: format.to_string() });
            }
        }

        if self.log_queries {
            self.query_log
                .log_query(method, merged.clone(), headers.clone(), self.cookies.clone());
        }

        debug!(
            %method,
            url = %self.url,
            action = merged.get("action").map(String::as_str).unwrap_or_default(),
            "sending API request"
        );
        let body = self
            .transport
            .request(method, &self.url, &merged, &headers, &self.cookies)
            .map_err(ApiError::Transport)?;

        let response = if decode {
            Response::Decoded(self.decode_response(&body)?)
        } else {
            Response::Raw(body)
        };

        if self.log_queries {
            self.query_log.append_response(response.clone())?;
        }

        Ok(response)
    }

    fn decode_response(&self, body: &str) -> Result<Value, ApiError> {
        let value: Value = serde_json::from_str(body).map_err(|source| ApiError::InvalidJson {
            url: self.url.clone(),
            source,
        })?;

        if let Ok(ErrorEnvelope { error }) = ErrorEnvelope::deserialize(&value) {
            if error.code == ACCESS_DENIED_CODE {
                warn!(url = %self.url, info = %error.info, "API read access denied");
                return Err(ApiError::AccessDenied { code: error.code, info: error.info });
            }
        }

        Ok(value)
    }

    fn request_json(&mut self, options: RequestOptions) -> Result<Value, ApiError> {
        match self.request(RequestOptions { decode: true, ..options })? {
            Response::Decoded(value) => Ok(value),
            Response::Raw(_) => Err(ApiError::UnexpectedResponse {
                url: self.url.clone(),
                path: "<json>".to_string(),
            }),
        }
    }

    /// Run an `action=query` request, always as `POST`.
    ///
    /// An explicit `action` other than `query` is rejected; use `request` for
    /// other actions.
    pub fn query(&mut self, parameters: Parameters, decode: bool) -> Result<Response, ApiError> {
        let mut parameters = parameters;
        match parameters.get("action") {
            Some(action) if !action.eq_ignore_ascii_case("query") => {
                return Err(ApiError::InvalidQueryAction { action: action.clone() });
            }
            Some(_) => {}
            None => {
                parameters.insert("action".to_string(), "query".to_string());
            }
        }
        let mut options = RequestOptions::post().params(parameters);
        options.decode = decode;
        self.request(options)
    }

    /// `query` with decoding, returning the JSON body.
    pub fn query_json<I, K, V>(&mut self, parameters: I) -> Result<Value, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let parameters = parameters.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        match self.query(parameters, true)? {
            Response::Decoded(value) => Ok(value),
            Response::Raw(_) => Err(ApiError::UnexpectedResponse {
                url: self.url.clone(),
                path: "<json>".to_string(),
            }),
        }
    }

    /// Log in with the token handshake.
    ///
    /// # Errors
    /// - `EmptyCredential` for an empty username or password (no request is sent).
    /// - `Login` with the server's literal result for anything but `Success`
    ///   after at most one token round-trip. Retrying is up to the caller.
    /// - `UnexpectedResponse` if the reply has no `login.result`.
    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        domain: Option<&str>,
    ) -> Result<(), ApiError> {
        if username.is_empty() {
            return Err(ApiError::EmptyCredential { field: "username", url: self.url.clone() });
        }
        if password.is_empty() {
            return Err(ApiError::EmptyCredential { field: "password", url: self.url.clone() });
        }

        let mut parameters = Parameters::from([
            ("action".to_string(), "login".to_string()),
            ("lgname".to_string(), username.to_string()),
            ("lgpassword".to_string(), password.to_string()),
        ]);
        if let Some(domain) = domain {
            parameters.insert("lgdomain".to_string(), domain.to_string());
        }

        let mut reply = self.login_request(parameters.clone())?;
        if reply.login.result == LoginResult::NeedToken {
            let token = reply.login.token.ok_or_else(|| ApiError::UnexpectedResponse {
                url: self.url.clone(),
                path: "login.token".to_string(),
            })?;
            parameters.insert("lgtoken".to_string(), token);
            reply = self.login_request(parameters)?;
        }

        match reply.login.result {
            LoginResult::Success => {
                let cookies = self.transport.cookies();
                self.store.forever_as(&cookie_key(&self.url), &cookies)?;
                self.cookies = cookies;
                info!(url = %self.url, user = username, "logged in");
                Ok(())
            }
            result => Err(ApiError::Login {
                result: result.as_str().to_string(),
                reason: reply.login.reason,
            }),
        }
    }

    fn login_request(&mut self, parameters: Parameters) -> Result<LoginEnvelope, ApiError> {
        let value = self.request_json(RequestOptions::post().params(parameters))?;
        LoginEnvelope::deserialize(&value).map_err(|_| ApiError::UnexpectedResponse {
            url: self.url.clone(),
            path: "login.result".to_string(),
        })
    }

    /// True when a cookie set is held. This does not verify the session with
    /// the server.
    pub fn is_logged_in(&self) -> bool {
        !self.cookies.is_empty()
    }

    /// Drop the local and persisted session, then tell the server.
    ///
    /// Returns `Ok(true)` only if the server replied with an empty object.
    /// Any other reply, `[]` included, yields `Ok(false)`; the local session
    /// is gone either way.
    pub fn logout(&mut self) -> Result<bool, ApiError> {
        self.cookies.clear();
        self.store.forget(&cookie_key(&self.url))?;

        let value = self.request_json(RequestOptions::post().param("action", "logout"))?;
        let success = is_empty_object(&value);
        if success {
            info!(url = %self.url, "logged out");
        } else {
            warn!(url = %self.url, response = %value, "logout returned a non-empty response");
        }
        Ok(success)
    }
}
