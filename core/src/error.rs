//! Error types for the wiki API client.
//!
//! # Design
//! `ApiError` is the single error surfaced by `ApiClient`, `ApiRegistry` and
//! the services. Component errors (`StoreError`, `QueryLogError`,
//! `ConfigError`) live next to their components and convert through `#[from]`.
//!
//! Errors fall into a few kinds that callers branch on:
//! - usage errors: the call was malformed and will never succeed as issued;
//! - protocol errors: the server answered with something we cannot use;
//!   `AccessDenied` is the one protocol error raised for a specific server code;
//! - `Login`: the server rejected the credentials;
//! - `Transport` and `Storage`: failures of the two external collaborators.

use thiserror::Error;

use crate::config::ConfigError;
use crate::query_log::QueryLogError;
use crate::storage::StoreError;

/// Boxed error produced by a `Transport` implementation.
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by `ApiClient` and the types built on top of it.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API address must be a valid URL ({url}): {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("method \"{method}\" is not allowed. Allowed methods: {allowed}")]
    MethodNotAllowed { method: String, allowed: String },

    /// Decoding was requested for a response format other than JSON.
    #[error("only JSON can be decoded, got format \"{format}\". Specify JSON format or disable decoding")]
    DecodeRequiresJson { format: String },

    #[error("invalid action \"{action}\". Omit the action parameter or use request()")]
    InvalidQueryAction { action: String },

    #[error("{field} can not be empty ({url})")]
    EmptyCredential { field: &'static str, url: String },

    #[error("site code can not be empty")]
    EmptySiteCode,

    #[error("API with code \"{0}\" not found")]
    UnknownSite(String),

    #[error("API response is not valid JSON ({url}): {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("API response from {url} is missing \"{path}\"")]
    UnexpectedResponse { url: String, path: String },

    /// The server refused read access (`readapidenied`).
    #[error("access denied: {info} ({code})")]
    AccessDenied { code: String, info: String },

    #[error("login failed: {}", login_message(.result, .reason.as_deref()))]
    Login {
        result: String,
        reason: Option<String>,
    },

    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    QueryLog(#[from] QueryLogError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn login_message(result: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("{result} ({reason})"),
        None => result.to_string(),
    }
}

impl ApiError {
    /// The call was malformed; retrying it unchanged cannot succeed.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidUrl { .. }
                | ApiError::MethodNotAllowed { .. }
                | ApiError::DecodeRequiresJson { .. }
                | ApiError::InvalidQueryAction { .. }
                | ApiError::EmptyCredential { .. }
                | ApiError::EmptySiteCode
                | ApiError::UnknownSite(_)
                | ApiError::QueryLog(_)
        )
    }

    /// The server answered, but not with something the client can use.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidJson { .. }
                | ApiError::UnexpectedResponse { .. }
                | ApiError::AccessDenied { .. }
        )
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, ApiError::AccessDenied { .. })
    }

    /// The literal server result for a failed login.
    pub fn login_result(&self) -> Option<&str> {
        match self {
            ApiError::Login { result, .. } => Some(result),
            _ => None,
        }
    }
}
