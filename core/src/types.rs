//! Wire DTOs for the response shapes the client interprets itself.
//!
//! Everything else is handed back to the caller as `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// `{"error": {"code": ..., "info": ...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    pub code: String,
    #[serde(default)]
    pub info: String,
}

/// `{"login": {"result": ..., "token"?: ..., "reason"?: ...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginEnvelope {
    pub login: LoginReply,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginReply {
    pub result: LoginResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result strings of the `login` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    Success,
    NeedToken,
    /// Any other result (`WrongPass`, `NotExists`, `Failed`, ...), kept verbatim.
    Other(String),
}

impl LoginResult {
    pub fn as_str(&self) -> &str {
        match self {
            LoginResult::Success => "Success",
            LoginResult::NeedToken => "NeedToken",
            LoginResult::Other(result) => result,
        }
    }
}

impl From<String> for LoginResult {
    fn from(result: String) -> Self {
        match result.as_str() {
            "Success" => LoginResult::Success,
            "NeedToken" => LoginResult::NeedToken,
            _ => LoginResult::Other(result),
        }
    }
}

impl Serialize for LoginResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LoginResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(LoginResult::from)
    }
}

/// One entry of `list=allpages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRef {
    pub pageid: u64,
    pub ns: i64,
    pub title: String,
}

/// Continuation of `list=allpages`: `{"continue": "-||", "apcontinue": "Next_title"}`.
///
/// Pass it back unchanged to fetch the next batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllPagesContinue {
    #[serde(rename = "continue")]
    pub token: String,
    pub apcontinue: String,
}

/// A batch of page titles and where to resume, if there is more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageList {
    pub pages: Vec<PageRef>,
    pub next: Option<AllPagesContinue>,
}
