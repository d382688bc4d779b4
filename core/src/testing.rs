//! In-process `Transport` double shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::TransportError;
use crate::http::{Cookies, Headers, HttpMethod, Parameters, Transport};

/// One call received by `ScriptedTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: HttpMethod,
    pub url: String,
    pub parameters: Parameters,
    pub headers: Headers,
    pub cookies: Cookies,
}

/// Replays queued bodies in order and records every call.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Call>>,
    jar: Mutex<Cookies>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, body: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(Ok(body.into()));
        self
    }

    pub fn reply_json(self, body: serde_json::Value) -> Self {
        self.reply(body.to_string())
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(Err(message.into()));
        self
    }

    pub fn with_cookie(self, name: &str, value: &str) -> Self {
        self.jar.lock().unwrap().insert(name.to_string(), value.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        parameters: &Parameters,
        headers: &Headers,
        cookies: &Cookies,
    ) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            parameters: parameters.clone(),
            headers: headers.clone(),
            cookies: cookies.clone(),
        });
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(body)) => Ok(body),
            Some(Err(message)) => Err(message.into()),
            None => Err("no scripted reply left".into()),
        }
    }

    fn cookies(&self) -> Cookies {
        self.jar.lock().unwrap().clone()
    }
}

pub fn params(pairs: &[(&str, &str)]) -> Parameters {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
