//! Ordered record of issued requests and their responses.
//!
//! # Design
//! A record is appended before the transport is called and the response is
//! attached afterwards, always to the most recent record. Requests on one
//! client are strictly sequential, so "most recent" is always the request that
//! produced the response. If the call fails, the record simply stays without
//! a response.
//!
//! `get_log` returns JSON objects so callers can choose which fields they want
//! and records lacking a field (no response yet) just omit the key.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::http::{Cookies, Headers, HttpMethod, Parameters, Response};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryLogError {
    #[error("cannot attach a response: the query log is empty")]
    EmptyLog,

    #[error("unknown log fields: {}", .0.join(", "))]
    UnknownFields(Vec<String>),

    #[error("at least one log field should be specified")]
    NoFields,
}

/// One logged request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub method: HttpMethod,
    pub parameters: Parameters,
    pub headers: Headers,
    pub cookies: Cookies,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
}

/// A record reduced to the requested fields.
pub type ProjectedRecord = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogField {
    Method,
    Parameters,
    Headers,
    Cookies,
    Response,
}

impl LogField {
    pub const ALL: [LogField; 5] = [
        LogField::Method,
        LogField::Parameters,
        LogField::Headers,
        LogField::Cookies,
        LogField::Response,
    ];

    pub const DEFAULT: [LogField; 3] = [LogField::Method, LogField::Parameters, LogField::Response];

    pub fn as_str(self) -> &'static str {
        match self {
            LogField::Method => "method",
            LogField::Parameters => "parameters",
            LogField::Headers => "headers",
            LogField::Cookies => "cookies",
            LogField::Response => "response",
        }
    }

    /// Parse field names, reporting every unknown name at once.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<LogField>, QueryLogError> {
        let mut fields = Vec::with_capacity(names.len());
        let mut unknown = Vec::new();
        for name in names {
            match name.as_ref().parse() {
                Ok(field) => fields.push(field),
                Err(_) => unknown.push(name.as_ref().to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(QueryLogError::UnknownFields(unknown));
        }
        Ok(fields)
    }
}

impl fmt::Display for LogField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogField {
    type Err = QueryLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| QueryLogError::UnknownFields(vec![s.to_string()]))
    }
}

fn string_map(map: &std::collections::BTreeMap<String, String>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())
}

impl LogRecord {
    fn field(&self, field: LogField) -> Option<Value> {
        match field {
            LogField::Method => Some(Value::String(self.method.as_str().to_string())),
            LogField::Parameters => Some(string_map(&self.parameters)),
            LogField::Headers => Some(string_map(&self.headers)),
            LogField::Cookies => Some(string_map(&self.cookies)),
            LogField::Response => self.response.as_ref().map(|response| match response {
                Response::Decoded(value) => value.clone(),
                Response::Raw(body) => Value::String(body.clone()),
            }),
        }
    }

    pub fn project(&self, fields: &[LogField]) -> ProjectedRecord {
        fields
            .iter()
            .filter_map(|&field| self.field(field).map(|value| (field.as_str().to_string(), value)))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryLog {
    records: Vec<LogRecord>,
}

impl QueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_query(
        &mut self,
        method: HttpMethod,
        parameters: Parameters,
        headers: Headers,
        cookies: Cookies,
    ) {
        self.records.push(LogRecord {
            method,
            parameters,
            headers,
            cookies,
            response: None,
        });
    }

    /// Attach `response` to the most recently logged query.
    pub fn append_response(&mut self, response: Response) -> Result<(), QueryLogError> {
        let last = self.records.last_mut().ok_or(QueryLogError::EmptyLog)?;
        last.response = Some(response);
        Ok(())
    }

    /// Project the log onto `fields` (default: method, parameters, response),
    /// keeping only the last `count` records when given.
    pub fn get_log(
        &self,
        fields: Option<&[LogField]>,
        count: Option<usize>,
    ) -> Result<Vec<ProjectedRecord>, QueryLogError> {
        let fields = fields.unwrap_or(&LogField::DEFAULT);
        if fields.is_empty() {
            return Err(QueryLogError::NoFields);
        }
        Ok(self.tail(count).iter().map(|record| record.project(fields)).collect())
    }

    /// Like `get_log`, with field names given as strings.
    pub fn get_log_by_names<S: AsRef<str>>(
        &self,
        fields: Option<&[S]>,
        count: Option<usize>,
    ) -> Result<Vec<ProjectedRecord>, QueryLogError> {
        match fields {
            Some(names) => self.get_log(Some(&LogField::parse_list(names)?), count),
            None => self.get_log(None, count),
        }
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Drain the log, returning everything it held.
    pub fn clear_log(&mut self) -> Vec<LogRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn tail(&self, count: Option<usize>) -> &[LogRecord] {
        match count {
            Some(count) => &self.records[self.records.len().saturating_sub(count)..],
            None => &self.records,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn sample_log() -> QueryLog {
        let mut log = QueryLog::new();
        log.log_query(HttpMethod::Get, params(&[("foo", "bar")]), Headers::new(), Cookies::new());
        log.append_response(Response::Raw("FooBarBaz".to_string())).unwrap();
        log.log_query(
            HttpMethod::Post,
            params(&[("foo", "bar")]),
            params(&[("baz", "qux")]),
            Cookies::new(),
        );
        log
    }

    #[test]
    fn default_projection_keeps_order_and_omits_missing_response() {
        let log = sample_log();
        let records = log.get_log(None, None).unwrap();
        assert_eq!(
            Value::Array(records.into_iter().map(Value::Object).collect()),
            json!([
                {"method": "GET", "parameters": {"foo": "bar"}, "response": "FooBarBaz"},
                {"method": "POST", "parameters": {"foo": "bar"}},
            ])
        );
    }

    #[test]
    fn all_fields_projection() {
        let log = sample_log();
        let records = log.get_log(Some(&LogField::ALL), None).unwrap();
        assert_eq!(
            Value::Object(records[1].clone()),
            json!({"method": "POST", "parameters": {"foo": "bar"}, "headers": {"baz": "qux"}, "cookies": {}})
        );
        assert_eq!(records[0]["headers"], json!({}));
    }

    #[test]
    fn count_returns_trailing_records() {
        let log = sample_log();
        let records = log.get_log(None, Some(1)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["method"], "POST");

        let records = log.get_log(Some(&[LogField::Method, LogField::Parameters]), Some(1)).unwrap();
        assert_eq!(Value::Object(records[0].clone()), json!({"method": "POST", "parameters": {"foo": "bar"}}));

        assert_eq!(log.get_log(None, Some(10)).unwrap().len(), 2);
        assert!(log.get_log(None, Some(0)).unwrap().is_empty());
    }

    #[test]
    fn unknown_and_empty_fields_are_errors() {
        let log = sample_log();
        let names: &[&str] = &["method", "body", "status"];
        assert_eq!(
            log.get_log_by_names(Some(names), None).unwrap_err(),
            QueryLogError::UnknownFields(vec!["body".to_string(), "status".to_string()])
        );
        assert_eq!(log.get_log(Some(&[]), None).unwrap_err(), QueryLogError::NoFields);
        let names: &[&str] = &[];
        assert_eq!(log.get_log_by_names(Some(names), None).unwrap_err(), QueryLogError::NoFields);
    }

    #[test]
    fn decoded_response_is_projected_as_json() {
        let mut log = QueryLog::new();
        log.log_query(HttpMethod::Post, Parameters::new(), Headers::new(), Cookies::new());
        log.append_response(Response::Decoded(json!({"query": {}}))).unwrap();
        assert_eq!(log.get_log(None, None).unwrap()[0]["response"], json!({"query": {}}));
    }

    #[test]
    fn append_response_on_empty_log_fails() {
        let mut log = QueryLog::new();
        assert_eq!(
            log.append_response(Response::Raw(String::new())).unwrap_err(),
            QueryLogError::EmptyLog
        );
    }

    #[test]
    fn response_only_attaches_to_latest_record() {
        let mut log = sample_log();
        log.append_response(Response::Raw("second".to_string())).unwrap();
        let records = log.records();
        assert_eq!(records[0].response, Some(Response::Raw("FooBarBaz".to_string())));
        assert_eq!(records[1].response, Some(Response::Raw("second".to_string())));
    }

    #[test]
    fn clear_log_drains() {
        let mut log = sample_log();
        let drained = log.clear_log();
        assert_eq!(drained.len(), 2);
        assert!(log.is_empty());
        assert!(log.get_log(None, None).unwrap().is_empty());
    }
}
