//! Helpers built on `query` and `request`: site metadata and pages.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::http::{Parameters, RequestOptions};
use crate::registry::ApiRegistry;
use crate::types::{AllPagesContinue, PageList, PageRef};

const BAD_TOKEN_CODE: &str = "badtoken";

fn unexpected(client: &ApiClient, path: &str) -> ApiError {
    ApiError::UnexpectedResponse { url: client.url().to_string(), path: path.to_string() }
}

/// Site metadata from `meta=siteinfo`.
pub struct SiteInfo<'a> {
    registry: &'a mut ApiRegistry,
}

impl<'a> SiteInfo<'a> {
    pub fn new(registry: &'a mut ApiRegistry) -> Self {
        Self { registry }
    }

    /// Software version of the site, e.g. `1.23.0` for `MediaWiki 1.23.0`.
    pub fn version(&mut self, code: &str) -> Result<String, ApiError> {
        let client = self.registry.get_mut(code)?;
        let response = client.query_json([("meta", "siteinfo"), ("continue", "")])?;
        response
            .pointer("/query/general/generator")
            .and_then(Value::as_str)
            .and_then(|generator| generator.split_whitespace().nth(1))
            .map(str::to_string)
            .ok_or_else(|| unexpected(client, "query.general.generator"))
    }

    /// Namespace list in `formatversion=2` shape.
    pub fn namespaces(&mut self, code: &str) -> Result<Value, ApiError> {
        let client = self.registry.get_mut(code)?;
        let mut response = client.query_json([
            ("meta", "siteinfo"),
            ("siprop", "namespaces"),
            ("formatversion", "2"),
        ])?;
        response
            .pointer_mut("/query/namespaces")
            .map(Value::take)
            .ok_or_else(|| unexpected(client, "query.namespaces"))
    }
}

/// Page listing and editing.
///
/// The CSRF token of each site is fetched on first use and reused for the
/// lifetime of this value. A `badtoken` reply drops it so the next save
/// fetches a fresh one.
pub struct Pages<'a> {
    registry: &'a mut ApiRegistry,
    tokens: BTreeMap<String, String>,
}

impl<'a> Pages<'a> {
    pub fn new(registry: &'a mut ApiRegistry) -> Self {
        Self { registry, tokens: BTreeMap::new() }
    }

    /// One batch of `list=allpages`.
    ///
    /// `from` is the continuation returned by the previous batch. `extra` is
    /// merged last, so it can set `aplimit`, `apnamespace` and the like.
    pub fn list(
        &mut self,
        code: &str,
        from: Option<&AllPagesContinue>,
        extra: Parameters,
    ) -> Result<PageList, ApiError> {
        let mut parameters = Parameters::from([("list".to_string(), "allpages".to_string())]);
        if let Some(from) = from {
            parameters.insert("continue".to_string(), from.token.clone());
            parameters.insert("apcontinue".to_string(), from.apcontinue.clone());
        }
        parameters.extend(extra);

        let client = self.registry.get_mut(code)?;
        let response = client.query_json(parameters)?;
        let pages = response
            .pointer("/query/allpages")
            .and_then(|pages| Vec::<PageRef>::deserialize(pages).ok())
            .ok_or_else(|| unexpected(client, "query.allpages"))?;
        let next = response
            .get("continue")
            .and_then(|next| AllPagesContinue::deserialize(next).ok());
        Ok(PageList { pages, next })
    }

    /// Replace the text of an existing page as a bot edit.
    ///
    /// Never creates pages (`nocreate`). The decoded reply is returned as is,
    /// including error envelopes such as `missingtitle`.
    pub fn save(&mut self, code: &str, title: &str, content: &str) -> Result<Value, ApiError> {
        let token = self.csrf_token(code)?;
        let client = self.registry.get_mut(code)?;
        let options = RequestOptions::post().params([
            ("action", "edit"),
            ("title", title),
            ("text", content),
            ("bot", "1"),
            ("nocreate", "1"),
            ("token", token.as_str()),
        ]);
        let reply = client
            .request(options)?
            .into_json()
            .ok_or_else(|| unexpected(client, "<json>"))?;

        if reply.pointer("/error/code").and_then(Value::as_str) == Some(BAD_TOKEN_CODE) {
            debug!(code, "CSRF token rejected, dropping cached token");
            self.tokens.remove(code);
        }
        Ok(reply)
    }

    /// The site's CSRF token, fetched once per site.
    pub fn csrf_token(&mut self, code: &str) -> Result<String, ApiError> {
        if let Some(token) = self.tokens.get(code) {
            return Ok(token.clone());
        }
        let client = self.registry.get_mut(code)?;
        let response = client.query_json([("meta", "tokens"), ("type", "csrf")])?;
        let token = response
            .pointer("/query/tokens/csrftoken")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| unexpected(client, "query.tokens.csrftoken"))?;
        self.tokens.insert(code.to_string(), token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::http::HttpMethod;
    use crate::storage::MemoryStore;
    use crate::testing::{params, ScriptedTransport};

    fn registry(transport: ScriptedTransport) -> (ApiRegistry, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let client = ApiClient::new(
            "https://en.wikipedia.org/w/api.php",
            transport.clone(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        let mut registry = ApiRegistry::new();
        registry.add("en", client).unwrap();
        (registry, transport)
    }

    #[test]
    fn version_takes_second_generator_token() {
        let (mut registry, transport) = registry(
            ScriptedTransport::new()
                .reply_json(json!({"query": {"general": {"generator": "MediaWiki 1.23.0-wmf.4"}}})),
        );
        assert_eq!(SiteInfo::new(&mut registry).version("en").unwrap(), "1.23.0-wmf.4");
        let call = &transport.calls()[0];
        assert_eq!(call.parameters["meta"], "siteinfo");
        assert_eq!(call.parameters["action"], "query");
    }

    #[test]
    fn version_reports_missing_generator() {
        let (mut registry, _transport) = registry(ScriptedTransport::new().reply_json(json!({"query": {}})));
        let err = SiteInfo::new(&mut registry).version("en").unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedResponse { ref path, .. } if path == "query.general.generator"));
    }

    #[test]
    fn namespaces_returns_list() {
        let namespaces = json!({"0": {"id": 0, "name": ""}, "1": {"id": 1, "name": "Talk"}});
        let (mut registry, transport) = registry(
            ScriptedTransport::new().reply_json(json!({"query": {"namespaces": namespaces.clone()}})),
        );
        assert_eq!(SiteInfo::new(&mut registry).namespaces("en").unwrap(), namespaces);
        assert_eq!(transport.calls()[0].parameters["formatversion"], "2");
    }

    #[test]
    fn unknown_site_is_an_error() {
        let (mut registry, _transport) = registry(ScriptedTransport::new());
        assert!(matches!(
            SiteInfo::new(&mut registry).version("de"),
            Err(ApiError::UnknownSite(_))
        ));
    }

    #[test]
    fn list_passes_continuation_and_extra_parameters() {
        let (mut registry, transport) = registry(ScriptedTransport::new().reply_json(json!({
            "continue": {"apcontinue": "Sandbox", "continue": "-||"},
            "query": {"allpages": [{"pageid": 1, "ns": 0, "title": "Main Page"}]}
        })));
        let from = AllPagesContinue { token: "-||".to_string(), apcontinue: "Main_Page".to_string() };

        let batch = Pages::new(&mut registry)
            .list("en", Some(&from), params(&[("aplimit", "1")]))
            .unwrap();

        assert_eq!(
            batch.pages,
            vec![PageRef { pageid: 1, ns: 0, title: "Main Page".to_string() }]
        );
        assert_eq!(
            batch.next,
            Some(AllPagesContinue { token: "-||".to_string(), apcontinue: "Sandbox".to_string() })
        );
        assert_eq!(
            transport.calls()[0].parameters,
            params(&[
                ("action", "query"),
                ("aplimit", "1"),
                ("apcontinue", "Main_Page"),
                ("continue", "-||"),
                ("format", "json"),
                ("list", "allpages"),
            ])
        );
    }

    #[test]
    fn last_batch_has_no_continuation() {
        let (mut registry, transport) = registry(
            ScriptedTransport::new()
                .reply_json(json!({"batchcomplete": "", "query": {"allpages": []}})),
        );
        let batch = Pages::new(&mut registry).list("en", None, Parameters::new()).unwrap();
        assert!(batch.pages.is_empty());
        assert_eq!(batch.next, None);
        let sent = &transport.calls()[0].parameters;
        assert!(!sent.contains_key("continue"));
        assert!(!sent.contains_key("apcontinue"));
    }

    #[test]
    fn list_without_allpages_is_protocol_error() {
        let (mut registry, _transport) = registry(ScriptedTransport::new().reply_json(json!({"query": {}})));
        let err = Pages::new(&mut registry).list("en", None, Parameters::new()).unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedResponse { ref path, .. } if path == "query.allpages"));
    }

    #[test]
    fn save_fetches_csrf_token_once() {
        let (mut registry, transport) = registry(
            ScriptedTransport::new()
                .reply_json(json!({"batchcomplete": "", "query": {"tokens": {"csrftoken": "abc+\\"}}}))
                .reply_json(json!({"edit": {"result": "Success", "title": "Sandbox"}}))
                .reply_json(json!({"edit": {"result": "Success", "title": "Sandbox"}})),
        );
        let mut pages = Pages::new(&mut registry);

        let reply = pages.save("en", "Sandbox", "first").unwrap();
        assert_eq!(reply["edit"]["result"], "Success");
        pages.save("en", "Sandbox", "second").unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].parameters["meta"], "tokens");
        assert_eq!(calls[0].parameters["type"], "csrf");
        assert_eq!(
            calls[1].parameters,
            params(&[
                ("action", "edit"),
                ("bot", "1"),
                ("format", "json"),
                ("nocreate", "1"),
                ("text", "first"),
                ("title", "Sandbox"),
                ("token", "abc+\\"),
            ])
        );
        assert_eq!(calls[1].method, HttpMethod::Post);
        assert_eq!(calls[2].parameters["text"], "second");
        assert_eq!(calls[2].parameters["token"], "abc+\\");
    }

    #[test]
    fn csrf_tokens_are_kept_per_site() {
        let (mut registry, en) = registry(
            ScriptedTransport::new()
                .reply_json(json!({"query": {"tokens": {"csrftoken": "en-token"}}})),
        );
        let ru = Arc::new(
            ScriptedTransport::new().reply_json(json!({"query": {"tokens": {"csrftoken": "ru-token"}}})),
        );
        let client =
            ApiClient::new("https://ru.wikipedia.org/w/api.php", ru.clone(), Arc::new(MemoryStore::new()))
                .unwrap();
        registry.add("ru", client).unwrap();

        let mut pages = Pages::new(&mut registry);
        assert_eq!(pages.csrf_token("en").unwrap(), "en-token");
        assert_eq!(pages.csrf_token("ru").unwrap(), "ru-token");
        assert_eq!(pages.csrf_token("en").unwrap(), "en-token");
        assert_eq!(en.calls().len(), 1);
        assert_eq!(ru.calls().len(), 1);
    }

    #[test]
    fn rejected_token_is_fetched_again() {
        let (mut registry, transport) = registry(
            ScriptedTransport::new()
                .reply_json(json!({"query": {"tokens": {"csrftoken": "stale"}}}))
                .reply_json(json!({"error": {"code": "badtoken", "info": "Invalid CSRF token."}}))
                .reply_json(json!({"query": {"tokens": {"csrftoken": "fresh"}}}))
                .reply_json(json!({"edit": {"result": "Success"}})),
        );
        let mut pages = Pages::new(&mut registry);

        let reply = pages.save("en", "Sandbox", "text").unwrap();
        assert_eq!(reply["error"]["code"], "badtoken");
        pages.save("en", "Sandbox", "text").unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2].parameters["meta"], "tokens");
        assert_eq!(calls[3].parameters["token"], "fresh");
    }

    #[test]
    fn missing_csrf_token_is_protocol_error() {
        let (mut registry, transport) = registry(ScriptedTransport::new().reply_json(json!({"query": {}})));
        let err = Pages::new(&mut registry).save("en", "Sandbox", "text").unwrap_err();
        assert!(
            matches!(err, ApiError::UnexpectedResponse { ref path, .. } if path == "query.tokens.csrftoken")
        );
        assert_eq!(transport.calls().len(), 1, "no edit without a token");
    }
}
