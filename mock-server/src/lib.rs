use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const API_PATH: &str = "/w/api.php";
pub const SESSION_COOKIE: &str = "wikiSession";
pub const USER_COOKIE: &str = "wikiUserName";
pub const GENERATOR: &str = "MediaWiki 1.23.0";
/// CSRF token handed to anonymous sessions.
pub const ANONYMOUS_TOKEN: &str = "+\\";
const DEFAULT_LIST_LIMIT: usize = 10;

#[derive(Debug, Default)]
struct Session {
    login_token: Option<String>,
    csrf_token: Option<String>,
    user: Option<String>,
}

#[derive(Debug, Clone)]
struct Page {
    id: u64,
    text: String,
}

/// In-memory wiki: accounts, sessions, pages and whether anonymous reads are
/// allowed.
#[derive(Debug, Default)]
pub struct Wiki {
    users: HashMap<String, String>,
    sessions: HashMap<String, Session>,
    pages: BTreeMap<String, Page>,
    last_revision: u64,
    private: bool,
}

impl Wiki {
    /// A public wiki with one account, `bot` / `secret`, and the pages
    /// `Main Page` and `Sandbox`.
    pub fn new() -> Self {
        Self::default()
            .with_user("bot", "secret")
            .with_page("Main Page", "Welcome")
            .with_page("Sandbox", "")
    }

    pub fn with_page(mut self, title: &str, text: &str) -> Self {
        let id = self.pages.len() as u64 + 1;
        self.pages.insert(title.to_string(), Page { id, text: text.to_string() });
        self
    }

    /// Current text of `title`.
    pub fn page_text(&self, title: &str) -> Option<&str> {
        self.pages.get(title).map(|page| page.text.as_str())
    }

    pub fn with_user(mut self, name: &str, password: &str) -> Self {
        self.users.insert(name.to_string(), password.to_string());
        self
    }

    /// Refuse `query` to anonymous sessions with `readapidenied`.
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    fn session(&mut self, id: &str) -> &mut Session {
        self.sessions.entry(id.to_string()).or_default()
    }

    /// Dispatch one API call. Returns the JSON body and cookies to set.
    pub fn handle(&mut self, session_id: &str, params: &HashMap<String, String>) -> (Value, Vec<(String, String)>) {
        let action = params.get("action").map(String::as_str).unwrap_or_default();
        match action {
            "login" => self.login(session_id, params),
            "logout" => {
                let session = self.session(session_id);
                session.user = None;
                session.csrf_token = None;
                (json!({}), vec![(USER_COOKIE.to_string(), "deleted".to_string())])
            }
            "query" => (self.query(session_id, params), Vec::new()),
            "edit" => (self.edit(session_id, params), Vec::new()),
            other => (
                api_error("unknown_action", &format!("Unrecognized value for parameter 'action': {other}")),
                Vec::new(),
            ),
        }
    }

    fn login(&mut self, session_id: &str, params: &HashMap<String, String>) -> (Value, Vec<(String, String)>) {
        let name = params.get("lgname").map(String::as_str).unwrap_or_default();
        let password = params.get("lgpassword").map(String::as_str).unwrap_or_default();
        if name.is_empty() {
            return (login_result("NoName"), Vec::new());
        }
        if password.is_empty() {
            return (login_result("EmptyPass"), Vec::new());
        }

        let Some(token) = params.get("lgtoken") else {
            let token = Uuid::new_v4().simple().to_string();
            self.session(session_id).login_token = Some(token.clone());
            let body = json!({"login": {
                "result": "NeedToken",
                "token": token,
                "cookieprefix": "wiki",
                "sessionid": session_id,
            }});
            return (body, Vec::new());
        };

        if self.session(session_id).login_token.as_deref() != Some(token.as_str()) {
            return (login_result("WrongToken"), Vec::new());
        }
        let result = match self.users.get(name) {
            None => "NotExists",
            Some(expected) if expected != password => "WrongPass",
            Some(_) => "Success",
        };
        let session = self.session(session_id);
        session.login_token = None;
        if result != "Success" {
            return (login_result(result), Vec::new());
        }
        session.user = Some(name.to_string());
        session.csrf_token = None;
        let body = json!({"login": {
            "result": "Success",
            "lgusername": name,
            "lguserid": 1,
            "cookieprefix": "wiki",
            "sessionid": session_id,
        }});
        (body, vec![(USER_COOKIE.to_string(), name.to_string())])
    }

    fn query(&mut self, session_id: &str, params: &HashMap<String, String>) -> Value {
        let user = self.session(session_id).user.clone();
        if self.private && user.is_none() {
            return api_error("readapidenied", "You need read permission to use this module");
        }

        let meta = params.get("meta").map(String::as_str).unwrap_or_default();
        let siprop = params.get("siprop").map(String::as_str).unwrap_or_default();
        let mut query = serde_json::Map::new();
        for module in meta.split('|').filter(|m| !m.is_empty()) {
            match module {
                "siteinfo" if siprop.split('|').any(|p| p == "namespaces") => {
                    query.insert("namespaces".to_string(), namespaces());
                }
                "siteinfo" => {
                    query.insert(
                        "general".to_string(),
                        json!({"sitename": "Mock Wiki", "generator": GENERATOR}),
                    );
                }
                "tokens" => {
                    query.insert("tokens".to_string(), json!({"csrftoken": self.csrf_token(session_id)}));
                }
                "userinfo" => {
                    let info = match &user {
                        Some(name) => json!({"id": 1, "name": name}),
                        None => json!({"id": 0, "name": "127.0.0.1", "anon": ""}),
                    };
                    query.insert("userinfo".to_string(), info);
                }
                other => {
                    return api_error("unknown_meta", &format!("Unrecognized value for parameter 'meta': {other}"));
                }
            }
        }

        let mut body = serde_json::Map::new();
        let list = params.get("list").map(String::as_str).unwrap_or_default();
        for module in list.split('|').filter(|m| !m.is_empty()) {
            match module {
                "allpages" => {
                    let (pages, next) = self.all_pages(params);
                    query.insert("allpages".to_string(), pages);
                    if let Some(next) = next {
                        body.insert("continue".to_string(), next);
                    }
                }
                other => {
                    return api_error("unknown_list", &format!("Unrecognized value for parameter 'list': {other}"));
                }
            }
        }

        if !body.contains_key("continue") {
            body.insert("batchcomplete".to_string(), json!(""));
        }
        body.insert("query".to_string(), Value::Object(query));
        Value::Object(body)
    }

    /// Titles from `apcontinue` on, `aplimit` at a time.
    fn all_pages(&self, params: &HashMap<String, String>) -> (Value, Option<Value>) {
        let limit = params
            .get("aplimit")
            .and_then(|limit| limit.parse().ok())
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .max(1);
        let from = params.get("apcontinue").map(|title| title.replace('_', " ")).unwrap_or_default();

        let mut remaining = self.pages.range(from..);
        let pages: Vec<Value> = remaining
            .by_ref()
            .take(limit)
            .map(|(title, page)| json!({"pageid": page.id, "ns": 0, "title": title}))
            .collect();
        let next = remaining
            .next()
            .map(|(title, _)| json!({"apcontinue": title.replace(' ', "_"), "continue": "-||"}));
        (Value::Array(pages), next)
    }

    fn csrf_token(&mut self, session_id: &str) -> String {
        let session = self.session(session_id);
        let anonymous = session.user.is_none();
        session
            .csrf_token
            .get_or_insert_with(|| {
                if anonymous {
                    ANONYMOUS_TOKEN.to_string()
                } else {
                    format!("{}{}", Uuid::new_v4().simple(), ANONYMOUS_TOKEN)
                }
            })
            .clone()
    }

    fn edit(&mut self, session_id: &str, params: &HashMap<String, String>) -> Value {
        if self.private && self.session(session_id).user.is_none() {
            return api_error("readapidenied", "You need read permission to use this module");
        }
        let Some(title) = params.get("title").filter(|title| !title.is_empty()) else {
            return api_error("notitle", "The title parameter must be set");
        };
        let Some(text) = params.get("text") else {
            return api_error("notext", "The text parameter must be set");
        };
        let Some(token) = params.get("token") else {
            return api_error("notoken", "The token parameter must be set");
        };
        if self.session(session_id).csrf_token.as_deref() != Some(token.as_str()) {
            return api_error("badtoken", "Invalid CSRF token.");
        }

        if params.contains_key("nocreate") && !self.pages.contains_key(title) {
            return api_error("missingtitle", "The page you specified doesn't exist.");
        }

        let next_id = self.pages.len() as u64 + 1;
        let page = self
            .pages
            .entry(title.clone())
            .or_insert_with(|| Page { id: next_id, text: String::new() });
        page.text = text.clone();
        let pageid = page.id;
        self.last_revision += 1;
        json!({"edit": {
            "result": "Success",
            "pageid": pageid,
            "title": title,
            "newrevid": self.last_revision,
        }})
    }
}

fn api_error(code: &str, info: &str) -> Value {
    json!({"error": {"code": code, "info": info}})
}

fn login_result(result: &str) -> Value {
    json!({"login": {"result": result}})
}

fn namespaces() -> Value {
    json!({
        "-1": {"id": -1, "case": "first-letter", "name": "Special", "content": false},
        "0": {"id": 0, "case": "first-letter", "name": "", "content": true},
        "1": {"id": 1, "case": "first-letter", "name": "Talk", "content": false},
    })
}

/// Cookie pairs from a `Cookie: a=1; b=2` header.
pub fn parse_cookie_header(value: &str) -> HashMap<String, String> {
    value
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

pub type Db = Arc<RwLock<Wiki>>;

pub fn app() -> Router {
    app_with(Wiki::new())
}

pub fn app_with(wiki: Wiki) -> Router {
    let db: Db = Arc::new(RwLock::new(wiki));
    Router::new().route(API_PATH, get(api_get).post(api_post)).with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, wiki: Wiki) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(wiki)).await
}

async fn api_get(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    dispatch(db, &headers, params).await
}

async fn api_post(
    State(db): State<Db>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    dispatch(db, &headers, params).await
}

async fn dispatch(db: Db, headers: &HeaderMap, params: HashMap<String, String>) -> Response {
    let cookies = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(parse_cookie_header)
        .unwrap_or_default();

    let mut set_cookies = Vec::new();
    let session_id = match cookies.get(SESSION_COOKIE) {
        Some(id) => id.clone(),
        None => {
            let id = Uuid::new_v4().simple().to_string();
            set_cookies.push((SESSION_COOKIE.to_string(), id.clone()));
            id
        }
    };

    let (body, mut new_cookies) = db.write().await.handle(&session_id, &params);
    set_cookies.append(&mut new_cookies);
    tracing::debug!(action = ?params.get("action"), session = %session_id, "handled API call");

    let mut response_headers = HeaderMap::new();
    for (name, value) in set_cookies {
        if let Ok(value) = HeaderValue::from_str(&format!("{name}={value}; path=/; HttpOnly")) {
            response_headers.append(header::SET_COOKIE, value);
        }
    }

    let format = params.get("format").map(String::as_str).unwrap_or("json");
    if format.eq_ignore_ascii_case("json") {
        (StatusCode::OK, response_headers, Json(body)).into_response()
    } else {
        let xml = format!("<?xml version=\"1.0\"?><api>{}</api>", body);
        (StatusCode::OK, response_headers, xml).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn cookie_header_is_split_into_pairs() {
        let cookies = parse_cookie_header("wikiSession=abc; wikiUserName=bot;broken");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies["wikiSession"], "abc");
        assert_eq!(cookies["wikiUserName"], "bot");
    }

    #[test]
    fn login_requires_token_round_trip() {
        let mut wiki = Wiki::new();
        let (body, cookies) =
            wiki.handle("s1", &params(&[("action", "login"), ("lgname", "bot"), ("lgpassword", "secret")]));
        assert_eq!(body["login"]["result"], "NeedToken");
        assert!(cookies.is_empty());
        let token = body["login"]["token"].as_str().unwrap().to_string();

        let (body, cookies) = wiki.handle(
            "s1",
            &params(&[("action", "login"), ("lgname", "bot"), ("lgpassword", "secret"), ("lgtoken", token.as_str())]),
        );
        assert_eq!(body["login"]["result"], "Success");
        assert_eq!(cookies, vec![(USER_COOKIE.to_string(), "bot".to_string())]);
    }

    #[test]
    fn login_failures() {
        let mut wiki = Wiki::new();
        let (body, _) = wiki.handle("s", &params(&[("action", "login"), ("lgpassword", "x")]));
        assert_eq!(body["login"]["result"], "NoName");
        let (body, _) = wiki.handle("s", &params(&[("action", "login"), ("lgname", "bot")]));
        assert_eq!(body["login"]["result"], "EmptyPass");

        let (body, _) = wiki.handle("s", &params(&[("action", "login"), ("lgname", "bot"), ("lgpassword", "x")]));
        let token = body["login"]["token"].as_str().unwrap().to_string();
        let (body, _) = wiki.handle(
            "s",
            &params(&[("action", "login"), ("lgname", "bot"), ("lgpassword", "x"), ("lgtoken", token.as_str())]),
        );
        assert_eq!(body["login"]["result"], "WrongPass");

        let (body, _) = wiki.handle(
            "s",
            &params(&[("action", "login"), ("lgname", "bot"), ("lgpassword", "secret"), ("lgtoken", "stale")]),
        );
        assert_eq!(body["login"]["result"], "WrongToken");
    }

    #[test]
    fn private_wiki_denies_anonymous_queries() {
        let mut wiki = Wiki::new().private();
        let (body, _) = wiki.handle("s", &params(&[("action", "query"), ("meta", "siteinfo")]));
        assert_eq!(body["error"]["code"], "readapidenied");
    }

    #[test]
    fn siteinfo_and_userinfo() {
        let mut wiki = Wiki::new();
        let (body, _) = wiki.handle("s", &params(&[("action", "query"), ("meta", "siteinfo|userinfo")]));
        assert_eq!(body["query"]["general"]["generator"], GENERATOR);
        assert_eq!(body["query"]["userinfo"]["id"], 0);
    }

    #[test]
    fn unknown_action_is_error_envelope() {
        let mut wiki = Wiki::new();
        let (body, _) = wiki.handle("s", &params(&[("action", "purge")]));
        assert_eq!(body["error"]["code"], "unknown_action");
    }

    #[test]
    fn logout_returns_empty_object() {
        let mut wiki = Wiki::new();
        let (body, _) = wiki.handle("s", &params(&[("action", "logout")]));
        assert_eq!(body, json!({}));
    }

    #[test]
    fn allpages_is_paginated_in_title_order() {
        let mut wiki = Wiki::new().with_page("Zebra", "z");
        let (body, _) = wiki.handle("s", &params(&[("action", "query"), ("list", "allpages"), ("aplimit", "2")]));
        let titles: Vec<_> = body["query"]["allpages"].as_array().unwrap().iter().map(|p| p["title"].clone()).collect();
        assert_eq!(titles, vec![json!("Main Page"), json!("Sandbox")]);
        assert_eq!(body["continue"], json!({"apcontinue": "Zebra", "continue": "-||"}));
        assert!(body.get("batchcomplete").is_none());

        let (body, _) = wiki.handle(
            "s",
            &params(&[("action", "query"), ("list", "allpages"), ("aplimit", "2"), ("apcontinue", "Zebra")]),
        );
        assert_eq!(body["query"]["allpages"], json!([{"pageid": 3, "ns": 0, "title": "Zebra"}]));
        assert!(body.get("continue").is_none());
        assert_eq!(body["batchcomplete"], "");
    }

    #[test]
    fn edit_checks_token_and_nocreate() {
        let mut wiki = Wiki::new();
        let edit = |title: &str, token: &str| {
            params(&[("action", "edit"), ("title", title), ("text", "new"), ("token", token), ("nocreate", "1")])
        };

        let (body, _) = wiki.handle("s", &edit("Sandbox", ANONYMOUS_TOKEN));
        assert_eq!(body["error"]["code"], "badtoken", "token must be fetched first");

        let (body, _) = wiki.handle("s", &params(&[("action", "query"), ("meta", "tokens"), ("type", "csrf")]));
        assert_eq!(body["query"]["tokens"]["csrftoken"], ANONYMOUS_TOKEN);

        let (body, _) = wiki.handle("s", &edit("Sandbox", ANONYMOUS_TOKEN));
        assert_eq!(body["edit"]["result"], "Success");
        assert_eq!(body["edit"]["newrevid"], 1);
        assert_eq!(wiki.page_text("Sandbox"), Some("new"));

        let (body, _) = wiki.handle("s", &edit("Missing", ANONYMOUS_TOKEN));
        assert_eq!(body["error"]["code"], "missingtitle");
        assert_eq!(wiki.page_text("Missing"), None);
    }

    #[test]
    fn logged_in_sessions_get_their_own_token() {
        let mut wiki = Wiki::new();
        let (body, _) = wiki.handle("s", &params(&[("action", "login"), ("lgname", "bot"), ("lgpassword", "secret")]));
        let token = body["login"]["token"].as_str().unwrap().to_string();
        wiki.handle(
            "s",
            &params(&[("action", "login"), ("lgname", "bot"), ("lgpassword", "secret"), ("lgtoken", token.as_str())]),
        );

        let (body, _) = wiki.handle("s", &params(&[("action", "query"), ("meta", "tokens")]));
        let csrf = body["query"]["tokens"]["csrftoken"].as_str().unwrap();
        assert_ne!(csrf, ANONYMOUS_TOKEN);
        assert!(csrf.ends_with(ANONYMOUS_TOKEN));
    }
}
