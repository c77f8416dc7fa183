#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read as _;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub struct StubBook {
    pub id: String,
    pub title: String,
    /// `(chapter id, purchase required)` in list order.
    pub chapters: Vec<(String, bool)>,
}

impl StubBook {
    pub fn new(id: &str, title: &str, chapters: &[(&str, bool)]) -> Self {
        Self {
            id: id.to_owned(),
            title: title.to_owned(),
            chapters: chapters
                .iter()
                .map(|(id, locked)| ((*id).to_owned(), *locked))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphqlStubConfig {
    pub valid_token: String,
    pub books: Vec<StubBook>,
    /// Scripted purchase outcomes; purchases past the end succeed.
    pub purchase_results: Vec<bool>,
    /// The first N requests answer 503.
    pub transient_failures: usize,
    /// Operations that always answer 503.
    pub unavailable_operations: Vec<&'static str>,
    /// Library books per page; 0 returns the whole library at once.
    pub library_page_size: usize,
}

struct StubState {
    config: GraphqlStubConfig,
    calls: HashMap<&'static str, usize>,
    requests: usize,
    purchases: usize,
}

pub struct GraphqlStub {
    pub url: String,
    state: Arc<Mutex<StubState>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl GraphqlStub {
    pub fn spawn(config: GraphqlStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start graphql stub server");
        let addr = server.server_addr();
        let url = format!("http://{addr}/graphql");

        let state = Arc::new(Mutex::new(StubState {
            config,
            calls: HashMap::new(),
            requests: 0,
            purchases: 0,
        }));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_state = Arc::clone(&state);
        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                if request.method() != &tiny_http::Method::Post || request.url() != "/graphql" {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let token = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("authorization"))
                    .map(|h| h.value.as_str().trim_start_matches("JWT ").to_owned())
                    .unwrap_or_default();

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };

                let query = parsed.get("query").and_then(Value::as_str).unwrap_or("");
                let (status, payload) = {
                    let mut state = thread_state.lock().expect("stub state lock");
                    state.requests += 1;
                    match operation_of(query) {
                        _ if state.requests <= state.config.transient_failures => {
                            (503, "upstream unavailable".to_owned())
                        }
                        None => (
                            200,
                            json!({ "data": null, "errors": [{ "message": "unknown operation" }] })
                                .to_string(),
                        ),
                        Some(operation) => {
                            *state.calls.entry(operation).or_default() += 1;
                            if state.config.unavailable_operations.contains(&operation) {
                                (503, "upstream unavailable".to_owned())
                            } else {
                                (200, respond(&mut state, operation, &parsed, &token).to_string())
                            }
                        }
                    }
                };

                let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                    .expect("content-type header");
                let _ = request.respond(
                    tiny_http::Response::from_string(payload)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        Self {
            url,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Number of answered requests for an operation: `user`, `book`,
    /// `chapterList`, `chapter`, `purchase`, `library`.
    pub fn calls(&self, operation: &str) -> usize {
        let state = self.state.lock().expect("stub state lock");
        state.calls.get(operation).copied().unwrap_or(0)
    }
}

impl Drop for GraphqlStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn operation_of(query: &str) -> Option<&'static str> {
    let operation = if query.contains("mutation PurchaseChapter") {
        "purchase"
    } else if query.contains("ChapterListInChapterDetail") {
        "chapterList"
    } else if query.contains("query ChapterDetail") {
        "chapter"
    } else if query.contains("BookInBookDetail") {
        "book"
    } else if query.contains("LibraryBooks") {
        "library"
    } else if query.contains("user(owner: true)") {
        "user"
    } else {
        return None;
    };
    Some(operation)
}

fn respond(state: &mut StubState, operation: &str, request: &Value, token: &str) -> Value {
    let vars = request.get("variables").cloned().unwrap_or(Value::Null);
    let authorized = !token.is_empty() && token == state.config.valid_token;

    if operation == "user" {
        if !authorized {
            return json!({ "data": { "user": null } });
        }
        return json!({
            "data": {
                "user": {
                    "_id": "u1",
                    "username": "reader",
                    "displayName": "Reader",
                    "email": "reader@example.com",
                    "goldCoin": 120,
                    "tel": null,
                    "address": null
                }
            }
        });
    }
    if !authorized {
        return json!({ "data": null, "errors": [{ "message": "Unauthorized" }] });
    }

    let str_var = |name: &str| vars.get(name).and_then(Value::as_str).unwrap_or("").to_owned();
    match operation {
        "book" => {
            let id = str_var("bookId");
            let book = state.config.books.iter().find(|b| b.id == id).map(|b| {
                json!({
                    "_id": b.id,
                    "title": b.title,
                    "authorName": null,
                    "translatorName": "Translator",
                    "coverImage": null,
                    "description": format!("About {}", b.title),
                    "contentRawState": null,
                    "hashtags": null,
                    "completed": false,
                    "user": { "_id": "u9", "username": "up", "displayName": "Uploader" }
                })
            });
            json!({ "data": { "book": book } })
        }
        "chapterList" => {
            let id = str_var("bookId");
            let list = state.config.books.iter().find(|b| b.id == id).map(|b| {
                let chapters = b
                    .chapters
                    .iter()
                    .map(|(cid, locked)| {
                        json!({
                            "_id": cid,
                            "title": format!("Chapter {cid}"),
                            "isPurchaseRequired": locked,
                            "publishedAt": "2024-01-01T00:00:00.000Z",
                            "status": "published",
                            "price": if *locked { json!({ "type": "goldCoin", "goldCoin": 7.0 }) } else { Value::Null }
                        })
                    })
                    .collect::<Vec<_>>();
                json!({ "chapters": chapters })
            });
            json!({ "data": { "chapterList": list } })
        }
        "chapter" => {
            let id = str_var("chapterId");
            let exists = state
                .config
                .books
                .iter()
                .any(|b| b.chapters.iter().any(|(cid, _)| *cid == id));
            if !exists {
                return json!({ "data": { "chapter": null } });
            }
            // Delivered JSON-encoded, as the platform does.
            let raw = json!({
                "blocks": [
                    { "key": "k1", "text": format!("Text of {id} & more"), "type": "unstyled" },
                    { "key": "k2", "text": "-", "type": "unstyled" },
                    { "key": "k3", "text": "Second paragraph", "type": "unstyled" }
                ],
                "entityMap": {}
            })
            .to_string();
            json!({
                "data": {
                    "chapter": {
                        "_id": id,
                        "title": format!("Chapter {id}"),
                        "contentRawState": raw,
                        "status": "published",
                        "publishedAt": "2024-01-01T00:00:00.000Z",
                        "isPurchaseRequired": false,
                        "purchased": true,
                        "price": null
                    }
                }
            })
        }
        "purchase" => {
            let id = str_var("chapterId");
            let attempt = state.purchases;
            state.purchases += 1;
            let ok = state.config.purchase_results.get(attempt).copied().unwrap_or(true);
            if !ok {
                return json!({ "data": { "purchaseChapter": null }, "errors": [{ "message": "not enough coins" }] });
            }
            for book in &mut state.config.books {
                for (cid, locked) in &mut book.chapters {
                    if *cid == id {
                        *locked = false;
                    }
                }
            }
            json!({ "data": { "purchaseChapter": { "_id": id, "title": "x", "isPurchaseRequired": false } } })
        }
        "library" => {
            let ids = state.config.books.iter().map(|b| (&b.id, &b.title)).collect::<Vec<_>>();
            let start = vars["filter"]["after"]
                .as_str()
                .and_then(|cursor| cursor.parse::<usize>().ok())
                .unwrap_or(0)
                .min(ids.len());
            let end = match state.config.library_page_size {
                0 => ids.len(),
                size => (start + size).min(ids.len()),
            };
            let edges = ids[start..end]
                .iter()
                .map(|(id, title)| json!({ "node": { "_id": id, "title": title } }))
                .collect::<Vec<_>>();
            let has_next = end < ids.len();
            json!({
                "data": {
                    "libraryBooks": {
                        "edges": edges,
                        "pageInfo": {
                            "hasNextPage": has_next,
                            "endCursor": if has_next { json!(end.to_string()) } else { Value::Null }
                        }
                    }
                }
            })
        }
        _ => json!({ "data": null }),
    }
}
