//! In-process stand-in for the REST server
//!
//! Serves the discovery document, node CRUD, a minimal cypher endpoint and
//! the batch endpoint, and counts what it receives. `MOVED_PATH` answers
//! with a redirect.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const BASE_PATH: &str = "/db/data";

/// Always answers 303 See Other
pub const MOVED_PATH: &str = "/db/data/moved";

pub struct FakeServer {
    base: String,
    nodes: Mutex<BTreeMap<u64, Map<String, Value>>>,
    next_id: AtomicUsize,
    requests: AtomicUsize,
    batches: AtomicUsize,
    authorization: Mutex<Option<String>>,
}

impl FakeServer {
    fn new(base: String) -> Self {
        Self {
            base,
            nodes: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(1),
            requests: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            authorization: Mutex::new(None),
        }
    }

    /// HTTP requests received, batches counted once
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Calls to the batch endpoint
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn authorization(&self) -> Option<String> {
        self.authorization.lock().unwrap().clone()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base, BASE_PATH, path)
    }

    fn node_doc(&self, id: u64, data: &Map<String, Value>) -> Value {
        let me = self.url(&format!("/node/{}", id));
        json!({
            "self": me,
            "data": data,
            "properties": format!("{}/properties", me),
            "create_relationship": format!("{}/relationships", me),
            "all_relationships": format!("{}/relationships/all", me),
            "incoming_relationships": format!("{}/relationships/in", me),
            "outgoing_relationships": format!("{}/relationships/out", me),
        })
    }

    fn not_found(&self, what: &str) -> (u16, Value) {
        (404, json!({
            "message": format!("{} not found", what),
            "exception": "NodeNotFoundException",
            "fullname": "org.neo4j.server.rest.web.NodeNotFoundException",
        }))
    }

    /// Route one call; shared by plain requests and batch entries
    fn handle(&self, method: &Method, target: &str, body: Option<Value>) -> (u16, Value) {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        let path = path.strip_prefix(BASE_PATH).unwrap_or(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (method.as_str(), segments.as_slice()) {
            ("GET", []) => (200, json!({
                "node": self.url("/node"),
                "cypher": self.url("/cypher"),
                "batch": self.url("/batch"),
                "node_index": self.url("/index/node"),
                "relationship_index": self.url("/index/relationship"),
                "extensions_info": self.url("/ext"),
                "extensions": {},
                "neo4j_version": "2.3.12",
            })),
            ("POST", ["node"]) => {
                let data = match body {
                    Some(Value::Object(data)) => data,
                    _ => Map::new(),
                };
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
                let doc = self.node_doc(id, &data);
                self.nodes.lock().unwrap().insert(id, data);
                (201, doc)
            }
            ("GET", ["node", id]) => {
                let id: u64 = id.parse().unwrap_or(0);
                match self.nodes.lock().unwrap().get(&id) {
                    Some(data) => (200, self.node_doc(id, data)),
                    None => self.not_found(&format!("Node {}", id)),
                }
            }
            ("DELETE", ["node", id]) => {
                let id: u64 = id.parse().unwrap_or(0);
                match self.nodes.lock().unwrap().remove(&id) {
                    Some(_) => (204, Value::Null),
                    None => self.not_found(&format!("Node {}", id)),
                }
            }
            ("PUT", ["node", id, "properties", key]) => {
                let id: u64 = id.parse().unwrap_or(0);
                match self.nodes.lock().unwrap().get_mut(&id) {
                    Some(data) => {
                        data.insert(key.to_string(), body.unwrap_or(Value::Null));
                        (204, Value::Null)
                    }
                    None => self.not_found(&format!("Node {}", id)),
                }
            }
            ("GET", ["node", id, "properties"]) => {
                let id: u64 = id.parse().unwrap_or(0);
                match self.nodes.lock().unwrap().get(&id) {
                    Some(data) => (200, Value::Object(data.clone())),
                    None => self.not_found(&format!("Node {}", id)),
                }
            }
            ("POST", ["cypher"]) => {
                let mut result = json!({
                    "columns": ["total"],
                    "data": [[self.node_count()]],
                });
                if query == Some("profile=true") {
                    result["plan"] = json!({ "name": "NodeCount" });
                }
                (200, result)
            }
            _ => (404, json!({ "message": format!("no route for {} {}", method, target) })),
        }
    }

    fn handle_batch(&self, body: Option<Value>) -> (u16, Value) {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let jobs = match body {
            Some(Value::Array(jobs)) => jobs,
            _ => return (400, json!({ "message": "batch body must be an array" })),
        };

        let results = jobs.into_iter()
            .map(|job| {
                let method = job["method"].as_str().and_then(|m| m.parse::<Method>().ok()).unwrap_or(Method::GET);
                let to = job["to"].as_str().unwrap_or("/").to_string();
                let (status, body) = self.handle(&method, &to, job.get("body").cloned());
                let mut entry = json!({ "id": job["id"], "from": to, "status": status });
                if !body.is_null() {
                    entry["body"] = body;
                }
                entry
            })
            .collect();

        (200, Value::Array(results))
    }
}

async fn dispatch(
    State(server): State<Arc<FakeServer>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    server.requests.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        *server.authorization.lock().unwrap() = Some(auth.to_string());
    }

    let body: Option<Value> = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => Some(value),
            Err(_) => return (StatusCode::BAD_REQUEST, [(header::CONTENT_TYPE, "application/json")], String::new()).into_response(),
        }
    };

    let target = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
    if target == MOVED_PATH {
        return (StatusCode::SEE_OTHER, [(header::LOCATION, "/elsewhere")], String::new()).into_response();
    }
    let (status, reply) = if method == Method::POST && target == format!("{}/batch", BASE_PATH) {
        server.handle_batch(body)
    } else {
        server.handle(&method, target, body)
    };

    let text = if reply.is_null() { String::new() } else { reply.to_string() };
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], text).into_response()
}

/// Start a server on an ephemeral port; returns its root discovery URL
pub async fn start() -> (String, Arc<FakeServer>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let server = Arc::new(FakeServer::new(base.clone()));

    let app = Router::new().fallback(dispatch).with_state(Arc::clone(&server));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("{}{}/", base, BASE_PATH), server)
}
