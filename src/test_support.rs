//! Scripted transport shared by the unit tests

use crate::api::Api;
use crate::config::ClientConfig;
use crate::error::{RestError, RestResult};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replies from a queue and records every request it sees.
/// An empty queue answers 200 with an empty JSON object.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<RestResult<HttpResponse>>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.replies.lock().unwrap().push_back(Ok(HttpResponse { status, body: body.to_string() }));
    }

    pub fn push_error(&self, error: RestError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Parsed JSON body of the n-th recorded call
    pub fn body(&self, n: usize) -> Value {
        let calls = self.calls();
        serde_json::from_str(calls[n].body.as_deref().unwrap()).unwrap()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> RestResult<HttpResponse> {
        self.calls.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        reply.unwrap_or_else(|| Ok(HttpResponse { status: 200, body: "{}".to_string() }))
    }
}

/// Discovery document as served under `{base}/db/data/`
pub fn discovery(base: &str) -> Value {
    json!({
        "node": format!("{}/db/data/node", base),
        "cypher": format!("{}/db/data/cypher", base),
        "batch": format!("{}/db/data/batch", base),
        "node_index": format!("{}/db/data/index/node", base),
        "relationship_index": format!("{}/db/data/index/relationship", base),
        "extensions": {},
        "neo4j_version": "2.3.12",
    })
}

/// An `Api` bootstrapped against `http://h:7474/db/data/`; the discovery
/// call is the first recorded call
pub async fn connected() -> (Api, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new();
    transport.push_json(200, discovery("http://h:7474"));
    let api = Api::with_transport(ClientConfig::default(), transport.clone());
    api.bootstrap("http://h:7474/db/data/").await.unwrap();
    (api, transport)
}

/// Entity document for node `id` under `http://h:7474/db/data`
pub fn node_json(id: u64, data: Value) -> Value {
    let base = format!("http://h:7474/db/data/node/{}", id);
    json!({
        "self": base,
        "data": data,
        "properties": format!("{}/properties", base),
        "create_relationship": format!("{}/relationships", base),
        "all_relationships": format!("{}/relationships/all", base),
        "incoming_relationships": format!("{}/relationships/in", base),
        "outgoing_relationships": format!("{}/relationships/out", base),
    })
}

/// Entity document for relationship `id`
pub fn relationship_json(id: u64, start: u64, end: u64, rel_type: &str) -> Value {
    let base = format!("http://h:7474/db/data/relationship/{}", id);
    json!({
        "self": base,
        "data": {},
        "type": rel_type,
        "start": format!("http://h:7474/db/data/node/{}", start),
        "end": format!("http://h:7474/db/data/node/{}", end),
        "properties": format!("{}/properties", base),
    })
}
