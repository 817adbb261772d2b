//! Graph facade
//!
//! Entry point for callers: connects, hands out batches, and exposes query
//! and node/relationship operations. Operations taking an id or a payload
//! accept either one value or a list; a list fans out over one batch and
//! resolves to a list.

use crate::api::{Api, RootInfo};
use crate::args::{resolve, Arg, ArgType, Capability, EndpointFactory, ParamSpec};
use crate::auto_batch::auto_batch;
use crate::batch::Batch;
use crate::config::ClientConfig;
use crate::entity::{Node, OneOrMany, Relationship};
use crate::error::{RestError, RestResult};
use crate::request::{Payload, Pending, Target};
use crate::transport::{Method, Transport};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Registry name of the query endpoint
pub const CYPHER_ENDPOINT: &str = "cypher";

/// Raw result of a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CypherResult {
    /// Column names
    #[serde(default)]
    pub columns: Vec<String>,
    /// Result rows, one value per column
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
    /// Execution plan, present when profiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
}

impl CypherResult {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rows keyed by column name, in column order
    pub fn rows(&self) -> Vec<IndexMap<String, Value>> {
        self.data.iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }
}

const QUERY: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("profile").optional().of_type(ArgType::Boolean),
    ParamSpec::new("query").of_type(ArgType::String),
    ParamSpec::new("params").optional().of_type(ArgType::Object),
];

const DATA: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("data"),
];

const ID: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("id"),
];

/// A connected graph
#[derive(Debug, Clone)]
pub struct Graph {
    api: Api,
}

impl Graph {
    /// Connect to the server whose discovery document is at `url`
    pub async fn connect(url: &str) -> RestResult<Self> {
        Self::connect_with(ClientConfig::from_url(url)).await
    }

    pub async fn connect_with(config: ClientConfig) -> RestResult<Self> {
        let api = Api::new(config)?;
        Self::bootstrap(api).await
    }

    /// Connect through a caller-provided transport
    pub async fn connect_with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> RestResult<Self> {
        Self::bootstrap(Api::with_transport(config, transport)).await
    }

    async fn bootstrap(api: Api) -> RestResult<Self> {
        let url = api.config().url.clone();
        api.bootstrap(&url).await?;
        Ok(Self { api })
    }

    /// Rediscover endpoints from `url`. Requests created afterwards resolve
    /// against the new table.
    pub async fn reconnect(&self, url: &str) -> RestResult<RootInfo> {
        self.api.bootstrap(url).await
    }

    /// Server version reported at the last (re)connect
    pub fn version(&self) -> Option<String> {
        self.api.registry().snapshot().version().map(str::to_string)
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn create_batch(&self) -> Batch {
        self.api.batch()
    }

    /// Run a Cypher query.
    ///
    /// Arguments: `[batch?, profile?, query, params?]`. With `profile` set
    /// the result carries the execution plan.
    pub fn query(&self, args: Vec<Arg<'_>>) -> Pending<CypherResult> {
        Pending::settle(self.try_query(args))
    }

    fn try_query(&self, args: Vec<Arg<'_>>) -> RestResult<Pending<CypherResult>> {
        let mut record = resolve(args, QUERY)?;
        let batch = record.batch("batch")?;
        let profile = record.bool("profile")?.unwrap_or(false);
        let query = record.string("query")?.unwrap_or_default();
        let params = record.map("params")?.unwrap_or_default();

        let target = if profile {
            Target::Resolved(self.api.resolve_with(CYPHER_ENDPOINT, "?profile=true")?)
        } else {
            Target::from(CYPHER_ENDPOINT)
        };
        let body = json!({ "query": query, "params": params });

        let (completer, pending) = Pending::channel();
        self.api.request(
            batch,
            target,
            Method::Post,
            Some(Payload::Json(body)),
            completer.completion(|value| {
                serde_json::from_value(value)
                    .map_err(|e| RestError::Decode(format!("unexpected query result: {}", e)))
            }),
        );
        Ok(pending)
    }

    /// Arguments: `[batch?, data]`, one property map or a list of them
    pub fn create_node(&self, args: Vec<Arg<'_>>) -> Pending<OneOrMany<Node>> {
        Pending::settle(self.try_create_node(args))
    }

    fn try_create_node(&self, args: Vec<Arg<'_>>) -> RestResult<Pending<OneOrMany<Node>>> {
        let mut record = resolve(args, DATA)?;
        let batch = record.batch("batch")?;
        let data = match record.take("data") {
            Some(Arg::Value(Value::Null)) | None => Arg::from(Map::new()),
            Some(data) => data,
        };

        let api = self.api.clone();
        let (completer, pending) = Pending::channel();
        auto_batch(
            &self.api,
            crate::args![
                Arg::batch_slot(batch),
                "node",
                "POST",
                data,
                completer.completion(move |value| OneOrMany::decode(value, |v| Node::from_json(&api, v))),
            ],
        )?;
        Ok(pending)
    }

    /// Arguments: `[batch?, id]`, one id or a list of them
    pub fn get_node(&self, args: Vec<Arg<'_>>) -> Pending<OneOrMany<Node>> {
        let api = self.api.clone();
        self.by_id(args, "node", Method::Get, move |value| {
            OneOrMany::decode(value, |v| Node::from_json(&api, v))
        })
    }

    /// Arguments: `[batch?, id]`; ids may be given as nodes
    pub fn delete_node(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        self.by_id(args, "node", Method::Delete, |_| Ok(()))
    }

    /// Arguments: `[batch?, id]`, one id or a list of them
    pub fn get_relationship(&self, args: Vec<Arg<'_>>) -> Pending<OneOrMany<Relationship>> {
        let api = self.api.clone();
        self.by_id(args, "relationship", Method::Get, move |value| {
            OneOrMany::decode(value, |v| Relationship::from_json(&api, v))
        })
    }

    /// Arguments: `[batch?, id]`; ids may be given as relationships
    pub fn delete_relationship(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        self.by_id(args, "relationship", Method::Delete, |_| Ok(()))
    }

    fn by_id<T, F>(&self, args: Vec<Arg<'_>>, family: &'static str, method: Method, decode: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(Value) -> RestResult<T> + Send + 'static,
    {
        let setup = || -> RestResult<Pending<T>> {
            let mut record = resolve(args, ID)?;
            let batch = record.batch("batch")?;
            let id = record.value("id")?
                .ok_or_else(|| RestError::Argument("an id is required".to_string()))?;

            let (completer, pending) = Pending::channel();
            auto_batch(
                &self.api,
                crate::args![Arg::batch_slot(batch), id_factory(&self.api, family), id, method.as_str(), completer.completion(decode)],
            )?;
            Ok(pending)
        };
        Pending::settle(setup())
    }
}

/// Endpoint factory for `{family}/{id}`
pub(crate) fn id_factory(api: &Api, family: &'static str) -> EndpointFactory {
    let api = api.clone();
    Arc::new(move |inputs: &[Value]| match inputs.first().and_then(Value::as_u64) {
        Some(id) => api.resolve_with(family, &id.to_string()),
        None => Err(RestError::Argument(format!("{} ids must be non-negative integers, got {:?}", family, inputs))),
    })
}
