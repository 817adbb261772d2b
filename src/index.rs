//! Legacy index management
//!
//! Node and relationship indexes live under the `node_index` and
//! `relationship_index` endpoints. Entity membership (`index`,
//! `remove_from_index`) is on `PropertyContainer`.

use crate::args::{resolve, Arg, ArgType, Capability, EndpointFactory, ParamSpec};
use crate::auto_batch::auto_batch;
use crate::endpoint::encode_segment;
use crate::entity::{Node, OneOrMany, Relationship};
use crate::error::{RestError, RestResult};
use crate::graph::Graph;
use crate::request::{Payload, Pending};
use crate::transport::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Node,
    Relationship,
}

impl Family {
    fn endpoint(self) -> &'static str {
        match self {
            Family::Node => "node_index",
            Family::Relationship => "relationship_index",
        }
    }
}

const CREATE_INDEX: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("name").of_type(ArgType::String),
    ParamSpec::new("config").optional().of_type(ArgType::Object),
];

const LIST_INDEXES: &[ParamSpec] = &[ParamSpec::new("batch").optional().capable(Capability::Batch)];

const DELETE_INDEX: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("name"),
];

const EXACT_QUERY: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("index").of_type(ArgType::String),
    ParamSpec::new("key").of_type(ArgType::String),
    ParamSpec::new("value"),
];

impl Graph {
    /// Arguments: `[batch?, name, config?]`, e.g. a config of
    /// `{"type": "fulltext", "provider": "lucene"}`
    pub fn create_node_index(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(self.create_index(args, Family::Node))
    }

    pub fn create_relationship_index(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(self.create_index(args, Family::Relationship))
    }

    /// Arguments: `[batch?]`; resolves to each index name with its config
    pub fn list_node_indexes(&self, args: Vec<Arg<'_>>) -> Pending<Map<String, Value>> {
        Pending::settle(self.list_indexes(args, Family::Node))
    }

    pub fn list_relationship_indexes(&self, args: Vec<Arg<'_>>) -> Pending<Map<String, Value>> {
        Pending::settle(self.list_indexes(args, Family::Relationship))
    }

    /// Arguments: `[batch?, name]`; one name or a list of names
    pub fn delete_node_index(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(self.delete_index(args, Family::Node))
    }

    pub fn delete_relationship_index(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(self.delete_index(args, Family::Relationship))
    }

    /// Arguments: `[batch?, index, key, value]`; nodes indexed under exactly
    /// that key and value
    pub fn node_exact_query(&self, args: Vec<Arg<'_>>) -> Pending<Vec<Node>> {
        let api = self.api().clone();
        Pending::settle(self.exact_query(args, Family::Node, move |value| {
            OneOrMany::decode(value, |v| Node::from_json(&api, v)).map(OneOrMany::into_vec)
        }))
    }

    pub fn relationship_exact_query(&self, args: Vec<Arg<'_>>) -> Pending<Vec<Relationship>> {
        let api = self.api().clone();
        Pending::settle(self.exact_query(args, Family::Relationship, move |value| {
            OneOrMany::decode(value, |v| Relationship::from_json(&api, v)).map(OneOrMany::into_vec)
        }))
    }

    fn create_index(&self, args: Vec<Arg<'_>>, family: Family) -> RestResult<Pending<()>> {
        let mut record = resolve(args, CREATE_INDEX)?;
        let batch = record.batch("batch")?;
        let name = record.string("name")?.unwrap_or_default();

        let mut body = json!({ "name": name });
        if let Some(config) = record.map("config")? {
            body["config"] = Value::Object(config);
        }

        let (completer, pending) = Pending::channel();
        self.api().request(
            batch,
            family.endpoint(),
            Method::Post,
            Some(Payload::Json(body)),
            completer.completion(|_| Ok(())),
        );
        Ok(pending)
    }

    fn list_indexes(&self, args: Vec<Arg<'_>>, family: Family) -> RestResult<Pending<Map<String, Value>>> {
        let mut record = resolve(args, LIST_INDEXES)?;
        let batch = record.batch("batch")?;

        let (completer, pending) = Pending::channel();
        self.api().request(
            batch,
            family.endpoint(),
            Method::Get,
            None,
            // No content means no indexes
            completer.completion(|value| match value {
                Value::Object(indexes) => Ok(indexes),
                Value::Null => Ok(Map::new()),
                other => Err(RestError::Decode(format!("expected an index map, got {}", other))),
            }),
        );
        Ok(pending)
    }

    fn delete_index(&self, args: Vec<Arg<'_>>, family: Family) -> RestResult<Pending<()>> {
        let mut record = resolve(args, DELETE_INDEX)?;
        let batch = record.batch("batch")?;
        let names = record.value("name")?
            .ok_or_else(|| RestError::Argument("an index name is required".to_string()))?;

        let api = self.api().clone();
        let factory: EndpointFactory = Arc::new(move |inputs: &[Value]| match inputs.first() {
            Some(Value::String(name)) => api.resolve_with(family.endpoint(), &encode_segment(name)),
            other => Err(RestError::Argument(format!("index names must be strings, got {:?}", other))),
        });

        let (completer, pending) = Pending::channel();
        auto_batch(
            self.api(),
            crate::args![Arg::batch_slot(batch), factory, names, "DELETE", completer.completion(|_| Ok(()))],
        )?;
        Ok(pending)
    }

    fn exact_query<T, F>(&self, args: Vec<Arg<'_>>, family: Family, decode: F) -> RestResult<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce(Value) -> RestResult<T> + Send + 'static,
    {
        let mut record = resolve(args, EXACT_QUERY)?;
        let batch = record.batch("batch")?;
        let index = record.string("index")?.unwrap_or_default();
        let key = record.string("key")?.unwrap_or_default();
        let value = match record.value("value")? {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => return Err(RestError::Argument("a value is required".to_string())),
        };

        let sub = format!("{}/{}/{}", encode_segment(&index), encode_segment(&key), encode_segment(&value));
        let endpoint = self.api().resolve_with(family.endpoint(), &sub)?;

        let (completer, pending) = Pending::channel();
        self.api().request(batch, endpoint, Method::Get, None, completer.completion(decode));
        Ok(pending)
    }
}
