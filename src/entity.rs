//! Nodes, relationships and paths
//!
//! Entities are decoded from the server's self-describing JSON. They are
//! snapshots: operations that change the server never mutate the local
//! value, they hand back what the server returned.

use crate::api::Api;
use crate::args::{resolve, Arg, ArgType, ArgumentRecord, Capability, EndpointFactory, ParamSpec};
use crate::auto_batch::auto_batch;
use crate::endpoint::{encode_segment, parse_id, Endpoint};
use crate::error::{RestError, RestResult};
use crate::request::{Pending, Payload};
use crate::transport::Method;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A single entity or a list of them, depending on what the caller passed
#[derive(Debug, Clone, PartialEq)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Decode a scalar or an array with `decode` applied per element
    pub fn decode<F>(value: Value, mut decode: F) -> RestResult<Self>
    where
        F: FnMut(Value) -> RestResult<T>,
    {
        match value {
            Value::Array(items) => items.into_iter().map(decode).collect::<RestResult<_>>().map(OneOrMany::Many),
            single => decode(single).map(OneOrMany::One),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }

    /// The single value; a list is accepted only when it has exactly one
    pub fn into_one(self) -> RestResult<T> {
        match self {
            OneOrMany::One(item) => Ok(item),
            OneOrMany::Many(mut items) if items.len() == 1 => items.pop()
                .ok_or_else(|| RestError::Decode("expected one entity".to_string())),
            OneOrMany::Many(items) => Err(RestError::Decode(format!("expected one entity, got {}", items.len()))),
        }
    }
}

/// Identity, data and hypermedia links shared by nodes and relationships
#[derive(Debug, Clone)]
struct Entity {
    api: Api,
    id: u64,
    self_url: String,
    data: Map<String, Value>,
    links: HashMap<String, String>,
}

impl Entity {
    fn from_json(api: &Api, value: Value) -> RestResult<Self> {
        let mut doc = match value {
            Value::Object(doc) => doc,
            other => return Err(RestError::Decode(format!("expected an entity object, got {}", other))),
        };

        let self_url = match doc.remove("self") {
            Some(Value::String(url)) => url,
            _ => return Err(RestError::Decode("entity has no 'self' URL".to_string())),
        };
        let id = parse_id(&self_url)
            .ok_or_else(|| RestError::Decode(format!("no id at the end of '{}'", self_url)))?;
        let data = match doc.remove("data") {
            Some(Value::Object(data)) => data,
            _ => Map::new(),
        };
        let links = doc.into_iter()
            .filter_map(|(name, value)| match value {
                Value::String(url) => Some((name, url)),
                _ => None,
            })
            .collect();

        Ok(Self {
            api: api.clone(),
            id,
            self_url,
            data,
            links,
        })
    }

    fn link(&self, name: &str) -> RestResult<Endpoint> {
        let url = self.links.get(name)
            .ok_or_else(|| RestError::Decode(format!("entity {} has no '{}' link", self.id, name)))?;
        Endpoint::parse(url)
    }
}

/// A graph node
#[derive(Debug, Clone)]
pub struct Node {
    entity: Entity,
}

/// A graph relationship
#[derive(Debug, Clone)]
pub struct Relationship {
    entity: Entity,
    rel_type: String,
    start: u64,
    end: u64,
}

/// A path as returned by traversals and queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub start: u64,
    pub end: u64,
    pub length: usize,
    pub nodes: Vec<u64>,
    pub relationships: Vec<u64>,
}

/// A response value decoded by shape
#[derive(Debug, Clone)]
pub enum GraphValue {
    Node(Node),
    Relationship(Relationship),
    Path(Path),
    Value(Value),
}

impl Node {
    pub fn from_json(api: &Api, value: Value) -> RestResult<Self> {
        Ok(Self { entity: Entity::from_json(api, value)? })
    }

    /// Create a relationship from this node to `node`.
    ///
    /// Arguments: `[batch?, node, type, data?]`, where `node` is a node id
    /// or a `&Node` and `data` a property map.
    pub fn create_relationship_to(&self, args: Vec<Arg<'_>>) -> Pending<Relationship> {
        Pending::settle(self.create_relationship(args, Direction::Outgoing))
    }

    /// Create a relationship from `node` to this node; same arguments as
    /// `create_relationship_to`
    pub fn create_relationship_from(&self, args: Vec<Arg<'_>>) -> Pending<Relationship> {
        Pending::settle(self.create_relationship(args, Direction::Incoming))
    }

    /// Arguments: `[batch?, type?, types?]`; one relationship type or a
    /// list of them narrows the result
    pub fn get_all_relationships(&self, args: Vec<Arg<'_>>) -> Pending<Vec<Relationship>> {
        Pending::settle(self.get_relationships(args, "all_relationships"))
    }

    pub fn get_incoming_relationships(&self, args: Vec<Arg<'_>>) -> Pending<Vec<Relationship>> {
        Pending::settle(self.get_relationships(args, "incoming_relationships"))
    }

    pub fn get_outgoing_relationships(&self, args: Vec<Arg<'_>>) -> Pending<Vec<Relationship>> {
        Pending::settle(self.get_relationships(args, "outgoing_relationships"))
    }

    fn create_relationship(&self, args: Vec<Arg<'_>>, direction: Direction) -> RestResult<Pending<Relationship>> {
        let mut record = resolve(args, CREATE_RELATIONSHIP)?;
        let batch = record.batch("batch")?;
        let other = record.value("node")?
            .as_ref()
            .and_then(Value::as_u64)
            .ok_or_else(|| RestError::Argument("'node' must be a node or a node id".to_string()))?;
        let rel_type = record.string("type")?.unwrap_or_default();
        let data = record.map("data")?;

        let (endpoint, to) = match direction {
            Direction::Outgoing => (
                self.entity.link("create_relationship")?,
                self.entity.api.resolve_with("node", &other.to_string())?,
            ),
            Direction::Incoming => (
                self.entity.api.resolve_with("node", &format!("{}/relationships", other))?,
                Endpoint::parse(&self.entity.self_url)?,
            ),
        };

        let mut body = json!({ "to": to.href(), "type": rel_type });
        if let Some(data) = data {
            body["data"] = Value::Object(data);
        }

        let api = self.entity.api.clone();
        let (completer, pending) = Pending::channel();
        self.entity.api.request(
            batch,
            endpoint,
            Method::Post,
            Some(Payload::Json(body)),
            completer.completion(move |value| Relationship::from_json(&api, value)),
        );
        Ok(pending)
    }

    fn get_relationships(&self, args: Vec<Arg<'_>>, link: &str) -> RestResult<Pending<Vec<Relationship>>> {
        let mut record = resolve(args, GET_RELATIONSHIPS)?;
        let batch = record.batch("batch")?;

        let mut endpoint = self.entity.link(link)?;
        let filter = match (record.string("type")?, record.list("types")?) {
            (Some(rel_type), _) => Some(encode_segment(&rel_type)),
            (None, Some(types)) => Some(
                types.iter()
                    .map(|t| t.as_str().map(encode_segment))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| RestError::Argument("relationship types must be strings".to_string()))?
                    .join("&"),
            ),
            (None, None) => None,
        };
        if let Some(filter) = filter {
            endpoint = endpoint.join(&filter);
        }

        let api = self.entity.api.clone();
        let (completer, pending) = Pending::channel();
        self.entity.api.request(
            batch,
            endpoint,
            Method::Get,
            None,
            completer.completion(move |value| {
                OneOrMany::decode(value, |v| Relationship::from_json(&api, v)).map(OneOrMany::into_vec)
            }),
        );
        Ok(pending)
    }
}

enum Direction {
    Outgoing,
    Incoming,
}

const CREATE_RELATIONSHIP: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("node"),
    ParamSpec::new("type").of_type(ArgType::String),
    ParamSpec::new("data").optional().of_type(ArgType::Object),
];

const GET_RELATIONSHIPS: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("type").optional().of_type(ArgType::String),
    ParamSpec::new("types").capable(Capability::List).mutex("type"),
];

impl Relationship {
    pub fn from_json(api: &Api, value: Value) -> RestResult<Self> {
        let rel_type = value.get("type").and_then(Value::as_str).map(str::to_string);
        let start = value.get("start").and_then(Value::as_str).and_then(parse_id);
        let end = value.get("end").and_then(Value::as_str).and_then(parse_id);
        let entity = Entity::from_json(api, value)?;

        match (rel_type, start, end) {
            (Some(rel_type), Some(start), Some(end)) => Ok(Self { entity, rel_type, start, end }),
            _ => Err(RestError::Decode(format!("relationship {} lacks type, start or end", entity.id))),
        }
    }

    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    /// Id of the start node
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Id of the end node
    pub fn end(&self) -> u64 {
        self.end
    }
}

impl Path {
    pub fn from_json(value: &Value) -> RestResult<Self> {
        let id_at = |field: &str| {
            value.get(field)
                .and_then(Value::as_str)
                .and_then(parse_id)
                .ok_or_else(|| RestError::Decode(format!("path has no '{}'", field)))
        };
        let ids = |field: &str| -> RestResult<Vec<u64>> {
            value.get(field)
                .and_then(Value::as_array)
                .map(|urls| urls.iter().filter_map(|u| u.as_str().and_then(parse_id)).collect())
                .ok_or_else(|| RestError::Decode(format!("path has no '{}' list", field)))
        };

        let relationships = ids("relationships")?;
        let length = value.get("length")
            .and_then(Value::as_u64)
            .map_or(relationships.len(), |n| n as usize);

        Ok(Self {
            start: id_at("start")?,
            end: id_at("end")?,
            length,
            nodes: ids("nodes")?,
            relationships,
        })
    }
}

impl GraphValue {
    /// Recognize nodes, relationships and paths by their fields; anything
    /// else stays plain JSON
    pub fn from_json(api: &Api, value: Value) -> RestResult<Self> {
        let is_str = |field: &str| value.get(field).map_or(false, Value::is_string);
        let entity = is_str("self") && value.get("data").map_or(false, Value::is_object);
        let starts = is_str("start");
        let path = starts && is_str("end") && value.get("nodes").map_or(false, Value::is_array);

        match (entity, starts, path) {
            (true, true, _) => Relationship::from_json(api, value).map(GraphValue::Relationship),
            (true, false, _) => Node::from_json(api, value).map(GraphValue::Node),
            (false, _, true) => Path::from_json(&value).map(GraphValue::Path),
            _ => Ok(GraphValue::Value(value)),
        }
    }
}

/// Property and index operations shared by nodes and relationships
pub trait PropertyContainer {
    fn api(&self) -> &Api;

    fn id(&self) -> u64;

    /// Canonical URL of this entity
    fn self_url(&self) -> &str;

    /// Properties as of decoding
    fn data(&self) -> &Map<String, Value>;

    /// A hypermedia link from the entity document
    fn link(&self, name: &str) -> RestResult<Endpoint>;

    /// Registry name of the index family this entity can be indexed in
    fn index_family(&self) -> &'static str;

    /// Arguments: `[batch?, key?, value, props]`; either one key and its
    /// value, or a map of properties set one request per key
    fn set_properties(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(set_properties(self, args))
    }

    /// Same arguments as `set_properties`; all other properties are removed
    fn replace_all_properties(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(replace_all_properties(self, args))
    }

    /// Arguments: `[batch?, props?]`; a key, a list of keys, or nothing to
    /// remove every property
    fn delete_properties(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(delete_properties(self, args))
    }

    /// Arguments: `[batch?]`; resolves to the properties stored on the server
    fn refresh_properties(&self, args: Vec<Arg<'_>>) -> Pending<Map<String, Value>> {
        Pending::settle(refresh_properties(self, args))
    }

    /// Arguments: `[batch?, index, key, value]`
    fn index(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(add_to_index(self, args))
    }

    /// Arguments: `[batch?, index, key?, value?]`; narrower arguments remove
    /// fewer entries
    fn remove_from_index(&self, args: Vec<Arg<'_>>) -> Pending<()> {
        Pending::settle(remove_from_index(self, args))
    }
}

macro_rules! property_container {
    ($ty:ty, $family:expr) => {
        impl PropertyContainer for $ty {
            fn api(&self) -> &Api {
                &self.entity.api
            }

            fn id(&self) -> u64 {
                self.entity.id
            }

            fn self_url(&self) -> &str {
                &self.entity.self_url
            }

            fn data(&self) -> &Map<String, Value> {
                &self.entity.data
            }

            fn link(&self, name: &str) -> RestResult<Endpoint> {
                self.entity.link(name)
            }

            fn index_family(&self) -> &'static str {
                $family
            }
        }

        impl From<&$ty> for Arg<'_> {
            fn from(entity: &$ty) -> Self {
                Arg::Value(Value::from(entity.entity.id))
            }
        }

        impl From<&[$ty]> for Arg<'_> {
            fn from(entities: &[$ty]) -> Self {
                Arg::Value(entities.iter().map(|e| Value::from(e.entity.id)).collect())
            }
        }
    };
}

property_container!(Node, "node_index");
property_container!(Relationship, "relationship_index");

const SET_PROPERTIES: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("key").optional().of_type(ArgType::String),
    ParamSpec::new("value").requires("key").required_by("key"),
    ParamSpec::new("props").of_type(ArgType::Object).mutex("key"),
];

const DELETE_PROPERTIES: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("props").optional(),
];

const BATCH_ONLY: &[ParamSpec] = &[ParamSpec::new("batch").optional().capable(Capability::Batch)];

const ADD_TO_INDEX: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("index").of_type(ArgType::String),
    ParamSpec::new("key").of_type(ArgType::String),
    ParamSpec::new("value"),
];

const REMOVE_FROM_INDEX: &[ParamSpec] = &[
    ParamSpec::new("batch").optional().capable(Capability::Batch),
    ParamSpec::new("index").of_type(ArgType::String),
    ParamSpec::new("key").optional().of_type(ArgType::String),
    ParamSpec::new("value").requires("key"),
];

/// Endpoint factory for `properties/{key}`; no key means the whole map
fn property_factory(properties: Endpoint) -> EndpointFactory {
    Arc::new(move |inputs: &[Value]| match inputs.first() {
        None => Ok(properties.clone()),
        Some(Value::String(key)) => Ok(properties.join(&encode_segment(key))),
        Some(other) => Err(RestError::Argument(format!("property key must be a string, got {}", other))),
    })
}

fn ignore(_: Value) -> RestResult<()> {
    Ok(())
}

/// The path segment under an index for a value: strings as is, anything
/// else in its JSON form
fn value_segment(value: &Value) -> String {
    match value {
        Value::String(s) => encode_segment(s),
        other => encode_segment(&other.to_string()),
    }
}

/// `{key: value}` or the given map
fn property_map(record: &mut ArgumentRecord<'_>) -> RestResult<Map<String, Value>> {
    match record.string("key")? {
        Some(key) => {
            let mut props = Map::new();
            props.insert(key, record.value("value")?.unwrap_or(Value::Null));
            Ok(props)
        }
        None => record.map("props")?
            .ok_or_else(|| RestError::Argument("either a key and value or a property map is required".to_string())),
    }
}

fn set_properties<E: PropertyContainer + ?Sized>(entity: &E, args: Vec<Arg<'_>>) -> RestResult<Pending<()>> {
    let mut record = resolve(args, SET_PROPERTIES)?;
    let batch = record.batch("batch")?;
    let (keys, values): (Vec<Value>, Vec<Value>) = property_map(&mut record)?
        .into_iter()
        .map(|(key, value)| (Value::String(key), value))
        .unzip();

    let factory = property_factory(entity.link("properties")?);
    let (completer, pending) = Pending::channel();
    auto_batch(entity.api(), crate::args![Arg::batch_slot(batch), factory, keys, "PUT", values, completer.completion(ignore)])?;
    Ok(pending)
}

fn replace_all_properties<E: PropertyContainer + ?Sized>(entity: &E, args: Vec<Arg<'_>>) -> RestResult<Pending<()>> {
    let mut record = resolve(args, SET_PROPERTIES)?;
    let batch = record.batch("batch")?;
    let props = property_map(&mut record)?;

    let (completer, pending) = Pending::channel();
    auto_batch(
        entity.api(),
        crate::args![Arg::batch_slot(batch), entity.link("properties")?, "PUT", props, completer.completion(ignore)],
    )?;
    Ok(pending)
}

fn delete_properties<E: PropertyContainer + ?Sized>(entity: &E, args: Vec<Arg<'_>>) -> RestResult<Pending<()>> {
    let mut record = resolve(args, DELETE_PROPERTIES)?;
    let batch = record.batch("batch")?;
    let properties = entity.link("properties")?;

    let (completer, pending) = Pending::channel();
    let completion = completer.completion(ignore);
    let args = match record.value("props")? {
        None => crate::args![Arg::batch_slot(batch), properties, "DELETE", completion],
        Some(Value::String(key)) => crate::args![Arg::batch_slot(batch), property_factory(properties), json!(key), "DELETE", completion],
        Some(Value::Array(keys)) => crate::args![Arg::batch_slot(batch), property_factory(properties), keys, "DELETE", completion],
        Some(other) => {
            return Err(RestError::Argument(format!("'props' must be a key or a list of keys, got {}", other)))
        }
    };
    auto_batch(entity.api(), args)?;
    Ok(pending)
}

fn refresh_properties<E: PropertyContainer + ?Sized>(
    entity: &E,
    args: Vec<Arg<'_>>,
) -> RestResult<Pending<Map<String, Value>>> {
    let mut record = resolve(args, BATCH_ONLY)?;
    let batch = record.batch("batch")?;

    let (completer, pending) = Pending::channel();
    entity.api().request(
        batch,
        entity.link("properties")?,
        Method::Get,
        None,
        completer.completion(|value| match value {
            Value::Object(props) => Ok(props),
            Value::Null => Ok(Map::new()),
            other => Err(RestError::Decode(format!("expected a property map, got {}", other))),
        }),
    );
    Ok(pending)
}

fn add_to_index<E: PropertyContainer + ?Sized>(entity: &E, args: Vec<Arg<'_>>) -> RestResult<Pending<()>> {
    let mut record = resolve(args, ADD_TO_INDEX)?;
    let batch = record.batch("batch")?;
    let index = record.string("index")?.unwrap_or_default();
    let key = record.string("key")?.unwrap_or_default();
    let value = record.value("value")?.unwrap_or(Value::Null);

    let endpoint = entity.api().resolve_with(entity.index_family(), &encode_segment(&index))?;
    let body = json!({ "key": key, "value": value, "uri": entity.self_url() });

    let (completer, pending) = Pending::channel();
    entity.api().request(batch, endpoint, Method::Post, Some(Payload::Json(body)), completer.completion(ignore));
    Ok(pending)
}

fn remove_from_index<E: PropertyContainer + ?Sized>(entity: &E, args: Vec<Arg<'_>>) -> RestResult<Pending<()>> {
    let mut record = resolve(args, REMOVE_FROM_INDEX)?;
    let batch = record.batch("batch")?;

    let mut segments = vec![encode_segment(&record.string("index")?.unwrap_or_default())];
    if let Some(key) = record.string("key")? {
        segments.push(encode_segment(&key));
        if let Some(value) = record.value("value")? {
            segments.push(value_segment(&value));
        }
    }
    segments.push(entity.id().to_string());

    let endpoint = entity.api().resolve_with(entity.index_family(), &segments.join("/"))?;

    let (completer, pending) = Pending::channel();
    entity.api().request(batch, endpoint, Method::Delete, None, completer.completion(ignore));
    Ok(pending)
}
