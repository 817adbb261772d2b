//! Structured argument resolution
//!
//! Public operations accept an optional leading batch and a loose tail of
//! positional parameters. A shape (a slice of `ParamSpec`) declares what each
//! position may hold; `resolve` walks the shape once, greedily, and produces
//! an `ArgumentRecord` with every declared name either filled or absent.
//!
//! The walk never backtracks. Shapes are written so that the greedy choice
//! is the right one: optional parameters sit where skipping them early
//! cannot starve a later mandatory one.

use crate::batch::Batch;
use crate::endpoint::Endpoint;
use crate::error::{RestError, RestResult};
use crate::request::{Completion, Payload};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Builds the endpoint for one item of a fan-out from that item's inputs
pub type EndpointFactory = Arc<dyn Fn(&[Value]) -> RestResult<Endpoint> + Send + Sync>;

/// One actual argument
pub enum Arg<'a> {
    /// Explicitly nothing; fills a position without counting as present
    Undefined,
    Batch(&'a mut Batch),
    Endpoint(Endpoint),
    Value(Value),
    /// Pre-serialized JSON body
    Raw(String),
    Factory(EndpointFactory),
    Callback(Completion),
}

/// Coarse kind of an argument, as a dynamic `typeof` would see it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Undefined,
    String,
    Number,
    Boolean,
    /// Maps, lists, null, batches, endpoints and raw bodies
    Object,
    /// Factories and callbacks
    Function,
}

/// Structural kind of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Batch,
    Endpoint,
    List,
    Map,
}

impl<'a> Arg<'a> {
    /// Fill a required batch position with the caller's batch, if any.
    ///
    /// Public operations take their batch as an optional leading argument
    /// that callers leave out entirely. An `Undefined` there would still
    /// occupy a position, so this is only for shapes where `batch` is required.
    pub(crate) fn batch_slot(batch: Option<&'a mut Batch>) -> Self {
        batch.map_or(Arg::Undefined, Arg::Batch)
    }
}

impl Arg<'_> {
    pub fn arg_type(&self) -> ArgType {
        match self {
            Arg::Undefined => ArgType::Undefined,
            Arg::Value(Value::String(_)) => ArgType::String,
            Arg::Value(Value::Number(_)) => ArgType::Number,
            Arg::Value(Value::Bool(_)) => ArgType::Boolean,
            Arg::Value(_) | Arg::Batch(_) | Arg::Endpoint(_) | Arg::Raw(_) => ArgType::Object,
            Arg::Factory(_) | Arg::Callback(_) => ArgType::Function,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        matches!(
            (capability, self),
            (Capability::Batch, Arg::Batch(_))
                | (Capability::Endpoint, Arg::Endpoint(_))
                | (Capability::List, Arg::Value(Value::Array(_)))
                | (Capability::Map, Arg::Value(Value::Object(_)))
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            Arg::Undefined => "undefined",
            Arg::Batch(_) => "batch",
            Arg::Endpoint(_) => "endpoint",
            Arg::Value(_) => "value",
            Arg::Raw(_) => "raw body",
            Arg::Factory(_) => "endpoint factory",
            Arg::Callback(_) => "callback",
        }
    }
}

impl fmt::Debug for Arg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Endpoint(endpoint) => write!(f, "Endpoint({})", endpoint),
            Arg::Value(value) => write!(f, "Value({})", value),
            Arg::Raw(content) => write!(f, "Raw({})", content),
            other => f.write_str(other.kind()),
        }
    }
}

impl<'a> From<&'a mut Batch> for Arg<'a> {
    fn from(batch: &'a mut Batch) -> Self {
        Arg::Batch(batch)
    }
}

impl From<Endpoint> for Arg<'_> {
    fn from(endpoint: Endpoint) -> Self {
        Arg::Endpoint(endpoint)
    }
}

impl From<Value> for Arg<'_> {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Option<Value>> for Arg<'_> {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Arg::Undefined, Arg::Value)
    }
}

impl From<Map<String, Value>> for Arg<'_> {
    fn from(map: Map<String, Value>) -> Self {
        Arg::Value(Value::Object(map))
    }
}

impl From<Vec<Value>> for Arg<'_> {
    fn from(list: Vec<Value>) -> Self {
        Arg::Value(Value::Array(list))
    }
}

impl From<&str> for Arg<'_> {
    fn from(s: &str) -> Self {
        Arg::Value(Value::String(s.to_string()))
    }
}

impl From<String> for Arg<'_> {
    fn from(s: String) -> Self {
        Arg::Value(Value::String(s))
    }
}

impl From<bool> for Arg<'_> {
    fn from(b: bool) -> Self {
        Arg::Value(Value::Bool(b))
    }
}

impl From<i64> for Arg<'_> {
    fn from(n: i64) -> Self {
        Arg::Value(Value::from(n))
    }
}

impl From<i32> for Arg<'_> {
    fn from(n: i32) -> Self {
        Arg::Value(Value::from(n))
    }
}

impl From<u64> for Arg<'_> {
    fn from(n: u64) -> Self {
        Arg::Value(Value::from(n))
    }
}

impl From<usize> for Arg<'_> {
    fn from(n: usize) -> Self {
        Arg::Value(Value::from(n))
    }
}

impl From<f64> for Arg<'_> {
    fn from(n: f64) -> Self {
        Arg::Value(Value::from(n))
    }
}

impl From<Payload> for Arg<'_> {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Json(value) => Arg::Value(value),
            Payload::Raw(content) => Arg::Raw(content),
        }
    }
}

impl From<EndpointFactory> for Arg<'_> {
    fn from(factory: EndpointFactory) -> Self {
        Arg::Factory(factory)
    }
}

impl From<Completion> for Arg<'_> {
    fn from(callback: Completion) -> Self {
        Arg::Callback(callback)
    }
}

/// Build an argument list, converting each element with `Arg::from`
///
/// ```
/// use neo4j_rest::{args, Arg};
/// use serde_json::json;
///
/// let list: Vec<Arg> = args!["name", json!("Alice")];
/// assert_eq!(list.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),+]
    };
}

/// Declarative description of one parameter position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub optional: bool,
    pub arg_type: Option<ArgType>,
    pub not_type: Option<ArgType>,
    pub capability: Option<Capability>,
    pub not_capability: Option<Capability>,
    /// Not considered when the named earlier parameter is present
    pub mutex: Option<&'static str>,
    /// Only considered when the named earlier parameter is present
    pub requires: Option<&'static str>,
    /// Becomes mandatory when the named earlier parameter is present
    pub required_by: Option<&'static str>,
}

impl ParamSpec {
    /// A mandatory parameter accepting anything
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            optional: false,
            arg_type: None,
            not_type: None,
            capability: None,
            not_capability: None,
            mutex: None,
            requires: None,
            required_by: None,
        }
    }

    pub const fn optional(self) -> Self {
        Self { optional: true, ..self }
    }

    pub const fn of_type(self, arg_type: ArgType) -> Self {
        Self { arg_type: Some(arg_type), ..self }
    }

    pub const fn not_type(self, arg_type: ArgType) -> Self {
        Self { not_type: Some(arg_type), ..self }
    }

    pub const fn capable(self, capability: Capability) -> Self {
        Self { capability: Some(capability), ..self }
    }

    pub const fn not_capable(self, capability: Capability) -> Self {
        Self { not_capability: Some(capability), ..self }
    }

    pub const fn mutex(self, other: &'static str) -> Self {
        Self { mutex: Some(other), ..self }
    }

    pub const fn requires(self, other: &'static str) -> Self {
        Self { requires: Some(other), ..self }
    }

    pub const fn required_by(self, other: &'static str) -> Self {
        Self { required_by: Some(other), ..self }
    }

    /// Declared optional, or optional by carrying a relation
    pub const fn is_optional(&self) -> bool {
        self.optional || self.mutex.is_some() || self.requires.is_some() || self.required_by.is_some()
    }

    fn accepts(&self, arg: Option<&Arg<'_>>, record: &ArgumentRecord<'_>) -> bool {
        let arg_type = arg.map_or(ArgType::Undefined, Arg::arg_type);
        let has = |capability: Capability| arg.map_or(false, |a| a.has(capability));

        if self.arg_type.map_or(false, |t| t != arg_type) {
            return false;
        }
        if self.not_type.map_or(false, |t| t == arg_type) {
            return false;
        }
        if self.capability.map_or(false, |c| !has(c)) {
            return false;
        }
        if self.not_capability.map_or(false, has) {
            return false;
        }
        if self.mutex.map_or(false, |other| record.is_present(other)) {
            return false;
        }
        if self.requires.map_or(false, |other| !record.is_present(other)) {
            return false;
        }
        true
    }
}

/// Canonical outcome of a resolution: every declared name, in shape order,
/// with its value or an explicit absence
#[derive(Debug, Default)]
pub struct ArgumentRecord<'a> {
    entries: Vec<(&'static str, Option<Arg<'a>>)>,
}

impl<'a> ArgumentRecord<'a> {
    fn set(&mut self, name: &'static str, arg: Option<Arg<'a>>) {
        let arg = arg.filter(|a| !matches!(a, Arg::Undefined));
        self.entries.push((name, arg));
    }

    /// Declared names in shape order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Arg<'a>> {
        self.entries.iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, arg)| arg.as_ref())
    }

    /// Move a value out; it reads as absent afterwards
    pub fn take(&mut self, name: &str) -> Option<Arg<'a>> {
        self.entries.iter_mut()
            .find(|(n, _)| *n == name)
            .and_then(|(_, arg)| arg.take())
    }

    fn mismatch(name: &str, expected: &str, found: &Arg<'_>) -> RestError {
        RestError::Argument(format!("'{}' must be {}, got {}", name, expected, found.kind()))
    }

    pub fn batch(&mut self, name: &str) -> RestResult<Option<&'a mut Batch>> {
        match self.take(name) {
            None => Ok(None),
            Some(Arg::Batch(batch)) => Ok(Some(batch)),
            Some(other) => Err(Self::mismatch(name, "a batch", &other)),
        }
    }

    pub fn endpoint(&mut self, name: &str) -> RestResult<Option<Endpoint>> {
        match self.take(name) {
            None => Ok(None),
            Some(Arg::Endpoint(endpoint)) => Ok(Some(endpoint)),
            Some(other) => Err(Self::mismatch(name, "an endpoint", &other)),
        }
    }

    pub fn value(&mut self, name: &str) -> RestResult<Option<Value>> {
        match self.take(name) {
            None => Ok(None),
            Some(Arg::Value(value)) => Ok(Some(value)),
            Some(other) => Err(Self::mismatch(name, "a JSON value", &other)),
        }
    }

    pub fn string(&mut self, name: &str) -> RestResult<Option<String>> {
        match self.value(name)? {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(RestError::Argument(format!("'{}' must be a string, got {}", name, other))),
        }
    }

    pub fn bool(&mut self, name: &str) -> RestResult<Option<bool>> {
        match self.value(name)? {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(RestError::Argument(format!("'{}' must be a boolean, got {}", name, other))),
        }
    }

    pub fn count(&mut self, name: &str) -> RestResult<Option<usize>> {
        match self.value(name)? {
            None => Ok(None),
            Some(value) => value.as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| RestError::Argument(format!("'{}' must be a non-negative integer, got {}", name, value))),
        }
    }

    pub fn list(&mut self, name: &str) -> RestResult<Option<Vec<Value>>> {
        match self.value(name)? {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(RestError::Argument(format!("'{}' must be a list, got {}", name, other))),
        }
    }

    pub fn map(&mut self, name: &str) -> RestResult<Option<Map<String, Value>>> {
        match self.value(name)? {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(RestError::Argument(format!("'{}' must be an object, got {}", name, other))),
        }
    }

    /// A request body: JSON (null meaning none) or pre-serialized
    pub fn payload(&mut self, name: &str) -> RestResult<Option<Payload>> {
        match self.take(name) {
            None => Ok(None),
            Some(Arg::Value(value)) => Ok(Payload::from_value(value)),
            Some(Arg::Raw(content)) => Ok(Some(Payload::Raw(content))),
            Some(other) => Err(Self::mismatch(name, "a request body", &other)),
        }
    }

    pub fn factory(&mut self, name: &str) -> RestResult<Option<EndpointFactory>> {
        match self.take(name) {
            None => Ok(None),
            Some(Arg::Factory(factory)) => Ok(Some(factory)),
            Some(other) => Err(Self::mismatch(name, "an endpoint factory", &other)),
        }
    }

    pub fn callback(&mut self, name: &str) -> RestResult<Option<Completion>> {
        match self.take(name) {
            None => Ok(None),
            Some(Arg::Callback(callback)) => Ok(Some(callback)),
            Some(other) => Err(Self::mismatch(name, "a callback", &other)),
        }
    }
}

/// Match actual arguments against a shape.
///
/// `deficit` is how many declared parameters have no argument. A parameter
/// the next argument does not fit is skipped while fewer than `deficit`
/// parameters have been skipped and nothing marks it as required; otherwise
/// the call is rejected. An optional parameter that does fit is only taken
/// while enough optional parameters remain to absorb the deficit.
pub fn resolve<'a>(args: Vec<Arg<'a>>, shape: &[ParamSpec]) -> RestResult<ArgumentRecord<'a>> {
    let optional = shape.iter().filter(|p| p.is_optional()).count() as isize;
    let deficit = shape.len() as isize - args.len() as isize;

    if deficit > optional {
        return Err(RestError::Argument(format!(
            "not enough arguments provided: got {}, need at least {}",
            args.len(),
            shape.len() as isize - optional,
        )));
    }

    let mut args: Vec<Option<Arg<'a>>> = args.into_iter().map(Some).collect();
    let mut record = ArgumentRecord::default();
    let mut included = 0isize;
    let mut skipped = 0isize;
    let mut cursor = 0usize;

    for spec in shape {
        let candidate = args.get(cursor).and_then(Option::as_ref);

        if !spec.accepts(candidate, &record) {
            let forced = spec.required_by.map_or(false, |other| record.is_present(other));
            if spec.is_optional() && skipped < deficit && !forced {
                record.set(spec.name, None);
                skipped += 1;
                continue;
            }

            return Err(RestError::Argument(match candidate {
                Some(arg) => format!("argument {} ({:?}) does not fit parameter '{}'", cursor, arg, spec.name),
                None => format!("missing argument for parameter '{}'", spec.name),
            }));
        }

        if spec.is_optional() {
            if optional - included > deficit {
                included += 1;
            } else {
                skipped += 1;
                record.set(spec.name, None);
                continue;
            }
        }

        let arg = args.get_mut(cursor).and_then(Option::take);
        record.set(spec.name, arg);
        cursor += 1;
    }

    Ok(record)
}
