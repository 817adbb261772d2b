//! Deferred requests and their completions
//!
//! A `DeferredRequest` describes one network call and carries the callback
//! that receives its outcome. `Pending<T>` is the awaitable end handed back
//! to callers of the public operations.

use crate::endpoint::Endpoint;
use crate::error::{RestError, RestResult};
use crate::transport::Method;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Callback receiving the parsed response body (or `Value::Null` when the
/// server sent none) or the error. Invoked at most once.
pub type Completion = Box<dyn FnOnce(RestResult<Value>) + Send + 'static>;

/// Where a request goes: a registry name resolved at dispatch time, or an
/// already concrete endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Named(String),
    Resolved(Endpoint),
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Named(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Named(name)
    }
}

impl From<Endpoint> for Target {
    fn from(endpoint: Endpoint) -> Self {
        Target::Resolved(endpoint)
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Serialized to JSON on the way out
    Json(Value),
    /// Already serialized; written to the wire verbatim
    Raw(String),
}

impl Payload {
    /// `None` for a JSON null, which means "no body"
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            other => Some(Payload::Json(other)),
        }
    }

    /// Wire form for a single call
    pub fn to_wire(&self) -> RestResult<String> {
        match self {
            Payload::Json(value) => Ok(serde_json::to_string(value)?),
            Payload::Raw(content) => Ok(content.clone()),
        }
    }

    /// JSON form for embedding in a combined batch call
    pub fn to_value(&self) -> RestResult<Value> {
        match self {
            Payload::Json(value) => Ok(value.clone()),
            Payload::Raw(content) => Ok(serde_json::from_str(content)?),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// One pending network operation
pub struct DeferredRequest {
    pub(crate) target: Target,
    pub(crate) method: Method,
    pub(crate) body: Option<Payload>,
    completion: Completion,
}

impl DeferredRequest {
    pub fn new(target: Target, method: Method, body: Option<Payload>, completion: Completion) -> Self {
        Self {
            target,
            method,
            body,
            completion,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn body(&self) -> Option<&Payload> {
        self.body.as_ref()
    }

    /// Hand the outcome to the completion. Consumes the request, so a
    /// completion can never fire twice.
    pub fn complete(self, result: RestResult<Value>) {
        (self.completion)(result)
    }
}

impl fmt::Debug for DeferredRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredRequest")
            .field("target", &self.target)
            .field("method", &self.method)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// Sending half of a `Pending`
pub struct Completer<T> {
    tx: oneshot::Sender<RestResult<T>>,
}

impl<T: Send + 'static> Completer<T> {
    pub fn complete(self, result: RestResult<T>) {
        // The receiver may have been dropped; nobody is waiting then
        let _ = self.tx.send(result);
    }

    /// A `Completion` that decodes the response body before completing
    pub fn completion<F>(self, decode: F) -> Completion
    where
        F: FnOnce(Value) -> RestResult<T> + Send + 'static,
    {
        Box::new(move |result: RestResult<Value>| self.complete(result.and_then(decode)))
    }
}

/// Awaitable outcome of a public operation.
///
/// Resolves to `RestError::Abandoned` when the underlying completion is
/// dropped without firing, e.g. because its batch was never run.
#[must_use = "a Pending does nothing unless awaited; its request may still need a Batch::run"]
pub struct Pending<T> {
    rx: oneshot::Receiver<RestResult<T>>,
}

impl<T: Send + 'static> Pending<T> {
    /// A linked `Completer`/`Pending` pair
    pub fn channel() -> (Completer<T>, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        (Completer { tx }, Pending { rx })
    }

    /// An already settled outcome
    pub fn ready(result: RestResult<T>) -> Self {
        let (completer, pending) = Self::channel();
        completer.complete(result);
        pending
    }

    pub fn failed(error: RestError) -> Self {
        Self::ready(Err(error))
    }

    /// Collapse the setup of an operation and its outcome into one `Pending`
    pub fn settle(setup: RestResult<Pending<T>>) -> Self {
        setup.unwrap_or_else(Self::failed)
    }
}

impl<T> Future for Pending<T> {
    type Output = RestResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(RestError::Abandoned),
        })
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}
