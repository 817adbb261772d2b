//! Batches of deferred requests
//!
//! A batch of one request is sent as that request. Two or more are packed
//! into a single POST to the server's `batch` endpoint; each entry carries
//! its position as a correlation id and results are routed back by id, not
//! by array position.

use crate::api::Api;
use crate::config::BatchErrorPolicy;
use crate::endpoint::Endpoint;
use crate::error::{RestError, RestResult};
use crate::registry::EndpointTable;
use crate::request::{DeferredRequest, Payload, Target};
use crate::transport::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Name of the server endpoint accepting combined calls
pub const BATCH_ENDPOINT: &str = "batch";

/// Handler taking over batch-level failures from the individual requests
pub type BatchErrorHandler = Box<dyn FnOnce(RestError) + Send + 'static>;

/// One entry of a combined call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: usize,
    pub method: Method,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// One entry of a combined response
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchOutcome {
    #[serde(default)]
    pub id: Option<usize>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub status: Option<u16>,
}

/// An ordered, single-use group of deferred requests.
///
/// Running consumes the batch. A batch dropped without running never sends
/// its requests and their completions never fire; that is the caller's
/// responsibility, and it is logged.
pub struct Batch {
    api: Api,
    requests: Vec<DeferredRequest>,
}

impl Batch {
    pub(crate) fn new(api: Api) -> Self {
        Self {
            api,
            requests: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, request: DeferredRequest) {
        self.requests.push(request);
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Submit every queued request. A batch-level failure is delivered to
    /// every request's completion.
    pub async fn run(self) {
        self.execute(None).await
    }

    /// Submit every queued request, routing a batch-level failure to
    /// `handler` alone. The individual completions are then dropped unfired.
    ///
    /// With a single queued request there is no batch-level failure: the
    /// request is sent on its own and its completion sees the outcome.
    pub async fn run_with_error_handler<F>(self, handler: F)
    where
        F: FnOnce(RestError) + Send + 'static,
    {
        self.execute(Some(Box::new(handler))).await
    }

    async fn execute(mut self, handler: Option<BatchErrorHandler>) {
        let requests = std::mem::take(&mut self.requests);
        let api = self.api.clone();

        match requests.len() {
            0 => {}
            1 => {
                for request in requests {
                    api.send(request).await;
                }
            }
            _ => run_combined(&api, requests, handler).await,
        }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if !self.requests.is_empty() {
            warn!("Batch dropped with {} requests that were never sent", self.requests.len());
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

/// Strip the connection's base path from an endpoint path
fn server_relative(endpoint: &Endpoint, table: &EndpointTable) -> String {
    let path = endpoint.path();
    path.strip_prefix(table.base_path()).unwrap_or(path).to_string()
}

async fn run_combined(api: &Api, requests: Vec<DeferredRequest>, handler: Option<BatchErrorHandler>) {
    let table = api.registry().snapshot();

    let mut submitted: Vec<Option<DeferredRequest>> = Vec::with_capacity(requests.len());
    let mut jobs = Vec::with_capacity(requests.len());

    for request in requests {
        let prepared = resolve_in(&table, &request.target).and_then(|endpoint| {
            let body = request.body.as_ref().map(Payload::to_value).transpose()?;
            Ok((endpoint, body))
        });

        match prepared {
            Ok((endpoint, body)) => {
                jobs.push(BatchJob {
                    id: submitted.len(),
                    method: request.method,
                    to: server_relative(&endpoint, &table),
                    body,
                });
                submitted.push(Some(request));
            }
            Err(e) => request.complete(Err(e)),
        }
    }

    match submitted.len() {
        0 => return,
        1 => {
            // A lone survivor goes out as a plain request
            if let Some(request) = submitted.pop().flatten() {
                api.send(request).await;
            }
            return;
        }
        _ => {}
    }

    debug!("Dispatching batch of {} requests", jobs.len());

    let outcome = submit(api, &table, &jobs).await;
    let policy = api.config().batch_errors;

    let results = match outcome.and_then(|results| check(results, jobs.len(), policy)) {
        Ok(results) => results,
        Err(error) => {
            match handler {
                Some(handler) => handler(error),
                None => {
                    for request in submitted.into_iter().flatten() {
                        request.complete(Err(error.clone()));
                    }
                }
            }
            return;
        }
    };

    for result in results {
        let request = result.id
            .and_then(|id| submitted.get_mut(id))
            .and_then(Option::take);

        match request {
            Some(request) => request.complete(Ok(result.body.unwrap_or(Value::Null))),
            None => warn!("Ignoring batch response entry with unmatched id {:?}", result.id),
        }
    }

    for request in submitted.into_iter().flatten() {
        request.complete(Err(RestError::Decode(
            "batch response has no entry for this request".to_string(),
        )));
    }
}

fn resolve_in(table: &EndpointTable, target: &Target) -> RestResult<Endpoint> {
    match target {
        Target::Named(name) => table.get(name).cloned(),
        Target::Resolved(endpoint) => Ok(endpoint.clone()),
    }
}

async fn submit(api: &Api, table: &EndpointTable, jobs: &[BatchJob]) -> RestResult<Vec<BatchOutcome>> {
    let endpoint = table.get(BATCH_ENDPOINT)?.clone();
    let body = Payload::Json(serde_json::to_value(jobs)?);

    let value = api.dispatch(Method::Post, &endpoint, Some(&body)).await?;
    serde_json::from_value(value)
        .map_err(|e| RestError::Decode(format!("batch response is not a result array: {}", e)))
}

/// Apply the batch failure policy to a combined response.
///
/// A response shorter than the submission is always a failure. Under
/// `LastEntry` only the final entry's status is consulted, so a failing
/// entry elsewhere in a full-length response passes unnoticed.
pub fn check(results: Vec<BatchOutcome>, submitted: usize, policy: BatchErrorPolicy) -> RestResult<Vec<BatchOutcome>> {
    let failed = |o: &BatchOutcome| o.status.map_or(false, |s| s > 204);

    let culprit = if results.len() < submitted {
        Some(results.last())
    } else {
        match policy {
            BatchErrorPolicy::LastEntry => results.last().filter(|o| failed(*o)).map(Some),
            BatchErrorPolicy::AnyEntry => results.iter().find(|o| failed(*o)).map(Some),
        }
    };

    let error = culprit.map(|entry| {
        RestError::api(
            entry.and_then(|o| o.status),
            entry.and_then(|o| o.body.clone()),
            "Unknown neo4j REST API error",
        )
    });

    match error {
        None => Ok(results),
        Some(error) => Err(error),
    }
}
