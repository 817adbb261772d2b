//! The coordination handle
//!
//! `Api` owns the endpoint registry and the transport and exposes the
//! primitives everything else is built on: create a batch, create (and
//! possibly dispatch) a request, resolve an endpoint, bootstrap.

use crate::batch::Batch;
use crate::config::ClientConfig;
use crate::endpoint::{Credentials, Endpoint};
use crate::error::{RestError, RestResult};
use crate::registry::{EndpointRegistry, EndpointTable, ROOT};
use crate::request::{Completion, DeferredRequest, Payload, Target};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Summary of a completed bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    /// Server version from the discovery document
    pub version: Option<String>,
    /// Names of every endpoint now in the registry
    pub endpoints: Vec<String>,
}

struct ApiInner {
    registry: EndpointRegistry,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

/// Cheaply cloneable handle shared by batches, entities and the graph facade
#[derive(Clone)]
pub struct Api {
    inner: Arc<ApiInner>,
}

impl Api {
    /// Handle using the reqwest transport
    pub fn new(config: ClientConfig) -> RestResult<Self> {
        let transport = match &config.user_agent {
            Some(agent) => HttpTransport::with_user_agent(agent)?,
            None => HttpTransport::new()?,
        };
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Handle using a caller-provided transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ApiInner {
                registry: EndpointRegistry::new(),
                transport,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.inner.registry
    }

    /// Start a new, empty batch
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    /// Create a deferred request.
    ///
    /// With a batch the request is queued until the batch runs. Without one
    /// it is dispatched on the runtime right away; its completion fires when
    /// the response arrives.
    pub fn request(
        &self,
        batch: Option<&mut Batch>,
        target: impl Into<Target>,
        method: Method,
        body: Option<Payload>,
        completion: Completion,
    ) {
        let request = DeferredRequest::new(target.into(), method, body, completion);

        match batch {
            Some(batch) => batch.push(request),
            None => {
                let api = self.clone();
                tokio::spawn(async move { api.send(request).await });
            }
        }
    }

    /// Resolve a named endpoint
    pub fn resolve(&self, name: &str) -> RestResult<Endpoint> {
        self.inner.registry.resolve(name)
    }

    /// Resolve a named endpoint with `sub` joined onto its path
    pub fn resolve_with(&self, name: &str, sub: &str) -> RestResult<Endpoint> {
        self.inner.registry.resolve_with(name, sub)
    }

    /// Fetch the discovery document from `root_url` and replace the
    /// registry with the table built from it.
    ///
    /// May be called again to reconnect; the old table stays in place
    /// until the new one is complete.
    pub async fn bootstrap(&self, root_url: &str) -> RestResult<RootInfo> {
        let root = Endpoint::parse(root_url)
            .map_err(|e| RestError::Connect(e.to_string()))?;

        let document = self.dispatch(Method::Get, &root, None).await
            .map_err(|e| RestError::Connect(format!("discovery request to {} failed: {}", root, e)))?;

        let table = EndpointTable::from_discovery(root, &document)?;
        let info = RootInfo {
            version: table.version().map(str::to_string),
            endpoints: table.names(),
        };
        self.inner.registry.replace(table);

        info!(
            "Connected to {} (version {})",
            root_url,
            info.version.as_deref().unwrap_or("unknown")
        );
        Ok(info)
    }

    pub(crate) fn resolve_target(&self, target: &Target) -> RestResult<Endpoint> {
        match target {
            Target::Named(name) => self.resolve(name),
            Target::Resolved(endpoint) => Ok(endpoint.clone()),
        }
    }

    /// Perform a single request and complete it
    pub(crate) async fn send(&self, request: DeferredRequest) {
        let result = match self.resolve_target(&request.target) {
            Ok(endpoint) => self.dispatch(request.method, &endpoint, request.body.as_ref()).await,
            Err(e) => Err(e),
        };
        request.complete(result);
    }

    /// One HTTP call: serialize, execute, interpret
    pub(crate) async fn dispatch(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&Payload>,
    ) -> RestResult<Value> {
        let body = body.map(Payload::to_wire).transpose()?;
        let auth = endpoint.auth().cloned().or_else(|| self.root_auth());

        debug!("{} {}", method, endpoint);
        let request = HttpRequest::new(method, endpoint.clone(), body).with_auth(auth);
        let response = self.inner.transport.execute(request).await?;

        interpret(response)
    }

    fn root_auth(&self) -> Option<Credentials> {
        self.inner.registry.snapshot()
            .get(ROOT)
            .ok()
            .and_then(|root| root.auth().cloned())
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("url", &self.inner.config.url)
            .field("batch_errors", &self.inner.config.batch_errors)
            .finish_non_exhaustive()
    }
}

/// Turn a raw response into a body or an error.
///
/// A body that does not parse is a decode error whatever the status; a
/// status above 204 is an API error carrying whatever structured error
/// fields the body has.
pub(crate) fn interpret(response: HttpResponse) -> RestResult<Value> {
    let parsed = if response.body.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(&response.body)?)
    };

    if response.status > 204 {
        return Err(RestError::api(Some(response.status), parsed, "Unspecified neo4j API error"));
    }

    Ok(parsed.unwrap_or(Value::Null))
}
