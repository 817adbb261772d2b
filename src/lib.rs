//! Neo4j REST client
//!
//! Client-side access layer for a graph database exposed over the
//! HTTP/JSON REST interface. Operations run on their own, one network call
//! each, or are grouped into a `Batch` that goes out as a single call to
//! the server's batch endpoint.
//!
//! # Layers
//!
//! - **Endpoint registry**: symbolic names (`node`, `cypher`, `batch`, ...)
//!   discovered from the root document at connect time.
//! - **Deferred requests and batches**: one logical call each, executed
//!   alone or combined, with failures routed back to every waiting caller.
//! - **Auto-batch**: one operation over N inputs becomes N requests with a
//!   single callback and a result list in input order.
//! - **Argument resolver**: every public operation takes an optional
//!   leading batch and a loose tail of positional arguments.
//!
//! ## Example Usage
//!
//! ```no_run
//! use neo4j_rest::{args, Graph, PropertyContainer};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), neo4j_rest::RestError> {
//!     let graph = Graph::connect("http://localhost:7474/db/data/").await?;
//!
//!     // Two nodes, one network call
//!     let nodes = graph
//!         .create_node(args![vec![json!({ "name": "Alice" }), json!({ "name": "Bob" })]])
//!         .await?
//!         .into_vec();
//!
//!     // Explicit batch
//!     let mut batch = graph.create_batch();
//!     let knows = nodes[0].create_relationship_to(args![&mut batch, &nodes[1], "KNOWS"]);
//!     let renamed = nodes[1].set_properties(args![&mut batch, "name", "Robert"]);
//!     batch.run().await;
//!
//!     knows.await?;
//!     renamed.await?;
//!
//!     let result = graph.query(args!["MATCH (n) RETURN count(n) AS total"]).await?;
//!     println!("{:?}", result.rows());
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod args;
pub mod auto_batch;
pub mod batch;
pub mod config;
pub mod endpoint;
pub mod entity;
pub mod error;
pub mod graph;
pub mod index;
pub mod registry;
pub mod request;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use api::{Api, RootInfo};
pub use args::{resolve, Arg, ArgType, ArgumentRecord, Capability, EndpointFactory, ParamSpec};
pub use auto_batch::{auto_batch, AUTO_BATCH_SHAPE};
pub use batch::{Batch, BatchErrorHandler, BatchJob, BatchOutcome};
pub use config::{BatchErrorPolicy, ClientConfig};
pub use endpoint::{path_join, parse_id, Credentials, Endpoint};
pub use entity::{GraphValue, Node, OneOrMany, Path, PropertyContainer, Relationship};
pub use error::{RestError, RestResult};
pub use graph::{CypherResult, Graph};
pub use registry::{EndpointRegistry, EndpointTable};
pub use request::{Completer, Completion, DeferredRequest, Payload, Pending, Target};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
