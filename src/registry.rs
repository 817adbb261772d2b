//! Endpoint registry
//!
//! Maps the server's named endpoints ("node", "cypher", "batch", ...) to
//! concrete locations. The table is built once from the discovery document
//! and swapped in whole, so readers only ever see a complete table.

use crate::endpoint::Endpoint;
use crate::error::{RestError, RestResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Name under which the root URL itself is registered
pub const ROOT: &str = "root";

const VERSION_KEY: &str = "neo4j_version";
const EXTENSIONS_KEY: &str = "extensions";

/// A complete, immutable endpoint table
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    endpoints: HashMap<String, Endpoint>,
    base_path: String,
    version: Option<String>,
}

impl EndpointTable {
    /// A table holding only the root endpoint
    pub fn with_root(root: Endpoint) -> Self {
        let base_path = root.pathname().trim_end_matches('/').to_string();
        let mut endpoints = HashMap::new();
        endpoints.insert(ROOT.to_string(), root);

        Self {
            endpoints,
            base_path,
            version: None,
        }
    }

    /// Build a table from the root endpoint and the discovery document
    /// fetched from it.
    ///
    /// Every string entry becomes a named endpoint except the version, which
    /// is kept separately, and the extensions entry, which is skipped.
    /// Endpoints the server leaves out are derived afterwards.
    pub fn from_discovery(root: Endpoint, document: &Value) -> RestResult<Self> {
        let entries = document.as_object().ok_or_else(|| {
            RestError::Connect("discovery document is not a JSON object".to_string())
        })?;

        let mut table = Self::with_root(root);

        for (name, value) in entries {
            match name.as_str() {
                VERSION_KEY => {
                    table.version = value.as_str().map(str::to_string);
                }
                EXTENSIONS_KEY => {}
                _ => {
                    let Some(url) = value.as_str() else {
                        debug!("Skipping non-string discovery entry '{}'", name);
                        continue;
                    };
                    let endpoint = Endpoint::parse(url).map_err(|e| {
                        RestError::Connect(format!("bad endpoint '{}' in discovery document: {}", name, e))
                    })?;
                    table.endpoints.insert(name.clone(), endpoint);
                }
            }
        }

        table.derive_missing();
        Ok(table)
    }

    /// The server omits the relationship endpoint, and the auto-index
    /// endpoints have to be built from the manual index ones.
    fn derive_missing(&mut self) {
        self.derive("node", "relationship", "node", "relationship");
        self.derive("node_index", "node_auto", "node", "auto/node");
        self.derive("relationship_index", "relationship_auto", "relationship", "auto/relationship");
    }

    fn derive(&mut self, base: &str, name: &str, from: &str, to: &str) {
        if self.endpoints.contains_key(name) {
            return;
        }

        let derived = self.endpoints.get(base).and_then(|ep| ep.replace_trailing(from, to));
        if let Some(endpoint) = derived {
            debug!("Derived endpoint '{}' as {}", name, endpoint);
            self.endpoints.insert(name.to_string(), endpoint);
        }
    }

    /// Look up a named endpoint
    pub fn get(&self, name: &str) -> RestResult<&Endpoint> {
        self.endpoints.get(name)
            .ok_or_else(|| RestError::UnknownEndpoint(name.to_string()))
    }

    /// Root path without its trailing separator; stripped from every path
    /// sent inside a combined batch call
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Server version reported by the discovery document
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Names of all known endpoints
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Shared, atomically replaceable endpoint table
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    table: RwLock<Arc<EndpointTable>>,
}

impl EndpointRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The table as it is right now
    pub fn snapshot(&self) -> Arc<EndpointTable> {
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the whole table in one step
    pub fn replace(&self, table: EndpointTable) {
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(table);
    }

    /// Resolve a named endpoint
    pub fn resolve(&self, name: &str) -> RestResult<Endpoint> {
        self.snapshot().get(name).cloned()
    }

    /// Resolve a named endpoint and join `sub` onto its path
    pub fn resolve_with(&self, name: &str, sub: &str) -> RestResult<Endpoint> {
        Ok(self.snapshot().get(name)?.join(sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root() -> Endpoint {
        Endpoint::parse("http://h:7474/db/data/").unwrap()
    }

    #[test]
    fn test_derives_relationship_endpoint() {
        let doc = json!({
            "node": "http://h:7474/db/data/node",
            "cypher": "http://h:7474/db/data/cypher",
        });
        let table = EndpointTable::from_discovery(root(), &doc).unwrap();

        let rel = table.get("relationship").unwrap();
        assert_eq!(rel.href(), "http://h:7474/db/data/relationship");
        assert_eq!(table.get("cypher").unwrap().path(), "/db/data/cypher");
        assert_eq!(table.base_path(), "/db/data");
    }

    #[test]
    fn test_keeps_served_relationship_endpoint() {
        let doc = json!({
            "node": "http://h:7474/db/data/node",
            "relationship": "http://h:7474/db/data/rels",
        });
        let table = EndpointTable::from_discovery(root(), &doc).unwrap();
        assert_eq!(table.get("relationship").unwrap().path(), "/db/data/rels");
    }

    #[test]
    fn test_version_and_extensions() {
        let doc = json!({
            "node": "http://h:7474/db/data/node",
            "neo4j_version": "2.3.12",
            "extensions": { "GremlinPlugin": {} },
        });
        let table = EndpointTable::from_discovery(root(), &doc).unwrap();
        assert_eq!(table.version(), Some("2.3.12"));
        assert!(matches!(table.get("extensions"), Err(RestError::UnknownEndpoint(_))));
        assert!(matches!(table.get("neo4j_version"), Err(RestError::UnknownEndpoint(_))));
    }

    #[test]
    fn test_auto_index_endpoints() {
        let doc = json!({
            "node_index": "http://h:7474/db/data/index/node",
            "relationship_index": "http://h:7474/db/data/index/relationship",
        });
        let table = EndpointTable::from_discovery(root(), &doc).unwrap();
        assert_eq!(table.get("node_auto").unwrap().path(), "/db/data/index/auto/node");
        assert_eq!(
            table.get("relationship_auto").unwrap().path(),
            "/db/data/index/auto/relationship"
        );
        assert!(table.get("relationship").is_err());
    }

    #[test]
    fn test_rejects_non_object_document() {
        let err = EndpointTable::from_discovery(root(), &json!([1, 2])).unwrap_err();
        assert!(matches!(err, RestError::Connect(_)));
    }

    #[test]
    fn test_registry_resolve_and_replace() {
        let registry = EndpointRegistry::new();
        assert!(matches!(registry.resolve("node"), Err(RestError::UnknownEndpoint(_))));

        let doc = json!({ "node": "http://h:7474/db/data/node" });
        registry.replace(EndpointTable::from_discovery(root(), &doc).unwrap());

        let before = registry.snapshot();
        assert_eq!(registry.resolve_with("node", "12").unwrap().path(), "/db/data/node/12");

        let doc = json!({ "node": "http://other:7474/db/data/node" });
        let other_root = Endpoint::parse("http://other:7474/db/data/").unwrap();
        registry.replace(EndpointTable::from_discovery(other_root, &doc).unwrap());

        assert_eq!(registry.resolve("node").unwrap().host(), "other");
        // Snapshots taken earlier keep the table they were taken from
        assert_eq!(before.get("node").unwrap().host(), "h");
    }

    #[test]
    fn test_names() {
        let doc = json!({ "node": "http://h:7474/db/data/node", "batch": "http://h:7474/db/data/batch" });
        let table = EndpointTable::from_discovery(root(), &doc).unwrap();
        assert_eq!(table.names(), vec!["batch", "node", "relationship", "root"]);
    }
}
