//! Client configuration

use serde::{Deserialize, Serialize};

/// How a combined batch response is judged to have failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchErrorPolicy {
    /// Only the final response entry's status is inspected. A failing entry
    /// in the middle of the array goes unnoticed unless the array is short.
    #[default]
    LastEntry,
    /// Every response entry's status is inspected.
    AnyEntry,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Root discovery URL, optionally with basic-auth credentials embedded
    pub url: String,
    /// Failure detection for combined batch calls
    #[serde(default)]
    pub batch_errors: BatchErrorPolicy,
    /// User agent sent with every request
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474/db/data/".to_string(),
            batch_errors: BatchErrorPolicy::LastEntry,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    /// Configuration for the given root URL with default settings
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Switch the batch failure policy
    pub fn with_batch_errors(mut self, policy: BatchErrorPolicy) -> Self {
        self.batch_errors = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "http://localhost:7474/db/data/");
        assert_eq!(config.batch_errors, BatchErrorPolicy::LastEntry);
        assert!(config.user_agent.is_none());
    }

    #[test]
    fn test_config_from_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{ "url": "http://db:7474/db/data/", "batch_errors": "any_entry" }"#,
        ).unwrap();
        assert_eq!(config.url, "http://db:7474/db/data/");
        assert_eq!(config.batch_errors, BatchErrorPolicy::AnyEntry);

        let config: ClientConfig = serde_json::from_str(r#"{ "url": "http://db/" }"#).unwrap();
        assert_eq!(config.batch_errors, BatchErrorPolicy::LastEntry);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::from_url("http://h:7474/db/data/")
            .with_batch_errors(BatchErrorPolicy::AnyEntry);
        assert_eq!(config.batch_errors, BatchErrorPolicy::AnyEntry);
    }
}
