//! Connector trait and related types.
//!
//! A connector exposes a service as named operations taking JSON
//! parameters, so hosts can drive it without knowing its client types.

use crate::error::ConnectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use umsatzio_core::Result;

/// Information about a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorInfo {
    /// Unique identifier for this connector type.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub description: String,
    /// Wire protocol, e.g. "graphql".
    pub protocol: String,
    pub operations: Vec<OperationInfo>,
    pub capabilities: Vec<ConnectorCapability>,
}

/// Information about an available operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Operation name, `resource.action`.
    pub name: String,
    pub description: String,
    /// Whether the operation only works with an email/password session.
    #[serde(default)]
    pub requires_session: bool,
}

impl OperationInfo {
    pub(crate) fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            requires_session: false,
        }
    }

    pub(crate) fn session_only(mut self) -> Self {
        self.requires_session = true;
        self
    }
}

/// Capabilities that a connector may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorCapability {
    /// Can read data from the service.
    Read,
    /// Can create data in the service.
    Write,
    /// Can update existing data.
    Update,
    /// Can delete data.
    Delete,
    /// Can register for event callbacks.
    Subscribe,
    /// Authenticates with a static API token.
    ApiToken,
    /// Authenticates with a renewable user session.
    Session,
}

/// An operation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// The operation name.
    pub name: String,
    /// Operation parameters.
    pub parameters: JsonValue,
}

impl Operation {
    /// Creates a new operation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: JsonValue::Object(Default::default()),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        if let JsonValue::Object(ref mut map) = self.parameters {
            map.insert(key.into(), value);
        }
        self
    }

    /// Sets all parameters at once.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }
}

/// The result of a successful operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Output data.
    pub data: JsonValue,
    /// Metadata about the operation.
    pub metadata: OperationMetadata,
}

/// Metadata about an operation execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Operation that produced the result.
    pub operation: String,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

impl OperationResult {
    #[must_use]
    pub fn new(data: JsonValue, metadata: OperationMetadata) -> Self {
        Self { data, metadata }
    }
}

/// Trait for integration connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns information about this connector.
    fn info(&self) -> ConnectorInfo;

    /// Executes an operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is unknown, its parameters are
    /// invalid, or the service call fails.
    async fn execute(&self, operation: Operation) -> Result<OperationResult, ConnectorError>;

    /// Checks whether the configured credential can reach the service.
    ///
    /// `Ok(false)` means the service answered but rejected the credential.
    async fn health_check(&self) -> Result<bool, ConnectorError>;

    /// Returns the list of supported capabilities.
    fn capabilities(&self) -> Vec<ConnectorCapability> {
        self.info().capabilities
    }

    /// Checks if this connector supports a specific capability.
    fn supports(&self, capability: ConnectorCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Looks up an operation by name.
    fn operation(&self, name: &str) -> Option<OperationInfo> {
        self.info().operations.into_iter().find(|op| op.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_builder() {
        let op = Operation::new("contact.getByEmail")
            .with_param("email", serde_json::json!("ada@example.com"))
            .with_param("limit", serde_json::json!(10));

        assert_eq!(op.name, "contact.getByEmail");
        if let JsonValue::Object(params) = op.parameters {
            assert_eq!(params.get("email"), Some(&serde_json::json!("ada@example.com")));
            assert_eq!(params.get("limit"), Some(&serde_json::json!(10)));
        } else {
            panic!("parameters should be an object");
        }
    }

    #[test]
    fn with_param_ignores_non_object_parameters() {
        let op = Operation::new("graphql.raw")
            .with_parameters(serde_json::json!(["x"]))
            .with_param("query", serde_json::json!("{ a }"));
        assert_eq!(op.parameters, serde_json::json!(["x"]));
    }

    #[test]
    fn connector_info_serde() {
        let info = ConnectorInfo {
            id: "umsatzio".to_string(),
            name: "Umsatz.io".to_string(),
            description: "CRM access via GraphQL".to_string(),
            protocol: "graphql".to_string(),
            operations: vec![OperationInfo::new("webhook.list", "List webhooks")],
            capabilities: vec![ConnectorCapability::Read, ConnectorCapability::ApiToken],
        };

        let json = serde_json::to_string(&info).expect("serialize");
        assert!(json.contains("\"api_token\""));
        let parsed: ConnectorInfo = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(info.id, parsed.id);
        assert_eq!(parsed.capabilities.len(), 2);
        assert_eq!(parsed.operations[0], info.operations[0]);
    }
}
