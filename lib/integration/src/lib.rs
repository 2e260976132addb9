//! Connector operations for the Umsatz.io CRM.
//!
//! This crate provides:
//!
//! - **Connector trait**: Common interface for named JSON operations
//! - **UmsatzConnector**: contacts, deals, pipelines, activities, notes,
//!   custom fields and webhooks on top of [`umsatzio_graphql::GraphqlClient`]
//! - **TtlCache**: Short-lived lookup caching owned by a connector instance

pub mod activity;
pub mod cache;
pub mod connector;
pub mod contact;
pub mod deal;
pub mod error;
pub mod fields;
pub mod filter;
pub mod note;
pub mod pipeline;
pub mod umsatzio;
pub mod webhook;

pub use activity::CallCategory;
pub use cache::TtlCache;
pub use connector::{
    Connector, ConnectorCapability, ConnectorInfo, Operation, OperationInfo, OperationMetadata,
    OperationResult,
};
pub use error::ConnectorError;
pub use fields::{FieldDescriptor, FieldKind, FieldKindMap, ServiceType};
pub use umsatzio::UmsatzConnector;
pub use webhook::{DealStageScope, DeleteRetry, Webhook, WebhookParams};
