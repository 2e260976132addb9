//! Core types and utilities for the Umsatz.io integration.
//!
//! This crate provides the foundational pieces shared by the GraphQL client
//! and the integration operations: the rootcause-based `Result` alias,
//! strongly-typed CRM identifiers and the best-effort execution helper.

pub mod best_effort;
pub mod error;
pub mod id;

pub use best_effort::best_effort;
pub use error::Result;
pub use id::{
    ContactId, DealId, FieldId, FilterGroupId, FormId, NoteId, ParseIdError,
    PipelineId, StageId, WebhookId,
};
