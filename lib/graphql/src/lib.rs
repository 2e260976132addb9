//! Authenticated GraphQL client for the Umsatz.io CRM API.
//!
//! This crate provides:
//! - [`GraphqlClient`]: token or email/password authenticated calls with
//!   session renewal, viewer-role gating and 429/connection retry
//! - [`GraphqlOperation`]: typed operations over the raw envelope
//! - [`CredentialStore`]: the host seam for loading credentials and
//!   persisting renewed session tokens

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod jwt;
pub mod operation;
pub mod retry;
pub mod role;
pub mod session;
mod transport;

pub use client::GraphqlClient;
pub use config::ClientConfig;
pub use credential::{
    AuthMode, BasicAuthorization, Credential, CredentialStore, DEFAULT_ENDPOINT,
    InMemoryCredentialStore,
};
pub use error::{ClientError, CredentialError, ErrorKind};
pub use operation::{
    GraphqlError, GraphqlErrorLocation, GraphqlOperation, GraphqlPathSegment, GraphqlRequest,
    GraphqlResponse, JsonMap, NoVariables, unwrap_data,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use role::{DENIED_ROLES, ViewerRole};
pub use session::SessionTokens;
