//! Error types for the integration crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ConnectorError`: errors from connector operations, wrapping client
//!   failures together with the operation that issued them

use rootcause::prelude::Report;
use std::fmt;
use umsatzio_graphql::{ClientError, ErrorKind};

/// Errors from connector operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorError {
    /// Operation not supported.
    OperationNotSupported { operation: String },
    /// Invalid operation parameters.
    InvalidParameters { operation: String, reason: String },
    /// The operation needs a user session, not an API token.
    RequiresEmailPassword { operation: String },
    /// The GraphQL client failed.
    Api {
        operation: String,
        error: ClientError,
    },
}

impl ConnectorError {
    pub(crate) fn invalid(operation: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns the client error kind for `Api` errors.
    #[must_use]
    pub fn client_error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Api { error, .. } => Some(error.kind()),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperationNotSupported { operation } => {
                write!(f, "operation not supported: {operation}")
            }
            Self::InvalidParameters { operation, reason } => {
                write!(f, "invalid parameters for '{operation}': {reason}")
            }
            Self::RequiresEmailPassword { operation } => {
                write!(
                    f,
                    "'{operation}' requires email and password authentication; API tokens cannot access filter groups"
                )
            }
            Self::Api { operation, error } => {
                write!(f, "'{operation}' failed: {error}")
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Wraps a client failure with the operation that issued the call.
pub(crate) fn api_error(operation: &str) -> impl FnOnce(Report<ClientError>) -> Report<ConnectorError> {
    move |err| {
        ConnectorError::Api {
            operation: operation.to_string(),
            error: err.current_context().clone(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_error_display() {
        let err = ConnectorError::invalid("contact.update", "No fields provided to update.");
        assert!(err.to_string().contains("contact.update"));
        assert!(err.to_string().contains("No fields provided"));
    }

    #[test]
    fn api_error_exposes_kind() {
        let err = ConnectorError::Api {
            operation: "webhook.list".to_string(),
            error: ClientError::AccessDenied {
                role: "TenantSupport".to_string(),
            },
        };
        assert_eq!(err.client_error_kind(), Some(ErrorKind::Authorization));
        assert!(err.to_string().contains("TenantSupport"));
    }
}
