//! Error types for the GraphQL client.
//!
//! Errors are designed for layered context using rootcause:
//! - `ClientError`: every failure surfaced by `GraphqlClient::call`
//! - `CredentialError`: failures of the host-provided credential store

use crate::credential::AuthMode;
use crate::operation::GraphqlError;
use std::fmt;

/// Error code the API puts in `extensions.code` when a token is rejected.
pub const UNAUTHENTICATED_CODE: &str = "UNAUTHENTICATED";

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed credentials or request; never retried.
    Configuration,
    /// The viewer role is not allowed to use the integration; never retried.
    Authorization,
    /// The HTTP exchange failed after the retry budget was spent.
    Transport,
    /// The API answered with a GraphQL `errors` array.
    Graphql,
    /// The API answered with something that is not a usable GraphQL envelope.
    Protocol,
}

/// Errors from GraphQL client operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The request carried no query text.
    EmptyQuery,
    /// A value required by the credential's auth mode is missing.
    MissingCredential {
        auth_mode: AuthMode,
        field: &'static str,
    },
    /// A credential value cannot be sent as an HTTP header.
    InvalidHeader { header: &'static str },
    /// The credential store could not provide a credential.
    CredentialUnavailable { reason: String },
    /// The viewer role is on the deny list.
    AccessDenied { role: String },
    /// The role query succeeded but returned no role.
    RoleNotReturned,
    /// HTTP failure after retries, or a non-retryable HTTP status.
    Transport {
        /// HTTP status, absent for connection-level failures.
        status: Option<u16>,
        /// Response body (truncated) or the underlying error message.
        body: String,
        /// Number of attempts made.
        attempts: u32,
    },
    /// The response contained GraphQL errors.
    Graphql {
        /// Message of the first error.
        message: String,
        /// `extensions.code` of the first error.
        code: Option<String>,
        /// Dotted `path` of the first error.
        path: Option<String>,
        /// Every error the server returned.
        errors: Vec<GraphqlError>,
    },
    /// The response body could not be interpreted.
    InvalidResponse { reason: String },
}

impl ClientError {
    /// Builds a `Graphql` error from a non-empty `errors` array.
    ///
    /// Message, code and path are taken from the first error.
    #[must_use]
    pub fn from_graphql_errors(errors: Vec<GraphqlError>) -> Self {
        let first = errors.first();
        let message = first
            .map(|e| e.message.trim())
            .filter(|m| !m.is_empty())
            .unwrap_or("GraphQL error")
            .to_string();
        let code = first.and_then(GraphqlError::code).map(str::to_string);
        let path = first.and_then(GraphqlError::path_string);
        Self::Graphql {
            message,
            code,
            path,
            errors,
        }
    }

    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyQuery
            | Self::MissingCredential { .. }
            | Self::InvalidHeader { .. }
            | Self::CredentialUnavailable { .. } => ErrorKind::Configuration,
            Self::AccessDenied { .. } => ErrorKind::Authorization,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Graphql { .. } => ErrorKind::Graphql,
            Self::InvalidResponse { .. } | Self::RoleNotReturned => ErrorKind::Protocol,
        }
    }

    /// Returns true if the server rejected the presented credentials.
    ///
    /// A rejected session token is recoverable by refresh or login.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Self::Graphql { errors, .. } => errors
                .iter()
                .any(|e| e.code() == Some(UNAUTHENTICATED_CODE)),
            Self::Transport { status, body, .. } => {
                *status == Some(401) || body.contains(UNAUTHENTICATED_CODE)
            }
            _ => false,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyQuery => write!(f, "GraphQL query must not be empty"),
            Self::MissingCredential { auth_mode, field } => {
                write!(f, "missing credential '{field}' for auth mode {auth_mode}")
            }
            Self::InvalidHeader { header } => {
                write!(f, "credential value is not a valid '{header}' header")
            }
            Self::CredentialUnavailable { reason } => {
                write!(f, "credential unavailable: {reason}")
            }
            Self::AccessDenied { role } => write!(f, "access denied for role \"{role}\""),
            Self::RoleNotReturned => write!(f, "viewer role not returned"),
            Self::Transport {
                status: Some(status),
                body,
                attempts,
            } => write!(f, "HTTP {status} after {attempts} attempt(s): {body}"),
            Self::Transport {
                status: None,
                body,
                attempts,
            } => write!(f, "request failed after {attempts} attempt(s): {body}"),
            Self::Graphql {
                message,
                code,
                path,
                ..
            } => {
                write!(f, "{message}")?;
                if let Some(code) = code {
                    write!(f, " | code={code}")?;
                }
                if let Some(path) = path {
                    write!(f, " | path={path}")?;
                }
                Ok(())
            }
            Self::InvalidResponse { reason } => write!(f, "invalid GraphQL response: {reason}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Errors from the host credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No credential is configured.
    NotConfigured,
    /// Reading the credential failed.
    LoadFailed { reason: String },
    /// Persisting renewed session tokens failed.
    StoreFailed { reason: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "no credential configured"),
            Self::LoadFailed { reason } => write!(f, "failed to load credential: {reason}"),
            Self::StoreFailed { reason } => {
                write!(f, "failed to store session tokens: {reason}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graphql_error(value: serde_json::Value) -> GraphqlError {
        serde_json::from_value(value).expect("valid GraphQL error")
    }

    #[test]
    fn graphql_error_composes_message_code_and_path() {
        let err = ClientError::from_graphql_errors(vec![graphql_error(json!({
            "message": "Not found",
            "path": ["contact", 0, "id"],
            "extensions": {"code": "NOT_FOUND"}
        }))]);
        assert_eq!(err.to_string(), "Not found | code=NOT_FOUND | path=contact.0.id");
        assert_eq!(err.kind(), ErrorKind::Graphql);
    }

    #[test]
    fn graphql_error_defaults_message() {
        let err = ClientError::from_graphql_errors(vec![graphql_error(json!({}))]);
        assert_eq!(err.to_string(), "GraphQL error");
    }

    #[test]
    fn graphql_error_keeps_all_errors() {
        let err = ClientError::from_graphql_errors(vec![
            graphql_error(json!({"message": "first"})),
            graphql_error(json!({"message": "second"})),
        ]);
        match err {
            ClientError::Graphql {
                message, errors, ..
            } => {
                assert_eq!(message, "first");
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unauthenticated_code_is_auth_rejection() {
        let err = ClientError::from_graphql_errors(vec![graphql_error(json!({
            "message": "jwt expired",
            "extensions": {"code": "UNAUTHENTICATED"}
        }))]);
        assert!(err.is_auth_rejection());
    }

    #[test]
    fn http_401_is_auth_rejection() {
        let err = ClientError::Transport {
            status: Some(401),
            body: "unauthorized".to_string(),
            attempts: 1,
        };
        assert!(err.is_auth_rejection());

        let err = ClientError::Transport {
            status: Some(500),
            body: "oops".to_string(),
            attempts: 3,
        };
        assert!(!err.is_auth_rejection());
    }

    #[test]
    fn access_denied_is_not_auth_rejection() {
        let err = ClientError::AccessDenied {
            role: "TenantMember".to_string(),
        };
        assert!(!err.is_auth_rejection());
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(err.to_string().contains("TenantMember"));
    }

    #[test]
    fn transport_error_display() {
        let err = ClientError::Transport {
            status: None,
            body: "connection refused".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains("3 attempt(s)"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn missing_credential_is_configuration() {
        let err = ClientError::MissingCredential {
            auth_mode: AuthMode::BasicToken,
            field: "token",
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("basicToken"));
    }
}
