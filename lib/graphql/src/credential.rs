//! Credential shape and the host-provided credential store.
//!
//! A credential is either a tenant API token sent as Basic authorization or
//! an email/password pair that is exchanged for session tokens. Session
//! tokens obtained at runtime are written back through [`CredentialStore`].

use crate::error::{ClientError, CredentialError};
use crate::operation::LoginInput;
use crate::session::SessionTokens;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;

/// Endpoint used when a credential does not name one.
pub const DEFAULT_ENDPOINT: &str = "https://app.umsatz.io/api/graphql";

/// How requests are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
    /// A static tenant API token.
    #[default]
    BasicToken,
    /// Email and password exchanged for session tokens.
    EmailPassword,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BasicToken => write!(f, "basicToken"),
            Self::EmailPassword => write!(f, "emailPassword"),
        }
    }
}

/// A Umsatz.io API credential.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// GraphQL endpoint; blank means [`DEFAULT_ENDPOINT`].
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, alias = "auth_mode")]
    pub auth_mode: AuthMode,
    /// Tenant API token, optionally already prefixed with `Basic `.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Session access token from an earlier login.
    #[serde(default, alias = "access_token")]
    pub access_token: Option<String>,
    /// Session refresh token from an earlier login.
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
    /// Last observed viewer role, informational only.
    #[serde(default)]
    pub role: Option<String>,
}

impl Credential {
    /// Creates a token credential against the default endpoint.
    #[must_use]
    pub fn basic_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Creates an email/password credential against the default endpoint.
    #[must_use]
    pub fn email_password(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth_mode: AuthMode::EmailPassword,
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Seeds the credential with tokens from an earlier session.
    #[must_use]
    pub fn with_session(mut self, tokens: SessionTokens) -> Self {
        self.access_token = Some(tokens.access_token);
        self.refresh_token = tokens.refresh_token;
        self
    }

    /// Returns the configured endpoint, or the default when blank.
    #[must_use]
    pub fn resolved_endpoint(&self) -> &str {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            endpoint
        }
    }

    /// Returns the Basic authorization for a token credential.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` if the token is blank.
    pub fn basic_authorization(&self) -> Result<BasicAuthorization, ClientError> {
        BasicAuthorization::from_token(&self.token).ok_or(ClientError::MissingCredential {
            auth_mode: AuthMode::BasicToken,
            field: "token",
        })
    }

    /// Returns true if the credential carries both email and password.
    #[must_use]
    pub fn can_login(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.trim().is_empty()
    }

    /// Returns the login mutation input.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` naming the blank field.
    pub fn login_input(&self) -> Result<LoginInput, ClientError> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(ClientError::MissingCredential {
                auth_mode: AuthMode::EmailPassword,
                field: "email",
            });
        }
        let password = self.password.trim();
        if password.is_empty() {
            return Err(ClientError::MissingCredential {
                auth_mode: AuthMode::EmailPassword,
                field: "password",
            });
        }
        Ok(LoginInput {
            email: email.to_string(),
            password: password.to_string(),
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("endpoint", &self.resolved_endpoint())
            .field("auth_mode", &self.auth_mode)
            .field("token", &redacted(&self.token))
            .field("email", &self.email)
            .field("password", &redacted(&self.password))
            .field("access_token", &self.access_token.as_deref().map(redacted))
            .field("refresh_token", &self.refresh_token.as_deref().map(redacted))
            .field("role", &self.role)
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "[REDACTED]" }
}

/// Header values derived from a tenant API token.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuthorization {
    /// Value of the `Authorization` header, always `Basic <token>`.
    pub header_value: String,
    /// The bare token, sent as `x-tenant-api-key`.
    pub raw_token: String,
}

impl BasicAuthorization {
    /// Normalizes a token that may or may not carry a `Basic ` prefix.
    ///
    /// Returns `None` for a blank token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let prefixed = token
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("basic "));
        let raw_token = if prefixed { token[6..].trim() } else { token };
        if raw_token.is_empty() {
            return None;
        }
        Some(Self {
            header_value: format!("Basic {raw_token}"),
            raw_token: raw_token.to_string(),
        })
    }
}

impl fmt::Debug for BasicAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthorization").finish_non_exhaustive()
    }
}

/// Host-provided storage for the credential and renewed session tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the current credential.
    async fn load(&self) -> Result<Credential, Report<CredentialError>>;

    /// Persists session tokens obtained by login or refresh.
    async fn store_session(&self, tokens: &SessionTokens) -> Result<(), Report<CredentialError>>;
}

/// A credential store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credential: RwLock<Credential>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(credential),
        }
    }

    /// Returns a copy of the stored credential.
    pub async fn snapshot(&self) -> Credential {
        self.credential.read().await.clone()
    }

    /// Replaces the stored credential, e.g. when the host resets it.
    pub async fn replace(&self, credential: Credential) {
        *self.credential.write().await = credential;
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self) -> Result<Credential, Report<CredentialError>> {
        Ok(self.snapshot().await)
    }

    async fn store_session(&self, tokens: &SessionTokens) -> Result<(), Report<CredentialError>> {
        let mut credential = self.credential.write().await;
        credential.access_token = Some(tokens.access_token.clone());
        credential.refresh_token = tokens.refresh_token.clone();
        Ok(())
    }
}
