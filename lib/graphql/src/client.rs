//! Authenticated GraphQL client.
//!
//! Token credentials are sent as Basic authorization on every call.
//! Email/password credentials go through a session: the client holds an
//! access token, renews it by refresh or login when it is missing or about to
//! expire, checks the viewer role before each call, and retries once with a
//! renewed token when a held token is rejected.

use crate::config::ClientConfig;
use crate::credential::{AuthMode, BasicAuthorization, Credential, CredentialStore};
use crate::error::{ClientError, ErrorKind};
use crate::operation::{
    AccountData, AccountQuery, GraphqlOperation, GraphqlRequest, JsonMap, LoginData,
    LoginMutation, LoginVariables, NoVariables, PingQuery, RefreshData, RefreshMutation,
    RefreshVariables, unwrap_data,
};
use crate::role::ViewerRole;
use crate::session::{SessionState, SessionTokens, TokenSource};
use crate::transport::Transport;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use umsatzio_core::best_effort;

/// GraphQL client for the Umsatz.io API.
///
/// Cloning is cheap; clones share session state.
#[derive(Clone)]
pub struct GraphqlClient {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    transport: Transport,
    config: ClientConfig,
    session: Mutex<SessionState>,
}

impl std::fmt::Debug for GraphqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl GraphqlClient {
    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(store: Arc<dyn CredentialStore>) -> Result<Self, Report<ClientError>> {
        Self::with_config(store, ClientConfig::default())
    }

    /// Creates a client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_config(
        store: Arc<dyn CredentialStore>,
        config: ClientConfig,
    ) -> Result<Self, Report<ClientError>> {
        let transport = Transport::new(&config)?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                transport,
                config,
                session: Mutex::new(SessionState::default()),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the auth mode of the current credential.
    ///
    /// # Errors
    ///
    /// Returns `CredentialUnavailable` if the store fails.
    pub async fn auth_mode(&self) -> Result<AuthMode, Report<ClientError>> {
        Ok(self.load_credential().await?.auth_mode)
    }

    /// Returns the session tokens currently held, if any.
    pub async fn session_tokens(&self) -> Option<SessionTokens> {
        self.inner.session.lock().await.tokens()
    }

    /// Returns the last viewer role observed by the role gate.
    pub async fn viewer_role(&self) -> Option<ViewerRole> {
        self.inner.session.lock().await.role().cloned()
    }

    /// Executes a GraphQL request and returns its `data` object.
    ///
    /// # Errors
    ///
    /// See [`ClientError`] for the possible failure kinds.
    #[instrument(
        skip(self, request),
        fields(operation = request.operation_name().unwrap_or("anonymous"))
    )]
    pub async fn call(&self, request: &GraphqlRequest) -> Result<JsonMap, Report<ClientError>> {
        if request.query().trim().is_empty() {
            return Err(ClientError::EmptyQuery.into());
        }
        let request = request.normalized();
        let credential = self.load_credential().await?;
        let endpoint = credential.resolved_endpoint();

        match credential.auth_mode {
            AuthMode::BasicToken => {
                let auth = credential.basic_authorization()?;
                let headers = basic_headers(&auth)?;
                self.inner.transport.post(endpoint, &headers, &request).await
            }
            AuthMode::EmailPassword => self.call_with_session(&credential, &request).await,
        }
    }

    /// Executes a request and deserializes `data` into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call), plus `InvalidResponse` on a shape mismatch.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        request: &GraphqlRequest,
    ) -> Result<T, Report<ClientError>> {
        let data = self.call(request).await?;
        Ok(unwrap_data(data)?)
    }

    /// Executes a typed operation.
    ///
    /// # Errors
    ///
    /// Same as [`call_as`](Self::call_as).
    pub async fn execute<O: GraphqlOperation>(
        &self,
        variables: &O::Variables,
    ) -> Result<O::ResponseData, Report<ClientError>> {
        self.call_as(&O::request(variables)).await
    }

    /// Verifies the credential with a minimal query.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call).
    pub async fn ping(&self) -> Result<(), Report<ClientError>> {
        self.execute::<PingQuery>(&NoVariables {}).await?;
        Ok(())
    }

    async fn load_credential(&self) -> Result<Credential, Report<ClientError>> {
        self.inner.store.load().await.map_err(|e| {
            ClientError::CredentialUnavailable {
                reason: e.current_context().to_string(),
            }
            .into()
        })
    }

    async fn call_with_session(
        &self,
        credential: &Credential,
        request: &GraphqlRequest,
    ) -> Result<JsonMap, Report<ClientError>> {
        let (token, source) = self.access_token(credential).await?;
        match self.gated_call(credential, &token, request).await {
            Err(err)
                if source == TokenSource::Cached && err.current_context().is_auth_rejection() =>
            {
                debug!(error = %err.current_context(), "held access token rejected, renewing session");
                let token = self.recover(credential, &token).await?;
                self.gated_call(credential, &token, request).await
            }
            result => result,
        }
    }

    /// Returns a usable access token, renewing the session if needed.
    async fn access_token(
        &self,
        credential: &Credential,
    ) -> Result<(String, TokenSource), Report<ClientError>> {
        let mut session = self.inner.session.lock().await;
        if session.seed(credential) {
            debug!(auth_mode = %credential.auth_mode, "session seeded from stored credential");
        }
        if let Some(token) = session.usable_access_token(self.inner.config.token_expiry_skew()) {
            return Ok((token.to_string(), TokenSource::Cached));
        }
        let token = self.renew(&mut session, credential).await?;
        Ok((token, TokenSource::Renewed))
    }

    /// Renews after `rejected` was refused, unless another call already did.
    async fn recover(
        &self,
        credential: &Credential,
        rejected: &str,
    ) -> Result<String, Report<ClientError>> {
        let mut session = self.inner.session.lock().await;
        if let Some(current) = session.usable_access_token(self.inner.config.token_expiry_skew())
            && current != rejected
        {
            return Ok(current.to_string());
        }
        self.renew(&mut session, credential).await
    }

    async fn renew(
        &self,
        session: &mut MutexGuard<'_, SessionState>,
        credential: &Credential,
    ) -> Result<String, Report<ClientError>> {
        let endpoint = credential.resolved_endpoint();
        let tokens = match session.refresh_token().map(str::to_string) {
            Some(refresh_token) => match self.refresh(endpoint, refresh_token).await {
                Ok(tokens) => tokens,
                Err(err) if refresh_rejected(err.current_context()) && credential.can_login() => {
                    warn!(error = %err.current_context(), "refresh rejected, logging in again");
                    self.login(endpoint, credential).await?
                }
                Err(err) => return Err(err),
            },
            None => self.login(endpoint, credential).await?,
        };

        session.replace(tokens);
        let Some(tokens) = session.tokens() else {
            return Err(ClientError::InvalidResponse {
                reason: "session renewal returned no access token".to_string(),
            }
            .into());
        };
        if best_effort("store_session", self.inner.store.store_session(&tokens))
            .await
            .is_some()
        {
            session.mark_written(&tokens);
        }
        Ok(tokens.access_token)
    }

    #[instrument(skip_all)]
    async fn login(
        &self,
        endpoint: &str,
        credential: &Credential,
    ) -> Result<SessionTokens, Report<ClientError>> {
        let variables = LoginVariables {
            input: credential.login_input()?,
        };
        let data = self
            .inner
            .transport
            .post(endpoint, &HeaderMap::new(), &LoginMutation::request(&variables))
            .await?;
        let tokens = unwrap_data::<LoginData>(data)?.login;
        let tokens = require_access_token(tokens, "login")?;
        info!("logged in with email and password");
        Ok(tokens)
    }

    #[instrument(skip_all)]
    async fn refresh(
        &self,
        endpoint: &str,
        refresh_token: String,
    ) -> Result<SessionTokens, Report<ClientError>> {
        let request = RefreshMutation::request(&RefreshVariables { refresh_token });
        let data = self
            .inner
            .transport
            .post(endpoint, &HeaderMap::new(), &request)
            .await?;
        let tokens = unwrap_data::<RefreshData>(data)?.refresh_token;
        let tokens = require_access_token(tokens, "refresh")?;
        info!("refreshed session tokens");
        Ok(tokens)
    }

    /// Checks the viewer role, then sends the request with the bearer token.
    async fn gated_call(
        &self,
        credential: &Credential,
        token: &str,
        request: &GraphqlRequest,
    ) -> Result<JsonMap, Report<ClientError>> {
        let endpoint = credential.resolved_endpoint();
        let headers = bearer_headers(token)?;

        let account = self
            .inner
            .transport
            .post(endpoint, &headers, &AccountQuery::request(&NoVariables {}))
            .await?;
        let account = unwrap_data::<AccountData>(account)?;
        let role = account
            .viewer
            .and_then(|viewer| viewer.role)
            .filter(|role| !role.trim().is_empty())
            .map(ViewerRole::new)
            .ok_or(ClientError::RoleNotReturned)?;

        self.inner.session.lock().await.set_role(role.clone());
        if role.is_denied() {
            warn!(role = %role, "viewer role is not allowed to use the integration");
            return Err(ClientError::AccessDenied {
                role: role.into_inner(),
            }
            .into());
        }

        self.inner.transport.post(endpoint, &headers, request).await
    }
}

/// A refresh failure that a fresh login may fix.
fn refresh_rejected(err: &ClientError) -> bool {
    err.is_auth_rejection() || err.kind() == ErrorKind::Graphql
}

fn require_access_token(
    tokens: SessionTokens,
    operation: &str,
) -> Result<SessionTokens, ClientError> {
    if tokens.access_token.trim().is_empty() {
        return Err(ClientError::InvalidResponse {
            reason: format!("{operation} returned no access token"),
        });
    }
    Ok(tokens)
}

fn basic_headers(auth: &BasicAuthorization) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, sensitive(&auth.header_value, "authorization")?);
    headers.insert(
        HeaderName::from_static("x-tenant-api-key"),
        sensitive(&auth.raw_token, "x-tenant-api-key")?,
    );
    Ok(headers)
}

fn bearer_headers(token: &str) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        sensitive(&format!("Bearer {token}"), "authorization")?,
    );
    Ok(headers)
}

fn sensitive(value: &str, header: &'static str) -> Result<HeaderValue, ClientError> {
    let mut value =
        HeaderValue::from_str(value).map_err(|_| ClientError::InvalidHeader { header })?;
    value.set_sensitive(true);
    Ok(value)
}
