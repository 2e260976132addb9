//! In-memory session state for email/password credentials.

use crate::credential::{AuthMode, Credential};
use crate::jwt;
use crate::role::ViewerRole;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Tokens returned by the login and refresh mutations.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Where the access token for a call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenSource {
    /// Held from an earlier call or seeded from the credential.
    Cached,
    /// Obtained by login or refresh during this call.
    Renewed,
}

/// Stored access and refresh token, blanks normalized to `None`.
type StoredTokens = (Option<String>, Option<String>);

/// The parts of a credential a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CredentialFingerprint {
    auth_mode: AuthMode,
    endpoint: String,
    email: String,
    tokens: StoredTokens,
}

impl CredentialFingerprint {
    fn of(credential: &Credential) -> Self {
        Self {
            auth_mode: credential.auth_mode,
            endpoint: credential.resolved_endpoint().to_string(),
            email: credential.email.trim().to_lowercase(),
            tokens: (
                non_blank(credential.access_token.as_deref()),
                non_blank(credential.refresh_token.as_deref()),
            ),
        }
    }

    fn same_account(&self, other: &Self) -> bool {
        self.auth_mode == other.auth_mode
            && self.endpoint == other.endpoint
            && self.email == other.email
    }
}

/// Session tokens and last observed role, shared by every call of a client.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    origin: Option<CredentialFingerprint>,
    written: Option<StoredTokens>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    role: Option<ViewerRole>,
}

impl SessionState {
    /// Adopts the credential's stored tokens when the session is first used
    /// or the stored credential no longer matches this session.
    ///
    /// Tokens this session wrote back through the store count as matching.
    /// Returns true if the session was (re)seeded.
    pub(crate) fn seed(&mut self, credential: &Credential) -> bool {
        let current = CredentialFingerprint::of(credential);
        if let Some(origin) = &self.origin
            && origin.same_account(&current)
            && (origin.tokens == current.tokens || self.written.as_ref() == Some(&current.tokens))
        {
            return false;
        }
        self.access_token = current.tokens.0.clone();
        self.refresh_token = current.tokens.1.clone();
        self.role = non_blank(credential.role.as_deref()).map(ViewerRole::new);
        self.written = None;
        self.origin = Some(current);
        true
    }

    /// Records the tokens handed to the credential store.
    pub(crate) fn mark_written(&mut self, tokens: &SessionTokens) {
        self.written = Some((
            non_blank(Some(&tokens.access_token)),
            non_blank(tokens.refresh_token.as_deref()),
        ));
    }

    /// Returns the held access token if it is not about to expire.
    pub(crate) fn usable_access_token(&self, skew: Duration) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|token| !jwt::is_expired(token, skew))
    }

    pub(crate) fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Installs renewed tokens, keeping the old refresh token if none was issued.
    pub(crate) fn replace(&mut self, tokens: SessionTokens) {
        self.access_token = Some(tokens.access_token);
        if let Some(refresh) = non_blank(tokens.refresh_token.as_deref()) {
            self.refresh_token = Some(refresh);
        }
    }

    pub(crate) fn tokens(&self) -> Option<SessionTokens> {
        self.access_token.as_ref().map(|access| SessionTokens {
            access_token: access.clone(),
            refresh_token: self.refresh_token.clone(),
        })
    }

    pub(crate) fn role(&self) -> Option<&ViewerRole> {
        self.role.as_ref()
    }

    pub(crate) fn set_role(&mut self, role: ViewerRole) {
        self.role = Some(role);
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(access: &str, refresh: Option<&str>) -> SessionTokens {
        SessionTokens {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
        }
    }

    #[test]
    fn unchanged_credential_keeps_renewed_tokens() {
        let mut state = SessionState::default();
        let credential =
            Credential::email_password("a@b.c", "pw").with_session(tokens("a1", Some("r1")));
        assert!(state.seed(&credential));
        state.replace(tokens("a2", None));
        assert!(!state.seed(&credential));

        let held = state.tokens().expect("tokens");
        assert_eq!(held.access_token, "a2");
        assert_eq!(held.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn written_back_tokens_do_not_reseed() {
        let mut state = SessionState::default();
        state.seed(&Credential::email_password("a@b.c", "pw"));
        let renewed = tokens("a1", Some("r1"));
        state.replace(renewed.clone());
        state.mark_written(&renewed);

        let persisted = Credential::email_password("A@b.c ", "pw").with_session(renewed);
        assert!(!state.seed(&persisted));
        assert_eq!(state.usable_access_token(Duration::from_secs(30)), Some("a1"));
    }

    #[test]
    fn different_account_reseeds() {
        let mut state = SessionState::default();
        state.seed(&Credential::email_password("alice@x", "pw").with_session(tokens("alice", None)));
        state.set_role(ViewerRole::new("TenantAdmin"));

        assert!(state.seed(&Credential::email_password("bob@x", "pw2")));
        assert!(state.tokens().is_none());
        assert!(state.role().is_none());
    }

    #[test]
    fn externally_reset_tokens_reseed() {
        let mut state = SessionState::default();
        let credential =
            Credential::email_password("a@b.c", "pw").with_session(tokens("a1", Some("r1")));
        state.seed(&credential);

        let mut reset = credential.clone();
        reset.access_token = None;
        reset.refresh_token = None;
        assert!(state.seed(&reset));
        assert!(state.tokens().is_none());
    }

    #[test]
    fn blank_seeded_tokens_are_ignored() {
        let mut state = SessionState::default();
        let mut credential = Credential::email_password("a@b.c", "pw");
        credential.access_token = Some("  ".to_string());
        state.seed(&credential);
        assert!(state.tokens().is_none());
        assert!(state.usable_access_token(Duration::from_secs(30)).is_none());
    }

    #[test]
    fn opaque_token_is_usable() {
        let mut state = SessionState::default();
        state.replace(SessionTokens {
            access_token: "opaque".to_string(),
            refresh_token: Some("r".to_string()),
        });
        assert_eq!(state.usable_access_token(Duration::from_secs(30)), Some("opaque"));
        assert_eq!(state.refresh_token(), Some("r"));
    }

    #[test]
    fn session_tokens_debug_is_redacted() {
        let tokens = SessionTokens {
            access_token: "secret".to_string(),
            refresh_token: Some("other".to_string()),
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("other"));
    }
}
