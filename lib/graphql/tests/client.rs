use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use umsatzio_graphql::{
    ClientConfig, ClientError, Credential, CredentialStore, ErrorKind, GraphqlClient,
    GraphqlRequest, InMemoryCredentialStore, SessionTokens,
};

fn client_for(credential: Credential) -> (GraphqlClient, Arc<InMemoryCredentialStore>) {
    client_with_config(credential, ClientConfig::default())
}

fn client_with_config(
    credential: Credential,
    config: ClientConfig,
) -> (GraphqlClient, Arc<InMemoryCredentialStore>) {
    let store = Arc::new(InMemoryCredentialStore::new(credential));
    let dyn_store: Arc<dyn CredentialStore> = store.clone();
    let client = GraphqlClient::with_config(dyn_store, config).expect("client");
    (client, store)
}

fn fast_retry_config() -> ClientConfig {
    ClientConfig {
        request_timeout_ms: 2_000,
        initial_backoff_ms: 10,
        connection_max_backoff_ms: 20,
        rate_limit_max_backoff_ms: 20,
        ..ClientConfig::default()
    }
}

fn jwt_expiring_at(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"exp": exp}).to_string());
    format!("{header}.{payload}.sig")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordedCall {
    operation: String,
    authorization: Option<String>,
}

/// Answers login, refresh, role and target operations by `operationName`.
struct SessionApi {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    login_emails: Arc<Mutex<Vec<String>>>,
    login_access_token: String,
    refresh_access_token: String,
    role: &'static str,
    rejected_token: Option<String>,
    refresh_rejected: bool,
    refresh_delay: Duration,
}

impl SessionApi {
    fn new(role: &'static str) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            login_emails: Arc::new(Mutex::new(Vec::new())),
            login_access_token: "login-access".to_string(),
            refresh_access_token: "refreshed-access".to_string(),
            role,
            rejected_token: None,
            refresh_rejected: false,
            refresh_delay: Duration::ZERO,
        }
    }

    fn rejecting(mut self, token: &str) -> Self {
        self.rejected_token = Some(token.to_string());
        self
    }

    fn rejecting_refresh(mut self) -> Self {
        self.refresh_rejected = true;
        self
    }

    fn slow_refresh(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }
}

impl Respond for SessionApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("JSON body");
        let operation = body
            .get("operationName")
            .and_then(Value::as_str)
            .unwrap_or("anonymous")
            .to_string();
        let authorization = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.calls.lock().expect("lock").push(RecordedCall {
            operation: operation.clone(),
            authorization: authorization.clone(),
        });

        if operation == "Login" {
            let email = body["variables"]["input"]["email"].as_str().unwrap_or_default();
            self.login_emails.lock().expect("lock").push(email.to_string());
        }
        if operation == "Refresh" && self.refresh_rejected {
            return ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "invalid refresh token", "extensions": {"code": "UNAUTHENTICATED"}}]
            }));
        }

        let rejected = self
            .rejected_token
            .as_ref()
            .is_some_and(|t| authorization.as_deref() == Some(format!("Bearer {t}").as_str()));
        if rejected {
            return ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "jwt expired", "extensions": {"code": "UNAUTHENTICATED"}}]
            }));
        }

        let data = match operation.as_str() {
            "Login" => json!({"login": {
                "accessToken": self.login_access_token,
                "refreshToken": "login-refresh"
            }}),
            "Refresh" => json!({"refreshToken": {
                "accessToken": self.refresh_access_token,
                "refreshToken": "rotated-refresh"
            }}),
            "Account" => json!({"viewer": {"role": self.role}}),
            _ => json!({"contacts": [{"id": "c1"}]}),
        };
        let response = ResponseTemplate::new(200).set_body_json(json!({"data": data}));
        if operation == "Refresh" {
            response.set_delay(self.refresh_delay)
        } else {
            response
        }
    }
}

fn recorded(calls: &Arc<Mutex<Vec<RecordedCall>>>) -> Vec<(String, Option<String>)> {
    calls
        .lock()
        .expect("lock")
        .iter()
        .map(|c| (c.operation.clone(), c.authorization.clone()))
        .collect()
}

fn contacts_request() -> GraphqlRequest {
    GraphqlRequest::new("query Contacts { contacts { id } }").with_operation_name("Contacts")
}

#[tokio::test]
async fn basic_token_sends_headers_and_exact_variables() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Basic abc123"))
        .and(header("x-tenant-api-key", "abc123"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "query": "query Q($a: Int, $b: String) { q(a: $a, b: $b) }",
            "variables": {"a": 1, "b": "x"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"q": true}})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(Credential::basic_token("abc123").with_endpoint(server.uri()));
    let request = GraphqlRequest::new("query Q($a: Int, $b: String) { q(a: $a, b: $b) }")
        .with_variables(&json!({"a": 1, "b": "x"}));
    let data = client.call(&request).await.expect("call");

    assert_eq!(data.get("q"), Some(&json!(true)));
}

#[tokio::test]
async fn prefixed_token_is_not_double_prefixed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Basic abc123"))
        .and(header("x-tenant-api-key", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) =
        client_for(Credential::basic_token("basic abc123").with_endpoint(server.uri()));
    let data = client
        .call(&GraphqlRequest::new("{ __typename }"))
        .await
        .expect("call");

    assert!(data.is_empty());
}

#[tokio::test]
async fn rate_limited_request_waits_for_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"contacts": [{"id": "c1"}]}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(Credential::basic_token("abc123").with_endpoint(server.uri()));
    let started = Instant::now();
    let data = client.call(&contacts_request()).await.expect("call");

    assert!(started.elapsed() >= Duration::from_millis(1_900));
    assert_eq!(data.get("contacts"), Some(&json!([{"id": "c1"}])));
}

#[tokio::test]
async fn rate_limit_exhaustion_surfaces_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(3)
        .mount(&server)
        .await;

    let (client, _) = client_with_config(
        Credential::basic_token("abc123").with_endpoint(server.uri()),
        fast_retry_config(),
    );
    let err = client.call(&contacts_request()).await.unwrap_err();

    assert_eq!(
        err.current_context(),
        &ClientError::Transport {
            status: Some(429),
            body: "slow down".to_string(),
            attempts: 3,
        }
    );
}

#[tokio::test]
async fn server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(Credential::basic_token("abc123").with_endpoint(server.uri()));
    let err = client.call(&contacts_request()).await.unwrap_err();

    match err.current_context() {
        ClientError::Transport {
            status, attempts, ..
        } => {
            assert_eq!(*status, Some(500));
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn connection_failure_is_retried_then_surfaced() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (client, _) = client_with_config(
        Credential::basic_token("abc123").with_endpoint(format!("http://{addr}/graphql")),
        fast_retry_config(),
    );
    let err = client.call(&contacts_request()).await.unwrap_err();

    match err.current_context() {
        ClientError::Transport {
            status, attempts, ..
        } => {
            assert_eq!(*status, None);
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.current_context().kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn graphql_errors_are_composed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"message": "Not found", "extensions": {"code": "NOT_FOUND"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(Credential::basic_token("abc123").with_endpoint(server.uri()));
    let err = client.call(&contacts_request()).await.unwrap_err();

    let context = err.current_context();
    assert_eq!(context.kind(), ErrorKind::Graphql);
    let message = context.to_string();
    assert!(message.contains("Not found"));
    assert!(message.contains("code=NOT_FOUND"));
}

#[tokio::test]
async fn non_json_success_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let (client, _) = client_for(Credential::basic_token("abc123").with_endpoint(server.uri()));
    let err = client.call(&contacts_request()).await.unwrap_err();

    assert_eq!(err.current_context().kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn configuration_errors_make_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .expect(0)
        .mount(&server)
        .await;

    let (client, _) = client_for(Credential::basic_token("abc123").with_endpoint(server.uri()));
    let err = client.call(&GraphqlRequest::new("   ")).await.unwrap_err();
    assert_eq!(err.current_context(), &ClientError::EmptyQuery);

    let (client, _) = client_for(Credential::basic_token("  ").with_endpoint(server.uri()));
    let err = client.call(&contacts_request()).await.unwrap_err();
    assert_eq!(err.current_context().kind(), ErrorKind::Configuration);

    let (client, _) = client_for(Credential::email_password("", "pw").with_endpoint(server.uri()));
    let err = client.call(&contacts_request()).await.unwrap_err();
    assert!(matches!(
        err.current_context(),
        ClientError::MissingCredential { field: "email", .. }
    ));
}

#[tokio::test]
async fn email_password_logs_in_checks_role_then_calls() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin");
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let (client, store) =
        client_for(Credential::email_password("a@b.c", "pw").with_endpoint(server.uri()));
    let data = client.call(&contacts_request()).await.expect("call");

    assert_eq!(data.get("contacts"), Some(&json!([{"id": "c1"}])));
    assert_eq!(
        recorded(&calls),
        vec![
            ("Login".to_string(), None),
            ("Account".to_string(), Some("Bearer login-access".to_string())),
            ("Contacts".to_string(), Some("Bearer login-access".to_string())),
        ]
    );
    let stored = store.snapshot().await;
    assert_eq!(stored.access_token.as_deref(), Some("login-access"));
    assert_eq!(stored.refresh_token.as_deref(), Some("login-refresh"));
    assert_eq!(
        client.viewer_role().await.map(|r| r.into_inner()),
        Some("TenantAdmin".to_string())
    );
}

#[tokio::test]
async fn held_token_is_reused_across_calls() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin");
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let (client, _) =
        client_for(Credential::email_password("a@b.c", "pw").with_endpoint(server.uri()));
    client.call(&contacts_request()).await.expect("first call");
    client.call(&contacts_request()).await.expect("second call");

    let logins = recorded(&calls)
        .iter()
        .filter(|(op, _)| op == "Login")
        .count();
    assert_eq!(logins, 1);
}

#[tokio::test]
async fn denied_role_stops_before_target_call() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantMember");
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let (client, _) =
        client_for(Credential::email_password("a@b.c", "pw").with_endpoint(server.uri()));
    let err = client.call(&contacts_request()).await.unwrap_err();

    assert_eq!(
        err.current_context(),
        &ClientError::AccessDenied {
            role: "TenantMember".to_string()
        }
    );
    let operations: Vec<_> = recorded(&calls).into_iter().map(|(op, _)| op).collect();
    assert_eq!(operations, vec!["Login", "Account"]);
}

#[tokio::test]
async fn rejected_held_token_is_refreshed_once() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin").rejecting("stale-access");
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let credential = Credential::email_password("a@b.c", "pw")
        .with_endpoint(server.uri())
        .with_session(SessionTokens {
            access_token: "stale-access".to_string(),
            refresh_token: Some("held-refresh".to_string()),
        });
    let (client, store) = client_for(credential);
    let data = client.call(&contacts_request()).await.expect("call");

    assert_eq!(data.get("contacts"), Some(&json!([{"id": "c1"}])));
    assert_eq!(
        recorded(&calls),
        vec![
            ("Account".to_string(), Some("Bearer stale-access".to_string())),
            ("Refresh".to_string(), None),
            ("Account".to_string(), Some("Bearer refreshed-access".to_string())),
            ("Contacts".to_string(), Some("Bearer refreshed-access".to_string())),
        ]
    );
    let stored = store.snapshot().await;
    assert_eq!(stored.access_token.as_deref(), Some("refreshed-access"));
    assert_eq!(stored.refresh_token.as_deref(), Some("rotated-refresh"));
}

#[tokio::test]
async fn renewed_token_rejection_is_not_retried() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin").rejecting("login-access");
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let (client, _) =
        client_for(Credential::email_password("a@b.c", "pw").with_endpoint(server.uri()));
    let err = client.call(&contacts_request()).await.unwrap_err();

    assert!(err.current_context().is_auth_rejection());
    let operations: Vec<_> = recorded(&calls).into_iter().map(|(op, _)| op).collect();
    assert_eq!(operations, vec!["Login", "Account"]);
}

#[tokio::test]
async fn expired_token_is_refreshed_before_use() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin");
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let expired = jwt_expiring_at(chrono::Utc::now().timestamp() - 60);
    let credential = Credential::email_password("a@b.c", "pw")
        .with_endpoint(server.uri())
        .with_session(SessionTokens {
            access_token: expired.clone(),
            refresh_token: Some("held-refresh".to_string()),
        });
    let (client, _) = client_for(credential);
    client.call(&contacts_request()).await.expect("call");

    let calls = recorded(&calls);
    assert_eq!(calls[0].0, "Refresh");
    assert!(
        calls
            .iter()
            .all(|(_, auth)| auth.as_deref() != Some(format!("Bearer {expired}").as_str()))
    );
}

#[tokio::test]
async fn rejected_refresh_falls_back_to_login() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin").rejecting_refresh();
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let expired = jwt_expiring_at(chrono::Utc::now().timestamp() - 60);
    let credential = Credential::email_password("a@b.c", "pw")
        .with_endpoint(server.uri())
        .with_session(SessionTokens {
            access_token: expired,
            refresh_token: Some("revoked-refresh".to_string()),
        });
    let (client, store) = client_for(credential);
    client.call(&contacts_request()).await.expect("call");

    assert_eq!(
        recorded(&calls),
        vec![
            ("Refresh".to_string(), None),
            ("Login".to_string(), None),
            ("Account".to_string(), Some("Bearer login-access".to_string())),
            ("Contacts".to_string(), Some("Bearer login-access".to_string())),
        ]
    );
    let stored = store.snapshot().await;
    assert_eq!(stored.refresh_token.as_deref(), Some("login-refresh"));
}

#[tokio::test]
async fn concurrent_calls_share_one_renewal() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin").slow_refresh(Duration::from_millis(200));
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let expired = jwt_expiring_at(chrono::Utc::now().timestamp() - 60);
    let credential = Credential::email_password("a@b.c", "pw")
        .with_endpoint(server.uri())
        .with_session(SessionTokens {
            access_token: expired,
            refresh_token: Some("held-refresh".to_string()),
        });
    let (client, _) = client_for(credential);

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.call(&contacts_request()).await })
        })
        .collect();
    for handle in handles {
        handle.await.expect("join").expect("call");
    }

    let calls = recorded(&calls);
    let count = |name: &str| calls.iter().filter(|(op, _)| op == name).count();
    assert_eq!(count("Refresh"), 1);
    assert_eq!(count("Login"), 0);
    assert_eq!(count("Contacts"), 5);
    assert!(
        calls
            .iter()
            .filter(|(op, _)| op == "Contacts")
            .all(|(_, auth)| auth.as_deref() == Some("Bearer refreshed-access"))
    );
}

#[tokio::test]
async fn credential_reset_starts_a_new_session() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin");
    let calls = api.calls.clone();
    let login_emails = api.login_emails.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let alice = Credential::email_password("alice@example.com", "pw1")
        .with_endpoint(server.uri())
        .with_session(SessionTokens {
            access_token: "alice-access".to_string(),
            refresh_token: Some("alice-refresh".to_string()),
        });
    let (client, store) = client_for(alice);
    client.call(&contacts_request()).await.expect("alice call");

    store
        .replace(Credential::email_password("bob@example.com", "pw2").with_endpoint(server.uri()))
        .await;
    client.call(&contacts_request()).await.expect("bob call");

    assert_eq!(
        recorded(&calls),
        vec![
            ("Account".to_string(), Some("Bearer alice-access".to_string())),
            ("Contacts".to_string(), Some("Bearer alice-access".to_string())),
            ("Login".to_string(), None),
            ("Account".to_string(), Some("Bearer login-access".to_string())),
            ("Contacts".to_string(), Some("Bearer login-access".to_string())),
        ]
    );
    assert_eq!(*login_emails.lock().expect("lock"), vec!["bob@example.com".to_string()]);
}

#[tokio::test]
async fn persisted_tokens_do_not_restart_the_session() {
    let server = MockServer::start().await;
    let api = SessionApi::new("TenantAdmin");
    let calls = api.calls.clone();
    Mock::given(method("POST")).respond_with(api).mount(&server).await;

    let (client, store) =
        client_for(Credential::email_password("a@b.c", "pw").with_endpoint(server.uri()));
    client.call(&contacts_request()).await.expect("first call");
    assert_eq!(store.snapshot().await.access_token.as_deref(), Some("login-access"));
    client.call(&contacts_request()).await.expect("second call");

    let logins = recorded(&calls)
        .iter()
        .filter(|(op, _)| op == "Login")
        .count();
    assert_eq!(logins, 1);
}

struct CountingApi {
    counter: Arc<AtomicUsize>,
}

impl Respond for CountingApi {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.counter.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_json(json!({"data": {"__typename": "Query"}}))
    }
}

#[tokio::test]
async fn ping_sends_minimal_query() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(body_json(json!({
            "query": "query __Ping { __typename }",
            "variables": {},
            "operationName": "__Ping"
        })))
        .respond_with(CountingApi {
            counter: counter.clone(),
        })
        .mount(&server)
        .await;

    let (client, _) = client_for(Credential::basic_token("abc123").with_endpoint(server.uri()));
    client.ping().await.expect("ping");

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
