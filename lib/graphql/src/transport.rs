//! HTTP exchange with retry.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::operation::{GraphqlRequest, GraphqlResponse, JsonMap};
use crate::retry::{AttemptFailure, RetryDecision, RetryPolicy, parse_retry_after};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use rootcause::prelude::Report;
use tracing::{debug, warn};

const MAX_BODY_LEN: usize = 4096;

#[derive(Debug, Clone)]
pub(crate) struct Transport {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl Transport {
    pub(crate) fn new(config: &ClientConfig) -> Result<Self, Report<ClientError>> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::InvalidResponse {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            policy: config.retry_policy(),
        })
    }

    /// Posts a GraphQL request and returns its `data`.
    pub(crate) async fn post(
        &self,
        endpoint: &str,
        headers: &HeaderMap,
        request: &GraphqlRequest,
    ) -> Result<JsonMap, Report<ClientError>> {
        let response = self.send_with_retry(endpoint, headers, request).await?;
        match response.into_data() {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!(
                    operation = request.operation_name().unwrap_or("anonymous"),
                    error = %e,
                    "GraphQL request returned errors"
                );
                Err(e.into())
            }
        }
    }

    async fn send_with_retry(
        &self,
        endpoint: &str,
        headers: &HeaderMap,
        request: &GraphqlRequest,
    ) -> Result<GraphqlResponse, ClientError> {
        let mut backoff = self.policy.backoff();
        let mut retries = 0;
        loop {
            debug!(endpoint, attempt = retries + 1, "sending GraphQL request");
            let failure = match self.send_once(endpoint, headers, request).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };
            match self.policy.decide(&failure, retries, &mut backoff) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(?delay, ?failure, "retrying GraphQL request");
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                RetryDecision::DoNotRetry => {
                    let attempts = retries + 1;
                    if retries > 0 {
                        warn!(attempts, ?failure, "GraphQL request failed after retries");
                    }
                    return Err(into_client_error(failure, attempts));
                }
            }
        }
    }

    async fn send_once(
        &self,
        endpoint: &str,
        headers: &HeaderMap,
        request: &GraphqlRequest,
    ) -> Result<GraphqlResponse, AttemptFailure> {
        let response = self
            .http
            .post(endpoint)
            .headers(headers.clone())
            .json(request)
            .send()
            .await
            .map_err(connection_failure)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_retry_after(value, chrono::Utc::now()));
        let bytes = response.bytes().await.map_err(connection_failure)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptFailure::RateLimited {
                retry_after,
                body: truncate_body(&bytes),
            });
        }
        if !status.is_success() {
            return Err(AttemptFailure::Status {
                status: status.as_u16(),
                body: truncate_body(&bytes),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| AttemptFailure::Decode {
            reason: format!("{e}: {}", truncate_body(&bytes)),
        })
    }
}

fn connection_failure(error: reqwest::Error) -> AttemptFailure {
    AttemptFailure::Connection {
        message: error.to_string(),
    }
}

fn into_client_error(failure: AttemptFailure, attempts: u32) -> ClientError {
    match failure {
        AttemptFailure::RateLimited { body, .. } => ClientError::Transport {
            status: Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            body,
            attempts,
        },
        AttemptFailure::Connection { message } => ClientError::Transport {
            status: None,
            body: message,
            attempts,
        },
        AttemptFailure::Status { status, body } => ClientError::Transport {
            status: Some(status),
            body,
            attempts,
        },
        AttemptFailure::Decode { reason } => ClientError::InvalidResponse { reason },
    }
}

pub(crate) fn truncate_body(bytes: &[u8]) -> String {
    let mut body = String::from_utf8_lossy(bytes).into_owned();
    if body.len() > MAX_BODY_LEN {
        let mut end = MAX_BODY_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push('…');
    }
    body
}
