//! Retry policy for the HTTP exchange.
//!
//! Only rate limiting (HTTP 429) and connection-level failures are retried.
//! Each class keeps its own backoff ceiling.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Retry decision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after a delay.
    RetryAfter(Duration),
    /// Do not retry.
    DoNotRetry,
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// HTTP 429, with the server's `Retry-After` if it sent a usable one.
    RateLimited {
        retry_after: Option<Duration>,
        body: String,
    },
    /// No HTTP status was obtained (refused, reset, timed out).
    Connection { message: String },
    /// Any other non-success HTTP status.
    Status { status: u16, body: String },
    /// A 2xx response whose body is not JSON.
    Decode { reason: String },
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff ceiling after rate limiting.
    pub rate_limit_max_delay: Duration,
    /// Backoff ceiling after connection failures.
    pub connection_max_delay: Duration,
    /// Upper bound applied to a server-provided `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(400),
            rate_limit_max_delay: Duration::from_secs(5),
            connection_max_delay: Duration::from_secs(2),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

/// Backoff state carried across the attempts of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn new(initial_delay: Duration) -> Self {
        Self {
            delay: initial_delay,
        }
    }

    /// The delay the next backoff-driven retry will wait.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.delay
    }

    fn advance(&mut self, ceiling: Duration) {
        self.delay = self.delay.saturating_mul(2).min(ceiling);
    }
}

impl RetryPolicy {
    /// Starts the backoff state for a new request.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_delay)
    }

    /// Decides whether to retry after `retries_used` retries have been spent.
    pub fn decide(
        &self,
        failure: &AttemptFailure,
        retries_used: u32,
        backoff: &mut Backoff,
    ) -> RetryDecision {
        if retries_used >= self.max_retries {
            return RetryDecision::DoNotRetry;
        }
        match failure {
            AttemptFailure::RateLimited { retry_after, .. } => {
                let wait = retry_after
                    .map(|d| d.min(self.max_retry_after))
                    .unwrap_or(backoff.current());
                backoff.advance(self.rate_limit_max_delay);
                RetryDecision::RetryAfter(wait)
            }
            AttemptFailure::Connection { .. } => {
                let wait = backoff.current();
                backoff.advance(self.connection_max_delay);
                RetryDecision::RetryAfter(wait)
            }
            AttemptFailure::Status { .. } | AttemptFailure::Decode { .. } => {
                RetryDecision::DoNotRetry
            }
        }
    }
}

/// Parses a `Retry-After` value: integer or fractional seconds, or an HTTP-date.
///
/// Dates in the past yield a zero delay and delays too large to represent
/// saturate. Unparseable values yield `None`.
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX));
        }
        return None;
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        at.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}
