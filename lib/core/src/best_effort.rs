//! Fire-and-forget execution with logged-but-ignored failure.
//!
//! Some follow-up calls are optional: pinning a freshly created note,
//! unloading a filter group, persisting renewed tokens. Their failure must
//! never fail the surrounding operation, but it must still show up in logs.

use std::fmt::Display;
use std::future::Future;

/// Awaits `future`, returning its value or `None` if it failed.
///
/// Failures are logged at `warn` with the given label and never propagated.
pub async fn best_effort<T, E, F>(label: &str, future: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match future.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(operation = label, error = %e, "best-effort operation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_value_on_success() {
        let result = best_effort("ok", async { Ok::<_, String>(7) }).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn swallows_failure() {
        let result: Option<()> =
            best_effort("pin_note", async { Err("boom".to_string()) }).await;
        assert!(result.is_none());
    }
}
