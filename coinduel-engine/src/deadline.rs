use coinduel_core::{CoreError, Result};
use std::future::Future;
use std::time::Duration;

/// Upper bound on any single ledger call. A provider that exceeds it is
/// reported as a failed call, never awaited indefinitely; the caller's
/// normal failure path (refund, rollback, log-and-continue) applies.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Await a ledger call with [`CALL_TIMEOUT`] applied.
pub async fn ledger_call<T>(
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(CALL_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::ledger(format!(
            "{} did not complete within {:?}",
            operation, CALL_TIMEOUT
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hung_call_becomes_a_ledger_error() {
        let err = ledger_call::<()>("deposit", std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Ledger(_)));
    }

    #[tokio::test]
    async fn completed_call_passes_through() {
        let value = ledger_call("balance", async { Ok(42u64) }).await.unwrap();
        assert_eq!(value, 42);
    }
}
