//! Retry engine wrapping a single write-strategy invocation
//!
//! Retries only failures classified as recoverable contention (the canonical
//! example: the target table is locked by another writer), with jittered
//! exponential backoff up to a bounded attempt count. Everything else, and
//! exhaustion, becomes a terminal error result carrying the original message.
//! The engine never invents success.

use eventgate_connect_core::{ConnectorError, ConnectorResult, InsertResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;
const JITTER_FACTOR: f64 = 0.25;

/// Invoke `op` up to `max_attempts` times, retrying only on recoverable
/// contention. Returns the strategy's result, or a terminal error result
/// covering the whole batch.
pub async fn with_retry<F, Fut>(
    dest: &str,
    method: &str,
    batch_len: usize,
    max_attempts: u32,
    op: F,
) -> InsertResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = ConnectorResult<InsertResult>>,
{
    let max_attempts = max_attempts.max(1);
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(result) => return result,
            Err(e) if is_contention_error(&e) && attempt < max_attempts => {
                let wait_ms = backoff_with_jitter(backoff_ms, JITTER_FACTOR);
                warn!(
                    dest = dest,
                    attempt = attempt,
                    "Recoverable contention, retrying in {}ms: {}",
                    wait_ms,
                    e
                );
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(e) if is_contention_error(&e) => {
                error!(
                    dest = dest,
                    "Contention persisted after {} attempts: {}", max_attempts, e
                );
                return InsertResult::failure(
                    dest,
                    batch_len,
                    method,
                    format!("{} (after {} attempts)", e, max_attempts),
                );
            }
            Err(e) => {
                error!(dest = dest, "Delivery failed: {}", e);
                return InsertResult::failure(dest, batch_len, method, e.to_string());
            }
        }
    }

    // unreachable: the loop always returns
    InsertResult::failure(dest, batch_len, method, "retry loop exhausted")
}

/// Classify recoverable contention.
///
/// Transport-level transients (timeouts, 5xx) are already marked retryable by
/// the client; on top of those, lock-contention messages from otherwise-fatal
/// statement failures are recognized by pattern. Validation-class errors are
/// never contention.
pub fn is_contention_error(err: &ConnectorError) -> bool {
    if err.is_config() {
        return false;
    }
    if err.is_retryable() {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("is being locked")
        || message.contains("locked by another")
        || message.contains("resource busy")
        || message.contains("000625")
}

fn backoff_with_jitter(base_ms: u64, jitter_factor: f64) -> u64 {
    let jitter_range = (base_ms as f64 * jitter_factor) as u64;
    if jitter_range == 0 {
        return base_ms;
    }
    let mut rng = rand::thread_rng();
    let jitter = rng.gen_range(0..jitter_range);
    if rng.gen_bool(0.5) {
        base_ms.saturating_add(jitter)
    } else {
        base_ms.saturating_sub(jitter)
    }
}
