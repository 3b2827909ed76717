use std::time::Duration;

use rand::RngExt;

use super::error::OdooError;

const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_CAP_MS: u64 = 2_000;
const JITTER_FRACTION: f64 = 0.2;

/// Backoff delay before retry number `attempt` (0-based): exponential from
/// 100 ms, doubling, capped at 2 s, with a ±20 % jitter.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(BACKOFF_CAP_MS);
    let jitter = rand::rng().random_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
    Duration::from_millis((exp as f64 * jitter).round() as u64)
}

/// Whether an HTTP status warrants another attempt.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// Map the last per-attempt failure to the error surfaced once the retry
/// budget is spent: timeouts stay timeouts, retryable HTTP statuses become
/// transport errors, anything else passes through.
pub(crate) fn exhausted(last_err: Option<OdooError>, attempts: usize) -> OdooError {
    match last_err {
        Some(OdooError::Timeout { .. }) => OdooError::Timeout { attempts },
        Some(OdooError::Api { status, message, .. }) if is_retryable_status(status) => {
            OdooError::Transport(format!("HTTP {status} after {attempts} attempt(s): {message}"))
        }
        Some(err) => err,
        None => OdooError::Transport("request failed without error details".to_string()),
    }
}
