//! Retry policy for provider calls
//!
//! Wraps a single chat attempt with a per-attempt timeout and a bounded
//! retry-on-transient-failure loop. Retries are immediate: any pacing beyond
//! the concurrency bound is the provider's own concern (e.g. rate-limit
//! responses), not this policy's.

use crate::provider::{ChatProvider, ChatRequest, ChatResponse, ProviderError};

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeout, rate limit, server error, connection reset)
/// should return `true`. Permanent failures (bad credentials, unknown model,
/// malformed request or response) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            // A timed-out attempt is transient by definition
            ProviderError::Timeout(_) => true,
            // The provider asked us to come back later
            ProviderError::RateLimited { .. } => true,
            // Server-side failures are worth reattempting
            ProviderError::Server { .. } => true,
            // Transport problems: retry timeouts and connection failures
            ProviderError::Network(e) => e.is_timeout() || e.is_connect(),
            // Credential and request problems will not fix themselves
            ProviderError::Auth { .. }
            | ProviderError::InvalidModel { .. }
            | ProviderError::InvalidRequest { .. }
            | ProviderError::MalformedResponse { .. }
            | ProviderError::MissingCredentials { .. } => false,
        }
    }
}

/// Execute one chat request with a per-attempt timeout and bounded retries.
///
/// The request's `timeout` bounds each individual attempt; an elapsed
/// attempt is converted to [`ProviderError::Timeout`] and counts as
/// retryable. Retryable failures are reattempted immediately, up to
/// `max_retries` additional attempts (`max_retries + 1` total). A
/// non-retryable failure returns at once without consuming retry budget;
/// exhausting the budget returns the last error.
pub async fn chat_with_retry(
    provider: &dyn ChatProvider,
    request: &ChatRequest,
    max_retries: u32,
) -> Result<ChatResponse, ProviderError> {
    let mut attempt = 0;

    loop {
        let result = match tokio::time::timeout(request.timeout, provider.chat(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(request.timeout)),
        };

        match result {
            Ok(response) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Request succeeded after retry");
                }
                return Ok(response);
            }
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = max_retries,
                    "Request failed, retrying"
                );
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt + 1,
                        "Request failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::warn!(error = %e, "Request failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}
