//! Single-provider attempt loop with exponential backoff

use herald_common::tracing::{debug, warn};

use super::Route;
use crate::{
    error::{ProviderError, ProviderFailure},
    policy::RetryPolicy,
    types::{Receipt, Request},
};

/// Send `request` through one provider, retrying per `policy`.
///
/// Every failure is reported to the route's breaker; the first success is
/// reported and returned immediately. The breaker is only consulted by the
/// caller before the loop starts, so an opening mid-loop does not cut the
/// remaining retries short.
///
/// # Errors
///
/// [`ProviderFailure::Exhausted`] carrying the last error once all
/// `max_retries + 1` attempts have failed
pub(super) async fn send_with_retry(
    route: &Route,
    request: &Request,
    policy: &RetryPolicy,
) -> Result<Receipt, ProviderFailure> {
    let provider = route.provider.name();
    let mut last_error = None;

    for attempt in 0..policy.total_attempts() {
        match route.provider.send(request).await {
            Ok(receipt) => {
                route.breaker.on_success();
                return Ok(receipt);
            }
            Err(error) => {
                route.breaker.on_failure();
                let retries_left = policy.retries_left(attempt);
                warn!(
                    provider,
                    key = %request.idempotency_key(),
                    attempt,
                    retries_left,
                    %error,
                    "Attempt failed"
                );

                if retries_left > 0 {
                    let delay = policy.backoff(attempt);
                    debug!(
                        provider,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }

                last_error = Some(error);
            }
        }
    }

    Err(ProviderFailure::Exhausted {
        provider: provider.to_string(),
        attempts: policy.total_attempts(),
        last_error: last_error.unwrap_or_else(|| ProviderError::new("no attempt was made")),
    })
}
