//! Bounded retry policies for transient engine conditions.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::RoomSession;
use crate::shared::{RoomCastError, Status};

/// Total subscribe attempts before `streaming-not-ready` becomes terminal.
pub const MAX_SUBSCRIBE_ATTEMPTS: u32 = 3;

/// Consecutive self-commit failures tolerated before giving up.
pub const MAX_UPDATE_SELF_RETRIES: u32 = 5;

/// Reason attached to a subscribe that succeeded only after retrying.
pub const STREAM_FAILURE_RECOVERED: &str = "stream-failure-recovered";

/// Backoff before the next subscribe attempt: quadratic in the number of
/// attempts already made (1s, 4s).
pub fn subscribe_retry_delay(completed_attempts: u32) -> Duration {
    Duration::from_millis(u64::from(completed_attempts * completed_attempts) * 1000)
}

/// Outcome of a retried subscribe: final status plus a recovery marker when
/// an earlier attempt had reported not-ready.
#[derive(Debug, Clone, PartialEq)]
pub struct RetriedOutcome<T> {
    pub value: T,
    pub recovered: bool,
}

/// Runs `attempt` until it yields something other than `streaming-not-ready`,
/// up to [`MAX_SUBSCRIBE_ATTEMPTS`], backing off quadratically in between.
/// Exhausting the budget yields `streaming-not-ready` itself as terminal.
///
/// The status is extracted with `status_of`; any `Err` aborts immediately.
pub async fn retry_while_streaming_not_ready<T, F, Fut>(
    mut attempt: F,
    status_of: impl Fn(&T) -> Status,
) -> Result<RetriedOutcome<T>, RoomCastError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RoomCastError>>,
{
    let mut attempts = 0;

    loop {
        let value = attempt().await?;
        attempts += 1;

        let status = status_of(&value);

        if status != Status::StreamingNotReady {
            return Ok(RetriedOutcome {
                value,
                recovered: status.is_ok() && attempts > 1,
            });
        }

        if attempts >= MAX_SUBSCRIBE_ATTEMPTS {
            return Ok(RetriedOutcome {
                value,
                recovered: false,
            });
        }

        let delay = subscribe_retry_delay(attempts);
        info!(
            delay_ms = delay.as_millis() as u64,
            attempts, "Waiting before retrying after streaming-not-ready"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Commits pending self changes, retrying immediately on failure. A success
/// resets the failure budget; the sixth consecutive failure surfaces as
/// [`RoomCastError::UnableToUpdateSelf`].
pub async fn commit_self_with_retry(
    session: &Arc<dyn RoomSession>,
) -> Result<Status, RoomCastError> {
    let mut consecutive_failures = 0;

    loop {
        match session.commit_self().await {
            Ok(status) if status.is_ok() => return Ok(status),
            Ok(status) => {
                consecutive_failures += 1;
                warn!(
                    status = %status,
                    consecutive_failures,
                    "Unable to update self, retrying"
                );
            }
            Err(error) => {
                consecutive_failures += 1;
                warn!(
                    error = %error,
                    consecutive_failures,
                    "Self update failed, retrying"
                );
            }
        }

        if consecutive_failures >= MAX_UPDATE_SELF_RETRIES {
            return Err(RoomCastError::UnableToUpdateSelf(MAX_UPDATE_SELF_RETRIES));
        }
    }
}
