//! Status callbacks to the controller.
//!
//! Delivery is at-least-once with a bounded number of attempts. A callback that
//! still fails after the last attempt is logged and dropped; it never affects
//! the job it reports on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::{CallbackTarget, JobStatus, StreamId};

/// Attempts per callback, including the first one.
pub const CALLBACK_ATTEMPTS: u32 = 3;
/// Pause between two attempts.
pub const CALLBACK_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Timeout for a single attempt.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Header carrying the controller-supplied callback key.
pub const CALLBACK_KEY_HEADER: &str = "X-Agent-Api-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: CALLBACK_ATTEMPTS,
            retry_delay: CALLBACK_RETRY_DELAY,
            attempt_timeout: CALLBACK_TIMEOUT,
        }
    }
}

/// Body of a status callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub stream_id: StreamId,
    pub status: JobStatus,
    pub details: String,
}

#[derive(Debug, Clone)]
pub struct CallbackNotifier {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl Default for CallbackNotifier {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl CallbackNotifier {
    pub fn new(policy: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(policy.attempt_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, policy }
    }

    /// Report a status transition. Returns whether any attempt was accepted.
    pub async fn notify(
        &self,
        target: &CallbackTarget,
        stream_id: StreamId,
        status: JobStatus,
        details: impl Into<String>,
    ) -> bool {
        let event = StatusEvent {
            stream_id,
            status,
            details: details.into(),
        };
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.deliver(target, &event).await {
                Ok(()) => {
                    tracing::info!(
                        stream_id,
                        status = %status,
                        url = %target.url,
                        "Status callback delivered"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        stream_id,
                        status = %status,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Status callback failed"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        tracing::error!(
            stream_id,
            status = %status,
            url = %target.url,
            "Giving up on status callback"
        );
        false
    }

    async fn deliver(
        &self,
        target: &CallbackTarget,
        event: &StatusEvent,
    ) -> Result<(), reqwest::Error> {
        self.client
            .post(&target.url)
            .header(CALLBACK_KEY_HEADER, &target.key)
            .timeout(self.policy.attempt_timeout)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
