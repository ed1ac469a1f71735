// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded exponential backoff for transient failures

use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether a retry could help
pub trait RetryClass {
    fn is_retryable(&self) -> bool;
}

impl RetryClass for crate::StoreError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// How hard to retry a transient failure before giving up
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry, in milliseconds
    pub min_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// A policy with tiny delays, suitable for tests
    #[must_use]
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            min_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(format!(
                "retry min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// Run `op`, retrying while it fails with a retryable error
///
/// The last error is returned once the policy is exhausted. Non-retryable
/// errors are returned immediately.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T, E>
where
    E: RetryClass + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    op.retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &E| e.is_retryable())
        .notify(|e: &E, delay: Duration| {
            let reason = e.to_string();
            let delay_ms = delay.as_millis() as u64;
            warn!("Retrying {what} in {delay_ms}ms after: {reason}", what: what, delay_ms: delay_ms, reason: reason);
        })
        .await
}
