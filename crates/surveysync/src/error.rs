// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use surveystore::{BoxError, RetryClass, StoreError};
use thiserror::Error;

/// Failures reported by a survey platform client
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Network failure, timeout or 5xx; worth retrying
    #[error("Transient platform error: {0}")]
    Transient(#[source] BoxError),

    #[error("Platform authentication failed: {0}")]
    Authentication(String),

    #[error("Not found on platform: {0}")]
    NotFound(String),

    /// The platform answered with something we cannot interpret
    #[error("Unexpected platform response: {0}")]
    Protocol(String),
}

impl PlatformError {
    pub fn transient(source: impl Into<BoxError>) -> Self {
        PlatformError::Transient(source.into())
    }
}

impl RetryClass for PlatformError {
    fn is_retryable(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlattenError {
    #[error("Record nesting exceeds {limit} levels at {path}")]
    TooDeep { limit: usize, path: String },
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// The batch was aborted before the cursor moved
    #[error("Remote protocol error, batch aborted: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Flatten error: {0}")]
    Flatten(#[from] FlattenError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// Some submissions could not be persisted. `synced` lists the ones that
    /// were; the cursor only advanced past the committed prefix.
    #[error("{} submission(s) failed to sync ({} synced): {}", .failed.len(), .synced.len(), summarize(.failed))]
    Incomplete {
        synced: Vec<String>,
        failed: Vec<(String, String)>,
    },
}

fn summarize(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(id, reason)| format!("{id}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, SyncError>;
