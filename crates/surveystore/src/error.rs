// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for storage operations
//!
//! Backend-native errors (object store, filesystem, row table) are normalized
//! into this taxonomy before they leave a backend.

use thiserror::Error;

/// Boxed source error carried by normalized variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {key}")]
    NotFound { key: String },

    #[error("Transient backend error during {operation}: {source}")]
    Transient {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Permanent backend error during {operation}: {source}")]
    Permanent {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        StoreError::NotFound { key: key.into() }
    }

    pub fn transient(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        StoreError::Transient {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn permanent(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        StoreError::Permanent {
            operation: operation.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Whether retrying the same operation could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }

    /// Classify a filesystem error for `operation` on `key`
    pub fn from_io(operation: &str, key: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => StoreError::not_found(key),
            ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ResourceBusy => StoreError::transient(format!("{operation} {key}"), err),
            _ => StoreError::permanent(format!("{operation} {key}"), err),
        }
    }

    /// Classify an object store error for `operation` on `key`
    pub fn from_object_store(operation: &str, key: &str, err: object_store::Error) -> Self {
        use object_store::Error as OsError;
        let operation = format!("{operation} {key}");
        match err {
            OsError::NotFound { .. } => StoreError::not_found(key),
            OsError::PermissionDenied { .. }
            | OsError::Unauthenticated { .. }
            | OsError::InvalidPath { .. }
            | OsError::NotSupported { .. }
            | OsError::NotImplemented
            | OsError::UnknownConfigurationKey { .. }
            | OsError::AlreadyExists { .. }
            | OsError::Precondition { .. }
            | OsError::NotModified { .. } => StoreError::permanent(operation, err),
            _ => StoreError::transient(operation, err),
        }
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Turn a distinguished `NotFound` into `None`
pub trait NotFoundExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> NotFoundExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
