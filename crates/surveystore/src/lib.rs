// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Durable storage for survey submissions and their attachments
//!
//! Every backend implements the same [`Storage`] contract, so the sync engine
//! and the table materializer never know where data lives.
//!
//! # Backends
//!
//! - **LocalStorage**: a directory tree on the local filesystem
//! - **ObjectStorage**: S3, Google Cloud Storage, Azure Blob Storage, or an
//!   in-memory store, all through `object_store`
//! - **TableStorage**: submission rows in a partitioned key-value table
//!   ([`RowTable`]) with binary content in a paired `ObjectStorage`
//!
//! # Usage
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use surveystore::{Storage, StorageConfig};
//!
//! let storage = StorageConfig::from_yaml("backend: local\nroot: /var/lib/surveys\n")?.build()?;
//! for id in storage.list_submissions().await? {
//!     let record = storage.get_submission(&id).await?;
//!     println!("{} {:?}", record.id, record.system.review_state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod frame;
pub mod key;
mod local;
mod object;
mod record;
mod retry;
mod storage;
mod table;

pub use config::{BackendConfig, LocalSettings, MemorySettings, StorageConfig};
pub use error::{BoxError, NotFoundExt, Result, StoreError};
pub use frame::TableFormat;
pub use local::LocalStorage;
pub use object::{AzureSettings, GcsSettings, ObjectStorage, Provider, S3Settings};
pub use record::{
    AttachmentInfo, Cursor, ReviewState, SubmissionRecord, SubmissionSystem, content_type_for,
};
pub use retry::{RetryClass, RetryPolicy, with_backoff};
pub use storage::{CURSOR_METADATA, Storage};
pub use table::{
    FORM_ID_ATTRIBUTE, KEY_ATTRIBUTE, MemoryRowTable, Row, RowTable, SYSTEM_ATTRIBUTE,
    TableStorage,
};
