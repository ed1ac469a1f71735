// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The storage contract shared by every backend

use crate::error::Result;
use crate::frame::{self, TableFormat};
use crate::record::{AttachmentInfo, Cursor, SubmissionRecord};
use arrow_array::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;

/// Metadata name under which the sync cursor is kept
pub const CURSOR_METADATA: &str = "cursor";

/// Persistence for submissions, their attachments, engine metadata and
/// serialized wide tables.
///
/// Every backend presents the same semantics:
/// - writes overwrite by key and are idempotent
/// - reads of a missing key return [`crate::StoreError::NotFound`]
/// - transient backend failures are retried internally before surfacing
/// - metadata and tables live in namespaces no submission id can reach
#[async_trait]
pub trait Storage: Send + Sync {
    /// Human-readable locator used in log messages
    fn describe(&self) -> String;

    /// Write or overwrite one submission, keyed by its id
    async fn put_submission(&self, record: &SubmissionRecord) -> Result<()>;

    async fn get_submission(&self, id: &str) -> Result<SubmissionRecord>;

    /// Every stored submission id, without duplicates, in no particular order
    async fn list_submissions(&self) -> Result<Vec<String>>;

    async fn put_attachment(&self, submission_id: &str, name: &str, data: Bytes) -> Result<()>;

    async fn get_attachment(&self, submission_id: &str, name: &str) -> Result<Bytes>;

    /// Every stored attachment
    ///
    /// Backends that only hold attachments list them all, since the owning
    /// record may live in another store. A backend that holds both may limit
    /// the listing to attachments whose record it holds.
    async fn list_attachments(&self) -> Result<Vec<AttachmentInfo>>;

    async fn put_metadata(&self, name: &str, value: Bytes) -> Result<()>;

    async fn get_metadata(&self, name: &str) -> Result<Bytes>;

    async fn put_table_bytes(&self, key: &str, format: TableFormat, data: Bytes) -> Result<()>;

    async fn get_table_bytes(&self, key: &str, format: TableFormat) -> Result<Bytes>;

    /// Whether this backend can hold attachments at all
    fn attachments_supported(&self) -> bool {
        true
    }

    /// Whether a submission with this id is stored
    async fn query_submission(&self, id: &str) -> Result<bool> {
        match self.get_submission(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn put_cursor(&self, cursor: &Cursor) -> Result<()> {
        let value = serde_json::to_vec(cursor)?;
        self.put_metadata(CURSOR_METADATA, Bytes::from(value)).await
    }

    async fn get_cursor(&self) -> Result<Cursor> {
        let value = self.get_metadata(CURSOR_METADATA).await?;
        Ok(serde_json::from_slice(&value)?)
    }

    /// Store a table in the native (Parquet) form
    async fn store_dataframe(&self, key: &str, table: &RecordBatch) -> Result<()> {
        let data = frame::encode_parquet(table)?;
        self.put_table_bytes(key, TableFormat::Parquet, data).await
    }

    async fn get_dataframe(&self, key: &str) -> Result<RecordBatch> {
        let data = self.get_table_bytes(key, TableFormat::Parquet).await?;
        frame::decode_parquet(data)
    }

    /// Store a table as CSV; see [`crate::frame`] for what inference loses
    async fn store_dataframe_csv(&self, key: &str, table: &RecordBatch) -> Result<()> {
        let data = frame::encode_csv(table)?;
        self.put_table_bytes(key, TableFormat::Csv, data).await
    }

    async fn get_dataframe_csv(&self, key: &str) -> Result<RecordBatch> {
        let data = self.get_table_bytes(key, TableFormat::Csv).await?;
        frame::decode_csv(data)
    }
}
