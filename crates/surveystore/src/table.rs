// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Partitioned table plus object storage
//!
//! Submission records become rows of a partitioned key-value table, with the
//! form id as partition key and the submission id as sort key. Top-level data
//! fields are stored as row attributes next to a few reserved ones. Binary
//! content (attachments and serialized wide tables) goes to a paired
//! [`ObjectStorage`], since rows are size-limited in every real table service.
//!
//! The table itself is reached through the [`RowTable`] trait so that a vendor
//! SDK can be plugged in without touching the sync engine.

use crate::error::{Result, StoreError};
use crate::frame::TableFormat;
use crate::object::ObjectStorage;
use crate::record::{AttachmentInfo, SubmissionRecord, SubmissionSystem};
use crate::retry::{RetryPolicy, with_backoff};
use crate::storage::Storage;
use async_trait::async_trait;
use bytes::Bytes;
use diagnostics::*;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// Partition key attribute
pub const FORM_ID_ATTRIBUTE: &str = "_form_id";
/// Sort key attribute
pub const KEY_ATTRIBUTE: &str = "KEY";
/// Attribute holding the serialized system block
pub const SYSTEM_ATTRIBUTE: &str = "__system";
/// Attribute holding a metadata value
const VALUE_ATTRIBUTE: &str = "value";

const RESERVED_ATTRIBUTES: [&str; 3] = [FORM_ID_ATTRIBUTE, KEY_ATTRIBUTE, SYSTEM_ATTRIBUTE];

/// A row is a flat map of named attributes
pub type Row = Map<String, Value>;

/// Minimal surface of a partitioned key-value table
///
/// Implementations report failures as [`StoreError`]; transient ones are
/// retried by [`TableStorage`].
#[async_trait]
pub trait RowTable: Send + Sync {
    fn describe(&self) -> String;

    /// Insert or replace the row at (partition, sort)
    async fn put_row(&self, partition: &str, sort: &str, row: Row) -> Result<()>;

    async fn get_row(&self, partition: &str, sort: &str) -> Result<Option<Row>>;

    /// All sort keys in a partition
    async fn sort_keys(&self, partition: &str) -> Result<Vec<String>>;
}

/// In-process [`RowTable`]
#[derive(Debug, Default)]
pub struct MemoryRowTable {
    name: String,
    rows: RwLock<BTreeMap<(String, String), Row>>,
}

impl MemoryRowTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::default(),
        }
    }
}

#[async_trait]
impl RowTable for MemoryRowTable {
    fn describe(&self) -> String {
        format!("memory-table://{}", self.name)
    }

    async fn put_row(&self, partition: &str, sort: &str, row: Row) -> Result<()> {
        let mut rows = self.rows.write().await;
        _ = rows.insert((partition.to_string(), sort.to_string()), row);
        Ok(())
    }

    async fn get_row(&self, partition: &str, sort: &str) -> Result<Option<Row>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(partition.to_string(), sort.to_string())).cloned())
    }

    async fn sort_keys(&self, partition: &str) -> Result<Vec<String>> {
        let rows = self.rows.read().await;
        Ok(rows
            .keys()
            .filter(|(p, _)| p == partition)
            .map(|(_, s)| s.clone())
            .collect())
    }
}

/// Submission rows in a [`RowTable`], binary content in an [`ObjectStorage`]
pub struct TableStorage<T: RowTable> {
    table: T,
    objects: ObjectStorage,
    form_id: String,
    retry: RetryPolicy,
}

impl<T: RowTable> TableStorage<T> {
    pub fn new(table: T, objects: ObjectStorage, form_id: impl Into<String>) -> Result<Self> {
        let form_id = form_id.into();
        if form_id.is_empty() {
            return Err(StoreError::Configuration(
                "table storage requires a form id".to_string(),
            ));
        }
        Ok(Self {
            table,
            objects,
            form_id,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    #[must_use]
    pub fn objects(&self) -> &ObjectStorage {
        &self.objects
    }

    fn metadata_partition(&self) -> String {
        format!("{}#metadata", self.form_id)
    }

    async fn put_row(&self, partition: &str, sort: &str, row: Row) -> Result<()> {
        let table = &self.table;
        let what = format!("put row {partition}/{sort}");
        with_backoff(&self.retry, &what, move || {
            let row = row.clone();
            async move { table.put_row(partition, sort, row).await }
        })
        .await
    }

    async fn get_row(&self, partition: &str, sort: &str) -> Result<Row> {
        let table = &self.table;
        let what = format!("get row {partition}/{sort}");
        let row = with_backoff(&self.retry, &what, move || async move {
            table.get_row(partition, sort).await
        })
        .await?;
        row.ok_or_else(|| StoreError::not_found(sort))
    }

    async fn sort_keys(&self, partition: &str) -> Result<Vec<String>> {
        let table = &self.table;
        let what = format!("list rows {partition}");
        with_backoff(&self.retry, &what, move || async move {
            table.sort_keys(partition).await
        })
        .await
    }

    fn record_to_row(&self, record: &SubmissionRecord) -> Result<Row> {
        if record.id.is_empty() {
            return Err(StoreError::InvalidKey {
                key: String::new(),
                reason: "keys must not be empty".to_string(),
            });
        }
        let mut row = Row::new();
        for (name, value) in &record.data {
            if RESERVED_ATTRIBUTES.contains(&name.as_str()) {
                return Err(StoreError::permanent(
                    format!("put submission {}", record.id),
                    format!("data field {name:?} collides with a reserved attribute"),
                ));
            }
            _ = row.insert(name.clone(), value.clone());
        }
        _ = row.insert(
            FORM_ID_ATTRIBUTE.to_string(),
            Value::String(self.form_id.clone()),
        );
        _ = row.insert(KEY_ATTRIBUTE.to_string(), Value::String(record.id.clone()));
        _ = row.insert(
            SYSTEM_ATTRIBUTE.to_string(),
            serde_json::to_value(&record.system)?,
        );
        Ok(row)
    }

    fn row_to_record(id: &str, mut row: Row) -> Result<SubmissionRecord> {
        let system = row.shift_remove(SYSTEM_ATTRIBUTE).ok_or_else(|| {
            StoreError::permanent(
                format!("get submission {id}"),
                format!("row is missing the {SYSTEM_ATTRIBUTE} attribute"),
            )
        })?;
        let system: SubmissionSystem = serde_json::from_value(system)?;
        _ = row.shift_remove(FORM_ID_ATTRIBUTE);
        _ = row.shift_remove(KEY_ATTRIBUTE);
        Ok(SubmissionRecord::new(id, system, row))
    }
}

#[async_trait]
impl<T: RowTable> Storage for TableStorage<T> {
    fn describe(&self) -> String {
        format!(
            "{} [{}] + {}",
            self.table.describe(),
            self.form_id,
            self.objects.describe()
        )
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<()> {
        let row = self.record_to_row(record)?;
        self.put_row(&self.form_id, &record.id, row).await?;
        let id = &record.id;
        debug!("Stored submission row {id}", id: id);
        Ok(())
    }

    async fn get_submission(&self, id: &str) -> Result<SubmissionRecord> {
        let row = self.get_row(&self.form_id, id).await?;
        Self::row_to_record(id, row)
    }

    async fn list_submissions(&self) -> Result<Vec<String>> {
        let keys: BTreeSet<String> = self.sort_keys(&self.form_id).await?.into_iter().collect();
        Ok(keys.into_iter().collect())
    }

    async fn put_attachment(&self, submission_id: &str, name: &str, data: Bytes) -> Result<()> {
        self.objects.put_attachment(submission_id, name, data).await
    }

    async fn get_attachment(&self, submission_id: &str, name: &str) -> Result<Bytes> {
        self.objects.get_attachment(submission_id, name).await
    }

    async fn list_attachments(&self) -> Result<Vec<AttachmentInfo>> {
        let stored: BTreeSet<String> = self.sort_keys(&self.form_id).await?.into_iter().collect();
        Ok(self
            .objects
            .attachment_objects()
            .await?
            .into_iter()
            .filter(|info| stored.contains(&info.submission_id))
            .collect())
    }

    async fn put_metadata(&self, name: &str, value: Bytes) -> Result<()> {
        let text = String::from_utf8(value.to_vec()).map_err(|e| {
            StoreError::permanent(format!("put metadata {name}"), e)
        })?;
        let mut row = Row::new();
        _ = row.insert(VALUE_ATTRIBUTE.to_string(), Value::String(text));
        let partition = self.metadata_partition();
        self.put_row(&partition, name, row).await
    }

    async fn get_metadata(&self, name: &str) -> Result<Bytes> {
        let partition = self.metadata_partition();
        let row = self.get_row(&partition, name).await?;
        match row.get(VALUE_ATTRIBUTE) {
            Some(Value::String(text)) => Ok(Bytes::from(text.clone())),
            _ => Err(StoreError::permanent(
                format!("get metadata {name}"),
                "metadata row has no text value",
            )),
        }
    }

    async fn put_table_bytes(&self, key: &str, format: TableFormat, data: Bytes) -> Result<()> {
        self.objects.put_table_bytes(key, format, data).await
    }

    async fn get_table_bytes(&self, key: &str, format: TableFormat) -> Result<Bytes> {
        self.objects.get_table_bytes(key, format).await
    }
}
