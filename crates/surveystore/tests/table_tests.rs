// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Table backend behavior beyond the shared contract: retry of throttled row
//! operations and the partial-attachment bookkeeping that rides in `__system`.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use serde_json::{Map, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use surveystore::{
    MemoryRowTable, ObjectStorage, RetryPolicy, ReviewState, Row, RowTable, Storage, StoreError,
    SubmissionRecord, SubmissionSystem, TableStorage,
};

/// Fails the first `failures` row operations with a throttling error
struct FlakyRowTable {
    inner: MemoryRowTable,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyRowTable {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryRowTable::new("flaky"),
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    fn throttle(&self) -> surveystore::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(StoreError::transient(
                "row operation",
                "ProvisionedThroughputExceeded",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RowTable for FlakyRowTable {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn put_row(&self, partition: &str, sort: &str, row: Row) -> surveystore::Result<()> {
        self.throttle()?;
        self.inner.put_row(partition, sort, row).await
    }

    async fn get_row(&self, partition: &str, sort: &str) -> surveystore::Result<Option<Row>> {
        self.throttle()?;
        self.inner.get_row(partition, sort).await
    }

    async fn sort_keys(&self, partition: &str) -> surveystore::Result<Vec<String>> {
        self.throttle()?;
        self.inner.sort_keys(partition).await
    }
}

fn record(id: &str) -> SubmissionRecord {
    let mut system = SubmissionSystem::new(Utc.with_ymd_and_hms(2024, 6, 2, 9, 0, 0).unwrap());
    system.review_state = ReviewState::HasIssues;
    system.attachments_expected = 3;
    system.attachments_present = 2;
    let mut data = Map::new();
    _ = data.insert("village".to_string(), json!("Kisumu"));
    SubmissionRecord::new(id, system, data)
}

#[tokio::test]
async fn test_throttled_rows_are_retried() -> Result<()> {
    let storage = TableStorage::new(
        FlakyRowTable::new(2),
        ObjectStorage::in_memory("forms/a"),
        "a",
    )?
    .with_retry(RetryPolicy::immediate(3));

    storage.put_submission(&record("s1")).await?;
    let back = storage.get_submission("s1").await?;
    assert_eq!(back, record("s1"));
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_surface_transient() -> Result<()> {
    let storage = TableStorage::new(
        FlakyRowTable::new(100),
        ObjectStorage::in_memory("forms/a"),
        "a",
    )?
    .with_retry(RetryPolicy::immediate(2));

    let err = storage.put_submission(&record("s1")).await.unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err}");
    Ok(())
}

#[tokio::test]
async fn test_partial_attachments_survive_storage() -> Result<()> {
    let storage = TableStorage::new(
        MemoryRowTable::new("t"),
        ObjectStorage::in_memory("forms/a"),
        "a",
    )?;
    storage.put_submission(&record("s1")).await?;
    storage
        .put_attachment("s1", "one.jpg", Bytes::from_static(b"1"))
        .await?;

    let back = storage.get_submission("s1").await?;
    assert!(back.attachments_incomplete());
    assert_eq!(back.system.review_state, ReviewState::HasIssues);
    assert_eq!(storage.list_attachments().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_forms_share_a_table() -> Result<()> {
    let table = std::sync::Arc::new(MemoryRowTable::new("shared"));
    let first = TableStorage::new(
        SharedTable(table.clone()),
        ObjectStorage::in_memory("forms/first"),
        "first",
    )?;
    let second = TableStorage::new(
        SharedTable(table),
        ObjectStorage::in_memory("forms/second"),
        "second",
    )?;

    first.put_submission(&record("s1")).await?;
    second.put_submission(&record("s2")).await?;

    assert_eq!(first.list_submissions().await?, vec!["s1".to_string()]);
    assert_eq!(second.list_submissions().await?, vec!["s2".to_string()]);
    assert!(first.get_submission("s2").await.unwrap_err().is_not_found());
    Ok(())
}

struct SharedTable(std::sync::Arc<MemoryRowTable>);

#[async_trait]
impl RowTable for SharedTable {
    fn describe(&self) -> String {
        self.0.describe()
    }

    async fn put_row(&self, partition: &str, sort: &str, row: Row) -> surveystore::Result<()> {
        self.0.put_row(partition, sort, row).await
    }

    async fn get_row(&self, partition: &str, sort: &str) -> surveystore::Result<Option<Row>> {
        self.0.get_row(partition, sort).await
    }

    async fn sort_keys(&self, partition: &str) -> surveystore::Result<Vec<String>> {
        self.0.sort_keys(partition).await
    }
}
