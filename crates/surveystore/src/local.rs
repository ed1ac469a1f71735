// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Local filesystem backend
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<escaped id>/.submission.json   raw submission record
//! <root>/<escaped id>/<escaped name>     attachment
//! <root>/.metadata/<escaped name>        engine metadata (cursor)
//! <root>/.tables/<escaped key>.<ext>     serialized wide tables
//! ```
//!
//! Files are written to a dot-prefixed temporary name and renamed into place,
//! so a reader never observes a half-written record.

use crate::error::{Result, StoreError};
use crate::frame::TableFormat;
use crate::key::{self, METADATA_DIR, SUBMISSION_FILE, TABLES_DIR};
use crate::record::{AttachmentInfo, SubmissionRecord};
use crate::retry::{RetryPolicy, with_backoff};
use crate::storage::Storage;
use async_trait::async_trait;
use bytes::Bytes;
use diagnostics::*;
use std::path::{Path, PathBuf};

/// Storage rooted at a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    retry: RetryPolicy,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn submission_dir(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(key::escape(id)?))
    }

    fn attachment_path(&self, submission_id: &str, name: &str) -> Result<PathBuf> {
        Ok(self.submission_dir(submission_id)?.join(key::escape(name)?))
    }

    fn metadata_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(METADATA_DIR).join(key::escape(name)?))
    }

    fn table_path(&self, table_key: &str, format: TableFormat) -> Result<PathBuf> {
        let file = format!("{}.{}", key::escape(table_key)?, format.extension());
        Ok(self.root.join(TABLES_DIR).join(file))
    }

    fn location(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let display = path.display().to_string();
        let parent = path.parent().unwrap_or(&self.root);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{file_name}.tmp"));
        let tmp = tmp.as_path();
        let target = display.as_str();

        with_backoff(&self.retry, target, move || async move {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::from_io("create directory", target, e))?;
            tokio::fs::write(tmp, data)
                .await
                .map_err(|e| StoreError::from_io("write", target, e))?;
            tokio::fs::rename(tmp, path)
                .await
                .map_err(|e| StoreError::from_io("rename", target, e))
        })
        .await?;

        let size = data.len();
        debug!("Wrote {size} bytes to {display}", size: size, display: display);
        Ok(())
    }

    async fn read_file(&self, path: &Path, missing_key: &str) -> Result<Bytes> {
        let display = path.display().to_string();
        with_backoff(&self.retry, &display, move || async move {
            match tokio::fs::read(path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) => Err(StoreError::from_io("read", missing_key, e)),
            }
        })
        .await
    }

    /// Visible (non-reserved) entries of a directory; a missing directory is empty
    async fn visible_entries(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let display = dir.display().to_string();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::from_io("list", &display, e)),
        };

        let mut visible = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io("list", &display, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if key::is_reserved(&name) {
                continue;
            }
            visible.push((name, entry.path()));
        }
        visible.sort();
        Ok(visible)
    }

    /// Visible subdirectories of the root as (id, dir) pairs
    ///
    /// Stray regular files in the root are ignored.
    async fn submission_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut dirs = Vec::new();
        for (segment, dir) in self.visible_entries(&self.root).await? {
            let display = dir.display().to_string();
            let metadata = tokio::fs::metadata(&dir)
                .await
                .map_err(|e| StoreError::from_io("stat", &display, e))?;
            if metadata.is_dir() {
                dirs.push((key::unescape(&segment)?, dir));
            } else {
                debug!("Ignoring stray file {display}", display: display);
            }
        }
        Ok(dirs)
    }

    /// Submission directories that hold a stored record
    async fn stored_submission_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut stored = Vec::new();
        for (id, dir) in self.submission_dirs().await? {
            let record_path = dir.join(SUBMISSION_FILE);
            let exists = tokio::fs::try_exists(&record_path)
                .await
                .map_err(|e| StoreError::from_io("stat", &record_path.display().to_string(), e))?;
            if exists {
                stored.push((id, dir));
            }
        }
        Ok(stored)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn describe(&self) -> String {
        Self::location(&self.root)
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<()> {
        let path = self.submission_dir(&record.id)?.join(SUBMISSION_FILE);
        let data = serde_json::to_vec(record)?;
        self.write_file(&path, &data).await
    }

    async fn get_submission(&self, id: &str) -> Result<SubmissionRecord> {
        let path = self.submission_dir(id)?.join(SUBMISSION_FILE);
        let data = self.read_file(&path, id).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn list_submissions(&self) -> Result<Vec<String>> {
        Ok(self
            .stored_submission_dirs()
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    async fn put_attachment(&self, submission_id: &str, name: &str, data: Bytes) -> Result<()> {
        let path = self.attachment_path(submission_id, name)?;
        self.write_file(&path, &data).await
    }

    async fn get_attachment(&self, submission_id: &str, name: &str) -> Result<Bytes> {
        let path = self.attachment_path(submission_id, name)?;
        self.read_file(&path, &format!("{submission_id}/{name}")).await
    }

    async fn list_attachments(&self) -> Result<Vec<AttachmentInfo>> {
        let mut attachments = Vec::new();
        for (submission_id, dir) in self.submission_dirs().await? {
            for (segment, path) in self.visible_entries(&dir).await? {
                attachments.push(AttachmentInfo {
                    name: key::unescape(&segment)?,
                    submission_id: submission_id.clone(),
                    location: Self::location(&path),
                });
            }
        }
        Ok(attachments)
    }

    async fn put_metadata(&self, name: &str, value: Bytes) -> Result<()> {
        let path = self.metadata_path(name)?;
        self.write_file(&path, &value).await
    }

    async fn get_metadata(&self, name: &str) -> Result<Bytes> {
        let path = self.metadata_path(name)?;
        self.read_file(&path, name).await
    }

    async fn put_table_bytes(&self, key: &str, format: TableFormat, data: Bytes) -> Result<()> {
        let path = self.table_path(key, format)?;
        self.write_file(&path, &data).await
    }

    async fn get_table_bytes(&self, key: &str, format: TableFormat) -> Result<Bytes> {
        let path = self.table_path(key, format)?;
        self.read_file(&path, key).await
    }
}
