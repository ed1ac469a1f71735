// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Object storage backend (S3, Google Cloud Storage, Azure Blob Storage)
//!
//! One implementation serves every provider through the `object_store` crate;
//! the provider only decides how the client is built and how locations are
//! displayed. Keys mirror the local layout below a per-form prefix, so several
//! forms can share a bucket or container:
//!
//! ```text
//! <prefix>/<escaped id>/.submission.json
//! <prefix>/<escaped id>/<escaped name>
//! <prefix>/.metadata/<escaped name>
//! <prefix>/.tables/<escaped key>.<ext>
//! ```

use crate::error::{Result, StoreError};
use crate::frame::TableFormat;
use crate::key::{self, METADATA_DIR, SUBMISSION_FILE, TABLES_DIR};
use crate::record::{AttachmentInfo, SubmissionRecord, content_type_for};
use crate::retry::{RetryPolicy, with_backoff};
use crate::storage::Storage;
use async_trait::async_trait;
use bytes::Bytes;
use diagnostics::*;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectMeta, ObjectStore, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Object storage provider behind an [`ObjectStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    S3,
    GoogleCloud,
    Azure,
    /// In-process store, for tests and scratch runs
    Memory,
}

impl Provider {
    /// URL scheme used in diagnostic locations
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Provider::S3 => "s3",
            Provider::GoogleCloud => "gs",
            Provider::Azure => "az",
            Provider::Memory => "memory",
        }
    }
}

/// Connection settings for S3 and S3-compatible stores
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct S3Settings {
    pub bucket: String,
    pub region: Option<String>,
    /// Key prefix for this form's objects
    pub prefix: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Custom endpoint for MinIO, R2 and similar
    pub endpoint: Option<String>,
}

/// Connection settings for Google Cloud Storage
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct GcsSettings {
    pub bucket: String,
    pub prefix: String,
    pub service_account_path: Option<String>,
}

/// Connection settings for Azure Blob Storage
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AzureSettings {
    pub account: String,
    pub container: String,
    pub prefix: String,
    pub access_key: Option<String>,
}

/// Storage on top of any `object_store` implementation
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    provider: Provider,
    /// Bucket or container, for display only
    container: String,
    prefix: String,
    retry: RetryPolicy,
}

fn config_error(provider: Provider, e: object_store::Error) -> StoreError {
    let scheme = provider.scheme();
    StoreError::Configuration(format!("failed to build {scheme} client: {e}"))
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Configuration(format!("{what} is required")));
    }
    Ok(())
}

impl ObjectStorage {
    /// Wrap an already-built store
    pub fn new(
        store: Arc<dyn ObjectStore>,
        provider: Provider,
        container: impl Into<String>,
        prefix: &str,
    ) -> Self {
        Self {
            store,
            provider,
            container: container.into(),
            prefix: prefix.trim_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// In-memory store, mainly for tests
    pub fn in_memory(prefix: &str) -> Self {
        Self::new(
            Arc::new(object_store::memory::InMemory::new()),
            Provider::Memory,
            "",
            prefix,
        )
    }

    pub fn s3(settings: &S3Settings) -> Result<Self> {
        require(&settings.bucket, "S3 bucket")?;
        let mut builder =
            object_store::aws::AmazonS3Builder::new().with_bucket_name(&settings.bucket);
        if let Some(region) = &settings.region {
            builder = builder.with_region(region);
        }
        if let Some(access_key) = &settings.access_key {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &settings.secret_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = builder
            .build()
            .map_err(|e| config_error(Provider::S3, e))?;
        Ok(Self::new(
            Arc::new(store),
            Provider::S3,
            &settings.bucket,
            &settings.prefix,
        ))
    }

    pub fn gcs(settings: &GcsSettings) -> Result<Self> {
        require(&settings.bucket, "GCS bucket")?;
        let mut builder = object_store::gcp::GoogleCloudStorageBuilder::new()
            .with_bucket_name(&settings.bucket);
        if let Some(path) = &settings.service_account_path {
            builder = builder.with_service_account_path(path);
        }
        let store = builder
            .build()
            .map_err(|e| config_error(Provider::GoogleCloud, e))?;
        Ok(Self::new(
            Arc::new(store),
            Provider::GoogleCloud,
            &settings.bucket,
            &settings.prefix,
        ))
    }

    pub fn azure(settings: &AzureSettings) -> Result<Self> {
        require(&settings.account, "Azure storage account")?;
        require(&settings.container, "Azure container")?;
        let mut builder = object_store::azure::MicrosoftAzureBuilder::new()
            .with_account(&settings.account)
            .with_container_name(&settings.container);
        if let Some(access_key) = &settings.access_key {
            builder = builder.with_access_key(access_key);
        }
        let store = builder
            .build()
            .map_err(|e| config_error(Provider::Azure, e))?;
        Ok(Self::new(
            Arc::new(store),
            Provider::Azure,
            &settings.container,
            &settings.prefix,
        ))
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn object_path(&self, segments: &[&str]) -> Result<Path> {
        let mut raw = self.prefix.clone();
        for segment in segments {
            if !raw.is_empty() {
                raw.push('/');
            }
            raw.push_str(segment);
        }
        Path::parse(&raw).map_err(|e| StoreError::InvalidKey {
            key: raw.clone(),
            reason: e.to_string(),
        })
    }

    fn prefix_path(&self) -> Result<Option<Path>> {
        if self.prefix.is_empty() {
            return Ok(None);
        }
        self.object_path(&[]).map(Some)
    }

    fn submission_path(&self, id: &str) -> Result<Path> {
        self.object_path(&[&key::escape(id)?, SUBMISSION_FILE])
    }

    fn attachment_path(&self, submission_id: &str, name: &str) -> Result<Path> {
        self.object_path(&[&key::escape(submission_id)?, &key::escape(name)?])
    }

    fn metadata_path(&self, name: &str) -> Result<Path> {
        self.object_path(&[METADATA_DIR, &key::escape(name)?])
    }

    fn table_path(&self, table_key: &str, format: TableFormat) -> Result<Path> {
        let file = format!("{}.{}", key::escape(table_key)?, format.extension());
        self.object_path(&[TABLES_DIR, &file])
    }

    /// Diagnostic locator such as `s3://bucket/forms/household/uuid%3A1/photo.jpg`
    fn location(&self, path: &Path) -> String {
        let scheme = self.provider.scheme();
        if self.container.is_empty() {
            format!("{scheme}:///{path}")
        } else {
            format!("{scheme}://{}/{path}", self.container)
        }
    }

    async fn put_object(&self, path: &Path, data: Bytes, content_type: &'static str) -> Result<()> {
        let key = path.to_string();
        let store = &self.store;
        let key_ref = key.as_str();
        let size = data.len();
        with_backoff(&self.retry, key_ref, move || {
            let payload = PutPayload::from(data.clone());
            let mut attributes = Attributes::new();
            _ = attributes.insert(Attribute::ContentType, content_type.into());
            let options = PutOptions {
                attributes,
                ..PutOptions::default()
            };
            async move {
                store
                    .put_opts(path, payload, options)
                    .await
                    .map(|_| ())
                    .map_err(|e| StoreError::from_object_store("put", key_ref, e))
            }
        })
        .await?;
        debug!("Stored {size} bytes at {key}", size: size, key: key);
        Ok(())
    }

    async fn get_object(&self, path: &Path, missing_key: &str) -> Result<Bytes> {
        let key = path.to_string();
        let store = &self.store;
        let key_ref = key.as_str();
        with_backoff(&self.retry, key_ref, move || async move {
            let result = store
                .get(path)
                .await
                .map_err(|e| StoreError::from_object_store("get", missing_key, e))?;
            result
                .bytes()
                .await
                .map_err(|e| StoreError::from_object_store("read", key_ref, e))
        })
        .await
    }

    async fn list_objects(&self) -> Result<Vec<ObjectMeta>> {
        let prefix = self.prefix_path()?;
        let prefix = prefix.as_ref();
        let store = &self.store;
        let what = self.describe();
        let what_ref = what.as_str();
        with_backoff(&self.retry, what_ref, move || async move {
            store
                .list(prefix)
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| StoreError::from_object_store("list", what_ref, e))
        })
        .await
    }

    /// Split a listed object into its two segments below the prefix
    fn relative_segments<'a>(&self, path: &'a Path) -> Option<(&'a str, &'a str)> {
        let raw = path.as_ref();
        let relative = if self.prefix.is_empty() {
            raw
        } else {
            raw.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?
        };
        let (first, second) = relative.split_once('/')?;
        if second.contains('/') {
            return None;
        }
        Some((first, second))
    }

    /// Every stored submission and every attachment object, in one listing
    async fn scan(&self) -> Result<(BTreeSet<String>, Vec<(String, String, Path)>)> {
        let mut submissions = BTreeSet::new();
        let mut attachments = Vec::new();
        for meta in self.list_objects().await? {
            let Some((first, second)) = self.relative_segments(&meta.location) else {
                continue;
            };
            if key::is_reserved(first) {
                continue;
            }
            if second == SUBMISSION_FILE {
                submissions.insert(key::unescape(first)?);
            } else if !key::is_reserved(second) {
                attachments.push((
                    key::unescape(first)?,
                    key::unescape(second)?,
                    meta.location.clone(),
                ));
            }
        }
        Ok((submissions, attachments))
    }

    /// Every attachment object below the prefix, ordered by (id, name)
    ///
    /// The owning record may live in another store, as it does for the table
    /// backend or for a dedicated attachment store.
    pub async fn attachment_objects(&self) -> Result<Vec<AttachmentInfo>> {
        let (_, attachments) = self.scan().await?;
        let mut listed: Vec<AttachmentInfo> = attachments
            .into_iter()
            .map(|(submission_id, name, path)| AttachmentInfo {
                name,
                submission_id,
                location: self.location(&path),
            })
            .collect();
        listed.sort_by(|a, b| (&a.submission_id, &a.name).cmp(&(&b.submission_id, &b.name)));
        Ok(listed)
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    fn describe(&self) -> String {
        let scheme = self.provider.scheme();
        format!("{scheme}://{}/{}", self.container, self.prefix)
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<()> {
        let path = self.submission_path(&record.id)?;
        let data = serde_json::to_vec(record)?;
        self.put_object(&path, Bytes::from(data), "application/json").await
    }

    async fn get_submission(&self, id: &str) -> Result<SubmissionRecord> {
        let path = self.submission_path(id)?;
        let data = self.get_object(&path, id).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn list_submissions(&self) -> Result<Vec<String>> {
        let (submissions, _) = self.scan().await?;
        Ok(submissions.into_iter().collect())
    }

    async fn put_attachment(&self, submission_id: &str, name: &str, data: Bytes) -> Result<()> {
        let path = self.attachment_path(submission_id, name)?;
        self.put_object(&path, data, content_type_for(name)).await
    }

    async fn get_attachment(&self, submission_id: &str, name: &str) -> Result<Bytes> {
        let path = self.attachment_path(submission_id, name)?;
        self.get_object(&path, &format!("{submission_id}/{name}")).await
    }

    async fn list_attachments(&self) -> Result<Vec<AttachmentInfo>> {
        self.attachment_objects().await
    }

    async fn put_metadata(&self, name: &str, value: Bytes) -> Result<()> {
        let path = self.metadata_path(name)?;
        self.put_object(&path, value, "application/json").await
    }

    async fn get_metadata(&self, name: &str) -> Result<Bytes> {
        let path = self.metadata_path(name)?;
        self.get_object(&path, name).await
    }

    async fn put_table_bytes(&self, key: &str, format: TableFormat, data: Bytes) -> Result<()> {
        let path = self.table_path(key, format)?;
        self.put_object(&path, data, format.content_type()).await
    }

    async fn get_table_bytes(&self, key: &str, format: TableFormat) -> Result<Bytes> {
        let path = self.table_path(key, format)?;
        self.get_object(&path, key).await
    }
}
