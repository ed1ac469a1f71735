// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Backend selection from configuration
//!
//! ```yaml
//! backend: s3
//! bucket: survey-data
//! region: us-west-2
//! prefix: forms/household
//! retry:
//!   max_retries: 6
//! ```
//!
//! The table composite needs a caller-supplied [`crate::RowTable`] and is
//! therefore constructed in code rather than from configuration.

use crate::error::{Result, StoreError};
use crate::local::LocalStorage;
use crate::object::{AzureSettings, GcsSettings, ObjectStorage, S3Settings};
use crate::retry::RetryPolicy;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LocalSettings {
    pub root: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MemorySettings {
    pub prefix: String,
}

/// Which backend to build, tagged by `backend`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    Local(LocalSettings),
    S3(S3Settings),
    Gcs(GcsSettings),
    Azure(AzureSettings),
    Memory(MemorySettings),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(flatten)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl StorageConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: StorageConfig = serde_yaml_ng::from_str(text)
            .map_err(|e| StoreError::Configuration(format!("invalid storage config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration without touching any backend
    pub fn validate(&self) -> Result<()> {
        self.retry.validate().map_err(StoreError::Configuration)?;
        let missing = match &self.backend {
            BackendConfig::Local(local) if local.root.as_os_str().is_empty() => Some("local root"),
            BackendConfig::S3(s3) if s3.bucket.trim().is_empty() => Some("s3 bucket"),
            BackendConfig::Gcs(gcs) if gcs.bucket.trim().is_empty() => Some("gcs bucket"),
            BackendConfig::Azure(azure) if azure.account.trim().is_empty() => {
                Some("azure account")
            }
            BackendConfig::Azure(azure) if azure.container.trim().is_empty() => {
                Some("azure container")
            }
            _ => None,
        };
        match missing {
            Some(what) => Err(StoreError::Configuration(format!("{what} is required"))),
            None => Ok(()),
        }
    }

    /// Construct the configured backend
    pub fn build(&self) -> Result<Arc<dyn Storage>> {
        self.validate()?;
        let retry = self.retry.clone();
        let storage: Arc<dyn Storage> = match &self.backend {
            BackendConfig::Local(local) => {
                Arc::new(LocalStorage::new(local.root.clone()).with_retry(retry))
            }
            BackendConfig::S3(s3) => Arc::new(ObjectStorage::s3(s3)?.with_retry(retry)),
            BackendConfig::Gcs(gcs) => Arc::new(ObjectStorage::gcs(gcs)?.with_retry(retry)),
            BackendConfig::Azure(azure) => {
                Arc::new(ObjectStorage::azure(azure)?.with_retry(retry))
            }
            BackendConfig::Memory(memory) => {
                Arc::new(ObjectStorage::in_memory(&memory.prefix).with_retry(retry))
            }
        };
        Ok(storage)
    }
}
