// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Incremental synchronization of one form into a storage backend
//!
//! A run reads the persisted cursor, asks the platform for everything touched
//! since, persists each submission followed by its attachments, and finally
//! advances the cursor over the committed prefix of the batch. The cursor is
//! the last thing written, so an interrupted run is simply repeated.

use crate::cursor::{Outcome, PlannedSubmission, commit_cursor, plan_batch};
use crate::error::{PlatformError, Result, SyncError};
use crate::platform::{ExpectedAttachment, RemoteSubmission, SurveyPlatform};
use diagnostics::*;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use surveystore::{NotFoundExt, RetryPolicy, Storage, SubmissionRecord, with_backoff};

// Data keys that duplicate the record-level id and bookkeeping
const DETAIL_RECORD_KEYS: [&str; 2] = ["__id", "__system"];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SyncOptions {
    /// Also sync submissions the platform marks as rejected
    pub include_rejected: bool,
    /// Skip attachment transfer entirely
    pub no_attachments: bool,
    /// Upper bound on concurrent attachment downloads per submission
    pub max_concurrent_transfers: usize,
    /// Timeout for any single platform call, in seconds
    pub platform_timeout_secs: u64,
    /// Retry policy for transient platform errors
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            include_rejected: false,
            no_attachments: false,
            max_concurrent_transfers: 4,
            platform_timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_transfers == 0 {
            return Err(SyncError::Configuration(
                "max_concurrent_transfers must be at least 1".to_string(),
            ));
        }
        if self.platform_timeout_secs == 0 {
            return Err(SyncError::Configuration(
                "platform_timeout_secs must be positive".to_string(),
            ));
        }
        self.retry.validate().map_err(SyncError::Configuration)
    }

    fn platform_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_timeout_secs)
    }
}

/// Sync engine for one form on one platform
pub struct SyncEngine<P: SurveyPlatform> {
    platform: P,
    form_id: String,
    options: SyncOptions,
}

impl<P: SurveyPlatform> SyncEngine<P> {
    pub fn new(platform: P, form_id: impl Into<String>, options: SyncOptions) -> Result<Self> {
        let form_id = form_id.into();
        if form_id.trim().is_empty() {
            return Err(SyncError::Configuration("form id is required".to_string()));
        }
        options.validate()?;
        Ok(Self {
            platform,
            form_id,
            options,
        })
    }

    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Pull everything new or changed since the stored cursor
    ///
    /// Attachments go to `attachment_storage` when given, otherwise to
    /// `storage`. Returns the ids written in this run, in watermark order.
    /// When some submissions fail, [`SyncError::Incomplete`] carries both the
    /// written and the failed ids and the cursor stops short of the first
    /// failure. Protocol and authentication errors abort the whole batch
    /// without touching the cursor.
    pub async fn sync_data(
        &self,
        storage: &dyn Storage,
        attachment_storage: Option<&dyn Storage>,
    ) -> Result<Vec<String>> {
        let form_id = self.form_id.as_str();
        let target = if self.options.no_attachments {
            None
        } else {
            Some(attachment_storage.unwrap_or(storage)).filter(|s| s.attachments_supported())
        };

        let cursor = storage.get_cursor().await.optional()?;
        match &cursor {
            Some(c) => {
                let from = c.to_string();
                info!("Syncing form {form_id} from cursor {from}", form_id: form_id, from: from);
            }
            None => info!("Syncing form {form_id} from the beginning", form_id: form_id),
        }

        let platform = &self.platform;
        let since = cursor.as_ref();
        let include_rejected = self.options.include_rejected;
        let batch = self
            .call("list submissions", move || {
                platform.list_submissions_since(form_id, since, include_rejected)
            })
            .await?;

        let fetched = batch.len();
        let plan = plan_batch(cursor.as_ref(), batch, include_rejected);
        let planned = plan.entries.len();
        let skipped_rejected = plan.skipped_rejected;
        debug!(
            "Platform returned {fetched} submissions; {planned} planned, {skipped_rejected} rejected skipped", fetched: fetched, planned: planned, skipped_rejected: skipped_rejected
        );

        let mut synced = Vec::new();
        let mut failed = Vec::new();
        let mut outcomes = Vec::with_capacity(planned);

        for entry in &plan.entries {
            let id = entry.remote.id.as_str();
            let watermark = entry.remote.watermark();

            let result = if entry.boundary {
                match self.already_synced(storage, target, &entry.remote).await {
                    Ok(true) => {
                        debug!("Submission {id} already stored at the cursor, skipping", id: id);
                        outcomes.push(Outcome {
                            watermark,
                            committed: true,
                        });
                        continue;
                    }
                    Ok(false) => self.persist(entry, storage, target).await,
                    Err(e) => Err(e),
                }
            } else {
                self.persist(entry, storage, target).await
            };

            match result {
                Ok(()) => {
                    synced.push(id.to_string());
                    outcomes.push(Outcome {
                        watermark,
                        committed: true,
                    });
                }
                Err(e) if is_fatal(&e) => {
                    let reason = e.to_string();
                    error!("Aborting sync of form {form_id} at submission {id}: {reason}", form_id: form_id, id: id, reason: reason);
                    return Err(e);
                }
                Err(e) => {
                    let reason = e.to_string();
                    error!("Failed to sync submission {id}: {reason}", id: id, reason: reason);
                    failed.push((id.to_string(), reason));
                    outcomes.push(Outcome {
                        watermark,
                        committed: false,
                    });
                }
            }
        }

        match commit_cursor(cursor.as_ref(), &outcomes) {
            Some(next) if Some(next) != cursor => {
                storage.put_cursor(&next).await?;
                let to = next.to_string();
                info!("Advanced cursor for form {form_id} to {to}", form_id: form_id, to: to);
            }
            _ => debug!("Cursor for form {form_id} unchanged", form_id: form_id),
        }

        let count = synced.len();
        if failed.is_empty() {
            info!("Synced {count} submissions for form {form_id}", count: count, form_id: form_id);
            Ok(synced)
        } else {
            let failures = failed.len();
            warn!("Synced {count} submissions for form {form_id}, {failures} failed", count: count, form_id: form_id, failures: failures);
            Err(SyncError::Incomplete { synced, failed })
        }
    }

    /// Whether a boundary submission is already fully stored
    async fn already_synced(
        &self,
        storage: &dyn Storage,
        target: Option<&dyn Storage>,
        remote: &RemoteSubmission,
    ) -> Result<bool> {
        let Some(stored) = storage.get_submission(&remote.id).await.optional()? else {
            return Ok(false);
        };
        if stored.system.watermark() != remote.watermark() {
            return Ok(false);
        }
        let Some(target) = target else {
            return Ok(true);
        };
        if stored.system.attachments_present == 0 {
            return Ok(true);
        }

        // A separate attachment store lists nothing for records it does not
        // hold, so each expected attachment is looked up by name
        let platform = &self.platform;
        let form_id = self.form_id.as_str();
        let id = remote.id.as_str();
        let expected: Vec<ExpectedAttachment> = self
            .call("list attachments", move || {
                platform.list_expected_attachments(form_id, id)
            })
            .await?;
        for attachment in expected.iter().filter(|a| a.exists) {
            if target
                .get_attachment(id, &attachment.name)
                .await
                .optional()?
                .is_none()
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write one submission, then its attachments
    async fn persist(
        &self,
        entry: &PlannedSubmission,
        storage: &dyn Storage,
        target: Option<&dyn Storage>,
    ) -> Result<()> {
        let platform = &self.platform;
        let form_id = self.form_id.as_str();
        let id = entry.remote.id.as_str();

        let mut data = self
            .call("fetch submission", move || platform.fetch_submission(form_id, id))
            .await?;
        for key in DETAIL_RECORD_KEYS {
            _ = data.shift_remove(key);
        }

        let mut system = entry.remote.system.clone();
        let mut present = Vec::new();
        if target.is_some() && (system.attachments_expected > 0 || system.attachments_present > 0)
        {
            let expected: Vec<ExpectedAttachment> = self
                .call("list attachments", move || {
                    platform.list_expected_attachments(form_id, id)
                })
                .await?;
            system.attachments_expected = count_u32(expected.len());
            present = expected
                .into_iter()
                .filter(|a| a.exists)
                .map(|a| a.name)
                .collect();
            system.attachments_present = count_u32(present.len());
        }

        let record = SubmissionRecord::new(id, system, data);
        storage.put_submission(&record).await?;
        if record.attachments_incomplete() {
            let expected = record.system.attachments_expected;
            let held = record.system.attachments_present;
            warn!("Submission {id} has {held} of {expected} expected attachments on the platform", id: id, held: held, expected: expected);
        }

        if let Some(target) = target {
            self.transfer_attachments(id, &present, target).await?;
        }
        Ok(())
    }

    /// Copy attachments with bounded concurrency
    ///
    /// Every transfer runs to completion; the first failure is reported after
    /// all siblings have finished.
    async fn transfer_attachments(
        &self,
        id: &str,
        names: &[String],
        target: &dyn Storage,
    ) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let results: Vec<Result<()>> = stream::iter(names)
            .map(move |name| self.transfer_attachment(id, name, target))
            .buffer_unordered(self.options.max_concurrent_transfers)
            .collect()
            .await;

        let total = results.len();
        let mut first_error = None;
        let mut failures = 0;
        for result in results {
            if let Err(e) = result {
                failures += 1;
                let reason = e.to_string();
                warn!("Attachment transfer for submission {id} failed: {reason}", id: id, reason: reason);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => {
                error!("{failures} of {total} attachments failed for submission {id}", failures: failures, total: total, id: id);
                Err(e)
            }
            None => {
                debug!("Transferred {total} attachments for submission {id}", total: total, id: id);
                Ok(())
            }
        }
    }

    async fn transfer_attachment(&self, id: &str, name: &str, target: &dyn Storage) -> Result<()> {
        let platform = &self.platform;
        let form_id = self.form_id.as_str();
        let data = self
            .call("fetch attachment", move || {
                platform.fetch_attachment(form_id, id, name)
            })
            .await?;
        target.put_attachment(id, name, data).await?;
        Ok(())
    }

    /// Run a platform call under the configured timeout and retry policy
    async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, PlatformError>>,
    {
        let timeout = self.options.platform_timeout();
        let result = with_backoff(&self.options.retry, what, move || {
            let attempt = op();
            async move {
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(PlatformError::transient(format!(
                        "no response within {}s",
                        timeout.as_secs()
                    ))),
                }
            }
        })
        .await;

        result.map_err(|e| match e {
            PlatformError::Protocol(message) => SyncError::Protocol(message),
            other => SyncError::Platform(other),
        })
    }
}

/// Errors that end the whole batch rather than one submission
fn is_fatal(e: &SyncError) -> bool {
    matches!(
        e,
        SyncError::Protocol(_) | SyncError::Platform(PlatformError::Authentication(_))
    )
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
