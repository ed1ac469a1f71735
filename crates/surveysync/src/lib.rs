// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Cursor-driven synchronization of survey submissions
//!
//! # Architecture
//!
//! - **SurveyPlatform**: the remote collaborator, implemented by a platform client
//! - **SyncEngine**: pulls new and changed submissions plus attachments into a
//!   [`surveystore::Storage`] and advances the persisted cursor
//! - **Flattener**: nested repeat groups to `path/0/field` columns
//! - **Materializer**: all stored submissions as one wide Arrow table
//!
//! # Usage
//!
//! ```no_run
//! # async fn example<P: surveysync::SurveyPlatform>(platform: P) -> Result<(), Box<dyn std::error::Error>> {
//! use surveystore::StorageConfig;
//! use surveysync::{SyncEngine, SyncOptions, get_submissions_df};
//!
//! let storage = StorageConfig::from_yaml("backend: local\nroot: /var/lib/surveys\n")?.build()?;
//! let engine = SyncEngine::new(platform, "household_survey", SyncOptions::default())?;
//! let new_ids = engine.sync_data(storage.as_ref(), None).await?;
//! let table = get_submissions_df(storage.as_ref(), true).await?;
//! # Ok(())
//! # }
//! ```

pub mod cursor;
mod engine;
mod error;
pub mod flatten;
pub mod materialize;
mod platform;

pub use cursor::{BatchPlan, Outcome, PlannedSubmission, commit_cursor, plan_batch};
pub use engine::{SyncEngine, SyncOptions};
pub use error::{FlattenError, PlatformError, Result, SyncError};
pub use flatten::{FlatRecord, FlatValue, Flattener};
pub use materialize::{
    SUBMISSIONS_TABLE_KEY, build_wide_table, get_submissions_df, refresh_submissions_df,
};
pub use platform::{ExpectedAttachment, RemoteSubmission, SurveyPlatform};
