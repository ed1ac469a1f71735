// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The survey platform as seen by the sync engine
//!
//! An HTTP client for a concrete platform (ODK Central, for example) lives
//! outside this crate and implements [`SurveyPlatform`].

use crate::error::PlatformError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use surveystore::{Cursor, ReviewState, SubmissionSystem};

/// Summary entry returned when listing submissions
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteSubmission {
    #[serde(rename = "__id")]
    pub id: String,
    #[serde(rename = "__system")]
    pub system: SubmissionSystem,
}

impl RemoteSubmission {
    #[must_use]
    pub fn watermark(&self) -> Cursor {
        self.system.watermark()
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.system.review_state == ReviewState::Rejected
    }
}

/// An attachment the platform expects for a submission
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExpectedAttachment {
    pub name: String,
    /// False when the form expects the file but the device never uploaded it
    pub exists: bool,
}

#[async_trait]
pub trait SurveyPlatform: Send + Sync {
    /// Submissions last touched at or after `since`, every submission when
    /// `since` is `None`. Rejected submissions may be filtered server-side
    /// when `include_rejected` is false; the engine filters again regardless.
    async fn list_submissions_since(
        &self,
        form_id: &str,
        since: Option<&Cursor>,
        include_rejected: bool,
    ) -> Result<Vec<RemoteSubmission>, PlatformError>;

    /// Nested form data for one submission
    async fn fetch_submission(
        &self,
        form_id: &str,
        submission_id: &str,
    ) -> Result<Map<String, Value>, PlatformError>;

    async fn list_expected_attachments(
        &self,
        form_id: &str,
        submission_id: &str,
    ) -> Result<Vec<ExpectedAttachment>, PlatformError>;

    async fn fetch_attachment(
        &self,
        form_id: &str,
        submission_id: &str,
        name: &str,
    ) -> Result<Bytes, PlatformError>;
}
