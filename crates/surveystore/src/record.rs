// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Records persisted by every backend

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Review state assigned to a submission on the survey platform
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ReviewState {
    #[default]
    Received,
    HasIssues,
    Edited,
    Approved,
    Rejected,
}

impl ReviewState {
    /// Name as the platform spells it
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Received => "received",
            ReviewState::HasIssues => "hasIssues",
            ReviewState::Edited => "edited",
            ReviewState::Approved => "approved",
            ReviewState::Rejected => "rejected",
        }
    }
}

/// Platform bookkeeping carried alongside the submitted data
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSystem {
    pub submission_date: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "review_state_or_default")]
    pub review_state: ReviewState,
    /// Attachments the platform expects for this submission
    #[serde(default)]
    pub attachments_expected: u32,
    /// Attachments the platform actually holds; may be lower than expected
    #[serde(default)]
    pub attachments_present: u32,
}

// The platform reports a never-reviewed submission with a null state.
fn review_state_or_default<'de, D>(deserializer: D) -> Result<ReviewState, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<ReviewState>::deserialize(deserializer)?.unwrap_or_default())
}

impl SubmissionSystem {
    pub fn new(submission_date: DateTime<Utc>) -> Self {
        Self {
            submission_date,
            updated_at: None,
            review_state: ReviewState::Received,
            attachments_expected: 0,
            attachments_present: 0,
        }
    }

    /// When the platform last touched this submission
    #[must_use]
    pub fn watermark(&self) -> Cursor {
        Cursor(self.updated_at.unwrap_or(self.submission_date))
    }
}

/// One survey submission as stored: identifier, bookkeeping and nested data
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub id: String,
    #[serde(rename = "__system")]
    pub system: SubmissionSystem,
    /// Nested form data: scalars, groups (objects) and repeat groups (arrays)
    pub data: Map<String, Value>,
}

impl SubmissionRecord {
    pub fn new(id: impl Into<String>, system: SubmissionSystem, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            system,
            data,
        }
    }

    /// True when fewer attachments were present on the platform than expected
    #[must_use]
    pub fn attachments_incomplete(&self) -> bool {
        self.system.attachments_present < self.system.attachments_expected
    }
}

/// Watermark bounding what has already been synchronized
///
/// Ordered by time. Serialized as an RFC 3339 string so that the stored form
/// stays readable in any backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(pub DateTime<Utc>);

impl Cursor {
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| Cursor(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

/// Listing entry for a stored attachment
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttachmentInfo {
    pub name: String,
    pub submission_id: String,
    /// Backend locator for display only, e.g. `s3://bucket/forms/a/b.jpg`
    pub location: String,
}

/// Guess a MIME type from an attachment's file extension
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "amr" => "audio/amr",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "geojson" => "application/geo+json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_watermark_prefers_updated_at() {
        let submitted = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let updated = Utc.with_ymd_and_hms(2024, 3, 2, 8, 30, 0).unwrap();

        let mut system = SubmissionSystem::new(submitted);
        assert_eq!(system.watermark(), Cursor(submitted));

        system.updated_at = Some(updated);
        assert_eq!(system.watermark(), Cursor(updated));
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::json!({
            "id": "uuid:1",
            "__system": {
                "submissionDate": "2024-03-01T10:00:00.000Z",
                "updatedAt": null,
                "reviewState": null,
                "attachmentsExpected": 3,
                "attachmentsPresent": 2
            },
            "data": {"name": "Ana"}
        });
        let record: SubmissionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.system.review_state, ReviewState::Received);
        assert!(record.attachments_incomplete());

        let rejected: ReviewState = serde_json::from_str("\"rejected\"").unwrap();
        assert_eq!(rejected, ReviewState::Rejected);
        let has_issues: ReviewState = serde_json::from_str("\"hasIssues\"").unwrap();
        assert_eq!(has_issues, ReviewState::HasIssues);
    }

    #[test]
    fn test_cursor_serialization() {
        let cursor = Cursor(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        let text = serde_json::to_string(&cursor).unwrap();
        assert_eq!(text, "\"2024-03-01T10:00:00Z\"");
        let back: Cursor = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cursor);

        let offset: Cursor = serde_json::from_str("\"2024-03-01T12:00:00+02:00\"").unwrap();
        assert_eq!(offset, cursor);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("clip.3gp"), "video/3gpp");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
    }
}
