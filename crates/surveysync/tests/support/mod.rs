// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-process stand-ins for the survey platform and a write-counting storage
//! wrapper, shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use surveystore::{
    AttachmentInfo, Cursor, ReviewState, Storage, SubmissionRecord, SubmissionSystem, TableFormat,
};
use surveysync::{ExpectedAttachment, PlatformError, RemoteSubmission, SurveyPlatform};

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).unwrap()
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// One submission as the fake platform holds it
#[derive(Debug, Clone)]
pub struct FakeSubmission {
    pub system: SubmissionSystem,
    pub data: Map<String, Value>,
    /// Name and content; `None` for an attachment the device never uploaded
    pub attachments: Vec<(String, Option<Bytes>)>,
}

impl FakeSubmission {
    pub fn new(submitted: DateTime<Utc>, data: Value) -> Self {
        Self {
            system: SubmissionSystem::new(submitted),
            data: object(data),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, name: &str, content: Option<&'static [u8]>) -> Self {
        self.attachments
            .push((name.to_string(), content.map(Bytes::from_static)));
        self
    }

    pub fn rejected(mut self) -> Self {
        self.system.review_state = ReviewState::Rejected;
        self
    }
}

/// How a fake platform call should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    NotFound,
    Protocol,
    Authentication,
    /// Hang for [`STALL`], then answer normally
    Stall,
}

/// How long a stalled call hangs; far beyond any configured timeout
pub const STALL: Duration = Duration::from_secs(3600);

impl Fault {
    fn error(self, what: &str) -> PlatformError {
        match self {
            Fault::Transient => PlatformError::transient(format!("503 on {what}")),
            Fault::NotFound => PlatformError::NotFound(what.to_string()),
            Fault::Protocol => PlatformError::Protocol(format!("garbled {what}")),
            Fault::Authentication => PlatformError::Authentication("token expired".to_string()),
            Fault::Stall => unreachable!("stalls are not errors"),
        }
    }

    /// Act out a fault picked for one call
    async fn apply(fault: Option<Fault>, what: &str) -> Result<(), PlatformError> {
        match fault {
            None => Ok(()),
            Some(Fault::Stall) => {
                tokio::time::sleep(STALL).await;
                Ok(())
            }
            Some(fault) => Err(fault.error(what)),
        }
    }
}

#[derive(Default)]
struct FakeState {
    forms: HashMap<String, BTreeMap<String, FakeSubmission>>,
    /// Remaining failures for list calls
    list_faults: Vec<Fault>,
    /// Failures per submission id for detail fetches, consumed one per call
    detail_faults: HashMap<String, Vec<Fault>>,
    /// Failures per (submission id, name) for attachment fetches, consumed one per call
    attachment_faults: HashMap<(String, String), Vec<Fault>>,
    /// How long each attachment download takes
    transfer_delay: Option<Duration>,
}

/// A survey platform held in memory
///
/// Listing is inclusive of the cursor, like ODK Central's `ge` filter, and
/// ignores `include_rejected` so that the engine's own filter is exercised.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub attachment_calls: AtomicUsize,
    /// Attachment downloads currently running
    in_flight: AtomicUsize,
    /// Most attachment downloads ever running at once
    pub peak_in_flight: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, form_id: &str, id: &str, submission: FakeSubmission) {
        let mut state = self.state.lock().unwrap();
        state
            .forms
            .entry(form_id.to_string())
            .or_default()
            .insert(id.to_string(), submission);
    }

    /// Record an edit made on the platform at `when`
    pub fn edit(&self, form_id: &str, id: &str, when: DateTime<Utc>, data: Value) {
        let mut state = self.state.lock().unwrap();
        let submission = state
            .forms
            .get_mut(form_id)
            .and_then(|form| form.get_mut(id))
            .expect("edited submission exists");
        submission.system.updated_at = Some(when);
        submission.system.review_state = ReviewState::Edited;
        submission.data = object(data);
    }

    pub fn fail_list(&self, faults: &[Fault]) {
        self.state.lock().unwrap().list_faults = faults.to_vec();
    }

    pub fn fail_detail(&self, id: &str, faults: &[Fault]) {
        _ = self
            .state
            .lock()
            .unwrap()
            .detail_faults
            .insert(id.to_string(), faults.to_vec());
    }

    pub fn fail_attachment(&self, id: &str, name: &str, faults: &[Fault]) {
        _ = self
            .state
            .lock()
            .unwrap()
            .attachment_faults
            .insert((id.to_string(), name.to_string()), faults.to_vec());
    }

    pub fn slow_transfers(&self, delay: Duration) {
        self.state.lock().unwrap().transfer_delay = Some(delay);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock().unwrap();
        state.list_faults.clear();
        state.detail_faults.clear();
        state.attachment_faults.clear();
    }

    fn next_fault(faults: Option<&mut Vec<Fault>>) -> Option<Fault> {
        let faults = faults?;
        if faults.is_empty() {
            None
        } else {
            Some(faults.remove(0))
        }
    }

    fn submission(&self, form_id: &str, id: &str) -> Result<FakeSubmission, PlatformError> {
        let state = self.state.lock().unwrap();
        state
            .forms
            .get(form_id)
            .and_then(|form| form.get(id))
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("{form_id}/{id}")))
    }

    fn summary(submission: &FakeSubmission) -> SubmissionSystem {
        let mut system = submission.system.clone();
        system.attachments_expected = submission.attachments.len() as u32;
        system.attachments_present = submission
            .attachments
            .iter()
            .filter(|(_, content)| content.is_some())
            .count() as u32;
        system
    }
}

#[async_trait]
impl SurveyPlatform for FakePlatform {
    async fn list_submissions_since(
        &self,
        form_id: &str,
        since: Option<&Cursor>,
        _include_rejected: bool,
    ) -> Result<Vec<RemoteSubmission>, PlatformError> {
        _ = self.list_calls.fetch_add(1, Ordering::SeqCst);
        let fault = Self::next_fault(Some(&mut self.state.lock().unwrap().list_faults));
        Fault::apply(fault, "list").await?;
        let state = self.state.lock().unwrap();
        let Some(form) = state.forms.get(form_id) else {
            return Ok(Vec::new());
        };
        Ok(form
            .iter()
            .map(|(id, submission)| RemoteSubmission {
                id: id.clone(),
                system: Self::summary(submission),
            })
            .filter(|remote| since.is_none_or(|c| remote.watermark() >= *c))
            .collect())
    }

    async fn fetch_submission(
        &self,
        form_id: &str,
        submission_id: &str,
    ) -> Result<Map<String, Value>, PlatformError> {
        _ = self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let fault = {
            let mut state = self.state.lock().unwrap();
            Self::next_fault(state.detail_faults.get_mut(submission_id))
        };
        Fault::apply(fault, submission_id).await?;
        let submission = self.submission(form_id, submission_id)?;
        // Detail responses carry the id and bookkeeping next to the data
        let mut data = Map::new();
        _ = data.insert("__id".to_string(), json!(submission_id));
        _ = data.insert(
            "__system".to_string(),
            serde_json::to_value(Self::summary(&submission))
                .map_err(|e| PlatformError::Protocol(e.to_string()))?,
        );
        data.extend(submission.data);
        Ok(data)
    }

    async fn list_expected_attachments(
        &self,
        form_id: &str,
        submission_id: &str,
    ) -> Result<Vec<ExpectedAttachment>, PlatformError> {
        let submission = self.submission(form_id, submission_id)?;
        Ok(submission
            .attachments
            .iter()
            .map(|(name, content)| ExpectedAttachment {
                name: name.clone(),
                exists: content.is_some(),
            })
            .collect())
    }

    async fn fetch_attachment(
        &self,
        form_id: &str,
        submission_id: &str,
        name: &str,
    ) -> Result<Bytes, PlatformError> {
        _ = self.attachment_calls.fetch_add(1, Ordering::SeqCst);
        let (fault, delay) = {
            let mut state = self.state.lock().unwrap();
            let key = (submission_id.to_string(), name.to_string());
            let fault = Self::next_fault(state.attachment_faults.get_mut(&key));
            (fault, state.transfer_delay)
        };
        if let Some(delay) = delay {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            _ = self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Fault::apply(fault, name).await?;
        let submission = self.submission(form_id, submission_id)?;
        submission
            .attachments
            .iter()
            .find(|(candidate, _)| candidate == name)
            .and_then(|(_, content)| content.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("{submission_id}/{name}")))
    }
}

/// Storage wrapper that counts every write reaching the inner backend
pub struct CountingStorage<S> {
    inner: S,
    writes: AtomicUsize,
}

impl<S: Storage> CountingStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn count(&self) {
        _ = self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: Storage> Storage for CountingStorage<S> {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> surveystore::Result<()> {
        self.count();
        self.inner.put_submission(record).await
    }

    async fn get_submission(&self, id: &str) -> surveystore::Result<SubmissionRecord> {
        self.inner.get_submission(id).await
    }

    async fn list_submissions(&self) -> surveystore::Result<Vec<String>> {
        self.inner.list_submissions().await
    }

    async fn put_attachment(
        &self,
        submission_id: &str,
        name: &str,
        data: Bytes,
    ) -> surveystore::Result<()> {
        self.count();
        self.inner.put_attachment(submission_id, name, data).await
    }

    async fn get_attachment(&self, submission_id: &str, name: &str) -> surveystore::Result<Bytes> {
        self.inner.get_attachment(submission_id, name).await
    }

    async fn list_attachments(&self) -> surveystore::Result<Vec<AttachmentInfo>> {
        self.inner.list_attachments().await
    }

    async fn put_metadata(&self, name: &str, value: Bytes) -> surveystore::Result<()> {
        self.count();
        self.inner.put_metadata(name, value).await
    }

    async fn get_metadata(&self, name: &str) -> surveystore::Result<Bytes> {
        self.inner.get_metadata(name).await
    }

    async fn put_table_bytes(
        &self,
        key: &str,
        format: TableFormat,
        data: Bytes,
    ) -> surveystore::Result<()> {
        self.count();
        self.inner.put_table_bytes(key, format, data).await
    }

    async fn get_table_bytes(&self, key: &str, format: TableFormat) -> surveystore::Result<Bytes> {
        self.inner.get_table_bytes(key, format).await
    }
}

/// The two-submission form used across the tests
///
/// `A` has a 2x2 nested repeat and three attachments of which two were
/// uploaded; `B` has no repeats and no attachments.
pub fn seed_example(platform: &FakePlatform, form_id: &str) {
    let a = FakeSubmission::new(
        at(10),
        json!({
            "village": "Kisumu",
            "household@odata.navigationLink": "Submissions('A')/household",
            "household": [
                {"__id": "h0", "head": "Ana", "member": [{"age": 31}, {"age": 4}]},
                {"__id": "h1", "head": "Bo", "member": [{"age": 58}, {"age": 60}]}
            ]
        }),
    )
    .with_attachment("photo.jpg", Some(b"jpeg-bytes"))
    .with_attachment("voice note.m4a", Some(b"m4a-bytes"))
    .with_attachment("signature.png", None);

    let b = FakeSubmission::new(at(11), json!({"village": "Kakamega"}));

    platform.upsert(form_id, "A", a);
    platform.upsert(form_id, "B", b);
}
