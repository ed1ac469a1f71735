// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Cursor arithmetic, free of I/O
//!
//! A sync run is `(cursor, remote batch) -> (write set, new cursor)`. Keeping
//! both halves pure lets the engine's ordering and advancement rules be tested
//! without a platform or a backend.

use crate::platform::RemoteSubmission;
use std::collections::BTreeMap;
use surveystore::Cursor;

/// One submission selected for persisting
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSubmission {
    pub remote: RemoteSubmission,
    /// Watermark equals the current cursor. Platforms that filter inclusively
    /// return these again; they are rewritten only when not already stored.
    pub boundary: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    /// Ordered by (watermark, id)
    pub entries: Vec<PlannedSubmission>,
    pub skipped_rejected: usize,
    /// Entries older than the cursor, which a well-behaved platform never sends
    pub skipped_stale: usize,
}

/// Select and order the submissions of one remote batch
///
/// When the platform lists the same id twice, the most recently touched
/// entry wins.
#[must_use]
pub fn plan_batch(
    cursor: Option<&Cursor>,
    batch: Vec<RemoteSubmission>,
    include_rejected: bool,
) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut latest: BTreeMap<String, RemoteSubmission> = BTreeMap::new();

    for remote in batch {
        if !include_rejected && remote.is_rejected() {
            plan.skipped_rejected += 1;
            continue;
        }
        if cursor.is_some_and(|c| remote.watermark() < *c) {
            plan.skipped_stale += 1;
            continue;
        }
        match latest.get(&remote.id) {
            Some(existing) if existing.watermark() >= remote.watermark() => {}
            _ => {
                _ = latest.insert(remote.id.clone(), remote);
            }
        }
    }

    plan.entries = latest
        .into_values()
        .map(|remote| {
            let boundary = cursor.is_some_and(|c| remote.watermark() == *c);
            PlannedSubmission { remote, boundary }
        })
        .collect();
    plan.entries.sort_by(|a, b| {
        (a.remote.watermark(), &a.remote.id).cmp(&(b.remote.watermark(), &b.remote.id))
    });
    plan
}

/// Outcome of one planned submission, as far as the cursor cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub watermark: Cursor,
    pub committed: bool,
}

/// The cursor to persist after a batch
///
/// The cursor moves to the greatest committed watermark strictly below the
/// earliest failure, so the next run re-fetches every failed submission. It
/// never moves backwards. `None` means there is still nothing to record.
#[must_use]
pub fn commit_cursor(current: Option<&Cursor>, outcomes: &[Outcome]) -> Option<Cursor> {
    let first_failure = outcomes
        .iter()
        .filter(|o| !o.committed)
        .map(|o| o.watermark)
        .min();

    let committed = outcomes
        .iter()
        .filter(|o| o.committed)
        .map(|o| o.watermark)
        .filter(|w| first_failure.is_none_or(|f| *w < f))
        .max();

    match (current.copied(), committed) {
        (Some(c), Some(w)) => Some(c.max(w)),
        (c, w) => c.or(w),
    }
}
