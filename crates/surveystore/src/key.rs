// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Key escaping shared by the path-based backends
//!
//! Submission ids and attachment names are percent-encoded into a single path
//! segment. The encoded form never starts with `.`, so every reserved name
//! below (all dot-prefixed) is disjoint from user keys.

use crate::error::{Result, StoreError};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

const KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// File (or object) holding the raw submission record inside its directory
pub const SUBMISSION_FILE: &str = ".submission.json";

/// Directory for engine-internal metadata such as the cursor
pub const METADATA_DIR: &str = ".metadata";

/// Directory for serialized wide tables
pub const TABLES_DIR: &str = ".tables";

/// Percent-encode one key into a path segment
pub fn escape(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(StoreError::InvalidKey {
            key: raw.to_string(),
            reason: "keys must not be empty".to_string(),
        });
    }
    let escaped = utf8_percent_encode(raw, KEY_ESCAPE).to_string();
    Ok(match escaped.strip_prefix('.') {
        Some(rest) => format!("%2E{rest}"),
        None => escaped,
    })
}

/// Reverse [`escape`]
pub fn unescape(segment: &str) -> Result<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| StoreError::InvalidKey {
            key: segment.to_string(),
            reason: format!("invalid UTF-8 after decoding: {e}"),
        })
}

/// True for segments written by the backends themselves rather than by callers
#[must_use]
pub fn is_reserved(segment: &str) -> bool {
    segment.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_plain_ids_unchanged() {
        assert_eq!(escape("abc-123_x.jpg").ok().as_deref(), Some("abc-123_x.jpg"));
    }

    #[test]
    fn test_escape_specials() {
        let escaped = escape("uuid:1/2 3").unwrap();
        assert_eq!(escaped, "uuid%3A1%2F2%203");
        assert_eq!(unescape(&escaped).unwrap(), "uuid:1/2 3");
    }

    #[test]
    fn test_leading_dot_never_reserved() {
        for raw in [".", "..", ".metadata", ".submission.json"] {
            let escaped = escape(raw).unwrap();
            assert!(!is_reserved(&escaped), "{raw} escaped to {escaped}");
            assert_eq!(unescape(&escaped).unwrap(), raw);
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(escape(""), Err(StoreError::InvalidKey { .. })));
    }

    #[test]
    fn test_unicode_round_trip() {
        let raw = "réponse ✓";
        assert_eq!(unescape(&escape(raw).unwrap()).unwrap(), raw);
    }
}
