// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Nested submission data to flat column/value pairs
//!
//! Groups (objects) contribute their key to the path, repeat groups (arrays)
//! contribute the zero-based element index: `household/0/member/1/age`.
//! Segments are joined with `/`, which therefore must not occur in field names.
//! An empty repeat group or group produces no columns at all.

use crate::error::FlattenError;
use chrono::SecondsFormat;
use serde_json::{Map, Value};
use surveystore::SubmissionRecord;

/// Separator between path segments in a column name
pub const SEPARATOR: char = '/';

/// Column holding the submission id in every flattened record
pub const KEY_COLUMN: &str = "KEY";

/// Prefix of the columns derived from platform bookkeeping
pub const SYSTEM_PREFIX: &str = "__system";

pub const DEFAULT_MAX_DEPTH: usize = 64;

// OData link placeholders the platform emits next to expanded repeat groups
const NAVIGATION_LINK_SUFFIX: &str = "@odata.navigationLink";

// Row id the platform assigns to each repeat element
const REPEAT_ROW_ID: &str = "__id";

// Top-level data keys that duplicate record-level fields
const RECORD_LEVEL_KEYS: [&str; 3] = [KEY_COLUMN, "__id", SYSTEM_PREFIX];

/// A scalar leaf of a flattened record
#[derive(Debug, Clone, PartialEq)]
pub enum FlatValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FlatValue {
    fn from_scalar(value: &Value) -> Self {
        match value {
            Value::Null => FlatValue::Null,
            Value::Bool(b) => FlatValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FlatValue::Int(i),
                None => n.as_f64().map_or(FlatValue::Null, FlatValue::Float),
            },
            Value::String(s) => FlatValue::Text(s.clone()),
            // Containers never reach here
            Value::Array(_) | Value::Object(_) => FlatValue::Text(value.to_string()),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, FlatValue::Null)
    }
}

/// Column/value pairs in walk order
pub type FlatRecord = Vec<(String, FlatValue)>;

#[derive(Debug, Clone, Copy)]
pub struct Flattener {
    max_depth: usize,
}

impl Default for Flattener {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Flattener {
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Flatten nested form data
    pub fn flatten(&self, data: &Map<String, Value>) -> Result<FlatRecord, FlattenError> {
        let mut out = Vec::new();
        self.walk_object("", data, 1, false, &mut out)?;
        Ok(out)
    }

    /// Flatten a stored record: `KEY`, then the `__system/*` columns, then data
    pub fn flatten_record(&self, record: &SubmissionRecord) -> Result<FlatRecord, FlattenError> {
        let system = &record.system;
        let mut out = vec![
            (KEY_COLUMN.to_string(), FlatValue::Text(record.id.clone())),
            (
                system_column("submissionDate"),
                FlatValue::Text(
                    system
                        .submission_date
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                ),
            ),
            (
                system_column("updatedAt"),
                system.updated_at.map_or(FlatValue::Null, |t| {
                    FlatValue::Text(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                }),
            ),
            (
                system_column("reviewState"),
                FlatValue::Text(system.review_state.as_str().to_string()),
            ),
            (
                system_column("attachmentsExpected"),
                FlatValue::Int(i64::from(system.attachments_expected)),
            ),
            (
                system_column("attachmentsPresent"),
                FlatValue::Int(i64::from(system.attachments_present)),
            ),
        ];

        for (key, value) in &record.data {
            if RECORD_LEVEL_KEYS.contains(&key.as_str()) {
                continue;
            }
            self.walk_field("", key, value, 1, false, &mut out)?;
        }
        Ok(out)
    }

    fn walk_object(
        &self,
        path: &str,
        object: &Map<String, Value>,
        depth: usize,
        repeat_element: bool,
        out: &mut FlatRecord,
    ) -> Result<(), FlattenError> {
        for (key, value) in object {
            self.walk_field(path, key, value, depth, repeat_element, out)?;
        }
        Ok(())
    }

    fn walk_field(
        &self,
        path: &str,
        key: &str,
        value: &Value,
        depth: usize,
        repeat_element: bool,
        out: &mut FlatRecord,
    ) -> Result<(), FlattenError> {
        if key.ends_with(NAVIGATION_LINK_SUFFIX) || (repeat_element && key == REPEAT_ROW_ID) {
            return Ok(());
        }
        let child = join(path, key);
        self.walk_value(child, value, depth, out)
    }

    fn walk_value(
        &self,
        path: String,
        value: &Value,
        depth: usize,
        out: &mut FlatRecord,
    ) -> Result<(), FlattenError> {
        match value {
            Value::Object(object) => {
                self.check_depth(&path, depth)?;
                self.walk_object(&path, object, depth + 1, false, out)
            }
            Value::Array(elements) => {
                self.check_depth(&path, depth)?;
                for (index, element) in elements.iter().enumerate() {
                    let element_path = join(&path, &index.to_string());
                    match element {
                        Value::Object(object) => {
                            self.check_depth(&element_path, depth + 1)?;
                            self.walk_object(&element_path, object, depth + 2, true, out)?;
                        }
                        other => self.walk_value(element_path, other, depth + 1, out)?,
                    }
                }
                Ok(())
            }
            scalar => {
                out.push((path, FlatValue::from_scalar(scalar)));
                Ok(())
            }
        }
    }

    fn check_depth(&self, path: &str, depth: usize) -> Result<(), FlattenError> {
        if depth > self.max_depth {
            return Err(FlattenError::TooDeep {
                limit: self.max_depth,
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}{SEPARATOR}{segment}")
    }
}

fn system_column(name: &str) -> String {
    join(SYSTEM_PREFIX, name)
}

/// Flatten with the default depth limit
pub fn flatten(data: &Map<String, Value>) -> Result<FlatRecord, FlattenError> {
    Flattener::default().flatten(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use surveystore::SubmissionSystem;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn columns(record: &FlatRecord) -> Vec<&str> {
        record.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn test_scalars_and_groups() {
        let flat = flatten(&object(json!({
            "name": "Ana",
            "location": {"village": "Kisumu", "gps": {"lat": -0.1, "lon": 34.7}},
            "consent": true,
            "age": 34,
            "notes": null
        })))
        .unwrap();

        assert_eq!(
            flat,
            vec![
                ("name".to_string(), FlatValue::Text("Ana".into())),
                ("location/village".to_string(), FlatValue::Text("Kisumu".into())),
                ("location/gps/lat".to_string(), FlatValue::Float(-0.1)),
                ("location/gps/lon".to_string(), FlatValue::Float(34.7)),
                ("consent".to_string(), FlatValue::Bool(true)),
                ("age".to_string(), FlatValue::Int(34)),
                ("notes".to_string(), FlatValue::Null),
            ]
        );
    }

    #[test]
    fn test_repeat_group_indexing() {
        let flat = flatten(&object(json!({
            "g": [
                {"x": 1, "inner": [{"y": "a"}, {"y": "b"}]},
                {"x": 2, "inner": []}
            ]
        })))
        .unwrap();

        assert_eq!(
            columns(&flat),
            vec!["g/0/x", "g/0/inner/0/y", "g/0/inner/1/y", "g/1/x"]
        );
        assert!(!columns(&flat).iter().any(|c| c.starts_with("g/2")));
    }

    #[test]
    fn test_platform_noise_is_dropped() {
        let flat = flatten(&object(json!({
            "g@odata.navigationLink": "Submissions('uuid:1')/g",
            "g": [{"__id": "abc", "x": 1}],
            "meta": {"__id": "kept", "instanceID": "uuid:1"}
        })))
        .unwrap();

        assert_eq!(columns(&flat), vec!["g/0/x", "meta/__id", "meta/instanceID"]);
    }

    #[test]
    fn test_flattening_is_deterministic() {
        let data = object(json!({"b": [{"c": 1.5}], "a": {"z": "q", "y": false}}));
        let first = flatten(&data).unwrap();
        let second = flatten(&data).unwrap();
        assert_eq!(first, second);
        assert_eq!(columns(&first), vec!["b/0/c", "a/z", "a/y"]);
    }

    #[test]
    fn test_depth_limit() {
        let mut value = json!("leaf");
        for _ in 0..10 {
            value = json!({ "n": value });
        }
        let data = object(value);

        assert!(Flattener::with_max_depth(16).flatten(&data).is_ok());
        let err = Flattener::with_max_depth(4).flatten(&data).unwrap_err();
        assert_eq!(
            err,
            FlattenError::TooDeep {
                limit: 4,
                path: "n/n/n/n/n".to_string(),
            }
        );
    }

    #[test]
    fn test_flatten_record_column_order() {
        let mut system =
            SubmissionSystem::new(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        system.attachments_expected = 2;
        let record = SubmissionRecord::new(
            "uuid:9",
            system,
            object(json!({"__id": "uuid:9", "q1": "yes"})),
        );

        let flat = Flattener::default().flatten_record(&record).unwrap();
        assert_eq!(
            columns(&flat),
            vec![
                "KEY",
                "__system/submissionDate",
                "__system/updatedAt",
                "__system/reviewState",
                "__system/attachmentsExpected",
                "__system/attachmentsPresent",
                "q1",
            ]
        );
        assert_eq!(flat[0].1, FlatValue::Text("uuid:9".into()));
        assert_eq!(flat[1].1, FlatValue::Text("2024-01-02T03:04:05Z".into()));
        assert_eq!(flat[2].1, FlatValue::Null);
        assert_eq!(flat[3].1, FlatValue::Text("received".into()));
        assert_eq!(flat[4].1, FlatValue::Int(2));
    }
}
