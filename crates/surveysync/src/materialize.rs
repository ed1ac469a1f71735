// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The wide submissions table
//!
//! One row per stored submission, ordered by id. `KEY` comes first, then one
//! nullable column per flattened name seen in any submission, either sorted
//! (the default) or in first-seen order. Column types are inferred from the
//! values present:
//!
//! - only integers: `Int64`
//! - integers and floats: `Float64`
//! - only booleans: `Boolean`
//! - anything else, including a column with no values: `Utf8`

use crate::error::Result;
use crate::flatten::{FlatRecord, FlatValue, Flattener, KEY_COLUMN};
use arrow_array::builder::{BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema};
use diagnostics::*;
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use surveystore::{NotFoundExt, Storage};

/// Key under which [`refresh_submissions_df`] stores the table by default
pub const SUBMISSIONS_TABLE_KEY: &str = "submissions";

// Parallel record reads while materializing
const READ_CONCURRENCY: usize = 8;

/// Read every stored submission and assemble the wide table
///
/// Read-only; a submission removed between listing and reading is left out.
pub async fn get_submissions_df(storage: &dyn Storage, sort_columns: bool) -> Result<RecordBatch> {
    let mut ids = storage.list_submissions().await?;
    ids.sort();
    ids.dedup();
    let listed = ids.len();
    let location = storage.describe();
    debug!("Materializing {listed} submissions from {location}", listed: listed, location: location);

    let records: Vec<_> = stream::iter(ids)
        .map(move |id| async move { storage.get_submission(&id).await.optional() })
        .buffered(READ_CONCURRENCY)
        .try_collect()
        .await?;

    let flattener = Flattener::default();
    let mut rows = Vec::with_capacity(records.len());
    for record in records.into_iter().flatten() {
        rows.push(flattener.flatten_record(&record)?);
    }
    build_wide_table(&rows, sort_columns)
}

/// Materialize the table and store its native form under `key`
pub async fn refresh_submissions_df(
    storage: &dyn Storage,
    key: &str,
    sort_columns: bool,
) -> Result<RecordBatch> {
    let table = get_submissions_df(storage, sort_columns).await?;
    storage.store_dataframe(key, &table).await?;
    let rows = table.num_rows();
    let columns = table.num_columns();
    info!("Stored submissions table {key}: {rows} rows, {columns} columns", key: key, rows: rows, columns: columns);
    Ok(table)
}

/// Merge flattened records into one table, rows in the given order
pub fn build_wide_table(rows: &[FlatRecord], sort_columns: bool) -> Result<RecordBatch> {
    let names = column_names(rows, sort_columns);
    let lookups: Vec<HashMap<&str, &FlatValue>> = rows
        .iter()
        .map(|row| row.iter().map(|(name, value)| (name.as_str(), value)).collect())
        .collect();

    let mut fields = Vec::with_capacity(names.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(names.len());
    for name in &names {
        let values: Vec<Option<&FlatValue>> = lookups
            .iter()
            .map(|lookup| lookup.get(name.as_str()).copied().filter(|v| !v.is_null()))
            .collect();
        let is_key = name == KEY_COLUMN;
        let (data_type, array) = build_column(&values);
        fields.push(Field::new(name.as_str(), data_type, !is_key));
        columns.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// `KEY` first, then every other name once
fn column_names(rows: &[FlatRecord], sort_columns: bool) -> Vec<String> {
    let mut names = vec![KEY_COLUMN.to_string()];
    if sort_columns {
        let sorted: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.iter().map(|(name, _)| name.as_str()))
            .filter(|name| *name != KEY_COLUMN)
            .collect();
        names.extend(sorted.into_iter().map(str::to_string));
    } else {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for row in rows {
            for (name, _) in row {
                if name != KEY_COLUMN && seen.insert(name.as_str()) {
                    names.push(name.clone());
                }
            }
        }
    }
    names
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

fn infer_kind(values: &[Option<&FlatValue>]) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for value in values.iter().flatten() {
        let next = match value {
            FlatValue::Int(_) => ColumnKind::Int,
            FlatValue::Float(_) => ColumnKind::Float,
            FlatValue::Bool(_) => ColumnKind::Bool,
            FlatValue::Text(_) | FlatValue::Null => ColumnKind::Text,
        };
        kind = Some(match (kind, next) {
            (None, next) => next,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int), ColumnKind::Float)
            | (Some(ColumnKind::Float), ColumnKind::Int) => ColumnKind::Float,
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

fn build_column(values: &[Option<&FlatValue>]) -> (DataType, ArrayRef) {
    match infer_kind(values) {
        ColumnKind::Int => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Some(FlatValue::Int(i)) => builder.append_value(*i),
                    _ => builder.append_null(),
                }
            }
            (DataType::Int64, Arc::new(builder.finish()))
        }
        ColumnKind::Float => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Some(FlatValue::Float(f)) => builder.append_value(*f),
                    Some(FlatValue::Int(i)) => builder.append_value(*i as f64),
                    _ => builder.append_null(),
                }
            }
            (DataType::Float64, Arc::new(builder.finish()))
        }
        ColumnKind::Bool => {
            let mut builder = BooleanBuilder::with_capacity(values.len());
            for value in values {
                match value {
                    Some(FlatValue::Bool(b)) => builder.append_value(*b),
                    _ => builder.append_null(),
                }
            }
            (DataType::Boolean, Arc::new(builder.finish()))
        }
        ColumnKind::Text => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value.and_then(render_text) {
                    Some(text) => builder.append_value(text),
                    None => builder.append_null(),
                }
            }
            (DataType::Utf8, Arc::new(builder.finish()))
        }
    }
}

fn render_text(value: &FlatValue) -> Option<String> {
    match value {
        FlatValue::Null => None,
        FlatValue::Bool(b) => Some(b.to_string()),
        FlatValue::Int(i) => Some(i.to_string()),
        FlatValue::Float(f) => Some(f.to_string()),
        FlatValue::Text(s) => Some(s.clone()),
    }
}
