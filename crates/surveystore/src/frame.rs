// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Serialization of the wide submissions table
//!
//! Two encodings are supported:
//! - Parquet, the native form. The Arrow schema is embedded, so column types,
//!   nullability and nulls come back exactly.
//! - CSV, the portable form. One header row, one row per submission. Types are
//!   inferred on reload, which is lossy: an all-null column, or a text column
//!   whose values all look numeric or boolean, can come back with a different
//!   type than it was written with.

use crate::error::Result;
use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use bytes::Bytes;
use diagnostics::*;
use parquet::arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder};
use parquet::file::properties::WriterProperties;
use std::io::Cursor;
use std::sync::Arc;

/// Encoding used for a stored table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableFormat {
    Parquet,
    Csv,
}

impl TableFormat {
    /// File extension appended to the stored key
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Parquet => "parquet",
            TableFormat::Csv => "csv",
        }
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            TableFormat::Parquet => "application/vnd.apache.parquet",
            TableFormat::Csv => "text/csv",
        }
    }
}

/// Serialize a table to Parquet bytes
pub fn encode_parquet(batch: &RecordBatch) -> Result<Bytes> {
    let mut buffer = Vec::new();
    {
        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
        writer.write(batch)?;
        let _ = writer.close()?;
    }

    let size = buffer.len();
    let rows = batch.num_rows();
    debug!("Encoded {rows} rows to Parquet: {size} bytes", rows: rows, size: size);
    Ok(Bytes::from(buffer))
}

/// Deserialize Parquet bytes written by [`encode_parquet`]
pub fn decode_parquet(bytes: Bytes) -> Result<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    concat(schema, &batches)
}

/// Serialize a table to CSV bytes with a header row
pub fn encode_csv(batch: &RecordBatch) -> Result<Bytes> {
    let mut writer = arrow_csv::WriterBuilder::new()
        .with_header(true)
        .build(Vec::new());
    writer.write(batch)?;
    Ok(Bytes::from(writer.into_inner()))
}

/// Deserialize CSV bytes, inferring column types from the data
pub fn decode_csv(bytes: Bytes) -> Result<RecordBatch> {
    let format = arrow_csv::reader::Format::default().with_header(true);
    let (schema, _) = format.infer_schema(Cursor::new(&bytes), None)?;
    let schema = Arc::new(schema);

    let reader = arrow_csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(Cursor::new(bytes))?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    concat(schema, &batches)
}

fn concat(schema: SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch> {
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(arrow_select::concat::concat_batches(&schema, batches)?)
}
