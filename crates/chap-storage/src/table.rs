//! Tabular result files: Snappy-compressed Parquet objects.
//!
//! Each table is a single object. Updating a table for one video purges every
//! row tagged with that video's key and appends the new batch, so
//! re-processing a video replaces its rows instead of duplicating them. The
//! schema is inferred from the merged rows on every write. Updates are
//! read-modify-write and assume a single writer per table.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::json::reader::infer_json_schema_from_iterator;
use arrow::json::{ArrayWriter, ReaderBuilder};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::object_store::ObjectStore;

/// Video table key.
pub const VIDEOS_TABLE: &str = "index/videos.parquet";

/// Match table key.
pub const MATCHES_TABLE: &str = "matches.parquet";

const CONTENT_TYPE_PARQUET: &str = "application/octet-stream";

/// Rows per record batch.
const BATCH_SIZE: usize = 1024;

pub type Row = Map<String, Value>;

/// Decoded table contents.
#[derive(Debug, Clone)]
pub struct Table {
    pub schema: SchemaRef,
    pub rows: Vec<Row>,
}

/// Outcome of one table update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableUpdate {
    pub removed: usize,
    pub added: usize,
    pub total: usize,
}

fn encoding(context: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Encoding(format!("{}: {}", context, e))
}

/// Schema covering every field of `rows`.
///
/// Fields that are only ever null or empty lists have no inferable type and
/// are stored as nullable strings.
pub fn infer_schema(rows: &[Row]) -> StorageResult<SchemaRef> {
    let inferred = infer_json_schema_from_iterator(
        rows.iter().map(|row| Ok(Value::Object(row.clone()))),
    )
    .map_err(|e| encoding("schema inference", e))?;

    let fields: Vec<Field> = inferred.fields().iter().map(|f| concrete_field(f)).collect();
    Ok(Arc::new(Schema::new(fields)))
}

fn concrete_field(field: &Field) -> Field {
    Field::new(field.name(), concrete_type(field.data_type()), true)
}

fn concrete_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Null => DataType::Utf8,
        DataType::List(item) => DataType::List(Arc::new(concrete_field(item))),
        DataType::Struct(fields) => {
            DataType::Struct(fields.iter().map(|f| concrete_field(f)).collect())
        }
        other => other.clone(),
    }
}

/// Encode rows as a Parquet file with the given schema.
pub fn encode_rows(schema: SchemaRef, rows: &[Row]) -> StorageResult<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), schema.clone(), Some(props))
        .map_err(|e| encoding("parquet writer", e))?;
    let mut decoder = ReaderBuilder::new(schema)
        .with_batch_size(BATCH_SIZE)
        .build_decoder()
        .map_err(|e| encoding("row decoder", e))?;

    for chunk in rows.chunks(BATCH_SIZE) {
        decoder
            .serialize(chunk)
            .map_err(|e| encoding("row conversion", e))?;
        if let Some(batch) = decoder.flush().map_err(|e| encoding("row conversion", e))? {
            writer.write(&batch).map_err(|e| encoding("parquet write", e))?;
        }
    }

    writer.into_inner().map_err(|e| encoding("parquet close", e))
}

/// Decode a Parquet file into JSON rows. Null fields are omitted from rows.
pub fn decode_rows(data: &[u8]) -> StorageResult<Table> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(data))
        .map_err(|e| encoding("parquet open", e))?
        .with_batch_size(BATCH_SIZE)
        .build()
        .map_err(|e| encoding("parquet open", e))?;
    let schema = arrow::record_batch::RecordBatchReader::schema(&reader);

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| encoding("parquet read", e))?;
        if batch.num_rows() == 0 {
            continue;
        }
        let mut writer = ArrayWriter::new(Vec::new());
        writer.write(&batch).map_err(|e| encoding("row export", e))?;
        writer.finish().map_err(|e| encoding("row export", e))?;
        let decoded: Vec<Row> = serde_json::from_slice(&writer.into_inner())?;
        rows.extend(decoded);
    }

    Ok(Table { schema, rows })
}

/// Replaces per-key row batches in tables held by an [`ObjectStore`].
#[derive(Clone)]
pub struct TableSink {
    store: Arc<dyn ObjectStore>,
}

impl TableSink {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Current contents of `table`; `None` when the table does not exist yet.
    pub async fn read_table(&self, table: &str) -> StorageResult<Option<Table>> {
        match self.store.get(table).await? {
            Some(data) => decode_rows(&data)
                .map(Some)
                .map_err(|e| StorageError::corrupt_table(table, e)),
            None => Ok(None),
        }
    }

    /// Current rows of `table`; empty when the table does not exist yet.
    pub async fn read_rows(&self, table: &str) -> StorageResult<Vec<Row>> {
        Ok(self
            .read_table(table)
            .await?
            .map(|t| t.rows)
            .unwrap_or_default())
    }

    /// Drop every row whose `key_field` equals `key`, then append `rows`.
    ///
    /// A table that exists but cannot be decoded is left untouched and the
    /// update fails, rather than overwriting other videos' rows.
    pub async fn replace_rows(
        &self,
        table: &str,
        key_field: &str,
        key: &str,
        rows: Vec<Row>,
    ) -> StorageResult<TableUpdate> {
        let existing = self.read_table(table).await?;
        let (previous_schema, existing_rows) = match existing {
            Some(t) => (Some(t.schema), t.rows),
            None => (None, Vec::new()),
        };
        let before = existing_rows.len();

        let mut merged: Vec<Row> = existing_rows
            .into_iter()
            .filter(|row| row.get(key_field).and_then(Value::as_str) != Some(key))
            .collect();
        let removed = before - merged.len();
        let added = rows.len();
        merged.extend(rows);

        // An emptied table keeps its previous columns.
        let schema = match (merged.is_empty(), previous_schema) {
            (false, _) => Some(infer_schema(&merged)?),
            (true, previous) => previous,
        };

        match schema {
            Some(schema) => {
                self.store
                    .put(table, encode_rows(schema, &merged)?, CONTENT_TYPE_PARQUET)
                    .await?;
                info!(
                    table,
                    key_field,
                    key,
                    removed,
                    added,
                    total = merged.len(),
                    "Updated table"
                );
            }
            None => debug!(table, key, "No rows and no existing table, nothing written"),
        }

        Ok(TableUpdate {
            removed,
            added,
            total: merged.len(),
        })
    }
}

/// Serialize a record into a table row.
pub fn to_row<T: serde::Serialize>(value: &T) -> StorageResult<Row> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        _ => Err(StorageError::Encoding("table rows must serialize to JSON objects".to_string())),
    }
}
