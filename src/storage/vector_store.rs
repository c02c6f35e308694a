//! `lancedb`-backed implementation of `VectorStoreAdapter`, one table per
//! subject collection. Schema and record-batch construction are adapted
//! from the teacher's `LanceStore` (`storage/lance_store.rs`): a flat Arrow
//! schema with a `FixedSizeList<Float32>` vector column, built fresh per
//! write via `RecordBatch::try_new` and read back with `try_collect` over
//! the query stream.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{Array, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase};
use parking_lot::RwLock;
use tracing::info;

use crate::error::{RetrievalError, Result};
use crate::types::ChunkMetadata;

use super::{collection_name, VectorMatch, VectorRecord, VectorStoreAdapter};

const METADATA_KEYS: &[&str] = &[
    "document_id",
    "page",
    "filename",
    "header",
    "parent_header",
    "chunk_type",
    "importance",
    "sentence_count",
];

pub struct LanceVectorStore {
    db: lancedb::Connection,
    dimension: usize,
    known_tables: RwLock<HashMap<String, ()>>,
}

impl LanceVectorStore {
    pub async fn new(persist_directory: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(persist_directory)
            .map_err(|e| RetrievalError::index(format!("failed to create persist dir: {e}")))?;
        let db = lancedb::connect(persist_directory)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to open LanceDB: {e}")))?;

        Ok(Self { db, dimension, known_tables: RwLock::new(HashMap::new()) })
    }

    fn schema(&self) -> Arc<Schema> {
        let mut fields = vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
        ];
        for key in METADATA_KEYS {
            fields.push(Field::new(*key, DataType::Utf8, true));
        }
        fields.push(Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                self.dimension as i32,
            ),
            true,
        ));
        Arc::new(Schema::new(fields))
    }

    async fn ensure_table(&self, subject_id: &str) -> Result<String> {
        let table_name = collection_name(subject_id);

        if self.known_tables.read().contains_key(&table_name) {
            return Ok(table_name);
        }

        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to list tables: {e}")))?;

        if !names.contains(&table_name) {
            let schema = self.schema();
            let batch = self.empty_seed_batch(&schema)?;
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema.clone());
            self.db
                .create_table(&table_name, Box::new(batches))
                .execute()
                .await
                .map_err(|e| RetrievalError::index(format!("failed to create table {table_name}: {e}")))?;

            let table = self
                .db
                .open_table(&table_name)
                .execute()
                .await
                .map_err(|e| RetrievalError::index(format!("failed to open table {table_name}: {e}")))?;
            table.delete("id = '__seed__'").await.ok();
        }

        self.known_tables.write().insert(table_name.clone(), ());
        Ok(table_name)
    }

    fn empty_seed_batch(&self, schema: &Arc<Schema>) -> Result<RecordBatch> {
        let mut columns: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(vec!["__seed__"])),
            Arc::new(StringArray::from(vec![""])),
        ];
        for _ in METADATA_KEYS {
            columns.push(Arc::new(StringArray::from(vec![""])));
        }
        columns.push(self.vector_column(&[vec![0.0f32; self.dimension]]));

        RecordBatch::try_new(schema.clone(), columns)
            .map_err(|e| RetrievalError::index(format!("failed to build seed batch: {e}")))
    }

    fn vector_column(&self, vectors: &[Vec<f32>]) -> Arc<dyn Array> {
        let flat: Vec<f32> = vectors.iter().flat_map(|v| v.iter().copied()).collect();
        let values = Float32Array::from(flat);
        let item_field = Arc::new(Field::new("item", DataType::Float32, true));
        Arc::new(arrow_array::FixedSizeListArray::new(
            item_field,
            self.dimension as i32,
            Arc::new(values),
            None,
        ))
    }

    fn metadata_column(records: &[VectorRecord], key: &str) -> Arc<dyn Array> {
        let values: Vec<String> = records
            .iter()
            .map(|r| r.metadata.get(key).cloned().unwrap_or_default())
            .collect();
        Arc::new(StringArray::from(values))
    }
}

#[async_trait]
impl VectorStoreAdapter for LanceVectorStore {
    async fn add(&self, subject_id: &str, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for r in &records {
            if r.vector.len() != self.dimension {
                return Err(RetrievalError::index(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    r.vector.len()
                )));
            }
        }

        let table_name = self.ensure_table(subject_id).await?;
        let table = self
            .db
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to open table {table_name}: {e}")))?;

        let schema = self.schema();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let vectors: Vec<Vec<f32>> = records.iter().map(|r| r.vector.clone()).collect();

        let mut columns: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(texts)),
        ];
        for key in METADATA_KEYS {
            columns.push(Self::metadata_column(&records, key));
        }
        columns.push(self.vector_column(&vectors));

        let batch = RecordBatch::try_new(schema.clone(), columns)
            .map_err(|e| RetrievalError::index(format!("failed to build record batch: {e}")))?;
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("LanceDB add failed: {e}")))?;

        info!(subject_id, count = records.len(), "added chunks to dense store");
        Ok(())
    }

    async fn query(&self, subject_id: &str, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        let table_name = collection_name(subject_id);
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to list tables: {e}")))?;
        if !names.contains(&table_name) {
            return Ok(Vec::new());
        }

        let table = self
            .db
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to open table {table_name}: {e}")))?;

        let results = table
            .query()
            .nearest_to(vector)
            .map_err(|e| RetrievalError::index(format!("failed to build vector query: {e}")))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("LanceDB vector search failed: {e}")))?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| RetrievalError::index(format!("failed to collect query results: {e}")))?;

        Ok(extract_matches(&batches))
    }

    async fn get_by_document(&self, subject_id: &str, document_id: &str) -> Result<Vec<VectorRecord>> {
        let table_name = collection_name(subject_id);
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to list tables: {e}")))?;
        if !names.contains(&table_name) {
            return Ok(Vec::new());
        }

        let table = self
            .db
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to open table {table_name}: {e}")))?;

        let predicate = format!("document_id = '{}'", document_id.replace('\'', "''"));
        let results = table
            .query()
            .only_if(predicate)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("LanceDB get failed: {e}")))?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| RetrievalError::index(format!("failed to collect get results: {e}")))?;

        Ok(extract_records(&batches))
    }

    async fn list_chunks(&self, subject_id: &str) -> Result<Vec<VectorRecord>> {
        let table_name = collection_name(subject_id);
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to list tables: {e}")))?;
        if !names.contains(&table_name) {
            return Ok(Vec::new());
        }

        let table = self
            .db
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to open table {table_name}: {e}")))?;

        let results = table
            .query()
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("LanceDB scan failed: {e}")))?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| RetrievalError::index(format!("failed to collect scan results: {e}")))?;

        let mut records = extract_records(&batches);
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn delete(&self, subject_id: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let table_name = collection_name(subject_id);
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to list tables: {e}")))?;
        if !names.contains(&table_name) {
            return Ok(());
        }

        let table = self
            .db
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to open table {table_name}: {e}")))?;

        let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect();
        let predicate = format!("id IN ({})", quoted.join(", "));
        table
            .delete(&predicate)
            .await
            .map_err(|e| RetrievalError::index(format!("LanceDB delete failed: {e}")))?;
        Ok(())
    }

    async fn count(&self, subject_id: &str) -> Result<usize> {
        let table_name = collection_name(subject_id);
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to list tables: {e}")))?;
        if !names.contains(&table_name) {
            return Ok(0);
        }
        let table = self
            .db
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to open table {table_name}: {e}")))?;
        table
            .count_rows(None)
            .await
            .map_err(|e| RetrievalError::index(format!("LanceDB count failed: {e}")))
    }

    async fn list_subjects(&self) -> Result<Vec<String>> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RetrievalError::index(format!("failed to list tables: {e}")))?;
        Ok(names
            .into_iter()
            .filter(|n| n.starts_with("sentinel_"))
            .map(|n| n.trim_start_matches("sentinel_").replace('_', "-"))
            .collect())
    }
}

fn column_str(batch: &RecordBatch, name: &str, row: usize) -> String {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .map(|a| a.value(row).to_string())
        .unwrap_or_default()
}

fn row_metadata(batch: &RecordBatch, row: usize) -> ChunkMetadata {
    METADATA_KEYS
        .iter()
        .map(|key| (key.to_string(), column_str(batch, key, row)))
        .collect()
}

fn extract_records(batches: &[RecordBatch]) -> Vec<VectorRecord> {
    let mut out = Vec::new();
    for batch in batches {
        let Some(ids) = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>()) else {
            continue;
        };
        for row in 0..batch.num_rows() {
            if ids.value(row) == "__seed__" {
                continue;
            }
            out.push(VectorRecord {
                id: ids.value(row).to_string(),
                text: column_str(batch, "text", row),
                metadata: row_metadata(batch, row),
                vector: Vec::new(),
            });
        }
    }
    out
}

fn extract_matches(batches: &[RecordBatch]) -> Vec<VectorMatch> {
    let mut out = Vec::new();
    for batch in batches {
        let Some(ids) = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>()) else {
            continue;
        };
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        for row in 0..batch.num_rows() {
            if ids.value(row) == "__seed__" {
                continue;
            }
            let similarity = distances.map(|d| 1.0 - d.value(row) as f64).unwrap_or(0.0);
            out.push(VectorMatch {
                id: ids.value(row).to_string(),
                text: column_str(batch, "text", row),
                metadata: row_metadata(batch, row),
                similarity,
            });
        }
    }
    out
}
