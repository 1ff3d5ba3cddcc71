//! DuckDB storage layer for the document corpus and its posting index.

use std::path::Path;

use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, LargeStringArray, StringArray};
use arrow::record_batch::RecordBatch;
use duckdb::types::Value;
use duckdb::{Connection, params_from_iter};
use serde::Deserialize;
use tdse_core::{
    Document, DocumentId, DocumentPrediction, DocumentSource, Label, LabellingQuery,
    PostingCount, PostingIndex, Term, TrainingQuery,
};
use tracing::{debug, info};

use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS labels (
    label_id BIGINT PRIMARY KEY,
    label VARCHAR NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS documents (
    document_id VARCHAR PRIMARY KEY,
    language VARCHAR,
    legal BOOLEAN NOT NULL DEFAULT true,
    primary_label BIGINT,
    legal_certainty DOUBLE NOT NULL DEFAULT 0,
    label_certainty DOUBLE NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS terms (
    term_id BIGINT PRIMARY KEY,
    term VARCHAR NOT NULL UNIQUE,
    document_frequency BIGINT NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS postings (
    posting_id BIGINT PRIMARY KEY,
    document_id VARCHAR NOT NULL,
    term_id BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS posting_positions (
    posting_id BIGINT NOT NULL,
    position BIGINT NOT NULL
);
";

const DOCUMENT_COLUMNS: &str =
    "document_id, language, legal, primary_label, legal_certainty, label_certainty";

/// Contents of a label seed file: `{"labels": [{"label": "Mail", "labelId": 1}]}`.
#[derive(Debug, Deserialize)]
pub struct LabelSeed {
    pub labels: Vec<Label>,
}

/// Outcome of importing an analyst-labelled dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// Rows read from the dataset file.
    pub rows: usize,
    /// Documents that matched a row and were marked certified.
    pub updated: usize,
}

/// Row totals reported by [`DuckStore::corpus_counts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusCounts {
    pub documents: usize,
    pub terms: usize,
    pub labels: usize,
    pub certified: usize,
    pub candidates: usize,
}

/// DuckDB store for the classifier corpus.
///
/// Five tables: `documents` (the mutable labelling state), `labels`, and the
/// posting index `terms` / `postings` / `posting_positions`. The number of
/// positions recorded for a posting is the term's occurrence count in that
/// document.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for a corpus that survives across runs.
pub struct DuckStore {
    conn: Connection,
}

impl DuckStore {
    /// Open an in-memory DuckDB database with the corpus schema.
    pub fn open() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open or create a persistent DuckDB database at the given path.
    ///
    /// Missing tables are created; existing ones are left untouched.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Check whether the corpus holds any documents.
    pub fn has_documents(&self) -> bool {
        self.count_table("documents").is_ok_and(|n| n > 0)
    }

    // ── Counts ──

    /// Number of rows in the `terms` table.
    pub fn term_count(&self) -> Result<usize, StoreError> {
        self.count_table("terms")
    }

    /// Number of rows in the `labels` table.
    pub fn label_count(&self) -> Result<usize, StoreError> {
        self.count_table("labels")
    }

    /// Document, term and label totals, plus how many documents are
    /// trainable (`mean certainty >= certified`) and how many are labelling
    /// candidates (`mean certainty <= low`).
    pub fn corpus_counts(&self, certified: f64, low: f64) -> Result<CorpusCounts, StoreError> {
        let by_certainty = |op: &str, bound: f64| -> Result<usize, StoreError> {
            let sql = format!(
                "SELECT count(*)::BIGINT FROM documents \
                 WHERE (legal_certainty + label_certainty) / 2 {op} ?"
            );
            Ok(self.query_i64(&sql, vec![Value::Double(bound)])? as usize)
        };
        Ok(CorpusCounts {
            documents: self.count_table("documents")?,
            terms: self.term_count()?,
            labels: self.label_count()?,
            certified: by_certainty(">=", certified)?,
            candidates: by_certainty("<=", low)?,
        })
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {table}");
        Ok(self.query_i64(&sql, Vec::new())? as usize)
    }

    fn query_i64(&self, sql: &str, params: Vec<Value>) -> Result<i64, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow(params_from_iter(params))?.collect();
        let batch = batches
            .iter()
            .find(|b| b.num_rows() > 0)
            .ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| StoreError::Other("scalar column not i64".into()))?;
        Ok(col.value(0))
    }

    // ── Documents ──

    /// Fetch a single document by id.
    pub fn get_document(&self, id: &DocumentId) -> Result<Document, StoreError> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = ?");
        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([id.as_str()])?.collect();
        documents_from_batches(&batches)?
            .into_iter()
            .next()
            .ok_or(StoreError::NoResults)
    }

    fn select_documents(
        &self,
        conditions: &[&str],
        order_by: &str,
        limit: usize,
        params: Vec<Value>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {order_by} LIMIT {limit}"));
        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow(params_from_iter(params))?.collect();
        documents_from_batches(&batches)
    }

    // ── Labels ──

    /// All labels, ordered by id.
    pub fn labels(&self) -> Result<Vec<Label>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT label_id, label FROM labels ORDER BY label_id")?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let mut labels = Vec::new();
        for batch in &batches {
            let ids = column::<Int64Array>(batch, "label_id")?;
            let names = batch
                .column_by_name("label")
                .ok_or_else(|| StoreError::Other("missing 'label' column".into()))?;
            for row in 0..batch.num_rows() {
                let name = get_string(names.as_ref(), row)
                    .ok_or_else(|| StoreError::Other(format!("null label at row {row}")))?;
                labels.push(Label {
                    id: ids.value(row),
                    name,
                });
            }
        }
        Ok(labels)
    }

    /// Seed the `labels` table from a JSON seed file if it is empty.
    ///
    /// Returns the number of labels inserted (0 when labels already exist).
    pub fn seed_labels(&self, path: &Path) -> Result<usize, StoreError> {
        if self.label_count()? > 0 {
            return Ok(0);
        }
        if !path.exists() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        let seed: LabelSeed = serde_json::from_slice(&std::fs::read(path)?)?;

        self.conn.execute_batch("BEGIN TRANSACTION")?;
        let inserted = self.insert_labels(&seed.labels);
        self.finish_transaction(inserted.is_ok())?;
        let inserted = inserted?;
        info!(count = inserted, path = %path.display(), "seeded labels");
        Ok(inserted)
    }

    fn insert_labels(&self, labels: &[Label]) -> Result<usize, StoreError> {
        let mut stmt = self
            .conn
            .prepare("INSERT INTO labels (label_id, label) VALUES (?, ?)")?;
        let mut inserted = 0;
        for label in labels {
            inserted += stmt.execute(duckdb::params![label.id, label.name])?;
        }
        Ok(inserted)
    }

    // ── Labelled dataset import ──

    /// Mark the documents listed in a `documentId;legal;label` file as
    /// analyst-certified.
    ///
    /// `legal` is true exactly when the column reads `legal`; the label is
    /// resolved by name and both certainties are set to 1.0. An unknown label
    /// aborts the import before any row is touched.
    pub fn import_labelled_dataset(&self, path: &Path) -> Result<ImportSummary, StoreError> {
        if !path.exists() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        let source = format!(
            "read_csv('{}', delim = ';', header = true, \
             columns = {{'documentId': 'VARCHAR', 'legal': 'VARCHAR', 'label': 'VARCHAR'}})",
            path.display().to_string().replace('\'', "''")
        );

        let unknown_sql = format!(
            "SELECT DISTINCT c.label FROM {source} c \
             LEFT JOIN labels l ON l.label = c.label \
             WHERE l.label_id IS NULL ORDER BY 1 LIMIT 1"
        );
        let mut stmt = self.conn.prepare(&unknown_sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        if let Some(batch) = batches.iter().find(|b| b.num_rows() > 0) {
            let label = get_string(batch.column(0).as_ref(), 0).unwrap_or_default();
            return Err(StoreError::UnknownLabel(label));
        }

        let rows = self.query_i64(&format!("SELECT count(*)::BIGINT FROM {source}"), Vec::new())?
            as usize;

        let update_sql = format!(
            "UPDATE documents SET \
                legal = src.legal, \
                primary_label = src.label_id, \
                legal_certainty = 1.0, \
                label_certainty = 1.0 \
             FROM ( \
                SELECT c.documentId AS document_id, c.legal = 'legal' AS legal, l.label_id \
                FROM {source} c JOIN labels l ON l.label = c.label \
             ) src \
             WHERE documents.document_id = src.document_id"
        );
        let updated = self.conn.execute(&update_sql, [])?;
        info!(rows, updated, path = %path.display(), "imported labelled dataset");
        Ok(ImportSummary { rows, updated })
    }

    fn finish_transaction(&self, commit: bool) -> Result<(), StoreError> {
        if commit {
            self.conn.execute_batch("COMMIT")?;
        } else {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    /// Access the underlying DuckDB connection (ingestion and fixtures).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl PostingIndex for DuckStore {
    type Error = StoreError;

    fn document_count(&self) -> Result<u64, StoreError> {
        Ok(self.count_table("documents")? as u64)
    }

    fn terms_above(&self, cutoff: f64) -> Result<Vec<Term>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT term_id, document_frequency FROM terms \
             WHERE document_frequency > ? ORDER BY term_id ASC",
        )?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([cutoff])?.collect();
        let mut terms = Vec::new();
        for batch in &batches {
            let ids = column::<Int64Array>(batch, "term_id")?;
            let dfs = column::<Int64Array>(batch, "document_frequency")?;
            for row in 0..batch.num_rows() {
                terms.push(Term {
                    id: ids.value(row),
                    document_frequency: dfs.value(row).max(0) as u64,
                });
            }
        }
        Ok(terms)
    }

    fn posting_counts(
        &self,
        documents: &[DocumentId],
        cutoff: f64,
    ) -> Result<Vec<PostingCount>, StoreError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; documents.len()].join(", ");
        let sql = format!(
            "SELECT p.document_id, p.term_id, count(pp.position)::BIGINT AS occurrences \
             FROM postings p \
             JOIN terms t ON t.term_id = p.term_id \
             LEFT JOIN posting_positions pp ON pp.posting_id = p.posting_id \
             WHERE t.document_frequency > ? AND p.document_id IN ({placeholders}) \
             GROUP BY p.document_id, p.term_id"
        );
        let mut params = Vec::with_capacity(documents.len() + 1);
        params.push(Value::Double(cutoff));
        params.extend(documents.iter().map(|d| Value::Text(d.as_str().to_string())));

        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow(params_from_iter(params))?.collect();

        let mut counts = Vec::new();
        for batch in &batches {
            let docs = batch
                .column_by_name("document_id")
                .ok_or_else(|| StoreError::Other("missing 'document_id' column".into()))?;
            let terms = column::<Int64Array>(batch, "term_id")?;
            let occurrences = column::<Int64Array>(batch, "occurrences")?;
            for row in 0..batch.num_rows() {
                let document = get_string(docs.as_ref(), row)
                    .ok_or_else(|| StoreError::Other(format!("null document_id at row {row}")))?;
                counts.push(PostingCount {
                    document: DocumentId::new(document),
                    term: terms.value(row),
                    occurrences: u32::try_from(occurrences.value(row)).unwrap_or(u32::MAX),
                });
            }
        }
        debug!(
            documents = documents.len(),
            postings = counts.len(),
            cutoff,
            "fetched posting counts"
        );
        Ok(counts)
    }
}

impl DocumentSource for DuckStore {
    type Error = StoreError;

    fn training_documents(&self, query: &TrainingQuery) -> Result<Vec<Document>, StoreError> {
        let mut conditions = vec!["(legal_certainty + label_certainty) / 2 >= ?"];
        let mut params = vec![Value::Double(query.certainty_quantile)];
        if let Some(language) = &query.language {
            conditions.push("language = ?");
            params.push(Value::Text(language.clone()));
        }
        self.select_documents(&conditions, "random()", query.limit, params)
    }

    fn labelling_documents(&self, query: &LabellingQuery) -> Result<Vec<Document>, StoreError> {
        let mut conditions = vec!["(legal_certainty + label_certainty) / 2 <= ?"];
        let mut params = vec![Value::Double(query.max_certainty)];
        if let Some(language) = &query.language {
            conditions.push("language = ?");
            params.push(Value::Text(language.clone()));
        }
        if let Some(after) = &query.after {
            conditions.push("document_id > ?");
            params.push(Value::Text(after.as_str().to_string()));
        }
        self.select_documents(&conditions, "document_id ASC", query.limit, params)
    }

    fn record_predictions(&self, predictions: &[DocumentPrediction]) -> Result<(), StoreError> {
        if predictions.is_empty() {
            return Ok(());
        }
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        let written = self.write_predictions(predictions);
        self.finish_transaction(written.is_ok())?;
        written?;
        debug!(count = predictions.len(), "recorded predictions");
        Ok(())
    }
}

impl DuckStore {
    fn write_predictions(&self, predictions: &[DocumentPrediction]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "UPDATE documents SET legal = ?, legal_certainty = ?, \
             primary_label = ?, label_certainty = ? WHERE document_id = ?",
        )?;
        for p in predictions {
            stmt.execute(duckdb::params![
                p.legal.class,
                p.legal.confidence,
                p.label.class,
                p.label.confidence,
                p.document.as_str(),
            ])?;
        }
        Ok(())
    }
}

// ── Arrow extraction helpers ──

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, StoreError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::Other(format!("missing '{name}' column")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| StoreError::Other(format!("unexpected type for '{name}' column")))
}

/// Extract a string value from an Arrow array (handles Utf8 and LargeUtf8).
fn get_string(col: &dyn Array, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    col.as_any()
        .downcast_ref::<StringArray>()
        .map(|arr| arr.value(row).to_string())
        .or_else(|| {
            col.as_any()
                .downcast_ref::<LargeStringArray>()
                .map(|arr| arr.value(row).to_string())
        })
}

fn documents_from_batches(batches: &[RecordBatch]) -> Result<Vec<Document>, StoreError> {
    let mut documents = Vec::new();
    for batch in batches {
        let ids = batch
            .column_by_name("document_id")
            .ok_or_else(|| StoreError::Other("missing 'document_id' column".into()))?;
        let languages = batch
            .column_by_name("language")
            .ok_or_else(|| StoreError::Other("missing 'language' column".into()))?;
        let legal = column::<BooleanArray>(batch, "legal")?;
        let labels = column::<Int64Array>(batch, "primary_label")?;
        let legal_certainty = column::<Float64Array>(batch, "legal_certainty")?;
        let label_certainty = column::<Float64Array>(batch, "label_certainty")?;

        for row in 0..batch.num_rows() {
            let id = get_string(ids.as_ref(), row)
                .ok_or_else(|| StoreError::Other(format!("null document_id at row {row}")))?;
            documents.push(Document {
                id: DocumentId::new(id),
                language: get_string(languages.as_ref(), row),
                legal: legal.value(row),
                primary_label: (!labels.is_null(row)).then(|| labels.value(row)),
                legal_certainty: legal_certainty.value(row),
                label_certainty: label_certainty.value(row),
            });
        }
    }
    Ok(documents)
}
