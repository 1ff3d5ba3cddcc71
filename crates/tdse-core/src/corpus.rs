//! Collaborator traits the classifier core consumes.
//!
//! The corpus is split into two capabilities: a [`PostingIndex`] that answers
//! document-frequency and posting-count questions under a cutoff, and a
//! [`DocumentSource`] that draws training and labelling batches and accepts
//! predictions back. `tdse-store::DuckStore` implements both over DuckDB;
//! [`MemoryCorpus`](crate::MemoryCorpus) implements both in memory.

use crate::document::{Document, DocumentId, DocumentPrediction, PostingCount, Term};

/// Sparse term-posting index.
pub trait PostingIndex {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Total number of documents in the corpus, the base of the DF cutoff.
    fn document_count(&self) -> Result<u64, Self::Error>;

    /// All terms whose document frequency is strictly greater than `cutoff`,
    /// ascending by term id.
    fn terms_above(&self, cutoff: f64) -> Result<Vec<Term>, Self::Error>;

    /// Occurrence counts of every included term (df > `cutoff`) in each of
    /// `documents`. Pairs without postings are omitted; callers zero-fill.
    fn posting_counts(
        &self,
        documents: &[DocumentId],
        cutoff: f64,
    ) -> Result<Vec<PostingCount>, Self::Error>;
}

/// Batch selection for the train phase.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingQuery {
    pub limit: usize,
    /// Minimum averaged certainty (inclusive) for a document to be trainable.
    pub certainty_quantile: f64,
    /// `None` means every language.
    pub language: Option<String>,
}

/// Batch selection for one page of the apply phase.
#[derive(Debug, Clone, PartialEq)]
pub struct LabellingQuery {
    pub limit: usize,
    /// Maximum averaged certainty (inclusive) of a labelling candidate.
    pub max_certainty: f64,
    pub language: Option<String>,
    /// Keyset cursor: only documents with an id strictly greater than this.
    pub after: Option<DocumentId>,
}

/// Source of document batches and sink for predictions.
pub trait DocumentSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Up to `limit` trainable documents. The order is the source's own:
    /// `DuckStore` samples at random, `MemoryCorpus` keeps insertion order.
    fn training_documents(&self, query: &TrainingQuery) -> Result<Vec<Document>, Self::Error>;

    /// Up to `limit` labelling candidates, ascending by document id.
    fn labelling_documents(&self, query: &LabellingQuery)
    -> Result<Vec<Document>, Self::Error>;

    /// Overwrite `legal`, `primary_label` and both certainties of each
    /// predicted document.
    fn record_predictions(&self, predictions: &[DocumentPrediction]) -> Result<(), Self::Error>;
}
