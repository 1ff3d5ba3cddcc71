//! Bag-of-words feature vectors from the posting index.
//!
//! The vocabulary is not fixed: every batch derives a document-frequency
//! cutoff from the live corpus size and keeps only terms whose document
//! frequency exceeds it. Rare terms carry little signal and inflate the
//! dimension, so the cutoff doubles as dimensionality reduction.
//!
//! Column order is ascending term id. Within one batch every vector has the
//! same length and the same term-to-column mapping; vectors from batches built
//! under different cutoffs are not comparable.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tdse_core::{DocumentId, FeatureVector, PostingIndex, TermId};
use tracing::debug;

use crate::ClassifyError;

/// How per-term values are derived from postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorMode {
    /// Occurrence count per term.
    #[default]
    BagOfWords,
    /// Presence/absence per term. Declared but not implemented.
    SetOfWords,
}

impl VectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BagOfWords => "bow",
            Self::SetOfWords => "sow",
        }
    }
}

impl fmt::Display for VectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorMode {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bow" | "bag-of-words" => Ok(Self::BagOfWords),
            "sow" | "set-of-words" => Ok(Self::SetOfWords),
            other => Err(ClassifyError::Configuration(format!(
                "unknown vector mode '{other}' (expected bow or sow)"
            ))),
        }
    }
}

/// Minimum document frequency a term must exceed to become a column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cutoff(f64);

impl Cutoff {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Derives a [`Cutoff`] as `document_count * df_quantile`. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutoffPolicy {
    df_quantile: f64,
}

impl CutoffPolicy {
    pub fn new(df_quantile: f64) -> Self {
        Self { df_quantile }
    }

    pub fn df_quantile(&self) -> f64 {
        self.df_quantile
    }

    pub fn for_count(&self, document_count: u64) -> Cutoff {
        Cutoff(document_count as f64 * self.df_quantile)
    }

    /// Resolve the cutoff against the current corpus size.
    pub fn resolve<I: PostingIndex>(&self, index: &I) -> Result<Cutoff, ClassifyError> {
        let count = index.document_count().map_err(ClassifyError::index)?;
        let cutoff = self.for_count(count);
        debug!(
            documents = count,
            df_quantile = self.df_quantile,
            cutoff = cutoff.0,
            "resolved cutoff"
        );
        Ok(cutoff)
    }
}

/// Builds feature vectors for documents against a [`PostingIndex`].
pub struct VectorBuilder<'a, I> {
    index: &'a I,
    mode: VectorMode,
}

impl<'a, I: PostingIndex> VectorBuilder<'a, I> {
    pub fn new(index: &'a I) -> Self {
        Self {
            index,
            mode: VectorMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: VectorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build the vector of a single document.
    pub fn build(
        &self,
        document: &DocumentId,
        cutoff: Cutoff,
    ) -> Result<FeatureVector, ClassifyError> {
        let mut vectors = self.build_batch(std::slice::from_ref(document), cutoff)?;
        vectors
            .pop()
            .ok_or_else(|| ClassifyError::ShapeMismatch("no vector built for document".into()))
    }

    /// Build one vector per document, all under the same cutoff and column
    /// order. Any index failure fails the whole batch; no partial vectors are
    /// returned.
    pub fn build_batch(
        &self,
        documents: &[DocumentId],
        cutoff: Cutoff,
    ) -> Result<Vec<FeatureVector>, ClassifyError> {
        if self.mode == VectorMode::SetOfWords {
            return Err(ClassifyError::UnsupportedVectorMode(self.mode.as_str()));
        }

        let terms = self
            .index
            .terms_above(cutoff.value())
            .map_err(ClassifyError::index)?;
        let columns: HashMap<TermId, usize> =
            terms.iter().enumerate().map(|(col, t)| (t.id, col)).collect();

        let mut rows: HashMap<&DocumentId, Vec<usize>> = HashMap::with_capacity(documents.len());
        for (row, doc) in documents.iter().enumerate() {
            rows.entry(doc).or_default().push(row);
        }

        let counts = self
            .index
            .posting_counts(documents, cutoff.value())
            .map_err(ClassifyError::index)?;

        let mut matrix = vec![vec![0u32; terms.len()]; documents.len()];
        for count in &counts {
            // A posting whose term crossed the cutoff between the two queries
            // has no column in this batch.
            let Some(&col) = columns.get(&count.term) else {
                continue;
            };
            if let Some(targets) = rows.get(&count.document) {
                for &row in targets {
                    matrix[row][col] = count.occurrences;
                }
            }
        }

        debug!(
            documents = documents.len(),
            columns = terms.len(),
            postings = counts.len(),
            "built feature vectors"
        );
        Ok(matrix.into_iter().map(FeatureVector::new).collect())
    }
}

/// Dense `f64` matrix of a batch of vectors.
pub fn to_matrix(vectors: &[FeatureVector]) -> Vec<Vec<f64>> {
    vectors.iter().map(FeatureVector::to_f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdse_core::{Document, MemoryCorpus};

    fn doc(id: &str) -> Document {
        Document {
            id: DocumentId::new(id),
            language: None,
            legal: true,
            primary_label: None,
            legal_certainty: 0.0,
            label_certainty: 0.0,
        }
    }

    /// df: term 1 → 3, term 2 → 1, term 3 → 2, term 5 → 2.
    fn corpus() -> MemoryCorpus {
        let corpus = MemoryCorpus::new();
        for id in ["a", "b", "c", "d"] {
            corpus.add_document(doc(id)).unwrap();
        }
        corpus.add_posting(&"a".into(), 1, 2).unwrap();
        corpus.add_posting(&"a".into(), 2, 7).unwrap();
        corpus.add_posting(&"b".into(), 1, 1).unwrap();
        corpus.add_posting(&"b".into(), 3, 4).unwrap();
        corpus.add_posting(&"c".into(), 1, 5).unwrap();
        corpus.add_posting(&"c".into(), 3, 1).unwrap();
        corpus.add_posting(&"a".into(), 5, 1).unwrap();
        corpus.add_posting(&"c".into(), 5, 2).unwrap();
        corpus
    }

    #[test]
    fn cutoff_scales_with_corpus_size() {
        let corpus = corpus();
        let cutoff = CutoffPolicy::new(0.25).resolve(&corpus).unwrap();
        assert_eq!(cutoff.value(), 1.0);
        assert_eq!(CutoffPolicy::new(0.005).for_count(10_000).value(), 50.0);
    }

    #[test]
    fn vectors_follow_ascending_term_order() {
        let corpus = corpus();
        let builder = VectorBuilder::new(&corpus);
        let v = builder.build(&"a".into(), Cutoff::new(0.0)).unwrap();
        // Columns: terms 1, 2, 3, 5.
        assert_eq!(v.as_slice(), &[2, 7, 0, 1]);
    }

    #[test]
    fn cutoff_excludes_rare_terms() {
        let corpus = corpus();
        let builder = VectorBuilder::new(&corpus);
        let v = builder.build(&"a".into(), Cutoff::new(1.0)).unwrap();
        // Term 2 (df 1) is dropped; columns are terms 1, 3, 5.
        assert_eq!(v.as_slice(), &[2, 0, 1]);
    }

    #[test]
    fn batch_vectors_share_length_and_zero_fill() {
        let corpus = corpus();
        let builder = VectorBuilder::new(&corpus);
        let cutoff = Cutoff::new(1.0);
        let ids: Vec<DocumentId> = ["a", "b", "c", "d"].into_iter().map(DocumentId::from).collect();
        let vectors = builder.build_batch(&ids, cutoff).unwrap();

        let expected_len = corpus.terms_above(cutoff.value()).unwrap().len();
        assert!(vectors.iter().all(|v| v.len() == expected_len));
        assert_eq!(vectors[1].as_slice(), &[1, 4, 0]);
        assert_eq!(vectors[2].as_slice(), &[5, 1, 2]);
        // "d" has no postings at all.
        assert_eq!(vectors[3].as_slice(), &[0, 0, 0]);
    }

    #[test]
    fn duplicate_documents_get_identical_rows() {
        let corpus = corpus();
        let builder = VectorBuilder::new(&corpus);
        let ids: Vec<DocumentId> = vec!["b".into(), "b".into()];
        let vectors = builder.build_batch(&ids, Cutoff::new(0.0)).unwrap();
        assert_eq!(vectors[0], vectors[1]);
    }

    #[test]
    fn high_cutoff_yields_empty_vectors() {
        let corpus = corpus();
        let builder = VectorBuilder::new(&corpus);
        let v = builder.build(&"a".into(), Cutoff::new(10.0)).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn offline_index_fails_the_whole_batch() {
        let corpus = corpus();
        corpus.set_offline(true);
        let builder = VectorBuilder::new(&corpus);
        let ids: Vec<DocumentId> = vec!["a".into(), "b".into()];
        let result = builder.build_batch(&ids, Cutoff::new(0.0));
        assert!(matches!(result, Err(ClassifyError::IndexUnavailable(_))));
    }

    #[test]
    fn set_of_words_is_not_implemented() {
        let corpus = corpus();
        let builder = VectorBuilder::new(&corpus).with_mode(VectorMode::SetOfWords);
        let result = builder.build(&"a".into(), Cutoff::new(0.0));
        assert!(matches!(result, Err(ClassifyError::UnsupportedVectorMode("sow"))));
    }

    #[test]
    fn vector_mode_parses() {
        assert_eq!("bow".parse::<VectorMode>().unwrap(), VectorMode::BagOfWords);
        assert_eq!("SOW".parse::<VectorMode>().unwrap(), VectorMode::SetOfWords);
        assert!("tfidf".parse::<VectorMode>().is_err());
    }
}
