//! Corpus entities shared by the store and the classifier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, stable content identifier of a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a content label (e.g. "Mail", "Adult").
pub type LabelId = i64;

/// Identifier of an index term. Feature columns are ordered by it.
pub type TermId = i64;

/// A named content label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(rename = "labelId")]
    pub id: LabelId,
    #[serde(rename = "label")]
    pub name: String,
}

/// One row of the document corpus.
///
/// `legal` and `primary_label` are overwritten by the apply phase together
/// with their certainties; everything else is owned by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub language: Option<String>,
    pub legal: bool,
    pub primary_label: Option<LabelId>,
    pub legal_certainty: f64,
    pub label_certainty: f64,
}

impl Document {
    /// Averaged legal/label certainty, the quantity both batch filters use.
    pub fn mean_certainty(&self) -> f64 {
        (self.legal_certainty + self.label_certainty) / 2.0
    }
}

/// An index term with its corpus-wide document frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub document_frequency: u64,
}

/// Number of recorded occurrences of `term` in `document`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingCount {
    pub document: DocumentId,
    pub term: TermId,
    pub occurrences: u32,
}

/// Bag-of-words vector: one occurrence count per included term, in
/// ascending term order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<u32>);

impl FeatureVector {
    pub fn new(counts: Vec<u32>) -> Self {
        Self(counts)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Dense `f64` row for the numeric stages (scaler, classifiers).
    pub fn to_f64(&self) -> Vec<f64> {
        self.0.iter().map(|&c| f64::from(c)).collect()
    }

    pub fn into_inner(self) -> Vec<u32> {
        self.0
    }
}

/// A decided class with its capped confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction<C> {
    pub class: C,
    pub confidence: f64,
}

/// Both track decisions for one document, ready to be written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPrediction {
    pub document: DocumentId,
    pub legal: Prediction<bool>,
    pub label: Prediction<LabelId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(legal_certainty: f64, label_certainty: f64) -> Document {
        Document {
            id: DocumentId::new("d1"),
            language: None,
            legal: true,
            primary_label: None,
            legal_certainty,
            label_certainty,
        }
    }

    #[test]
    fn mean_certainty_averages_both_axes() {
        assert!((doc(1.0, 0.5).mean_certainty() - 0.75).abs() < 1e-12);
        assert_eq!(doc(0.0, 0.0).mean_certainty(), 0.0);
    }

    #[test]
    fn document_ids_order_lexicographically() {
        let mut ids = vec![DocumentId::new("b"), DocumentId::new("a"), DocumentId::new("c")];
        ids.sort();
        let ordered: Vec<&str> = ids.iter().map(|d| d.as_str()).collect();
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }

    #[test]
    fn feature_vector_converts_to_dense_f64() {
        let v = FeatureVector::new(vec![0, 3, 1]);
        assert_eq!(v.len(), 3);
        assert_eq!(v.to_f64(), vec![0.0, 3.0, 1.0]);
    }

    #[test]
    fn label_uses_seed_file_field_names() {
        let label: Label = serde_json::from_str(r#"{"label":"Mail","labelId":7}"#).unwrap();
        assert_eq!(label.id, 7);
        assert_eq!(label.name, "Mail");
    }
}
