//! In-memory corpus implementing both collaborator traits.
//!
//! Used by tests and by callers that assemble a small corpus without a
//! database. Document frequencies are maintained as postings are added, so
//! the index is always consistent with its postings.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::debug;

use crate::corpus::{DocumentSource, LabellingQuery, PostingIndex, TrainingQuery};
use crate::document::{Document, DocumentId, DocumentPrediction, PostingCount, Term, TermId};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("in-memory corpus is offline")]
    Offline,

    #[error("in-memory corpus lock poisoned")]
    Poisoned,

    #[error("unknown document: {0}")]
    UnknownDocument(DocumentId),
}

#[derive(Default)]
struct State {
    documents: Vec<Document>,
    terms: BTreeMap<TermId, Term>,
    postings: BTreeMap<(DocumentId, TermId), u32>,
}

/// Corpus held entirely in memory behind a read-write lock.
#[derive(Default)]
pub struct MemoryCorpus {
    state: RwLock<State>,
    offline: AtomicBool,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a document row.
    pub fn add_document(&self, document: Document) -> Result<(), MemoryError> {
        let mut state = self.state.write().map_err(|_| MemoryError::Poisoned)?;
        match state.documents.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => state.documents.push(document),
        }
        Ok(())
    }

    /// Record `occurrences` of `term` in `document`.
    ///
    /// The first posting of a term for a document bumps the term's document
    /// frequency; repeated calls for the same pair add occurrences only.
    pub fn add_posting(
        &self,
        document: &DocumentId,
        term: TermId,
        occurrences: u32,
    ) -> Result<(), MemoryError> {
        let mut state = self.state.write().map_err(|_| MemoryError::Poisoned)?;
        if !state.documents.iter().any(|d| &d.id == document) {
            return Err(MemoryError::UnknownDocument(document.clone()));
        }
        let key = (document.clone(), term);
        let is_new = !state.postings.contains_key(&key);
        *state.postings.entry(key).or_insert(0) += occurrences;
        let entry = state.terms.entry(term).or_insert(Term {
            id: term,
            document_frequency: 0,
        });
        if is_new {
            entry.document_frequency += 1;
        }
        Ok(())
    }

    /// Snapshot of a stored document.
    pub fn document(&self, id: &DocumentId) -> Result<Option<Document>, MemoryError> {
        let state = self.state.read().map_err(|_| MemoryError::Poisoned)?;
        Ok(state.documents.iter().find(|d| &d.id == id).cloned())
    }

    /// Simulate an index outage: every index query fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), MemoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MemoryError::Offline);
        }
        Ok(())
    }
}

fn language_matches(document: &Document, language: Option<&str>) -> bool {
    match language {
        None => true,
        Some(lang) => document.language.as_deref() == Some(lang),
    }
}

impl PostingIndex for MemoryCorpus {
    type Error = MemoryError;

    fn document_count(&self) -> Result<u64, MemoryError> {
        self.check_online()?;
        let state = self.state.read().map_err(|_| MemoryError::Poisoned)?;
        Ok(state.documents.len() as u64)
    }

    fn terms_above(&self, cutoff: f64) -> Result<Vec<Term>, MemoryError> {
        self.check_online()?;
        let state = self.state.read().map_err(|_| MemoryError::Poisoned)?;
        // BTreeMap iteration is already ascending by term id.
        Ok(state
            .terms
            .values()
            .filter(|t| t.document_frequency as f64 > cutoff)
            .copied()
            .collect())
    }

    fn posting_counts(
        &self,
        documents: &[DocumentId],
        cutoff: f64,
    ) -> Result<Vec<PostingCount>, MemoryError> {
        self.check_online()?;
        let state = self.state.read().map_err(|_| MemoryError::Poisoned)?;
        let wanted: HashSet<&DocumentId> = documents.iter().collect();
        Ok(state
            .postings
            .iter()
            .filter(|((doc, term), _)| {
                wanted.contains(doc)
                    && state
                        .terms
                        .get(term)
                        .is_some_and(|t| t.document_frequency as f64 > cutoff)
            })
            .map(|((doc, term), &occurrences)| PostingCount {
                document: doc.clone(),
                term: *term,
                occurrences,
            })
            .collect())
    }
}

impl DocumentSource for MemoryCorpus {
    type Error = MemoryError;

    /// Eligible documents in insertion order rather than at random, so a
    /// fixture trains on the same batch every time.
    fn training_documents(&self, query: &TrainingQuery) -> Result<Vec<Document>, MemoryError> {
        let state = self.state.read().map_err(|_| MemoryError::Poisoned)?;
        Ok(state
            .documents
            .iter()
            .filter(|d| d.mean_certainty() >= query.certainty_quantile)
            .filter(|d| language_matches(d, query.language.as_deref()))
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn labelling_documents(&self, query: &LabellingQuery) -> Result<Vec<Document>, MemoryError> {
        let state = self.state.read().map_err(|_| MemoryError::Poisoned)?;
        let mut candidates: Vec<Document> = state
            .documents
            .iter()
            .filter(|d| d.mean_certainty() <= query.max_certainty)
            .filter(|d| language_matches(d, query.language.as_deref()))
            .filter(|d| query.after.as_ref().is_none_or(|after| &d.id > after))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates.truncate(query.limit);
        Ok(candidates)
    }

    fn record_predictions(&self, predictions: &[DocumentPrediction]) -> Result<(), MemoryError> {
        let mut state = self.state.write().map_err(|_| MemoryError::Poisoned)?;
        // Validate first so a bad id leaves every row untouched.
        for p in predictions {
            if !state.documents.iter().any(|d| d.id == p.document) {
                return Err(MemoryError::UnknownDocument(p.document.clone()));
            }
        }
        for p in predictions {
            if let Some(doc) = state.documents.iter_mut().find(|d| d.id == p.document) {
                doc.legal = p.legal.class;
                doc.legal_certainty = p.legal.confidence;
                doc.primary_label = Some(p.label.class);
                doc.label_certainty = p.label.confidence;
            }
        }
        debug!(count = predictions.len(), "recorded predictions");
        Ok(())
    }
}
